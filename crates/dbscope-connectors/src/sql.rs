//! SQL text helpers shared by the dialect connectors.

/// Default row count for `sample` when the caller passes a non-positive limit.
pub const DEFAULT_SAMPLE_LIMIT: i64 = 10;

/// Rows fetched for the sample embedded in a table description.
pub const DESCRIBE_SAMPLE_ROWS: i64 = 5;

/// Bind placeholder flavour of a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `$1, $2, ...` (Postgres)
    Numbered,
    /// `?, ?, ...` (MySQL, SQLite)
    Positional,
}

/// Render `count` bind placeholders for an `IN (...)` list, numbering from
/// `first` for dialects that number them.
pub fn in_list(style: Placeholder, first: usize, count: usize) -> String {
    (0..count)
        .map(|i| match style {
            Placeholder::Numbered => format!("${}", first + i),
            Placeholder::Positional => "?".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Quote an identifier with `quote`, doubling any embedded quote character.
pub fn quote_ident(ident: &str, quote: char) -> String {
    let doubled: String = [quote, quote].iter().collect();
    let escaped = ident.replace(quote, &doubled);
    format!("{quote}{escaped}{quote}")
}

/// Clamp a caller-supplied sample limit: anything below 1 means the default.
pub fn effective_limit(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_SAMPLE_LIMIT
    } else {
        limit
    }
}

/// `SELECT * FROM <from> LIMIT <limit>` with `from` interpolated as given.
///
/// `from` is trusted: callers pass names that came out of `scan` or the
/// catalog. It is not escaped here.
pub fn select_sample(from: &str, limit: i64) -> String {
    format!("SELECT * FROM {} LIMIT {}", from, limit)
}

/// `SELECT COUNT(*) FROM <from>` with `from` interpolated as given.
pub fn select_count(from: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", from)
}
