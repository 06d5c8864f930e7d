//! JSON-RPC 2.0 over newline-delimited stdio.
//!
//! Requests that touch the database run as their own tasks so a
//! `notifications/cancelled` message can abort them mid-flight. Responses are
//! funneled through a single writer task and may arrive out of order.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use dbscope_connectors::DatabaseConnector;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::tools;

const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Deserialize)]
struct Request {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    method: String,
    #[serde(default)]
    params: Value,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Clone)]
struct Outbox(mpsc::UnboundedSender<Response>);

impl Outbox {
    fn send(&self, response: Response) {
        if self.0.send(response).is_err() {
            warn!("output closed, dropping response");
        }
    }
}

/// Serve requests from `input` until it reaches end of file, then wait for
/// in-flight calls to finish.
pub async fn serve<R, W>(connector: Arc<dyn DatabaseConnector>, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_responses(rx, output));
    let outbox = Outbox(tx);

    let mut tasks = JoinSet::new();
    let mut in_flight: HashMap<String, AbortHandle> = HashMap::new();
    let mut lines = BufReader::new(input).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        while tasks.try_join_next().is_some() {}
        in_flight.retain(|_, handle| !handle.is_finished());

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request = match parse_request(line) {
            Ok(request) => request,
            Err(response) => {
                outbox.send(*response);
                continue;
            }
        };
        debug!(method = %request.method, "request");

        match (request.method.as_str(), request.id) {
            ("notifications/initialized", _) => {}
            ("notifications/cancelled", _) => {
                let key = request.params.get("requestId").map(Value::to_string);
                if let Some(handle) = key.and_then(|k| in_flight.remove(&k)) {
                    info!(request = %request.params["requestId"], "cancelling request");
                    handle.abort();
                }
            }
            ("initialize", Some(id)) => outbox.send(Response::ok(id, initialize_result())),
            ("tools/list", Some(id)) => outbox.send(Response::ok(id, tools::definitions())),
            ("ping", Some(id)) => {
                let connector = connector.clone();
                let outbox = outbox.clone();
                let key = id.to_string();
                let handle = tasks.spawn(async move {
                    let response = match connector.ping().await {
                        Ok(()) => Response::ok(id, json!({})),
                        Err(e) => Response::err(id, INTERNAL_ERROR, e.to_string()),
                    };
                    outbox.send(response);
                });
                in_flight.insert(key, handle);
            }
            ("tools/call", Some(id)) => {
                let Some(name) = request.params.get("name").and_then(Value::as_str) else {
                    outbox.send(Response::err(id, INVALID_PARAMS, "Missing tool name"));
                    continue;
                };
                let name = name.to_string();
                let args = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let connector = connector.clone();
                let outbox = outbox.clone();
                let key = id.to_string();
                let handle = tasks.spawn(async move {
                    let result = tools::call(connector.as_ref(), &name, &args).await;
                    match serde_json::to_value(result) {
                        Ok(result) => outbox.send(Response::ok(id, result)),
                        Err(e) => outbox.send(Response::err(id, INTERNAL_ERROR, e.to_string())),
                    }
                });
                in_flight.insert(key, handle);
            }
            (method, Some(id)) => outbox.send(Response::err(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            )),
            (method, None) => debug!(method, "ignoring notification"),
        }
    }

    debug!("input closed, draining {} in-flight calls", tasks.len());
    while tasks.join_next().await.is_some() {}
    drop(outbox);

    writer.await.context("Response writer panicked")?
}

fn parse_request(line: &str) -> std::result::Result<Request, Box<Response>> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| Box::new(Response::err(Value::Null, PARSE_ERROR, format!("Parse error: {e}"))))?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| Box::new(Response::err(id, INVALID_REQUEST, format!("Invalid request: {e}"))))
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": "dbscope", "version": env!("CARGO_PKG_VERSION") }
    })
}

async fn write_responses<W>(mut rx: mpsc::UnboundedReceiver<Response>, mut output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response).context("Failed to encode response")?;
        line.push(b'\n');
        output
            .write_all(&line)
            .await
            .context("Failed to write response")?;
        output.flush().await.context("Failed to flush response")?;
    }
    Ok(())
}
