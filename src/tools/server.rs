use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::{tool_definitions, NutritionTools};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "nutrition-db";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

fn result_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Handles one line of input. Returns `None` for notifications, which get no reply.
pub async fn handle_message(tools: &mut NutritionTools, line: &str) -> Option<Value> {
    let message: Value = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(err) => return Some(error_response(Value::Null, PARSE_ERROR, &format!("Parse error: {}", err))),
    };
    let Some(method) = message.get("method").and_then(Value::as_str) else {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        return Some(error_response(id, INVALID_REQUEST, "Invalid request: missing method"));
    };
    let Some(id) = message.get("id").cloned() else {
        debug!(method, "Ignoring notification");
        return None;
    };
    let params = message.get("params").cloned().unwrap_or(Value::Null);

    let response = match method {
        "initialize" => result_response(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
            }),
        ),
        "ping" => result_response(id, json!({})),
        "tools/list" => result_response(id, json!({ "tools": tool_definitions() })),
        "tools/call" => {
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Some(error_response(id, INVALID_PARAMS, "Invalid params: missing tool name"));
            };
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            let payload = tools.call(name, &arguments).await;
            let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
            result_response(id, json!({ "content": [{ "type": "text", "text": text }] }))
        }
        other => error_response(id, METHOD_NOT_FOUND, &format!("Method not found: {}", other)),
    };
    Some(response)
}

/// Line-delimited JSON-RPC loop. Returns when the reader reaches end of input.
pub async fn serve<R, W>(tools: &mut NutritionTools, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(response) = handle_message(tools, &line).await {
            let mut encoded = serde_json::to_string(&response).context("Failed to encode response")?;
            encoded.push('\n');
            writer.write_all(encoded.as_bytes()).await.context("Failed to write response")?;
            writer.flush().await.context("Failed to flush response")?;
        }
    }
    Ok(())
}

pub async fn serve_stdio(mut tools: NutritionTools) -> Result<()> {
    info!(foods = tools.db().store().count(), "Nutrition tool server listening on stdio");
    let result = serve(&mut tools, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await;
    if let Err(err) = &result {
        warn!(error = %err, "Tool server stopped with an error");
    }
    info!("Nutrition tool server shut down");
    result
}
