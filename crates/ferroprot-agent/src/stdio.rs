//! Newline-delimited JSON-RPC 2.0 over stdin/stdout.
//!
//! Supports `initialize`, `tools/list` and `tools/call`. A failing tool call is a
//! successful response with `isError: true`; protocol problems get JSON-RPC errors.
//! Logs go to stderr, stdout carries responses only.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::tools::ToolRegistry;

const PROTOCOL_VERSION: &str = "2024-11-05";
const PARSE_ERROR: i64 = -32700;
const INVALID_PARAMS: i64 = -32602;
const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn reply(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message.into() } })
}

/// Wrap a tool result (or failure) as a text content block.
fn tool_result(outcome: Result<Value>) -> Value {
    match outcome {
        Ok(out) => {
            let text = serde_json::to_string_pretty(&out).unwrap_or_else(|_| out.to_string());
            json!({ "content": [{ "type": "text", "text": text }], "structuredContent": out })
        }
        Err(e) => json!({ "content": [{ "type": "text", "text": format!("ERROR: {e:#}") }], "isError": true }),
    }
}

/// Handle one input line. Notifications (no `id`) produce no response.
pub async fn handle_line(registry: &ToolRegistry, line: &str) -> Option<Value> {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return Some(error(Value::Null, PARSE_ERROR, format!("Parse error: {e}"))),
    };
    let id = request.id?;
    debug!(method = %request.method, "Request");

    let response = match request.method.as_str() {
        "initialize" => reply(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "ferroprot", "version": env!("CARGO_PKG_VERSION") },
            }),
        ),
        "tools/list" => reply(id, registry.manifest()),
        "tools/call" => match serde_json::from_value::<CallParams>(request.params) {
            Ok(call) => reply(id, tool_result(registry.invoke(&call.name, call.arguments).await)),
            Err(e) => error(id, INVALID_PARAMS, format!("Invalid tools/call params: {e}")),
        },
        other => error(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
    };
    Some(response)
}

/// Serve requests until stdin closes.
pub async fn serve(registry: &ToolRegistry) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Some(response) = handle_line(registry, &line).await else {
            continue;
        };
        let mut raw = serde_json::to_vec(&response)?;
        raw.push(b'\n');
        if let Err(e) = stdout.write_all(&raw).await {
            warn!(error = %e, "stdout closed");
            break;
        }
        stdout.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{build_default_registry, test_support};
    use pretty_assertions::assert_eq;

    fn registry() -> (tempfile::TempDir, ToolRegistry) {
        let (dir, svc) = test_support::service();
        (dir, build_default_registry(svc))
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let (_dir, reg) = registry();
        let init = handle_line(&reg, r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#).await.unwrap();
        assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);

        let list = handle_line(&reg, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#).await.unwrap();
        assert_eq!(list["id"], 2);
        assert_eq!(list["result"]["tools"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_notifications_get_no_reply() {
        let (_dir, reg) = registry();
        assert!(handle_line(&reg, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await.is_none());
    }

    #[tokio::test]
    async fn test_tool_call_success_and_failure() {
        let (_dir, reg) = registry();
        let ok = handle_line(
            &reg,
            r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"pipeline.status","arguments":{"run_id":"x"}}}"#,
        )
        .await
        .unwrap();
        assert_eq!(ok["result"]["structuredContent"]["found"], false);
        assert!(ok["result"].get("isError").is_none());

        let failed = handle_line(
            &reg,
            r#"{"jsonrpc":"2.0","id":"b","method":"tools/call","params":{"name":"pipeline.fly","arguments":{}}}"#,
        )
        .await
        .unwrap();
        assert_eq!(failed["result"]["isError"], true);
        assert!(failed["result"]["content"][0]["text"].as_str().unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let (_dir, reg) = registry();
        let parse = handle_line(&reg, "{not json").await.unwrap();
        assert_eq!(parse["error"]["code"], PARSE_ERROR);

        let missing = handle_line(&reg, r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#).await.unwrap();
        assert_eq!(missing["error"]["code"], METHOD_NOT_FOUND);

        let bad = handle_line(&reg, r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{}}"#).await.unwrap();
        assert_eq!(bad["error"]["code"], INVALID_PARAMS);
    }
}
