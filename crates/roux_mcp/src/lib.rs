//! MCP (Model Context Protocol) surface for Roux.
//!
//! JSON-RPC layer over the core: the `initialize` handshake, the dynamic
//! tool catalog, per-tool dispatch, and the line-delimited transport loop.
//! One stdin line carries one request; one stdout line carries one response
//! frame. Because stdout doubles as the wire, nothing else may be printed
//! there; tracing is routed to stderr so a log line can never tear a frame.

pub mod tools;

use roux_common::RouxError;
use roux_core::RouxCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error object
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Map a core error onto the protocol taxonomy.
    pub fn from_roux_error(err: &RouxError) -> Self {
        let (code, kind) = match err {
            RouxError::InvalidInput(_) => (-32602, "InvalidParams"),
            RouxError::NodeExists { .. } => (-32001, "NodeExists"),
            RouxError::NodeNotFound { .. } => (-32002, "NodeNotFound"),
            RouxError::LinkIntegrity(_) => (-32003, "LinkIntegrity"),
            _ => (-32000, "ProviderError"),
        };

        Self {
            code,
            message: err.to_string(),
            data: Some(serde_json::json!({ "kind": kind })),
        }
    }
}

/// Handle a single JSON-RPC request. Returns None when the request is a
/// notification, which must never be answered.
pub async fn handle_request(core: &RouxCore, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    tracing::info!(target: "mcp", method = %request.method, "rpc request");

    // A missing id marks a notification. The client fires these one-way
    // (`notifications/initialized` and friends); answering one would desync
    // the id stream, so they are swallowed whether or not we know the method.
    let is_notification = request.id.is_none();

    let result = match request.method.as_str() {
        "initialize" => handle_initialize(request.params).await,
        "tools/list" => handle_tools_list(core).await,
        "tools/call" => handle_tools_call(core, request.params).await,
        "ping" => handle_ping().await,
        _ if is_notification => return None,
        other => Err(RouxError::InvalidInput(format!(
            "unknown method: {}",
            other
        ))),
    };

    if is_notification {
        return None;
    }

    Some(match result {
        Ok(value) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: Some(value),
            error: None,
        },
        Err(e) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: None,
            error: Some(JsonRpcError::from_roux_error(&e)),
        },
    })
}

/// Serve frames over stdin/stdout until stdin closes.
///
/// Malformed lines get a -32700 frame with a null id instead of killing the
/// session. Returns the first I/O error on either stream; the caller decides
/// whether that ends the process.
pub fn run_stdio_loop(core: &RouxCore, rt: &tokio::runtime::Runtime) -> std::io::Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let frame = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => {
                let response = rt.block_on(handle_request(core, request));
                response.and_then(|resp| match serde_json::to_value(&resp) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::error!("response not serializable: {}", e);
                        None
                    }
                })
            }
            Err(e) => {
                tracing::warn!("discarding malformed request line: {}", e);
                Some(malformed_request_frame(&e))
            }
        };

        if let Some(frame) = frame {
            write_frame(&mut stdout, &frame)?;
        }
    }

    Ok(())
}

fn malformed_request_frame(err: &serde_json::Error) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": {
            "code": -32700,
            "message": format!("request is not valid JSON-RPC: {}", err)
        }
    })
}

/// One response per line, flushed immediately so the client never stalls on
/// a buffered frame.
fn write_frame(out: &mut impl Write, frame: &Value) -> std::io::Result<()> {
    writeln!(out, "{}", frame)?;
    out.flush()
}

/// Initialize handler, the MCP protocol handshake.
async fn handle_initialize(_params: Option<Value>) -> roux_common::Result<Value> {
    Ok(serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "roux",
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Tools list handler. The catalog is dynamic; a tool whose capability is
/// absent is simply not advertised.
async fn handle_tools_list(core: &RouxCore) -> roux_common::Result<Value> {
    Ok(serde_json::json!({ "tools": tools::catalog(core) }))
}

/// Tools call handler: route to the named tool implementation.
async fn handle_tools_call(core: &RouxCore, params: Option<Value>) -> roux_common::Result<Value> {
    let params = params
        .ok_or_else(|| RouxError::InvalidInput("missing params for tools/call".to_string()))?;

    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            RouxError::InvalidInput("missing 'name' field in tools/call params".to_string())
        })?;

    let args = params.get("arguments").cloned();

    let payload = tools::dispatch(core, name, args).await?;

    // Non-fatal sync anomalies ride along with the next response.
    let warnings = core.drain_warnings();
    let payload = if warnings.is_empty() {
        payload
    } else {
        match payload {
            Value::Object(mut map) => {
                map.insert("_warnings".to_string(), serde_json::json!(warnings));
                Value::Object(map)
            }
            other => serde_json::json!({ "result": other, "_warnings": warnings }),
        }
    };

    Ok(serde_json::json!({
        "content": [
            {
                "type": "text",
                "text": serde_json::to_string_pretty(&payload).unwrap_or_default()
            }
        ]
    }))
}

/// Ping handler
async fn handle_ping() -> roux_common::Result<Value> {
    Ok(Value::String("pong".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_core() -> RouxCore {
        let vault = assert_fs::TempDir::new().unwrap();
        let config = roux_config::Config::load(vault.path()).unwrap();
        // Leak the TempDir so the vault outlives the core in these
        // protocol-level tests.
        std::mem::forget(vault);
        RouxCore::open(config, None).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let core = test_core();
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::Number(1.into())),
            method: "ping".to_string(),
            params: None,
        };

        let resp = handle_request(&core, req).await.unwrap();
        assert_eq!(resp.result.unwrap(), Value::String("pong".to_string()));
    }

    #[tokio::test]
    async fn test_initialized_notification_gets_no_response() {
        let core = test_core();
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: "notifications/initialized".to_string(),
            params: None,
        };
        assert!(handle_request(&core, req).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method_is_invalid_params() {
        let core = test_core();
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::Number(2.into())),
            method: "no_such_method".to_string(),
            params: None,
        };
        let resp = handle_request(&core, req).await.unwrap();
        assert_eq!(resp.error.unwrap().code, -32602);
    }

    #[test]
    fn test_error_mapping() {
        let err = RouxError::NodeExists {
            id: "a.md".to_string(),
        };
        let mapped = JsonRpcError::from_roux_error(&err);
        assert_eq!(mapped.code, -32001);
        assert_eq!(mapped.data.unwrap()["kind"], "NodeExists");

        let err = RouxError::Provider("embedder timed out".to_string());
        assert_eq!(JsonRpcError::from_roux_error(&err).code, -32000);
    }

    #[test]
    fn test_malformed_request_frame_shape() {
        let err = serde_json::from_str::<JsonRpcRequest>("not json").unwrap_err();
        let frame = malformed_request_frame(&err);
        assert_eq!(frame["error"]["code"], -32700);
        assert!(frame["id"].is_null());
    }
}
