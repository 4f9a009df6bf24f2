// MCP server implementation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::mcp::tools;
use crate::Codelore;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC message
#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcMessage {
    jsonrpc: String,
    id: Option<Value>,
    method: Option<String>,
    params: Option<Value>,
}

/// MCP server capabilities
#[derive(Debug, Serialize)]
struct ServerCapabilities {
    tools: Value,
}

/// MCP server info
#[derive(Debug, Serialize)]
struct ServerInfo {
    name: String,
    version: String,
}

/// MCP initialize result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    capabilities: ServerCapabilities,
    server_info: ServerInfo,
}

/// Outcome of handling one line of input
enum Handled {
    Reply(Value),
    /// Notification, nothing to send back
    Silent,
    Shutdown(Value),
}

/// MCP server over line-delimited JSON-RPC
pub struct McpServer {
    app: Codelore,
}

impl McpServer {
    pub fn new(app: Codelore) -> Self {
        Self { app }
    }

    /// Run the MCP server on stdin/stdout until input ends or shutdown
    pub async fn run(self) -> Result<()> {
        info!("Starting MCP server");

        let (tx, mut rx) = mpsc::unbounded_channel();

        // Blocking stdin reads stay off the runtime threads
        tokio::task::spawn_blocking(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error reading from stdin: {}", e);
                        break;
                    }
                }
            }
        });

        while let Some(line) = rx.recv().await {
            if line.trim().is_empty() {
                continue;
            }
            debug!("Received: {}", line);

            match self.handle_message(&line).await {
                Handled::Reply(response) => write_line(&response)?,
                Handled::Silent => {}
                Handled::Shutdown(response) => {
                    write_line(&response)?;
                    break;
                }
            }
        }

        self.app.close();
        info!("MCP server stopped");
        Ok(())
    }

    /// Handle a JSON-RPC message
    async fn handle_message(&self, message: &str) -> Handled {
        let msg: JsonRpcMessage = match serde_json::from_str(message) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Unparseable message: {}", e);
                return Handled::Reply(error_response(Value::Null, -32700, format!("Parse error: {}", e)));
            }
        };

        let Some(method) = msg.method.as_deref() else {
            return Handled::Reply(error_response(msg.id.unwrap_or(Value::Null), -32600, "Invalid request"));
        };

        // Notifications carry no id and get no response
        let Some(id) = msg.id else {
            debug!("Notification: {}", method);
            return Handled::Silent;
        };

        match method {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities { tools: json!({}) },
                    server_info: ServerInfo {
                        name: "codelore".to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                };
                Handled::Reply(success_response(id, json!(result)))
            }

            "ping" => Handled::Reply(success_response(id, json!({}))),

            "tools/list" => Handled::Reply(success_response(id, json!({ "tools": tools::definitions() }))),

            "tools/call" => {
                let params = msg.params.unwrap_or(Value::Null);
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return Handled::Reply(error_response(id, -32602, "Invalid params: missing tool name"));
                };
                let args = params.get("arguments").cloned().unwrap_or(Value::Null);

                let result = match tools::call(&self.app, name, args).await {
                    Ok(value) => json!({
                        "content": [{
                            "type": "text",
                            "text": serde_json::to_string_pretty(&value).unwrap_or_default()
                        }]
                    }),
                    Err(e) => {
                        warn!("Tool {} failed: {:#}", name, e);
                        json!({
                            "content": [{ "type": "text", "text": format!("{:#}", e) }],
                            "isError": true
                        })
                    }
                };
                Handled::Reply(success_response(id, result))
            }

            "shutdown" => {
                info!("Received shutdown request");
                Handled::Shutdown(success_response(id, Value::Null))
            }

            other => Handled::Reply(error_response(id, -32601, format!("Method not found: {}", other))),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i32, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() }
    })
}

fn write_line(response: &Value) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, response)?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(())
}
