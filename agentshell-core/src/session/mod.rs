//! Remote Session (spec §4.2): one MCP client connection to a workload,
//! reused across every call `batch_call` makes to it (spec §3 invariant 3 —
//! "connection reused" — and E7).
//!
//! rmcp 3.1 unifies the old SSE and streamable-HTTP client transports behind
//! `StreamableHttpClientTransport`; the `client-side-sse` feature gives it
//! auto-reconnecting SSE framing internally, so both of the original's
//! `transport_type` values ("sse", "streamable-http") are served by the same
//! transport here. We only ever drive a single `tools/call` round
//! (`call_tool_once`): spec.md's contract has no notion of the MRTR
//! input-required/task rounds rmcp 3.1 added, so a server that replies with
//! one of those is treated as speaking an unsupported variant of the
//! protocol rather than silently looping rounds on the caller's behalf.

use std::time::Duration;

use rmcp::model::{CallToolRequestParams, CallToolResponse};
use rmcp::service::RunningService;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;

use crate::error::{ShellError, ToolDispatchError};
use crate::registry::Workload;

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A connected MCP session to one workload.
pub struct RemoteSession {
    client: RunningService<RoleClient, ()>,
}

impl RemoteSession {
    /// Opens a session to `workload`, validating it per spec §4.2 step 1
    /// before ever dialing out: must be known, running, have a url, and
    /// advertise a transport this client speaks.
    pub async fn open(workload: &Workload) -> Result<Self, ToolDispatchError> {
        if !workload.is_running() {
            return Err(ToolDispatchError::WorkloadNotRunning(
                workload.name.clone(),
                workload.status.clone(),
            ));
        }
        let url = workload
            .url
            .as_ref()
            .ok_or_else(|| ToolDispatchError::NoUrl(workload.name.clone()))?;

        match workload.proxy_mode.as_str() {
            "sse" | "streamable-http" | "" => {}
            other => return Err(ToolDispatchError::UnsupportedTransport(other.to_string())),
        }

        Self::connect(url).await
    }

    async fn connect(url: &str) -> Result<Self, ToolDispatchError> {
        let transport = StreamableHttpClientTransport::from_uri(url.to_string());
        let client = ()
            .serve(transport)
            .await
            .map_err(|err| ToolDispatchError::RpcError(err.to_string()))?;
        Ok(Self { client })
    }

    /// Lists the tools the connected workload exposes.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolDispatchError> {
        let result = self
            .client
            .list_tools(None)
            .await
            .map_err(|err| ToolDispatchError::RpcError(err.to_string()))?;
        Ok(result
            .tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()),
                input_schema: Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    /// Calls `tool` once with `args`, under a 30s deadline (spec §4.2).
    pub async fn call_tool(
        &self,
        tool: &str,
        args: Value,
    ) -> Result<String, ToolDispatchError> {
        let arguments = match args {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(ToolDispatchError::RpcError(format!(
                    "tool arguments must be a JSON object, got {other}"
                )));
            }
        };

        let mut params = CallToolRequestParams::new(tool.to_string());
        params.arguments = arguments;

        let response = tokio::time::timeout(CALL_TIMEOUT, self.client.call_tool_once(params))
            .await
            .map_err(|_| ToolDispatchError::Timeout(CALL_TIMEOUT))?
            .map_err(|err| ToolDispatchError::RpcError(err.to_string()))?;

        match response {
            CallToolResponse::Complete(result) => Ok(extract_text(&result)),
            _ => Err(ToolDispatchError::UnsupportedTransport(
                "multi-round tool response (input_required/task)".to_string(),
            )),
        }
    }

    /// Calls `tool` once per item of `args_list` over this one session
    /// (spec §4.2 "batch call", E7). On the first failure, reports how many
    /// calls completed and returns whatever text the successful calls
    /// produced alongside the error, mirroring the original's partial-result
    /// reporting.
    pub async fn batch_call(
        &self,
        tool: &str,
        args_list: Vec<Value>,
    ) -> Result<Vec<String>, ShellError> {
        let total = args_list.len();
        let mut completed = Vec::with_capacity(total);

        for (idx, args) in args_list.into_iter().enumerate() {
            match self.call_tool(tool, args).await {
                Ok(text) => completed.push(text),
                Err(err) => {
                    let partial = if completed.is_empty() {
                        String::new()
                    } else {
                        format!(
                            "\nPartial results from successful calls:\n{}",
                            completed.join("\n")
                        )
                    };
                    return Err(ShellError::ToolCallError {
                        failed_item: idx + 1,
                        total,
                        completed: completed.len(),
                        pending: total - completed.len() - 1,
                        source: Box::new(err),
                        partial,
                    });
                }
            }
        }

        Ok(completed)
    }
}

fn extract_text(result: &rmcp::model::CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|block| match block {
            rmcp::model::ContentBlock::Text(text) => Some(text.text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A tool a workload advertises, as surfaced by `list_all_tools` / `describe`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// The tool names this orchestrator itself publishes (spec §6). A workload
/// whose tool set is a superset of these is almost certainly this very
/// process registered with its own registry; calling back into it would be
/// self-recursion, so it's elided from discovery (spec §3, §9).
pub const ORCHESTRATOR_TOOLS: &[&str] = &[
    "list_available_shell_commands",
    "execute_pipeline",
    "list_all_tools",
    "get_tool_details",
];

/// True if `tools` is a superset of [`ORCHESTRATOR_TOOLS`] — i.e. this
/// workload is (or embeds) the orchestrator itself.
pub fn is_orchestrator_workload(tools: &[ToolDescriptor]) -> bool {
    ORCHESTRATOR_TOOLS
        .iter()
        .all(|name| tools.iter().any(|t| t.name == *name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(status: &str, url: Option<&str>, proxy_mode: &str) -> Workload {
        serde_json::from_value(serde_json::json!({
            "name": "demo",
            "status": status,
            "url": url,
            "transport_type": "streamable-http",
            "proxy_mode": proxy_mode,
        }))
        .unwrap()
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: None,
            input_schema: Value::Object(Default::default()),
        }
    }

    #[test]
    fn orchestrator_workload_is_detected_by_its_four_tools() {
        let tools: Vec<_> = ORCHESTRATOR_TOOLS.iter().map(|n| descriptor(n)).collect();
        assert!(is_orchestrator_workload(&tools));
    }

    #[test]
    fn orchestrator_workload_detection_requires_every_tool() {
        let tools = vec![descriptor("list_all_tools"), descriptor("execute_pipeline")];
        assert!(!is_orchestrator_workload(&tools));
    }

    #[test]
    fn ordinary_workload_is_not_flagged_as_orchestrator() {
        let tools = vec![descriptor("fetch"), descriptor("search")];
        assert!(!is_orchestrator_workload(&tools));
    }

    #[tokio::test]
    async fn open_rejects_non_running_workload() {
        let workload = workload("stopped", Some("http://127.0.0.1:1/mcp"), "streamable-http");
        let result = RemoteSession::open(&workload).await;
        assert!(matches!(result, Err(ToolDispatchError::WorkloadNotRunning(_, _))));
    }

    #[tokio::test]
    async fn open_rejects_missing_url() {
        let workload = workload("running", None, "streamable-http");
        let result = RemoteSession::open(&workload).await;
        assert!(matches!(result, Err(ToolDispatchError::NoUrl(_))));
    }

    #[tokio::test]
    async fn open_rejects_unsupported_transport() {
        let workload = workload("running", Some("http://127.0.0.1:1/mcp"), "websocket");
        let result = RemoteSession::open(&workload).await;
        assert!(matches!(result, Err(ToolDispatchError::UnsupportedTransport(_))));
    }
}
