//! Error kinds for the pipeline engine and its collaborators.
//!
//! Mirrors the propagation policy from spec §7: nothing is retried
//! automatically, and every failure carries enough context (stage index,
//! kind, underlying cause) for the caller to adjust and resubmit.

use thiserror::Error;

/// Failure contract for `RemoteSession::call_tool` / `batch_call`.
#[derive(Debug, Error)]
pub enum ToolDispatchError {
    #[error("workload '{0}' not found")]
    WorkloadNotFound(String),
    #[error("workload '{0}' is not running (status: {1})")]
    WorkloadNotRunning(String, String),
    #[error("no url provided for workload '{0}'")]
    NoUrl(String),
    #[error("transport/proxy mode '{0}' not supported")]
    UnsupportedTransport(String),
    #[error("tool call failed: {0}")]
    RpcError(String),
    #[error("tool call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Top-level error type for everything `agentshell-core` can fail with.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("command '{command}' is not allowed. Allowed commands: {allowed}")]
    CommandNotAllowed { command: String, allowed: String },

    #[error("command '{command}' exited non-zero with empty stdout: {stderr}")]
    CommandExitFailure { command: String, stderr: String },

    #[error("command '{command}' timed out after {timeout:?}")]
    CommandTimeout {
        command: String,
        timeout: std::time::Duration,
    },

    #[error(transparent)]
    ToolDispatch(#[from] ToolDispatchError),

    #[error("batch tool call failed at item {failed_item} of {total}. Completed: {completed} successful, {pending} pending. Error: {source}{partial}")]
    ToolCallError {
        failed_item: usize,
        total: usize,
        completed: usize,
        pending: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
        partial: String,
    },

    #[error("Line {line}: {message}")]
    ForEachJson { line: usize, message: String },

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Wraps a stage failure with its 1-indexed position and kind, per the
/// `"Stage {i+1} ({kind}) failed: {inner}"` propagation rule in spec §4.5.
#[derive(Debug, Error)]
#[error("Stage {stage_index} ({kind}) failed: {inner}")]
pub struct PipelineError {
    pub stage_index: usize,
    pub kind: String,
    #[source]
    pub inner: ShellError,
}

impl PipelineError {
    pub fn new(stage_index: usize, kind: impl Into<String>, inner: ShellError) -> Self {
        Self {
            stage_index,
            kind: kind.into(),
            inner,
        }
    }
}
