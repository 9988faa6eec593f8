//! Pipeline data model: the discriminated-union stage type published to
//! clients as a JSON Schema for client-side validation (spec §3, §4.6).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_preview_chars() -> usize {
    3000
}

/// One stage of a pipeline. Tagged union on `type`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stage {
    Tool(ToolStage),
    Command(CommandStage),
    Preview(PreviewStage),
}

/// Calls a tool hosted by a remote workload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolStage {
    /// Tool name, must be non-empty.
    pub name: String,
    /// Workload name, must be non-empty.
    pub server: String,
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub for_each: bool,
}

/// Runs an allowlisted external utility in the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommandStage {
    /// Must be an exact allowlist token, never a shell fragment.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub for_each: bool,
    /// Positive seconds; falls back to the engine default (30s) if absent.
    pub timeout: Option<f64>,
}

/// Structure-aware truncation of the upstream, explicitly marked non-JSON.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PreviewStage {
    #[serde(default = "default_preview_chars")]
    pub chars: usize,
}

/// Validates the minimum-length / positivity constraints from spec §4.6.
/// The engine trusts validated input; this runs before a pipeline enters it.
pub fn validate(pipeline: &[Stage]) -> Result<(), crate::error::ShellError> {
    use crate::error::ShellError;

    if pipeline.is_empty() {
        return Err(ShellError::Validation(
            "pipeline must be a non-empty sequence of stages".to_string(),
        ));
    }

    for (idx, stage) in pipeline.iter().enumerate() {
        match stage {
            Stage::Tool(t) => {
                if t.name.trim().is_empty() {
                    return Err(ShellError::Validation(format!(
                        "stage {}: tool stage missing 'name'",
                        idx + 1
                    )));
                }
                if t.server.trim().is_empty() {
                    return Err(ShellError::Validation(format!(
                        "stage {}: tool stage missing 'server'",
                        idx + 1
                    )));
                }
            }
            Stage::Command(c) => {
                if c.command.trim().is_empty() {
                    return Err(ShellError::Validation(format!(
                        "stage {}: command stage missing 'command'",
                        idx + 1
                    )));
                }
                if let Some(t) = c.timeout {
                    if t <= 0.0 {
                        return Err(ShellError::Validation(format!(
                            "stage {}: 'timeout' must be positive",
                            idx + 1
                        )));
                    }
                }
            }
            Stage::Preview(p) => {
                if p.chars == 0 {
                    return Err(ShellError::Validation(format!(
                        "stage {}: 'chars' must be positive",
                        idx + 1
                    )));
                }
            }
        }
    }

    Ok(())
}
