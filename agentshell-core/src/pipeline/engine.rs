//! Pipeline Engine (spec §4.5): walks a validated [`Stage`] sequence,
//! threading one lazy upstream string through command / tool / preview
//! dispatch. Stages run strictly in order (spec §5 — no intra-pipeline
//! parallelism); only a stage's own internals (a sandboxed child, a batch
//! of RPCs) may run concurrently.

use serde_json::{Map, Value};

use crate::error::{PipelineError, ShellError};
use crate::pipeline::stage::{self, CommandStage, PreviewStage, Stage, ToolStage};
use crate::registry::RegistryClient;
use crate::sandbox::SandboxRunner;
use crate::session::RemoteSession;

const DEFAULT_COMMAND_TIMEOUT_SECS: f64 = 30.0;
const PREVIEW_HINT: &str = "[preview — structurally truncated, not valid JSON]";

/// Ties the Sandbox Runner and the Workload Registry Client together to
/// drive a full pipeline. One instance is cheap to build per RPC.
pub struct Engine {
    registry: RegistryClient,
    sandbox: SandboxRunner,
}

impl Engine {
    pub fn new(registry: RegistryClient, sandbox: SandboxRunner) -> Self {
        Self { registry, sandbox }
    }

    /// Runs `pipeline` starting from `initial_input`, returning the final
    /// stage's output or the first stage failure (spec §4.5 contract — no
    /// partial output on error).
    pub async fn execute(
        &self,
        pipeline: &[Stage],
        initial_input: &str,
    ) -> Result<String, PipelineError> {
        stage::validate(pipeline).map_err(|err| PipelineError::new(0, "validation", err))?;

        let mut upstream = initial_input.to_string();

        for (idx, item) in pipeline.iter().enumerate() {
            upstream = match item {
                Stage::Command(cmd) => self
                    .run_command_stage(cmd, &upstream)
                    .await
                    .map_err(|err| PipelineError::new(idx + 1, "command", err))?,
                Stage::Tool(tool) => self
                    .run_tool_stage(tool, &upstream)
                    .await
                    .map_err(|err| {
                        PipelineError::new(idx + 1, format!("tool {}/{}", tool.server, tool.name), err)
                    })?,
                Stage::Preview(preview) => run_preview_stage(preview, &upstream),
            };
        }

        Ok(upstream)
    }

    async fn run_command_stage(&self, cmd: &CommandStage, upstream: &str) -> Result<String, ShellError> {
        let timeout = std::time::Duration::from_secs_f64(
            cmd.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
        );

        if cmd.for_each {
            let mut out = String::new();
            for line in non_blank_lines(upstream) {
                let piece = self
                    .run_one_command(cmd, &format!("{line}\n"), timeout)
                    .await?;
                out.push_str(&piece);
            }
            Ok(out)
        } else {
            self.run_one_command(cmd, upstream, timeout).await
        }
    }

    async fn run_one_command(
        &self,
        cmd: &CommandStage,
        stdin: &str,
        timeout: std::time::Duration,
    ) -> Result<String, ShellError> {
        let output = self
            .sandbox
            .run(&cmd.command, &cmd.args, stdin.as_bytes(), Some(timeout))
            .await?;

        if !output.status.success() && output.stdout.is_empty() && !output.stderr.is_empty() {
            return Err(ShellError::CommandExitFailure {
                command: cmd.command.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_tool_stage(&self, tool: &ToolStage, upstream: &str) -> Result<String, ShellError> {
        let workload = self
            .registry
            .get_workload(&tool.server)
            .await
            .map_err(|err| ShellError::Discovery(err.to_string()))?
            .ok_or_else(|| crate::error::ToolDispatchError::WorkloadNotFound(tool.server.clone()))?;

        let session = RemoteSession::open(&workload).await?;

        let mut result = if tool.for_each {
            let args_list = build_for_each_args(upstream, &tool.args)?;
            let texts = session.batch_call(&tool.name, args_list).await?;
            texts.join("\n")
        } else {
            let args = merge_non_fan_out_args(upstream, &tool.args);
            session.call_tool(&tool.name, Value::Object(args)).await?
        };

        if !result.is_empty() && !result.ends_with('\n') {
            result.push('\n');
        }
        Ok(result)
    }
}

fn non_blank_lines(upstream: &str) -> impl Iterator<Item = &str> {
    upstream.trim().split('\n').filter(|line| !line.trim().is_empty())
}

/// Fan-out path (spec §4.5): every non-blank line must parse as a JSON
/// object; it is merged with the caller's `args` (caller wins).
fn build_for_each_args(
    upstream: &str,
    args: &std::collections::HashMap<String, Value>,
) -> Result<Vec<Value>, ShellError> {
    let mut out = Vec::new();
    for (idx, line) in non_blank_lines(upstream).enumerate() {
        let line_num = idx + 1;
        let parsed: Value = serde_json::from_str(line).map_err(|_| ShellError::ForEachJson {
            line: line_num,
            message: format!(
                "invalid JSON in for_each mode. Tools with for_each require JSONL input \
                 (one JSON object per line). Got: {}... Use a JSON filter to restructure, \
                 e.g. jq -c '.[] | {{url: .}}'",
                &line[..line.len().min(100)]
            ),
        })?;

        let Value::Object(mut merged) = parsed else {
            return Err(ShellError::ForEachJson {
                line: line_num,
                message: format!(
                    "expected a JSON object, got {}. Tools require parameter names — \
                     transform your data into objects, e.g. jq -c '{{param_name: .}}'",
                    value_kind(&parsed)
                ),
            });
        };
        for (key, value) in args {
            merged.insert(key.clone(), value.clone());
        }
        out.push(Value::Object(merged));
    }
    Ok(out)
}

/// Non-fan-out path (spec §4.5): object upstream merges with `args` (caller
/// wins); non-object upstream binds to `"input"` unless already present;
/// unparsable upstream binds the raw trimmed text to `"input"`, same rule.
fn merge_non_fan_out_args(
    upstream: &str,
    args: &std::collections::HashMap<String, Value>,
) -> Map<String, Value> {
    let mut merged: Map<String, Value> = args
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let trimmed = upstream.trim();
    if trimmed.is_empty() {
        return merged;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(parsed)) => {
            // `merged` already holds the caller's args; upstream only fills gaps.
            for (key, value) in parsed {
                merged.entry(key).or_insert(value);
            }
        }
        Ok(other) => {
            merged.entry("input".to_string()).or_insert(other);
        }
        Err(_) => {
            merged
                .entry("input".to_string())
                .or_insert_with(|| Value::String(trimmed.to_string()));
        }
    }

    merged
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Structure-aware truncation (spec §4.5): treats upstream as a sequence of
/// line records and stops at the last complete line that fits within
/// `chars`, rather than cutting mid-line. Falls back to a raw char window
/// only when a single line alone exceeds the budget, so the bound is still
/// honored.
fn run_preview_stage(preview: &PreviewStage, upstream: &str) -> String {
    let total_chars = upstream.chars().count();
    if total_chars <= preview.chars {
        return format!("{PREVIEW_HINT}\n{upstream}");
    }

    let mut truncated = String::new();
    let mut consumed = 0;
    for line in upstream.split_inclusive('\n') {
        let line_chars = line.chars().count();
        if consumed + line_chars > preview.chars {
            break;
        }
        truncated.push_str(line);
        consumed += line_chars;
    }

    if truncated.is_empty() {
        truncated = upstream.chars().take(preview.chars).collect();
        consumed = truncated.chars().count();
    }

    let omitted = total_chars - consumed;
    format!("{PREVIEW_HINT} ({omitted} more chars omitted)\n{truncated}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn non_fan_out_merge_prefers_caller_args_on_conflict() {
        let mut args = HashMap::new();
        args.insert("url".to_string(), Value::String("from-args".to_string()));
        let merged = merge_non_fan_out_args(r#"{"url":"from-upstream","extra":1}"#, &args);
        assert_eq!(merged.get("url"), Some(&Value::String("from-args".to_string())));
        assert_eq!(merged.get("extra"), Some(&Value::Number(1.into())));
    }

    #[test]
    fn non_fan_out_binds_non_object_json_to_input() {
        let args = HashMap::new();
        let merged = merge_non_fan_out_args("[1,2,3]", &args);
        assert_eq!(merged.get("input"), Some(&serde_json::json!([1, 2, 3])));
    }

    #[test]
    fn non_fan_out_binds_unparsable_text_to_input() {
        let args = HashMap::new();
        let merged = merge_non_fan_out_args("not json at all", &args);
        assert_eq!(
            merged.get("input"),
            Some(&Value::String("not json at all".to_string()))
        );
    }

    #[test]
    fn non_fan_out_respects_existing_input_key() {
        let mut args = HashMap::new();
        args.insert("input".to_string(), Value::String("explicit".to_string()));
        let merged = merge_non_fan_out_args("[1,2]", &args);
        assert_eq!(merged.get("input"), Some(&Value::String("explicit".to_string())));
    }

    #[test]
    fn for_each_rejects_non_object_line() {
        let args = HashMap::new();
        let err = build_for_each_args("[1,2]", &args).unwrap_err();
        assert!(matches!(err, ShellError::ForEachJson { line: 1, .. }));
    }

    #[test]
    fn for_each_skips_blank_lines_and_merges_each() {
        let mut args = HashMap::new();
        args.insert("tag".to_string(), Value::String("t".to_string()));
        let out = build_for_each_args("{\"a\":1}\n\n{\"a\":2}\n", &args).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["tag"], Value::String("t".to_string()));
        assert_eq!(out[1]["a"], Value::Number(2.into()));
    }

    #[test]
    fn preview_marks_content_as_not_json_and_truncates() {
        let preview = PreviewStage { chars: 5 };
        let out = run_preview_stage(&preview, "abcdefgh");
        assert!(out.contains(PREVIEW_HINT));
        assert!(out.ends_with("abcde"));
    }

    #[test]
    fn preview_stops_at_a_line_boundary_instead_of_mid_line() {
        let preview = PreviewStage { chars: 11 };
        let out = run_preview_stage(&preview, "first line\nsecond line\nthird\n");
        assert!(out.ends_with("first line\n"));
        assert!(!out.contains("second"));
    }

    #[test]
    fn preview_returns_full_content_unmarked_as_omitted_when_it_fits() {
        let preview = PreviewStage { chars: 100 };
        let out = run_preview_stage(&preview, "short");
        assert!(out.contains(PREVIEW_HINT));
        assert!(!out.contains("omitted"));
        assert!(out.ends_with("short"));
    }
}
