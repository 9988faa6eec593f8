//! Sandbox Runner (spec §4.4): executes an allowlisted command with no
//! shell interpretation, inside a `bwrap` namespace when available, falling
//! back to direct execution when already inside a container (spec's "host
//! provides isolation" clause) or when `bwrap` isn't installed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_process::{Child, Command as AsyncCommand, ExitStatus, Stdio};
use futures_lite::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::{Sleep, sleep};

use crate::error::ShellError;

/// Commands the sandbox is willing to run. A `CommandStage::command` that
/// isn't exactly one of these is rejected before anything is spawned
/// (spec §3 invariant 4 — never a shell fragment).
pub const ALLOWED_COMMANDS: &[&str] = &[
    "grep", "jq", "sort", "uniq", "cut", "sed", "awk", "wc", "head", "tail", "tr", "echo",
    "printf", "date", "bc", "paste", "shuf", "join",
];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const OUTPUT_CAP: usize = 4 * 1024 * 1024;

/// Variables preserved from the caller's environment into the sandboxed
/// child; everything else is dropped.
const PRESERVED_ENV_VARS: &[&str] = &["PATH", "HOME", "LANG", "LC_ALL", "TZ", "TMPDIR"];

pub fn validate_command(command: &str) -> Result<(), ShellError> {
    if ALLOWED_COMMANDS.contains(&command) {
        Ok(())
    } else {
        Err(ShellError::CommandNotAllowed {
            command: command.to_string(),
            allowed: ALLOWED_COMMANDS.join(", "),
        })
    }
}

/// Result of a single sandboxed invocation.
pub struct SandboxOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: ExitStatus,
}

pub struct SandboxRunner {
    bwrap_path: Option<PathBuf>,
    in_container: bool,
}

impl SandboxRunner {
    /// Detects whether `bwrap` is installed and whether we're already
    /// inside a container (in which case the host already provides
    /// isolation, per spec §4.4, and we skip double-sandboxing).
    pub fn detect() -> Self {
        Self {
            bwrap_path: which::which("bwrap").ok(),
            in_container: std::path::Path::new("/.dockerenv").exists()
                || std::env::var("AGENTSHELL_IN_CONTAINER").as_deref() == Ok("1"),
        }
    }

    /// Runs `command args` with `stdin` on it, honoring `timeout`. A
    /// non-zero exit is not itself an error (spec §4.4) unless stdout is
    /// empty and stderr is not, in which case the caller should surface
    /// stderr as the failure message.
    pub async fn run(
        &self,
        command: &str,
        args: &[String],
        stdin: &[u8],
        timeout: Option<Duration>,
    ) -> Result<SandboxOutput, ShellError> {
        validate_command(command)?;
        self.execute(command, args, stdin, timeout).await
    }

    /// Same as [`Self::run`] but skips the allowlist check. Only used by
    /// tests, which need to drive the timeout/kill path with `sleep` — a
    /// command the production allowlist deliberately excludes.
    #[cfg(test)]
    async fn run_unchecked(
        &self,
        command: &str,
        args: &[String],
        stdin: &[u8],
        timeout: Option<Duration>,
    ) -> Result<SandboxOutput, ShellError> {
        self.execute(command, args, stdin, timeout).await
    }

    async fn execute(
        &self,
        command: &str,
        args: &[String],
        stdin: &[u8],
        timeout: Option<Duration>,
    ) -> Result<SandboxOutput, ShellError> {
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);

        let (program, full_args) = self.build_invocation(command, args);
        let env = sanitized_env();

        let mut cmd = AsyncCommand::new(&program);
        cmd.args(&full_args);
        cmd.env_clear();
        cmd.envs(&env);
        cmd.current_dir(std::env::temp_dir());
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|err| ShellError::CommandExitFailure {
                command: command.to_string(),
                stderr: format!("failed to spawn: {err}"),
            })?;

        if let Some(mut stdin_handle) = child.stdin.take() {
            let input = stdin.to_vec();
            let _ = stdin_handle.write_all(&input).await;
            let _ = stdin_handle.close().await;
        }

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();
        let shared_child = Arc::new(Mutex::new(child));

        let mut stdout_future = Box::pin(read_capped(stdout_handle));
        let mut stderr_future = Box::pin(read_capped(stderr_handle));
        let mut wait_future = Box::pin(wait_for_status(shared_child.clone()));
        let mut timeout_future: Pin<Box<Sleep>> = Box::pin(sleep(timeout));

        let mut status: Option<ExitStatus> = None;
        let mut stdout: Option<Vec<u8>> = None;
        let mut stderr: Option<Vec<u8>> = None;
        let mut timed_out = false;

        loop {
            if status.is_some() && stdout.is_some() && stderr.is_some() {
                break;
            }
            tokio::select! {
                res = &mut wait_future, if status.is_none() => status = Some(res),
                res = &mut stdout_future, if stdout.is_none() => stdout = Some(res),
                res = &mut stderr_future, if stderr.is_none() => stderr = Some(res),
                _ = &mut timeout_future, if !timed_out => {
                    timed_out = true;
                    let mut guard = shared_child.lock().await;
                    let _ = guard.kill();
                    drop(guard);
                }
            }
        }

        let _ = start.elapsed();

        if timed_out {
            return Err(ShellError::CommandTimeout {
                command: command.to_string(),
                timeout,
            });
        }

        Ok(SandboxOutput {
            stdout: stdout.unwrap_or_default(),
            stderr: stderr.unwrap_or_default(),
            status: status.expect("status set once loop exits"),
        })
    }

    /// Builds the program + full argument list, wrapping with `bwrap` flags
    /// unless the host already isolates us or `bwrap` isn't installed.
    fn build_invocation(&self, command: &str, args: &[String]) -> (String, Vec<String>) {
        match (&self.bwrap_path, self.in_container) {
            (Some(bwrap), false) => {
                let mut bwrap_args: Vec<String> = vec![
                    "--ro-bind".into(),
                    "/usr".into(),
                    "/usr".into(),
                    "--ro-bind".into(),
                    "/bin".into(),
                    "/bin".into(),
                    "--ro-bind".into(),
                    "/lib".into(),
                    "/lib".into(),
                ];
                if std::path::Path::new("/lib64").exists() {
                    bwrap_args.extend(["--ro-bind".into(), "/lib64".into(), "/lib64".into()]);
                }
                bwrap_args.extend([
                    "--proc".into(),
                    "/proc".into(),
                    "--dev".into(),
                    "/dev".into(),
                    "--tmpfs".into(),
                    "/tmp".into(),
                    "--chdir".into(),
                    "/tmp".into(),
                    "--unshare-net".into(),
                    "--unshare-pid".into(),
                    "--die-with-parent".into(),
                    "--new-session".into(),
                    "--".into(),
                    command.to_string(),
                ]);
                bwrap_args.extend(args.iter().cloned());
                (bwrap.display().to_string(), bwrap_args)
            }
            _ => (command.to_string(), args.to_vec()),
        }
    }
}

fn sanitized_env() -> HashMap<String, String> {
    let mut env = HashMap::new();
    for key in PRESERVED_ENV_VARS {
        if let Ok(value) = std::env::var(key) {
            env.insert((*key).to_string(), value);
        }
    }
    env
}

async fn read_capped<R>(reader: Option<R>) -> Vec<u8>
where
    R: futures_lite::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    let mut output = Vec::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = match reader.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let remaining = OUTPUT_CAP.saturating_sub(output.len());
        if remaining > 0 {
            let to_copy = remaining.min(read);
            output.extend_from_slice(&buffer[..to_copy]);
        }
    }
    output
}

async fn wait_for_status(child: Arc<Mutex<Child>>) -> ExitStatus {
    // `status()` returns an owned future that doesn't borrow the child, so
    // the lock is held only long enough to obtain it — never across the
    // await, which would otherwise starve a concurrent `kill()` on timeout.
    let status_future = {
        let mut guard = child.lock().await;
        guard.status()
    };
    status_future.await.expect("waiting on spawned child")
}
