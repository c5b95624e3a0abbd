//! Subprocess supervisor behind `cmd.run`.
//!
//! Commands arrive as a shell-like string, are tokenised, validated by the
//! command engine, and spawned directly (no shell). Wall time and output
//! are bounded; termination is two-stage: SIGTERM, a 5 s grace period,
//! then SIGKILL.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use agentbox_protocol::ErrorCode;

use crate::error::{ToolError, ToolResult};
use crate::guard::{tokenize, CommandValidator, PathGuard};

/// Hard ceiling on wall time; callers may only lower it.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Per-stream capture cap.
pub const MAX_STREAM_BYTES: usize = 1024 * 1024;

pub const TRUNCATION_SENTINEL: &str = "\n[OUTPUT TRUNCATED]";

/// Grace between soft and hard termination.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Reported when a timed-out child left no exit code of its own.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmdRunParams {
    /// Shell-like command string; tokenised, never passed to a shell.
    pub command: String,
    /// Extra arguments appended after the tokenised command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory, workspace-relative; defaults to the root.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Environment entries layered over the daemon's own environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Wall-clock limit in seconds; clamped to the 300 s ceiling.
    #[serde(default)]
    pub timeout_s: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CmdRunResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

/// Steps 1-4 of the pipeline: tokenise, merge args, clear the command
/// engine, resolve the working directory. Shared with the dispatcher,
/// which runs it before the approval gate so a command the engine would
/// deny never reaches the approval table.
pub(crate) fn preflight(
    params: &CmdRunParams,
    validator: &CommandValidator,
    guard: &PathGuard,
) -> ToolResult<(Vec<String>, std::path::PathBuf)> {
    let mut tokens = tokenize(&params.command)?;
    tokens.extend(params.args.iter().cloned());
    let (program, argv) = tokens.split_first().ok_or_else(|| {
        ToolError::new(ErrorCode::CommandDenied, "empty command string")
    })?;
    validator.validate(program, argv).into_result()?;

    let cwd = match &params.cwd {
        Some(dir) => guard.resolve(dir)?.absolute,
        None => guard.root().to_path_buf(),
    };
    Ok((tokens, cwd))
}

/// Validate and run one command to completion.
pub async fn run(
    params: &CmdRunParams,
    validator: &CommandValidator,
    guard: &PathGuard,
) -> ToolResult<CmdRunResult> {
    let (tokens, cwd) = preflight(params, validator, guard)?;
    let (program, argv) = tokens
        .split_first()
        .ok_or_else(|| ToolError::internal("empty command after preflight"))?;

    let timeout = Duration::from_secs(
        params
            .timeout_s
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(1, DEFAULT_TIMEOUT_SECS),
    );

    let mut cmd = Command::new(program);
    cmd.args(argv)
        .current_dir(&cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Caller env augments the inherited environment, never replaces it.
    for (key, value) in &params.env {
        cmd.env(key, value);
    }

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|err| {
        ToolError::new(
            ErrorCode::CommandFailed,
            format!("failed to spawn {program}: {err}"),
        )
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ToolError::internal("child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ToolError::internal("child stderr not captured"))?;
    let stdout_task = tokio::spawn(drain_capped(stdout));
    let stderr_task = tokio::spawn(drain_capped(stderr));

    let mut timed_out = false;
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(waited) => waited
            .map_err(|err| ToolError::new(ErrorCode::CommandFailed, err.to_string()))?,
        Err(_) => {
            timed_out = true;
            soft_kill(&child);
            match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                Ok(waited) => waited
                    .map_err(|err| ToolError::new(ErrorCode::CommandFailed, err.to_string()))?,
                Err(_) => {
                    let _ = child.start_kill();
                    child
                        .wait()
                        .await
                        .map_err(|err| ToolError::new(ErrorCode::CommandFailed, err.to_string()))?
                }
            }
        }
    };

    let (stdout_bytes, _) = stdout_task
        .await
        .map_err(|err| ToolError::internal(format!("stdout drain task: {err}")))?;
    let (stderr_bytes, _) = stderr_task
        .await
        .map_err(|err| ToolError::internal(format!("stderr drain task: {err}")))?;

    let exit_code = status
        .code()
        .unwrap_or(if timed_out { TIMEOUT_EXIT_CODE } else { -1 });

    Ok(CmdRunResult {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        duration_ms: start.elapsed().as_millis() as u64,
        timed_out,
    })
}

/// Soft termination: SIGTERM to the child, giving it a chance to exit
/// cleanly before the hard kill.
fn soft_kill(child: &Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

/// Drain a stream into a bounded buffer. After the cap is hit the sentinel
/// is appended once and further bytes are discarded, but the stream keeps
/// being consumed so the child never blocks on a full pipe.
async fn drain_capped<R: AsyncRead + Unpin>(mut reader: R) -> (Vec<u8>, bool) {
    let mut buf: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if truncated {
                    continue;
                }
                let remaining = MAX_STREAM_BYTES - buf.len();
                if n <= remaining {
                    buf.extend_from_slice(&chunk[..n]);
                } else {
                    buf.extend_from_slice(&chunk[..remaining]);
                    buf.extend_from_slice(TRUNCATION_SENTINEL.as_bytes());
                    truncated = true;
                }
            }
        }
    }
    (buf, truncated)
}
