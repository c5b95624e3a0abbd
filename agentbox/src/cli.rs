//! CLI-side commands: wire calls against a running daemon, the local tool
//! short-circuit, and the `check` preflight. None of these start the
//! server.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use agentbox_protocol::{methods, parse_frame, Frame, WireError, PROTOCOL_VERSION};

use crate::approval::ApprovalTable;
use crate::config::{Config, Workspace};
use crate::tools::ToolContext;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct ClientOpts {
    pub url: String,
    pub token: String,
}

async fn open(opts: &ClientOpts) -> Result<WsStream> {
    let (stream, _) = tokio_tungstenite::connect_async(opts.url.as_str())
        .await
        .with_context(|| format!("connecting to {}", opts.url))?;
    Ok(stream)
}

/// Send one request and read frames until its response arrives. Events
/// passing by are surfaced on stderr.
async fn request(stream: &mut WsStream, id: &str, method: &str, params: Value) -> Result<Frame> {
    let frame = Frame::Req {
        id: json!(id),
        method: method.to_string(),
        params: Some(params),
    };
    stream
        .send(Message::Text(frame.to_json().into()))
        .await
        .context("sending request")?;

    while let Some(msg) = stream.next().await {
        let msg = msg.context("reading from server")?;
        let Message::Text(text) = msg else { continue };
        match parse_frame(&text).context("parsing server frame")? {
            res @ Frame::Res { .. } => {
                if matches!(&res, Frame::Res { id: rid, .. } if *rid == json!(id)) {
                    return Ok(res);
                }
            }
            Frame::Event {
                event,
                payload,
                seq,
            } => eprintln!("event #{seq} {event}: {payload}"),
            Frame::Req { .. } => {}
        }
    }
    bail!("connection closed before the response arrived")
}

/// Authenticate and verify the protocol version. Returns the hello payload.
async fn connect(stream: &mut WsStream, token: &str) -> Result<Value> {
    let params = json!({
        "token": token,
        "client": { "name": "agentbox-cli", "version": env!("CARGO_PKG_VERSION") },
    });
    match request(stream, "connect-1", methods::CONNECT, params).await? {
        Frame::Res {
            ok: true,
            payload: Some(hello),
            ..
        } => {
            let protocol = hello["protocol"].as_u64().unwrap_or(0);
            if protocol != PROTOCOL_VERSION as u64 {
                bail!("protocol mismatch: server speaks {protocol}, expected {PROTOCOL_VERSION}");
            }
            Ok(hello)
        }
        Frame::Res {
            error: Some(WireError { code, message, .. }),
            ..
        } => bail!("connect failed: {code}: {message}"),
        other => bail!("unexpected connect reply: {other:?}"),
    }
}

pub async fn ping(opts: &ClientOpts) -> Result<()> {
    let mut stream = open(opts).await?;
    let hello = connect(&mut stream, &opts.token).await?;
    match request(&mut stream, "ping-1", methods::PING, json!({})).await? {
        Frame::Res { ok: true, .. } => {
            println!(
                "pong from {} (workspace {}, tier {})",
                hello["server"]["name"].as_str().unwrap_or("?"),
                hello["workspace"]["name"].as_str().unwrap_or("?"),
                hello["workspace"]["tier"].as_str().unwrap_or("?"),
            );
            Ok(())
        }
        Frame::Res {
            error: Some(WireError { code, message, .. }),
            ..
        } => bail!("ping failed: {code}: {message}"),
        other => bail!("unexpected ping reply: {other:?}"),
    }
}

pub async fn call(
    opts: &ClientOpts,
    tool: &str,
    args_json: &str,
    approval_id: Option<&str>,
) -> Result<()> {
    let args: Value = serde_json::from_str(args_json).context("parsing --args as JSON")?;
    let mut stream = open(opts).await?;
    connect(&mut stream, &opts.token).await?;

    let mut params = json!({ "tool": tool, "args": args });
    if let Some(id) = approval_id {
        params["approvalId"] = json!(id);
    }
    match request(&mut stream, "call-1", methods::TOOLS_CALL, params).await? {
        Frame::Res {
            ok: true,
            payload: Some(payload),
            ..
        } => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        Frame::Res {
            error: Some(error), ..
        } => {
            if let Some(details) = &error.details {
                eprintln!("details: {details}");
            }
            bail!("{}: {}", error.code, error.message)
        }
        other => bail!("unexpected reply: {other:?}"),
    }
}

/// Run a tool locally, without the daemon. The operator at the keyboard is
/// the approval channel, so the gates are considered satisfied.
pub async fn local_call(
    config: &Config,
    workspace: Option<&str>,
    tool: &str,
    args_json: &str,
) -> Result<()> {
    let args: Value = serde_json::from_str(args_json).context("parsing args as JSON")?;
    let ws_cfg = config.select_workspace(workspace)?;
    let workspace = Arc::new(Workspace::from_config(ws_cfg)?);

    let mut local = config.clone();
    local.approvals.require_write_approval = false;
    local.approvals.require_exec_approval = false;
    let ctx = ToolContext::new(workspace, &local);
    let approvals = ApprovalTable::new(local.approvals.approval_timeout_ms);

    match ctx.dispatch(tool, args, None, &approvals).await {
        Ok(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        Err(err) => bail!("{}: {}", err.code, err.message),
    }
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

struct Check {
    label: &'static str,
    ok: bool,
    detail: String,
    fix: Option<String>,
}

impl Check {
    fn pass(label: &'static str, detail: impl Into<String>) -> Self {
        Self {
            label,
            ok: true,
            detail: detail.into(),
            fix: None,
        }
    }

    fn fail(label: &'static str, detail: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            label,
            ok: false,
            detail: detail.into(),
            fix: Some(fix.into()),
        }
    }
}

/// Preflight for `serve`: workspaces resolve, git is present, the token
/// file is private. Exits non-zero when anything fails.
pub fn run_check(config: &Config, token_path: &Path) -> Result<()> {
    println!("Checking agentbox prerequisites...\n");
    let mut checks: Vec<Check> = Vec::new();

    if config.workspaces.is_empty() {
        checks.push(Check::fail(
            "workspaces",
            "none configured",
            "add a workspaces entry to config.yaml",
        ));
    }
    for ws in &config.workspaces {
        match Workspace::from_config(ws) {
            Ok(resolved) => checks.push(Check::pass(
                "workspace",
                format!("{} -> {} ({})", ws.name, resolved.root.display(), ws.tier),
            )),
            Err(err) => checks.push(Check::fail(
                "workspace",
                format!("{}: {err:#}", ws.name),
                "fix the path in config.yaml",
            )),
        }
    }

    match std::process::Command::new("git").arg("--version").output() {
        Ok(out) if out.status.success() => checks.push(Check::pass(
            "git",
            String::from_utf8_lossy(&out.stdout).trim().to_string(),
        )),
        _ => checks.push(Check::fail(
            "git",
            "git binary not found on PATH",
            "install git; vcs.* tools and fs.apply_patch depend on it",
        )),
    }

    if token_path.exists() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(token_path)?.permissions().mode() & 0o777;
            if mode == 0o600 {
                checks.push(Check::pass("token", format!("{} (0600)", token_path.display())));
            } else {
                checks.push(Check::fail(
                    "token",
                    format!("{} has mode {mode:o}", token_path.display()),
                    format!("chmod 600 {}", token_path.display()),
                ));
            }
        }
        #[cfg(not(unix))]
        checks.push(Check::pass("token", token_path.display().to_string()));
    } else {
        checks.push(Check::pass(
            "token",
            "not yet generated (serve will create one)",
        ));
    }

    let all_pass = checks.iter().all(|c| c.ok);
    for c in &checks {
        let icon = if c.ok { "\u{2713}" } else { "\u{2717}" };
        println!("  {} {} ({})", icon, c.label, c.detail);
        if let Some(fix) = &c.fix {
            println!("    Fix: {fix}");
        }
    }
    println!();

    if all_pass {
        println!("All checks passed.");
        Ok(())
    } else {
        let failed = checks.iter().filter(|c| !c.ok).count();
        bail!("{failed} check(s) failed")
    }
}
