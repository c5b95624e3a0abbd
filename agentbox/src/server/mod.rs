//! Listener and transports.
//!
//! The reference transport is a WebSocket on a loopback HTTP listener;
//! stdio carries the same line-delimited frames for supervised setups.
//! Each connection gets one `Session` and one writer; the writer is the
//! only place `seq` is assigned, which keeps it strictly increasing.

pub mod session;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::sync::mpsc;

use agentbox_protocol::{events, Frame, MAX_FRAME_BYTES, TICK_INTERVAL_SECS};

use crate::config::{Config, Workspace};
use crate::tools::ToolContext;

use self::session::{Outbound, Session};

/// Daemon-wide shared state. Configuration and workspace are immutable
/// after startup; the client registry is behind a single lock that is
/// never held across a send.
pub struct DaemonState {
    pub config: Arc<Config>,
    pub ctx: Arc<ToolContext>,
    pub token: String,
    pub audit_dir: PathBuf,
    pub logs_dir: PathBuf,
    clients: Mutex<HashMap<u64, mpsc::UnboundedSender<Outbound>>>,
    next_session_id: AtomicU64,
}

impl DaemonState {
    pub fn new(
        config: Arc<Config>,
        workspace: Arc<Workspace>,
        token: String,
        audit_dir: PathBuf,
        logs_dir: PathBuf,
    ) -> Self {
        let ctx = Arc::new(ToolContext::new(workspace, &config));
        Self {
            config,
            ctx,
            token,
            audit_dir,
            logs_dir,
            clients: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn approval_timeout_ms(&self) -> u64 {
        self.config.approvals.approval_timeout_ms
    }

    fn register(&self, tx: mpsc::UnboundedSender<Outbound>) -> u64 {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().unwrap().insert(id, tx);
        id
    }

    fn unregister(&self, id: u64) {
        self.clients.lock().unwrap().remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Fan an event out to every connected session. The lock covers only
    /// the recipient snapshot; sends happen after it is released, so a
    /// slow peer can never deadlock the registry.
    pub fn broadcast(&self, event: &str, payload: serde_json::Value) {
        let targets: Vec<mpsc::UnboundedSender<Outbound>> =
            self.clients.lock().unwrap().values().cloned().collect();
        for tx in targets {
            let _ = tx.send(Outbound::Event {
                event: event.to_string(),
                payload: payload.clone(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP / WebSocket transport
// ---------------------------------------------------------------------------

/// Serve WebSocket sessions on an already-bound listener.
pub async fn serve_http(state: Arc<DaemonState>, listener: tokio::net::TcpListener) -> Result<()> {
    spawn_tick(state.clone());
    let addr = listener.local_addr().context("reading listener address")?;
    tracing::info!(
        %addr,
        workspace = %state.ctx.workspace.name,
        tier = %state.ctx.workspace.tier,
        "agentbox listening"
    );
    let app = Router::new().route("/ws", get(ws_upgrade)).with_state(state);
    axum::serve(listener, app).await.context("server error")
}

fn spawn_tick(state: Arc<DaemonState>) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(TICK_INTERVAL_SECS));
        // The first tick completes immediately; the keepalive starts one
        // interval in.
        interval.tick().await;
        loop {
            interval.tick().await;
            state.broadcast(
                events::TICK,
                json!({ "ts": chrono::Utc::now().to_rfc3339() }),
            );
        }
    });
}

async fn ws_upgrade(State(state): State<Arc<DaemonState>>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<DaemonState>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = state.register(tx.clone());
    let mut session = Session::new(id, state.clone(), tx);
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            out = rx.recv() => {
                match out {
                    Some(out) => {
                        if !write_outbound(&mut socket, out, &mut seq, session.authenticated).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => session.handle_text(&text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(session = id, %err, "socket error");
                        break;
                    }
                    Some(Ok(_)) => {} // binary and ping/pong frames are ignored
                }
            }
        }
    }

    state.unregister(id);
    session.finish();
}

/// Write one outbound item; returns false once the socket is done.
async fn write_outbound(
    socket: &mut WebSocket,
    out: Outbound,
    seq: &mut u64,
    authenticated: bool,
) -> bool {
    match out {
        Outbound::Response(frame) => socket
            .send(Message::Text(frame.to_json().into()))
            .await
            .is_ok(),
        Outbound::Event { event, payload } => {
            // Events are delivered to authenticated sessions only.
            if !authenticated {
                return true;
            }
            *seq += 1;
            let frame = Frame::Event {
                event,
                payload,
                seq: *seq,
            };
            socket
                .send(Message::Text(frame.to_json().into()))
                .await
                .is_ok()
        }
        Outbound::CloseWith { frame, code } => {
            let _ = socket.send(Message::Text(frame.to_json().into())).await;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: "authentication failed".into(),
                })))
                .await;
            false
        }
    }
}

// ---------------------------------------------------------------------------
// stdio transport
// ---------------------------------------------------------------------------

/// Serve one session over stdin/stdout, one frame per line.
pub async fn serve_stdio(state: Arc<DaemonState>) -> Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = state.register(tx.clone());
    let mut session = Session::new(id, state.clone(), tx);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut seq: u64 = 0;

    tracing::info!(
        workspace = %state.ctx.workspace.name,
        tier = %state.ctx.workspace.tier,
        "agentbox serving on stdio"
    );

    loop {
        tokio::select! {
            out = rx.recv() => {
                let Some(out) = out else { break };
                let (text, close) = match out {
                    Outbound::Response(frame) => (Some(frame.to_json()), false),
                    Outbound::Event { event, payload } => {
                        if session.authenticated {
                            seq += 1;
                            (Some(Frame::Event { event, payload, seq }.to_json()), false)
                        } else {
                            (None, false)
                        }
                    }
                    Outbound::CloseWith { frame, .. } => (Some(frame.to_json()), true),
                };
                if let Some(text) = text {
                    if stdout.write_all(text.as_bytes()).await.is_err()
                        || stdout.write_all(b"\n").await.is_err()
                        || stdout.flush().await.is_err()
                    {
                        break;
                    }
                }
                if close {
                    break;
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if !line.trim().is_empty() => session.handle_text(&line),
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => break,
                }
            }
        }
    }

    state.unregister(id);
    session.finish();
    Ok(())
}
