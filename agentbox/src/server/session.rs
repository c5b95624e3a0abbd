//! Per-connection session state machine.
//!
//! The transport (WebSocket or stdio) feeds text frames in and drains
//! `Outbound` items. Everything in between, from authentication to audit
//! recording, happens here, which keeps the whole protocol testable
//! without a socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use agentbox_protocol::{
    events, methods, parse_frame, ApprovalResolveParams, ConnectParams, ErrorCode, Features,
    Frame, Hello, ServerInfo, ToolCallParams, ToolEvent, ToolPhase, WireError, WorkspaceInfo,
    AUTH_FAILED_CLOSE_CODE, MAX_FRAME_BYTES, PROTOCOL_VERSION,
};

use crate::approval::ApprovalTable;
use crate::audit::{AuditLog, AuditType};
use crate::server::DaemonState;
use crate::tools;

/// What the session hands back to the transport writer.
#[derive(Debug)]
pub enum Outbound {
    /// A complete response frame.
    Response(Frame),
    /// An event; the writer assigns `seq` just before the send.
    Event { event: String, payload: Value },
    /// Send the frame, then close the connection with the given code.
    CloseWith { frame: Frame, code: u16 },
}

/// Per-session mutable run state: audit buffer, counters, pending
/// approvals. Bound to exactly one workspace for its lifetime.
pub struct RunContext {
    pub run_id: String,
    pub audit: AuditLog,
    pub approvals: ApprovalTable,
    pub tool_calls: AtomicU64,
}

impl RunContext {
    pub fn new(approval_timeout_ms: u64) -> Self {
        let run_id = Uuid::new_v4().to_string();
        Self {
            audit: AuditLog::new(run_id.clone()),
            approvals: ApprovalTable::new(approval_timeout_ms),
            run_id,
            tool_calls: AtomicU64::new(0),
        }
    }
}

pub struct Session {
    pub id: u64,
    state: Arc<DaemonState>,
    pub run: Arc<RunContext>,
    tx: mpsc::UnboundedSender<Outbound>,
    /// False→true exactly once, via `connect`; never reverts.
    pub authenticated: bool,
    pub client_name: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// In-flight tool-call tasks, aborted on disconnect.
    tasks: Vec<tokio::task::AbortHandle>,
}

impl Session {
    pub fn new(id: u64, state: Arc<DaemonState>, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        let run = Arc::new(RunContext::new(state.approval_timeout_ms()));
        tracing::debug!(session = id, run_id = %run.run_id, "session opened");
        Self {
            id,
            state,
            run,
            tx,
            authenticated: false,
            client_name: None,
            connected_at: Utc::now(),
            last_activity: Utc::now(),
            tasks: Vec::new(),
        }
    }

    /// Process one inbound text frame.
    pub fn handle_text(&mut self, text: &str) {
        self.last_activity = Utc::now();

        if text.len() > MAX_FRAME_BYTES {
            self.reply_err(
                Value::Null,
                WireError::new(
                    ErrorCode::PayloadTooLarge,
                    format!("frame exceeds {MAX_FRAME_BYTES} bytes"),
                ),
            );
            return;
        }
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(err) => {
                self.reply_err(
                    Value::Null,
                    WireError::new(ErrorCode::ParseError, format!("invalid frame: {err}")),
                );
                return;
            }
        };
        let (id, method, params) = match frame {
            Frame::Req { id, method, params } => (id, method, params),
            _ => {
                self.reply_err(
                    Value::Null,
                    WireError::new(ErrorCode::InvalidRequest, "only req frames are accepted"),
                );
                return;
            }
        };

        if method == methods::CONNECT {
            self.handle_connect(id, params);
            return;
        }
        if !self.authenticated {
            self.run.audit.record(
                AuditType::Error,
                None,
                None,
                None,
                None,
                Some(format!("unauthenticated call to {method}")),
            );
            self.reply_err(
                id,
                WireError::new(ErrorCode::Unauthorized, "authenticate with connect first"),
            );
            return;
        }

        match method.as_str() {
            methods::TOOLS_LIST => {
                let tools = tools::visible_at(self.state.ctx.workspace.tier);
                self.reply_ok(id, json!({ "tools": tools }));
            }
            methods::TOOLS_CALL => self.handle_tools_call(id, params),
            methods::PING => self.reply_ok(id, json!({ "pong": true })),
            methods::APPROVALS_LIST => {
                self.reply_ok(id, json!({ "approvals": self.run.approvals.list() }));
            }
            methods::APPROVALS_RESOLVE => self.handle_approvals_resolve(id, params),
            other => self.reply_err(
                id,
                WireError::new(ErrorCode::MethodNotFound, format!("unknown method: {other}")),
            ),
        }
    }

    fn handle_connect(&mut self, id: Value, params: Option<Value>) {
        if self.authenticated {
            self.reply_err(
                id,
                WireError::new(ErrorCode::InvalidRequest, "session is already authenticated"),
            );
            return;
        }
        let params: ConnectParams = match params.and_then(|p| serde_json::from_value(p).ok()) {
            Some(p) => p,
            None => {
                self.reply_err(
                    id,
                    WireError::new(ErrorCode::InvalidRequest, "connect requires a token"),
                );
                return;
            }
        };

        if !crate::token::verify(&self.state.token, &params.token) {
            self.run.audit.record(
                AuditType::Error,
                None,
                None,
                None,
                None,
                Some("authentication failed".into()),
            );
            tracing::warn!(session = self.id, "authentication failed");
            let frame = Frame::err(id, WireError::new(ErrorCode::AuthFailed, "invalid token"));
            let _ = self.tx.send(Outbound::CloseWith {
                frame,
                code: AUTH_FAILED_CLOSE_CODE,
            });
            return;
        }

        self.authenticated = true;
        self.client_name = params.client.as_ref().map(|c| c.name.clone());
        let workspace = &self.state.ctx.workspace;
        tracing::info!(
            session = self.id,
            run_id = %self.run.run_id,
            client = self.client_name.as_deref().unwrap_or("-"),
            workspace = %workspace.name,
            "client authenticated"
        );

        let hello = Hello {
            protocol: PROTOCOL_VERSION,
            server: ServerInfo {
                name: "agentbox".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            workspace: WorkspaceInfo {
                name: workspace.name.clone(),
                root: workspace.root.display().to_string(),
                tier: workspace.tier,
            },
            tools: tools::visible_at(workspace.tier),
            features: Features {
                methods: methods::ALL.iter().map(|m| m.to_string()).collect(),
                events: events::ALL.iter().map(|e| e.to_string()).collect(),
            },
        };
        match serde_json::to_value(&hello) {
            Ok(payload) => self.reply_ok(id, payload),
            Err(err) => self.reply_err(
                id,
                WireError::new(ErrorCode::InternalError, format!("hello payload: {err}")),
            ),
        }
    }

    fn handle_tools_call(&mut self, id: Value, params: Option<Value>) {
        let params: ToolCallParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(p)) => p,
            _ => {
                self.reply_err(
                    id,
                    WireError::new(
                        ErrorCode::InvalidRequest,
                        "tools.call requires {tool, args?}",
                    ),
                );
                return;
            }
        };

        let state = self.state.clone();
        let run = self.run.clone();
        let tx = self.tx.clone();
        // Requests may overlap within one session; each call runs in its
        // own task and the writer preserves per-call event ordering.
        let handle = tokio::spawn(async move {
            let tool = params.tool.clone();
            let args_audit = params.args.clone();
            let tool_call_id = Uuid::new_v4().to_string();

            let start = ToolEvent {
                phase: ToolPhase::Start,
                tool_call_id: tool_call_id.clone(),
                tool: tool.clone(),
                ok: None,
                error: None,
                duration_ms: None,
            };
            send_event(&tx, events::TOOL, &start);

            let started = std::time::Instant::now();
            let result = state
                .ctx
                .dispatch(
                    &tool,
                    params.args,
                    params.approval_id.as_deref(),
                    &run.approvals,
                )
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;
            run.tool_calls.fetch_add(1, Ordering::Relaxed);

            match result {
                Ok(payload) => {
                    run.audit.record(
                        audit_type_for(&tool),
                        Some(&tool),
                        Some(&args_audit),
                        Some(payload.clone()),
                        Some(duration_ms),
                        None,
                    );
                    let done = ToolEvent {
                        phase: ToolPhase::Result,
                        tool_call_id,
                        tool,
                        ok: Some(true),
                        error: None,
                        duration_ms: Some(duration_ms),
                    };
                    send_event(&tx, events::TOOL, &done);
                    let _ = tx.send(Outbound::Response(Frame::ok(id, payload)));
                }
                Err(err) => {
                    let wire = err.to_wire();
                    if wire.code == ErrorCode::ApprovalRequired {
                        if let Some(details) = &wire.details {
                            if details["state"] == "created" {
                                let _ = tx.send(Outbound::Event {
                                    event: events::APPROVAL_REQUESTED.to_string(),
                                    payload: details.clone(),
                                });
                                run.audit.record(
                                    AuditType::Approval,
                                    Some(&tool),
                                    Some(&args_audit),
                                    Some(details.clone()),
                                    None,
                                    None,
                                );
                            }
                        }
                    }
                    run.audit.record(
                        AuditType::Error,
                        Some(&tool),
                        Some(&args_audit),
                        None,
                        Some(duration_ms),
                        Some(format!("{}: {}", wire.code, wire.message)),
                    );
                    let done = ToolEvent {
                        phase: ToolPhase::Result,
                        tool_call_id,
                        tool,
                        ok: Some(false),
                        error: Some(wire.clone()),
                        duration_ms: Some(duration_ms),
                    };
                    send_event(&tx, events::TOOL, &done);
                    let _ = tx.send(Outbound::Response(Frame::err(id, wire)));
                }
            }
        });
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(handle.abort_handle());
    }

    fn handle_approvals_resolve(&self, id: Value, params: Option<Value>) {
        let params: ApprovalResolveParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(p)) => p,
            _ => {
                self.reply_err(
                    id,
                    WireError::new(
                        ErrorCode::InvalidRequest,
                        "approvals.resolve requires {approvalId, approve}",
                    ),
                );
                return;
            }
        };

        match self.run.approvals.resolve(&params.approval_id, params.approve) {
            Some(record) => {
                self.run.audit.record(
                    AuditType::Approval,
                    None,
                    Some(&json!({
                        "approvalId": record.id,
                        "description": record.description,
                    })),
                    Some(json!({ "approved": params.approve })),
                    None,
                    None,
                );
                let _ = self.tx.send(Outbound::Event {
                    event: events::APPROVAL_RESOLVED.to_string(),
                    payload: json!({
                        "approvalId": record.id,
                        "approved": params.approve,
                        "kind": record.kind,
                        "description": record.description,
                    }),
                });
                self.reply_ok(
                    id,
                    json!({ "approvalId": record.id, "approved": params.approve }),
                );
            }
            None => self.reply_err(
                id,
                WireError::new(ErrorCode::ApprovalTimeout, "unknown or expired approval")
                    .with_details(json!({ "approvalId": params.approval_id })),
            ),
        }
    }

    /// Cancel in-flight work and flush the run's audit buffer; called when
    /// the connection ends. Aborted subprocesses die via `kill_on_drop`.
    pub fn finish(&self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Err(err) = self
            .run
            .audit
            .flush(&self.state.audit_dir, &self.state.logs_dir)
        {
            tracing::warn!(run_id = %self.run.run_id, %err, "audit flush failed");
        }
        tracing::debug!(
            session = self.id,
            run_id = %self.run.run_id,
            tool_calls = self.run.tool_calls.load(Ordering::Relaxed),
            "session closed"
        );
    }

    fn reply_ok(&self, id: Value, payload: Value) {
        let _ = self.tx.send(Outbound::Response(Frame::ok(id, payload)));
    }

    fn reply_err(&self, id: Value, error: WireError) {
        let _ = self.tx.send(Outbound::Response(Frame::err(id, error)));
    }
}

fn send_event(tx: &mpsc::UnboundedSender<Outbound>, event: &str, payload: &ToolEvent) {
    if let Ok(payload) = serde_json::to_value(payload) {
        let _ = tx.send(Outbound::Event {
            event: event.to_string(),
            payload,
        });
    }
}

fn audit_type_for(tool: &str) -> AuditType {
    match tool {
        "cmd.run" => AuditType::Command,
        "fs.apply_patch" => AuditType::Patch,
        _ => AuditType::ToolCall,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbox_protocol::Tier;
    use std::time::Duration;

    struct Fixture {
        session: Session,
        rx: mpsc::UnboundedReceiver<Outbound>,
        token: String,
        _dir: tempfile::TempDir,
    }

    fn fixture(tier: Tier) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi there\n").unwrap();
        let mut config = crate::config::Config::default();
        config.commands.allow = vec![".*".into()];
        let workspace = Arc::new(crate::config::Workspace {
            name: "ws".into(),
            root: dir.path().to_path_buf(),
            tier,
            deny_patterns: vec![],
            allow_vcs: false,
        });
        let token = crate::token::generate();
        let state = Arc::new(DaemonState::new(
            Arc::new(config),
            workspace,
            token.clone(),
            dir.path().join("audit"),
            dir.path().join("logs"),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(1, state, tx);
        Fixture {
            session,
            rx,
            token,
            _dir: dir,
        }
    }

    fn connect(fx: &mut Fixture) {
        let frame = format!(
            r#"{{"type":"req","id":"c1","method":"connect","params":{{"token":"{}"}}}}"#,
            fx.token
        );
        fx.session.handle_text(&frame);
        match fx.rx.try_recv().unwrap() {
            Outbound::Response(Frame::Res { ok: true, .. }) => {}
            other => panic!("expected hello response, got {other:?}"),
        }
    }

    fn expect_error(out: Outbound, code: ErrorCode) -> WireError {
        match out {
            Outbound::Response(Frame::Res {
                ok: false,
                error: Some(err),
                ..
            }) => {
                assert_eq!(err.code, code, "unexpected code: {}", err.message);
                err
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Outbound {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for outbound")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn unauthenticated_calls_are_rejected() {
        let mut fx = fixture(Tier::Read);
        fx.session
            .handle_text(r#"{"type":"req","id":1,"method":"tools.list"}"#);
        let err = expect_error(fx.rx.try_recv().unwrap(), ErrorCode::Unauthorized);
        assert!(err.message.contains("connect"));
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error() {
        let mut fx = fixture(Tier::Read);
        fx.session.handle_text("{nope");
        expect_error(fx.rx.try_recv().unwrap(), ErrorCode::ParseError);
    }

    #[tokio::test]
    async fn non_req_frame_is_invalid_request() {
        let mut fx = fixture(Tier::Read);
        fx.session
            .handle_text(r#"{"type":"res","id":1,"ok":true}"#);
        expect_error(fx.rx.try_recv().unwrap(), ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn oversized_frame_is_payload_too_large() {
        let mut fx = fixture(Tier::Read);
        let huge = "x".repeat(MAX_FRAME_BYTES + 1);
        fx.session.handle_text(&huge);
        expect_error(fx.rx.try_recv().unwrap(), ErrorCode::PayloadTooLarge);
    }

    #[tokio::test]
    async fn wrong_token_fails_and_closes_4001() {
        let mut fx = fixture(Tier::Read);
        let wrong = crate::token::generate();
        let frame = format!(
            r#"{{"type":"req","id":"c1","method":"connect","params":{{"token":"{wrong}"}}}}"#
        );
        fx.session.handle_text(&frame);
        match fx.rx.try_recv().unwrap() {
            Outbound::CloseWith { frame, code } => {
                assert_eq!(code, AUTH_FAILED_CLOSE_CODE);
                match frame {
                    Frame::Res { ok, error, .. } => {
                        assert!(!ok);
                        assert_eq!(error.unwrap().code, ErrorCode::AuthFailed);
                    }
                    other => panic!("expected res frame, got {other:?}"),
                }
            }
            other => panic!("expected close, got {other:?}"),
        }
        assert!(!fx.session.authenticated);
    }

    #[tokio::test]
    async fn connect_returns_hello_and_marks_authenticated() {
        let mut fx = fixture(Tier::Write);
        let frame = format!(
            r#"{{"type":"req","id":7,"method":"connect","params":{{"token":"{}","client":{{"name":"gateway"}}}}}}"#,
            fx.token
        );
        fx.session.handle_text(&frame);
        match fx.rx.try_recv().unwrap() {
            Outbound::Response(Frame::Res { id, ok, payload, .. }) => {
                assert_eq!(id, json!(7));
                assert!(ok);
                let hello = payload.unwrap();
                assert_eq!(hello["protocol"], 1);
                assert_eq!(hello["workspace"]["tier"], "write");
                assert_eq!(hello["server"]["name"], "agentbox");
                // Write tier sees everything but cmd.run.
                let tools = hello["tools"].as_array().unwrap();
                assert_eq!(tools.len(), 7);
            }
            other => panic!("expected hello, got {other:?}"),
        }
        assert!(fx.session.authenticated);
        assert_eq!(fx.session.client_name.as_deref(), Some("gateway"));
    }

    #[tokio::test]
    async fn double_connect_is_invalid_request() {
        let mut fx = fixture(Tier::Read);
        connect(&mut fx);
        let frame = format!(
            r#"{{"type":"req","id":"again","method":"connect","params":{{"token":"{}"}}}}"#,
            fx.token
        );
        fx.session.handle_text(&frame);
        expect_error(fx.rx.try_recv().unwrap(), ErrorCode::InvalidRequest);
        assert!(fx.session.authenticated);
    }

    #[tokio::test]
    async fn ping_pongs() {
        let mut fx = fixture(Tier::Read);
        connect(&mut fx);
        fx.session
            .handle_text(r#"{"type":"req","id":"p","method":"ping"}"#);
        match fx.rx.try_recv().unwrap() {
            Outbound::Response(Frame::Res { ok, payload, .. }) => {
                assert!(ok);
                assert_eq!(payload.unwrap()["pong"], true);
            }
            other => panic!("expected pong, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let mut fx = fixture(Tier::Read);
        connect(&mut fx);
        fx.session
            .handle_text(r#"{"type":"req","id":1,"method":"workspace.destroy"}"#);
        expect_error(fx.rx.try_recv().unwrap(), ErrorCode::MethodNotFound);
    }

    #[tokio::test]
    async fn tools_call_emits_start_result_then_response() {
        let mut fx = fixture(Tier::Read);
        connect(&mut fx);
        fx.session.handle_text(
            r#"{"type":"req","id":"r1","method":"tools.call","params":{"tool":"fs.read","args":{"path":"hello.txt"}}}"#,
        );

        let start = recv(&mut fx.rx).await;
        let tool_call_id = match start {
            Outbound::Event { event, payload } => {
                assert_eq!(event, "tool");
                assert_eq!(payload["phase"], "start");
                assert_eq!(payload["tool"], "fs.read");
                payload["toolCallId"].as_str().unwrap().to_string()
            }
            other => panic!("expected start event, got {other:?}"),
        };

        match recv(&mut fx.rx).await {
            Outbound::Event { payload, .. } => {
                assert_eq!(payload["phase"], "result");
                assert_eq!(payload["toolCallId"], tool_call_id.as_str());
                assert_eq!(payload["ok"], true);
            }
            other => panic!("expected result event, got {other:?}"),
        }

        match recv(&mut fx.rx).await {
            Outbound::Response(Frame::Res { id, ok, payload, .. }) => {
                assert_eq!(id, json!("r1"));
                assert!(ok);
                assert_eq!(payload.unwrap()["content"], "hi there\n");
            }
            other => panic!("expected response, got {other:?}"),
        }

        // The audit trail has the call.
        assert!(fx.session.run.audit.len() >= 1);
    }

    #[tokio::test]
    async fn failed_tool_call_reports_the_tool_error_code() {
        let mut fx = fixture(Tier::Read);
        connect(&mut fx);
        fx.session.handle_text(
            r#"{"type":"req","id":"r2","method":"tools.call","params":{"tool":"fs.read","args":{"path":"../../etc/passwd"}}}"#,
        );

        let _start = recv(&mut fx.rx).await;
        match recv(&mut fx.rx).await {
            Outbound::Event { payload, .. } => {
                assert_eq!(payload["ok"], false);
                assert_eq!(payload["error"]["code"], "FORBIDDEN_PATH");
            }
            other => panic!("expected result event, got {other:?}"),
        }
        expect_error(recv(&mut fx.rx).await, ErrorCode::ForbiddenPath);
    }

    #[tokio::test]
    async fn approval_round_trip_over_the_session() {
        let mut fx = fixture(Tier::Exec);
        connect(&mut fx);
        fx.session.handle_text(
            r#"{"type":"req","id":"x1","method":"tools.call","params":{"tool":"cmd.run","args":{"command":"echo gated"}}}"#,
        );

        let _start = recv(&mut fx.rx).await;
        // approval.requested fires before the failing result.
        let approval_id = match recv(&mut fx.rx).await {
            Outbound::Event { event, payload } => {
                assert_eq!(event, "approval.requested");
                payload["approvalId"].as_str().unwrap().to_string()
            }
            other => panic!("expected approval.requested, got {other:?}"),
        };
        let _result = recv(&mut fx.rx).await;
        expect_error(recv(&mut fx.rx).await, ErrorCode::ApprovalRequired);

        // approvals.list shows the pending record.
        fx.session
            .handle_text(r#"{"type":"req","id":"l1","method":"approvals.list"}"#);
        match recv(&mut fx.rx).await {
            Outbound::Response(Frame::Res { payload, .. }) => {
                let approvals = payload.unwrap()["approvals"].as_array().unwrap().clone();
                assert_eq!(approvals.len(), 1);
                assert_eq!(approvals[0]["id"], approval_id.as_str());
            }
            other => panic!("expected list response, got {other:?}"),
        }

        // Approve it; the resolved event precedes the reply.
        fx.session.handle_text(&format!(
            r#"{{"type":"req","id":"a1","method":"approvals.resolve","params":{{"approvalId":"{approval_id}","approve":true}}}}"#
        ));
        match recv(&mut fx.rx).await {
            Outbound::Event { event, payload } => {
                assert_eq!(event, "approval.resolved");
                assert_eq!(payload["approved"], true);
            }
            other => panic!("expected approval.resolved, got {other:?}"),
        }
        let _reply = recv(&mut fx.rx).await;

        // Retry with the approval id: the command runs.
        fx.session.handle_text(&format!(
            r#"{{"type":"req","id":"x2","method":"tools.call","params":{{"tool":"cmd.run","args":{{"command":"echo gated"}},"approvalId":"{approval_id}"}}}}"#
        ));
        let _start = recv(&mut fx.rx).await;
        let _result = recv(&mut fx.rx).await;
        match recv(&mut fx.rx).await {
            Outbound::Response(Frame::Res { ok, payload, .. }) => {
                assert!(ok);
                assert_eq!(payload.unwrap()["stdout"], "gated\n");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolving_unknown_approval_is_approval_timeout() {
        let mut fx = fixture(Tier::Read);
        connect(&mut fx);
        fx.session.handle_text(
            r#"{"type":"req","id":1,"method":"approvals.resolve","params":{"approvalId":"ghost","approve":true}}"#,
        );
        expect_error(fx.rx.try_recv().unwrap(), ErrorCode::ApprovalTimeout);
    }
}
