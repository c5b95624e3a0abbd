use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire protocol version. A client seeing a different value in the hello
/// payload must abort the session.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum payload per frame (5 MiB). Enforced on both ends to prevent
/// unbounded allocations.
pub const MAX_FRAME_BYTES: usize = 5 * 1024 * 1024;

/// Default listen address. Loopback by convention; binding anything wider
/// requires explicit configuration.
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3847;

/// Interval of the broadcast `tick` keepalive event.
pub const TICK_INTERVAL_SECS: u64 = 30;

/// WebSocket close code sent after a failed `connect`.
pub const AUTH_FAILED_CLOSE_CODE: u16 = 4001;

/// Length of the base64url-encoded auth token (32 random bytes).
pub const TOKEN_LEN: usize = 43;

// ---------------------------------------------------------------------------
// Method and event names
// ---------------------------------------------------------------------------

pub mod methods {
    pub const CONNECT: &str = "connect";
    pub const TOOLS_LIST: &str = "tools.list";
    pub const TOOLS_CALL: &str = "tools.call";
    pub const PING: &str = "ping";
    pub const APPROVALS_LIST: &str = "approvals.list";
    pub const APPROVALS_RESOLVE: &str = "approvals.resolve";

    pub const ALL: &[&str] = &[
        CONNECT,
        TOOLS_LIST,
        TOOLS_CALL,
        PING,
        APPROVALS_LIST,
        APPROVALS_RESOLVE,
    ];
}

pub mod events {
    pub const TOOL: &str = "tool";
    pub const TICK: &str = "tick";
    pub const APPROVAL_REQUESTED: &str = "approval.requested";
    pub const APPROVAL_RESOLVED: &str = "approval.resolved";

    pub const ALL: &[&str] = &[TOOL, TICK, APPROVAL_REQUESTED, APPROVAL_RESOLVED];
}

// ---------------------------------------------------------------------------
// Capability tiers
// ---------------------------------------------------------------------------

/// Capability level of a workspace or tool, totally ordered:
/// `read < write < exec`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Read,
    Write,
    Exec,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Read => write!(f, "read"),
            Tier::Write => write!(f, "write"),
            Tier::Exec => write!(f, "exec"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Tier::Read),
            "write" => Ok(Tier::Write),
            "exec" => Ok(Tier::Exec),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// The closed set of error codes visible on the wire. Every failed response
/// carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ForbiddenPath,
    PathNotFound,
    InvalidPath,
    CommandDenied,
    PatchFailed,
    VcsError,
    CommandFailed,
    CommandTimeout,
    ApprovalRequired,
    ApprovalDenied,
    ApprovalTimeout,
    Unauthorized,
    PayloadTooLarge,
    MethodNotFound,
    InternalError,
    ParseError,
    InvalidRequest,
    AuthFailed,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::ForbiddenPath => "FORBIDDEN_PATH",
            ErrorCode::PathNotFound => "PATH_NOT_FOUND",
            ErrorCode::InvalidPath => "INVALID_PATH",
            ErrorCode::CommandDenied => "COMMAND_DENIED",
            ErrorCode::PatchFailed => "PATCH_FAILED",
            ErrorCode::VcsError => "VCS_ERROR",
            ErrorCode::CommandFailed => "COMMAND_FAILED",
            ErrorCode::CommandTimeout => "COMMAND_TIMEOUT",
            ErrorCode::ApprovalRequired => "APPROVAL_REQUIRED",
            ErrorCode::ApprovalDenied => "APPROVAL_DENIED",
            ErrorCode::ApprovalTimeout => "APPROVAL_TIMEOUT",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::AuthFailed => "AUTH_FAILED",
        };
        f.write_str(s)
    }
}

/// Error body carried in a failed response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl WireError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// One WebSocket message = one frame, UTF-8 JSON, discriminated by `type`.
///
/// `id` is chosen by the client (string or number) and echoed verbatim in
/// the matching response. `seq` is assigned by the server just before an
/// event is written and is strictly increasing per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Req {
        id: Value,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    Res {
        id: Value,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    Event {
        event: String,
        payload: Value,
        seq: u64,
    },
}

impl Frame {
    /// Successful response echoing the request id.
    pub fn ok(id: Value, payload: Value) -> Self {
        Frame::Res {
            id,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Failed response echoing the request id.
    pub fn err(id: Value, error: WireError) -> Self {
        Frame::Res {
            id,
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("frame serialization cannot fail")
    }
}

/// Parse a single frame from a text message.
pub fn parse_frame(text: &str) -> Result<Frame, serde_json::Error> {
    serde_json::from_str(text)
}

// ---------------------------------------------------------------------------
// Method payloads
// ---------------------------------------------------------------------------

/// Params of the `connect` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Hello payload returned by a successful `connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub protocol: u32,
    pub server: ServerInfo,
    pub workspace: WorkspaceInfo,
    pub tools: Vec<ToolInfo>,
    pub features: Features,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub name: String,
    pub root: String,
    pub tier: Tier,
}

/// One registry entry, as shown to clients by `tools.list` and the hello.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    pub tier: Tier,
    pub requires_approval: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

/// Params of the `tools.call` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallParams {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    /// Id of a previously resolved approval, when retrying a gated call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
}

/// Params of the `approvals.resolve` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResolveParams {
    pub approval_id: String,
    pub approve: bool,
}

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPhase {
    Start,
    Result,
}

/// Payload of the `tool` event. Emitted as a start/result pair sharing one
/// `toolCallId` around every `tools.call` execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEvent {
    pub phase: ToolPhase,
    pub tool_call_id: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}
