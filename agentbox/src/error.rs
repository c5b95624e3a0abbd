use agentbox_protocol::{ErrorCode, WireError};
use serde_json::Value;

/// Error value carried by every failing tool operation. The code is drawn
/// from the closed wire set; the message is plain English and safe to log.
/// Details may carry structured context (pattern, command, path) but never
/// file contents or the token.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl ToolError {
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

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn to_wire(&self) -> WireError {
        WireError {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
