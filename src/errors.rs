use serde::Serialize;

/// The kind of an error surfaced through the tool dispatcher. Handlers map
/// everything that can go wrong into one of these; the process never dies
/// because of a single bad request.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    ResourceExhausted,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// JSON-RPC error code used by the stdio and websocket framing.
    pub fn rpc_code(&self) -> i64 {
        match self {
            ErrorKind::InvalidArgument => -32602,
            ErrorKind::NotFound => -32004,
            ErrorKind::AlreadyExists => -32005,
            ErrorKind::FailedPrecondition => -32006,
            ErrorKind::ResourceExhausted => -32007,
            ErrorKind::Timeout => -32008,
            ErrorKind::Cancelled => -32009,
            ErrorKind::Internal => -32603,
        }
    }
}

#[derive(thiserror::Error, Serialize, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        ToolError::internal(format!("{err:#}"))
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ToolError::not_found(err.to_string()),
            _ => ToolError::internal(err.to_string()),
        }
    }
}

impl From<tantivy::TantivyError> for ToolError {
    fn from(err: tantivy::TantivyError) -> Self {
        ToolError::internal(format!("index error: {err}"))
    }
}

pub type ToolResult<T> = Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err: ToolError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file").into();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let s = serde_json::to_string(&ErrorKind::FailedPrecondition).unwrap();
        assert_eq!(s, "\"failed_precondition\"");
    }
}
