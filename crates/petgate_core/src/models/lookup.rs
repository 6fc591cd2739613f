//! Per-request lookup outcome and its JSON body.

use crate::error::{ErrorKind, PetsError};

use serde_json::{json, Value};

/// Message returned when the stored lookup yields no row.
pub const NOT_FOUND_MESSAGE: &str = "user not found";

/// Result of one pet lookup, ready to be rendered.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResponse {
    /// The stored procedure's payload, passed through verbatim.
    Success(Value),
    /// A classified failure with its user-facing message.
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl HandlerResponse {
    /// The lookup found nothing for the given phone.
    pub fn not_found() -> Self {
        Self::Error { kind: ErrorKind::NotFound, message: NOT_FOUND_MESSAGE.to_string() }
    }

    /// Build the response for an error raised while handling a request.
    ///
    /// The message carries the whole `source` chain, so a failed connect
    /// reports why it failed.
    pub fn from_error(err: &PetsError) -> Self {
        let kind = err.kind();
        Self::Error { kind, message: error_message(kind, &err.chain()) }
    }

    /// Whether this is a successful lookup.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Error kind, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success(_) => None,
            Self::Error { kind, .. } => Some(*kind),
        }
    }

    /// Render the JSON body. Errors use `{"status": "error", "message": ...}`.
    pub fn into_body(self) -> Value {
        match self {
            Self::Success(payload) => payload,
            Self::Error { message, .. } => json!({ "status": "error", "message": message }),
        }
    }
}

/// The single mapping from error kind to user-facing message.
pub fn error_message(kind: ErrorKind, cause: &str) -> String {
    match kind {
        ErrorKind::NotFound => NOT_FOUND_MESSAGE.to_string(),
        ErrorKind::Database => format!("database error: {cause}"),
        ErrorKind::FatalStartup => format!("service unavailable: {cause}"),
        ErrorKind::Unknown => format!("unknown error: {cause}"),
    }
}
