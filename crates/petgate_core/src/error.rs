//! Error types for petgate.
//!
//! Every failure carries a human-readable message and, where one exists, the
//! underlying error as its `source`. [`ErrorKind`] is the closed set of
//! outcomes the request handler and the process entry point care about.

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type PetsResult<T> = Result<T, PetsError>;

/// Main error type for petgate.
#[derive(Debug, Error)]
pub enum PetsError {
    /// Invalid or missing configuration.
    #[error("Config error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// SSH transport or port-forward error.
    #[error("SSH error: {message}")]
    Ssh {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// SSH or database authentication failed.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the operator.
        hint: Option<String>,
    },

    /// Database connection failed or was lost.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query failed inside PostgreSQL.
    #[error("{message}")]
    Query {
        /// PostgreSQL error message.
        message: String,
        /// Additional detail from PostgreSQL.
        detail: Option<String>,
        /// PostgreSQL error code (e.g., "42883").
        code: Option<String>,
    },

    /// No pooled connection became free before the acquire timeout.
    #[error("Pool timeout: {message}")]
    PoolTimeout {
        /// Human-readable error message.
        message: String,
        /// Number of tasks waiting for connections.
        waiting: usize,
    },

    /// The pool has been closed and hands out no more connections.
    #[error("Pool closed")]
    PoolClosed,

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Closed classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Tunnel or pool could not be opened; the process must not serve.
    FatalStartup,
    /// The lookup ran and found nothing.
    NotFound,
    /// Acquiring a connection or running the query failed.
    Database,
    /// Anything else raised while handling a request.
    Unknown,
}

/// Step of the startup sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStage {
    Config,
    Tunnel,
    Pool,
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "configuration"),
            Self::Tunnel => write!(f, "SSH tunnel"),
            Self::Pool => write!(f, "connection pool"),
        }
    }
}

/// Startup could not complete; the process must not serve traffic.
#[derive(Debug, Error)]
#[error("Startup failed at the {stage} step")]
pub struct StartupError {
    /// Step that failed.
    pub stage: StartupStage,
    /// Underlying error.
    #[source]
    pub source: PetsError,
}

impl StartupError {
    pub fn new(stage: StartupStage, source: PetsError) -> Self {
        Self { stage, source }
    }

    /// Always [`ErrorKind::FatalStartup`].
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::FatalStartup
    }
}

impl PetsError {
    // ========== Constructors ==========

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a new SSH error.
    pub fn ssh(message: impl Into<String>) -> Self {
        Self::Ssh { message: message.into(), source: None }
    }

    /// Create a new SSH error with source.
    pub fn ssh_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Ssh { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new authentication error with hint.
    pub fn authentication_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Authentication { message: message.into(), hint: Some(hint.into()) }
    }

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new pool timeout error.
    pub fn pool_timeout(message: impl Into<String>, waiting: usize) -> Self {
        Self::PoolTimeout { message: message.into(), waiting }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    // ========== Methods ==========

    /// Classify the error for the request boundary.
    ///
    /// Startup failures are classified by the lifecycle coordinator, not
    /// here: an SSH error seen while serving is still a database-path failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ssh { .. }
            | Self::Authentication { .. }
            | Self::Connection { .. }
            | Self::Query { .. }
            | Self::PoolTimeout { .. }
            | Self::PoolClosed => ErrorKind::Database,
            Self::Config { .. } | Self::Internal { .. } => ErrorKind::Unknown,
        }
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "Config",
            Self::Ssh { .. } => "SSH",
            Self::Authentication { .. } => "Authentication",
            Self::Connection { .. } => "Connection",
            Self::Query { .. } => "Query",
            Self::PoolTimeout { .. } | Self::PoolClosed => "Pool",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the operator.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Config { .. } => Some("Check the environment variables and .env file"),
            Self::Ssh { .. } => Some("Check that the SSH host is reachable and allows TCP forwarding"),
            Self::Authentication { hint, .. } => hint.as_deref(),
            Self::Connection { .. } => Some("Check that the database server is running"),
            Self::Query { .. } => None,
            Self::PoolTimeout { .. } => Some("Increase DB_POOL_SIZE or DB_ACQUIRE_TIMEOUT_SECS"),
            Self::PoolClosed => Some("The service is shutting down"),
            Self::Internal { .. } => Some("Please report this issue"),
        }
    }

    /// Get PostgreSQL error code (if applicable).
    pub fn pg_code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Message with the full `source` chain appended.
    ///
    /// A source whose text the message already ends with is not repeated.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let text = err.to_string();
            if !out.ends_with(&text) {
                out.push_str(": ");
                out.push_str(&text);
            }
            source = err.source();
        }
        out
    }
}

// ========== Error Conversions ==========

/// Convert from tokio_postgres::Error to PetsError.
impl From<tokio_postgres::Error> for PetsError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let detail = db_err.detail().map(String::from);
            let code_str = db_err.code().code();

            match code_str {
                "28P01" | "28000" => {
                    return PetsError::Authentication {
                        message,
                        hint: Some("Check DB_USER and DB_PASSWORD".to_string()),
                    }
                }
                // Connection exceptions (08xxx)
                _ if code_str.starts_with("08") => {
                    return PetsError::Connection { message, source: Some(Box::new(err)) }
                }
                _ => {
                    return PetsError::Query { message, detail, code: Some(code_str.to_string()) }
                }
            }
        }

        if err.is_closed() {
            return PetsError::Connection {
                message: "Connection closed".to_string(),
                source: Some(Box::new(err)),
            };
        }

        PetsError::Connection { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

/// Convert from std::io::Error to PetsError.
impl From<std::io::Error> for PetsError {
    fn from(err: std::io::Error) -> Self {
        PetsError::Internal { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_path_errors_are_database_kind() {
        assert_eq!(PetsError::PoolClosed.kind(), ErrorKind::Database);
        assert_eq!(PetsError::pool_timeout("waited 5s", 3).kind(), ErrorKind::Database);
        assert_eq!(PetsError::connection("connection reset").kind(), ErrorKind::Database);
        assert_eq!(
            PetsError::Query {
                message: "function does not exist".to_string(),
                detail: None,
                code: Some("42883".to_string()),
            }
            .kind(),
            ErrorKind::Database
        );
    }

    #[test]
    fn test_internal_errors_are_unknown_kind() {
        assert_eq!(PetsError::internal("task panicked").kind(), ErrorKind::Unknown);
        assert_eq!(PetsError::config("SSH_HOST is required").kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_chain_includes_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = PetsError::ssh_with_source("Failed to connect to SSH server", io);
        assert_eq!(err.chain(), "SSH error: Failed to connect to SSH server: refused");
    }

    #[test]
    fn test_chain_skips_source_already_in_message() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let err = PetsError::connection_with_source("broken pipe", io);
        assert_eq!(err.chain(), "Connection error: broken pipe");
    }

    #[test]
    fn test_startup_error_is_fatal() {
        let err = StartupError::new(StartupStage::Tunnel, PetsError::ssh("unreachable"));
        assert_eq!(err.kind(), ErrorKind::FatalStartup);
        assert_eq!(err.to_string(), "Startup failed at the SSH tunnel step");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_pg_code_only_for_query_errors() {
        let err = PetsError::Query {
            message: "boom".to_string(),
            detail: None,
            code: Some("XX000".to_string()),
        };
        assert_eq!(err.pg_code(), Some("XX000"));
        assert_eq!(PetsError::PoolClosed.pg_code(), None);
        assert_eq!(PetsError::PoolClosed.category(), "Pool");
        assert!(PetsError::PoolClosed.hint().is_some());
    }
}
