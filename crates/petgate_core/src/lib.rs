//! Core services for petgate, a pet lookup service behind an SSH tunnel.
//!
//! - **error**: Error types and the closed set of outcome kinds
//! - **models**: Configuration, pool status and lookup responses
//! - **services**: SSH tunnel, connection pool, lookup handler
//! - **lifecycle**: Startup and shutdown sequencing
//! - **logging**: Structured logging setup

pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ErrorKind, PetsError, PetsResult, StartupError, StartupStage};
pub use lifecycle::{Connector, Lifecycle, ProcessState, SshConnector, Tunnel};
pub use models::{
    AppConfig, DatabaseConfig, HandlerResponse, PoolStatus, ServiceOptions, TunnelConfig,
};
pub use services::{ConnectionPool, LookupService, PetStore, SshTunnelService};
