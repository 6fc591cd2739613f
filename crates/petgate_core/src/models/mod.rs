//! Data models for petgate.
//!
//! - `config` - TunnelConfig, DatabaseConfig, ServiceOptions, AppConfig
//! - `pool` - PoolStatus
//! - `lookup` - HandlerResponse and the error-to-body mapping

pub mod config;
pub mod lookup;
pub mod pool;

pub use config::{AppConfig, DatabaseConfig, ServiceOptions, TunnelConfig};
pub use lookup::{HandlerResponse, NOT_FOUND_MESSAGE};
pub use pool::PoolStatus;
