//! Backend services for petgate.
//!
//! - `tunnel` - SSH session and local port forward with russh
//! - `pool` - Database connection pooling with deadpool-postgres
//! - `lookup` - The pet lookup request handler

pub mod lookup;
pub mod pool;
pub mod tunnel;

pub use lookup::{LookupService, PetStore};
pub use pool::{ConnectionPool, LookupConnection, PooledConnection};
pub use tunnel::{SshTunnelService, TunnelHandle};
