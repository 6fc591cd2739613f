//! Tunnel, database and service configuration.

use crate::error::{PetsError, PetsResult};

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default SSH server port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default PostgreSQL port.
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default local port the tunnel listens on.
pub const DEFAULT_LOCAL_PORT: u16 = 15432;

/// SSH tunnel settings.
///
/// Key-based authentication only; the passphrase is optional.
#[derive(Clone)]
pub struct TunnelConfig {
    /// SSH server hostname or IP
    pub host: String,
    /// SSH server port (default 22)
    pub port: u16,
    /// SSH username
    pub username: String,
    /// Path to the private key
    pub key_path: PathBuf,
    /// Passphrase for an encrypted private key
    pub passphrase: Option<String>,
    /// known_hosts file to check the server key against (None = ~/.ssh/known_hosts)
    pub known_hosts: Option<PathBuf>,
    /// Accept a server whose key is not recorded in known_hosts
    pub accept_unknown_hosts: bool,
}

impl TunnelConfig {
    /// Create a new tunnel configuration with the default port and no passphrase.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            key_path: key_path.into(),
            passphrase: None,
            known_hosts: None,
            accept_unknown_hosts: false,
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the key passphrase. An empty passphrase counts as none.
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        let passphrase = passphrase.into();
        self.passphrase = if passphrase.is_empty() { None } else { Some(passphrase) };
        self
    }

    /// Check the server key against this known_hosts file.
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    /// Accept servers missing from known_hosts. A changed key is still rejected.
    pub fn accept_unknown_hosts(mut self, accept: bool) -> Self {
        self.accept_unknown_hosts = accept;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> PetsResult<()> {
        if self.host.is_empty() {
            return Err(PetsError::config("SSH host is required"));
        }
        if self.username.is_empty() {
            return Err(PetsError::config("SSH username is required"));
        }
        if self.key_path.as_os_str().is_empty() {
            return Err(PetsError::config("SSH client key path is required"));
        }
        Ok(())
    }
}

impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("key_path", &self.key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("known_hosts", &self.known_hosts)
            .field("accept_unknown_hosts", &self.accept_unknown_hosts)
            .finish()
    }
}

/// PostgreSQL settings as seen from the tunnel's remote end.
#[derive(Clone)]
pub struct DatabaseConfig {
    /// Database host, resolved by the SSH server
    pub host: String,
    /// Database port (default 5432)
    pub port: u16,
    /// Login username
    pub user: String,
    /// Login password
    pub password: String,
    /// Database name
    pub database: String,
}

impl DatabaseConfig {
    /// Create a new database configuration with the default port.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_DB_PORT,
            user: user.into(),
            password: password.into(),
            database: database.into(),
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Copy of this configuration pointed at a local tunnel endpoint.
    pub fn via_local_port(&self, local_port: u16) -> Self {
        Self { host: "127.0.0.1".to_string(), port: local_port, ..self.clone() }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> PetsResult<()> {
        if self.host.is_empty() {
            return Err(PetsError::config("Database host is required"));
        }
        if self.user.is_empty() {
            return Err(PetsError::config("Database user is required"));
        }
        if self.database.is_empty() {
            return Err(PetsError::config("Database name is required"));
        }
        Ok(())
    }

    /// Get the display connection string (without password).
    pub fn display_url(&self) -> String {
        format!("postgresql://{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Tunables for the tunnel, pool and shutdown.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Local port the tunnel listens on (0 = let the OS choose)
    pub local_port: u16,
    /// Maximum number of pooled database connections
    pub pool_size: usize,
    /// How long a request waits for a free connection
    pub acquire_timeout: Duration,
    /// Bound on SSH connect + auth and on each new database connection
    pub connect_timeout: Duration,
    /// How long pool close waits for in-flight connections
    pub shutdown_grace: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            local_port: DEFAULT_LOCAL_PORT,
            pool_size: 4,
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl ServiceOptions {
    /// Validate the options.
    pub fn validate(&self) -> PetsResult<()> {
        if self.pool_size == 0 {
            return Err(PetsError::config("Pool size must be at least 1"));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PetsError::config("Acquire timeout must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(PetsError::config("Connect timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Everything the lifecycle coordinator needs to start the service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub tunnel: TunnelConfig,
    pub database: DatabaseConfig,
    pub options: ServiceOptions,
}

impl AppConfig {
    /// Validate all sections.
    pub fn validate(&self) -> PetsResult<()> {
        self.tunnel.validate()?;
        self.database.validate()?;
        self.options.validate()
    }
}
