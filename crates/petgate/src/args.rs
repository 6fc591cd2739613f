//! Command-line and environment configuration.
//!
//! Every option can come from a flag or from the environment; `.env` is
//! loaded into the environment before parsing.

use clap::Parser;
use petgate_core::models::config::{DEFAULT_DB_PORT, DEFAULT_LOCAL_PORT, DEFAULT_SSH_PORT};
use petgate_core::{AppConfig, DatabaseConfig, ServiceOptions, TunnelConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "petgate", version, about = "Look up a user's pets by phone number")]
pub struct Args {
    /// SSH server host
    #[arg(long, env = "SSH_HOST")]
    pub ssh_host: String,

    /// SSH server port
    #[arg(long, env = "SSH_PORT", default_value_t = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,

    /// SSH username
    #[arg(long, env = "SSH_USERNAME")]
    pub ssh_username: String,

    /// Path to the SSH private key
    #[arg(long, env = "SSH_CLIENT_KEYS")]
    pub ssh_client_keys: PathBuf,

    /// Passphrase for the SSH private key
    #[arg(long, env = "SSH_PASSPHRASE", hide_env_values = true)]
    pub ssh_passphrase: Option<String>,

    /// known_hosts file for the SSH server key (default ~/.ssh/known_hosts)
    #[arg(long, env = "SSH_KNOWN_HOSTS")]
    pub ssh_known_hosts: Option<PathBuf>,

    /// Accept an SSH server whose key is not in known_hosts
    #[arg(long, env = "SSH_ACCEPT_UNKNOWN_HOSTS")]
    pub ssh_accept_unknown_hosts: bool,

    /// Database host as seen from the SSH server
    #[arg(long, env = "DB_HOST")]
    pub db_host: String,

    /// Database port as seen from the SSH server
    #[arg(long, env = "DB_PORT", default_value_t = DEFAULT_DB_PORT)]
    pub db_port: u16,

    /// Database user
    #[arg(long, env = "DB_USER")]
    pub db_user: String,

    /// Database password
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: String,

    /// Database name
    #[arg(long, env = "DB_NAME")]
    pub db_name: String,

    /// Local port the SSH tunnel listens on (0 = any free port)
    #[arg(long, env = "TUNNEL_LOCAL_PORT", default_value_t = DEFAULT_LOCAL_PORT)]
    pub tunnel_local_port: u16,

    /// Maximum pooled database connections
    #[arg(long, env = "DB_POOL_SIZE", default_value_t = 4)]
    pub db_pool_size: usize,

    /// Seconds a request waits for a free database connection
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub db_acquire_timeout_secs: u64,

    /// Seconds allowed for SSH connect + auth and for each new database connection
    #[arg(long, env = "SSH_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub ssh_connect_timeout_secs: u64,

    /// Seconds shutdown waits for in-flight database connections
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,

    /// HTTP listen address
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8000")]
    pub http_addr: SocketAddr,

    /// Log filter directives, e.g. `info,petgate_core=debug` (falls back to RUST_LOG)
    #[arg(long, env = "PETGATE_LOG")]
    pub log_filter: Option<String>,

    /// Directory for rotating log files; stdout only when unset
    #[arg(long, env = "PETGATE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    /// Build the core configuration.
    pub fn app_config(&self) -> AppConfig {
        let mut tunnel =
            TunnelConfig::new(&self.ssh_host, &self.ssh_username, &self.ssh_client_keys)
                .with_port(self.ssh_port)
                .accept_unknown_hosts(self.ssh_accept_unknown_hosts);
        if let Some(known_hosts) = &self.ssh_known_hosts {
            tunnel = tunnel.with_known_hosts(known_hosts);
        }
        if let Some(passphrase) = &self.ssh_passphrase {
            tunnel = tunnel.with_passphrase(passphrase);
        }

        let database =
            DatabaseConfig::new(&self.db_host, &self.db_user, &self.db_password, &self.db_name)
                .with_port(self.db_port);

        let options = ServiceOptions {
            local_port: self.tunnel_local_port,
            pool_size: self.db_pool_size,
            acquire_timeout: Duration::from_secs(self.db_acquire_timeout_secs),
            connect_timeout: Duration::from_secs(self.ssh_connect_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        };

        AppConfig { tunnel, database, options }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: &[&str] = &[
        "petgate",
        "--ssh-host",
        "bastion.example.com",
        "--ssh-username",
        "deploy",
        "--ssh-client-keys",
        "/keys/id_ed25519",
        "--db-host",
        "10.0.0.5",
        "--db-user",
        "pets",
        "--db-password",
        "secret",
        "--db-name",
        "petsdb",
    ];

    #[test]
    fn test_defaults_fill_optional_settings() {
        let args = Args::try_parse_from(REQUIRED).unwrap();
        let config = args.app_config();

        assert_eq!(config.tunnel.port, 22);
        assert!(config.tunnel.passphrase.is_none());
        assert!(config.tunnel.known_hosts.is_none());
        assert!(!config.tunnel.accept_unknown_hosts);
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.options.local_port, 15432);
        assert_eq!(config.options.pool_size, 4);
        assert_eq!(config.options.acquire_timeout, Duration::from_secs(5));
        assert_eq!(args.http_addr.port(), 8000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let mut argv = REQUIRED.to_vec();
        argv.extend([
            "--ssh-passphrase",
            "open-sesame",
            "--db-port",
            "6543",
            "--tunnel-local-port",
            "0",
            "--db-pool-size",
            "8",
            "--ssh-known-hosts",
            "/etc/petgate/known_hosts",
            "--ssh-accept-unknown-hosts",
            "--log-filter",
            "warn,petgate_core=debug",
        ]);
        let args = Args::try_parse_from(argv).unwrap();
        assert_eq!(args.log_filter.as_deref(), Some("warn,petgate_core=debug"));
        let config = args.app_config();

        assert_eq!(config.tunnel.passphrase.as_deref(), Some("open-sesame"));
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.options.local_port, 0);
        assert_eq!(config.options.pool_size, 8);
        assert_eq!(config.tunnel.known_hosts, Some(PathBuf::from("/etc/petgate/known_hosts")));
        assert!(config.tunnel.accept_unknown_hosts);
    }

    #[test]
    fn test_missing_required_setting_is_rejected() {
        let argv: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .filter(|a| *a != "--db-name" && *a != "petsdb")
            .collect();
        assert!(Args::try_parse_from(argv).is_err());
    }
}
