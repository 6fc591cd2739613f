//! SSH tunnel to the database host.
//!
//! Opens one authenticated SSH session and one local listener. Every socket
//! accepted on the listener is forwarded over a `direct-tcpip` channel to the
//! database host, so the pool can connect to `127.0.0.1:<local_port>` as if
//! the database were local.

use crate::error::{PetsError, PetsResult};
use crate::models::TunnelConfig;

use async_trait::async_trait;
use russh::client;
use russh::Disconnect;
use russh_keys::key::{KeyPair, PublicKey};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

type SshSession = Arc<Mutex<client::Handle<SshClientHandler>>>;

/// Handle to a live SSH session and its local port forward.
///
/// Close it with [`TunnelHandle::close`]. Dropping without closing cancels the
/// forward but leaves the session to be torn down by its last reference.
pub struct TunnelHandle {
    /// Identifier used in log events for this session
    session_id: Uuid,
    /// Local port the tunnel is listening on
    local_port: u16,
    /// Cancellation token for the accept loop and all forwards
    cancel_token: CancellationToken,
    /// Accept loop task; owns the listener
    accept_task: JoinHandle<()>,
    /// One task per forwarded socket
    forwards: TaskTracker,
    session: SshSession,
}

impl TunnelHandle {
    /// Get the local port connections should target.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Number of forwarded sockets currently open.
    pub fn active_forwards(&self) -> usize {
        self.forwards.len()
    }

    /// Close the forward, then the SSH session.
    ///
    /// Returns once the listener is gone and every forwarded socket has ended.
    pub async fn close(mut self) -> PetsResult<()> {
        self.cancel_token.cancel();

        if let Err(e) = (&mut self.accept_task).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "Tunnel accept loop ended abnormally");
        }
        self.forwards.close();
        self.forwards.wait().await;
        tracing::debug!(
            session_id = %self.session_id,
            local_port = self.local_port,
            "Tunnel forward closed"
        );

        let result = self
            .session
            .lock()
            .await
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;

        match result {
            Ok(()) => {
                tracing::info!(
                    session_id = %self.session_id,
                    local_port = self.local_port,
                    "SSH tunnel closed"
                );
                Ok(())
            }
            Err(e) => Err(PetsError::ssh_with_source("Failed to disconnect SSH session", e)),
        }
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// SSH client handler for russh.
struct SshClientHandler {
    host: String,
    port: u16,
    known_hosts: Option<PathBuf>,
    accept_unknown_hosts: bool,
}

impl SshClientHandler {
    fn new(config: &TunnelConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            known_hosts: config.known_hosts.clone(),
            accept_unknown_hosts: config.accept_unknown_hosts,
        }
    }

    /// A recorded match is trusted and a changed key never is. An unrecorded
    /// host is trusted only when `accept_unknown_hosts` is set.
    fn verify_host_key(&self, server_public_key: &PublicKey) -> bool {
        let checked = match &self.known_hosts {
            Some(path) => {
                russh_keys::check_known_hosts_path(&self.host, self.port, server_public_key, path)
            }
            None => russh_keys::check_known_hosts(&self.host, self.port, server_public_key),
        };

        match checked {
            Ok(true) => true,
            Ok(false) if self.accept_unknown_hosts => {
                tracing::warn!(
                    host = %self.host,
                    fingerprint = %server_public_key.fingerprint(),
                    "SSH host key not in known_hosts; accepting"
                );
                true
            }
            Ok(false) => {
                tracing::error!(
                    host = %self.host,
                    fingerprint = %server_public_key.fingerprint(),
                    "SSH host key not in known_hosts; rejecting"
                );
                false
            }
            Err(e) => {
                tracing::error!(host = %self.host, error = %e, "SSH host key verification failed");
                false
            }
        }
    }
}

#[async_trait]
impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(self.verify_host_key(server_public_key))
    }
}

/// SSH tunnel service.
pub struct SshTunnelService;

impl SshTunnelService {
    /// Open an SSH tunnel forwarding `127.0.0.1:local_port` to `target_host:target_port`.
    ///
    /// # Arguments
    ///
    /// * `config` - SSH server and key settings
    /// * `target_host` - Host to reach from the SSH server
    /// * `target_port` - Port to reach from the SSH server
    /// * `local_port` - Local port to listen on (0 = let the OS choose)
    /// * `connect_timeout` - Bound on connect + authentication
    pub async fn open(
        config: &TunnelConfig,
        target_host: &str,
        target_port: u16,
        local_port: u16,
        connect_timeout: Duration,
    ) -> PetsResult<TunnelHandle> {
        config.validate()?;
        let session_id = Uuid::new_v4();

        tracing::info!(
            session_id = %session_id,
            host = %config.host,
            port = config.port,
            "Establishing SSH tunnel"
        );

        let handle = tokio::time::timeout(connect_timeout, Self::connect_ssh(config))
            .await
            .map_err(|_| {
                PetsError::ssh(format!(
                    "Timed out after {}s connecting to {}:{}",
                    connect_timeout.as_secs_f32(),
                    config.host,
                    config.port
                ))
            })??;
        let session: SshSession = Arc::new(Mutex::new(handle));

        let (listener, actual_local_port) = match Self::bind_local(local_port).await {
            Ok(bound) => bound,
            Err(e) => {
                Self::disconnect_after_failure(&session, session_id).await;
                return Err(PetsError::ssh_with_source(
                    format!("Failed to bind local port {local_port} for SSH tunnel"),
                    e,
                ));
            }
        };

        let cancel_token = CancellationToken::new();
        let forwards = TaskTracker::new();

        let accept_task = tokio::spawn(Self::run_tunnel(
            listener,
            session.clone(),
            target_host.to_string(),
            target_port,
            session_id,
            forwards.clone(),
            cancel_token.clone(),
        ));

        tracing::info!(
            session_id = %session_id,
            local_port = actual_local_port,
            target = %format!("{target_host}:{target_port}"),
            "SSH tunnel listening"
        );

        Ok(TunnelHandle {
            session_id,
            local_port: actual_local_port,
            cancel_token,
            accept_task,
            forwards,
            session,
        })
    }

    async fn bind_local(port: u16) -> std::io::Result<(TcpListener, u16)> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let port = listener.local_addr()?.port();
        Ok((listener, port))
    }

    async fn disconnect_after_failure(session: &SshSession, session_id: Uuid) {
        let result = session
            .lock()
            .await
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
        if let Err(e) = result {
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                "Failed to disconnect SSH session after tunnel setup failure"
            );
        }
    }

    /// Connect and authenticate to the SSH server.
    async fn connect_ssh(config: &TunnelConfig) -> PetsResult<client::Handle<SshClientHandler>> {
        let ssh_config = Arc::new(client::Config::default());
        let handler = SshClientHandler::new(config);

        let mut handle = client::connect(ssh_config, (config.host.as_str(), config.port), handler)
            .await
            .map_err(|e| {
                PetsError::ssh_with_source(
                    format!("Failed to connect to SSH server {}:{}", config.host, config.port),
                    e,
                )
            })?;

        let key = Self::load_private_key(config).await?;
        let authenticated = handle
            .authenticate_publickey(&config.username, key)
            .await
            .map_err(|e| PetsError::ssh_with_source("SSH key authentication failed", e))?;

        if !authenticated {
            return Err(PetsError::authentication_with_hint(
                format!("SSH server rejected key for {}", config.username),
                "Verify the key is listed in the server's authorized_keys",
            ));
        }

        tracing::info!(
            username = %config.username,
            host = %config.host,
            "SSH authentication successful"
        );

        Ok(handle)
    }

    /// Load and decode the private key.
    async fn load_private_key(config: &TunnelConfig) -> PetsResult<Arc<KeyPair>> {
        let key_data = tokio::fs::read(&config.key_path).await.map_err(|e| {
            PetsError::ssh_with_source(
                format!("Failed to read SSH key file {}", config.key_path.display()),
                e,
            )
        })?;

        let key = russh_keys::decode_secret_key(
            &String::from_utf8_lossy(&key_data),
            config.passphrase.as_deref(),
        )
        .map_err(|e| {
            let message = if config.passphrase.is_some() {
                "Failed to decrypt SSH key"
            } else {
                "Failed to parse SSH key (it may need SSH_PASSPHRASE)"
            };
            PetsError::ssh_with_source(message, e)
        })?;

        Ok(Arc::new(key))
    }

    /// Run the accept loop until cancelled.
    async fn run_tunnel(
        listener: TcpListener,
        session: SshSession,
        remote_host: String,
        remote_port: u16,
        session_id: Uuid,
        forwards: TaskTracker,
        cancel_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((local_stream, peer_addr)) => {
                            tracing::debug!(session_id = %session_id, peer = %peer_addr, "New tunnel connection");

                            let session = session.clone();
                            let remote_host = remote_host.clone();
                            let cancel = cancel_token.clone();

                            forwards.spawn(async move {
                                if let Err(e) = Self::forward_connection(
                                    local_stream,
                                    session,
                                    &remote_host,
                                    remote_port,
                                    cancel,
                                )
                                .await
                                {
                                    tracing::warn!(session_id = %session_id, error = %e.chain(), "Tunnel forwarding error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(session_id = %session_id, error = %e, "Failed to accept tunnel connection");
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    tracing::debug!(session_id = %session_id, "Tunnel accept loop cancelled");
                    break;
                }
            }
        }
    }

    /// Forward a single connection through the SSH session.
    async fn forward_connection(
        mut local_stream: TcpStream,
        session: SshSession,
        remote_host: &str,
        remote_port: u16,
        cancel_token: CancellationToken,
    ) -> PetsResult<()> {
        let opened = tokio::select! {
            opened = async {
                session
                    .lock()
                    .await
                    .channel_open_direct_tcpip(remote_host, remote_port as u32, "127.0.0.1", 0)
                    .await
            } => opened,
            _ = cancel_token.cancelled() => return Ok(()),
        };
        let channel = opened.map_err(|e| {
            PetsError::ssh_with_source(
                format!("Failed to open SSH channel to {remote_host}:{remote_port}"),
                e,
            )
        })?;

        let mut channel = channel.into_stream();
        let mut buf_local = [0u8; 8192];
        let mut buf_remote = [0u8; 8192];

        loop {
            tokio::select! {
                n = local_stream.read(&mut buf_local) => {
                    match n {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if channel.write_all(&buf_local[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                n = channel.read(&mut buf_remote) => {
                    match n {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if local_stream.write_all(&buf_remote[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }

        Ok(())
    }
}
