//! Process lifecycle: open the tunnel, then the pool; close the pool, then the tunnel.
//!
//! [`Lifecycle::start`] is the only place the tunnel and the pool are
//! created, and [`ProcessState::stop`] the only place they are destroyed.
//! `stop` consumes the state, so teardown happens at most once.

use crate::error::{PetsResult, StartupError, StartupStage};
use crate::models::AppConfig;
use crate::services::lookup::PetStore;
use crate::services::pool::ConnectionPool;
use crate::services::tunnel::{SshTunnelService, TunnelHandle};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A live port forward the pool connects through.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Local port the pool should connect to.
    fn local_port(&self) -> u16;

    /// Close the forward, then the transport.
    async fn close(self: Box<Self>) -> PetsResult<()>;
}

#[async_trait]
impl Tunnel for TunnelHandle {
    fn local_port(&self) -> u16 {
        TunnelHandle::local_port(self)
    }

    async fn close(self: Box<Self>) -> PetsResult<()> {
        TunnelHandle::close(*self).await
    }
}

/// Opens the resources the service depends on.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the tunnel to the database host.
    async fn open_tunnel(&self, config: &AppConfig) -> PetsResult<Box<dyn Tunnel>>;

    /// Open the connection pool through the tunnel's local port.
    async fn open_store(&self, config: &AppConfig, local_port: u16)
        -> PetsResult<Arc<dyn PetStore>>;
}

/// Production connector: russh tunnel plus deadpool-postgres pool.
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn open_tunnel(&self, config: &AppConfig) -> PetsResult<Box<dyn Tunnel>> {
        let handle = SshTunnelService::open(
            &config.tunnel,
            &config.database.host,
            config.database.port,
            config.options.local_port,
            config.options.connect_timeout,
        )
        .await?;
        Ok(Box::new(handle))
    }

    async fn open_store(
        &self,
        config: &AppConfig,
        local_port: u16,
    ) -> PetsResult<Arc<dyn PetStore>> {
        let pool = ConnectionPool::open(
            &config.database.via_local_port(local_port),
            config.options.pool_size,
            config.options.acquire_timeout,
            config.options.connect_timeout,
        )
        .await?;
        Ok(Arc::new(pool))
    }
}

/// Process-wide resources, created once by [`Lifecycle::start`].
pub struct ProcessState {
    tunnel: Box<dyn Tunnel>,
    store: Arc<dyn PetStore>,
    shutdown_grace: Duration,
}

impl ProcessState {
    /// Shared handle to the pool for request handlers.
    pub fn store(&self) -> Arc<dyn PetStore> {
        self.store.clone()
    }

    /// Local port the tunnel listens on.
    pub fn local_port(&self) -> u16 {
        self.tunnel.local_port()
    }

    /// Close the pool, then the tunnel.
    ///
    /// Failures are logged and never stop the next step.
    pub async fn stop(self) {
        tracing::info!("Shutting down: closing connection pool");
        self.store.close(self.shutdown_grace).await;

        tracing::info!("Shutting down: closing SSH tunnel");
        if let Err(e) = self.tunnel.close().await {
            tracing::error!(error = %e.chain(), "Failed to close SSH tunnel cleanly");
        }

        tracing::info!("Shutdown complete");
    }
}

/// Startup sequencing.
pub struct Lifecycle;

impl Lifecycle {
    /// Open the tunnel, then the pool through it.
    ///
    /// If the pool fails to open, the tunnel is closed before returning.
    pub async fn start(
        connector: &dyn Connector,
        config: &AppConfig,
    ) -> Result<ProcessState, StartupError> {
        config.validate().map_err(|e| StartupError::new(StartupStage::Config, e))?;

        let tunnel = connector
            .open_tunnel(config)
            .await
            .map_err(|e| StartupError::new(StartupStage::Tunnel, e))?;
        let local_port = tunnel.local_port();

        let store = match connector.open_store(config, local_port).await {
            Ok(store) => store,
            Err(e) => {
                if let Err(close_err) = tunnel.close().await {
                    tracing::warn!(
                        error = %close_err.chain(),
                        "Failed to close SSH tunnel after pool startup failure"
                    );
                }
                return Err(StartupError::new(StartupStage::Pool, e));
            }
        };

        tracing::info!(local_port, "Service resources ready");

        Ok(ProcessState {
            tunnel,
            store,
            shutdown_grace: config.options.shutdown_grace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, PetsError};
    use crate::models::{DatabaseConfig, PoolStatus, ServiceOptions, TunnelConfig};
    use crate::testing::FakeManager;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Events = Arc<Mutex<Vec<&'static str>>>;

    fn config() -> AppConfig {
        AppConfig {
            tunnel: TunnelConfig::new("bastion", "deploy", "/keys/id_ed25519"),
            database: DatabaseConfig::new("10.0.0.5", "pets", "secret", "petsdb"),
            options: ServiceOptions {
                acquire_timeout: Duration::from_millis(100),
                shutdown_grace: Duration::from_millis(200),
                ..ServiceOptions::default()
            },
        }
    }

    struct FakeTunnel {
        events: Events,
        open_tunnels: Arc<AtomicUsize>,
        fail_close: bool,
    }

    #[async_trait]
    impl Tunnel for FakeTunnel {
        fn local_port(&self) -> u16 {
            15432
        }

        async fn close(self: Box<Self>) -> PetsResult<()> {
            self.events.lock().push("tunnel.close");
            self.open_tunnels.fetch_sub(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(PetsError::ssh("session already gone"));
            }
            Ok(())
        }
    }

    /// Wraps the fake pool to record when it is closed.
    struct RecordingStore {
        inner: ConnectionPool<FakeManager>,
        events: Events,
    }

    #[async_trait]
    impl PetStore for RecordingStore {
        async fn fetch_pets(&self, phone: &str) -> PetsResult<Option<Value>> {
            PetStore::fetch_pets(&self.inner, phone).await
        }

        fn status(&self) -> PoolStatus {
            self.inner.status()
        }

        async fn close(&self, grace: Duration) {
            self.events.lock().push("pool.close");
            self.inner.close(grace).await
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        events: Events,
        manager: FakeManager,
        open_tunnels: Arc<AtomicUsize>,
        fail_tunnel: bool,
        fail_store: bool,
        fail_tunnel_close: bool,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn open_tunnel(&self, _config: &AppConfig) -> PetsResult<Box<dyn Tunnel>> {
            if self.fail_tunnel {
                return Err(PetsError::ssh("host unreachable"));
            }
            self.events.lock().push("tunnel.open");
            self.open_tunnels.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeTunnel {
                events: self.events.clone(),
                open_tunnels: self.open_tunnels.clone(),
                fail_close: self.fail_tunnel_close,
            }))
        }

        async fn open_store(
            &self,
            config: &AppConfig,
            local_port: u16,
        ) -> PetsResult<Arc<dyn PetStore>> {
            assert_eq!(local_port, 15432);
            assert_eq!(self.open_tunnels.load(Ordering::SeqCst), 1, "pool opened without tunnel");
            if self.fail_store {
                return Err(PetsError::connection("password authentication failed"));
            }
            self.events.lock().push("pool.open");
            let inner = ConnectionPool::with_manager(
                self.manager.clone(),
                config.options.pool_size,
                config.options.acquire_timeout,
                config.options.connect_timeout,
            )
            .await?;
            Ok(Arc::new(RecordingStore { inner, events: self.events.clone() }))
        }
    }

    #[tokio::test]
    async fn test_start_then_stop_releases_everything() {
        let connector = FakeConnector::default();
        let state = Lifecycle::start(&connector, &config()).await.unwrap();
        assert_eq!(state.local_port(), 15432);
        assert_eq!(connector.manager.live(), 1);
        assert_eq!(connector.open_tunnels.load(Ordering::SeqCst), 1);

        state.stop().await;

        assert_eq!(
            *connector.events.lock(),
            vec!["tunnel.open", "pool.open", "pool.close", "tunnel.close"]
        );
        assert_eq!(connector.manager.live(), 0);
        assert_eq!(connector.open_tunnels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_acquire_after_stop_fails_fast() {
        let connector = FakeConnector::default();
        let state = Lifecycle::start(&connector, &config()).await.unwrap();
        let store = state.store();

        state.stop().await;

        let result = tokio::time::timeout(Duration::from_secs(1), store.fetch_pets("1"))
            .await
            .expect("lookup after stop must not hang");
        assert!(matches!(result, Err(PetsError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_tunnel_failure_opens_nothing() {
        let connector = FakeConnector { fail_tunnel: true, ..Default::default() };

        let err = Lifecycle::start(&connector, &config()).await.err().expect("start should fail");
        assert_eq!(err.stage, StartupStage::Tunnel);
        assert_eq!(err.kind(), ErrorKind::FatalStartup);
        assert!(connector.events.lock().is_empty());
        assert_eq!(connector.manager.created(), 0);
    }

    #[tokio::test]
    async fn test_pool_failure_closes_tunnel() {
        let connector = FakeConnector { fail_store: true, ..Default::default() };

        let err = Lifecycle::start(&connector, &config()).await.err().expect("start should fail");
        assert_eq!(err.stage, StartupStage::Pool);
        assert_eq!(*connector.events.lock(), vec!["tunnel.open", "tunnel.close"]);
        assert_eq!(connector.open_tunnels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_tunnel() {
        let connector = FakeConnector::default();
        let mut config = config();
        config.database.user.clear();

        let err = Lifecycle::start(&connector, &config).await.err().expect("start should fail");
        assert_eq!(err.stage, StartupStage::Config);
        assert!(connector.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_continues_past_tunnel_close_failure() {
        let connector = FakeConnector { fail_tunnel_close: true, ..Default::default() };
        let state = Lifecycle::start(&connector, &config()).await.unwrap();

        state.stop().await;

        assert_eq!(
            *connector.events.lock(),
            vec!["tunnel.open", "pool.open", "pool.close", "tunnel.close"]
        );
        assert_eq!(connector.manager.live(), 0);
    }
}
