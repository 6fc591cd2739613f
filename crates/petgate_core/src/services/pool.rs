//! Database connection pooling with deadpool.
//!
//! Provides:
//! - Connection validation on pool creation
//! - Bounded wait when the pool is exhausted
//! - Close that drains in-flight connections within a grace period
//!
//! The pool is generic over a `deadpool::managed::Manager` whose connections
//! can run the pet lookup; production uses `deadpool_postgres::Manager`.

use crate::error::{PetsError, PetsResult};
use crate::models::{DatabaseConfig, PoolStatus};
use crate::services::lookup::{PetStore, LOOKUP_SQL};

use async_trait::async_trait;
use deadpool::managed::{Manager, Object, Pool, PoolError, TimeoutType};
use deadpool::Runtime;
use deadpool_postgres::{ManagerConfig, RecyclingMethod};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_postgres::NoTls;
use uuid::Uuid;

/// How often `close` checks whether in-flight connections came back.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A pooled connection that can run the pet lookup.
#[async_trait]
pub trait LookupConnection: Send + Sync {
    /// Cheap liveness check.
    async fn ping(&self) -> PetsResult<()>;

    /// Run the stored lookup for one phone number.
    async fn fetch_pets(&self, phone: &str) -> PetsResult<Option<Value>>;
}

#[async_trait]
impl LookupConnection for deadpool_postgres::ClientWrapper {
    async fn ping(&self) -> PetsResult<()> {
        self.execute("SELECT 1", &[]).await?;
        Ok(())
    }

    async fn fetch_pets(&self, phone: &str) -> PetsResult<Option<Value>> {
        let statement = self.prepare_cached(LOOKUP_SQL).await?;
        let row = self.query_one(&statement, &[&phone]).await?;
        row.try_get::<_, Option<Value>>(0).map_err(|e| PetsError::Internal {
            message: format!("Unexpected lookup result type: {e}"),
            source: Some(Box::new(e)),
        })
    }
}

/// A bounded pool of database connections.
pub struct ConnectionPool<M: Manager = deadpool_postgres::Manager> {
    /// Identifier used in log events for this pool
    id: Uuid,
    pool: Pool<M>,
}

impl ConnectionPool<deadpool_postgres::Manager> {
    /// Open a PostgreSQL pool and validate it with one test connection.
    ///
    /// # Arguments
    /// * `config` - Database settings, already pointed at the tunnel endpoint
    /// * `max_size` - Maximum number of connections in the pool
    /// * `acquire_timeout` - How long a caller waits when the pool is exhausted
    /// * `connect_timeout` - Bound on establishing each new connection
    pub async fn open(
        config: &DatabaseConfig,
        max_size: usize,
        acquire_timeout: Duration,
        connect_timeout: Duration,
    ) -> PetsResult<Self> {
        config.validate()?;

        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("petgate");
        pg_config.connect_timeout(connect_timeout);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(60));

        let manager = deadpool_postgres::Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig { recycling_method: RecyclingMethod::Fast },
        );

        let pool = Self::with_manager(manager, max_size, acquire_timeout, connect_timeout).await?;
        tracing::info!(
            pool_id = %pool.id,
            database = %config.display_url(),
            max_size,
            "Connection pool created"
        );
        Ok(pool)
    }
}

impl<M> ConnectionPool<M>
where
    M: Manager,
    M::Type: LookupConnection,
    M::Error: std::error::Error + Send + Sync + 'static,
{
    /// Build a pool over any manager and validate it with one test connection.
    pub async fn with_manager(
        manager: M,
        max_size: usize,
        acquire_timeout: Duration,
        create_timeout: Duration,
    ) -> PetsResult<Self> {
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .wait_timeout(Some(acquire_timeout))
            .create_timeout(Some(create_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| PetsError::connection(format!("Failed to create pool: {e}")))?;

        let pool = Self { id: Uuid::new_v4(), pool };

        let conn = pool.acquire().await.map_err(|e| {
            PetsError::connection_with_source("Failed to establish connection", e)
        })?;
        conn.ping().await.map_err(|e| {
            PetsError::connection_with_source("Connection validation failed", e)
        })?;

        Ok(pool)
    }

    /// Get the pool's identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Acquire a connection from the pool.
    ///
    /// Waits up to the configured timeout if the pool is exhausted. Fails
    /// immediately once the pool is closed.
    pub async fn acquire(&self) -> PetsResult<PooledConnection<M>> {
        let obj = self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(TimeoutType::Wait) => {
                let waiting = self.pool.status().waiting;
                PetsError::pool_timeout("No connection became free before the acquire timeout", waiting)
            }
            PoolError::Timeout(TimeoutType::Create) => {
                PetsError::connection("Timed out establishing a database connection")
            }
            PoolError::Timeout(TimeoutType::Recycle) => {
                PetsError::connection("Timed out checking a pooled connection")
            }
            PoolError::Closed => PetsError::PoolClosed,
            PoolError::Backend(e) => {
                PetsError::connection_with_source("Failed to acquire connection", e)
            }
            other => PetsError::internal(format!("Failed to acquire connection: {other}")),
        })?;

        Ok(PooledConnection { obj, pool_id: self.id })
    }

    /// Get current pool status.
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
            closed: self.pool.is_closed(),
        }
    }

    /// Close the pool.
    ///
    /// New acquires fail with [`PetsError::PoolClosed`] right away and idle
    /// connections are dropped. In-flight connections are dropped as they
    /// come back; this waits up to `grace` for that to happen.
    pub async fn close(&self, grace: Duration) {
        self.pool.close();

        let started = Instant::now();
        loop {
            let remaining = self.pool.status().size;
            if remaining == 0 {
                tracing::info!(pool_id = %self.id, "Connection pool closed");
                return;
            }
            if started.elapsed() >= grace {
                tracing::warn!(
                    pool_id = %self.id,
                    in_flight = remaining,
                    grace_ms = grace.as_millis() as u64,
                    "Connection pool closed with connections still in flight"
                );
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Check if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[async_trait]
impl<M> PetStore for ConnectionPool<M>
where
    M: Manager + 'static,
    M::Type: LookupConnection,
    M::Error: std::error::Error + Send + Sync + 'static,
{
    async fn fetch_pets(&self, phone: &str) -> PetsResult<Option<Value>> {
        let conn = self.acquire().await?;
        conn.fetch_pets(phone).await
    }

    fn status(&self) -> PoolStatus {
        ConnectionPool::status(self)
    }

    async fn close(&self, grace: Duration) {
        ConnectionPool::close(self, grace).await
    }
}

/// A connection acquired from the pool.
///
/// Automatically returns to the pool when dropped.
pub struct PooledConnection<M: Manager> {
    obj: Object<M>,
    pool_id: Uuid,
}

impl<M: Manager> PooledConnection<M>
where
    M::Type: LookupConnection,
{
    /// Get the pool this connection belongs to.
    pub fn pool_id(&self) -> Uuid {
        self.pool_id
    }

    /// Cheap liveness check.
    pub async fn ping(&self) -> PetsResult<()> {
        self.obj.ping().await
    }

    /// Run the stored lookup on this connection.
    pub async fn fetch_pets(&self, phone: &str) -> PetsResult<Option<Value>> {
        self.obj.fetch_pets(phone).await
    }
}
