//! In-memory stand-ins for the database used by unit tests.

use crate::error::{PetsError, PetsResult};
use crate::services::pool::LookupConnection;

use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, RecycleResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("backend unreachable")]
pub(crate) struct FakeError;

#[derive(Default)]
struct FakeBackend {
    pets: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, String>>,
    lookups_finished: AtomicUsize,
}

/// deadpool manager handing out [`FakeConnection`]s and counting live ones.
#[derive(Clone, Default)]
pub(crate) struct FakeManager {
    backend: Arc<FakeBackend>,
    live: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
    fail_create: bool,
    fail_create_after: Option<usize>,
    lookup_delay: Option<Duration>,
}

impl FakeManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// The first `n` connections are created, later ones fail.
    pub(crate) fn failing_create_after(mut self, n: usize) -> Self {
        self.fail_create_after = Some(n);
        self
    }

    pub(crate) fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    pub(crate) fn with_pets(self, phone: &str, pets: Value) -> Self {
        self.backend.pets.lock().insert(phone.to_string(), pets);
        self
    }

    pub(crate) fn with_failure(self, phone: &str, message: &str) -> Self {
        self.backend.failures.lock().insert(phone.to_string(), message.to_string());
        self
    }

    /// Connections currently alive (idle or checked out).
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Connections created over the manager's lifetime.
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Lookups that ran to completion.
    pub(crate) fn lookups_finished(&self) -> usize {
        self.backend.lookups_finished.load(Ordering::SeqCst)
    }
}

impl Manager for FakeManager {
    type Type = FakeConnection;
    type Error = FakeError;

    async fn create(&self) -> Result<FakeConnection, FakeError> {
        if self.fail_create {
            return Err(FakeError);
        }
        if self.fail_create_after.is_some_and(|n| self.created() >= n) {
            return Err(FakeError);
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            backend: self.backend.clone(),
            live: self.live.clone(),
            lookup_delay: self.lookup_delay,
        })
    }

    async fn recycle(&self, _conn: &mut FakeConnection, _metrics: &Metrics) -> RecycleResult<FakeError> {
        Ok(())
    }
}

pub(crate) struct FakeConnection {
    backend: Arc<FakeBackend>,
    live: Arc<AtomicUsize>,
    lookup_delay: Option<Duration>,
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LookupConnection for FakeConnection {
    async fn ping(&self) -> PetsResult<()> {
        Ok(())
    }

    async fn fetch_pets(&self, phone: &str) -> PetsResult<Option<Value>> {
        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        self.backend.lookups_finished.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.backend.failures.lock().get(phone) {
            return Err(PetsError::connection(message.clone()));
        }
        Ok(self.backend.pets.lock().get(phone).cloned())
    }
}
