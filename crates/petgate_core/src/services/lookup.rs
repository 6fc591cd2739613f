//! Pet lookup by phone number.
//!
//! The lookup itself lives in the database as
//! `get_user_pets_by_user_phone(phone)`; this module borrows one pooled
//! connection, calls it, and classifies the outcome.

use crate::error::{PetsError, PetsResult};
use crate::models::{HandlerResponse, PoolStatus};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The one query this service issues.
///
/// `json` rather than `jsonb` keeps the procedure's key order.
pub const LOOKUP_SQL: &str = "SELECT get_user_pets_by_user_phone($1)::json";

/// Source of pet records, backed by a connection pool.
#[async_trait]
pub trait PetStore: Send + Sync {
    /// Borrow a connection, run the lookup, and return the connection.
    ///
    /// `Ok(None)` means the lookup ran and found nothing.
    async fn fetch_pets(&self, phone: &str) -> PetsResult<Option<Value>>;

    /// Current pool status.
    fn status(&self) -> PoolStatus;

    /// Stop handing out connections and drain in-flight ones for up to `grace`.
    async fn close(&self, grace: Duration);
}

/// Request handler for pet lookups.
pub struct LookupService;

impl LookupService {
    /// Look up the pets registered to `user_phone`.
    ///
    /// The phone number is passed through unvalidated. The lookup runs on its
    /// own task, so a caller that goes away mid-request does not cancel the
    /// query and the connection still returns to the pool.
    pub async fn handle(store: Arc<dyn PetStore>, user_phone: String) -> HandlerResponse {
        let started = Instant::now();
        let task = tokio::spawn(async move { store.fetch_pets(&user_phone).await });

        let response = match task.await {
            Ok(Ok(Some(payload))) => HandlerResponse::Success(payload),
            Ok(Ok(None)) => {
                tracing::debug!("Pet lookup found no user");
                HandlerResponse::not_found()
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    category = e.category(),
                    code = e.pg_code().unwrap_or(""),
                    error = %e.chain(),
                    "Pet lookup failed"
                );
                HandlerResponse::from_error(&e)
            }
            Err(join_error) => {
                let e = PetsError::internal(format!("lookup task failed: {join_error}"));
                tracing::error!(error = %e, "Pet lookup task did not complete");
                HandlerResponse::from_error(&e)
            }
        };

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            success = response.is_success(),
            "Pet lookup handled"
        );
        response
    }
}
