//! Reconciliation job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use storefront_core::OrderId;

/// Unique identifier of one enqueued job instance.
///
/// Re-enqueueing an order creates a new `JobId`, which lets the scheduler tell
/// a replaced job apart from its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One order waiting for the supplier to deliver.
#[derive(Clone)]
pub struct ReconciliationJob {
    pub job_id: JobId,
    pub order_id: OrderId,
    /// Supplier-side order id
    pub upstream_reference: String,
    /// Auth scope for the supplier call. Never logged.
    pub supplier_credential_token: String,
    /// Supplier calls already made and answered with a transient outcome
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationJob {
    /// A fresh job, due immediately.
    pub fn new(
        order_id: OrderId,
        upstream_reference: impl Into<String>,
        supplier_credential_token: impl Into<String>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: JobId::new(),
            order_id,
            upstream_reference: upstream_reference.into(),
            supplier_credential_token: supplier_credential_token.into(),
            attempts: 0,
            max_attempts,
            next_retry_at: now,
            created_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at <= now
    }

    /// True when one more transient outcome would consume the whole budget.
    pub fn is_last_attempt(&self) -> bool {
        self.attempts.saturating_add(1) >= self.max_attempts
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            order_id: self.order_id.clone(),
            attempts: self.attempts,
            next_retry_at: self.next_retry_at,
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for ReconciliationJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationJob")
            .field("job_id", &self.job_id)
            .field("order_id", &self.order_id)
            .field("upstream_reference", &self.upstream_reference)
            .field("supplier_credential_token", &"<redacted>")
            .field("attempts", &self.attempts)
            .field("max_attempts", &self.max_attempts)
            .field("next_retry_at", &self.next_retry_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Read-only view of a job for the admin status page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub order_id: OrderId,
    pub attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
