//! One supplier call for one job, classified into an outcome.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::credential::{self, Credential};
use crate::gateway::{GatewayError, SupplierGateway, SupplierStatus};
use crate::job::ReconciliationJob;

/// Why a job has to be tried again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    /// The supplier has not finished the upstream order yet.
    StillProcessing,
    /// The supplier answered unsuccessfully for some other reason.
    SupplierFailure(String),
    /// Network, HTTP or decoding failure.
    Gateway(GatewayError),
    /// The hard timeout around the supplier call fired.
    Timeout(Duration),
    /// The worker task itself panicked.
    WorkerPanicked(String),
    /// Delivered, but the order store rejected the completion writes.
    StoreFailure(String),
}

impl RetryReason {
    /// Processing is the expected "not yet"; everything else is an
    /// infrastructure failure.
    pub fn is_processing(&self) -> bool {
        matches!(self, RetryReason::StillProcessing)
    }
}

impl std::fmt::Display for RetryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryReason::StillProcessing => f.write_str("supplier still processing"),
            RetryReason::SupplierFailure(desc) => write!(f, "supplier failure: {desc}"),
            RetryReason::Gateway(err) => write!(f, "{err}"),
            RetryReason::Timeout(after) => write!(f, "supplier call timed out after {after:?}"),
            RetryReason::WorkerPanicked(msg) => write!(f, "worker panicked: {msg}"),
            RetryReason::StoreFailure(msg) => write!(f, "order store failure: {msg}"),
        }
    }
}

/// Result of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(Vec<Credential>),
    Retry(RetryReason),
    /// Transient again, with no budget left.
    Exhausted(RetryReason),
}

impl Outcome {
    /// Classify a transient result against what is left of the job's budget.
    pub fn transient(job: &ReconciliationJob, reason: RetryReason) -> Self {
        if job.is_last_attempt() {
            Outcome::Exhausted(reason)
        } else {
            Outcome::Retry(reason)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed(_) => "completed",
            Outcome::Retry(_) => "retry",
            Outcome::Exhausted(_) => "exhausted",
        }
    }
}

/// Performs the supplier call for a job. Never fails: every error becomes an
/// [`Outcome`].
#[derive(Clone)]
pub struct ReconciliationWorker {
    gateway: Arc<dyn SupplierGateway>,
    timeout: Duration,
}

impl ReconciliationWorker {
    pub fn new(gateway: Arc<dyn SupplierGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    pub async fn reconcile(&self, job: &ReconciliationJob) -> Outcome {
        let call = self
            .gateway
            .fetch_fulfillment(&job.upstream_reference, &job.supplier_credential_token);

        let reason = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(SupplierStatus::Delivered(items))) => {
                debug!(
                    order_id = %job.order_id,
                    items = items.len(),
                    "supplier delivered"
                );
                return Outcome::Completed(credential::parse_all(items));
            }
            Ok(Ok(SupplierStatus::StillProcessing)) => {
                debug!(
                    order_id = %job.order_id,
                    attempts = job.attempts,
                    "supplier still processing"
                );
                RetryReason::StillProcessing
            }
            Ok(Ok(SupplierStatus::Failed(description))) => {
                warn!(
                    order_id = %job.order_id,
                    upstream_reference = %job.upstream_reference,
                    attempts = job.attempts,
                    description = %description,
                    "supplier reported failure"
                );
                RetryReason::SupplierFailure(description)
            }
            Ok(Err(error)) => {
                warn!(
                    order_id = %job.order_id,
                    upstream_reference = %job.upstream_reference,
                    attempts = job.attempts,
                    error = %error,
                    "supplier call failed"
                );
                RetryReason::Gateway(error)
            }
            Err(_) => {
                warn!(
                    order_id = %job.order_id,
                    upstream_reference = %job.upstream_reference,
                    attempts = job.attempts,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "supplier call timed out"
                );
                RetryReason::Timeout(self.timeout)
            }
        };

        Outcome::transient(job, reason)
    }
}

impl std::fmt::Debug for ReconciliationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationWorker")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use storefront_core::OrderId;

    struct Fixed(Result<SupplierStatus, GatewayError>);

    #[async_trait]
    impl SupplierGateway for Fixed {
        async fn fetch_fulfillment(
            &self,
            _upstream_reference: &str,
            _credential_token: &str,
        ) -> Result<SupplierStatus, GatewayError> {
            self.0.clone()
        }
    }

    struct Hangs;

    #[async_trait]
    impl SupplierGateway for Hangs {
        async fn fetch_fulfillment(
            &self,
            _upstream_reference: &str,
            _credential_token: &str,
        ) -> Result<SupplierStatus, GatewayError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(SupplierStatus::StillProcessing)
        }
    }

    fn worker(answer: Result<SupplierStatus, GatewayError>) -> ReconciliationWorker {
        ReconciliationWorker::new(Arc::new(Fixed(answer)), Duration::from_secs(10))
    }

    fn job(attempts: u32) -> ReconciliationJob {
        let mut job = ReconciliationJob::new(OrderId::new("ord-1"), "up-1", "tok", 15, Utc::now());
        job.attempts = attempts;
        job
    }

    #[tokio::test]
    async fn delivery_is_parsed() {
        let outcome = worker(Ok(SupplierStatus::Delivered(vec![
            "username:alice password:secret".to_string(),
        ])))
        .reconcile(&job(0))
        .await;

        let Outcome::Completed(credentials) = &outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(credentials.len(), 1);
        assert_eq!(credentials[0].username.as_deref(), Some("alice"));
        assert_eq!(credentials[0].password.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn processing_retries_until_budget_is_spent() {
        let w = worker(Ok(SupplierStatus::StillProcessing));
        assert_eq!(
            w.reconcile(&job(0)).await,
            Outcome::Retry(RetryReason::StillProcessing)
        );
        assert_eq!(
            w.reconcile(&job(14)).await,
            Outcome::Exhausted(RetryReason::StillProcessing)
        );
    }

    #[tokio::test]
    async fn failures_exhaust_on_the_last_attempt() {
        let w = worker(Err(GatewayError::Transport("connection reset".to_string())));
        assert!(matches!(w.reconcile(&job(13)).await, Outcome::Retry(_)));
        assert!(matches!(
            w.reconcile(&job(14)).await,
            Outcome::Exhausted(RetryReason::Gateway(_))
        ));

        let w = worker(Ok(SupplierStatus::Failed("out of stock".to_string())));
        assert_eq!(
            w.reconcile(&job(0)).await,
            Outcome::Retry(RetryReason::SupplierFailure("out of stock".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_supplier_call_times_out() {
        let w = ReconciliationWorker::new(Arc::new(Hangs), Duration::from_secs(10));
        let started = tokio::time::Instant::now();

        let outcome = w.reconcile(&job(0)).await;

        assert_eq!(
            outcome,
            Outcome::Retry(RetryReason::Timeout(Duration::from_secs(10)))
        );
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
    }
}
