//! In-memory registry of pending reconciliation jobs, keyed by order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use storefront_core::OrderId;

use crate::job::{JobId, JobSnapshot, ReconciliationJob};

/// Pending jobs, at most one per order.
///
/// Not synchronized; the processor owns it behind a mutex. Unbounded.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<OrderId, ReconciliationJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the job for `job.order_id`.
    ///
    /// Replacement starts the order's retry clock over; the replaced job (and
    /// its attempt count) is returned to the caller.
    pub fn enqueue(&mut self, job: ReconciliationJob) -> Option<ReconciliationJob> {
        self.jobs.insert(job.order_id.clone(), job)
    }

    pub fn remove(&mut self, order_id: &OrderId) -> Option<ReconciliationJob> {
        self.jobs.remove(order_id)
    }

    /// Remove the entry only if it is still the job instance `job_id`.
    pub fn remove_if_current(
        &mut self,
        order_id: &OrderId,
        job_id: JobId,
    ) -> Option<ReconciliationJob> {
        if self.is_current(order_id, job_id) {
            self.jobs.remove(order_id)
        } else {
            None
        }
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&ReconciliationJob> {
        self.jobs.get(order_id)
    }

    /// Whether `job_id` is still the live job for `order_id`.
    pub fn is_current(&self, order_id: &OrderId, job_id: JobId) -> bool {
        self.jobs
            .get(order_id)
            .is_some_and(|job| job.job_id == job_id)
    }

    /// Up to `limit` jobs whose retry time has elapsed, earliest first.
    pub fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Vec<ReconciliationJob> {
        let mut due: Vec<_> = self.jobs.values().filter(|j| j.is_due(now)).collect();
        due.sort_by_key(|j| (j.next_retry_at, j.created_at));
        due.into_iter().take(limit).cloned().collect()
    }

    /// Record a transient outcome. Returns `false` (and changes nothing) when
    /// the job was removed or replaced meanwhile.
    pub fn reschedule(
        &mut self,
        order_id: &OrderId,
        job_id: JobId,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
    ) -> bool {
        match self.jobs.get_mut(order_id) {
            Some(job) if job.job_id == job_id => {
                job.attempts = attempts.min(job.max_attempts);
                job.next_retry_at = next_retry_at;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Snapshots of every job, oldest first.
    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<_> = self.jobs.values().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs.into_iter().map(ReconciliationJob::snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job_at(order: &str, now: DateTime<Utc>) -> ReconciliationJob {
        ReconciliationJob::new(OrderId::new(order), format!("up-{order}"), "tok", 15, now)
    }

    #[test]
    fn enqueue_replaces_existing_order() {
        let now = Utc::now();
        let mut registry = JobRegistry::new();

        let mut first = job_at("ord-1", now);
        first.attempts = 4;
        let first_id = first.job_id;
        assert!(registry.enqueue(first).is_none());

        let replaced = registry.enqueue(job_at("ord-1", now)).unwrap();
        assert_eq!(replaced.job_id, first_id);
        assert_eq!(replaced.attempts, 4);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&OrderId::new("ord-1")).unwrap().attempts, 0);
    }

    #[test]
    fn due_jobs_filters_by_time_and_limit() {
        let now = Utc::now();
        let mut registry = JobRegistry::new();
        for i in 0..4 {
            registry.enqueue(job_at(&format!("ord-{i}"), now - Duration::seconds(i)));
        }
        let mut later = job_at("ord-later", now);
        later.next_retry_at = now + Duration::seconds(5);
        registry.enqueue(later);

        let due = registry.due_jobs(now, 10);
        assert_eq!(due.len(), 4);
        assert!(due.iter().all(|j| j.order_id.as_str() != "ord-later"));
        // earliest first
        assert_eq!(due[0].order_id.as_str(), "ord-3");

        assert_eq!(registry.due_jobs(now, 2).len(), 2);
        assert_eq!(registry.due_jobs(now + Duration::seconds(5), 10).len(), 5);
    }

    #[test]
    fn reschedule_ignores_replaced_or_removed_jobs() {
        let now = Utc::now();
        let mut registry = JobRegistry::new();
        let original = job_at("ord-1", now);
        let original_id = original.job_id;
        let order = original.order_id.clone();
        registry.enqueue(original);

        assert!(registry.reschedule(&order, original_id, 1, now + Duration::seconds(1)));
        assert_eq!(registry.get(&order).unwrap().attempts, 1);

        registry.enqueue(job_at("ord-1", now));
        assert!(!registry.reschedule(&order, original_id, 2, now));
        assert_eq!(registry.get(&order).unwrap().attempts, 0);

        registry.remove(&order);
        assert!(!registry.reschedule(&order, original_id, 2, now));
        assert!(registry.is_empty());
    }

    #[test]
    fn reschedule_never_exceeds_max_attempts() {
        let now = Utc::now();
        let mut registry = JobRegistry::new();
        let job = job_at("ord-1", now);
        let (order, id) = (job.order_id.clone(), job.job_id);
        registry.enqueue(job);

        registry.reschedule(&order, id, 99, now);
        assert_eq!(registry.get(&order).unwrap().attempts, 15);
    }

    #[test]
    fn remove_if_current_checks_job_identity() {
        let now = Utc::now();
        let mut registry = JobRegistry::new();
        let stale = job_at("ord-1", now);
        let stale_id = stale.job_id;
        registry.enqueue(stale);
        registry.enqueue(job_at("ord-1", now));

        assert!(registry.remove_if_current(&OrderId::new("ord-1"), stale_id).is_none());
        assert_eq!(registry.len(), 1);
    }
}
