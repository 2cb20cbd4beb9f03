//! Retry scheduler - dispatch now, dispatch later, or refuse.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::ledger::{EventLedger, NewEvent};
use crate::queue::{JobPayload, JobQueue, QueueError};
use crate::store::CrmStore;
use crate::types::{AutopilotError, EventAction, EventMeta, EventStatus, Result};

/// Why the scheduler did what it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryReason {
    #[serde(rename = "retry_already_scheduled")]
    AlreadyScheduled,
    #[serde(rename = "rate_limited_error_1h")]
    RateLimited,
    #[serde(rename = "cooldown_5m")]
    Cooldown,
    #[serde(rename = "dispatched")]
    Dispatched,
    #[serde(rename = "dispatch_failed")]
    DispatchFailed,
}

impl RetryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryReason::AlreadyScheduled => "retry_already_scheduled",
            RetryReason::RateLimited => "rate_limited_error_1h",
            RetryReason::Cooldown => "cooldown_5m",
            RetryReason::Dispatched => "dispatched",
            RetryReason::DispatchFailed => "dispatch_failed",
        }
    }
}

/// Result of `retry_contact`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOutcome {
    pub queued: bool,
    pub scheduled: bool,
    pub delay_ms: Option<u64>,
    pub reason: RetryReason,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Per-contact retry with cooldown and error backoff.
pub struct RetryScheduler {
    crm: Arc<dyn CrmStore>,
    ledger: EventLedger,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    config: Arc<RuntimeConfig>,
}

impl RetryScheduler {
    pub fn new(
        crm: Arc<dyn CrmStore>,
        ledger: EventLedger,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            crm,
            ledger,
            queue,
            clock,
            config,
        }
    }

    /// Decide whether the contact can be retried now.
    ///
    /// `next_retry_at` is read and then written without a lock; two concurrent
    /// calls for one contact can both schedule.
    pub async fn retry_contact(&self, workspace_id: &str, contact_id: &str) -> Result<RetryOutcome> {
        let workspace = self
            .crm
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| AutopilotError::WorkspaceNotFound(workspace_id.to_string()))?;
        if workspace.is_suspended() {
            return Err(AutopilotError::BillingSuspended(workspace_id.to_string()));
        }
        let contact = self
            .crm
            .get_contact(workspace_id, contact_id)
            .await?
            .ok_or_else(|| AutopilotError::ContactNotFound(contact_id.to_string()))?;

        let now = self.clock.now();
        let policy = &self.config.retry;

        if let Some(next_retry_at) = contact.next_retry_at.filter(|at| *at > now) {
            info!(
                workspace_id = %workspace_id,
                contact_id = %contact_id,
                next_retry_at = %next_retry_at,
                "Retry already scheduled"
            );
            return Ok(RetryOutcome {
                queued: false,
                scheduled: false,
                delay_ms: None,
                reason: RetryReason::AlreadyScheduled,
                next_retry_at: Some(next_retry_at),
            });
        }

        // Error backoff takes precedence over the cooldown
        let errors = self
            .ledger
            .errors_since(workspace_id, contact_id, now - policy.error_window())
            .await?;
        if errors >= policy.error_threshold {
            return self
                .schedule(workspace_id, contact_id, now, policy.error_backoff(), RetryReason::RateLimited)
                .await;
        }

        if let Some(latest) = self.ledger.latest(workspace_id, contact_id).await? {
            let elapsed = (now - latest.created_at).max(Duration::zero());
            if elapsed < policy.cooldown() {
                return self
                    .schedule(
                        workspace_id,
                        contact_id,
                        now,
                        policy.cooldown() - elapsed,
                        RetryReason::Cooldown,
                    )
                    .await;
            }
        }

        self.dispatch_now(workspace_id, contact_id).await
    }

    async fn schedule(
        &self,
        workspace_id: &str,
        contact_id: &str,
        now: DateTime<Utc>,
        delay: Duration,
        reason: RetryReason,
    ) -> Result<RetryOutcome> {
        let delay_ms = delay.num_milliseconds().max(0) as u64;
        let next_retry_at = now + Duration::milliseconds(delay_ms as i64);
        let payload = JobPayload::Dispatch {
            workspace_id: workspace_id.to_string(),
            contact_id: contact_id.to_string(),
            reason: reason.as_str().to_string(),
        };

        let job_id = match self
            .queue
            .enqueue(payload, Some(std::time::Duration::from_millis(delay_ms)))
            .await
        {
            Ok(job_id) => job_id,
            Err(e) => return self.dispatch_failed(workspace_id, contact_id, e).await,
        };

        self.crm
            .set_next_retry_at(workspace_id, contact_id, Some(next_retry_at))
            .await?;
        self.ledger
            .append(
                NewEvent::new(
                    workspace_id,
                    contact_id,
                    EventAction::Scheduled,
                    EventStatus::Scheduled,
                    EventMeta::Schedule {
                        next_retry_at,
                        delay_ms,
                        job_id,
                    },
                )
                .with_reason(reason.as_str()),
            )
            .await?;

        info!(
            workspace_id = %workspace_id,
            contact_id = %contact_id,
            reason = reason.as_str(),
            delay_ms = delay_ms,
            "Retry scheduled"
        );
        Ok(RetryOutcome {
            queued: true,
            scheduled: true,
            delay_ms: Some(delay_ms),
            reason,
            next_retry_at: Some(next_retry_at),
        })
    }

    async fn dispatch_now(&self, workspace_id: &str, contact_id: &str) -> Result<RetryOutcome> {
        let payload = JobPayload::Dispatch {
            workspace_id: workspace_id.to_string(),
            contact_id: contact_id.to_string(),
            reason: RetryReason::Dispatched.as_str().to_string(),
        };
        if let Err(e) = self.queue.enqueue(payload, None).await {
            return self.dispatch_failed(workspace_id, contact_id, e).await;
        }

        self.crm.set_next_retry_at(workspace_id, contact_id, None).await?;
        info!(workspace_id = %workspace_id, contact_id = %contact_id, "Retry dispatched");
        Ok(RetryOutcome {
            queued: true,
            scheduled: false,
            delay_ms: None,
            reason: RetryReason::Dispatched,
            next_retry_at: None,
        })
    }

    async fn dispatch_failed(
        &self,
        workspace_id: &str,
        contact_id: &str,
        error: QueueError,
    ) -> Result<RetryOutcome> {
        warn!(
            workspace_id = %workspace_id,
            contact_id = %contact_id,
            error = %error,
            "Retry enqueue failed"
        );
        self.ledger
            .append(
                NewEvent::new(
                    workspace_id,
                    contact_id,
                    EventAction::Retry,
                    EventStatus::Error,
                    EventMeta::Failure {
                        conversation_id: None,
                        error: error.to_string(),
                    },
                )
                .with_reason(RetryReason::DispatchFailed.as_str()),
            )
            .await?;

        Ok(RetryOutcome {
            queued: false,
            scheduled: false,
            delay_ms: None,
            reason: RetryReason::DispatchFailed,
            next_retry_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;
    use crate::types::{BillingStatus, Contact, Workspace};
    use chrono::TimeZone;

    struct Harness {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        clock: Arc<FixedClock>,
        scheduler: RetryScheduler,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.insert_workspace(Workspace::new("ws"));
        store.insert_contact(Contact::new("ws", "c1", "+55"));
        let queue = Arc::new(MemoryQueue::new());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()));
        let ledger = EventLedger::new(store.clone(), clock.clone());
        let scheduler = RetryScheduler::new(
            store.clone(),
            ledger,
            queue.clone(),
            clock.clone(),
            Arc::new(RuntimeConfig::default()),
        );
        Harness {
            store,
            queue,
            clock,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_clean_contact_dispatches_now() {
        let h = harness();
        let outcome = h.scheduler.retry_contact("ws", "c1").await.unwrap();
        assert!(outcome.queued);
        assert!(!outcome.scheduled);
        assert_eq!(outcome.reason, RetryReason::Dispatched);
        assert_eq!(h.queue.jobs().await[0].delay_ms, 0);
    }

    #[tokio::test]
    async fn test_suspended_workspace_errors() {
        let h = harness();
        let mut workspace = Workspace::new("ws");
        workspace.billing_status = BillingStatus::Suspended;
        h.store.insert_workspace(workspace);
        assert!(matches!(
            h.scheduler.retry_contact("ws", "c1").await,
            Err(AutopilotError::BillingSuspended(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_contact_errors() {
        let h = harness();
        assert!(matches!(
            h.scheduler.retry_contact("ws", "ghost").await,
            Err(AutopilotError::ContactNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_queue_failure_is_recorded() {
        let h = harness();
        h.queue.set_available(false);
        let outcome = h.scheduler.retry_contact("ws", "c1").await.unwrap();
        assert!(!outcome.queued);
        assert_eq!(outcome.reason, RetryReason::DispatchFailed);
        assert_eq!(h.store.event_count().await, 1);

        // The failure counts toward the error window and the cooldown
        h.queue.set_available(true);
        h.clock.advance(Duration::minutes(1));
        let next = h.scheduler.retry_contact("ws", "c1").await.unwrap();
        assert_eq!(next.reason, RetryReason::Cooldown);
        assert_eq!(next.delay_ms, Some(4 * 60 * 1000));
    }
}
