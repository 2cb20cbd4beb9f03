//! Durable job queue seam.
//!
//! Sends, deferred retries and post-conversion flows leave the engine as jobs.
//! The consumer of those jobs (the transport) lives outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::Action;

/// Error types for queues.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// Work handed to the queue consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum JobPayload {
    /// Deliver a text to a contact
    SendMessage {
        workspace_id: String,
        contact_id: String,
        conversation_id: String,
        action: Action,
        text: String,
    },
    /// Re-attempt automated handling of a contact
    Dispatch {
        workspace_id: String,
        contact_id: String,
        reason: String,
    },
    /// Start an automation flow
    FlowRun {
        workspace_id: String,
        contact_id: String,
        flow_id: String,
        variables: serde_json::Value,
    },
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::SendMessage { .. } => "send_message",
            JobPayload::Dispatch { .. } => "dispatch",
            JobPayload::FlowRun { .. } => "flow_run",
        }
    }
}

/// A job as accepted by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub id: String,
    pub payload: JobPayload,
    pub delay_ms: u64,
}

/// Durable queue with an explicit lifecycle.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job, optionally delayed; returns the job id.
    async fn enqueue(&self, payload: JobPayload, delay: Option<Duration>) -> Result<String, QueueError>;

    /// Jobs accepted but not yet consumed.
    async fn waiting_count(&self) -> Result<usize, QueueError>;

    /// Stop accepting jobs.
    async fn close(&self) -> Result<(), QueueError>;
}

/// In-process queue that keeps every accepted job until taken.
pub struct MemoryQueue {
    jobs: Mutex<Vec<QueuedJob>>,
    open: AtomicBool,
    available: AtomicBool,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    /// Create an open queue.
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            available: AtomicBool::new(true),
        }
    }

    /// Reopen after `close`.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Simulate a broker outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Copy of the accepted jobs.
    pub async fn jobs(&self) -> Vec<QueuedJob> {
        self.jobs.lock().await.clone()
    }

    /// Drain the accepted jobs, as a consumer would.
    pub async fn take_jobs(&self) -> Vec<QueuedJob> {
        std::mem::take(&mut *self.jobs.lock().await)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, payload: JobPayload, delay: Option<Duration>) -> Result<String, QueueError> {
        if !self.is_open() {
            return Err(QueueError::Closed);
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("broker unreachable".to_string()));
        }

        let job = QueuedJob {
            id: uuid::Uuid::new_v4().to_string(),
            delay_ms: delay.map_or(0, |d| d.as_millis() as u64),
            payload,
        };
        debug!(job_id = %job.id, kind = job.payload.kind(), delay_ms = job.delay_ms, "Job enqueued");

        let id = job.id.clone();
        self.jobs.lock().await.push(job);
        Ok(id)
    }

    async fn waiting_count(&self) -> Result<usize, QueueError> {
        Ok(self.jobs.lock().await.len())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch() -> JobPayload {
        JobPayload::Dispatch {
            workspace_id: "ws".to_string(),
            contact_id: "c1".to_string(),
            reason: "retry".to_string(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_records_delay() {
        let queue = MemoryQueue::new();
        queue
            .enqueue(dispatch(), Some(Duration::from_secs(1800)))
            .await
            .unwrap();
        let jobs = queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].delay_ms, 1_800_000);
        assert_eq!(queue.waiting_count().await.unwrap(), 1);

        assert_eq!(queue.take_jobs().await.len(), 1);
        assert_eq!(queue.waiting_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let queue = MemoryQueue::new();
        queue.close().await.unwrap();
        assert!(matches!(queue.enqueue(dispatch(), None).await, Err(QueueError::Closed)));
        queue.open();
        assert!(queue.enqueue(dispatch(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_queue_rejects() {
        let queue = MemoryQueue::new();
        queue.set_available(false);
        assert!(matches!(
            queue.enqueue(dispatch(), None).await,
            Err(QueueError::Unavailable(_))
        ));
    }

    #[test]
    fn test_payload_is_tagged() {
        let json = serde_json::to_value(dispatch()).unwrap();
        assert_eq!(json["type"], "dispatch");
        assert_eq!(json["contactId"], "c1");
    }
}
