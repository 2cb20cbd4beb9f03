//! Event ledger - append-only record of every automated decision.
//!
//! The ledger is the source of truth for rate limiting (executed and error
//! counts over rolling windows) and for conversion idempotency. Entries are
//! validated before they are written and never updated afterwards.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::store::{ConversionInsert, EventQuery, LedgerStore};
use crate::types::{AutopilotEvent, EventAction, EventMeta, EventStatus, Intent, Result};

/// An entry before it is stamped with id and time.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub workspace_id: String,
    pub contact_id: String,
    pub intent: Intent,
    pub action: EventAction,
    pub status: EventStatus,
    pub reason: String,
    pub meta: EventMeta,
}

impl NewEvent {
    pub fn new(
        workspace_id: impl Into<String>,
        contact_id: impl Into<String>,
        action: impl Into<EventAction>,
        status: EventStatus,
        meta: EventMeta,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            contact_id: contact_id.into(),
            intent: Intent::Unknown,
            action: action.into(),
            status,
            reason: String::new(),
            meta,
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    fn stamp(self, now: DateTime<Utc>) -> AutopilotEvent {
        AutopilotEvent {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: self.workspace_id,
            contact_id: self.contact_id,
            intent: self.intent,
            action: self.action,
            status: self.status,
            reason: self.reason,
            meta: self.meta,
            created_at: now,
        }
    }
}

/// Validated writes and windowed reads over a [`LedgerStore`].
#[derive(Clone)]
pub struct EventLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl EventLedger {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Validate and append an entry.
    pub async fn append(&self, new: NewEvent) -> Result<AutopilotEvent> {
        let event = new.stamp(self.clock.now());
        event.validate()?;
        self.store.append_event(event.clone()).await?;

        debug!(
            workspace_id = %event.workspace_id,
            contact_id = %event.contact_id,
            action = event.action.as_str(),
            status = ?event.status,
            reason = %event.reason,
            "Ledger entry written"
        );
        Ok(event)
    }

    /// Validate and insert a conversion through the store's unique index.
    pub async fn insert_conversion(&self, new: NewEvent) -> Result<(AutopilotEvent, ConversionInsert)> {
        let event = new.stamp(self.clock.now());
        event.validate()?;
        let outcome = self.store.insert_conversion(event.clone()).await?;
        Ok((event, outcome))
    }

    pub async fn find_conversion(&self, workspace_id: &str, order_id: &str) -> Result<Option<AutopilotEvent>> {
        Ok(self.store.find_conversion(workspace_id, order_id).await?)
    }

    pub async fn latest(&self, workspace_id: &str, contact_id: &str) -> Result<Option<AutopilotEvent>> {
        Ok(self.store.latest_event(workspace_id, contact_id).await?)
    }

    /// Error entries of a contact since `since`.
    pub async fn errors_since(
        &self,
        workspace_id: &str,
        contact_id: &str,
        since: DateTime<Utc>,
    ) -> Result<usize> {
        let query = EventQuery::workspace(workspace_id, since)
            .contact(contact_id)
            .status(EventStatus::Error);
        Ok(self.store.count_events(&query).await?)
    }

    /// Executed sends since `since`, for one contact or the whole
    /// workspace. Conversion and scheduling records don't count.
    pub async fn executed_since(
        &self,
        workspace_id: &str,
        contact_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<usize> {
        let mut query = EventQuery::workspace(workspace_id, since)
            .status(EventStatus::Executed)
            .outreach();
        if let Some(contact_id) = contact_id {
            query = query.contact(contact_id);
        }
        Ok(self.store.count_events(&query).await?)
    }

    /// Entries of a contact since `since`, in creation order.
    pub async fn history(
        &self,
        workspace_id: &str,
        contact_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AutopilotEvent>> {
        let query = EventQuery::workspace(workspace_id, since).contact(contact_id);
        Ok(self.store.events(&query).await?)
    }
}
