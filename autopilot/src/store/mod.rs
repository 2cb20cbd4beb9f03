//! Persistence seams.
//!
//! The engine reads CRM state through [`CrmStore`] and writes its decision log
//! through [`LedgerStore`]. Both are async traits so a database-backed store can
//! sit behind the same engine; [`MemoryStore`] implements both in process.

mod memory;

pub use memory::{MemoryStore, Snapshot};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    AutopilotEvent, Contact, Conversation, EventAction, EventStatus, Message, Workspace,
};

/// Error types for stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of a unique conversion insert.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionInsert {
    Inserted,
    /// The `(workspace, orderId)` key was taken; carries the existing entry
    Duplicate(AutopilotEvent),
}

/// Windowed ledger query.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub workspace_id: String,
    pub contact_id: Option<String>,
    pub status: Option<EventStatus>,
    /// Only outreach entries (no retry, scheduling or conversion records)
    pub outreach_only: bool,
    pub since: DateTime<Utc>,
}

impl EventQuery {
    pub fn workspace(workspace_id: impl Into<String>, since: DateTime<Utc>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            contact_id: None,
            status: None,
            outreach_only: false,
            since,
        }
    }

    pub fn contact(mut self, contact_id: impl Into<String>) -> Self {
        self.contact_id = Some(contact_id.into());
        self
    }

    pub fn status(mut self, status: EventStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn outreach(mut self) -> Self {
        self.outreach_only = true;
        self
    }

    pub fn matches(&self, event: &AutopilotEvent) -> bool {
        event.workspace_id == self.workspace_id
            && event.created_at >= self.since
            && self
                .contact_id
                .as_ref()
                .map_or(true, |id| &event.contact_id == id)
            && self.status.map_or(true, |status| event.status == status)
            && (!self.outreach_only || matches!(event.action, EventAction::Outreach(_)))
    }
}

/// CRM reads and the few writes the engine performs on CRM entities.
#[async_trait]
pub trait CrmStore: Send + Sync {
    async fn get_workspace(&self, workspace_id: &str) -> StoreResult<Option<Workspace>>;

    /// Flip the autopilot switch; returns the updated workspace.
    async fn set_autopilot_enabled(&self, workspace_id: &str, enabled: bool)
        -> StoreResult<Workspace>;

    async fn get_contact(&self, workspace_id: &str, contact_id: &str)
        -> StoreResult<Option<Contact>>;

    async fn find_contact_by_phone(&self, workspace_id: &str, phone: &str)
        -> StoreResult<Option<Contact>>;

    async fn update_contact(&self, contact: Contact) -> StoreResult<()>;

    async fn set_next_retry_at(
        &self,
        workspace_id: &str,
        contact_id: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    /// Open conversations with unread inbound messages, oldest activity first.
    async fn unread_conversations(&self, workspace_id: &str, limit: usize)
        -> StoreResult<Vec<Conversation>>;

    /// Open conversations whose last message is outbound and older than
    /// `silent_since`, oldest first.
    async fn stalled_conversations(
        &self,
        workspace_id: &str,
        silent_since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Conversation>>;

    /// Most recently active conversation of a contact.
    async fn latest_conversation(&self, workspace_id: &str, contact_id: &str)
        -> StoreResult<Option<Conversation>>;

    /// Acknowledge `seen` unread messages. Messages that arrived after the
    /// caller's snapshot stay unread.
    async fn mark_conversation_read(
        &self,
        workspace_id: &str,
        conversation_id: &str,
        seen: u32,
    ) -> StoreResult<()>;

    /// Last `limit` messages of a conversation, oldest first.
    async fn recent_messages(
        &self,
        workspace_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Message>>;

    /// Inbound message timestamps since `since`, newest first, at most `limit`.
    async fn inbound_timestamps(
        &self,
        workspace_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<DateTime<Utc>>>;

    /// Record a message and update the conversation's activity counters.
    async fn append_message(&self, message: Message) -> StoreResult<()>;
}

/// Append-only decision log.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append_event(&self, event: AutopilotEvent) -> StoreResult<()>;

    /// Insert a conversion unless its order id is already recorded.
    async fn insert_conversion(&self, event: AutopilotEvent) -> StoreResult<ConversionInsert>;

    async fn find_conversion(&self, workspace_id: &str, order_id: &str)
        -> StoreResult<Option<AutopilotEvent>>;

    /// Most recent entry of a contact, any status.
    async fn latest_event(&self, workspace_id: &str, contact_id: &str)
        -> StoreResult<Option<AutopilotEvent>>;

    async fn count_events(&self, query: &EventQuery) -> StoreResult<usize>;

    /// Entries matching `query`, in creation order.
    async fn events(&self, query: &EventQuery) -> StoreResult<Vec<AutopilotEvent>>;
}
