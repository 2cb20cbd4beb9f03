//! In-process store backed by `dashmap`, with JSON snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::{ConversionInsert, CrmStore, EventQuery, LedgerStore, StoreError, StoreResult};
use crate::types::{
    AutopilotEvent, Contact, Conversation, ConversationStatus, Direction, EventAction,
    EventStatus, Message, Workspace,
};

type Key = (String, String);

fn key(workspace_id: &str, id: &str) -> Key {
    (workspace_id.to_string(), id.to_string())
}

/// Serializable dump of a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Snapshot {
    pub workspaces: Vec<Workspace>,
    pub contacts: Vec<Contact>,
    pub conversations: Vec<Conversation>,
    pub messages: Vec<Message>,
    pub events: Vec<AutopilotEvent>,
}

impl Snapshot {
    pub fn from_json(json: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// CRM and ledger held in memory.
#[derive(Default)]
pub struct MemoryStore {
    workspaces: DashMap<String, Workspace>,
    contacts: DashMap<Key, Contact>,
    conversations: DashMap<Key, Conversation>,
    messages: RwLock<Vec<Message>>,
    events: RwLock<Vec<AutopilotEvent>>,
    /// (workspace, orderId) -> event id
    conversion_index: DashMap<Key, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot, rebuilding the conversion index.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut store = Self::new();
        for workspace in snapshot.workspaces {
            store.workspaces.insert(workspace.id.clone(), workspace);
        }
        for contact in snapshot.contacts {
            store
                .contacts
                .insert(key(&contact.workspace_id, &contact.id), contact);
        }
        for conversation in snapshot.conversations {
            store.conversations.insert(
                key(&conversation.workspace_id, &conversation.id),
                conversation,
            );
        }
        for event in &snapshot.events {
            if event.action == EventAction::Conversion && event.status == EventStatus::Executed {
                if let Some(order_id) = event.meta.order_id() {
                    store
                        .conversion_index
                        .entry(key(&event.workspace_id, order_id))
                        .or_insert_with(|| event.id.clone());
                }
            }
        }
        store.messages = RwLock::new(snapshot.messages);
        store.events = RwLock::new(snapshot.events);
        store
    }

    pub async fn snapshot(&self) -> Snapshot {
        let mut workspaces: Vec<Workspace> =
            self.workspaces.iter().map(|e| e.value().clone()).collect();
        workspaces.sort_by(|a, b| a.id.cmp(&b.id));
        let mut contacts: Vec<Contact> = self.contacts.iter().map(|e| e.value().clone()).collect();
        contacts.sort_by(|a, b| (&a.workspace_id, &a.id).cmp(&(&b.workspace_id, &b.id)));
        let mut conversations: Vec<Conversation> =
            self.conversations.iter().map(|e| e.value().clone()).collect();
        conversations.sort_by(|a, b| (&a.workspace_id, &a.id).cmp(&(&b.workspace_id, &b.id)));

        Snapshot {
            workspaces,
            contacts,
            conversations,
            messages: self.messages.read().await.clone(),
            events: self.events.read().await.clone(),
        }
    }

    pub fn insert_workspace(&self, workspace: Workspace) {
        self.workspaces.insert(workspace.id.clone(), workspace);
    }

    pub fn insert_contact(&self, contact: Contact) {
        self.contacts
            .insert(key(&contact.workspace_id, &contact.id), contact);
    }

    pub fn insert_conversation(&self, conversation: Conversation) {
        self.conversations.insert(
            key(&conversation.workspace_id, &conversation.id),
            conversation,
        );
    }

    pub fn get_conversation(&self, workspace_id: &str, conversation_id: &str) -> Option<Conversation> {
        self.conversations
            .get(&key(workspace_id, conversation_id))
            .map(|c| c.value().clone())
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Open conversations of a workspace.
    fn open_conversations(&self, workspace_id: &str) -> Vec<Conversation> {
        self.conversations
            .iter()
            .filter(|e| {
                let c = e.value();
                c.workspace_id == workspace_id && c.status == ConversationStatus::Open
            })
            .map(|e| e.value().clone())
            .collect()
    }
}

#[async_trait]
impl CrmStore for MemoryStore {
    async fn get_workspace(&self, workspace_id: &str) -> StoreResult<Option<Workspace>> {
        Ok(self.workspaces.get(workspace_id).map(|w| w.value().clone()))
    }

    async fn set_autopilot_enabled(
        &self,
        workspace_id: &str,
        enabled: bool,
    ) -> StoreResult<Workspace> {
        let mut workspace = self
            .workspaces
            .get_mut(workspace_id)
            .ok_or_else(|| StoreError::not_found("workspace", workspace_id))?;
        workspace.autopilot_enabled = enabled;
        Ok(workspace.clone())
    }

    async fn get_contact(
        &self,
        workspace_id: &str,
        contact_id: &str,
    ) -> StoreResult<Option<Contact>> {
        Ok(self
            .contacts
            .get(&key(workspace_id, contact_id))
            .map(|c| c.value().clone()))
    }

    async fn find_contact_by_phone(
        &self,
        workspace_id: &str,
        phone: &str,
    ) -> StoreResult<Option<Contact>> {
        Ok(self
            .contacts
            .iter()
            .find(|e| e.value().workspace_id == workspace_id && e.value().phone == phone)
            .map(|e| e.value().clone()))
    }

    async fn update_contact(&self, contact: Contact) -> StoreResult<()> {
        let k = key(&contact.workspace_id, &contact.id);
        match self.contacts.get_mut(&k) {
            Some(mut existing) => {
                *existing = contact;
                Ok(())
            }
            None => Err(StoreError::not_found("contact", contact.id)),
        }
    }

    async fn set_next_retry_at(
        &self,
        workspace_id: &str,
        contact_id: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut contact = self
            .contacts
            .get_mut(&key(workspace_id, contact_id))
            .ok_or_else(|| StoreError::not_found("contact", contact_id))?;
        contact.next_retry_at = next_retry_at;
        Ok(())
    }

    async fn unread_conversations(
        &self,
        workspace_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Conversation>> {
        let mut unread: Vec<Conversation> = self
            .open_conversations(workspace_id)
            .into_iter()
            .filter(|c| c.unread_count > 0)
            .collect();
        unread.sort_by(|a, b| a.last_message_at.cmp(&b.last_message_at).then(a.id.cmp(&b.id)));
        unread.truncate(limit);
        Ok(unread)
    }

    async fn stalled_conversations(
        &self,
        workspace_id: &str,
        silent_since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Conversation>> {
        let messages = self.messages.read().await;
        let mut stalled: Vec<(DateTime<Utc>, Conversation)> = self
            .open_conversations(workspace_id)
            .into_iter()
            .filter_map(|conversation| {
                let last = messages
                    .iter()
                    .filter(|m| {
                        m.workspace_id == workspace_id && m.conversation_id == conversation.id
                    })
                    .max_by_key(|m| m.created_at)?;
                (last.direction == Direction::Outbound && last.created_at < silent_since)
                    .then(|| (last.created_at, conversation))
            })
            .collect();
        stalled.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.id.cmp(&b.1.id)));
        Ok(stalled.into_iter().take(limit).map(|(_, c)| c).collect())
    }

    async fn latest_conversation(
        &self,
        workspace_id: &str,
        contact_id: &str,
    ) -> StoreResult<Option<Conversation>> {
        Ok(self
            .conversations
            .iter()
            .filter(|e| e.value().workspace_id == workspace_id && e.value().contact_id == contact_id)
            .map(|e| e.value().clone())
            .max_by(|a, b| a.last_message_at.cmp(&b.last_message_at).then(b.id.cmp(&a.id))))
    }

    async fn mark_conversation_read(
        &self,
        workspace_id: &str,
        conversation_id: &str,
        seen: u32,
    ) -> StoreResult<()> {
        let mut conversation = self
            .conversations
            .get_mut(&key(workspace_id, conversation_id))
            .ok_or_else(|| StoreError::not_found("conversation", conversation_id))?;
        conversation.unread_count = conversation.unread_count.saturating_sub(seen);
        Ok(())
    }

    async fn recent_messages(
        &self,
        workspace_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Message>> {
        let messages = self.messages.read().await;
        let mut matching: Vec<Message> = messages
            .iter()
            .filter(|m| m.workspace_id == workspace_id && m.conversation_id == conversation_id)
            .cloned()
            .collect();
        matching.sort_by_key(|m| m.created_at);
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.split_off(skip))
    }

    async fn inbound_timestamps(
        &self,
        workspace_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<DateTime<Utc>>> {
        let messages = self.messages.read().await;
        let mut stamps: Vec<DateTime<Utc>> = messages
            .iter()
            .filter(|m| {
                m.workspace_id == workspace_id
                    && m.direction == Direction::Inbound
                    && m.created_at >= since
            })
            .map(|m| m.created_at)
            .collect();
        stamps.sort_by(|a, b| b.cmp(a));
        stamps.truncate(limit);
        Ok(stamps)
    }

    async fn append_message(&self, message: Message) -> StoreResult<()> {
        {
            let mut conversation = self
                .conversations
                .get_mut(&key(&message.workspace_id, &message.conversation_id))
                .ok_or_else(|| StoreError::not_found("conversation", &message.conversation_id))?;
            if message.direction == Direction::Inbound {
                conversation.unread_count += 1;
            }
            if conversation
                .last_message_at
                .map_or(true, |last| message.created_at >= last)
            {
                conversation.last_message_at = Some(message.created_at);
            }
        }
        self.messages.write().await.push(message);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append_event(&self, event: AutopilotEvent) -> StoreResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn insert_conversion(&self, event: AutopilotEvent) -> StoreResult<ConversionInsert> {
        let Some(order_id) = event.meta.order_id().map(str::to_string) else {
            self.events.write().await.push(event);
            return Ok(ConversionInsert::Inserted);
        };

        // The index entry is claimed before the append so a concurrent insert
        // of the same order sees the key as taken.
        let claimed = match self.conversion_index.entry(key(&event.workspace_id, &order_id)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(event.id.clone());
                true
            }
        };

        if claimed {
            self.events.write().await.push(event);
            return Ok(ConversionInsert::Inserted);
        }

        debug!(workspace_id = %event.workspace_id, order_id = %order_id, "Conversion key already taken");
        match self.find_conversion(&event.workspace_id, &order_id).await? {
            Some(existing) => Ok(ConversionInsert::Duplicate(existing)),
            // Winner has claimed the key but not appended yet
            None => Ok(ConversionInsert::Duplicate(event)),
        }
    }

    async fn find_conversion(
        &self,
        workspace_id: &str,
        order_id: &str,
    ) -> StoreResult<Option<AutopilotEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .find(|e| {
                e.workspace_id == workspace_id
                    && e.action == EventAction::Conversion
                    && e.status == EventStatus::Executed
                    && e.meta.order_id() == Some(order_id)
            })
            .cloned())
    }

    async fn latest_event(
        &self,
        workspace_id: &str,
        contact_id: &str,
    ) -> StoreResult<Option<AutopilotEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.workspace_id == workspace_id && e.contact_id == contact_id)
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn count_events(&self, query: &EventQuery) -> StoreResult<usize> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|e| query.matches(e)).count())
    }

    async fn events(&self, query: &EventQuery) -> StoreResult<Vec<AutopilotEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|e| query.matches(e)).cloned().collect())
    }
}
