//! Core types for the Autopilot engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use autopilot_agent::types::{Analysis, Intent, Sentiment, Stage, Turn};

use crate::store::StoreError;

/// Billing state of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Active,
    PastDue,
    Suspended,
}

impl Default for BillingStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// A tenant of the CRM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub autopilot_enabled: bool,
    #[serde(default)]
    pub billing_status: BillingStatus,
    /// Overrides the process-wide opt-in requirement
    #[serde(default)]
    pub require_opt_in: Option<bool>,
    /// Overrides the process-wide 24h window enforcement
    #[serde(default)]
    pub enforce_24h: Option<bool>,
    /// Automation flow started after each conversion
    #[serde(default)]
    pub post_conversion_flow_id: Option<String>,
    /// Booking link sent with calendar replies
    #[serde(default)]
    pub calendar_link: Option<String>,
}

impl Workspace {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            autopilot_enabled: true,
            billing_status: BillingStatus::Active,
            require_opt_in: None,
            enforce_24h: None,
            post_conversion_flow_id: None,
            calendar_link: None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.billing_status == BillingStatus::Suspended
    }
}

/// A person the workspace talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub workspace_id: String,
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: serde_json::Map<String, serde_json::Value>,
    /// Earliest instant a retry may be dispatched
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Purchase probability (0-100)
    #[serde(default)]
    pub purchase_probability: Option<u8>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
}

impl Contact {
    pub fn new(
        workspace_id: impl Into<String>,
        id: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            phone: phone.into(),
            name: None,
            tags: Vec::new(),
            custom_fields: serde_json::Map::new(),
            next_retry_at: None,
            purchase_probability: None,
            sentiment: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom_fields.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    Open,
    Closed,
}

/// A per-contact channel session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub workspace_id: String,
    pub contact_id: String,
    pub status: ConversationStatus,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn open(
        workspace_id: impl Into<String>,
        id: impl Into<String>,
        contact_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            contact_id: contact_id.into(),
            status: ConversationStatus::Open,
            unread_count: 0,
            last_message_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub workspace_id: String,
    pub conversation_id: String,
    pub contact_id: String,
    pub direction: Direction,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn inbound(conversation: &Conversation, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::build(conversation, Direction::Inbound, content.into(), at)
    }

    pub fn outbound(conversation: &Conversation, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::build(conversation, Direction::Outbound, content.into(), at)
    }

    fn build(conversation: &Conversation, direction: Direction, content: String, at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: conversation.workspace_id.clone(),
            conversation_id: conversation.id.clone(),
            contact_id: conversation.contact_id.clone(),
            direction,
            content,
            created_at: at,
        }
    }

    /// View as a classifier turn.
    pub fn to_turn(&self) -> Turn {
        match self.direction {
            Direction::Inbound => Turn::contact(self.content.clone()),
            Direction::Outbound => Turn::business(self.content.clone()),
        }
    }
}

/// Automated action the engine can take toward a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    SoftCloseNight,
    AutoReplyNight,
    SendOffer,
    SendOfferSoft,
    SendPrice,
    SendCalendar,
    HandoverHuman,
    HandleObjection,
    Qualify,
    TryUpsell,
    SendCta,
    AiChat,
    LeadUnlocker,
}

impl Action {
    pub const ALL: [Action; 13] = [
        Action::SoftCloseNight,
        Action::AutoReplyNight,
        Action::SendOffer,
        Action::SendOfferSoft,
        Action::SendPrice,
        Action::SendCalendar,
        Action::HandoverHuman,
        Action::HandleObjection,
        Action::Qualify,
        Action::TryUpsell,
        Action::SendCta,
        Action::AiChat,
        Action::LeadUnlocker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SoftCloseNight => "soft_close_night",
            Action::AutoReplyNight => "auto_reply_night",
            Action::SendOffer => "send_offer",
            Action::SendOfferSoft => "send_offer_soft",
            Action::SendPrice => "send_price",
            Action::SendCalendar => "send_calendar",
            Action::HandoverHuman => "handover_human",
            Action::HandleObjection => "handle_objection",
            Action::Qualify => "qualify",
            Action::TryUpsell => "try_upsell",
            Action::SendCta => "send_cta",
            Action::AiChat => "ai_chat",
            Action::LeadUnlocker => "lead_unlocker",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `action` column of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EventAction {
    /// An outreach action decided by the engine
    Outreach(Action),
    /// A retry deferred by the scheduler
    Scheduled,
    /// An immediate retry dispatch
    Retry,
    /// A revenue-attribution record
    Conversion,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Outreach(action) => action.as_str(),
            EventAction::Scheduled => "SCHEDULED",
            EventAction::Retry => "RETRY",
            EventAction::Conversion => "CONVERSION",
        }
    }
}

impl From<Action> for EventAction {
    fn from(action: Action) -> Self {
        EventAction::Outreach(action)
    }
}

impl From<EventAction> for String {
    fn from(action: EventAction) -> Self {
        action.as_str().to_string()
    }
}

impl FromStr for EventAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(EventAction::Scheduled),
            "RETRY" => Ok(EventAction::Retry),
            "CONVERSION" => Ok(EventAction::Conversion),
            other => Action::ALL
                .iter()
                .find(|a| a.as_str() == other)
                .map(|a| EventAction::Outreach(*a))
                .ok_or_else(|| format!("unknown event action '{}'", other)),
        }
    }
}

impl TryFrom<String> for EventAction {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Outcome recorded by a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Executed,
    Skipped,
    Scheduled,
    Error,
}

/// Which cycle phase produced a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Reactive,
    Proactive,
}

/// Where the sent text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    Canned,
    Generated,
    Fallback,
}

/// Per-kind payload of a ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventMeta {
    /// A send was enqueued
    Dispatch {
        conversation_id: String,
        job_id: String,
        phase: CyclePhase,
        text_source: TextSource,
    },
    /// The conversation was handed to a human
    Handover { conversation_id: String },
    /// Nothing was sent
    Skip { conversation_id: Option<String> },
    /// A retry was deferred
    Schedule {
        next_retry_at: DateTime<Utc>,
        delay_ms: u64,
        job_id: String,
    },
    /// Revenue attribution
    Conversion {
        order_id: Option<String>,
        amount: Option<f64>,
        currency: Option<String>,
        provider: Option<String>,
    },
    /// Enqueue or processing failure
    Failure {
        conversation_id: Option<String>,
        error: String,
    },
}

impl EventMeta {
    /// Order id carried by a conversion payload.
    pub fn order_id(&self) -> Option<&str> {
        match self {
            EventMeta::Conversion { order_id, .. } => order_id.as_deref(),
            _ => None,
        }
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutopilotEvent {
    pub id: String,
    pub workspace_id: String,
    pub contact_id: String,
    pub intent: Intent,
    pub action: EventAction,
    pub status: EventStatus,
    pub reason: String,
    pub meta: EventMeta,
    pub created_at: DateTime<Utc>,
}

impl AutopilotEvent {
    /// Check that status, action and meta agree.
    pub fn validate(&self) -> Result<()> {
        if self.workspace_id.is_empty() || self.contact_id.is_empty() {
            return Err(AutopilotError::InvalidEvent(
                "workspace and contact ids are required".to_string(),
            ));
        }
        if self.status != EventStatus::Executed && self.reason.trim().is_empty() {
            return Err(AutopilotError::InvalidEvent(format!(
                "{:?} entries need a reason",
                self.status
            )));
        }

        let consistent = match (&self.status, &self.action, &self.meta) {
            (
                EventStatus::Executed,
                EventAction::Outreach(Action::HandoverHuman),
                EventMeta::Handover { .. },
            ) => true,
            (EventStatus::Executed, EventAction::Outreach(action), EventMeta::Dispatch { .. }) => {
                *action != Action::HandoverHuman
            }
            (EventStatus::Executed, EventAction::Conversion, EventMeta::Conversion { .. }) => true,
            (EventStatus::Scheduled, EventAction::Scheduled, EventMeta::Schedule { .. }) => true,
            (EventStatus::Skipped, EventAction::Outreach(_), EventMeta::Skip { .. }) => true,
            (EventStatus::Error, action, EventMeta::Failure { .. }) => {
                *action != EventAction::Conversion
            }
            _ => false,
        };
        if !consistent {
            return Err(AutopilotError::InvalidEvent(format!(
                "{} with status {:?} cannot carry {:?} meta",
                self.action.as_str(),
                self.status,
                self.meta
            )));
        }

        if let EventMeta::Conversion {
            order_id, amount, ..
        } = &self.meta
        {
            if matches!(order_id, Some(id) if id.trim().is_empty()) {
                return Err(AutopilotError::InvalidEvent("empty order id".to_string()));
            }
            if matches!(amount, Some(value) if !value.is_finite() || *value < 0.0) {
                return Err(AutopilotError::InvalidEvent(
                    "conversion amount must be a non-negative number".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Error types for the engine.
#[derive(Debug, thiserror::Error)]
pub enum AutopilotError {
    /// Workspace billing is suspended; the operation is aborted
    #[error("Billing suspended for workspace {0}")]
    BillingSuspended(String),

    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    /// A ledger entry failed validation
    #[error("Invalid ledger event: {0}")]
    InvalidEvent(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AutopilotError>;
