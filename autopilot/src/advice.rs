//! Next-best-action recommendations. Advisory only; nothing is dispatched.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::compliance::{self, BlockReason, ComplianceSettings};
use crate::decision;
use crate::smart_time::{compute_delay, is_optimal_hour};
use crate::types::{Action, Analysis, Contact, Conversation, Direction, Message};

/// Purchase probability at which a contact counts as showing a buying signal.
pub const BUYING_SIGNAL_PROBABILITY: u8 = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    RequestOptIn,
    SendTemplate,
    Wait,
    Reply,
    FollowUp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextBestAction {
    pub recommendation: Recommendation,
    pub action: Option<Action>,
    pub reason: String,
    pub suggested_at: DateTime<Utc>,
}

impl NextBestAction {
    fn new(recommendation: Recommendation, reason: &str, suggested_at: DateTime<Utc>) -> Self {
        Self {
            recommendation,
            action: None,
            reason: reason.to_string(),
            suggested_at,
        }
    }

    fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }
}

/// Everything the recommendation looks at.
pub struct AdviceInput<'a> {
    pub settings: ComplianceSettings,
    pub contact: &'a Contact,
    pub conversation: Option<&'a Conversation>,
    /// Recent messages, oldest first
    pub messages: &'a [Message],
    pub now: DateTime<Utc>,
    pub hour: u32,
    pub best_hour: u32,
    pub silence: Duration,
}

/// Analysis inferred from what the CRM already knows about the contact.
pub fn contact_analysis(contact: &Contact) -> Analysis {
    let buying = contact
        .purchase_probability
        .map_or(false, |p| p >= BUYING_SIGNAL_PROBABILITY);
    Analysis::neutral()
        .with_buying_signal(buying)
        .with_sentiment(contact.sentiment.unwrap_or_default())
}

pub fn recommend(input: &AdviceInput<'_>) -> NextBestAction {
    let now = input.now;

    match compliance::check(&input.settings, input.contact, input.messages, now).reason {
        Some(BlockReason::OptInRequired) => {
            return NextBestAction::new(Recommendation::RequestOptIn, "optin_required", now)
        }
        Some(BlockReason::SessionExpired) => {
            return NextBestAction::new(Recommendation::SendTemplate, "session_expired_24h", now)
        }
        None => {}
    }

    if let Some(next_retry_at) = input.contact.next_retry_at.filter(|at| *at > now) {
        return NextBestAction::new(Recommendation::Wait, "retry_already_scheduled", next_retry_at);
    }

    let last = input.messages.last();
    let unread = input.conversation.map_or(false, |c| c.unread_count > 0);
    let inbound_last = last.map_or(false, |m| m.direction == Direction::Inbound);
    if unread || inbound_last {
        let optimal = is_optimal_hour(input.hour, input.best_hour);
        let action = decision::decide(&contact_analysis(input.contact), input.hour, optimal);
        return NextBestAction::new(Recommendation::Reply, "awaiting_our_reply", now).with_action(action);
    }

    match last {
        Some(message) if now - message.created_at > input.silence => {
            let suggested_at = if is_optimal_hour(input.hour, input.best_hour) {
                now
            } else {
                now + Duration::milliseconds(compute_delay(input.best_hour, input.hour))
            };
            NextBestAction::new(Recommendation::FollowUp, "stalled_conversation", suggested_at)
                .with_action(Action::LeadUnlocker)
        }
        Some(message) => NextBestAction::new(
            Recommendation::Wait,
            "awaiting_reply",
            message.created_at + input.silence,
        ),
        None => NextBestAction::new(Recommendation::Wait, "awaiting_reply", now),
    }
}
