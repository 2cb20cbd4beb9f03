//! Compliance guard: may we contact this person right now?

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::types::{Contact, Direction, Message, Workspace};

const OPT_IN_TAGS: [&str; 4] = ["optin", "opt-in", "opt_in", "whatsapp_optin"];
const OPT_IN_FIELDS: [&str; 3] = ["optIn", "opt_in", "whatsappOptIn"];

/// Length of the customer-service session opened by an inbound message.
pub fn session_window() -> Duration {
    Duration::hours(24)
}

/// Rules in force for one workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceSettings {
    pub require_opt_in: bool,
    pub enforce_24h: bool,
}

impl ComplianceSettings {
    /// Workspace overrides win over the process-wide defaults.
    pub fn effective(workspace: &Workspace, config: &RuntimeConfig) -> Self {
        Self {
            require_opt_in: workspace.require_opt_in.unwrap_or(config.enforce_opt_in),
            enforce_24h: workspace.enforce_24h.unwrap_or(config.enforce_24h),
        }
    }
}

/// Why a contact may not be messaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    #[serde(rename = "optin_required")]
    OptInRequired,
    #[serde(rename = "session_expired_24h")]
    SessionExpired,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::OptInRequired => "optin_required",
            BlockReason::SessionExpired => "session_expired_24h",
        }
    }
}

/// Result of a compliance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplianceDecision {
    pub allowed: bool,
    pub reason: Option<BlockReason>,
}

impl ComplianceDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn block(reason: BlockReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Whether the contact carries an opt-in tag or custom field.
pub fn has_opt_in(contact: &Contact) -> bool {
    let tagged = contact
        .tags
        .iter()
        .any(|tag| OPT_IN_TAGS.iter().any(|m| tag.trim().eq_ignore_ascii_case(m)));
    if tagged {
        return true;
    }

    OPT_IN_FIELDS.iter().any(|field| match contact.custom_fields.get(*field) {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("yes")
        }
        _ => false,
    })
}

/// Timestamp of the most recent inbound message.
pub fn last_inbound_at(messages: &[Message]) -> Option<DateTime<Utc>> {
    messages
        .iter()
        .filter(|m| m.direction == Direction::Inbound)
        .map(|m| m.created_at)
        .max()
}

/// Check the contact against the settings. Opt-in is evaluated first.
pub fn check(
    settings: &ComplianceSettings,
    contact: &Contact,
    messages: &[Message],
    now: DateTime<Utc>,
) -> ComplianceDecision {
    if settings.require_opt_in && !has_opt_in(contact) {
        return ComplianceDecision::block(BlockReason::OptInRequired);
    }

    if settings.enforce_24h {
        let open = last_inbound_at(messages).map_or(false, |at| now - at <= session_window());
        if !open {
            return ComplianceDecision::block(BlockReason::SessionExpired);
        }
    }

    ComplianceDecision::allow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Conversation;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 15, 0, 0).unwrap()
    }

    fn strict() -> ComplianceSettings {
        ComplianceSettings {
            require_opt_in: true,
            enforce_24h: true,
        }
    }

    fn inbound_hours_ago(hours: i64) -> Vec<Message> {
        let conversation = Conversation::open("ws", "conv", "c1");
        vec![Message::inbound(&conversation, "oi", now() - Duration::hours(hours))]
    }

    #[test]
    fn test_opt_in_markers() {
        let base = Contact::new("ws", "c1", "+55");
        assert!(!has_opt_in(&base));
        assert!(has_opt_in(&base.clone().with_tag("WhatsApp_OptIn")));
        assert!(has_opt_in(&base.clone().with_field("optIn", json!(true))));
        assert!(has_opt_in(&base.clone().with_field("opt_in", json!("yes"))));
        assert!(!has_opt_in(&base.clone().with_field("optIn", json!("no"))));
        assert!(!has_opt_in(&base.with_tag("vip")));
    }

    #[test]
    fn test_opt_in_checked_before_window() {
        let contact = Contact::new("ws", "c1", "+55");
        let decision = check(&strict(), &contact, &[], now());
        assert_eq!(decision, ComplianceDecision::block(BlockReason::OptInRequired));
    }

    #[test]
    fn test_session_window() {
        let contact = Contact::new("ws", "c1", "+55").with_tag("optin");
        assert!(check(&strict(), &contact, &inbound_hours_ago(2), now()).allowed);
        assert!(check(&strict(), &contact, &inbound_hours_ago(24), now()).allowed);

        let expired = check(&strict(), &contact, &inbound_hours_ago(25), now());
        assert_eq!(expired.reason, Some(BlockReason::SessionExpired));

        let never = check(&strict(), &contact, &[], now());
        assert_eq!(never.reason.map(|r| r.as_str()), Some("session_expired_24h"));
    }

    #[test]
    fn test_workspace_overrides_config() {
        let config = RuntimeConfig::default();
        let mut workspace = Workspace::new("ws");
        assert_eq!(
            ComplianceSettings::effective(&workspace, &config),
            ComplianceSettings {
                require_opt_in: false,
                enforce_24h: true
            }
        );

        workspace.require_opt_in = Some(true);
        workspace.enforce_24h = Some(false);
        let settings = ComplianceSettings::effective(&workspace, &config);
        assert!(settings.require_opt_in);
        assert!(!settings.enforce_24h);
    }
}
