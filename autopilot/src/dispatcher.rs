//! Action dispatcher - turns a decided action into a queued send.
//!
//! Compliance is re-checked here against freshly loaded data, whatever the
//! caller checked before. Every outcome leaves exactly one ledger entry.

use std::sync::Arc;
use tracing::{debug, info, warn};

use autopilot_agent::OutreachAgent;

use crate::clock::Clock;
use crate::compliance::{self, BlockReason, ComplianceSettings};
use crate::config::RuntimeConfig;
use crate::ledger::{EventLedger, NewEvent};
use crate::queue::{JobPayload, JobQueue};
use crate::store::CrmStore;
use crate::types::{
    Action, Analysis, AutopilotError, Conversation, CyclePhase, EventMeta, EventStatus, Message,
    Result, TextSource, Turn, Workspace,
};

/// Sent when no generated text is available.
pub const FALLBACK_GREETING: &str =
    "Hi! Thanks for reaching out. How can we help you today?";

const NIGHT_REPLY: &str = "Thanks for your message! Our team is offline right now and will get back to you first thing in the morning.";
const NIGHT_SOFT_CLOSE: &str = "Great to hear you're interested! Our team is offline for the night, but we've saved your request and will send everything you need to finish your order first thing in the morning.";
const CALENDAR_REPLY: &str = "Happy to set up a time! Pick the slot that works best for you";

/// Outcome of `execute_action`.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A send job was enqueued
    Sent { job_id: String, text_source: TextSource },
    /// Handed to a human; nothing sent
    HandedOver,
    /// Compliance refused the send
    Blocked(BlockReason),
    /// The queue rejected the job
    Failed(String),
}

/// Fixed text for actions that never go through the generator.
pub fn canned_text(action: Action, workspace: &Workspace) -> Option<String> {
    match action {
        Action::AutoReplyNight => Some(NIGHT_REPLY.to_string()),
        Action::SoftCloseNight => Some(NIGHT_SOFT_CLOSE.to_string()),
        Action::SendCalendar => Some(match workspace.calendar_link.as_deref() {
            Some(link) if !link.trim().is_empty() => format!("{}: {}", CALENDAR_REPLY, link.trim()),
            _ => format!("{}.", CALENDAR_REPLY),
        }),
        _ => None,
    }
}

/// Generator instruction for an action.
pub fn instruction(action: Action) -> &'static str {
    match action {
        Action::SendOffer => "The contact is ready to buy. Present the offer and ask them to confirm the order now.",
        Action::SendOfferSoft => "The contact shows buying interest. Present the offer without pressure and invite them to ask anything.",
        Action::SendPrice => "Answer the price question clearly and briefly, then ask if they would like to proceed.",
        Action::HandleObjection => "Acknowledge the contact's concern, address it honestly and offer a way forward.",
        Action::Qualify => "Greet the new lead and ask one short question to understand what they need.",
        Action::TryUpsell => "The contact is happy and close to buying. Suggest a relevant add-on or upgrade in one sentence.",
        Action::SendCta => "Summarize the next step and give a clear call to action to complete the purchase.",
        Action::LeadUnlocker => "The conversation went quiet. Write a short, friendly follow-up that gives the contact an easy reason to reply.",
        _ => "Reply helpfully and briefly to the contact's last message.",
    }
}

/// Executes decided actions.
pub struct ActionDispatcher {
    crm: Arc<dyn CrmStore>,
    ledger: EventLedger,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    config: Arc<RuntimeConfig>,
    agent: Option<Arc<OutreachAgent>>,
}

impl ActionDispatcher {
    pub fn new(
        crm: Arc<dyn CrmStore>,
        ledger: EventLedger,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        config: Arc<RuntimeConfig>,
        agent: Option<Arc<OutreachAgent>>,
    ) -> Self {
        Self {
            crm,
            ledger,
            queue,
            clock,
            config,
            agent,
        }
    }

    /// Re-validate, resolve text, enqueue and record.
    pub async fn execute_action(
        &self,
        workspace: &Workspace,
        action: Action,
        conversation: &Conversation,
        analysis: &Analysis,
        phase: CyclePhase,
    ) -> Result<DispatchOutcome> {
        let contact = self
            .crm
            .get_contact(&workspace.id, &conversation.contact_id)
            .await?
            .ok_or_else(|| AutopilotError::ContactNotFound(conversation.contact_id.clone()))?;
        let messages = self
            .crm
            .recent_messages(&workspace.id, &conversation.id, self.config.history_limit)
            .await?;

        let settings = ComplianceSettings::effective(workspace, &self.config);
        let decision = compliance::check(&settings, &contact, &messages, self.clock.now());
        if let Some(reason) = decision.reason {
            info!(
                workspace_id = %workspace.id,
                contact_id = %contact.id,
                action = %action,
                reason = reason.as_str(),
                "Send blocked by compliance"
            );
            self.ledger
                .append(
                    NewEvent::new(
                        &workspace.id,
                        &contact.id,
                        action,
                        EventStatus::Skipped,
                        EventMeta::Skip {
                            conversation_id: Some(conversation.id.clone()),
                        },
                    )
                    .with_intent(analysis.intent)
                    .with_reason(reason.as_str()),
                )
                .await?;
            self.acknowledge(workspace, conversation).await?;
            return Ok(DispatchOutcome::Blocked(reason));
        }

        if action == Action::HandoverHuman {
            self.ledger
                .append(
                    NewEvent::new(
                        &workspace.id,
                        &contact.id,
                        action,
                        EventStatus::Executed,
                        EventMeta::Handover {
                            conversation_id: conversation.id.clone(),
                        },
                    )
                    .with_intent(analysis.intent)
                    .with_reason("handover"),
                )
                .await?;
            self.acknowledge(workspace, conversation).await?;
            info!(workspace_id = %workspace.id, contact_id = %contact.id, "Conversation handed over");
            return Ok(DispatchOutcome::HandedOver);
        }

        let (text, text_source) = self.resolve_text(workspace, action, &messages).await;
        let payload = JobPayload::SendMessage {
            workspace_id: workspace.id.clone(),
            contact_id: contact.id.clone(),
            conversation_id: conversation.id.clone(),
            action,
            text,
        };

        let job_id = match self.queue.enqueue(payload, None).await {
            Ok(job_id) => job_id,
            Err(e) => {
                warn!(
                    workspace_id = %workspace.id,
                    contact_id = %contact.id,
                    action = %action,
                    error = %e,
                    "Send enqueue failed"
                );
                self.ledger
                    .append(
                        NewEvent::new(
                            &workspace.id,
                            &contact.id,
                            action,
                            EventStatus::Error,
                            EventMeta::Failure {
                                conversation_id: Some(conversation.id.clone()),
                                error: e.to_string(),
                            },
                        )
                        .with_intent(analysis.intent)
                        .with_reason("dispatch_failed"),
                    )
                    .await?;
                return Ok(DispatchOutcome::Failed(e.to_string()));
            }
        };

        self.ledger
            .append(
                NewEvent::new(
                    &workspace.id,
                    &contact.id,
                    action,
                    EventStatus::Executed,
                    EventMeta::Dispatch {
                        conversation_id: conversation.id.clone(),
                        job_id: job_id.clone(),
                        phase,
                        text_source,
                    },
                )
                .with_intent(analysis.intent)
                .with_reason(match phase {
                    CyclePhase::Reactive => "reactive",
                    CyclePhase::Proactive => "proactive",
                }),
            )
            .await?;
        self.acknowledge(workspace, conversation).await?;

        info!(
            workspace_id = %workspace.id,
            contact_id = %contact.id,
            action = %action,
            job_id = %job_id,
            "Action dispatched"
        );
        Ok(DispatchOutcome::Sent { job_id, text_source })
    }

    /// Mark the messages seen in `conversation` as read. Later arrivals stay unread.
    async fn acknowledge(&self, workspace: &Workspace, conversation: &Conversation) -> Result<()> {
        if conversation.unread_count > 0 {
            self.crm
                .mark_conversation_read(&workspace.id, &conversation.id, conversation.unread_count)
                .await?;
        }
        Ok(())
    }

    async fn resolve_text(
        &self,
        workspace: &Workspace,
        action: Action,
        messages: &[Message],
    ) -> (String, TextSource) {
        if let Some(text) = canned_text(action, workspace) {
            return (text, TextSource::Canned);
        }

        let Some(agent) = &self.agent else {
            return (FALLBACK_GREETING.to_string(), TextSource::Fallback);
        };

        let history: Vec<Turn> = messages.iter().map(Message::to_turn).collect();
        match agent.generate(&history, instruction(action)).await {
            Ok(text) => (text, TextSource::Generated),
            Err(e) => {
                debug!(action = %action, error = %e, "Generation failed; using fallback text");
                (FALLBACK_GREETING.to_string(), TextSource::Fallback)
            }
        }
    }
}
