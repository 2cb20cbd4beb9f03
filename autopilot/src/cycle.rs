//! Cycle orchestrator - one pass of automated outreach over a workspace.
//!
//! ```text
//!   run(workspace)
//!     ├── preconditions (exists, billing, enabled)
//!     ├── best time  ──► hour context
//!     ├── reactive   : unread conversations
//!     │     pre-check ─► classify ─► decide ─► limits ─► execute
//!     └── proactive  : stalled conversations
//!           window / backpressure / hour gates ─► limits ─► execute(lead_unlocker)
//! ```

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use autopilot_agent::OutreachAgent;

use crate::clock::{local_hour, Clock};
use crate::compliance::{self, ComplianceSettings};
use crate::config::RuntimeConfig;
use crate::decision::DecisionEngine;
use crate::dispatcher::{ActionDispatcher, DispatchOutcome};
use crate::ledger::{EventLedger, NewEvent};
use crate::queue::JobQueue;
use crate::smart_time::{hour_distance, is_optimal_hour, SmartTime};
use crate::store::CrmStore;
use crate::types::{
    Action, Analysis, AutopilotError, Conversation, CyclePhase, EventMeta, EventStatus, Message,
    Result, Turn, Workspace,
};

/// Hours from the best hour beyond which proactive outreach waits.
pub const PROACTIVE_HOUR_TOLERANCE: u32 = 3;

/// Counts for one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub considered: usize,
    pub sent: usize,
    pub handed_over: usize,
    pub blocked: usize,
    pub limited: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped_reason: Option<String>,
}

impl PhaseReport {
    fn skipped(reason: &str) -> Self {
        Self {
            skipped_reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    fn record(&mut self, step: &Step) {
        match step {
            Step::Dispatched(DispatchOutcome::Sent { .. }) => self.sent += 1,
            Step::Dispatched(DispatchOutcome::HandedOver) => self.handed_over += 1,
            Step::Dispatched(DispatchOutcome::Blocked(_)) | Step::PreBlocked => self.blocked += 1,
            Step::Dispatched(DispatchOutcome::Failed(_)) => self.failed += 1,
            Step::Limited => self.limited += 1,
            Step::Error => self.errors += 1,
        }
    }
}

/// Result of `run_cycle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub workspace_id: String,
    pub started_at: DateTime<Utc>,
    pub hour: u32,
    pub best_hour: Option<u32>,
    pub skipped_reason: Option<String>,
    pub reactive: PhaseReport,
    pub proactive: PhaseReport,
}

impl CycleReport {
    pub fn total_sent(&self) -> usize {
        self.reactive.sent + self.proactive.sent
    }
}

/// What happened to one conversation.
#[derive(Debug)]
enum Step {
    Dispatched(DispatchOutcome),
    PreBlocked,
    Limited,
    Error,
}

#[derive(Debug, Clone, Copy)]
struct HourContext {
    hour: u32,
    is_optimal: bool,
}

/// Runs reactive and proactive phases for a workspace.
pub struct CycleOrchestrator {
    crm: Arc<dyn CrmStore>,
    ledger: EventLedger,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    config: Arc<RuntimeConfig>,
    agent: Option<Arc<OutreachAgent>>,
    dispatcher: Arc<ActionDispatcher>,
    smart_time: Arc<SmartTime>,
    decisions: DecisionEngine,
}

impl CycleOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        crm: Arc<dyn CrmStore>,
        ledger: EventLedger,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        config: Arc<RuntimeConfig>,
        agent: Option<Arc<OutreachAgent>>,
        dispatcher: Arc<ActionDispatcher>,
        smart_time: Arc<SmartTime>,
    ) -> Self {
        Self {
            crm,
            ledger,
            queue,
            clock,
            config,
            agent,
            dispatcher,
            smart_time,
            decisions: DecisionEngine::standard(),
        }
    }

    /// Run one cycle.
    pub async fn run(&self, workspace_id: &str) -> Result<CycleReport> {
        let workspace = self
            .crm
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| AutopilotError::WorkspaceNotFound(workspace_id.to_string()))?;
        if workspace.is_suspended() {
            return Err(AutopilotError::BillingSuspended(workspace_id.to_string()));
        }

        let started_at = self.clock.now();
        let hour = local_hour(started_at, self.config.offset());
        let mut report = CycleReport {
            workspace_id: workspace_id.to_string(),
            started_at,
            hour,
            best_hour: None,
            skipped_reason: None,
            reactive: PhaseReport::default(),
            proactive: PhaseReport::default(),
        };

        if !workspace.autopilot_enabled {
            debug!(workspace_id = %workspace_id, "Autopilot disabled; cycle skipped");
            report.skipped_reason = Some("autopilot_disabled".to_string());
            return Ok(report);
        }

        let best = self.smart_time.best_time(workspace_id).await?;
        report.best_hour = Some(best.best_hour);
        let ctx = HourContext {
            hour,
            is_optimal: is_optimal_hour(hour, best.best_hour),
        };

        report.reactive = self.reactive_phase(&workspace, ctx).await?;
        report.proactive = self.proactive_phase(&workspace, ctx, best.best_hour).await?;

        info!(
            workspace_id = %workspace_id,
            hour = hour,
            best_hour = best.best_hour,
            reactive_sent = report.reactive.sent,
            proactive_sent = report.proactive.sent,
            "Cycle complete"
        );
        Ok(report)
    }

    async fn reactive_phase(&self, workspace: &Workspace, ctx: HourContext) -> Result<PhaseReport> {
        let conversations = self
            .crm
            .unread_conversations(&workspace.id, self.config.cycle_limit)
            .await?;

        let steps: Vec<Step> = stream::iter(conversations)
            .map(|conversation| async move {
                let step = self.react(workspace, &conversation, ctx).await;
                self.settle(workspace, &conversation, step)
            })
            .buffer_unordered(self.config.cycle_concurrency.max(1))
            .collect()
            .await;

        Ok(Self::summarize(steps))
    }

    async fn proactive_phase(
        &self,
        workspace: &Workspace,
        ctx: HourContext,
        best_hour: u32,
    ) -> Result<PhaseReport> {
        if !self.config.in_operating_window(ctx.hour) {
            debug!(workspace_id = %workspace.id, hour = ctx.hour, "Outside operating window");
            return Ok(PhaseReport::skipped("outside_operating_window"));
        }

        match self.queue.waiting_count().await {
            Ok(waiting) if waiting > self.config.queue_waiting_threshold => {
                warn!(
                    workspace_id = %workspace.id,
                    waiting = waiting,
                    threshold = self.config.queue_waiting_threshold,
                    "Queue backpressure; proactive phase skipped"
                );
                return Ok(PhaseReport::skipped("queue_backpressure"));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(workspace_id = %workspace.id, error = %e, "Queue unavailable; proactive phase skipped");
                return Ok(PhaseReport::skipped("queue_unavailable"));
            }
        }

        if hour_distance(ctx.hour, best_hour) > PROACTIVE_HOUR_TOLERANCE {
            debug!(
                workspace_id = %workspace.id,
                hour = ctx.hour,
                best_hour = best_hour,
                "Not an optimal hour for proactive outreach"
            );
            return Ok(PhaseReport::skipped("not_optimal_hour"));
        }

        let silent_since = self.clock.now() - self.config.silence();
        let conversations = self
            .crm
            .stalled_conversations(&workspace.id, silent_since, self.config.cycle_limit)
            .await?;

        let steps: Vec<Step> = stream::iter(conversations)
            .map(|conversation| async move {
                let step = self.unlock(workspace, &conversation).await;
                self.settle(workspace, &conversation, step)
            })
            .buffer_unordered(self.config.cycle_concurrency.max(1))
            .collect()
            .await;

        Ok(Self::summarize(steps))
    }

    async fn react(
        &self,
        workspace: &Workspace,
        conversation: &Conversation,
        ctx: HourContext,
    ) -> Result<Step> {
        let messages = self
            .crm
            .recent_messages(&workspace.id, &conversation.id, self.config.history_limit)
            .await?;

        // Cheap pre-check so blocked contacts never reach the classifier
        if let Some(contact) = self
            .crm
            .get_contact(&workspace.id, &conversation.contact_id)
            .await?
        {
            let settings = ComplianceSettings::effective(workspace, &self.config);
            let decision = compliance::check(&settings, &contact, &messages, self.clock.now());
            if let Some(reason) = decision.reason {
                let intended = self.decisions.decide(&Analysis::neutral(), ctx.hour, ctx.is_optimal);
                self.skip(workspace, conversation, intended, Analysis::neutral(), reason.as_str())
                    .await?;
                return Ok(Step::PreBlocked);
            }
        }

        let analysis = self.classify(workspace, conversation, &messages).await;
        let action = self.decisions.decide(&analysis, ctx.hour, ctx.is_optimal);
        debug!(
            workspace_id = %workspace.id,
            conversation_id = %conversation.id,
            intent = analysis.intent.as_str(),
            action = %action,
            "Action decided"
        );

        if let Some(limit) = self.limit_reached(&workspace.id, &conversation.contact_id).await? {
            self.skip(workspace, conversation, action, analysis, limit).await?;
            return Ok(Step::Limited);
        }

        let outcome = self
            .dispatcher
            .execute_action(workspace, action, conversation, &analysis, CyclePhase::Reactive)
            .await?;
        Ok(Step::Dispatched(outcome))
    }

    async fn unlock(&self, workspace: &Workspace, conversation: &Conversation) -> Result<Step> {
        let analysis = Analysis::neutral();
        if let Some(limit) = self.limit_reached(&workspace.id, &conversation.contact_id).await? {
            self.skip(workspace, conversation, Action::LeadUnlocker, analysis, limit)
                .await?;
            return Ok(Step::Limited);
        }

        let outcome = self
            .dispatcher
            .execute_action(
                workspace,
                Action::LeadUnlocker,
                conversation,
                &analysis,
                CyclePhase::Proactive,
            )
            .await?;
        Ok(Step::Dispatched(outcome))
    }

    /// Classify with the agent; neutral when absent or failing.
    async fn classify(
        &self,
        workspace: &Workspace,
        conversation: &Conversation,
        messages: &[Message],
    ) -> Analysis {
        let Some(agent) = &self.agent else {
            return Analysis::neutral();
        };
        let history: Vec<Turn> = messages.iter().map(Message::to_turn).collect();
        match agent.classify(&history).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(
                    workspace_id = %workspace.id,
                    conversation_id = %conversation.id,
                    error = %e,
                    "Classification failed; using neutral analysis"
                );
                Analysis::neutral()
            }
        }
    }

    /// Rolling 24h executed-action limits.
    async fn limit_reached(&self, workspace_id: &str, contact_id: &str) -> Result<Option<&'static str>> {
        let since = self.clock.now() - Duration::hours(24);
        let workspace_count = self.ledger.executed_since(workspace_id, None, since).await?;
        if workspace_count >= self.config.workspace_daily_limit {
            return Ok(Some("workspace_daily_limit"));
        }
        let contact_count = self
            .ledger
            .executed_since(workspace_id, Some(contact_id), since)
            .await?;
        if contact_count >= self.config.contact_daily_limit {
            return Ok(Some("contact_daily_limit"));
        }
        Ok(None)
    }

    async fn skip(
        &self,
        workspace: &Workspace,
        conversation: &Conversation,
        action: Action,
        analysis: Analysis,
        reason: &str,
    ) -> Result<()> {
        info!(
            workspace_id = %workspace.id,
            contact_id = %conversation.contact_id,
            action = %action,
            reason = reason,
            "Conversation skipped"
        );
        self.ledger
            .append(
                NewEvent::new(
                    &workspace.id,
                    &conversation.contact_id,
                    action,
                    EventStatus::Skipped,
                    EventMeta::Skip {
                        conversation_id: Some(conversation.id.clone()),
                    },
                )
                .with_intent(analysis.intent)
                .with_reason(reason),
            )
            .await?;
        // A skipped conversation must not hold a slot in the next unread batch
        if conversation.unread_count > 0 {
            self.crm
                .mark_conversation_read(&workspace.id, &conversation.id, conversation.unread_count)
                .await?;
        }
        Ok(())
    }

    /// Log a per-conversation error so the rest of the phase continues.
    fn settle(&self, workspace: &Workspace, conversation: &Conversation, step: Result<Step>) -> Step {
        match step {
            Ok(step) => step,
            Err(e) => {
                warn!(
                    workspace_id = %workspace.id,
                    conversation_id = %conversation.id,
                    error = %e,
                    "Conversation processing failed"
                );
                Step::Error
            }
        }
    }

    fn summarize(steps: Vec<Step>) -> PhaseReport {
        let mut report = PhaseReport {
            considered: steps.len(),
            ..Default::default()
        };
        for step in &steps {
            report.record(step);
        }
        report
    }
}
