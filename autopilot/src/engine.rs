//! AutopilotEngine - the public surface over store, queue, clock and agent.

use std::sync::Arc;
use tracing::info;

use autopilot_agent::OutreachAgent;

use crate::advice::{self, AdviceInput, NextBestAction};
use crate::clock::{local_hour, Clock, SystemClock};
use crate::compliance::ComplianceSettings;
use crate::config::RuntimeConfig;
use crate::conversion::{ConversionInput, ConversionLedger, ConversionOutcome};
use crate::cycle::{CycleOrchestrator, CycleReport};
use crate::dispatcher::ActionDispatcher;
use crate::ledger::EventLedger;
use crate::queue::JobQueue;
use crate::retry::{RetryOutcome, RetryScheduler};
use crate::smart_time::{BestTime, SmartTime};
use crate::store::{CrmStore, LedgerStore};
use crate::types::{AutopilotError, Result, Workspace};

/// The outreach decision engine.
pub struct AutopilotEngine {
    crm: Arc<dyn CrmStore>,
    clock: Arc<dyn Clock>,
    config: Arc<RuntimeConfig>,
    agent: Option<Arc<OutreachAgent>>,
    ledger: EventLedger,
    smart_time: Arc<SmartTime>,
    dispatcher: Arc<ActionDispatcher>,
    cycle: CycleOrchestrator,
    retry: RetryScheduler,
    conversions: ConversionLedger,
}

impl AutopilotEngine {
    /// Create a builder.
    pub fn builder() -> AutopilotBuilder {
        AutopilotBuilder::new()
    }

    /// Effective runtime configuration.
    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Whether an agent is wired in; without one the engine is rule-only.
    pub fn has_agent(&self) -> bool {
        self.agent.is_some()
    }

    pub fn ledger(&self) -> &EventLedger {
        &self.ledger
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Enable or disable automated outreach for a workspace.
    pub async fn toggle_autopilot(&self, workspace_id: &str, enabled: bool) -> Result<Workspace> {
        let workspace = self.workspace(workspace_id).await?;
        if enabled && workspace.is_suspended() {
            return Err(AutopilotError::BillingSuspended(workspace_id.to_string()));
        }
        let updated = self.crm.set_autopilot_enabled(workspace_id, enabled).await?;
        info!(workspace_id = %workspace_id, enabled = enabled, "Autopilot toggled");
        Ok(updated)
    }

    /// Run one reactive + proactive cycle.
    pub async fn run_cycle(&self, workspace_id: &str) -> Result<CycleReport> {
        self.cycle.run(workspace_id).await
    }

    /// Dispatch now, schedule later, or refuse.
    pub async fn retry_contact(&self, workspace_id: &str, contact_id: &str) -> Result<RetryOutcome> {
        self.retry.retry_contact(workspace_id, contact_id).await
    }

    /// Record a conversion at most once per order id.
    pub async fn mark_conversion(&self, input: ConversionInput) -> Result<ConversionOutcome> {
        self.conversions.mark_conversion(input).await
    }

    /// Best hour and weekday for the workspace.
    pub async fn best_time(&self, workspace_id: &str) -> Result<BestTime> {
        self.smart_time.best_time(workspace_id).await
    }

    /// Recommend what to do next for a contact.
    pub async fn next_best_action(&self, workspace_id: &str, contact_id: &str) -> Result<NextBestAction> {
        let workspace = self.workspace(workspace_id).await?;
        if workspace.is_suspended() {
            return Err(AutopilotError::BillingSuspended(workspace_id.to_string()));
        }
        let contact = self
            .crm
            .get_contact(workspace_id, contact_id)
            .await?
            .ok_or_else(|| AutopilotError::ContactNotFound(contact_id.to_string()))?;

        let conversation = self.crm.latest_conversation(workspace_id, contact_id).await?;
        let messages = match &conversation {
            Some(conversation) => {
                self.crm
                    .recent_messages(workspace_id, &conversation.id, self.config.history_limit)
                    .await?
            }
            None => Vec::new(),
        };
        let best = self.smart_time.best_time(workspace_id).await?;
        let now = self.clock.now();

        Ok(advice::recommend(&AdviceInput {
            settings: ComplianceSettings::effective(&workspace, &self.config),
            contact: &contact,
            conversation: conversation.as_ref(),
            messages: &messages,
            now,
            hour: local_hour(now, self.config.offset()),
            best_hour: best.best_hour,
            silence: self.config.silence(),
        }))
    }

    async fn workspace(&self, workspace_id: &str) -> Result<Workspace> {
        self.crm
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| AutopilotError::WorkspaceNotFound(workspace_id.to_string()))
    }
}

/// Builder for [`AutopilotEngine`].
pub struct AutopilotBuilder {
    config: RuntimeConfig,
    crm: Option<Arc<dyn CrmStore>>,
    ledger_store: Option<Arc<dyn LedgerStore>>,
    queue: Option<Arc<dyn JobQueue>>,
    clock: Option<Arc<dyn Clock>>,
    agent: Option<Arc<OutreachAgent>>,
}

impl Default for AutopilotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AutopilotBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            crm: None,
            ledger_store: None,
            queue: None,
            clock: None,
            agent: None,
        }
    }

    /// Use one store for both CRM reads and the ledger.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: CrmStore + LedgerStore + 'static,
    {
        let crm: Arc<dyn CrmStore> = store.clone();
        let ledger: Arc<dyn LedgerStore> = store;
        self.crm = Some(crm);
        self.ledger_store = Some(ledger);
        self
    }

    pub fn with_crm(mut self, crm: Arc<dyn CrmStore>) -> Self {
        self.crm = Some(crm);
        self
    }

    pub fn with_ledger_store(mut self, ledger: Arc<dyn LedgerStore>) -> Self {
        self.ledger_store = Some(ledger);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the time source (defaults to the system clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the agent; without one the engine runs rule-only.
    pub fn with_agent(mut self, agent: Arc<OutreachAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cycle_limit(mut self, limit: usize) -> Self {
        self.config.cycle_limit = limit;
        self
    }

    pub fn cycle_concurrency(mut self, concurrency: usize) -> Self {
        self.config.cycle_concurrency = concurrency;
        self
    }

    pub fn utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.config.utc_offset_minutes = minutes;
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<AutopilotEngine> {
        self.config.validate().map_err(AutopilotError::Config)?;
        let crm = self
            .crm
            .ok_or_else(|| AutopilotError::Config("a CRM store is required".to_string()))?;
        let ledger_store = self
            .ledger_store
            .ok_or_else(|| AutopilotError::Config("a ledger store is required".to_string()))?;
        let queue = self
            .queue
            .ok_or_else(|| AutopilotError::Config("a job queue is required".to_string()))?;
        let clock: Arc<dyn Clock> = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let config = Arc::new(self.config);
        let agent = self.agent;

        let ledger = EventLedger::new(ledger_store, clock.clone());
        let smart_time = Arc::new(SmartTime::new(crm.clone(), clock.clone(), config.clone()));
        let dispatcher = Arc::new(ActionDispatcher::new(
            crm.clone(),
            ledger.clone(),
            queue.clone(),
            clock.clone(),
            config.clone(),
            agent.clone(),
        ));
        let cycle = CycleOrchestrator::new(
            crm.clone(),
            ledger.clone(),
            queue.clone(),
            clock.clone(),
            config.clone(),
            agent.clone(),
            dispatcher.clone(),
            smart_time.clone(),
        );
        let retry = RetryScheduler::new(
            crm.clone(),
            ledger.clone(),
            queue.clone(),
            clock.clone(),
            config.clone(),
        );
        let conversions = ConversionLedger::new(crm.clone(), ledger.clone(), queue);

        Ok(AutopilotEngine {
            crm,
            clock,
            config,
            agent,
            ledger,
            smart_time,
            dispatcher,
            cycle,
            retry,
            conversions,
        })
    }
}
