//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use autopilot::clock::FixedClock;
use autopilot::queue::MemoryQueue;
use autopilot::store::{LedgerStore, MemoryStore};
use autopilot::{
    AutopilotEngine, AutopilotEvent, Contact, Conversation, EventAction, EventMeta, EventStatus,
    Intent, Message, RuntimeConfig, Workspace,
};
use autopilot_agent::backend::MockBackend;
use autopilot_agent::OutreachAgent;
use chrono::{DateTime, Duration, TimeZone, Utc};

pub const WS: &str = "ws-acme";

/// Monday 2024-05-06 14:00 UTC.
pub fn monday_14h() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 14, 0, 0).unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub clock: Arc<FixedClock>,
    pub engine: AutopilotEngine,
}

impl Harness {
    pub fn now(&self) -> DateTime<Utc> {
        use autopilot::clock::Clock;
        self.clock.now()
    }

    pub fn add_contact(&self, contact_id: &str) -> Conversation {
        self.store
            .insert_contact(Contact::new(WS, contact_id, format!("+55119{}", contact_id)));
        let conversation = Conversation::open(WS, format!("conv-{}", contact_id), contact_id);
        self.store.insert_conversation(conversation.clone());
        conversation
    }

    pub async fn inbound(&self, conversation: &Conversation, text: &str, ago: Duration) {
        use autopilot::store::CrmStore;
        self.store
            .append_message(Message::inbound(conversation, text, self.now() - ago))
            .await
            .unwrap();
    }

    pub async fn outbound(&self, conversation: &Conversation, text: &str, ago: Duration) {
        use autopilot::store::CrmStore;
        self.store
            .append_message(Message::outbound(conversation, text, self.now() - ago))
            .await
            .unwrap();
    }

    /// Write a ledger entry directly, bypassing the engine.
    pub async fn seed_event(&self, contact_id: &str, status: EventStatus, ago: Duration) {
        let meta = match status {
            EventStatus::Error => EventMeta::Failure {
                conversation_id: None,
                error: "send failed".to_string(),
            },
            EventStatus::Executed => EventMeta::Dispatch {
                conversation_id: format!("conv-{}", contact_id),
                job_id: "job-seed".to_string(),
                phase: autopilot::CyclePhase::Reactive,
                text_source: autopilot::TextSource::Canned,
            },
            _ => EventMeta::Skip {
                conversation_id: None,
            },
        };
        let event = AutopilotEvent {
            id: uuid_like(contact_id, ago),
            workspace_id: WS.to_string(),
            contact_id: contact_id.to_string(),
            intent: Intent::Unknown,
            action: EventAction::Outreach(autopilot::Action::AiChat),
            status,
            reason: "seeded".to_string(),
            meta,
            created_at: self.now() - ago,
        };
        event.validate().unwrap();
        self.store.append_event(event).await.unwrap();
    }

    pub async fn events_for(&self, contact_id: &str) -> Vec<AutopilotEvent> {
        self.engine
            .ledger()
            .history(WS, contact_id, self.now() - Duration::days(30))
            .await
            .unwrap()
    }
}

fn uuid_like(contact_id: &str, ago: Duration) -> String {
    format!("seed-{}-{}", contact_id, ago.num_seconds())
}

pub struct HarnessBuilder {
    workspace: Workspace,
    config: RuntimeConfig,
    now: DateTime<Utc>,
    agent: Option<Arc<OutreachAgent>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            workspace: Workspace::new(WS),
            config: RuntimeConfig::default(),
            now: monday_14h(),
            agent: None,
        }
    }

    pub fn workspace(mut self, edit: impl FnOnce(&mut Workspace)) -> Self {
        edit(&mut self.workspace);
        self
    }

    pub fn config(mut self, edit: impl FnOnce(&mut RuntimeConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn agent(mut self, backend: MockBackend) -> Self {
        self.agent = Some(Arc::new(OutreachAgent::new(Arc::new(backend))));
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.insert_workspace(self.workspace);
        let queue = Arc::new(MemoryQueue::new());
        let clock = Arc::new(FixedClock::new(self.now));

        let mut builder = AutopilotEngine::builder()
            .with_store(store.clone())
            .with_queue(queue.clone())
            .with_clock(clock.clone())
            .with_config(self.config);
        if let Some(agent) = self.agent {
            builder = builder.with_agent(agent);
        }

        Harness {
            store,
            queue,
            clock,
            engine: builder.build().unwrap(),
        }
    }
}
