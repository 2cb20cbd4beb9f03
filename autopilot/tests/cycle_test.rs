//! Cycle orchestration integration tests
//!
//! Drives `run_cycle` end to end over the in-memory store and queue:
//! - Reactive replies with and without an agent
//! - Compliance at decision and execution time
//! - Daily limits
//! - Proactive gates and lead unlocking

mod common;

use autopilot::compliance::{self, BlockReason, ComplianceSettings};
use autopilot::conversion::ConversionInput;
use autopilot::dispatcher::{DispatchOutcome, FALLBACK_GREETING};
use autopilot::queue::{JobPayload, JobQueue};
use autopilot::store::CrmStore;
use autopilot::{
    Action, Analysis, AutopilotError, BillingStatus, CyclePhase, EventAction, EventMeta,
    EventStatus, Intent,
};
use autopilot_agent::backend::MockBackend;
use chrono::{Duration, TimeZone, Utc};
use common::{HarnessBuilder, WS};

fn classifier(json: &str, reply: &str) -> MockBackend {
    MockBackend::new("mock").with_json_response(json).with_response(reply)
}

// =============================================================================
// Reactive phase
// =============================================================================

#[tokio::test]
async fn test_price_question_gets_generated_answer() {
    let h = HarnessBuilder::new()
        .agent(classifier(
            r#"{"intent":"question_price","sentiment":"neutral","buyingSignal":false,"stage":"engaged"}"#,
            "Plans start at $49 per month.",
        ))
        .build();
    let conversation = h.add_contact("c1");
    h.inbound(&conversation, "how much is it?", Duration::hours(1)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.considered, 1);
    assert_eq!(report.reactive.sent, 1);
    assert_eq!(report.best_hour, Some(13));

    let jobs = h.queue.jobs().await;
    assert_eq!(jobs.len(), 1);
    match &jobs[0].payload {
        JobPayload::SendMessage { action, text, conversation_id, .. } => {
            assert_eq!(*action, Action::SendPrice);
            assert_eq!(text, "Plans start at $49 per month.");
            assert_eq!(conversation_id, "conv-c1");
        }
        other => panic!("unexpected job {:?}", other),
    }

    let events = h.events_for("c1").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, EventStatus::Executed);
    assert_eq!(events[0].intent, Intent::QuestionPrice);
    assert_eq!(events[0].action, EventAction::Outreach(Action::SendPrice));

    let conversation = h.store.get_conversation(WS, "conv-c1").unwrap();
    assert_eq!(conversation.unread_count, 0);
}

#[tokio::test]
async fn test_rule_only_mode_sends_fallback_greeting() {
    let h = HarnessBuilder::new().build();
    let conversation = h.add_contact("c1");
    h.inbound(&conversation, "hello", Duration::minutes(20)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.sent, 1);

    let jobs = h.queue.jobs().await;
    match &jobs[0].payload {
        JobPayload::SendMessage { action, text, .. } => {
            assert_eq!(*action, Action::AiChat);
            assert_eq!(text, FALLBACK_GREETING);
        }
        other => panic!("unexpected job {:?}", other),
    }
}

#[tokio::test]
async fn test_classifier_failure_degrades_to_neutral() {
    let h = HarnessBuilder::new()
        .agent(MockBackend::new("mock").with_available(false))
        .build();
    let conversation = h.add_contact("c1");
    h.inbound(&conversation, "hello?", Duration::minutes(5)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.sent, 1);
    assert_eq!(report.reactive.errors, 0);

    let events = h.events_for("c1").await;
    assert_eq!(events[0].intent, Intent::Unknown);
    assert_eq!(events[0].action, EventAction::Outreach(Action::AiChat));
}

#[tokio::test]
async fn test_complaint_is_handed_over_without_sending() {
    let h = HarnessBuilder::new()
        .agent(classifier(
            r#"{"intent":"complaint","sentiment":"negative","buyingSignal":false,"stage":"customer"}"#,
            "unused",
        ))
        .build();
    let conversation = h.add_contact("c1");
    h.inbound(&conversation, "my order never arrived", Duration::minutes(30)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.handed_over, 1);
    assert_eq!(report.reactive.sent, 0);
    assert!(h.queue.jobs().await.is_empty());

    let events = h.events_for("c1").await;
    assert_eq!(events[0].action, EventAction::Outreach(Action::HandoverHuman));
    assert!(matches!(events[0].meta, EventMeta::Handover { .. }));
}

#[tokio::test]
async fn test_night_message_gets_canned_reply() {
    let h = HarnessBuilder::new()
        .at(Utc.with_ymd_and_hms(2024, 5, 6, 23, 30, 0).unwrap())
        .build();
    let conversation = h.add_contact("c1");
    h.inbound(&conversation, "are you open?", Duration::minutes(10)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.sent, 1);
    assert_eq!(
        report.proactive.skipped_reason.as_deref(),
        Some("outside_operating_window")
    );

    match &h.queue.jobs().await[0].payload {
        JobPayload::SendMessage { action, .. } => assert_eq!(*action, Action::AutoReplyNight),
        other => panic!("unexpected job {:?}", other),
    }
    let events = h.events_for("c1").await;
    assert!(matches!(
        events[0].meta,
        EventMeta::Dispatch {
            text_source: autopilot::TextSource::Canned,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cycle_limit_caps_reactive_phase() {
    let h = HarnessBuilder::new().config(|c| c.cycle_limit = 2).build();
    for id in ["c1", "c2", "c3"] {
        let conversation = h.add_contact(id);
        h.inbound(&conversation, "hi", Duration::minutes(15)).await;
    }

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.considered, 2);
    assert_eq!(h.queue.jobs().await.len(), 2);
}

#[tokio::test]
async fn test_concurrent_phase_processes_everything() {
    let h = HarnessBuilder::new().config(|c| c.cycle_concurrency = 4).build();
    for i in 0..6 {
        let conversation = h.add_contact(&format!("c{}", i));
        h.inbound(&conversation, "hi", Duration::minutes(i + 1)).await;
    }

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.considered, 6);
    assert_eq!(report.reactive.sent, 6);
    assert_eq!(h.queue.jobs().await.len(), 6);
}

// =============================================================================
// Compliance
// =============================================================================

#[tokio::test]
async fn test_missing_opt_in_is_skipped() {
    let h = HarnessBuilder::new()
        .workspace(|w| w.require_opt_in = Some(true))
        .build();
    let conversation = h.add_contact("c1");
    h.inbound(&conversation, "hello", Duration::hours(1)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.blocked, 1);
    assert!(h.queue.jobs().await.is_empty());

    let events = h.events_for("c1").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, EventStatus::Skipped);
    assert_eq!(events[0].reason, "optin_required");
}

#[tokio::test]
async fn test_opted_in_contact_is_served() {
    let h = HarnessBuilder::new()
        .workspace(|w| w.require_opt_in = Some(true))
        .build();
    let conversation = h.add_contact("c1");
    h.store
        .insert_contact(autopilot::Contact::new(WS, "c1", "+5511900000001").with_tag("opt-in"));
    h.inbound(&conversation, "hello", Duration::hours(1)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.sent, 1);
}

#[tokio::test]
async fn test_expired_session_is_skipped() {
    let h = HarnessBuilder::new().build();
    let conversation = h.add_contact("c1");
    h.inbound(&conversation, "hello", Duration::hours(30)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.blocked, 1);

    let events = h.events_for("c1").await;
    assert_eq!(events[0].reason, "session_expired_24h");
}

#[tokio::test]
async fn test_stale_conversation_does_not_starve_fresh_ones() {
    let h = HarnessBuilder::new().config(|c| c.cycle_limit = 1).build();
    let stale = h.add_contact("c-old");
    h.inbound(&stale, "anyone there?", Duration::hours(30)).await;
    let fresh = h.add_contact("c-new");
    h.inbound(&fresh, "hi, still open?", Duration::minutes(10)).await;

    let first = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(first.reactive.blocked, 1);
    let second = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(second.reactive.sent, 1);
    let third = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(third.reactive.considered, 0);

    let stale_events = h.events_for("c-old").await;
    assert_eq!(stale_events.len(), 1);
    assert_eq!(stale_events[0].reason, "session_expired_24h");

    let jobs = h.queue.jobs().await;
    assert_eq!(jobs.len(), 1);
    match &jobs[0].payload {
        JobPayload::SendMessage { contact_id, .. } => assert_eq!(contact_id, "c-new"),
        other => panic!("unexpected job {:?}", other),
    }
}

#[tokio::test]
async fn test_dispatch_keeps_later_messages_unread() {
    let h = HarnessBuilder::new().build();
    let conversation = h.add_contact("c1");
    h.inbound(&conversation, "hello", Duration::minutes(5)).await;
    let snapshot = h.store.unread_conversations(WS, 10).await.unwrap().remove(0);

    h.inbound(&conversation, "hello again", Duration::minutes(1)).await;
    let workspace = h.store.get_workspace(WS).await.unwrap().unwrap();
    let outcome = h
        .engine
        .dispatcher()
        .execute_action(
            &workspace,
            Action::AiChat,
            &snapshot,
            &Analysis::neutral(),
            CyclePhase::Reactive,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Sent { .. }));

    let unread = h.store.unread_conversations(WS, 10).await.unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].unread_count, 1);
}

#[tokio::test]
async fn test_dispatcher_rechecks_compliance() {
    let h = HarnessBuilder::new().build();
    let conversation = h.add_contact("c1");
    h.inbound(&conversation, "hello", Duration::minutes(23 * 60 + 30)).await;
    let workspace = h.store.get_workspace(WS).await.unwrap().unwrap();
    let contact = h.store.get_contact(WS, "c1").await.unwrap().unwrap();

    // Inside the window when the action is decided
    let settings = ComplianceSettings::effective(&workspace, h.engine.runtime_config());
    let messages = h.store.recent_messages(WS, &conversation.id, 20).await.unwrap();
    assert!(compliance::check(&settings, &contact, &messages, h.now()).allowed);

    // Session lapses before the send goes out
    h.clock.advance(Duration::hours(1));
    let outcome = h
        .engine
        .dispatcher()
        .execute_action(
            &workspace,
            Action::SendOffer,
            &conversation,
            &Analysis::neutral().with_buying_signal(true),
            CyclePhase::Reactive,
        )
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Blocked(BlockReason::SessionExpired));
    assert!(h.queue.jobs().await.is_empty());
    assert_eq!(h.events_for("c1").await[0].reason, "session_expired_24h");
}

// =============================================================================
// Limits
// =============================================================================

#[tokio::test]
async fn test_contact_daily_limit() {
    let h = HarnessBuilder::new().build();
    let conversation = h.add_contact("c1");
    for hours in 1..=3 {
        h.seed_event("c1", EventStatus::Executed, Duration::hours(hours)).await;
    }
    h.inbound(&conversation, "one more thing", Duration::minutes(10)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.limited, 1);
    assert!(h.queue.jobs().await.is_empty());

    let events = h.events_for("c1").await;
    let last = events.last().unwrap();
    assert_eq!(last.status, EventStatus::Skipped);
    assert_eq!(last.reason, "contact_daily_limit");
}

#[tokio::test]
async fn test_conversions_do_not_count_toward_limit() {
    let h = HarnessBuilder::new().build();
    let conversation = h.add_contact("c1");
    for order_id in ["ord-1", "ord-2", "ord-3"] {
        h.engine
            .mark_conversion(ConversionInput {
                workspace_id: WS.to_string(),
                contact_id: Some("c1".to_string()),
                reason: "checkout_completed".to_string(),
                order_id: Some(order_id.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
    }
    h.inbound(&conversation, "when does it ship?", Duration::minutes(10)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.limited, 0);
    assert_eq!(report.reactive.sent, 1);
}

#[tokio::test]
async fn test_old_actions_do_not_count_toward_limit() {
    let h = HarnessBuilder::new().build();
    let conversation = h.add_contact("c1");
    for hours in 25..=27 {
        h.seed_event("c1", EventStatus::Executed, Duration::hours(hours)).await;
    }
    h.inbound(&conversation, "hi again", Duration::minutes(10)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.sent, 1);
}

#[tokio::test]
async fn test_workspace_daily_limit() {
    let h = HarnessBuilder::new()
        .config(|c| c.workspace_daily_limit = 1)
        .build();
    h.seed_event("someone-else", EventStatus::Executed, Duration::hours(2)).await;
    let conversation = h.add_contact("c1");
    h.inbound(&conversation, "hello", Duration::minutes(10)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.reactive.limited, 1);
    assert_eq!(h.events_for("c1").await[0].reason, "workspace_daily_limit");
}

// =============================================================================
// Proactive phase
// =============================================================================

#[tokio::test]
async fn test_proactive_skipped_far_from_best_hour() {
    let h = HarnessBuilder::new()
        .workspace(|w| w.enforce_24h = Some(false))
        .build();
    let conversation = h.add_contact("c1");
    h.outbound(&conversation, "did you get a chance to look?", Duration::hours(30))
        .await;

    // No inbound history: best hour defaults to 10, four hours away
    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.best_hour, Some(10));
    assert_eq!(report.proactive.skipped_reason.as_deref(), Some("not_optimal_hour"));
    assert!(h.queue.jobs().await.is_empty());
}

#[tokio::test]
async fn test_stalled_conversation_gets_lead_unlocker() {
    let h = HarnessBuilder::new()
        .workspace(|w| w.enforce_24h = Some(false))
        .build();

    // Traffic history peaking at 13:00
    let active = h.add_contact("c2");
    h.inbound(&active, "morning", Duration::hours(25)).await;
    h.outbound(&active, "hi!", Duration::hours(2)).await;
    h.store.mark_conversation_read(WS, &active.id, 1).await.unwrap();

    let stalled = h.add_contact("c1");
    h.outbound(&stalled, "here is the quote", Duration::hours(30)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.best_hour, Some(13));
    assert_eq!(report.reactive.considered, 0);
    assert_eq!(report.proactive.considered, 1);
    assert_eq!(report.proactive.sent, 1);

    match &h.queue.jobs().await[0].payload {
        JobPayload::SendMessage { action, contact_id, .. } => {
            assert_eq!(*action, Action::LeadUnlocker);
            assert_eq!(contact_id, "c1");
        }
        other => panic!("unexpected job {:?}", other),
    }
    let events = h.events_for("c1").await;
    assert!(matches!(
        events[0].meta,
        EventMeta::Dispatch {
            phase: CyclePhase::Proactive,
            ..
        }
    ));
}

#[tokio::test]
async fn test_queue_backpressure_skips_proactive() {
    let h = HarnessBuilder::new()
        .config(|c| c.queue_waiting_threshold = 0)
        .workspace(|w| w.enforce_24h = Some(false))
        .build();
    h.queue
        .enqueue(
            JobPayload::Dispatch {
                workspace_id: WS.to_string(),
                contact_id: "other".to_string(),
                reason: "backlog".to_string(),
            },
            None,
        )
        .await
        .unwrap();
    let conversation = h.add_contact("c1");
    h.outbound(&conversation, "ping", Duration::hours(40)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.proactive.skipped_reason.as_deref(), Some("queue_backpressure"));
    assert_eq!(h.queue.jobs().await.len(), 1);
}

// =============================================================================
// Preconditions
// =============================================================================

#[tokio::test]
async fn test_disabled_workspace_is_skipped() {
    let h = HarnessBuilder::new()
        .workspace(|w| w.autopilot_enabled = false)
        .build();
    let conversation = h.add_contact("c1");
    h.inbound(&conversation, "hello", Duration::minutes(5)).await;

    let report = h.engine.run_cycle(WS).await.unwrap();
    assert_eq!(report.skipped_reason.as_deref(), Some("autopilot_disabled"));
    assert!(h.queue.jobs().await.is_empty());
}

#[tokio::test]
async fn test_suspended_workspace_aborts() {
    let h = HarnessBuilder::new()
        .workspace(|w| w.billing_status = BillingStatus::Suspended)
        .build();
    assert!(matches!(
        h.engine.run_cycle(WS).await,
        Err(AutopilotError::BillingSuspended(_))
    ));
}
