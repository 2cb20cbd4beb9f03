//! Autopilot worker - cycle loop and operator commands for the outreach engine

mod config;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autopilot::conversion::ConversionInput;
use autopilot::queue::{JobQueue, MemoryQueue};
use autopilot::store::{MemoryStore, Snapshot};
use autopilot::AutopilotEngine;
use autopilot_agent::backend::OpenAiBackend;
use autopilot_agent::{AgentConfig, OutreachAgent};

use crate::config::{Args, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }
    let runtime = match args.runtime_config() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Command::Config = args.command {
        print!("{}", runtime.to_yaml()?);
        return Ok(());
    }

    let store = Arc::new(load_store(&args)?);
    let queue = Arc::new(MemoryQueue::new());
    let agent = build_agent(&args)?;

    info!("======================================");
    info!("  Autopilot - outreach decision engine");
    info!("======================================");
    info!("Store: {}", args.fixture.as_ref().map_or("empty".to_string(), |p| p.display().to_string()));
    info!("Model: {}", args.ai.ai_model.as_deref().unwrap_or("none (rule-only)"));
    info!(
        "Window: {:02}:00-{:02}:00, UTC offset {} min",
        runtime.window_start, runtime.window_end, runtime.utc_offset_minutes
    );
    info!("Concurrency: {}", runtime.cycle_concurrency);
    info!("======================================");

    let mut builder = AutopilotEngine::builder()
        .with_store(store.clone())
        .with_queue(queue.clone())
        .with_config(runtime);
    if let Some(agent) = agent {
        builder = builder.with_agent(agent);
    }
    let engine = builder.build()?;

    let result = execute(&args, &engine, &store, &queue).await;

    // Stop accepting work before persisting
    if let Err(e) = queue.close().await {
        warn!("Queue close failed: {}", e);
    }
    if args.persist {
        if let Some(path) = &args.fixture {
            let json = store.snapshot().await.to_json()?;
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!("Store persisted to {}", path.display());
        }
    }

    result
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "autopilot={level},autopilot_agent={level},autopilot_worker={level},info",
            level = args.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_store(args: &Args) -> anyhow::Result<MemoryStore> {
    let Some(path) = &args.fixture else {
        return Ok(MemoryStore::new());
    };
    if !path.exists() {
        warn!("Fixture {} not found, starting empty", path.display());
        return Ok(MemoryStore::new());
    }
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let snapshot = Snapshot::from_json(&json).with_context(|| format!("parsing {}", path.display()))?;
    Ok(MemoryStore::from_snapshot(snapshot))
}

fn build_agent(args: &Args) -> anyhow::Result<Option<Arc<OutreachAgent>>> {
    let Some(model) = &args.ai.ai_model else {
        return Ok(None);
    };
    let backend = OpenAiBackend::new(
        args.ai.ai_base_url.clone(),
        model.clone(),
        args.ai.ai_api_key.clone(),
        Duration::from_millis(args.ai.ai_timeout_ms),
    )?;
    let agent = OutreachAgent::new(Arc::new(backend)).with_config(AgentConfig {
        timeout_ms: args.ai.ai_timeout_ms,
        ..AgentConfig::default()
    });
    Ok(Some(Arc::new(agent)))
}

async fn execute(
    args: &Args,
    engine: &AutopilotEngine,
    store: &MemoryStore,
    queue: &MemoryQueue,
) -> anyhow::Result<()> {
    match &args.command {
        Command::Run {
            workspaces,
            interval_secs,
        } => run_loop(engine, store, queue, workspaces, *interval_secs).await,
        Command::Cycle { workspace } => print_json(&engine.run_cycle(workspace).await?),
        Command::Retry { workspace, contact } => {
            print_json(&engine.retry_contact(workspace, contact).await?)
        }
        Command::Convert {
            workspace,
            contact,
            phone,
            order_id,
            amount,
            currency,
            provider,
            reason,
        } => {
            let input = ConversionInput {
                workspace_id: workspace.clone(),
                contact_id: contact.clone(),
                phone: phone.clone(),
                reason: reason.clone(),
                order_id: order_id.clone(),
                amount: *amount,
                currency: currency.clone(),
                provider: provider.clone(),
            };
            print_json(&engine.mark_conversion(input).await?)
        }
        Command::BestTime { workspace } => print_json(&engine.best_time(workspace).await?),
        Command::NextAction { workspace, contact } => {
            print_json(&engine.next_best_action(workspace, contact).await?)
        }
        Command::Toggle { workspace, enabled } => {
            print_json(&engine.toggle_autopilot(workspace, *enabled).await?)
        }
        Command::Config => print_json(engine.runtime_config()),
    }?;

    // One-shot commands report what they handed to the queue
    if !matches!(args.command, Command::Run { .. }) {
        for job in queue.take_jobs().await {
            print_json(&job)?;
        }
    }
    Ok(())
}

async fn run_loop(
    engine: &AutopilotEngine,
    store: &MemoryStore,
    queue: &MemoryQueue,
    workspaces: &[String],
    interval_secs: u64,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!("Cycle loop started (every {}s)", interval_secs);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                return Ok(());
            }
        }

        let targets: Vec<String> = if workspaces.is_empty() {
            store
                .snapshot()
                .await
                .workspaces
                .into_iter()
                .map(|w| w.id)
                .collect()
        } else {
            workspaces.to_vec()
        };

        for workspace_id in &targets {
            match engine.run_cycle(workspace_id).await {
                Ok(report) => info!(
                    workspace_id = %workspace_id,
                    sent = report.total_sent(),
                    skipped = ?report.skipped_reason,
                    proactive_skipped = ?report.proactive.skipped_reason,
                    "Cycle finished"
                ),
                Err(e) => warn!(workspace_id = %workspace_id, error = %e, "Cycle failed"),
            }
        }

        // Hand accepted jobs to the delivery side
        for job in queue.take_jobs().await {
            info!(
                job_id = %job.id,
                kind = job.payload.kind(),
                delay_ms = job.delay_ms,
                payload = %serde_json::to_string(&job.payload)?,
                "Job handed off"
            );
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
