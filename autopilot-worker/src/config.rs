//! Configuration for the Autopilot worker
//!
//! CLI arguments and environment variable handling using clap. Engine
//! tunables come from an optional YAML file; the flags below override it.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use autopilot::RuntimeConfig;

/// Autopilot worker - runs outreach cycles and operator commands
#[derive(Parser, Debug, Clone)]
#[command(name = "autopilot-worker")]
#[command(about = "Autonomous outreach decision engine for messaging CRMs")]
pub struct Args {
    /// YAML file with engine tunables
    #[arg(long, env = "AUTOPILOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// JSON snapshot of workspaces, contacts, conversations, messages and events
    #[arg(long, env = "AUTOPILOT_FIXTURE")]
    pub fixture: Option<PathBuf>,

    /// Write the store back to the fixture file on exit
    #[arg(long, env = "AUTOPILOT_PERSIST", default_value = "false")]
    pub persist: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Model settings
    #[command(flatten)]
    pub ai: AiArgs,

    /// Engine overrides
    #[command(flatten)]
    pub tuning: TuningArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// OpenAI-compatible model endpoint. Without a model the engine is rule-only.
#[derive(Parser, Debug, Clone)]
pub struct AiArgs {
    /// Chat completions base URL
    #[arg(long, env = "AI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub ai_base_url: String,

    /// Model name; leave unset to run without a model
    #[arg(long, env = "AI_MODEL")]
    pub ai_model: Option<String>,

    /// API key (optional for local servers)
    #[arg(long, env = "AI_API_KEY", hide_env_values = true)]
    pub ai_api_key: Option<String>,

    /// Per-call timeout in milliseconds
    #[arg(long, env = "AI_TIMEOUT_MS", default_value = "15000")]
    pub ai_timeout_ms: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct TuningArgs {
    /// First local hour of the proactive operating window
    #[arg(long, env = "AUTOPILOT_WINDOW_START")]
    pub window_start: Option<u32>,

    /// Local hour at which the operating window closes
    #[arg(long, env = "AUTOPILOT_WINDOW_END")]
    pub window_end: Option<u32>,

    /// Hours of silence before a conversation counts as stalled
    #[arg(long, env = "AUTOPILOT_SILENCE_HOURS")]
    pub silence_hours: Option<i64>,

    /// Conversations per phase per cycle
    #[arg(long, env = "AUTOPILOT_CYCLE_LIMIT")]
    pub cycle_limit: Option<usize>,

    /// Conversations processed concurrently within a phase
    #[arg(long, env = "AUTOPILOT_CONCURRENCY")]
    pub cycle_concurrency: Option<usize>,

    /// Offset from UTC (minutes) for hour-of-day decisions
    #[arg(long, env = "AUTOPILOT_UTC_OFFSET_MINUTES", allow_hyphen_values = true)]
    pub utc_offset_minutes: Option<i32>,

    /// Executed actions allowed per contact per 24h
    #[arg(long, env = "AUTOPILOT_CONTACT_DAILY_LIMIT")]
    pub contact_daily_limit: Option<usize>,

    /// Executed actions allowed per workspace per 24h
    #[arg(long, env = "AUTOPILOT_WORKSPACE_DAILY_LIMIT")]
    pub workspace_daily_limit: Option<usize>,

    /// Waiting jobs above which proactive outreach pauses
    #[arg(long, env = "AUTOPILOT_QUEUE_THRESHOLD")]
    pub queue_waiting_threshold: Option<usize>,

    /// Require an opt-in marker by default
    #[arg(long, env = "AUTOPILOT_ENFORCE_OPT_IN")]
    pub enforce_opt_in: Option<bool>,

    /// Require an inbound message within 24h by default
    #[arg(long, env = "AUTOPILOT_ENFORCE_24H")]
    pub enforce_24h: Option<bool>,

    /// Minimum seconds between retries of one contact
    #[arg(long, env = "AUTOPILOT_RETRY_COOLDOWN_SECS")]
    pub retry_cooldown_secs: Option<i64>,

    /// Window (seconds) over which recent errors are counted
    #[arg(long, env = "AUTOPILOT_RETRY_ERROR_WINDOW_SECS")]
    pub retry_error_window_secs: Option<i64>,

    /// Errors within the window that trigger the backoff
    #[arg(long, env = "AUTOPILOT_RETRY_ERROR_THRESHOLD")]
    pub retry_error_threshold: Option<usize>,

    /// Backoff (seconds) once the error threshold is hit
    #[arg(long, env = "AUTOPILOT_RETRY_ERROR_BACKOFF_SECS")]
    pub retry_error_backoff_secs: Option<i64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run cycles on an interval until interrupted
    Run {
        /// Workspaces to serve (default: every workspace in the store)
        #[arg(long = "workspace", env = "AUTOPILOT_WORKSPACES", value_delimiter = ',')]
        workspaces: Vec<String>,

        /// Seconds between cycles
        #[arg(long, env = "AUTOPILOT_INTERVAL_SECS", default_value = "60")]
        interval_secs: u64,
    },

    /// Run one cycle for a workspace
    Cycle {
        #[arg(long)]
        workspace: String,
    },

    /// Retry a contact now or schedule a later attempt
    Retry {
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        contact: String,
    },

    /// Record a conversion
    Convert {
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        contact: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        order_id: Option<String>,
        #[arg(long)]
        amount: Option<f64>,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Best hour and weekday for a workspace
    BestTime {
        #[arg(long)]
        workspace: String,
    },

    /// Recommend the next action for a contact
    NextAction {
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        contact: String,
    },

    /// Enable or disable autopilot for a workspace
    Toggle {
        #[arg(long)]
        workspace: String,
        #[arg(long, action = ArgAction::Set)]
        enabled: bool,
    },

    /// Print the effective engine configuration as YAML
    Config,
}

impl Args {
    /// Engine configuration: YAML file (if any) with flag overrides applied.
    pub fn runtime_config(&self) -> Result<RuntimeConfig, String> {
        let mut config = match &self.config {
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
                RuntimeConfig::from_yaml(&yaml)
                    .map_err(|e| format!("invalid config {}: {}", path.display(), e))?
            }
            None => RuntimeConfig::default(),
        };

        let t = &self.tuning;
        if let Some(v) = t.window_start {
            config.window_start = v;
        }
        if let Some(v) = t.window_end {
            config.window_end = v;
        }
        if let Some(v) = t.silence_hours {
            config.silence_hours = v;
        }
        if let Some(v) = t.cycle_limit {
            config.cycle_limit = v;
        }
        if let Some(v) = t.cycle_concurrency {
            config.cycle_concurrency = v;
        }
        if let Some(v) = t.utc_offset_minutes {
            config.utc_offset_minutes = v;
        }
        if let Some(v) = t.contact_daily_limit {
            config.contact_daily_limit = v;
        }
        if let Some(v) = t.workspace_daily_limit {
            config.workspace_daily_limit = v;
        }
        if let Some(v) = t.queue_waiting_threshold {
            config.queue_waiting_threshold = v;
        }
        if let Some(v) = t.enforce_opt_in {
            config.enforce_opt_in = v;
        }
        if let Some(v) = t.enforce_24h {
            config.enforce_24h = v;
        }
        if let Some(v) = t.retry_cooldown_secs {
            config.retry.cooldown_secs = v;
        }
        if let Some(v) = t.retry_error_window_secs {
            config.retry.error_window_secs = v;
        }
        if let Some(v) = t.retry_error_threshold {
            config.retry.error_threshold = v;
        }
        if let Some(v) = t.retry_error_backoff_secs {
            config.retry.error_backoff_secs = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.persist && self.fixture.is_none() {
            return Err("--persist requires --fixture".to_string());
        }
        if self.ai.ai_model.as_deref().is_some_and(str::is_empty) {
            return Err("AI_MODEL must not be empty".to_string());
        }
        if let Command::Run { interval_secs, .. } = &self.command {
            if *interval_secs == 0 {
                return Err("interval must be at least one second".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("autopilot-worker").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_overrides_apply_over_defaults() {
        let args = parse(&["--cycle-limit", "5", "--utc-offset-minutes", "-180", "cycle", "--workspace", "ws"]);
        let config = args.runtime_config().unwrap();
        assert_eq!(config.cycle_limit, 5);
        assert_eq!(config.utc_offset_minutes, -180);
        assert_eq!(config.contact_daily_limit, RuntimeConfig::default().contact_daily_limit);
    }

    #[test]
    fn test_window_silence_and_retry_overrides() {
        let args = parse(&[
            "--window-start",
            "8",
            "--window-end",
            "20",
            "--silence-hours",
            "12",
            "--retry-cooldown-secs",
            "60",
            "--retry-error-threshold",
            "5",
            "config",
        ]);
        let config = args.runtime_config().unwrap();
        assert_eq!((config.window_start, config.window_end), (8, 20));
        assert_eq!(config.silence_hours, 12);
        assert_eq!(config.retry.cooldown_secs, 60);
        assert_eq!(config.retry.error_threshold, 5);
        assert_eq!(config.retry.error_backoff_secs, 30 * 60);
    }

    #[test]
    fn test_out_of_range_window_is_rejected() {
        let args = parse(&["--window-start", "25", "config"]);
        assert!(args.runtime_config().is_err());
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = parse(&["--cycle-concurrency", "0", "config"]);
        assert!(args.runtime_config().is_err());
    }

    #[test]
    fn test_persist_needs_fixture() {
        let args = parse(&["--persist", "config"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_toggle_parses_explicit_bool() {
        let args = parse(&["toggle", "--workspace", "ws", "--enabled", "false"]);
        assert!(matches!(args.command, Command::Toggle { enabled: false, .. }));
    }
}
