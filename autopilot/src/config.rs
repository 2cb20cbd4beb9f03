//! Runtime configuration for the Autopilot engine.

use chrono::{Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Tunables of the outreach engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// First local hour (inclusive) of the proactive operating window
    pub window_start: u32,
    /// Local hour (exclusive) at which the operating window closes
    pub window_end: u32,
    /// Silence (hours) after which a conversation counts as stalled
    pub silence_hours: i64,
    /// Maximum conversations per phase per cycle
    pub cycle_limit: usize,
    /// Maximum executed actions per contact in 24h
    pub contact_daily_limit: usize,
    /// Maximum executed actions per workspace in 24h
    pub workspace_daily_limit: usize,
    /// Waiting jobs above which the proactive phase backs off
    pub queue_waiting_threshold: usize,
    /// Require an opt-in marker before contacting (workspace may override)
    pub enforce_opt_in: bool,
    /// Require an inbound message within 24h (workspace may override)
    pub enforce_24h: bool,
    /// Conversations processed concurrently within a phase
    pub cycle_concurrency: usize,
    /// Messages of history passed to the classifier and generator
    pub history_limit: usize,
    /// Offset from UTC used for every hour-of-day computation
    pub utc_offset_minutes: i32,
    /// Smart time lookback (days)
    pub smart_time_lookback_days: i64,
    /// Maximum inbound timestamps sampled by smart time
    pub smart_time_sample_limit: usize,
    /// Retry backoff policy
    pub retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            window_start: 8,
            window_end: 22,
            silence_hours: 24,
            cycle_limit: 50,
            contact_daily_limit: 3,
            workspace_daily_limit: 500,
            queue_waiting_threshold: 1000,
            enforce_opt_in: false,
            enforce_24h: true,
            cycle_concurrency: 1,
            history_limit: 20,
            utc_offset_minutes: 0,
            smart_time_lookback_days: 30,
            smart_time_sample_limit: 5000,
            retry: RetryPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.window_start > 23 || self.window_end > 24 {
            return Err("window_start must be 0-23 and window_end 0-24".to_string());
        }
        if self.cycle_concurrency == 0 {
            return Err("cycle_concurrency must be at least 1".to_string());
        }
        if self.silence_hours <= 0 {
            return Err("silence_hours must be positive".to_string());
        }
        let retry = &self.retry;
        if retry.cooldown_secs < 0 || retry.error_window_secs < 0 || retry.error_backoff_secs < 0 {
            return Err("retry durations must not be negative".to_string());
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err("utc_offset_minutes must be within one day".to_string());
        }
        Ok(())
    }

    /// Whether `hour` falls inside the operating window. A window whose start
    /// is after its end wraps past midnight; equal bounds mean always open.
    pub fn in_operating_window(&self, hour: u32) -> bool {
        if self.window_start == self.window_end {
            return true;
        }
        if self.window_start < self.window_end {
            hour >= self.window_start && hour < self.window_end
        } else {
            hour >= self.window_start || hour < self.window_end
        }
    }

    /// Local time offset for hour-of-day computations.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn silence(&self) -> Duration {
        Duration::hours(self.silence_hours)
    }
}

/// Per-contact retry backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Minimum spacing between automated actions (seconds)
    pub cooldown_secs: i64,
    /// Window in which error events are counted (seconds)
    pub error_window_secs: i64,
    /// Error count that triggers the backoff
    pub error_threshold: usize,
    /// Backoff applied once the threshold is reached (seconds)
    pub error_backoff_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            cooldown_secs: 5 * 60,
            error_window_secs: 60 * 60,
            error_threshold: 3,
            error_backoff_secs: 30 * 60,
        }
    }
}

impl RetryPolicy {
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs)
    }

    pub fn error_window(&self) -> Duration {
        Duration::seconds(self.error_window_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::seconds(self.error_backoff_secs)
    }
}
