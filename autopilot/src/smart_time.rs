//! Smart time - best hour and weekday to reach a workspace's contacts.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::store::CrmStore;
use crate::types::Result;

/// Best hour when there is no history.
pub const DEFAULT_BEST_HOUR: u32 = 10;
/// Best weekday (Monday) when there is no history.
pub const DEFAULT_BEST_DAY: u32 = 1;

const HOUR_MS: i64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Inbound counts per hour of day and per weekday (0 = Sunday).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub hourly: [u32; 24],
    pub daily: [u32; 7],
}

/// Result of a best-time analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestTime {
    pub best_hour: u32,
    pub best_day: u32,
    pub confidence: Confidence,
    pub total_analyzed: usize,
    pub distribution: Distribution,
}

fn argmax(counts: &[u32]) -> usize {
    // First peak wins on ties
    let mut best = 0;
    for (i, count) in counts.iter().enumerate() {
        if *count > counts[best] {
            best = i;
        }
    }
    best
}

/// Bucket inbound timestamps and pick the peaks.
pub fn analyze(timestamps: &[DateTime<Utc>], offset: FixedOffset) -> BestTime {
    let mut distribution = Distribution {
        hourly: [0; 24],
        daily: [0; 7],
    };
    for at in timestamps {
        let local = at.with_timezone(&offset);
        distribution.hourly[local.hour() as usize] += 1;
        distribution.daily[local.weekday().num_days_from_sunday() as usize] += 1;
    }

    if timestamps.is_empty() {
        return BestTime {
            best_hour: DEFAULT_BEST_HOUR,
            best_day: DEFAULT_BEST_DAY,
            confidence: Confidence::Low,
            total_analyzed: 0,
            distribution,
        };
    }

    let best_hour = argmax(&distribution.hourly);
    let best_day = argmax(&distribution.daily);
    let mean = timestamps.len() as f64 / 24.0;
    let peak = distribution.hourly[best_hour] as f64;
    let confidence = if peak > 2.0 * mean {
        Confidence::High
    } else {
        Confidence::Medium
    };

    BestTime {
        best_hour: best_hour as u32,
        best_day: best_day as u32,
        confidence,
        total_analyzed: timestamps.len(),
        distribution,
    }
}

/// Milliseconds from `current_hour` until the next `target_hour`; a target
/// equal to the current hour means tomorrow.
pub fn compute_delay(target_hour: u32, current_hour: u32) -> i64 {
    let mut delta = target_hour as i64 - current_hour as i64;
    if delta <= 0 {
        delta += 24;
    }
    delta * HOUR_MS
}

/// Distance between two hours on the 24h circle.
pub fn hour_distance(a: u32, b: u32) -> u32 {
    let diff = (a % 24).abs_diff(b % 24);
    diff.min(24 - diff)
}

/// Within one hour of the best hour.
pub fn is_optimal_hour(current_hour: u32, best_hour: u32) -> bool {
    hour_distance(current_hour, best_hour) <= 1
}

/// Best-time analysis over a store.
pub struct SmartTime {
    store: Arc<dyn CrmStore>,
    clock: Arc<dyn Clock>,
    config: Arc<RuntimeConfig>,
}

impl SmartTime {
    pub fn new(store: Arc<dyn CrmStore>, clock: Arc<dyn Clock>, config: Arc<RuntimeConfig>) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Analyze the workspace's recent inbound traffic.
    pub async fn best_time(&self, workspace_id: &str) -> Result<BestTime> {
        let since = self.clock.now() - Duration::days(self.config.smart_time_lookback_days);
        let timestamps = self
            .store
            .inbound_timestamps(workspace_id, since, self.config.smart_time_sample_limit)
            .await?;

        let best = analyze(&timestamps, self.config.offset());
        debug!(
            workspace_id = %workspace_id,
            best_hour = best.best_hour,
            best_day = best.best_day,
            confidence = ?best.confidence,
            total_analyzed = best.total_analyzed,
            "Best time computed"
        );
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_no_data_defaults() {
        let best = analyze(&[], utc());
        assert_eq!(best.best_hour, 10);
        assert_eq!(best.best_day, 1);
        assert_eq!(best.confidence, Confidence::Low);
        assert_eq!(best.total_analyzed, 0);
    }

    #[test]
    fn test_peak_hour_and_day() {
        // 2024-05-07 is a Tuesday
        let stamps: Vec<DateTime<Utc>> = (0..5)
            .map(|i| Utc.with_ymd_and_hms(2024, 5, 7, 15, i * 10, 0).unwrap())
            .chain(std::iter::once(Utc.with_ymd_and_hms(2024, 5, 5, 9, 0, 0).unwrap()))
            .collect();
        let best = analyze(&stamps, utc());
        assert_eq!(best.best_hour, 15);
        assert_eq!(best.best_day, 2);
        assert_eq!(best.confidence, Confidence::High);
        assert_eq!(best.distribution.daily[0], 1);
        assert_eq!(best.total_analyzed, 6);
    }

    #[test]
    fn test_flat_distribution_is_medium() {
        let stamps: Vec<DateTime<Utc>> = (0..24)
            .map(|h| Utc.with_ymd_and_hms(2024, 5, 7, h, 0, 0).unwrap())
            .collect();
        let best = analyze(&stamps, utc());
        assert_eq!(best.best_hour, 0);
        assert_eq!(best.confidence, Confidence::Medium);
    }

    #[test]
    fn test_offset_shifts_buckets() {
        let stamps = vec![Utc.with_ymd_and_hms(2024, 5, 7, 1, 0, 0).unwrap()];
        let best = analyze(&stamps, FixedOffset::west_opt(3 * 3600).unwrap());
        assert_eq!(best.best_hour, 22);
        // Monday evening locally
        assert_eq!(best.best_day, 1);
    }

    #[test]
    fn test_compute_delay() {
        assert_eq!(compute_delay(9, 14), 19 * 3_600_000);
        assert_eq!(compute_delay(15, 14), 3_600_000);
        assert_eq!(compute_delay(14, 14), 24 * 3_600_000);
    }

    #[test]
    fn test_hour_distance_wraps() {
        assert_eq!(hour_distance(23, 0), 1);
        assert_eq!(hour_distance(2, 22), 4);
        assert_eq!(hour_distance(10, 13), 3);
        assert!(is_optimal_hour(0, 23));
        assert!(!is_optimal_hour(12, 10));
    }
}
