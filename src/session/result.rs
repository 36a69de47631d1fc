use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::metrics::Metrics;
use crate::engine::weak_keys::{StreakMerge, WeakKeyStat, merge_weak_keys};
use crate::session::counters::RunningCounters;

/// Point-in-time metrics for charting. Appended in order, never reordered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub wpm: f64,
    pub cpm: f64,
    pub kpm: f64,
    pub accuracy: f64,
    pub errors: usize,
    pub combo: usize,
}

impl MetricSnapshot {
    pub fn new(timestamp: DateTime<Utc>, metrics: &Metrics, errors: usize, combo: usize) -> Self {
        Self {
            timestamp,
            wpm: metrics.wpm,
            cpm: metrics.cpm,
            kpm: metrics.kpm,
            accuracy: metrics.accuracy,
            errors,
            combo,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintSetResult {
    pub set_index: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub metrics: MetricSnapshot,
    pub weak_keys: Vec<WeakKeyStat>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phrase_list_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub gross_wpm: f64,
    pub net_wpm: f64,
    pub accuracy: f64,
    pub total_keystrokes: usize,
    pub error_count: usize,
    #[serde(default)]
    pub weak_keys: Vec<WeakKeyStat>,
}

/// Session-wide identity and totals that the set results do not carry.
pub struct SessionTotals<'a> {
    pub session_id: &'a str,
    pub lesson_id: Option<&'a str>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_keystrokes: usize,
}

impl SessionMetrics {
    /// Average the set results into one session summary. Weak keys are
    /// combined across sets (worst accuracy, best streak); when that yields
    /// nothing the last set's stats are used.
    pub fn from_sets(results: &[SprintSetResult], totals: SessionTotals<'_>) -> Self {
        let count = results.len().max(1) as f64;
        let gross_wpm = results.iter().map(|r| r.metrics.wpm).sum::<f64>() / count;
        let accuracy = if results.is_empty() {
            100.0
        } else {
            results.iter().map(|r| r.metrics.accuracy).sum::<f64>() / count
        };
        let error_count = results.iter().map(|r| r.metrics.errors).sum();

        let mut weak_keys = combine_set_weak_keys(results);
        if weak_keys.is_empty()
            && let Some(last) = results.last()
        {
            weak_keys = last.weak_keys.clone();
        }

        Self {
            session_id: totals.session_id.to_string(),
            lesson_id: totals.lesson_id.map(str::to_string),
            phrase_list_id: None,
            started_at: totals.started_at,
            completed_at: Some(totals.completed_at),
            duration_ms: totals.duration_ms,
            gross_wpm,
            net_wpm: gross_wpm * (accuracy / 100.0),
            accuracy,
            total_keystrokes: totals.total_keystrokes,
            error_count,
            weak_keys,
        }
    }
}

pub fn combine_set_weak_keys(results: &[SprintSetResult]) -> Vec<WeakKeyStat> {
    results.iter().fold(Vec::new(), |acc, result| {
        merge_weak_keys(&acc, &result.weak_keys, StreakMerge::Max)
    })
}

/// Summary snapshot for a finished set: reports the best combo of the set.
pub fn set_summary_snapshot(
    ended_at: DateTime<Utc>,
    metrics: &Metrics,
    counters: &RunningCounters,
) -> MetricSnapshot {
    MetricSnapshot::new(ended_at, metrics, counters.errors, counters.max_combo)
}
