use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::TimestampMs;

/// Mistakes within this window score close to the maximum weight.
const RECENT_WINDOW_MS: f64 = 60_000.0;
const SCORE_FLOOR: f64 = 1.0;
const CORRECT_DECAY: f64 = 0.95;
pub const DEFAULT_TOP_KEYS: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPerformanceSample {
    pub key: String,
    pub timestamp_ms: TimestampMs,
    pub is_error: bool,
}

/// Persisted per-key miss statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeakKeyStat {
    pub key: String,
    pub miss_count: u32,
    /// 0..=100
    pub accuracy: f64,
    pub streak: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_practiced_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct Aggregation {
    pub stats: Vec<WeakKeyStat>,
    pub weighted_scores: BTreeMap<String, f64>,
}

struct WorkingStat {
    stat: WeakKeyStat,
    attempts: u32,
    weighted_score: f64,
}

impl WorkingStat {
    fn fresh(key: &str) -> Self {
        Self {
            stat: WeakKeyStat {
                key: key.to_string(),
                miss_count: 0,
                accuracy: 100.0,
                streak: 0,
                last_practiced_at: None,
            },
            attempts: 0,
            weighted_score: 0.0,
        }
    }

    fn seeded(stat: &WeakKeyStat) -> Self {
        Self {
            stat: stat.clone(),
            attempts: infer_attempts(stat),
            weighted_score: stat.miss_count as f64,
        }
    }
}

/// Fold a sample stream into per-key stats plus a recency-weighted score.
///
/// `previous` seeds the table (attempts are reconstructed from the stored
/// accuracy), samples are processed in timestamp order, and `reference_time`
/// defaults to now. Stats come out in first-seen order.
pub fn aggregate_weak_keys(
    samples: &[KeyPerformanceSample],
    previous: Option<&[WeakKeyStat]>,
    reference_time: Option<TimestampMs>,
) -> Aggregation {
    let now = reference_time.unwrap_or_else(|| Utc::now().timestamp_millis());
    let mut working: Vec<WorkingStat> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for stat in previous.unwrap_or_default() {
        match index.get(&stat.key) {
            Some(&i) => working[i] = WorkingStat::seeded(stat),
            None => {
                index.insert(stat.key.clone(), working.len());
                working.push(WorkingStat::seeded(stat));
            }
        }
    }

    let mut ordered: Vec<&KeyPerformanceSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.timestamp_ms);

    for sample in ordered {
        let i = *index.entry(sample.key.clone()).or_insert_with(|| {
            working.push(WorkingStat::fresh(&sample.key));
            working.len() - 1
        });
        let entry = &mut working[i];

        entry.attempts = entry.attempts.saturating_add(1);
        entry.stat.last_practiced_at = DateTime::from_timestamp_millis(sample.timestamp_ms);

        if sample.is_error {
            entry.stat.miss_count = entry.stat.miss_count.saturating_add(1);
            entry.stat.streak = 0;
            entry.weighted_score += recency_weight(now - sample.timestamp_ms);
        } else {
            entry.stat.streak = entry.stat.streak.saturating_add(1);
            entry.weighted_score = (entry.weighted_score * CORRECT_DECAY).max(SCORE_FLOOR);
        }

        let attempts = entry.attempts as f64;
        entry.stat.accuracy = (attempts - entry.stat.miss_count as f64) / attempts * 100.0;
    }

    let mut aggregation = Aggregation::default();
    for entry in working {
        let mut stat = entry.stat;
        stat.accuracy = clamp_accuracy(stat.accuracy);
        aggregation
            .weighted_scores
            .insert(stat.key.clone(), entry.weighted_score);
        aggregation.stats.push(stat);
    }
    aggregation
}

/// Boost the `top_n` highest-scoring keys: about 2.0x for the top key,
/// tapering to 1.5x for the last selected one. Other keys are copied as is.
pub fn apply_adaptive_weights(
    base_weights: &HashMap<String, f64>,
    weighted_scores: &BTreeMap<String, f64>,
    top_n: usize,
) -> HashMap<String, f64> {
    let mut result = base_weights.clone();

    let mut ranked: Vec<(&String, f64)> = weighted_scores
        .iter()
        .filter(|(_, score)| score.is_finite() && **score > 0.0)
        .map(|(key, score)| (key, *score))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(top_n);

    let selected = ranked.len();
    for (rank, (key, _)) in ranked.into_iter().enumerate() {
        let span = (selected - rank - 1) as f64 / (selected.saturating_sub(1).max(1)) as f64;
        let factor = 1.5 + 0.5 * span;
        let base = result.get(key).copied().unwrap_or(1.0);
        result.insert(key.clone(), base * factor);
    }
    result
}

/// How `streak` combines when two stats for the same key meet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreakMerge {
    /// Cross-set combination within a session keeps the best streak.
    Max,
    /// Merging into persisted progress keeps the incoming value.
    Latest,
}

/// Fold `updates` into `current`: miss counts add up, accuracy keeps the
/// minimum, streak follows `streak`, and `last_practiced_at` prefers the
/// incoming value when present. Result is sorted by miss count, descending;
/// `Latest` merges break ties by key.
pub fn merge_weak_keys(
    current: &[WeakKeyStat],
    updates: &[WeakKeyStat],
    streak: StreakMerge,
) -> Vec<WeakKeyStat> {
    let mut merged: Vec<WeakKeyStat> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for stat in current.iter().chain(updates) {
        let Some(&i) = index.get(&stat.key) else {
            index.insert(stat.key.clone(), merged.len());
            merged.push(stat.clone());
            continue;
        };
        let existing = &mut merged[i];
        existing.miss_count = existing.miss_count.saturating_add(stat.miss_count);
        existing.accuracy = existing.accuracy.min(stat.accuracy);
        existing.streak = match streak {
            StreakMerge::Max => existing.streak.max(stat.streak),
            StreakMerge::Latest => stat.streak,
        };
        if stat.last_practiced_at.is_some() {
            existing.last_practiced_at = stat.last_practiced_at;
        }
    }

    match streak {
        StreakMerge::Max => merged.sort_by(|a, b| b.miss_count.cmp(&a.miss_count)),
        StreakMerge::Latest => merged.sort_by(|a, b| {
            b.miss_count
                .cmp(&a.miss_count)
                .then_with(|| a.key.cmp(&b.key))
        }),
    }
    merged
}

fn recency_weight(delta_ms: i64) -> f64 {
    if delta_ms <= 0 {
        return 2.0;
    }
    let ratio = (1.0 - delta_ms as f64 / RECENT_WINDOW_MS).max(0.0);
    1.0 + ratio
}

fn infer_attempts(stat: &WeakKeyStat) -> u32 {
    if stat.miss_count == 0 {
        return 0;
    }
    let ratio = (stat.accuracy / 100.0).clamp(0.01, 0.99);
    (stat.miss_count as f64 / (1.0 - ratio)).round() as u32
}

fn clamp_accuracy(accuracy: f64) -> f64 {
    if accuracy.is_nan() {
        return 100.0;
    }
    accuracy.clamp(0.0, 100.0)
}
