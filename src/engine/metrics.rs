use serde::{Deserialize, Serialize};

const MILLIS_PER_MINUTE: f64 = 60_000.0;
const WORD_SIZE: f64 = 5.0;
/// Tolerated timer drift, in ms per elapsed second.
const MAX_DRIFT_PER_SECOND: f64 = 10.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub elapsed_ms: f64,
    pub wpm: f64,
    pub cpm: f64,
    pub kpm: f64,
    pub accuracy: f64,
}

impl Metrics {
    /// Negative or non-finite inputs are not validated by the calculator;
    /// callers that want to reject them check here.
    pub fn is_finite(&self) -> bool {
        [self.elapsed_ms, self.wpm, self.cpm, self.kpm, self.accuracy]
            .iter()
            .all(|v| v.is_finite())
    }

    pub fn meets_goal(&self, goal_wpm: Option<u32>) -> bool {
        goal_wpm.is_some_and(|goal| goal > 0 && self.wpm >= goal as f64)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MetricInput {
    pub confirmed_char_count: usize,
    pub total_keystrokes: usize,
    pub error_count: usize,
    pub elapsed_ms: f64,
    pub expected_elapsed_ms: Option<f64>,
}

pub fn calculate_metrics(input: &MetricInput) -> Metrics {
    let elapsed_ms = apply_drift_correction(input.elapsed_ms, input.expected_elapsed_ms);
    let minutes = elapsed_ms.max(1.0) / MILLIS_PER_MINUTE;

    let chars = input.confirmed_char_count as f64;
    Metrics {
        elapsed_ms,
        wpm: (chars / WORD_SIZE) / minutes,
        cpm: chars / minutes,
        kpm: input.total_keystrokes as f64 / minutes,
        accuracy: calculate_accuracy(input.total_keystrokes, input.error_count),
    }
}

/// Snap small timer jitter onto the expected schedule; beyond the tolerance
/// move toward `expected` only by the tolerance itself.
pub fn apply_drift_correction(raw_elapsed_ms: f64, expected_elapsed_ms: Option<f64>) -> f64 {
    let Some(expected) = expected_elapsed_ms else {
        return raw_elapsed_ms;
    };

    let drift = raw_elapsed_ms - expected;
    let limit = raw_elapsed_ms.abs() / 1000.0 * MAX_DRIFT_PER_SECOND;

    if drift.abs() <= limit {
        return expected;
    }
    raw_elapsed_ms - drift.signum() * limit
}

/// Percentage of keystrokes without an error. 100 before any input.
pub fn calculate_accuracy(total_keystrokes: usize, error_count: usize) -> f64 {
    if total_keystrokes == 0 {
        return 100.0;
    }
    let correct = total_keystrokes.saturating_sub(error_count);
    correct as f64 / total_keystrokes as f64 * 100.0
}
