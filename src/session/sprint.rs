use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::engine::heatmap;
use crate::engine::metrics::{MetricInput, Metrics, calculate_metrics};
use crate::engine::weak_keys::{
    Aggregation, KeyPerformanceSample, WeakKeyStat, aggregate_weak_keys,
};
use crate::event::{InputEvent, TimestampMs};
use crate::session::counters::RunningCounters;
use crate::session::input::{Handled, ImeNormalizer, Signal, confirmed_chars};
use crate::session::result::{
    MetricSnapshot, SessionMetrics, SessionTotals, SprintSetResult, set_summary_snapshot,
};
use crate::session::text::PracticeText;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionPlan {
    pub set_length_ms: u64,
    pub set_count: usize,
}

impl Default for SessionPlan {
    fn default() -> Self {
        Self {
            set_length_ms: 60_000,
            set_count: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SprintPhase {
    Idle,
    SetRunning,
    SetFinalizing,
    SessionComplete,
}

/// Per-character update reported to the session-state store.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordDelta {
    pub confirmed_char_delta: usize,
    pub keystroke_delta: usize,
    pub error_delta: usize,
    pub combo: usize,
    pub last_input_at: DateTime<Utc>,
    pub snapshot: MetricSnapshot,
}

/// The external collaborator that tracks the active session and persisted
/// progress.
pub trait SessionStore {
    fn start_session(&mut self, session_id: &str, lesson_id: Option<&str>, started_at: DateTime<Utc>);
    fn record(&mut self, delta: RecordDelta);
    fn merge_weak_keys(&mut self, stats: &[WeakKeyStat]);
    fn end_session(&mut self, metrics: SessionMetrics);
    fn reset_session(&mut self);
}

/// Drives one sprint of `set_count` fixed-length sets.
///
/// The running counters, sample buffer and snapshot buffer belong to the
/// active set only: they are reset when a set starts and consumed when it is
/// finalized. Finalization runs at most once per set.
pub struct SprintSession<S: SessionStore, T: PracticeText> {
    sprint: SprintMeta,
    text: T,
    store: S,
    normalizer: ImeNormalizer,
    phase: SprintPhase,
    set_index: usize,
    cursor: usize,
    set_chars: Vec<char>,
    set_started_at: Option<TimestampMs>,
    counters: RunningCounters,
    samples: Vec<KeyPerformanceSample>,
    snapshots: Vec<MetricSnapshot>,
    live_misses: HashMap<String, u32>,
    results: Vec<SprintSetResult>,
    session_keystrokes: usize,
    last_summary: Option<SessionMetrics>,
}

struct SprintMeta {
    plan: SessionPlan,
    lesson_id: Option<String>,
    session_id: String,
    started_at: TimestampMs,
}

impl<S: SessionStore, T: PracticeText> SprintSession<S, T> {
    pub fn new(plan: SessionPlan, text: T, store: S) -> Self {
        let set_chars = text.text_for_set(0).chars().collect();
        Self {
            sprint: SprintMeta {
                plan,
                lesson_id: None,
                session_id: String::new(),
                started_at: 0,
            },
            text,
            store,
            normalizer: ImeNormalizer::new(),
            phase: SprintPhase::Idle,
            set_index: 0,
            cursor: 0,
            set_chars,
            set_started_at: None,
            counters: RunningCounters::default(),
            samples: Vec::new(),
            snapshots: Vec::new(),
            live_misses: HashMap::new(),
            results: Vec::new(),
            session_keystrokes: 0,
            last_summary: None,
        }
    }

    pub fn with_lesson_id(mut self, lesson_id: impl Into<String>) -> Self {
        self.sprint.lesson_id = Some(lesson_id.into());
        self
    }

    /// Idle -> SetRunning for the first set. Ignored once a sprint is underway;
    /// use `reset` to start over.
    pub fn start(&mut self, now: TimestampMs) {
        if self.phase != SprintPhase::Idle {
            return;
        }
        self.sprint.session_id = new_session_id(now);
        self.sprint.started_at = now;
        self.store.start_session(
            &self.sprint.session_id,
            self.sprint.lesson_id.as_deref(),
            to_datetime(now),
        );
        info!(
            "sprint {} started: {} sets of {}ms",
            self.sprint.session_id, self.sprint.plan.set_count, self.sprint.plan.set_length_ms
        );
        self.begin_set(0, now);
    }

    /// Abandon the current sprint and start again from the first set.
    pub fn reset(&mut self, now: TimestampMs) {
        self.store.reset_session();
        self.results.clear();
        self.session_keystrokes = 0;
        self.last_summary = None;
        self.normalizer = ImeNormalizer::new();
        self.phase = SprintPhase::Idle;
        self.start(now);
    }

    /// Feed a raw platform event through the IME normalizer.
    pub fn handle_input(&mut self, input: &InputEvent) -> Handled {
        let handled = self.normalizer.handle(&input.event);
        match &handled.signal {
            Some(Signal::Confirm { text, is_composed }) => {
                self.confirm(text, *is_composed, input.at);
            }
            Some(Signal::Backspace) => self.backspace(),
            None => {}
        }
        handled
    }

    /// Process a committed string one character at a time, left to right.
    pub fn confirm(&mut self, text: &str, is_composed: bool, at: TimestampMs) {
        for confirmed in confirmed_chars(text, is_composed, at) {
            if self.phase != SprintPhase::SetRunning {
                debug!("dropping confirmed char outside a running set");
                return;
            }
            self.handle_char(confirmed.ch, confirmed.is_composed, confirmed.at);
        }
    }

    pub fn backspace(&mut self) {
        if self.phase == SprintPhase::SetRunning {
            self.counters.backspace();
        }
    }

    /// Animation-frame tick: finalize when the set's time is up or its text
    /// is exhausted. Returns true when a set was finalized.
    pub fn tick(&mut self, now: TimestampMs) -> bool {
        if self.phase != SprintPhase::SetRunning {
            return false;
        }
        let Some(started) = self.set_started_at else {
            return false;
        };
        let time_up = now - started >= self.sprint.plan.set_length_ms as i64;
        if time_up || self.text_exhausted() {
            return self.finalize_set(now).is_some();
        }
        false
    }

    /// Close the running set. A second call for the same set is a no-op.
    pub fn finalize_set(&mut self, now: TimestampMs) -> Option<&SprintSetResult> {
        if self.phase != SprintPhase::SetRunning {
            return None;
        }
        let started = self.set_started_at.take()?;
        self.phase = SprintPhase::SetFinalizing;

        let elapsed = (now - started).max(1) as f64;
        let aggregated = aggregate_weak_keys(&self.samples, None, Some(now));
        let metrics = calculate_metrics(&MetricInput {
            confirmed_char_count: self.counters.confirmed_chars,
            total_keystrokes: self.counters.keystrokes,
            error_count: self.counters.errors,
            elapsed_ms: elapsed,
            expected_elapsed_ms: Some(self.sprint.plan.set_length_ms as f64),
        });

        let result = SprintSetResult {
            set_index: self.set_index,
            started_at: to_datetime(started),
            ended_at: to_datetime(now),
            metrics: set_summary_snapshot(to_datetime(now), &metrics, &self.counters),
            weak_keys: aggregated.stats,
        };
        debug!(
            "set {} finalized: {:.1} wpm, {:.1}% accuracy, {} composed chars",
            self.set_index, metrics.wpm, metrics.accuracy, self.counters.composed_chars
        );

        self.store.merge_weak_keys(&result.weak_keys);
        self.session_keystrokes += self.counters.keystrokes;
        self.results.retain(|r| r.set_index != result.set_index);
        self.results.push(result);

        self.samples.clear();
        self.live_misses.clear();

        if self.set_index + 1 < self.sprint.plan.set_count {
            self.begin_set(self.set_index + 1, now);
        } else {
            self.close_session(now);
        }
        self.results.last()
    }

    pub fn phase(&self) -> SprintPhase {
        self.phase
    }

    pub fn set_index(&self) -> usize {
        self.set_index
    }

    pub fn plan(&self) -> SessionPlan {
        self.sprint.plan
    }

    pub fn session_id(&self) -> &str {
        &self.sprint.session_id
    }

    pub fn current_text(&self) -> &str {
        self.text.text_for_set(self.set_index)
    }

    /// (typed, total) characters of the current set's text.
    pub fn text_progress(&self) -> (usize, usize) {
        (self.cursor, self.set_chars.len())
    }

    pub fn counters(&self) -> &RunningCounters {
        &self.counters
    }

    pub fn snapshots(&self) -> &[MetricSnapshot] {
        &self.snapshots
    }

    pub fn results(&self) -> &[SprintSetResult] {
        &self.results
    }

    pub fn summary(&self) -> Option<&SessionMetrics> {
        self.last_summary.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Live metrics for display, without schedule correction. Zero rates
    /// when no set is running.
    pub fn live_metrics(&self, now: TimestampMs) -> Metrics {
        match self.set_started_at {
            Some(started) if self.phase == SprintPhase::SetRunning => {
                self.metrics_at(now - started)
            }
            _ => Metrics {
                accuracy: 100.0,
                ..Metrics::default()
            },
        }
    }

    /// On-demand aggregation of the running set's samples.
    pub fn live_weak_keys(&self, reference_time: TimestampMs) -> Aggregation {
        aggregate_weak_keys(&self.samples, None, Some(reference_time))
    }

    pub fn heatmap(&self) -> std::collections::BTreeMap<String, f64> {
        heatmap::heatmap(&self.results, &self.live_misses)
    }

    fn begin_set(&mut self, set_index: usize, now: TimestampMs) {
        self.set_index = set_index;
        self.cursor = 0;
        self.set_chars = self.text.text_for_set(set_index).chars().collect();
        self.counters.reset();
        self.samples.clear();
        self.snapshots.clear();
        self.live_misses.clear();
        self.set_started_at = Some(now);
        self.phase = SprintPhase::SetRunning;
    }

    fn text_exhausted(&self) -> bool {
        self.cursor >= self.set_chars.len()
    }

    fn handle_char(&mut self, ch: char, is_composed: bool, at: TimestampMs) {
        let expected = self.set_chars.get(self.cursor).copied();
        let correct = expected == Some(ch);

        self.counters.record(correct, is_composed);
        self.cursor += 1;

        let started = self.set_started_at.unwrap_or(at);
        let metrics = self.metrics_at(at - started);
        let snapshot = MetricSnapshot::new(
            to_datetime(at),
            &metrics,
            self.counters.errors,
            self.counters.combo,
        );
        self.snapshots.push(snapshot.clone());

        let key: String = expected.unwrap_or(ch).to_lowercase().collect();
        if !correct {
            *self.live_misses.entry(key.clone()).or_insert(0) += 1;
        }
        self.samples.push(KeyPerformanceSample {
            key,
            timestamp_ms: at,
            is_error: !correct,
        });

        self.store.record(RecordDelta {
            confirmed_char_delta: 1,
            keystroke_delta: 1,
            error_delta: usize::from(!correct),
            combo: self.counters.combo,
            last_input_at: to_datetime(at),
            snapshot,
        });

        if self.text_exhausted() {
            self.finalize_set(at);
        }
    }

    fn metrics_at(&self, elapsed_ms: i64) -> Metrics {
        calculate_metrics(&MetricInput {
            confirmed_char_count: self.counters.confirmed_chars,
            total_keystrokes: self.counters.keystrokes,
            error_count: self.counters.errors,
            elapsed_ms: elapsed_ms.max(1) as f64,
            expected_elapsed_ms: None,
        })
    }

    fn close_session(&mut self, now: TimestampMs) {
        let plan = self.sprint.plan;
        let summary = SessionMetrics::from_sets(
            &self.results,
            SessionTotals {
                session_id: &self.sprint.session_id,
                lesson_id: self.sprint.lesson_id.as_deref(),
                started_at: to_datetime(self.sprint.started_at),
                completed_at: to_datetime(now),
                duration_ms: plan.set_length_ms * plan.set_count as u64,
                total_keystrokes: self.session_keystrokes,
            },
        );
        info!(
            "sprint {} complete: {:.1} gross wpm, {:.1} net wpm, {:.1}% accuracy",
            summary.session_id, summary.gross_wpm, summary.net_wpm, summary.accuracy
        );
        self.store.end_session(summary.clone());
        self.last_summary = Some(summary);
        self.phase = SprintPhase::SessionComplete;
    }
}

fn to_datetime(ms: TimestampMs) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn new_session_id(now: TimestampMs) -> String {
    format!("{:x}-{:08x}", now, rand::random::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawInput;
    use crate::session::text::Passages;
    use crate::store::state::AppState;

    const T0: TimestampMs = 1_700_000_000_000;

    fn sprint(passages: &[&str], set_count: usize) -> SprintSession<AppState, Passages> {
        let plan = SessionPlan {
            set_length_ms: 60_000,
            set_count,
        };
        let text = Passages::new(passages.iter().map(|p| p.to_string()).collect());
        SprintSession::new(plan, text, AppState::default()).with_lesson_id("practice-sprint")
    }

    #[test]
    fn test_start_enters_first_set() {
        let mut s = sprint(&["abc"], 2);
        assert_eq!(s.phase(), SprintPhase::Idle);
        s.start(T0);
        assert_eq!(s.phase(), SprintPhase::SetRunning);
        assert_eq!(s.set_index(), 0);
        assert!(s.store().session.is_some());
    }

    #[test]
    fn test_input_before_start_is_ignored() {
        let mut s = sprint(&["abc"], 1);
        s.confirm("a", false, T0);
        s.backspace();
        assert_eq!(s.counters().keystrokes, 0);
    }

    #[test]
    fn test_each_char_updates_counters_samples_and_snapshots() {
        let mut s = sprint(&["abcdef"], 1);
        s.start(T0);
        s.confirm("ab", false, T0 + 1_000);
        s.confirm("x", false, T0 + 2_000);

        assert_eq!(s.counters().confirmed_chars, 3);
        assert_eq!(s.counters().keystrokes, 3);
        assert_eq!(s.counters().errors, 1);
        assert_eq!(s.counters().combo, 0);
        assert_eq!(s.counters().max_combo, 2);
        assert_eq!(s.snapshots().len(), 3);
        assert_eq!(s.snapshots()[1].combo, 2);
        assert_eq!(s.text_progress(), (3, 6));

        let session = s.store().session.as_ref().unwrap();
        assert_eq!(session.total_keystrokes, 3);
        assert_eq!(session.error_count, 1);
        assert_eq!(session.snapshots.len(), 3);

        let live = s.live_weak_keys(T0 + 2_000);
        let c = live.stats.iter().find(|st| st.key == "c").unwrap();
        assert_eq!(c.miss_count, 1);
        assert!(s.heatmap()["c"] > 0.0);
    }

    #[test]
    fn test_backspace_resets_combo_only() {
        let mut s = sprint(&["abcdefgh"], 1);
        s.start(T0);
        s.confirm("abcde", false, T0 + 500);
        assert_eq!(s.counters().combo, 5);

        s.handle_input(&InputEvent::new(T0 + 600, RawInput::DeleteBackward));

        assert_eq!(s.counters().combo, 0);
        assert_eq!(s.counters().errors, 0);
        assert_eq!(s.counters().keystrokes, 5);
    }

    #[test]
    fn test_ime_composition_counts_only_commit() {
        let mut s = sprint(&["かなabc"], 1);
        s.start(T0);
        for event in [
            RawInput::CompositionStart,
            RawInput::CompositionText {
                data: "k".to_string(),
            },
            RawInput::CompositionText {
                data: "か".to_string(),
            },
            RawInput::CommitText {
                data: Some("かな".to_string()),
                composing: false,
            },
            RawInput::CompositionEnd,
        ] {
            s.handle_input(&InputEvent::new(T0 + 100, event));
        }

        assert_eq!(s.counters().confirmed_chars, 2);
        assert_eq!(s.counters().composed_chars, 2);
        assert_eq!(s.counters().errors, 0);
        assert_eq!(s.counters().combo, 2);
    }

    #[test]
    fn test_text_exhaustion_finalizes_and_advances() {
        let mut s = sprint(&["ab", "cd"], 2);
        s.start(T0);
        s.confirm("ab", false, T0 + 3_000);

        assert_eq!(s.results().len(), 1);
        assert_eq!(s.set_index(), 1);
        assert_eq!(s.phase(), SprintPhase::SetRunning);
        assert_eq!(s.current_text(), "cd");
        assert_eq!(s.counters().keystrokes, 0);
        assert!(s.snapshots().is_empty());
    }

    #[test]
    fn test_remaining_chars_flow_into_next_set() {
        let mut s = sprint(&["ab", "cd"], 2);
        s.start(T0);
        s.confirm("abc", false, T0 + 3_000);

        assert_eq!(s.set_index(), 1);
        assert_eq!(s.counters().keystrokes, 1);
        assert_eq!(s.counters().errors, 0);
    }

    #[test]
    fn test_tick_finalizes_when_time_is_up() {
        let mut s = sprint(&["abcdef"], 1);
        s.start(T0);
        s.confirm("abc", false, T0 + 1_000);

        assert!(!s.tick(T0 + 59_999));
        assert!(s.tick(T0 + 60_000));
        assert_eq!(s.phase(), SprintPhase::SessionComplete);

        let result = &s.results()[0];
        assert_eq!(result.metrics.combo, 3);
        // 60s exactly matches the schedule: 3 chars in one minute
        assert!((result.metrics.cpm - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut s = sprint(&["abcdef"], 1);
        s.start(T0);
        s.confirm("ab", false, T0 + 1_000);

        assert!(s.finalize_set(T0 + 5_000).is_some());
        let store_before = s.store().clone();

        assert!(s.finalize_set(T0 + 6_000).is_none());
        assert!(!s.tick(T0 + 70_000));
        assert_eq!(s.results().len(), 1);
        assert_eq!(s.store(), &store_before);
        assert_eq!(s.store().sessions.len(), 1);
    }

    #[test]
    fn test_session_complete_summarizes_and_persists() {
        let mut s = sprint(&["ab", "cd"], 2);
        s.start(T0);
        s.confirm("ax", false, T0 + 30_000);
        s.confirm("cd", false, T0 + 60_000);

        assert_eq!(s.phase(), SprintPhase::SessionComplete);
        let summary = s.summary().unwrap();
        assert_eq!(summary.total_keystrokes, 4);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.duration_ms, 120_000);
        assert_eq!(summary.lesson_id.as_deref(), Some("practice-sprint"));
        assert!((summary.accuracy - 75.0).abs() < 1e-9);

        let store = s.store();
        assert!(store.session.is_none());
        assert_eq!(store.sessions.len(), 1);
        assert_eq!(store.progress.completed_lesson_ids, vec!["practice-sprint"]);
        let b = store
            .progress
            .weak_keys
            .iter()
            .find(|st| st.key == "b")
            .unwrap();
        assert_eq!(b.miss_count, 1);
    }

    #[test]
    fn test_live_metrics_are_empty_outside_a_running_set() {
        let mut s = sprint(&["ab"], 1);
        assert_eq!(s.live_metrics(T0).wpm, 0.0);

        s.start(T0);
        s.confirm("ab", false, T0 + 1_000);
        assert_eq!(s.phase(), SprintPhase::SessionComplete);
        assert_eq!(s.counters().confirmed_chars, 2);

        let live = s.live_metrics(T0 + 1_000);
        assert_eq!(live.cpm, 0.0);
        assert_eq!(live.kpm, 0.0);
        assert_eq!(live.wpm, 0.0);
        assert_eq!(live.accuracy, 100.0);
    }

    #[test]
    fn test_long_passage_tracks_cursor_per_set() {
        let passage = "日本語".repeat(2_000);
        let mut s = sprint(&[passage.as_str(), "xy"], 2);
        s.start(T0);
        s.confirm(&passage[..passage.len() - "語".len()], true, T0 + 1_000);
        assert_eq!(s.text_progress(), (5_999, 6_000));
        assert_eq!(s.counters().errors, 0);

        s.confirm("語x", false, T0 + 2_000);
        assert_eq!(s.set_index(), 1);
        assert_eq!(s.text_progress(), (1, 2));
        assert_eq!(s.counters().errors, 0);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut s = sprint(&["ab", "cd"], 2);
        s.start(T0);
        s.confirm("ab", false, T0 + 1_000);
        assert_eq!(s.set_index(), 1);

        s.reset(T0 + 2_000);

        assert_eq!(s.set_index(), 0);
        assert!(s.results().is_empty());
        assert_eq!(s.phase(), SprintPhase::SetRunning);
        assert_eq!(s.live_metrics(T0 + 2_000).accuracy, 100.0);
    }
}
