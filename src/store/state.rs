use chrono::{DateTime, Utc};
use log::debug;

use crate::engine::weak_keys::{StreakMerge, WeakKeyStat, merge_weak_keys};
use crate::session::result::{MetricSnapshot, SessionMetrics};
use crate::session::sprint::{RecordDelta, SessionStore};
use crate::store::schema::{ProgressState, SCHEMA_VERSION, Settings, StorageShape, cap_sessions};

/// The session currently being typed, accumulated across its sets.
#[derive(Clone, Debug, PartialEq)]
pub struct TypingSessionState {
    pub session_id: String,
    pub lesson_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub confirmed_char_count: usize,
    pub total_keystrokes: usize,
    pub error_count: usize,
    pub combo: usize,
    pub max_combo: usize,
    pub last_input_at: Option<DateTime<Utc>>,
    pub snapshots: Vec<MetricSnapshot>,
    pub weak_keys: Vec<WeakKeyStat>,
}

/// In-memory session-state store backed by the persisted document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppState {
    pub settings: Settings,
    pub progress: ProgressState,
    pub session: Option<TypingSessionState>,
    pub sessions: Vec<SessionMetrics>,
}

impl AppState {
    pub fn from_storage(shape: StorageShape) -> Self {
        Self {
            settings: shape.settings,
            progress: shape.progress,
            session: None,
            sessions: shape.sessions,
        }
    }

    pub fn to_storage(&self) -> StorageShape {
        StorageShape {
            schema_version: SCHEMA_VERSION,
            settings: self.settings.clone(),
            progress: self.progress.clone(),
            sessions: self.sessions.clone(),
        }
    }

    pub fn mark_lesson_completed(&mut self, lesson_id: &str) {
        let ids = &mut self.progress.completed_lesson_ids;
        if !ids.iter().any(|id| id == lesson_id) {
            ids.push(lesson_id.to_string());
        }
    }

    /// Forget all progress and history; settings stay.
    pub fn clear(&mut self) {
        self.progress = ProgressState::default();
        self.sessions.clear();
        self.session = None;
    }
}

impl SessionStore for AppState {
    fn start_session(&mut self, session_id: &str, lesson_id: Option<&str>, started_at: DateTime<Utc>) {
        self.session = Some(TypingSessionState {
            session_id: session_id.to_string(),
            lesson_id: lesson_id.map(str::to_string),
            started_at,
            confirmed_char_count: 0,
            total_keystrokes: 0,
            error_count: 0,
            combo: 0,
            max_combo: 0,
            last_input_at: None,
            snapshots: Vec::new(),
            weak_keys: Vec::new(),
        });
    }

    fn record(&mut self, delta: RecordDelta) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.confirmed_char_count += delta.confirmed_char_delta;
        session.total_keystrokes += delta.keystroke_delta;
        session.error_count += delta.error_delta;
        session.combo = delta.combo;
        session.max_combo = session.max_combo.max(delta.combo);
        session.last_input_at = Some(delta.last_input_at);
        session.snapshots.push(delta.snapshot);
    }

    fn merge_weak_keys(&mut self, stats: &[WeakKeyStat]) {
        if let Some(session) = self.session.as_mut() {
            session.weak_keys = merge_weak_keys(&session.weak_keys, stats, StreakMerge::Latest);
        }
        self.progress.weak_keys =
            merge_weak_keys(&self.progress.weak_keys, stats, StreakMerge::Latest);
        debug!(
            "merged {} weak keys into progress ({} tracked)",
            stats.len(),
            self.progress.weak_keys.len()
        );
    }

    fn end_session(&mut self, metrics: SessionMetrics) {
        if let Some(lesson_id) = metrics.lesson_id.clone() {
            self.mark_lesson_completed(&lesson_id);
        }
        self.sessions.push(metrics);
        cap_sessions(&mut self.sessions);
        self.session = None;
    }

    fn reset_session(&mut self) {
        self.session = None;
    }
}
