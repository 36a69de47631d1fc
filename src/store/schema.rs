use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::engine::weak_keys::WeakKeyStat;
use crate::session::result::SessionMetrics;

pub const SCHEMA_VERSION: u32 = 1;
pub const SESSION_HISTORY_CAP: usize = 200;

const DEFAULT_GOAL_WPM: u32 = 55;
const MIN_GOAL_WPM: f64 = 10.0;
const MAX_GOAL_WPM: f64 = 220.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ja,
    En,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyboardLayout {
    #[default]
    Jis,
    Us,
}

/// Display settings. None of these change how anything is measured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_true")]
    pub sound: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub language: Language,
    #[serde(default = "default_true")]
    pub highlight_weak_keys: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_lesson_id: Option<String>,
    #[serde(default)]
    pub keyboard_layout: KeyboardLayout,
    /// Stored as a float so out-of-range or fractional values survive parsing
    /// and get normalized afterwards.
    #[serde(default = "default_goal_wpm")]
    pub sprint_goal_wpm: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduced_motion: Option<bool>,
}

fn default_true() -> bool {
    true
}

fn default_goal_wpm() -> f64 {
    DEFAULT_GOAL_WPM as f64
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            sound: true,
            auto_start: false,
            language: Language::default(),
            highlight_weak_keys: true,
            preferred_lesson_id: None,
            keyboard_layout: KeyboardLayout::default(),
            sprint_goal_wpm: default_goal_wpm(),
            reduced_motion: None,
        }
    }
}

impl Settings {
    pub fn goal_wpm(&self) -> u32 {
        normalize_goal(self.sprint_goal_wpm) as u32
    }
}

fn normalize_goal(goal: f64) -> f64 {
    if !goal.is_finite() {
        return default_goal_wpm();
    }
    goal.round().clamp(MIN_GOAL_WPM, MAX_GOAL_WPM)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    #[serde(default)]
    pub completed_lesson_ids: Vec<String>,
    #[serde(default)]
    pub weak_keys: Vec<WeakKeyStat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// The persisted document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageShape {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub progress: ProgressState,
    #[serde(default)]
    pub sessions: Vec<SessionMetrics>,
}

impl Default for StorageShape {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            settings: Settings::default(),
            progress: ProgressState::default(),
            sessions: Vec::new(),
        }
    }
}

impl StorageShape {
    /// Check if loaded data has an older schema version and needs reset.
    pub fn needs_reset(&self) -> bool {
        self.schema_version < SCHEMA_VERSION
    }

    /// Normalize a freshly parsed document. There are no migrations yet, so an
    /// older schema keeps only its settings.
    pub fn sanitize(mut self) -> Self {
        if self.needs_reset() {
            warn!(
                "stored schema version {} is older than {}, resetting progress",
                self.schema_version, SCHEMA_VERSION
            );
            self = Self {
                settings: self.settings,
                ..Self::default()
            };
        }

        self.settings.sprint_goal_wpm = normalize_goal(self.settings.sprint_goal_wpm);

        let mut seen = std::collections::HashSet::new();
        self.progress
            .completed_lesson_ids
            .retain(|id| seen.insert(id.clone()));

        cap_sessions(&mut self.sessions);
        self
    }
}

/// Keep only the most recent sessions.
pub fn cap_sessions(sessions: &mut Vec<SessionMetrics>) {
    if sessions.len() > SESSION_HISTORY_CAP {
        let excess = sessions.len() - SESSION_HISTORY_CAP;
        sessions.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: usize) -> SessionMetrics {
        SessionMetrics {
            session_id: id.to_string(),
            lesson_id: None,
            phrase_list_id: None,
            started_at: DateTime::from_timestamp_millis(0).unwrap(),
            completed_at: None,
            duration_ms: 0,
            gross_wpm: 0.0,
            net_wpm: 0.0,
            accuracy: 100.0,
            total_keystrokes: 0,
            error_count: 0,
            weak_keys: Vec::new(),
        }
    }

    #[test]
    fn test_empty_document_gets_defaults() {
        let shape: StorageShape = serde_json::from_str("{}").unwrap();
        assert_eq!(shape.schema_version, 0);
        assert_eq!(shape.settings, Settings::default());
        assert!(shape.progress.weak_keys.is_empty());
    }

    #[test]
    fn test_older_schema_keeps_settings_only() {
        let json = r#"{
            "schemaVersion": 0,
            "settings": { "theme": "dark", "sprintGoalWpm": 80 },
            "progress": { "completedLessonIds": ["a"], "weakKeys": [] }
        }"#;
        let shape: StorageShape = serde_json::from_str(json).unwrap();
        let shape = shape.sanitize();
        assert_eq!(shape.schema_version, SCHEMA_VERSION);
        assert_eq!(shape.settings.theme, Theme::Dark);
        assert_eq!(shape.settings.goal_wpm(), 80);
        assert!(shape.progress.completed_lesson_ids.is_empty());
    }

    #[test]
    fn test_sanitize_normalizes_fields() {
        let mut shape = StorageShape::default();
        shape.settings.sprint_goal_wpm = 999.4;
        shape.progress.completed_lesson_ids =
            vec!["a".to_string(), "b".to_string(), "a".to_string()];
        shape.sessions = (0..205).map(session).collect();

        let shape = shape.sanitize();

        assert_eq!(shape.settings.sprint_goal_wpm, 220.0);
        assert_eq!(shape.progress.completed_lesson_ids, vec!["a", "b"]);
        assert_eq!(shape.sessions.len(), SESSION_HISTORY_CAP);
        assert_eq!(shape.sessions[0].session_id, "5");
    }

    #[test]
    fn test_goal_rounds_and_clamps() {
        assert_eq!(normalize_goal(54.6), 55.0);
        assert_eq!(normalize_goal(2.0), 10.0);
        assert_eq!(normalize_goal(f64::NAN), 55.0);
    }

    #[test]
    fn test_document_uses_camel_case() {
        let json = serde_json::to_value(StorageShape::default()).unwrap();
        assert_eq!(json["schemaVersion"], 1);
        assert!(json["progress"]["completedLessonIds"].is_array());
        assert_eq!(json["settings"]["keyboardLayout"], "jis");
    }
}
