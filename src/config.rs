use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::weak_keys::DEFAULT_TOP_KEYS;
use crate::session::sprint::SessionPlan;
use crate::session::text::DEFAULT_PASSAGES;

const MIN_SET_LENGTH_MS: u64 = 1_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_set_length_ms")]
    pub set_length_ms: u64,
    #[serde(default = "default_set_count")]
    pub set_count: usize,
    #[serde(default = "default_lesson_id")]
    pub lesson_id: String,
    #[serde(default = "default_adaptive_top_n")]
    pub adaptive_top_n: usize,
    /// Animation-frame cadence used when replaying input logs.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: i64,
    #[serde(default = "default_passages")]
    pub passages: Vec<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_set_length_ms() -> u64 {
    60_000
}
fn default_set_count() -> usize {
    3
}
fn default_lesson_id() -> String {
    "practice-sprint".to_string()
}
fn default_adaptive_top_n() -> usize {
    DEFAULT_TOP_KEYS
}
fn default_tick_interval_ms() -> i64 {
    16
}
fn default_passages() -> Vec<String> {
    DEFAULT_PASSAGES.iter().map(|p| p.to_string()).collect()
}
fn default_data_dir() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keysprint")
        .to_string_lossy()
        .to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            set_length_ms: default_set_length_ms(),
            set_count: default_set_count(),
            lesson_id: default_lesson_id(),
            adaptive_top_n: default_adaptive_top_n(),
            tick_interval_ms: default_tick_interval_ms(),
            passages: default_passages(),
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Read a config file, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.validate();
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keysprint")
            .join("config.toml")
    }

    /// Clamp values a hand-edited file may have broken.
    pub fn validate(&mut self) {
        self.set_count = self.set_count.max(1);
        self.set_length_ms = self.set_length_ms.max(MIN_SET_LENGTH_MS);
        self.adaptive_top_n = self.adaptive_top_n.max(1);
        self.tick_interval_ms = self.tick_interval_ms.max(1);
        if self.passages.is_empty() {
            self.passages = default_passages();
        }
    }

    pub fn plan(&self) -> SessionPlan {
        SessionPlan {
            set_length_ms: self.set_length_ms,
            set_count: self.set_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_serde_defaults_from_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.set_length_ms, 60_000);
        assert_eq!(config.set_count, 3);
        assert_eq!(config.lesson_id, "practice-sprint");
        assert_eq!(config.passages.len(), 3);
        assert!(config.data_dir.contains("keysprint"));
    }

    #[test]
    fn test_config_partial_file_keeps_other_defaults() {
        let toml_str = r#"
set_count = 5
passages = ["asdf jkl;"]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.set_count, 5);
        assert_eq!(config.passages, vec!["asdf jkl;"]);
        assert_eq!(config.tick_interval_ms, 16);
        assert_eq!(config.adaptive_top_n, 5);
    }

    #[test]
    fn test_config_validate_clamps_values() {
        let mut config = Config {
            set_length_ms: 10,
            set_count: 0,
            adaptive_top_n: 0,
            tick_interval_ms: -4,
            passages: Vec::new(),
            ..Config::default()
        };
        config.validate();

        assert_eq!(config.set_length_ms, 1_000);
        assert_eq!(config.set_count, 1);
        assert_eq!(config.adaptive_top_n, 1);
        assert_eq!(config.tick_interval_ms, 1);
        assert_eq!(config.passages.len(), 3);
    }

    #[test]
    fn test_config_save_and_load_from() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            set_count: 2,
            lesson_id: "home-row".to_string(),
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.plan().set_count, 2);
    }

    #[test]
    fn test_config_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_config_invalid_toml_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "set_count = \"many\"").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
    }
}
