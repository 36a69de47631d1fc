use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;
use thiserror::Error;

use crate::store::schema::StorageShape;

const DOCUMENT_FILE: &str = "keysprint.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage document could not be encoded: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persists the whole document as one JSON file under the data directory
/// (`Config::data_dir` unless overridden on the command line).
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn document_path(&self) -> PathBuf {
        self.base_dir.join(DOCUMENT_FILE)
    }

    /// Missing, unreadable or corrupt documents load as defaults.
    pub fn load(&self) -> StorageShape {
        let path = self.document_path();
        if !path.exists() {
            return StorageShape::default();
        }
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("could not read {}: {e}", path.display());
                return StorageShape::default();
            }
        };
        match serde_json::from_str::<StorageShape>(&content) {
            Ok(shape) => shape.sanitize(),
            Err(e) => {
                warn!("ignoring corrupt document {}: {e}", path.display());
                StorageShape::default()
            }
        }
    }

    pub fn save(&self, shape: &StorageShape) -> Result<(), StoreError> {
        let path = self.document_path();
        let tmp_path = path.with_extension("tmp");

        let json = serde_json::to_string_pretty(shape)?;
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::weak_keys::WeakKeyStat;
    use crate::store::schema::{SCHEMA_VERSION, Theme};
    use tempfile::TempDir;

    fn make_test_store() -> (TempDir, JsonStore) {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::with_base_dir(dir.path().to_path_buf()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let (_dir, store) = make_test_store();
        assert_eq!(store.load(), StorageShape::default());
    }

    #[test]
    fn test_save_then_load() {
        let (_dir, store) = make_test_store();
        let mut shape = StorageShape::default();
        shape.settings.theme = Theme::Dark;
        shape.progress.completed_lesson_ids.push("practice-sprint".to_string());
        shape.progress.weak_keys.push(WeakKeyStat {
            key: "k".to_string(),
            miss_count: 4,
            accuracy: 66.7,
            streak: 0,
            last_practiced_at: None,
        });

        store.save(&shape).unwrap();
        let loaded = store.load();

        assert_eq!(loaded, shape);
        assert!(!store.document_path().with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_loads_defaults() {
        let (_dir, store) = make_test_store();
        fs::write(store.document_path(), "{ not json").unwrap();
        assert_eq!(store.load(), StorageShape::default());
    }

    #[test]
    fn test_load_sanitizes() {
        let (_dir, store) = make_test_store();
        let json = format!(
            r#"{{
                "schemaVersion": {SCHEMA_VERSION},
                "settings": {{ "sprintGoalWpm": 3 }},
                "progress": {{ "completedLessonIds": ["a", "a"] }}
            }}"#
        );
        fs::write(store.document_path(), json).unwrap();

        let loaded = store.load();

        assert_eq!(loaded.settings.goal_wpm(), 10);
        assert_eq!(loaded.progress.completed_lesson_ids, vec!["a"]);
    }

    #[test]
    fn test_document_is_camel_case_on_disk() {
        let (_dir, store) = make_test_store();
        store.save(&StorageShape::default()).unwrap();
        let raw = fs::read_to_string(store.document_path()).unwrap();
        assert!(raw.contains("\"schemaVersion\""));
        assert!(raw.contains("\"completedLessonIds\""));
    }
}
