//! Durable, hub-mutable preferences document (C11): active wake-word IDs,
//! volume, LED count. Loaded once at startup; any mutation schedules a write.
//! Grounded on the original's `config.py` dataclass/JSON loading pattern
//! applied to a document this spec defines directly (§3, §6) rather than to
//! the original's `AppConfig` (which this crate models separately, see
//! `config::AppConfig`).

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreferencesError {
    #[error("failed to read preferences file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write preferences file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse preferences file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesDocument {
    #[serde(default)]
    pub active_wake_words: BTreeSet<String>,
    #[serde(default = "default_volume")]
    pub volume_level: u8,
    #[serde(default = "default_led_count")]
    pub led_count: u32,
}

fn default_volume() -> u8 {
    70
}

fn default_led_count() -> u32 {
    3
}

impl Default for PreferencesDocument {
    fn default() -> Self {
        Self {
            active_wake_words: BTreeSet::new(),
            volume_level: default_volume(),
            led_count: default_led_count(),
        }
    }
}

/// Owns the on-disk preferences document and writes it through on mutation.
pub struct PreferencesStore {
    path: PathBuf,
    document: PreferencesDocument,
}

impl PreferencesStore {
    /// Load the document at `path`, creating a default one (and persisting
    /// it) if the file does not yet exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PreferencesError> {
        let path = path.into();
        let document = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| PreferencesError::Read {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| PreferencesError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            PreferencesDocument::default()
        };

        let mut store = Self { path, document };
        store.flush()?;
        Ok(store)
    }

    pub fn document(&self) -> &PreferencesDocument {
        &self.document
    }

    pub fn set_active_wake_words(&mut self, ids: BTreeSet<String>) -> Result<(), PreferencesError> {
        if self.document.active_wake_words != ids {
            self.document.active_wake_words = ids;
            self.flush()?;
        }
        Ok(())
    }

    pub fn set_volume(&mut self, volume: u8) -> Result<(), PreferencesError> {
        let volume = volume.min(100);
        if self.document.volume_level != volume {
            self.document.volume_level = volume;
            self.flush()?;
        }
        Ok(())
    }

    pub fn set_led_count(&mut self, count: u32) -> Result<(), PreferencesError> {
        let count = count.max(1);
        if self.document.led_count != count {
            self.document.led_count = count;
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), PreferencesError> {
        let serialized =
            serde_json::to_string_pretty(&self.document).expect("preferences document is always serializable");
        fs::write(&self.path, serialized).map_err(|source| PreferencesError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

pub fn manifests_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_default_document_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");

        let store = PreferencesStore::load(&path).unwrap();
        assert_eq!(store.document().volume_level, 70);
        assert!(path.exists());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");

        {
            let mut store = PreferencesStore::load(&path).unwrap();
            store
                .set_active_wake_words(BTreeSet::from(["okay_nabu".to_string()]))
                .unwrap();
            store.set_volume(42).unwrap();
            store.set_led_count(12).unwrap();
        }

        let reloaded = PreferencesStore::load(&path).unwrap();
        assert_eq!(reloaded.document().volume_level, 42);
        assert_eq!(reloaded.document().led_count, 12);
        assert!(reloaded
            .document()
            .active_wake_words
            .contains("okay_nabu"));
    }

    #[test]
    fn volume_is_clamped_to_100() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("preferences.json");
        let mut store = PreferencesStore::load(&store_path).unwrap();
        store.set_volume(250).unwrap();
        assert_eq!(store.document().volume_level, 100);
    }
}
