//! # Progress Persistence Module
//!
//! Stores the two things the exercises remember between runs: the last
//! measured vocal range (as plain note names such as `"La2"`) and the best
//! streak of perfect trainer rounds.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::tuning::{format_note, parse_note};

/// A vocal range as note names plus octave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRange {
    pub low: String,
    pub high: String,
}

impl SavedRange {
    pub fn from_midi(low: i32, high: i32) -> Self {
        Self {
            low: format_note(low),
            high: format_note(high),
        }
    }

    /// MIDI numbers of both ends, if the names parse.
    pub fn to_midi(&self) -> Option<(i32, i32)> {
        Some((parse_note(&self.low)?, parse_note(&self.high)?))
    }
}

/// Everything that is persisted, as written to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredProgress {
    pub range: Option<SavedRange>,
    pub streak: u32,
}

/// Key-value persistence consumed by the sessions.
pub trait ProgressStore {
    fn saved_range(&self) -> Option<SavedRange>;
    fn set_saved_range(&mut self, range: &SavedRange) -> Result<()>;
    fn streak(&self) -> u32;
    fn set_streak(&mut self, streak: u32) -> Result<()>;
}

/// Store that lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    progress: StoredProgress,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(progress: StoredProgress) -> Self {
        Self { progress }
    }

    pub fn progress(&self) -> &StoredProgress {
        &self.progress
    }
}

impl ProgressStore for MemoryStore {
    fn saved_range(&self) -> Option<SavedRange> {
        self.progress.range.clone()
    }

    fn set_saved_range(&mut self, range: &SavedRange) -> Result<()> {
        self.progress.range = Some(range.clone());
        Ok(())
    }

    fn streak(&self) -> u32 {
        self.progress.streak
    }

    fn set_streak(&mut self, streak: u32) -> Result<()> {
        self.progress.streak = streak;
        Ok(())
    }
}

/// Store backed by a pretty-printed JSON file, rewritten on every change.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    progress: StoredProgress,
}

impl JsonFileStore {
    /// Opens the store, loading existing progress if the file exists.
    ///
    /// # Returns
    /// * `Ok(store)` - Loaded (or empty, for a missing file) store
    /// * `Err(e)` - The file exists but cannot be read or parsed
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let progress = if path.exists() {
            load_progress(&path)?
        } else {
            StoredProgress::default()
        };
        Ok(Self { path, progress })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        save_progress(&self.progress, &self.path)
    }
}

impl ProgressStore for JsonFileStore {
    fn saved_range(&self) -> Option<SavedRange> {
        self.progress.range.clone()
    }

    fn set_saved_range(&mut self, range: &SavedRange) -> Result<()> {
        self.progress.range = Some(range.clone());
        self.flush()
    }

    fn streak(&self) -> u32 {
        self.progress.streak
    }

    fn set_streak(&mut self, streak: u32) -> Result<()> {
        self.progress.streak = streak;
        self.flush()
    }
}

/// Saves progress to a JSON file.
fn save_progress(progress: &StoredProgress, path: &Path) -> Result<()> {
    let json_string = serde_json::to_string_pretty(progress)?;
    let mut file = File::create(path)?;
    file.write_all(json_string.as_bytes())?;
    Ok(())
}

/// Loads progress from a JSON file.
fn load_progress(path: &Path) -> Result<StoredProgress> {
    let mut file = File::open(path)?;
    let mut data = String::new();
    file.read_to_string(&mut data)?;
    Ok(serde_json::from_str(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoachError;

    #[test]
    fn saved_range_round_trips_note_names() {
        let range = SavedRange::from_midi(45, 69);
        assert_eq!(range.low, "La2");
        assert_eq!(range.high, "La4");
        assert_eq!(range.to_midi(), Some((45, 69)));
    }

    #[test]
    fn memory_store_defaults_to_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.saved_range(), None);
        assert_eq!(store.streak(), 0);
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        store.set_saved_range(&SavedRange::from_midi(48, 67)).unwrap();
        store.set_streak(4).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.saved_range(), Some(SavedRange::from_midi(48, 67)));
        assert_eq!(reopened.streak(), 4);
    }

    #[test]
    fn json_store_reads_partial_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, r#"{ "streak": 2 }"#).unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.streak(), 2);
        assert_eq!(store.saved_range(), None);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(JsonFileStore::open(&path), Err(CoachError::Json(_))));
    }
}
