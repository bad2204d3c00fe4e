//! Play-history store.
//!
//! A JSON array on disk, newest entry first. One entry per url: re-adding a
//! known url moves it to the head with a fresh timestamp. The file is
//! best-effort: a missing or corrupt file loads as an empty history.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Upper bound on stored entries; `add` evicts from the tail past this.
pub const HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub duration: Option<f64>,
    pub timestamp: DateTime<Local>,
}

pub struct History {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
}

impl History {
    /// Open the history at `path`, loading whatever is readable there.
    pub fn open(path: PathBuf) -> Self {
        let entries = Self::load(&path);
        Self { path, entries }
    }

    fn load(path: &PathBuf) -> Vec<HistoryEntry> {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("history: ignoring unreadable file {:?}: {}", path, e);
                Vec::new()
            }
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Record a played track. Dedups by url, prepends, caps at
    /// [`HISTORY_CAP`], stamps the current time.
    pub fn add(&mut self, title: &str, url: &str, duration: Option<f64>) -> anyhow::Result<()> {
        self.entries.retain(|e| e.url != url);
        self.entries.insert(
            0,
            HistoryEntry {
                title: title.to_string(),
                url: url.to_string(),
                duration,
                timestamp: Local::now(),
            },
        );
        self.entries.truncate(HISTORY_CAP);
        self.save()
    }

    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.entries.clear();
        self.save()
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_history(dir: &TempDir) -> History {
        History::open(dir.path().join("history.json"))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let history = temp_history(&dir);
        assert!(history.entries().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not json").unwrap();
        let history = History::open(path);
        assert!(history.entries().is_empty());
    }

    #[test]
    fn test_add_prepends_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        {
            let mut history = History::open(path.clone());
            history.add("Song A", "https://x/a", Some(180.0)).unwrap();
            history.add("Song B", "https://x/b", None).unwrap();
        }
        let history = History::open(path);
        assert_eq!(history.entries().len(), 2);
        assert_eq!(history.entries()[0].url, "https://x/b");
        assert_eq!(history.entries()[1].title, "Song A");
        assert_eq!(history.entries()[1].duration, Some(180.0));
    }

    #[test]
    fn test_add_dedups_by_url() {
        let dir = TempDir::new().unwrap();
        let mut history = temp_history(&dir);
        history.add("Song A", "https://x/a", None).unwrap();
        history.add("Song B", "https://x/b", None).unwrap();
        let old_stamp = history.entries()[1].timestamp;

        history.add("Song A (again)", "https://x/a", None).unwrap();
        let urls: Vec<_> = history.entries().iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, ["https://x/a", "https://x/b"]);
        assert_eq!(history.entries()[0].title, "Song A (again)");
        assert!(history.entries()[0].timestamp >= old_stamp);
    }

    #[test]
    fn test_capped_at_limit() {
        let dir = TempDir::new().unwrap();
        let mut history = temp_history(&dir);
        for i in 0..(HISTORY_CAP + 20) {
            history
                .add(&format!("Song {i}"), &format!("https://x/{i}"), None)
                .unwrap();
        }
        assert_eq!(history.entries().len(), HISTORY_CAP);
        // Newest stays, oldest evicted
        assert_eq!(history.entries()[0].url, format!("https://x/{}", HISTORY_CAP + 19));
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let mut history = temp_history(&dir);
        history.add("Song A", "https://x/a", None).unwrap();
        history.clear().unwrap();
        assert!(history.entries().is_empty());
    }
}
