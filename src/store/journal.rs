//! Append-only JSON-lines journal
//!
//! Each collection is written as one JSON document per line. Collections whose
//! records can change (incidents) append the new version and rely on
//! last-write-wins when the journal is replayed.

use crate::error::StoreError;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only file of JSON records
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

impl Journal {
    /// Open (creating if needed) a journal file for appending
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Open the journal `name` inside `dir` and return its existing records
    pub fn open_with_records<T: DeserializeOwned>(
        dir: &Path,
        name: &str,
    ) -> Result<(Self, Vec<T>), StoreError> {
        let path = dir.join(name);
        let records = if path.exists() {
            Self::replay(&path)?
        } else {
            Vec::new()
        };
        let journal = Self::open(path)?;
        Ok((journal, records))
    }

    /// Read every record in a journal file
    ///
    /// Lines that fail to parse (for example a torn final write) are skipped
    /// with a warning rather than failing the whole replay.
    pub fn replay<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();

        for (line_number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping malformed record at {}:{}: {}",
                    path.display(),
                    line_number + 1,
                    e
                ),
            }
        }

        debug!("Replayed {} records from {}", records.len(), path.display());
        Ok(records)
    }

    /// Append one record as a single line
    pub fn append<T: Serialize>(&self, record: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().unwrap();
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Entry {
        id: u32,
        name: String,
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let (journal, existing) = Journal::open_with_records::<Entry>(dir.path(), "entries.jsonl").unwrap();
        assert!(existing.is_empty());

        journal.append(&Entry { id: 1, name: "a".to_string() }).unwrap();
        journal.append(&Entry { id: 2, name: "b".to_string() }).unwrap();

        let replayed: Vec<Entry> = Journal::replay(journal.path()).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[1], Entry { id: 2, name: "b".to_string() });
    }

    #[test]
    fn test_replay_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entries.jsonl");
        std::fs::write(&path, "{\"id\":1,\"name\":\"a\"}\n{\"id\":2,\"na\n\n").unwrap();

        let replayed: Vec<Entry> = Journal::replay(&path).unwrap();
        assert_eq!(replayed, vec![Entry { id: 1, name: "a".to_string() }]);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/entries.jsonl");

        let journal = Journal::open(&path).unwrap();
        journal.append(&Entry { id: 7, name: "x".to_string() }).unwrap();
        assert!(path.exists());
    }
}
