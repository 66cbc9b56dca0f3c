//! Persisted migration progress
//!
//! A flat JSON object `{ "<source ticket id>": {"destId", "migratedAt"} }`.
//! Entries are only ever added, and every addition is flushed to disk before
//! the caller moves on. Writes go to a temp file in the same directory and
//! are renamed over the map, so a crash leaves either the old or the new map.

use crate::model::MigrationEntry;
use crate::{DeskportError, Result};
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug)]
pub struct MigrationMap {
    path: PathBuf,
    entries: BTreeMap<String, MigrationEntry>,
}

impl MigrationMap {
    /// Load the map, or start an empty one if the file does not exist
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let text = fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&text)
                    .map_err(|e| DeskportError::Parse(format!("{}: {}", path.display(), e)))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.entries.contains_key(source_id)
    }

    pub fn get(&self, source_id: &str) -> Option<&MigrationEntry> {
        self.entries.get(source_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an entry stamped now and persist immediately
    pub fn record(&mut self, source_id: &str, dest_id: &str) -> Result<()> {
        let entry = MigrationEntry {
            dest_id: dest_id.to_string(),
            migrated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        self.entries.insert(source_id.to_string(), entry);
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut json = serde_json::to_string_pretty(&self.entries)?;
        json.push('\n');

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| DeskportError::Io(e.error))?;
        Ok(())
    }
}
