//! Export directory layout
//!
//! ```text
//! <dir>/
//!   tickets.jsonl  messages.jsonl  customers.jsonl
//!   organizations.jsonl  kb_articles.jsonl  rules.jsonl
//!   manifest.json                     written last
//!   migration-map-<target>.json       one per migration target
//! ```

use crate::model::ExportManifest;
use crate::{DeskportError, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const TICKETS_FILE: &str = "tickets.jsonl";
pub const MESSAGES_FILE: &str = "messages.jsonl";
pub const CUSTOMERS_FILE: &str = "customers.jsonl";
pub const ORGANIZATIONS_FILE: &str = "organizations.jsonl";
pub const KB_ARTICLES_FILE: &str = "kb_articles.jsonl";
pub const RULES_FILE: &str = "rules.jsonl";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Paths inside one export directory
#[derive(Debug, Clone)]
pub struct ExportLayout {
    dir: PathBuf,
}

impl ExportLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if needed
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn tickets(&self) -> PathBuf {
        self.file(TICKETS_FILE)
    }

    pub fn messages(&self) -> PathBuf {
        self.file(MESSAGES_FILE)
    }

    pub fn manifest(&self) -> PathBuf {
        self.file(MANIFEST_FILE)
    }

    pub fn migration_map(&self, target: &str) -> PathBuf {
        self.file(&format!("migration-map-{}.json", target))
    }

    /// Pretty JSON with a trailing newline
    pub fn write_manifest(&self, manifest: &ExportManifest) -> Result<()> {
        let mut json = serde_json::to_string_pretty(manifest)?;
        json.push('\n');
        fs::write(self.manifest(), json)?;
        Ok(())
    }

    /// `None` when the export never completed
    pub fn read_manifest(&self) -> Result<Option<ExportManifest>> {
        let path = self.manifest();
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| DeskportError::Parse(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExportCounts;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_round_trip_and_format() {
        let dir = TempDir::new().unwrap();
        let layout = ExportLayout::new(dir.path());
        assert!(layout.read_manifest().unwrap().is_none());

        let manifest = ExportManifest {
            source: "kayako".into(),
            exported_at: "2024-05-01T10:00:00Z".into(),
            counts: ExportCounts {
                tickets: 3,
                ..Default::default()
            },
        };
        layout.write_manifest(&manifest).unwrap();

        let text = fs::read_to_string(layout.manifest()).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.contains("\n  \"source\""));
        assert_eq!(layout.read_manifest().unwrap(), Some(manifest));
    }

    #[test]
    fn test_migration_map_name() {
        let layout = ExportLayout::new("/tmp/out");
        assert_eq!(
            layout.migration_map("zendesk"),
            PathBuf::from("/tmp/out/migration-map-zendesk.json")
        );
    }
}
