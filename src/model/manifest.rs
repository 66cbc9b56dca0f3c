//! Run artifacts: the export manifest and migration map entries

use serde::{Deserialize, Serialize};

/// Record counts of one export run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportCounts {
    pub tickets: u64,
    pub messages: u64,
    pub customers: u64,
    pub organizations: u64,
    pub kb_articles: u64,
    pub rules: u64,
}

/// Written last by an export; its presence marks the run complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    pub source: String,
    pub exported_at: String,
    pub counts: ExportCounts,
}

/// Where a source ticket landed on the target platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationEntry {
    pub dest_id: String,
    pub migrated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_shape() {
        let manifest = ExportManifest {
            source: "kayako".to_string(),
            exported_at: "2024-05-01T10:00:00Z".to_string(),
            counts: ExportCounts {
                tickets: 1,
                kb_articles: 2,
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["exportedAt"], "2024-05-01T10:00:00Z");
        assert_eq!(value["counts"]["kbArticles"], 2);
        assert_eq!(value["counts"]["tickets"], 1);
    }

    #[test]
    fn test_migration_entry_shape() {
        let entry: MigrationEntry =
            serde_json::from_str(r#"{"destId":"991","migratedAt":"2024-05-01T10:00:00Z"}"#)
                .unwrap();
        assert_eq!(entry.dest_id, "991");
    }
}
