//! Storage layer
//!
//! On-disk artifacts of export and migration: JSONL record files, the
//! manifest, and the resumable migration map.

mod jsonl;
mod layout;
mod migration_map;

pub use jsonl::{count_lines, read_records, write_records, JsonlReader, JsonlWriter};
pub use layout::{
    ExportLayout, CUSTOMERS_FILE, KB_ARTICLES_FILE, MANIFEST_FILE, MESSAGES_FILE,
    ORGANIZATIONS_FILE, RULES_FILE, TICKETS_FILE,
};
pub use migration_map::MigrationMap;
