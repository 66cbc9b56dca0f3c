//! Migration: export directory → target platform
//!
//! Resumable through `migration-map-<target>.json`; see [`MigrationEngine`].

mod context;
mod engine;

pub use context::RunContext;
pub use engine::{MigrateOptions, MigrationEngine, MigrationReport, PlannedTicket};
