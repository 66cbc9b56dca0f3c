//! Canonical model
//!
//! Shared entity types plus the id/status/priority conventions that all
//! connectors and the migration engine agree on. Records are immutable once
//! written: a new export run rewrites the JSONL files wholesale.

mod entities;
pub mod ids;
mod manifest;
mod ticket;

pub use entities::{Customer, KbArticle, Organization, Rule};
pub use ids::{canonical_id, message_id};
pub use manifest::{ExportCounts, ExportManifest, MigrationEntry};
pub use ticket::{Message, MessageType, Ticket, TicketPriority, TicketStatus};

