//! deskport - Helpdesk export and migration engine
//!
//! deskport pulls tickets, conversations, customers, organizations, knowledge
//! base articles and rule metadata out of hosted helpdesk platforms into one
//! canonical JSONL schema, and replays that data into a different platform.
//! Migrations are resumable: every created ticket is recorded in an on-disk
//! map before its conversation is replayed.
//!
//! # Architecture
//!
//! - **http**: Request executor (auth strategies, retry on 429, JSON/XML decoding)
//! - **pagination**: Cursor, offset window, marker and single-shot page walks
//! - **normalize**: Field helpers and XML→JSON conversion with array allowlists
//! - **model**: Canonical Ticket/Message/Customer/... records
//! - **connectors**: Zendesk, Freshdesk, Kayako, Help Scout read and write sides
//! - **export**: Orchestrates one connector into an export directory
//! - **migrate**: Replays an export directory into a target connector
//! - **storage**: JSONL files, manifest, migration map
//! - **config**: YAML settings and environment credentials

pub mod config;
pub mod connectors;
pub mod error;
pub mod export;
pub mod http;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod normalize;
pub mod pagination;
pub mod storage;

pub use error::{DeskportError, Result};
