//! Export: connector → JSONL directory
//!
//! `ExportOrchestrator` runs one source connector into an export
//! directory; `verify` checks a finished directory offline.

mod orchestrator;
mod verify;

pub use orchestrator::{ExportOrchestrator, ExportReport};
pub use verify::{verify, VerifyReport};
