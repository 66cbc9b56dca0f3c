//! Offline consistency check of an export directory
//!
//! Compares the JSONL files against the manifest and checks references
//! between them. Nothing here talks to a platform.

use crate::model::{Customer, ExportManifest, Message, Ticket};
use crate::storage::{
    count_lines, ExportLayout, JsonlReader, CUSTOMERS_FILE, KB_ARTICLES_FILE, ORGANIZATIONS_FILE,
    RULES_FILE,
};
use crate::Result;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Findings of one verification
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub manifest: Option<ExportManifest>,
    /// Problems that make the export unusable for migration
    pub problems: Vec<String>,
    /// Observations that do not block migration
    pub notes: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.manifest.is_some() && self.problems.is_empty()
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.manifest {
            Some(m) => writeln!(
                f,
                "source {} exported at {}: {} tickets, {} messages",
                m.source, m.exported_at, m.counts.tickets, m.counts.messages
            )?,
            None => writeln!(f, "no manifest (export incomplete)")?,
        }
        for problem in &self.problems {
            writeln!(f, "  problem: {}", problem)?;
        }
        for note in &self.notes {
            writeln!(f, "  note: {}", note)?;
        }
        Ok(())
    }
}

/// Verify the export in `dir`
pub fn verify(dir: impl AsRef<Path>) -> Result<VerifyReport> {
    let layout = ExportLayout::new(dir.as_ref());
    let mut report = VerifyReport {
        manifest: layout.read_manifest()?,
        ..VerifyReport::default()
    };
    let Some(manifest) = report.manifest.clone() else {
        report
            .problems
            .push("manifest.json missing; the export did not finish".to_string());
        return Ok(report);
    };

    let counts = &manifest.counts;
    let expected = [
        (layout.tickets(), counts.tickets),
        (layout.messages(), counts.messages),
        (layout.file(CUSTOMERS_FILE), counts.customers),
        (layout.file(ORGANIZATIONS_FILE), counts.organizations),
        (layout.file(KB_ARTICLES_FILE), counts.kb_articles),
        (layout.file(RULES_FILE), counts.rules),
    ];
    for (path, want) in expected {
        let name = file_name(&path);
        if !path.exists() {
            report.problems.push(format!("{} missing", name));
            continue;
        }
        let got = count_lines(&path)?;
        if got != want {
            report
                .problems
                .push(format!("{} has {} lines, manifest says {}", name, got, want));
        }
    }

    let mut ticket_ids = HashSet::new();
    let mut requesters = HashSet::new();
    if layout.tickets().exists() {
        for ticket in JsonlReader::<Ticket>::open(layout.tickets())? {
            match ticket {
                Ok(ticket) => {
                    requesters.insert(ticket.requester.to_lowercase());
                    if !ticket_ids.insert(ticket.id.clone()) {
                        report.problems.push(format!("duplicate ticket id {}", ticket.id));
                    }
                }
                Err(e) => report.problems.push(e.to_string()),
            }
        }
    }

    if layout.messages().exists() {
        let mut message_ids = HashSet::new();
        for message in JsonlReader::<Message>::open(layout.messages())? {
            match message {
                Ok(message) => {
                    if !message_ids.insert(message.id.clone()) {
                        report
                            .problems
                            .push(format!("duplicate message id {}", message.id));
                    }
                    if !ticket_ids.contains(&message.ticket_id) {
                        report.problems.push(format!(
                            "message {} references unknown ticket {}",
                            message.id, message.ticket_id
                        ));
                    }
                }
                Err(e) => report.problems.push(e.to_string()),
            }
        }
    }

    let customers_path = layout.file(CUSTOMERS_FILE);
    if customers_path.exists() {
        let mut orphans = 0;
        for customer in JsonlReader::<Customer>::open(&customers_path)? {
            match customer {
                Ok(customer) => {
                    let known = customer
                        .email
                        .as_deref()
                        .map(|e| requesters.contains(&e.to_lowercase()))
                        .unwrap_or(false);
                    if !known {
                        orphans += 1;
                    }
                }
                Err(e) => report.problems.push(e.to_string()),
            }
        }
        if orphans > 0 {
            report
                .notes
                .push(format!("{} customers never requested a ticket", orphans));
        }
    }

    Ok(report)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
