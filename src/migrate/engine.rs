//! Migration engine
//!
//! Replays an export directory into a target platform, one ticket at a time:
//!
//! ```text
//! pending ──create_ticket──▶ created ──map.record──▶ persisted ──replay──▶ done
//!    │                                                   │
//!    └─ failure: counted, next ticket                    └─ follow-up failure: counted
//! ```
//!
//! The map entry is written before any follow-up is replayed, so a crash
//! during replay never causes the ticket to be created twice. An export is
//! never replayed into the platform it came from.

use super::RunContext;
use crate::connectors::{NewTicket, WriteAdapter};
use crate::model::{Message, MessageType, Ticket};
use crate::storage::{read_records, ExportLayout, MigrationMap};
use crate::{DeskportError, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Knobs for one migration run
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    /// Plan only; no network calls and no map writes
    pub dry_run: bool,
    /// Migrate at most this many pending tickets
    pub limit: Option<usize>,
}

/// One ticket as it would be created, for dry-run previews
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTicket {
    pub source_id: String,
    pub subject: String,
    pub follow_ups: usize,
}

/// Outcome of one migration run
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Tickets in the export
    pub total: usize,
    pub already_migrated: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub replayed_messages: usize,
    pub failed_messages: usize,
    pub map_path: PathBuf,
    /// Filled on dry runs only
    pub preview: Vec<PlannedTicket>,
}

impl MigrationReport {
    /// Tickets that were (or would be) attempted
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.preview.is_empty() && self.attempted() == 0 {
            return write!(
                f,
                "no tickets to migrate ({} already migrated, map: {})",
                self.already_migrated,
                self.map_path.display()
            );
        }
        write!(
            f,
            "{} succeeded, {} failed, {} messages replayed, {} messages failed (map: {})",
            self.succeeded,
            self.failed,
            self.replayed_messages,
            self.failed_messages,
            self.map_path.display()
        )
    }
}

pub struct MigrationEngine {
    layout: ExportLayout,
}

impl MigrationEngine {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            layout: ExportLayout::new(dir.as_ref()),
        }
    }

    pub async fn run(
        &self,
        target: &mut dyn WriteAdapter,
        options: MigrateOptions,
    ) -> Result<MigrationReport> {
        let tickets_path = self.layout.tickets();
        if !tickets_path.exists() {
            return Err(DeskportError::Config(format!(
                "{} not found; run an export first",
                tickets_path.display()
            )));
        }
        let tickets: Vec<Ticket> = read_records(&tickets_path)?;
        let mut conversations = self.load_conversations()?;

        let target_id = target.kind().id();
        let source_id = match self.layout.read_manifest()? {
            Some(manifest) => Some(manifest.source),
            None => tickets.first().map(|t| t.source.clone()),
        };
        if source_id.as_deref() == Some(target_id) {
            return Err(DeskportError::Config(format!(
                "{} was exported from {}; choose a different target",
                self.layout.dir().display(),
                target_id
            )));
        }

        let mut map = MigrationMap::load(self.layout.migration_map(target_id))?;
        let mut report = MigrationReport {
            total: tickets.len(),
            map_path: map.path().to_path_buf(),
            ..MigrationReport::default()
        };

        let mut pending: Vec<&Ticket> = Vec::new();
        for ticket in &tickets {
            if map.contains(&ticket.id) {
                report.already_migrated += 1;
            } else {
                pending.push(ticket);
            }
        }
        if let Some(limit) = options.limit {
            pending.truncate(limit);
        }

        if pending.is_empty() {
            info!(target = target_id, "no tickets to migrate");
            return Ok(report);
        }

        if options.dry_run {
            for ticket in pending {
                let messages = conversations.remove(&ticket.id).unwrap_or_default();
                let planned = PlannedTicket {
                    source_id: ticket.id.clone(),
                    subject: ticket.subject.clone(),
                    follow_ups: messages.len().saturating_sub(1),
                };
                info!(
                    ticket = %planned.source_id,
                    follow_ups = planned.follow_ups,
                    "Would migrate \"{}\"",
                    planned.subject
                );
                report.preview.push(planned);
            }
            return Ok(report);
        }

        target.prepare().await?;
        let mut ctx = RunContext::new();

        for ticket in pending {
            let messages = conversations.remove(&ticket.id).unwrap_or_default();
            let (opening, follow_ups) = split_conversation(messages);
            let new_ticket = new_ticket(ticket, opening.as_ref());

            let dest_id = match target.create_ticket(&new_ticket, &mut ctx).await {
                Ok(dest_id) => dest_id,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(ticket = %ticket.id, error = %e, "Ticket creation failed, skipping");
                    report.failed += 1;
                    continue;
                }
            };
            map.record(&ticket.id, &dest_id)?;
            report.succeeded += 1;
            debug!(ticket = %ticket.id, dest = %dest_id, "Ticket created");

            for message in &follow_ups {
                let replayed = match message.message_type {
                    MessageType::Reply => target.reply(&dest_id, message, &mut ctx).await,
                    MessageType::Note => target.add_note(&dest_id, message, &mut ctx).await,
                };
                match replayed {
                    Ok(()) => report.replayed_messages += 1,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(
                            ticket = %ticket.id,
                            message = %message.id,
                            error = %e,
                            "Follow-up replay failed"
                        );
                        report.failed_messages += 1;
                    }
                }
            }
        }

        info!(
            target = target_id,
            succeeded = report.succeeded,
            failed = report.failed,
            failed_messages = report.failed_messages,
            customers_resolved = ctx.customer_count(),
            "{}",
            report
        );
        Ok(report)
    }

    /// Messages grouped by ticket; a missing messages file means no messages
    fn load_conversations(&self) -> Result<HashMap<String, Vec<Message>>> {
        let path = self.layout.messages();
        let mut grouped: HashMap<String, Vec<Message>> = HashMap::new();
        if !path.exists() {
            return Ok(grouped);
        }
        for message in read_records::<Message>(&path)? {
            grouped.entry(message.ticket_id.clone()).or_default().push(message);
        }
        Ok(grouped)
    }
}

/// Chronological order; the earliest message opens the ticket
fn split_conversation(mut messages: Vec<Message>) -> (Option<Message>, Vec<Message>) {
    // Stable, so messages sharing a timestamp keep their export order
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    if messages.is_empty() {
        return (None, messages);
    }
    let opening = messages.remove(0);
    (Some(opening), messages)
}

fn new_ticket(ticket: &Ticket, opening: Option<&Message>) -> NewTicket {
    let (body, body_html) = match opening {
        Some(m) => (m.body.clone(), m.body_html.clone()),
        None => (ticket.subject.clone(), None),
    };
    NewTicket {
        source_id: ticket.id.clone(),
        subject: ticket.subject.clone(),
        body,
        body_html,
        status: ticket.status,
        priority: ticket.priority,
        tags: ticket.tags.iter().cloned().collect(),
        requester: ticket.requester.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::ConnectorKind;
    use crate::model::{ExportCounts, ExportManifest, TicketPriority, TicketStatus};
    use crate::storage::write_records;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingTarget {
        calls: Mutex<Vec<String>>,
        created: Mutex<Vec<NewTicket>>,
        fail_create_for: Option<String>,
        fail_reply_body: Option<String>,
        prepared: bool,
    }

    impl RecordingTarget {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WriteAdapter for RecordingTarget {
        fn kind(&self) -> ConnectorKind {
            ConnectorKind::Freshdesk
        }

        async fn prepare(&mut self) -> Result<()> {
            self.prepared = true;
            Ok(())
        }

        async fn create_ticket(&self, ticket: &NewTicket, _ctx: &mut RunContext) -> Result<String> {
            self.calls.lock().unwrap().push(format!("create {}", ticket.source_id));
            if self.fail_create_for.as_deref() == Some(ticket.source_id.as_str()) {
                return Err(DeskportError::Http {
                    status: 422,
                    endpoint: "/api/v2/tickets".into(),
                    body: "invalid".into(),
                });
            }
            self.created.lock().unwrap().push(ticket.clone());
            Ok(format!("900{}", &ticket.source_id[3..]))
        }

        async fn reply(&self, dest_id: &str, message: &Message, _ctx: &mut RunContext) -> Result<()> {
            self.calls.lock().unwrap().push(format!("reply {} {}", dest_id, message.body));
            if self.fail_reply_body.as_deref() == Some(message.body.as_str()) {
                return Err(DeskportError::RateLimitExceeded {
                    endpoint: "/reply".into(),
                    attempts: 5,
                });
            }
            Ok(())
        }

        async fn add_note(&self, dest_id: &str, message: &Message, _ctx: &mut RunContext) -> Result<()> {
            self.calls.lock().unwrap().push(format!("note {} {}", dest_id, message.body));
            Ok(())
        }
    }

    fn ticket(n: u32) -> Ticket {
        Ticket {
            id: format!("ky-{}", n),
            external_id: n.to_string(),
            source: "kayako".into(),
            subject: format!("Subject {}", n),
            status: TicketStatus::Open,
            priority: TicketPriority::Urgent,
            assignee: None,
            requester: "ada@example.com".into(),
            tags: BTreeSet::from(["vip".to_string()]),
            created_at: "2024-01-01T00:00:00Z".into(),
            updated_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    fn message(ticket: u32, n: u32, kind: MessageType, at: &str) -> Message {
        Message {
            id: format!("ky-msg-{}", n),
            ticket_id: format!("ky-{}", ticket),
            author: "ada@example.com".into(),
            body: format!("body {}", n),
            body_html: None,
            message_type: kind,
            created_at: at.into(),
        }
    }

    fn export(dir: &Path, tickets: &[Ticket], messages: &[Message]) {
        let layout = ExportLayout::new(dir);
        write_records(layout.tickets(), tickets).unwrap();
        write_records(layout.messages(), messages).unwrap();
    }

    #[tokio::test]
    async fn test_failed_creation_skips_only_that_ticket() {
        let dir = TempDir::new().unwrap();
        export(dir.path(), &[ticket(1), ticket(2), ticket(3)], &[]);
        let mut target = RecordingTarget {
            fail_create_for: Some("ky-2".into()),
            ..Default::default()
        };

        let report = MigrationEngine::new(dir.path())
            .run(&mut target, MigrateOptions::default())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        let map = MigrationMap::load(&report.map_path).unwrap();
        assert_eq!(map.len(), 2);
        assert!(!map.contains("ky-2"));
        assert!(report.map_path.ends_with("migration-map-freshdesk.json"));
    }

    #[tokio::test]
    async fn test_refuses_to_migrate_into_source_platform() {
        let dir = TempDir::new().unwrap();
        let mut own = ticket(1);
        own.source = "freshdesk".into();
        export(dir.path(), &[own], &[]);
        let mut target = RecordingTarget::default();

        let err = MigrationEngine::new(dir.path())
            .run(&mut target, MigrateOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DeskportError::Config(_)));
        assert!(target.calls().is_empty());
        assert!(!ExportLayout::new(dir.path()).migration_map("freshdesk").exists());
    }

    #[tokio::test]
    async fn test_manifest_source_decides_the_platform() {
        let dir = TempDir::new().unwrap();
        export(dir.path(), &[ticket(1)], &[]);
        let layout = ExportLayout::new(dir.path());
        layout
            .write_manifest(&ExportManifest {
                source: "freshdesk".into(),
                exported_at: "2024-01-01T00:00:00Z".into(),
                counts: ExportCounts::default(),
            })
            .unwrap();

        let mut target = RecordingTarget::default();
        let result = MigrationEngine::new(dir.path())
            .run(&mut target, MigrateOptions { dry_run: true, limit: None })
            .await;
        assert!(matches!(result, Err(DeskportError::Config(_))));
    }

    #[tokio::test]
    async fn test_rerun_makes_no_calls() {
        let dir = TempDir::new().unwrap();
        export(dir.path(), &[ticket(1), ticket(2)], &[]);
        let engine = MigrationEngine::new(dir.path());

        let mut first = RecordingTarget::default();
        engine.run(&mut first, MigrateOptions::default()).await.unwrap();

        let mut second = RecordingTarget::default();
        let report = engine.run(&mut second, MigrateOptions::default()).await.unwrap();

        assert!(second.calls().is_empty());
        assert!(!second.prepared);
        assert_eq!(report.already_migrated, 2);
        assert!(report.to_string().starts_with("no tickets to migrate"));
    }

    #[tokio::test]
    async fn test_opening_message_and_replay_order() {
        let dir = TempDir::new().unwrap();
        export(
            dir.path(),
            &[ticket(1)],
            &[
                message(1, 3, MessageType::Reply, "2024-01-03T00:00:00Z"),
                message(1, 1, MessageType::Reply, "2024-01-01T00:00:00Z"),
                message(1, 2, MessageType::Note, "2024-01-02T00:00:00Z"),
            ],
        );
        let mut target = RecordingTarget::default();

        let report = MigrationEngine::new(dir.path())
            .run(&mut target, MigrateOptions::default())
            .await
            .unwrap();

        assert!(target.prepared);
        assert_eq!(report.replayed_messages, 2);
        assert_eq!(
            target.calls(),
            vec!["create ky-1", "note 9001 body 2", "reply 9001 body 3"]
        );
        let created = target.created.lock().unwrap();
        assert_eq!(created[0].body, "body 1");
        assert_eq!(created[0].tags, vec!["vip"]);
    }

    #[tokio::test]
    async fn test_ticket_without_messages_uses_subject() {
        let dir = TempDir::new().unwrap();
        export(dir.path(), &[ticket(4)], &[]);
        let mut target = RecordingTarget::default();

        MigrationEngine::new(dir.path())
            .run(&mut target, MigrateOptions::default())
            .await
            .unwrap();

        assert_eq!(target.created.lock().unwrap()[0].body, "Subject 4");
    }

    #[tokio::test]
    async fn test_follow_up_failure_is_counted() {
        let dir = TempDir::new().unwrap();
        export(
            dir.path(),
            &[ticket(1)],
            &[
                message(1, 1, MessageType::Reply, "2024-01-01T00:00:00Z"),
                message(1, 2, MessageType::Reply, "2024-01-02T00:00:00Z"),
                message(1, 3, MessageType::Reply, "2024-01-03T00:00:00Z"),
            ],
        );
        let mut target = RecordingTarget {
            fail_reply_body: Some("body 2".into()),
            ..Default::default()
        };

        let report = MigrationEngine::new(dir.path())
            .run(&mut target, MigrateOptions::default())
            .await
            .unwrap();

        assert_eq!(report.failed_messages, 1);
        assert_eq!(report.replayed_messages, 1);
        assert!(MigrationMap::load(&report.map_path).unwrap().contains("ky-1"));
    }

    #[tokio::test]
    async fn test_dry_run_and_limit() {
        let dir = TempDir::new().unwrap();
        export(
            dir.path(),
            &[ticket(1), ticket(2), ticket(3)],
            &[
                message(1, 1, MessageType::Reply, "2024-01-01T00:00:00Z"),
                message(1, 2, MessageType::Reply, "2024-01-02T00:00:00Z"),
            ],
        );
        let mut target = RecordingTarget::default();

        let report = MigrationEngine::new(dir.path())
            .run(
                &mut target,
                MigrateOptions {
                    dry_run: true,
                    limit: Some(2),
                },
            )
            .await
            .unwrap();

        assert!(target.calls().is_empty());
        assert!(!report.map_path.exists());
        assert_eq!(
            report.preview,
            vec![
                PlannedTicket {
                    source_id: "ky-1".into(),
                    subject: "Subject 1".into(),
                    follow_ups: 1,
                },
                PlannedTicket {
                    source_id: "ky-2".into(),
                    subject: "Subject 2".into(),
                    follow_ups: 0,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_export_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut target = RecordingTarget::default();
        let err = MigrationEngine::new(dir.path())
            .run(&mut target, MigrateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
