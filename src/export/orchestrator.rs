//! Export orchestrator
//!
//! Drives one source connector through a fixed sequence:
//!
//! 1. `prepare` (metadata; failures already degraded by the connector)
//! 2. tickets, each followed by its conversation
//! 3. customers, organizations, KB articles, rules
//! 4. `manifest.json`
//!
//! Records are appended to their JSONL file as soon as a page arrives.
//! Only fatal errors (credentials) stop the run; a failed page, section or
//! conversation is logged and counted. Positional walks step over a failed
//! page and keep going. The manifest is removed at the start
//! and written at the very end, so its presence means the run finished.

use crate::config::ExportConfig;
use crate::connectors::{Section, SourceConnector};
use crate::model::{ExportCounts, ExportManifest, Message};
use crate::pagination::{Page, PageRequest, Paginator};
use crate::storage::{
    ExportLayout, JsonlWriter, CUSTOMERS_FILE, KB_ARTICLES_FILE, ORGANIZATIONS_FILE, RULES_FILE,
};
use crate::Result;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Sections exported after tickets, with their files
const SECTIONS: [(Section, &str); 4] = [
    (Section::Customers, CUSTOMERS_FILE),
    (Section::Organizations, ORGANIZATIONS_FILE),
    (Section::KbArticles, KB_ARTICLES_FILE),
    (Section::Rules, RULES_FILE),
];

/// Outcome of one export run
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub manifest: ExportManifest,
    /// Conversations, pages and sections that failed and were skipped
    pub partial_failures: u64,
    /// Sections with at least one page missing
    pub failed_sections: Vec<&'static str>,
    /// Records dropped because their canonical id was already written
    pub duplicates_dropped: u64,
}

impl ExportReport {
    /// "N tickets exported (M messages)"
    pub fn summary(&self) -> String {
        format!(
            "{} tickets exported ({} messages)",
            self.manifest.counts.tickets, self.manifest.counts.messages
        )
    }
}

#[derive(Default)]
struct RunState {
    partial_failures: u64,
    failed_sections: Vec<&'static str>,
    duplicates_dropped: u64,
}

impl RunState {
    fn page_failed(&mut self, section: Section) {
        self.partial_failures += 1;
        if !self.failed_sections.contains(&section.label()) {
            self.failed_sections.push(section.label());
        }
    }
}

pub struct ExportOrchestrator {
    layout: ExportLayout,
    config: ExportConfig,
}

impl ExportOrchestrator {
    pub fn new(dir: impl AsRef<Path>, config: ExportConfig) -> Self {
        Self {
            layout: ExportLayout::new(dir.as_ref()),
            config,
        }
    }

    pub fn layout(&self) -> &ExportLayout {
        &self.layout
    }

    pub async fn run(&self, source: &mut dyn SourceConnector) -> Result<ExportReport> {
        let kind = source.kind();
        self.layout.ensure()?;
        let manifest_path = self.layout.manifest();
        if manifest_path.exists() {
            fs::remove_file(&manifest_path)?;
        }

        info!(source = %kind, dir = %self.layout.dir().display(), "Starting export");
        source.prepare().await?;

        let mut state = RunState::default();
        let mut counts = ExportCounts::default();

        let (tickets, messages) = self.export_tickets(&*source, &mut state).await?;
        counts.tickets = tickets;
        counts.messages = messages;

        for (section, file) in SECTIONS {
            let mut writer = JsonlWriter::create(self.layout.file(file))?;
            if source.supports(section) {
                self.export_section(&*source, section, &mut writer, &mut state)
                    .await?;
            } else {
                debug!(source = %kind, section = section.label(), "Section not supported, skipping");
            }
            writer.flush()?;

            let written = writer.written();
            match section {
                Section::Customers => counts.customers = written,
                Section::Organizations => counts.organizations = written,
                Section::KbArticles => counts.kb_articles = written,
                Section::Rules => counts.rules = written,
                Section::Tickets => {}
            }
        }

        let manifest = ExportManifest {
            source: kind.id().to_string(),
            exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            counts,
        };
        self.layout.write_manifest(&manifest)?;

        let report = ExportReport {
            manifest,
            partial_failures: state.partial_failures,
            failed_sections: state.failed_sections,
            duplicates_dropped: state.duplicates_dropped,
        };
        info!(
            source = %kind,
            partial_failures = report.partial_failures,
            "{}",
            report.summary()
        );
        Ok(report)
    }

    fn pager(&self, source: &dyn SourceConnector, section: Section) -> Paginator {
        Paginator::new(
            source.page_strategy(section),
            source.page_size(section, self.config.page_size),
        )
        .starting_at(source.first_marker(section))
        .with_max_pages(self.config.max_pages)
    }

    /// Returns `(tickets, messages)` written
    async fn export_tickets(
        &self,
        source: &dyn SourceConnector,
        state: &mut RunState,
    ) -> Result<(u64, u64)> {
        let mut tickets_out = JsonlWriter::create(self.layout.tickets())?;
        let mut messages_out = JsonlWriter::create(self.layout.messages())?;
        let mut ticket_ids: HashSet<String> = HashSet::new();
        let mut message_ids: HashSet<String> = HashSet::new();
        let mut pager = self.pager(source, Section::Tickets);

        while let Some(request) = pager.next_page() {
            let page = match source.ticket_page(&request).await {
                Ok(page) => page,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    state.page_failed(Section::Tickets);
                    if pager.skip_failed_page() {
                        warn!(page = request.page_number(), error = %e, "Ticket page failed, skipping it");
                        continue;
                    }
                    warn!(page = request.page_number(), error = %e, "Ticket page failed, stopping ticket export");
                    break;
                }
            };
            pager.advance(page.fetched, page.max_key);

            for ticket in &page.records {
                if !ticket_ids.insert(ticket.id.clone()) {
                    debug!(ticket = %ticket.id, "Ticket already exported in this run");
                    state.duplicates_dropped += 1;
                    continue;
                }
                tickets_out.write(ticket)?;

                let mut messages: Vec<Message> = match source.ticket_messages(ticket).await {
                    Ok(messages) => messages,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(ticket = %ticket.id, error = %e, "Skipping ticket conversation");
                        state.partial_failures += 1;
                        continue;
                    }
                };
                messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));

                for message in &messages {
                    if message_ids.insert(message.id.clone()) {
                        messages_out.write(message)?;
                    } else {
                        debug!(message = %message.id, "Duplicate message dropped");
                        state.duplicates_dropped += 1;
                    }
                }
            }
            tickets_out.flush()?;
            messages_out.flush()?;
        }

        Ok((tickets_out.written(), messages_out.written()))
    }

    async fn export_section(
        &self,
        source: &dyn SourceConnector,
        section: Section,
        writer: &mut JsonlWriter,
        state: &mut RunState,
    ) -> Result<()> {
        let mut pager = self.pager(source, section);
        let mut ids: HashSet<String> = HashSet::new();

        while let Some(request) = pager.next_page() {
            let outcome = match fetch_section_page(source, section, &request, writer, &mut ids).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    state.page_failed(section);
                    if pager.skip_failed_page() {
                        warn!(section = section.label(), page = request.page_number(), error = %e, "Page failed, skipping it");
                        continue;
                    }
                    warn!(section = section.label(), error = %e, "Section failed, continuing with the next one");
                    return Ok(());
                }
            };
            state.duplicates_dropped += outcome.duplicates;
            pager.advance(outcome.fetched, outcome.max_key);
        }

        debug!(section = section.label(), records = writer.written(), "Section exported");
        Ok(())
    }
}

struct PageOutcome {
    fetched: usize,
    max_key: Option<u64>,
    duplicates: u64,
}

trait Identified {
    fn canonical_id(&self) -> &str;
}

macro_rules! identified {
    ($($ty:ty),*) => {
        $(impl Identified for $ty {
            fn canonical_id(&self) -> &str {
                &self.id
            }
        })*
    };
}

identified!(
    crate::model::Customer,
    crate::model::Organization,
    crate::model::KbArticle,
    crate::model::Rule
);

fn write_page<T: Serialize + Identified>(
    page: Page<T>,
    writer: &mut JsonlWriter,
    ids: &mut HashSet<String>,
) -> Result<PageOutcome> {
    let mut duplicates = 0;
    for record in &page.records {
        if ids.insert(record.canonical_id().to_string()) {
            writer.write(record)?;
        } else {
            duplicates += 1;
        }
    }
    Ok(PageOutcome {
        fetched: page.fetched,
        max_key: page.max_key,
        duplicates,
    })
}

async fn fetch_section_page(
    source: &dyn SourceConnector,
    section: Section,
    request: &PageRequest,
    writer: &mut JsonlWriter,
    ids: &mut HashSet<String>,
) -> Result<PageOutcome> {
    match section {
        Section::Customers => write_page(source.customer_page(request).await?, writer, ids),
        Section::Organizations => write_page(source.organization_page(request).await?, writer, ids),
        Section::KbArticles => write_page(source.kb_article_page(request).await?, writer, ids),
        Section::Rules => write_page(source.rule_page(request).await?, writer, ids),
        Section::Tickets => Ok(PageOutcome {
            fetched: 0,
            max_key: None,
            duplicates: 0,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::ConnectorKind;
    use crate::model::{
        Customer, KbArticle, MessageType, Organization, Rule, Ticket, TicketPriority, TicketStatus,
    };
    use crate::pagination::PageStrategy;
    use crate::storage::read_records;
    use crate::DeskportError;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// In-memory platform with `total` tickets of two messages each
    struct FakeSource {
        total: u64,
        broken_conversation: Option<u64>,
        fail_customers: bool,
        failing_ticket_page: Option<u32>,
        auth_fails_on_messages: bool,
        ticket_calls: AtomicU32,
    }

    impl FakeSource {
        fn new(total: u64) -> Self {
            Self {
                total,
                broken_conversation: None,
                fail_customers: false,
                failing_ticket_page: None,
                auth_fails_on_messages: false,
                ticket_calls: AtomicU32::new(0),
            }
        }
    }

    fn ticket(n: u64) -> Ticket {
        Ticket {
            id: format!("zd-{}", n),
            external_id: n.to_string(),
            source: "zendesk".into(),
            subject: format!("Ticket {}", n),
            status: TicketStatus::Open,
            priority: TicketPriority::Normal,
            assignee: None,
            requester: "ada@example.com".into(),
            tags: BTreeSet::new(),
            created_at: "2024-01-01T00:00:00Z".into(),
            updated_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    fn message(ticket: &Ticket, n: u64, at: &str) -> Message {
        Message {
            id: format!("zd-msg-{}-{}", ticket.external_id, n),
            ticket_id: ticket.id.clone(),
            author: "ada@example.com".into(),
            body: format!("message {}", n),
            body_html: None,
            message_type: MessageType::Reply,
            created_at: at.into(),
        }
    }

    #[async_trait]
    impl SourceConnector for FakeSource {
        fn kind(&self) -> ConnectorKind {
            ConnectorKind::Zendesk
        }

        fn supports(&self, section: Section) -> bool {
            section != Section::KbArticles
        }

        fn page_strategy(&self, _section: Section) -> PageStrategy {
            PageStrategy::Cursor
        }

        async fn ticket_page(&self, page: &PageRequest) -> Result<Page<Ticket>> {
            self.ticket_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_ticket_page == Some(page.index) {
                return Err(DeskportError::RateLimitExceeded {
                    endpoint: "/tickets".into(),
                    attempts: 5,
                });
            }
            let records: Vec<Ticket> = (page.start + 1..=self.total)
                .take(page.page_size as usize)
                .map(ticket)
                .collect();
            Ok(Page {
                fetched: records.len(),
                max_key: None,
                records,
            })
        }

        async fn ticket_messages(&self, ticket: &Ticket) -> Result<Vec<Message>> {
            if self.auth_fails_on_messages {
                return Err(DeskportError::Auth("revoked".into()));
            }
            if self.broken_conversation.map(|n| n.to_string()) == Some(ticket.external_id.clone()) {
                return Err(DeskportError::Http {
                    status: 500,
                    endpoint: "/comments".into(),
                    body: String::new(),
                });
            }
            // Out of order plus a duplicate, as some platforms return them
            Ok(vec![
                message(ticket, 2, "2024-01-02T00:00:00Z"),
                message(ticket, 1, "2024-01-01T00:00:00Z"),
                message(ticket, 2, "2024-01-02T00:00:00Z"),
            ])
        }

        async fn customer_page(&self, _page: &PageRequest) -> Result<Page<Customer>> {
            if self.fail_customers {
                return Err(DeskportError::RateLimitExceeded {
                    endpoint: "/users".into(),
                    attempts: 5,
                });
            }
            Ok(Page::empty())
        }

        async fn organization_page(&self, _page: &PageRequest) -> Result<Page<Organization>> {
            Ok(Page {
                records: vec![Organization {
                    id: "zd-1".into(),
                    external_id: "1".into(),
                    source: "zendesk".into(),
                    name: "Acme".into(),
                    domains: vec![],
                }],
                fetched: 1,
                max_key: Some(1),
            })
        }

        async fn kb_article_page(&self, _page: &PageRequest) -> Result<Page<KbArticle>> {
            panic!("unsupported section must not be fetched")
        }

        async fn rule_page(&self, _page: &PageRequest) -> Result<Page<Rule>> {
            Ok(Page::empty())
        }
    }

    fn orchestrator(dir: &TempDir, page_size: u32) -> ExportOrchestrator {
        ExportOrchestrator::new(
            dir.path(),
            ExportConfig {
                page_size,
                ..ExportConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_export_writes_files_and_manifest() {
        let dir = TempDir::new().unwrap();
        let mut source = FakeSource::new(5);

        let report = orchestrator(&dir, 2).run(&mut source).await.unwrap();

        assert_eq!(report.manifest.counts.tickets, 5);
        assert_eq!(report.manifest.counts.messages, 10);
        assert_eq!(report.manifest.counts.organizations, 1);
        assert_eq!(report.duplicates_dropped, 5);
        assert_eq!(report.summary(), "5 tickets exported (10 messages)");
        // ceil(5 / 2) pages, the last one short
        assert_eq!(source.ticket_calls.load(Ordering::SeqCst), 3);

        let layout = ExportLayout::new(dir.path());
        assert_eq!(layout.read_manifest().unwrap(), Some(report.manifest));
        let messages: Vec<Message> = read_records(layout.messages()).unwrap();
        assert_eq!(messages[0].id, "zd-msg-1-1");
        assert_eq!(messages[1].id, "zd-msg-1-2");
        assert!(layout.file(KB_ARTICLES_FILE).exists());
    }

    #[tokio::test]
    async fn test_broken_conversation_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let mut source = FakeSource::new(3);
        source.broken_conversation = Some(2);

        let report = orchestrator(&dir, 10).run(&mut source).await.unwrap();

        assert_eq!(report.manifest.counts.tickets, 3);
        assert_eq!(report.manifest.counts.messages, 4);
        assert_eq!(report.partial_failures, 1);
    }

    #[tokio::test]
    async fn test_failed_ticket_page_does_not_truncate_export() {
        let dir = TempDir::new().unwrap();
        let mut source = FakeSource::new(6);
        source.failing_ticket_page = Some(1);

        let report = orchestrator(&dir, 2).run(&mut source).await.unwrap();

        // Tickets 3 and 4 lived on the failed page
        let layout = ExportLayout::new(dir.path());
        let tickets: Vec<Ticket> = read_records(layout.tickets()).unwrap();
        let ids: Vec<&str> = tickets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["zd-1", "zd-2", "zd-5", "zd-6"]);
        assert_eq!(report.manifest.counts.tickets, 4);
        assert_eq!(report.partial_failures, 1);
        assert_eq!(report.failed_sections, vec!["tickets"]);
        assert_eq!(source.ticket_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failed_section_does_not_stop_later_sections() {
        let dir = TempDir::new().unwrap();
        let mut source = FakeSource::new(1);
        source.fail_customers = true;

        let report = orchestrator(&dir, 10).run(&mut source).await.unwrap();

        assert_eq!(report.failed_sections, vec!["customers"]);
        assert_eq!(report.manifest.counts.customers, 0);
        assert_eq!(report.manifest.counts.organizations, 1);
        assert!(ExportLayout::new(dir.path()).manifest().exists());
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_without_manifest() {
        let dir = TempDir::new().unwrap();
        let layout = ExportLayout::new(dir.path());
        fs::write(layout.manifest(), "{}").unwrap();

        let mut source = FakeSource::new(2);
        source.auth_fails_on_messages = true;

        let err = orchestrator(&dir, 10).run(&mut source).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(!layout.manifest().exists());
    }

    #[tokio::test]
    async fn test_empty_platform_costs_one_ticket_call() {
        let dir = TempDir::new().unwrap();
        let mut source = FakeSource::new(0);

        let report = orchestrator(&dir, 50).run(&mut source).await.unwrap();
        assert_eq!(report.summary(), "0 tickets exported (0 messages)");
        assert_eq!(source.ticket_calls.load(Ordering::SeqCst), 1);
    }
}
