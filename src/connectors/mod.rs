//! Helpdesk connectors
//!
//! Each supported platform implements two capability traits:
//!
//! - [`SourceConnector`]: read side, one page or one ticket conversation at a
//!   time, already normalized into canonical records.
//! - [`WriteAdapter`]: write side used by migration (`create_ticket`,
//!   `reply`, `add_note`).
//!
//! Callers never branch on the platform: [`registry`] resolves a
//! [`ConnectorKind`] into trait objects once per run.
//!
//! # Supported platforms
//!
//! | Connector | Prefix | Wire format | Auth | Ticket paging |
//! |---|---|---|---|---|
//! | zendesk | `zd` | JSON | Basic (email/token) | cursor (page numbers) |
//! | freshdesk | `fd` | JSON | Basic (API key) | cursor (page numbers) |
//! | kayako | `ky` | XML | HMAC salt/signature | offset window |
//! | helpscout | `hs` | JSON (HAL) | Bearer | cursor (page numbers) |

pub mod freshdesk;
pub mod helpscout;
pub mod kayako;
pub mod registry;
pub mod zendesk;

use crate::migrate::RunContext;
use crate::model::{
    Customer, KbArticle, Message, Organization, Rule, Ticket, TicketPriority, TicketStatus,
};
use crate::pagination::{Page, PageRequest, PageStrategy};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use registry::{open_source, open_writer};

/// Supported platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Zendesk,
    Freshdesk,
    Kayako,
    HelpScout,
}

impl ConnectorKind {
    pub const ALL: [ConnectorKind; 4] = [
        Self::Zendesk,
        Self::Freshdesk,
        Self::Kayako,
        Self::HelpScout,
    ];

    /// Registry key, also used in file names and the `source` field
    pub fn id(&self) -> &'static str {
        match self {
            Self::Zendesk => "zendesk",
            Self::Freshdesk => "freshdesk",
            Self::Kayako => "kayako",
            Self::HelpScout => "helpscout",
        }
    }

    /// Canonical id prefix; unique per platform
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Zendesk => "zd",
            Self::Freshdesk => "fd",
            Self::Kayako => "ky",
            Self::HelpScout => "hs",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Zendesk => "Zendesk",
            Self::Freshdesk => "Freshdesk",
            Self::Kayako => "Kayako Classic",
            Self::HelpScout => "Help Scout",
        }
    }

    pub fn required_env(&self) -> &'static [&'static str] {
        match self {
            Self::Zendesk => &["ZENDESK_SUBDOMAIN", "ZENDESK_EMAIL", "ZENDESK_API_TOKEN"],
            Self::Freshdesk => &["FRESHDESK_DOMAIN", "FRESHDESK_API_KEY"],
            Self::Kayako => &["KAYAKO_DOMAIN", "KAYAKO_API_KEY", "KAYAKO_SECRET_KEY"],
            Self::HelpScout => &["HELPSCOUT_API_TOKEN", "HELPSCOUT_MAILBOX_ID"],
        }
    }

    pub fn optional_env(&self) -> &'static [&'static str] {
        match self {
            Self::Kayako => &["KAYAKO_DEPARTMENT_ID", "KAYAKO_STAFF_ID"],
            _ => &[],
        }
    }

    /// e.g. `KAYAKO_BASE_URL`
    pub fn base_url_env(&self) -> String {
        format!("{}_BASE_URL", self.id().to_uppercase())
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ConnectorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        Self::ALL
            .into_iter()
            .find(|k| k.id() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.id()).collect();
                format!("unknown connector '{}' (known: {})", s, known.join(", "))
            })
    }
}

/// Top-level resource types an export walks through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Tickets,
    Customers,
    Organizations,
    KbArticles,
    Rules,
}

impl Section {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tickets => "tickets",
            Self::Customers => "customers",
            Self::Organizations => "organizations",
            Self::KbArticles => "kb_articles",
            Self::Rules => "rules",
        }
    }
}

/// Read side of a connector
#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn kind(&self) -> ConnectorKind;

    /// Fetch metadata needed for normalization (status/priority labels).
    /// Non-fatal failures are absorbed here and leave fallback tables in
    /// place; only fatal errors are returned.
    async fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Sections this platform can export; the rest are skipped
    fn supports(&self, section: Section) -> bool {
        let _ = section;
        true
    }

    fn page_strategy(&self, section: Section) -> PageStrategy;

    /// Page size for a section; platforms with a fixed size override this
    fn page_size(&self, section: Section, configured: u32) -> u32 {
        let _ = section;
        configured
    }

    /// Where a marker walk begins
    fn first_marker(&self, section: Section) -> u64 {
        let _ = section;
        0
    }

    async fn ticket_page(&self, page: &PageRequest) -> Result<Page<Ticket>>;

    /// The whole conversation of one ticket, replies and notes
    async fn ticket_messages(&self, ticket: &Ticket) -> Result<Vec<Message>>;

    async fn customer_page(&self, page: &PageRequest) -> Result<Page<Customer>>;

    async fn organization_page(&self, page: &PageRequest) -> Result<Page<Organization>>;

    async fn kb_article_page(&self, page: &PageRequest) -> Result<Page<KbArticle>> {
        let _ = page;
        Ok(Page::empty())
    }

    async fn rule_page(&self, page: &PageRequest) -> Result<Page<Rule>>;
}

/// Ticket as handed to a target platform
#[derive(Debug, Clone, PartialEq)]
pub struct NewTicket {
    /// Canonical id of the source ticket
    pub source_id: String,
    pub subject: String,
    /// Body of the earliest message (subject when the ticket has none)
    pub body: String,
    pub body_html: Option<String>,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub tags: Vec<String>,
    pub requester: String,
}

impl NewTicket {
    /// Requester if it looks like an email address
    pub fn requester_email(&self) -> Option<&str> {
        let r = self.requester.trim();
        (r.contains('@') && !r.starts_with('@')).then_some(r)
    }
}

/// Write side of a connector
#[async_trait]
pub trait WriteAdapter: Send + Sync {
    fn kind(&self) -> ConnectorKind;

    /// Load vocabulary needed for writes. Called once, and only when there
    /// is something to migrate.
    async fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Create the ticket and return the platform's id for it
    async fn create_ticket(&self, ticket: &NewTicket, ctx: &mut RunContext) -> Result<String>;

    /// Public reply on an existing ticket
    async fn reply(&self, dest_id: &str, message: &Message, ctx: &mut RunContext) -> Result<()>;

    /// Internal note; platforms without notes post a regular reply
    async fn add_note(&self, dest_id: &str, message: &Message, ctx: &mut RunContext) -> Result<()> {
        self.reply(dest_id, message, ctx).await
    }
}

/// `<base url override>` or the platform's public URL
pub(crate) fn resolve_base_url(
    creds: &crate::config::ConnectorCredentials,
    default: impl FnOnce() -> String,
) -> String {
    creds
        .base_url_override()
        .map(str::to_string)
        .unwrap_or_else(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_prefixes_never_collide() {
        let prefixes: HashSet<&str> = ConnectorKind::ALL.iter().map(|k| k.prefix()).collect();
        assert_eq!(prefixes.len(), ConnectorKind::ALL.len());
        for a in ConnectorKind::ALL {
            for b in ConnectorKind::ALL {
                if a != b {
                    assert!(!a.prefix().starts_with(&format!("{}-", b.prefix())));
                }
            }
            assert!(!a.prefix().contains('-'));
        }
    }

    #[test]
    fn test_parse_connector_ids() {
        assert_eq!("zendesk".parse::<ConnectorKind>(), Ok(ConnectorKind::Zendesk));
        assert_eq!("Help-Scout".parse::<ConnectorKind>(), Ok(ConnectorKind::HelpScout));
        assert_eq!(" KAYAKO ".parse::<ConnectorKind>(), Ok(ConnectorKind::Kayako));
        assert!("jira".parse::<ConnectorKind>().is_err());
    }

    #[test]
    fn test_base_url_env() {
        assert_eq!(ConnectorKind::HelpScout.base_url_env(), "HELPSCOUT_BASE_URL");
    }

    #[test]
    fn test_requester_email() {
        let mut ticket = NewTicket {
            source_id: "ky-1".into(),
            subject: "s".into(),
            body: "b".into(),
            body_html: None,
            status: TicketStatus::Open,
            priority: TicketPriority::Normal,
            tags: vec![],
            requester: "ada@example.com".into(),
        };
        assert_eq!(ticket.requester_email(), Some("ada@example.com"));
        ticket.requester = "user:17".into();
        assert_eq!(ticket.requester_email(), None);
    }
}
