//! Help Scout connector
//!
//! Mailbox API 2.0: Bearer token, HAL responses with records under
//! `_embedded.<collection>`, and fixed server-side page sizes (25
//! conversations, 50 of everything else). Conversations have no priority,
//! so exported tickets are `normal` and migrated tickets drop it.
//!
//! A conversation's threads mix messages with bookkeeping entries (line
//! items, forwards); only message-like thread types are exported.

use super::{resolve_base_url, ConnectorKind, NewTicket, Section, SourceConnector, WriteAdapter};
use crate::config::{ConnectorCredentials, DeskportConfig};
use crate::http::{AuthStrategy, RequestBody, RequestExecutor, ResponseFormat, RetryConfig};
use crate::migrate::RunContext;
use crate::model::{
    canonical_id, message_id, Customer, Message, MessageType, Organization, Rule, Ticket,
    TicketPriority, TicketStatus,
};
use crate::normalize::fields::{array_at, rfc3339, strip_html, u64_field};
use crate::normalize::STATUS_KEYWORDS;
use crate::pagination::{Page, PageRequest, PageStrategy};
use crate::{DeskportError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.helpscout.net";
const CONVERSATION_PAGE_SIZE: u32 = 25;
const PAGE_SIZE: u32 = 50;

/// Thread types that carry conversation content
const MESSAGE_THREAD_TYPES: &[&str] = &["customer", "message", "reply", "note", "chat", "phone"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first: Option<String>,
    #[serde(default)]
    last: Option<String>,
}

impl Person {
    fn display(&self) -> Option<String> {
        if let Some(email) = &self.email {
            return Some(email.clone());
        }
        let name = [self.first.as_deref(), self.last.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        (!name.trim().is_empty()).then(|| name.trim().to_string())
    }
}

#[derive(Debug, Deserialize)]
struct Tag {
    tag: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Conversation {
    id: u64,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    assignee: Option<Person>,
    #[serde(default)]
    primary_customer: Option<Person>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    user_updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Thread {
    id: u64,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    created_by: Option<Person>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddedValue {
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct CustomerEmbedded {
    #[serde(default)]
    emails: Vec<EmbeddedValue>,
    #[serde(default)]
    phones: Vec<EmbeddedValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HelpScoutCustomer {
    id: u64,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    organization_id: Option<u64>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(rename = "_embedded", default)]
    embedded: CustomerEmbedded,
}

#[derive(Debug, Deserialize)]
struct HelpScoutOrganization {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Workflow {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

fn parse<T: serde::de::DeserializeOwned>(raw: &Value) -> Result<T> {
    Ok(serde_json::from_value(raw.clone())?)
}

fn status_value(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Open => "active",
        TicketStatus::Pending | TicketStatus::OnHold => "pending",
        TicketStatus::Solved | TicketStatus::Closed => "closed",
    }
}

pub struct HelpScoutConnector {
    http: RequestExecutor,
    prefix: &'static str,
    mailbox_id: String,
    max_pages: u32,
}

impl HelpScoutConnector {
    pub fn new(creds: &ConnectorCredentials, config: &DeskportConfig) -> Result<Self> {
        let base_url = resolve_base_url(creds, || DEFAULT_BASE_URL.to_string());
        let auth = AuthStrategy::Bearer(creds.get("HELPSCOUT_API_TOKEN").to_string());

        Ok(Self {
            http: RequestExecutor::new(
                "helpscout",
                base_url,
                auth,
                ResponseFormat::Json,
                &config.http,
            )?,
            prefix: ConnectorKind::HelpScout.prefix(),
            mailbox_id: creds.get("HELPSCOUT_MAILBOX_ID").to_string(),
            max_pages: config.export.max_pages,
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.http = self.http.with_retry_config(retry);
        self
    }

    fn mailbox_value(&self) -> Value {
        self.mailbox_id
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(self.mailbox_id.clone()))
    }

    async fn embedded(&self, resource: &str, collection: &str, page: &PageRequest) -> Result<Value> {
        let separator = if resource.contains('?') { '&' } else { '?' };
        let endpoint = format!("/v2/{}{}page={}", resource, separator, page.page_number());
        let body = self.http.get(&endpoint).await?;
        debug!(
            resource,
            count = array_at(&body, &["_embedded", collection]).len(),
            "Fetched Help Scout page"
        );
        Ok(body)
    }

    fn to_ticket(&self, raw: Conversation) -> Ticket {
        let external_id = raw.id.to_string();
        let customer = raw.primary_customer.unwrap_or_default();
        let requester = customer
            .email
            .clone()
            .or_else(|| customer.id.map(|id| format!("customer:{}", id)))
            .unwrap_or_else(|| "unknown".to_string());
        let created_at = raw.created_at.as_deref().map(rfc3339).unwrap_or_default();

        Ticket {
            id: canonical_id(self.prefix, &external_id),
            external_id,
            source: ConnectorKind::HelpScout.id().to_string(),
            subject: raw.subject.unwrap_or_default(),
            status: raw
                .status
                .as_deref()
                .map(|s| STATUS_KEYWORDS.classify(s))
                .unwrap_or_default(),
            priority: TicketPriority::default(),
            assignee: raw.assignee.and_then(|a| a.display()),
            requester,
            tags: raw.tags.into_iter().map(|t| t.tag).collect(),
            updated_at: raw
                .user_updated_at
                .as_deref()
                .map(rfc3339)
                .unwrap_or_else(|| created_at.clone()),
            created_at,
        }
    }

    fn to_message(&self, ticket_id: &str, raw: Thread) -> Message {
        let html = raw.body.filter(|b| !b.trim().is_empty());
        Message {
            id: message_id(self.prefix, &raw.id.to_string()),
            ticket_id: ticket_id.to_string(),
            author: raw
                .created_by
                .and_then(|p| p.display())
                .unwrap_or_else(|| "unknown".to_string()),
            body: html.as_deref().map(strip_html).unwrap_or_default(),
            body_html: html,
            message_type: MessageType::from_private_flag(raw.kind == "note"),
            created_at: raw.created_at.as_deref().map(rfc3339).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SourceConnector for HelpScoutConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::HelpScout
    }

    fn supports(&self, section: Section) -> bool {
        // Docs articles live behind a separate API and key
        section != Section::KbArticles
    }

    fn page_strategy(&self, _section: Section) -> PageStrategy {
        PageStrategy::Cursor
    }

    fn page_size(&self, section: Section, _configured: u32) -> u32 {
        match section {
            Section::Tickets => CONVERSATION_PAGE_SIZE,
            _ => PAGE_SIZE,
        }
    }

    async fn ticket_page(&self, page: &PageRequest) -> Result<Page<Ticket>> {
        let resource = format!("conversations?status=all&mailbox={}", self.mailbox_id);
        let body = self.embedded(&resource, "conversations", page).await?;
        let items = array_at(&body, &["_embedded", "conversations"]);
        Ok(Page::from_items("conversation", &items, "id", |v| {
            Ok(self.to_ticket(parse(v)?))
        }))
    }

    async fn ticket_messages(&self, ticket: &Ticket) -> Result<Vec<Message>> {
        let resource = format!("conversations/{}/threads", ticket.external_id);
        let mut messages = Vec::new();
        let mut page = PageRequest {
            start: 0,
            page_size: PAGE_SIZE,
            index: 0,
        };

        // Threads report their page count, which is more reliable than the
        // short-page rule for this endpoint
        loop {
            let body = self.embedded(&resource, "threads", &page).await?;
            let items: Vec<&Value> = array_at(&body, &["_embedded", "threads"])
                .into_iter()
                .filter(|t| {
                    t.get("type")
                        .and_then(Value::as_str)
                        .is_some_and(|kind| MESSAGE_THREAD_TYPES.contains(&kind))
                })
                .collect();
            messages.extend(
                Page::from_items("thread", &items, "id", |v| {
                    Ok(self.to_message(&ticket.id, parse(v)?))
                })
                .records,
            );

            let total_pages = body
                .get("page")
                .and_then(|p| u64_field(p, "totalPages"))
                .unwrap_or(1);
            if page.page_number() >= total_pages || page.index + 1 >= self.max_pages {
                break;
            }
            page.index += 1;
            page.start += u64::from(PAGE_SIZE);
        }
        Ok(messages)
    }

    async fn customer_page(&self, page: &PageRequest) -> Result<Page<Customer>> {
        let body = self.embedded("customers", "customers", page).await?;
        let items = array_at(&body, &["_embedded", "customers"]);
        Ok(Page::from_items("customer", &items, "id", |v| {
            let customer: HelpScoutCustomer = parse(v)?;
            let external_id = customer.id.to_string();
            let name = [customer.first_name.as_deref(), customer.last_name.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            Ok(Customer {
                id: canonical_id(self.prefix, &external_id),
                external_id,
                source: ConnectorKind::HelpScout.id().to_string(),
                name,
                email: customer.embedded.emails.first().map(|e| e.value.clone()),
                phone: customer.embedded.phones.first().map(|p| p.value.clone()),
                org_id: customer
                    .organization_id
                    .map(|id| canonical_id(self.prefix, &id.to_string())),
                created_at: customer.created_at.as_deref().map(rfc3339),
            })
        }))
    }

    async fn organization_page(&self, page: &PageRequest) -> Result<Page<Organization>> {
        let body = self.embedded("organizations", "organizations", page).await?;
        let items = array_at(&body, &["_embedded", "organizations"]);
        Ok(Page::from_items("organization", &items, "id", |v| {
            let org: HelpScoutOrganization = parse(v)?;
            let external_id = org.id.to_string();
            Ok(Organization {
                id: canonical_id(self.prefix, &external_id),
                external_id,
                source: ConnectorKind::HelpScout.id().to_string(),
                name: org.name.unwrap_or_default(),
                domains: org.domains,
            })
        }))
    }

    async fn rule_page(&self, page: &PageRequest) -> Result<Page<Rule>> {
        let body = self.embedded("workflows", "workflows", page).await?;
        let items = array_at(&body, &["_embedded", "workflows"]);
        Ok(Page::from_items("workflow", &items, "id", |v| {
            let workflow: Workflow = parse(v)?;
            let external_id = workflow.id.to_string();
            Ok(Rule {
                id: canonical_id(self.prefix, &external_id),
                external_id,
                source: ConnectorKind::HelpScout.id().to_string(),
                name: workflow.name.unwrap_or_default(),
                kind: "workflow".to_string(),
                active: workflow.status.as_deref() == Some("active"),
            })
        }))
    }
}

#[async_trait]
impl WriteAdapter for HelpScoutConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::HelpScout
    }

    async fn create_ticket(&self, ticket: &NewTicket, ctx: &mut RunContext) -> Result<String> {
        let email = ticket.requester_email().ok_or_else(|| {
            DeskportError::Other(format!(
                "helpscout needs a requester email, {} has '{}'",
                ticket.source_id, ticket.requester
            ))
        })?;
        let text = ticket.body_html.as_deref().unwrap_or(&ticket.body);

        let payload = json!({
            "subject": ticket.subject,
            "customer": {"email": email},
            "mailboxId": self.mailbox_value(),
            "type": "email",
            "status": status_value(ticket.status),
            "tags": ticket.tags,
            "threads": [{"type": "customer", "customer": {"email": email}, "text": text}],
        });
        let response = self
            .http
            .post("/v2/conversations", RequestBody::Json(payload))
            .await?;

        let dest_id = response
            .header("resource-id")
            .map(str::to_string)
            .or_else(|| response.body.get("id").and_then(Value::as_u64).map(|id| id.to_string()))
            .ok_or_else(|| {
                DeskportError::MalformedResponse(
                    "helpscout create returned no Resource-ID".into(),
                )
            })?;
        ctx.remember_requester(&dest_id, email);
        Ok(dest_id)
    }

    async fn reply(&self, dest_id: &str, message: &Message, ctx: &mut RunContext) -> Result<()> {
        let text = message.body_html.as_deref().unwrap_or(&message.body);
        let mut payload = json!({"text": text});
        if let Some(email) = ctx.requester_for(dest_id) {
            payload["customer"] = json!({"email": email});
        }
        self.http
            .post(
                &format!("/v2/conversations/{}/reply", dest_id),
                RequestBody::Json(payload),
            )
            .await?;
        Ok(())
    }

    async fn add_note(&self, dest_id: &str, message: &Message, _ctx: &mut RunContext) -> Result<()> {
        let text = message.body_html.as_deref().unwrap_or(&message.body);
        self.http
            .post(
                &format!("/v2/conversations/{}/notes", dest_id),
                RequestBody::Json(json!({"text": text})),
            )
            .await?;
        Ok(())
    }
}
