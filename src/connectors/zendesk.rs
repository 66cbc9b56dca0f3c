//! Zendesk connector
//!
//! JSON API with Basic auth (`<email>/token:<api token>`) and page-number
//! pagination capped at 100 per page. Ticket and comment listings side-load
//! users so requesters and authors come out as email addresses.

use super::{resolve_base_url, ConnectorKind, NewTicket, Section, SourceConnector, WriteAdapter};
use crate::config::{ConnectorCredentials, DeskportConfig};
use crate::http::{AuthStrategy, RequestBody, RequestExecutor, ResponseFormat, RetryConfig};
use crate::migrate::RunContext;
use crate::model::{
    canonical_id, message_id, Customer, KbArticle, Message, MessageType, Organization, Rule,
    Ticket, TicketStatus,
};
use crate::normalize::fields::{array_at, rfc3339, strip_html};
use crate::normalize::{PRIORITY_KEYWORDS, STATUS_KEYWORDS};
use crate::pagination::{Page, PageRequest, PageStrategy, Paginator};
use crate::{DeskportError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct ZendeskTicket {
    id: u64,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    requester_id: Option<u64>,
    #[serde(default)]
    assignee_id: Option<u64>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZendeskUser {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    organization_id: Option<u64>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZendeskComment {
    id: u64,
    #[serde(default)]
    author_id: Option<u64>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html_body: Option<String>,
    #[serde(default = "default_public")]
    public: bool,
    #[serde(default)]
    created_at: Option<String>,
}

fn default_public() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ZendeskOrganization {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    domain_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ZendeskArticle {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    section_id: Option<u64>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZendeskTrigger {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    active: bool,
}

/// Side-loaded users of one response, id → email (or name)
fn user_directory(body: &Value) -> HashMap<u64, String> {
    array_at(body, &["users"])
        .into_iter()
        .filter_map(|v| serde_json::from_value::<ZendeskUser>(v.clone()).ok())
        .filter_map(|u| Some((u.id, u.email.or(u.name)?)))
        .collect()
}

fn user_ref(directory: &HashMap<u64, String>, id: u64) -> String {
    directory
        .get(&id)
        .cloned()
        .unwrap_or_else(|| format!("user:{}", id))
}

fn parse<T: serde::de::DeserializeOwned>(raw: &Value) -> Result<T> {
    Ok(serde_json::from_value(raw.clone())?)
}

/// Zendesk cannot create closed tickets; solved is the nearest state
fn status_value(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Open => "open",
        TicketStatus::Pending => "pending",
        TicketStatus::OnHold => "hold",
        TicketStatus::Solved | TicketStatus::Closed => "solved",
    }
}

pub struct ZendeskConnector {
    http: RequestExecutor,
    prefix: &'static str,
    max_pages: u32,
}

impl ZendeskConnector {
    pub fn new(creds: &ConnectorCredentials, config: &DeskportConfig) -> Result<Self> {
        let subdomain = creds.get("ZENDESK_SUBDOMAIN");
        let base_url = resolve_base_url(creds, || {
            if subdomain.contains('.') {
                format!("https://{}", subdomain)
            } else {
                format!("https://{}.zendesk.com", subdomain)
            }
        });
        let auth = AuthStrategy::Basic {
            username: format!("{}/token", creds.get("ZENDESK_EMAIL")),
            password: creds.get("ZENDESK_API_TOKEN").to_string(),
        };

        Ok(Self {
            http: RequestExecutor::new(
                "zendesk",
                base_url,
                auth,
                ResponseFormat::Json,
                &config.http,
            )?,
            prefix: ConnectorKind::Zendesk.prefix(),
            max_pages: config.export.max_pages,
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.http = self.http.with_retry_config(retry);
        self
    }

    async fn list(&self, resource: &str, page: &PageRequest, extra: &str) -> Result<Value> {
        let endpoint = format!(
            "/api/v2/{}?page={}&per_page={}{}",
            resource,
            page.page_number(),
            page.page_size,
            extra
        );
        self.http.get(&endpoint).await
    }

    fn to_ticket(&self, raw: ZendeskTicket, users: &HashMap<u64, String>) -> Ticket {
        let external_id = raw.id.to_string();
        let created_at = raw.created_at.as_deref().map(rfc3339).unwrap_or_default();

        Ticket {
            id: canonical_id(self.prefix, &external_id),
            external_id,
            source: ConnectorKind::Zendesk.id().to_string(),
            subject: raw.subject.unwrap_or_default(),
            status: raw
                .status
                .as_deref()
                .map(|s| STATUS_KEYWORDS.classify(s))
                .unwrap_or_default(),
            priority: raw
                .priority
                .as_deref()
                .map(|p| PRIORITY_KEYWORDS.classify(p))
                .unwrap_or_default(),
            assignee: raw.assignee_id.map(|id| user_ref(users, id)),
            requester: raw
                .requester_id
                .map(|id| user_ref(users, id))
                .unwrap_or_else(|| "unknown".to_string()),
            tags: raw.tags.into_iter().collect(),
            updated_at: raw
                .updated_at
                .as_deref()
                .map(rfc3339)
                .unwrap_or_else(|| created_at.clone()),
            created_at,
        }
    }

    fn to_message(&self, ticket_id: &str, raw: ZendeskComment, users: &HashMap<u64, String>) -> Message {
        let body = raw
            .body
            .or_else(|| raw.html_body.as_deref().map(strip_html))
            .unwrap_or_default();

        Message {
            id: message_id(self.prefix, &raw.id.to_string()),
            ticket_id: ticket_id.to_string(),
            author: raw
                .author_id
                .map(|id| user_ref(users, id))
                .unwrap_or_else(|| "unknown".to_string()),
            body,
            body_html: raw.html_body,
            message_type: MessageType::from_private_flag(!raw.public),
            created_at: raw.created_at.as_deref().map(rfc3339).unwrap_or_default(),
        }
    }

    /// Remote user id for the requester, created on first sight
    async fn resolve_requester(&self, email: &str, ctx: &mut RunContext) -> Result<String> {
        if let Some(id) = ctx.cached_customer(email) {
            return Ok(id.to_string());
        }

        let name = email.split('@').next().unwrap_or(email);
        let response = self
            .http
            .post(
                "/api/v2/users/create_or_update.json",
                RequestBody::Json(json!({"user": {"name": name, "email": email}})),
            )
            .await?;
        let id = response.body["user"]["id"]
            .as_u64()
            .map(|id| id.to_string())
            .ok_or_else(|| {
                DeskportError::MalformedResponse("zendesk user upsert returned no id".into())
            })?;

        debug!(email, remote_id = %id, "Resolved Zendesk requester");
        ctx.cache_customer(email, id.clone());
        Ok(id)
    }

    async fn comment(&self, dest_id: &str, message: &Message, public: bool) -> Result<()> {
        let mut comment = json!({"public": public});
        match &message.body_html {
            Some(html) => comment["html_body"] = json!(html),
            None => comment["body"] = json!(message.body),
        }
        self.http
            .put(
                &format!("/api/v2/tickets/{}.json", dest_id),
                RequestBody::Json(json!({"ticket": {"comment": comment}})),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SourceConnector for ZendeskConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Zendesk
    }

    fn page_strategy(&self, _section: Section) -> PageStrategy {
        PageStrategy::Cursor
    }

    fn page_size(&self, _section: Section, configured: u32) -> u32 {
        configured.min(MAX_PAGE_SIZE)
    }

    async fn ticket_page(&self, page: &PageRequest) -> Result<Page<Ticket>> {
        let body = self.list("tickets.json", page, "&include=users").await?;
        let users = user_directory(&body);
        let items = array_at(&body, &["tickets"]);
        Ok(Page::from_items("ticket", &items, "id", |v| {
            Ok(self.to_ticket(parse(v)?, &users))
        }))
    }

    async fn ticket_messages(&self, ticket: &Ticket) -> Result<Vec<Message>> {
        let resource = format!("tickets/{}/comments.json", ticket.external_id);
        let mut pager =
            Paginator::new(PageStrategy::Cursor, MAX_PAGE_SIZE).with_max_pages(self.max_pages);
        let mut messages = Vec::new();

        while let Some(request) = pager.next_page() {
            let body = self.list(&resource, &request, "&include=users").await?;
            let users = user_directory(&body);
            let items = array_at(&body, &["comments"]);
            let page = Page::from_items("comment", &items, "id", |v| {
                Ok(self.to_message(&ticket.id, parse(v)?, &users))
            });
            pager.record(&page);
            messages.extend(page.records);
        }
        Ok(messages)
    }

    async fn customer_page(&self, page: &PageRequest) -> Result<Page<Customer>> {
        let body = self.list("users.json", page, "").await?;
        let items = array_at(&body, &["users"]);
        Ok(Page::from_items("user", &items, "id", |v| {
            let user: ZendeskUser = parse(v)?;
            let external_id = user.id.to_string();
            Ok(Customer {
                id: canonical_id(self.prefix, &external_id),
                external_id,
                source: ConnectorKind::Zendesk.id().to_string(),
                name: user.name.unwrap_or_default(),
                email: user.email,
                phone: user.phone,
                org_id: user
                    .organization_id
                    .map(|id| canonical_id(self.prefix, &id.to_string())),
                created_at: user.created_at.as_deref().map(rfc3339),
            })
        }))
    }

    async fn organization_page(&self, page: &PageRequest) -> Result<Page<Organization>> {
        let body = self.list("organizations.json", page, "").await?;
        let items = array_at(&body, &["organizations"]);
        Ok(Page::from_items("organization", &items, "id", |v| {
            let org: ZendeskOrganization = parse(v)?;
            let external_id = org.id.to_string();
            Ok(Organization {
                id: canonical_id(self.prefix, &external_id),
                external_id,
                source: ConnectorKind::Zendesk.id().to_string(),
                name: org.name.unwrap_or_default(),
                domains: org.domain_names,
            })
        }))
    }

    async fn kb_article_page(&self, page: &PageRequest) -> Result<Page<KbArticle>> {
        let body = self.list("help_center/articles.json", page, "").await?;
        let items = array_at(&body, &["articles"]);
        Ok(Page::from_items("kb article", &items, "id", |v| {
            let article: ZendeskArticle = parse(v)?;
            let external_id = article.id.to_string();
            Ok(KbArticle {
                id: canonical_id(self.prefix, &external_id),
                external_id,
                source: ConnectorKind::Zendesk.id().to_string(),
                title: article.title.unwrap_or_default(),
                body: article.body.unwrap_or_default(),
                category: article.section_id.map(|id| format!("section:{}", id)),
                created_at: article.created_at.as_deref().map(rfc3339),
            })
        }))
    }

    async fn rule_page(&self, page: &PageRequest) -> Result<Page<Rule>> {
        let body = self.list("triggers.json", page, "").await?;
        let items = array_at(&body, &["triggers"]);
        Ok(Page::from_items("trigger", &items, "id", |v| {
            let trigger: ZendeskTrigger = parse(v)?;
            let external_id = trigger.id.to_string();
            Ok(Rule {
                id: canonical_id(self.prefix, &external_id),
                external_id,
                source: ConnectorKind::Zendesk.id().to_string(),
                name: trigger.title.unwrap_or_default(),
                kind: "trigger".to_string(),
                active: trigger.active,
            })
        }))
    }
}

#[async_trait]
impl WriteAdapter for ZendeskConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Zendesk
    }

    async fn create_ticket(&self, ticket: &NewTicket, ctx: &mut RunContext) -> Result<String> {
        let mut comment = json!({"public": true});
        match &ticket.body_html {
            Some(html) => comment["html_body"] = json!(html),
            None => comment["body"] = json!(ticket.body),
        }

        let mut payload = json!({
            "subject": ticket.subject,
            "comment": comment,
            "status": status_value(ticket.status),
            "priority": ticket.priority.as_str(),
            "tags": ticket.tags,
        });
        if let Some(email) = ticket.requester_email() {
            let id = self.resolve_requester(email, ctx).await?;
            payload["requester_id"] = id
                .parse::<u64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(id));
        }

        let response = self
            .http
            .post(
                "/api/v2/tickets.json",
                RequestBody::Json(json!({"ticket": payload})),
            )
            .await?;
        response.body["ticket"]["id"]
            .as_u64()
            .map(|id| id.to_string())
            .ok_or_else(|| {
                DeskportError::MalformedResponse("zendesk create returned no ticket id".into())
            })
    }

    async fn reply(&self, dest_id: &str, message: &Message, _ctx: &mut RunContext) -> Result<()> {
        self.comment(dest_id, message, true).await
    }

    async fn add_note(&self, dest_id: &str, message: &Message, _ctx: &mut RunContext) -> Result<()> {
        self.comment(dest_id, message, false).await
    }
}
