//! Freshdesk connector
//!
//! JSON API v2, Basic auth with the API key as user name and `X` as
//! password. Statuses are numeric and tenant-configurable, so their labels
//! are fetched from `/ticket_fields`; priorities are a fixed 1–4 scale.
//! A ticket's description is its first message and is exported as
//! `<ticket id>-description`.

use super::{resolve_base_url, ConnectorKind, NewTicket, Section, SourceConnector, WriteAdapter};
use crate::config::{ConnectorCredentials, DeskportConfig};
use crate::http::{AuthStrategy, RequestBody, RequestExecutor, ResponseFormat, RetryConfig};
use crate::migrate::RunContext;
use crate::model::{
    canonical_id, message_id, Customer, Message, MessageType, Organization, Rule, Ticket,
    TicketPriority, TicketStatus,
};
use crate::normalize::fields::{rfc3339, strip_html};
use crate::normalize::{IdLookup, PRIORITY_KEYWORDS, STATUS_KEYWORDS};
use crate::pagination::{Page, PageRequest, PageStrategy, Paginator};
use crate::{DeskportError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

const MAX_PAGE_SIZE: u32 = 100;

/// Freshdesk lists only recently updated tickets unless told otherwise
const UPDATED_SINCE: &str = "2000-01-01T00:00:00Z";

const STATUS_FALLBACK: &[(u64, &str)] = &[
    (2, "Open"),
    (3, "Pending"),
    (4, "Resolved"),
    (5, "Closed"),
    (6, "Waiting on Customer"),
    (7, "Waiting on Third Party"),
];

const PRIORITY_FALLBACK: &[(u64, &str)] = &[(1, "Low"), (2, "Medium"), (3, "High"), (4, "Urgent")];

#[derive(Debug, Default, Deserialize)]
struct Person {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FreshdeskTicket {
    id: u64,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    status: Option<u64>,
    #[serde(default)]
    priority: Option<u64>,
    #[serde(default)]
    requester_id: Option<u64>,
    #[serde(default)]
    requester: Option<Person>,
    #[serde(default)]
    responder_id: Option<u64>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FreshdeskTicketDetail {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    description_text: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FreshdeskConversation {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    body_text: Option<String>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    user_id: Option<u64>,
    #[serde(default)]
    from_email: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FreshdeskContact {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    mobile: Option<String>,
    #[serde(default)]
    company_id: Option<u64>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FreshdeskCompany {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FreshdeskPolicy {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    active: bool,
}

fn parse<T: serde::de::DeserializeOwned>(raw: &Value) -> Result<T> {
    Ok(serde_json::from_value(raw.clone())?)
}

/// Status labels from the `status` ticket field.
///
/// Choices come either as `{"2": ["Open", "Being Processed"]}` (agent label
/// first) or as `{"Open": 2}` depending on the account's API version.
fn status_labels(fields: &Value) -> Vec<(u64, String)> {
    let Some(choices) = fields
        .as_array()
        .into_iter()
        .flatten()
        .find(|f| f.get("name").and_then(Value::as_str) == Some("status"))
        .and_then(|f| f.get("choices"))
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };

    choices
        .iter()
        .filter_map(|(key, value)| match value {
            Value::Array(labels) => Some((
                key.parse().ok()?,
                labels.first()?.as_str()?.to_string(),
            )),
            Value::String(label) => Some((key.parse().ok()?, label.clone())),
            Value::Number(id) => Some((id.as_u64()?, key.clone())),
            _ => None,
        })
        .collect()
}

pub struct FreshdeskConnector {
    http: RequestExecutor,
    prefix: &'static str,
    max_pages: u32,
    statuses: IdLookup<TicketStatus>,
    priorities: IdLookup<TicketPriority>,
}

impl FreshdeskConnector {
    pub fn new(creds: &ConnectorCredentials, config: &DeskportConfig) -> Result<Self> {
        let domain = creds.get("FRESHDESK_DOMAIN");
        let base_url = resolve_base_url(creds, || {
            if domain.contains('.') {
                format!("https://{}", domain)
            } else {
                format!("https://{}.freshdesk.com", domain)
            }
        });
        let auth = AuthStrategy::Basic {
            username: creds.get("FRESHDESK_API_KEY").to_string(),
            password: "X".to_string(),
        };

        Ok(Self {
            http: RequestExecutor::new(
                "freshdesk",
                base_url,
                auth,
                ResponseFormat::Json,
                &config.http,
            )?,
            prefix: ConnectorKind::Freshdesk.prefix(),
            max_pages: config.export.max_pages,
            statuses: IdLookup::new(STATUS_FALLBACK, STATUS_KEYWORDS),
            priorities: IdLookup::new(PRIORITY_FALLBACK, PRIORITY_KEYWORDS),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.http = self.http.with_retry_config(retry);
        self
    }

    async fn load_statuses(&mut self) -> Result<()> {
        match self.http.get("/api/v2/ticket_fields").await {
            Ok(fields) => {
                let labels = status_labels(&fields);
                if labels.is_empty() {
                    warn!("Freshdesk returned no status choices, using fallback table");
                } else {
                    self.statuses.set_labels(labels);
                }
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "Could not fetch Freshdesk ticket fields, using fallback table");
                Ok(())
            }
        }
    }

    async fn list(&self, resource: &str, page: &PageRequest, extra: &str) -> Result<Vec<Value>> {
        let endpoint = format!(
            "/api/v2/{}?page={}&per_page={}{}",
            resource,
            page.page_number(),
            page.page_size,
            extra
        );
        match self.http.get(&endpoint).await? {
            Value::Array(items) => Ok(items),
            Value::Object(map) if map.is_empty() => Ok(Vec::new()),
            _ => Err(DeskportError::MalformedResponse(format!(
                "freshdesk {}: expected a JSON array",
                resource
            ))),
        }
    }

    fn to_ticket(&self, raw: FreshdeskTicket) -> Ticket {
        let external_id = raw.id.to_string();
        let requester = raw
            .requester
            .unwrap_or_default()
            .email
            .or_else(|| raw.requester_id.map(|id| format!("contact:{}", id)))
            .unwrap_or_else(|| "unknown".to_string());
        let created_at = raw.created_at.as_deref().map(rfc3339).unwrap_or_default();

        Ticket {
            id: canonical_id(self.prefix, &external_id),
            external_id,
            source: ConnectorKind::Freshdesk.id().to_string(),
            subject: raw.subject.unwrap_or_default(),
            status: raw
                .status
                .map(|s| self.statuses.resolve(s))
                .unwrap_or_default(),
            priority: raw
                .priority
                .map(|p| self.priorities.resolve(p))
                .unwrap_or_default(),
            assignee: raw.responder_id.map(|id| format!("agent:{}", id)),
            requester,
            tags: raw.tags.into_iter().collect(),
            updated_at: raw
                .updated_at
                .as_deref()
                .map(rfc3339)
                .unwrap_or_else(|| created_at.clone()),
            created_at,
        }
    }

    fn to_message(&self, ticket_id: &str, raw: FreshdeskConversation) -> Message {
        let body = raw
            .body_text
            .or_else(|| raw.body.as_deref().map(strip_html))
            .unwrap_or_default();
        Message {
            id: message_id(self.prefix, &raw.id.to_string()),
            ticket_id: ticket_id.to_string(),
            author: raw
                .from_email
                .or_else(|| raw.user_id.map(|id| format!("contact:{}", id)))
                .unwrap_or_else(|| "unknown".to_string()),
            body,
            body_html: raw.body,
            message_type: MessageType::from_private_flag(raw.private),
            created_at: raw.created_at.as_deref().map(rfc3339).unwrap_or_default(),
        }
    }

    fn description_message(&self, ticket: &Ticket, detail: FreshdeskTicketDetail) -> Option<Message> {
        let html = detail.description.filter(|d| !d.trim().is_empty());
        let body = detail
            .description_text
            .filter(|d| !d.trim().is_empty())
            .or_else(|| html.as_deref().map(strip_html))?;

        Some(Message {
            id: message_id(self.prefix, &format!("{}-description", ticket.external_id)),
            ticket_id: ticket.id.clone(),
            author: ticket.requester.clone(),
            body,
            body_html: html,
            message_type: MessageType::Reply,
            created_at: detail
                .created_at
                .as_deref()
                .map(rfc3339)
                .unwrap_or_else(|| ticket.created_at.clone()),
        })
    }

    fn status_id(&self, status: TicketStatus) -> u64 {
        self.statuses
            .id_for(status)
            .or_else(|| match status {
                TicketStatus::Solved => self.statuses.id_for(TicketStatus::Closed),
                TicketStatus::OnHold => self.statuses.id_for(TicketStatus::Pending),
                _ => None,
            })
            .or_else(|| self.statuses.id_for(TicketStatus::Open))
            .unwrap_or(2)
    }
}

#[async_trait]
impl SourceConnector for FreshdeskConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Freshdesk
    }

    async fn prepare(&mut self) -> Result<()> {
        self.load_statuses().await
    }

    fn supports(&self, section: Section) -> bool {
        // Solution articles sit behind a category/folder tree
        section != Section::KbArticles
    }

    fn page_strategy(&self, section: Section) -> PageStrategy {
        match section {
            Section::Rules => PageStrategy::Single,
            _ => PageStrategy::Cursor,
        }
    }

    fn page_size(&self, _section: Section, configured: u32) -> u32 {
        configured.min(MAX_PAGE_SIZE)
    }

    async fn ticket_page(&self, page: &PageRequest) -> Result<Page<Ticket>> {
        let extra = format!("&include=requester&updated_since={}", UPDATED_SINCE);
        let items = self.list("tickets", page, &extra).await?;
        let refs: Vec<&Value> = items.iter().collect();
        Ok(Page::from_items("ticket", &refs, "id", |v| {
            Ok(self.to_ticket(parse(v)?))
        }))
    }

    async fn ticket_messages(&self, ticket: &Ticket) -> Result<Vec<Message>> {
        let detail: FreshdeskTicketDetail = parse(
            &self
                .http
                .get(&format!("/api/v2/tickets/{}", ticket.external_id))
                .await?,
        )?;
        let mut messages: Vec<Message> =
            self.description_message(ticket, detail).into_iter().collect();

        let resource = format!("tickets/{}/conversations", ticket.external_id);
        let mut pager =
            Paginator::new(PageStrategy::Cursor, MAX_PAGE_SIZE).with_max_pages(self.max_pages);
        while let Some(request) = pager.next_page() {
            let items = self.list(&resource, &request, "").await?;
            let refs: Vec<&Value> = items.iter().collect();
            let page = Page::from_items("conversation", &refs, "id", |v| {
                Ok(self.to_message(&ticket.id, parse(v)?))
            });
            pager.record(&page);
            messages.extend(page.records);
        }
        Ok(messages)
    }

    async fn customer_page(&self, page: &PageRequest) -> Result<Page<Customer>> {
        let items = self.list("contacts", page, "").await?;
        let refs: Vec<&Value> = items.iter().collect();
        Ok(Page::from_items("contact", &refs, "id", |v| {
            let contact: FreshdeskContact = parse(v)?;
            let external_id = contact.id.to_string();
            Ok(Customer {
                id: canonical_id(self.prefix, &external_id),
                external_id,
                source: ConnectorKind::Freshdesk.id().to_string(),
                name: contact.name.unwrap_or_default(),
                email: contact.email,
                phone: contact.phone.or(contact.mobile),
                org_id: contact
                    .company_id
                    .map(|id| canonical_id(self.prefix, &id.to_string())),
                created_at: contact.created_at.as_deref().map(rfc3339),
            })
        }))
    }

    async fn organization_page(&self, page: &PageRequest) -> Result<Page<Organization>> {
        let items = self.list("companies", page, "").await?;
        let refs: Vec<&Value> = items.iter().collect();
        Ok(Page::from_items("company", &refs, "id", |v| {
            let company: FreshdeskCompany = parse(v)?;
            let external_id = company.id.to_string();
            Ok(Organization {
                id: canonical_id(self.prefix, &external_id),
                external_id,
                source: ConnectorKind::Freshdesk.id().to_string(),
                name: company.name.unwrap_or_default(),
                domains: company.domains,
            })
        }))
    }

    async fn rule_page(&self, _page: &PageRequest) -> Result<Page<Rule>> {
        let body = self.http.get("/api/v2/sla_policies").await?;
        let items: Vec<&Value> = body.as_array().map(|a| a.iter().collect()).unwrap_or_default();
        Ok(Page::from_items("sla policy", &items, "id", |v| {
            let policy: FreshdeskPolicy = parse(v)?;
            let external_id = policy.id.to_string();
            Ok(Rule {
                id: canonical_id(self.prefix, &external_id),
                external_id,
                source: ConnectorKind::Freshdesk.id().to_string(),
                name: policy.name.unwrap_or_default(),
                kind: "sla_policy".to_string(),
                active: policy.active,
            })
        }))
    }
}

#[async_trait]
impl WriteAdapter for FreshdeskConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Freshdesk
    }

    async fn prepare(&mut self) -> Result<()> {
        self.load_statuses().await
    }

    async fn create_ticket(&self, ticket: &NewTicket, _ctx: &mut RunContext) -> Result<String> {
        let priority = self
            .priorities
            .id_for(ticket.priority)
            .unwrap_or(2);
        let mut payload = json!({
            "subject": ticket.subject,
            "description": ticket.body_html.as_deref().unwrap_or(&ticket.body),
            "status": self.status_id(ticket.status),
            "priority": priority,
            "tags": ticket.tags,
        });
        match ticket.requester_email() {
            Some(email) => payload["email"] = json!(email),
            None => payload["unique_external_id"] = json!(ticket.requester),
        }

        let response = self
            .http
            .post("/api/v2/tickets", RequestBody::Json(payload))
            .await?;
        response.body["id"]
            .as_u64()
            .map(|id| id.to_string())
            .ok_or_else(|| {
                DeskportError::MalformedResponse("freshdesk create returned no ticket id".into())
            })
    }

    async fn reply(&self, dest_id: &str, message: &Message, _ctx: &mut RunContext) -> Result<()> {
        let body = message.body_html.as_deref().unwrap_or(&message.body);
        self.http
            .post(
                &format!("/api/v2/tickets/{}/reply", dest_id),
                RequestBody::Json(json!({"body": body})),
            )
            .await?;
        Ok(())
    }

    async fn add_note(&self, dest_id: &str, message: &Message, _ctx: &mut RunContext) -> Result<()> {
        let body = message.body_html.as_deref().unwrap_or(&message.body);
        self.http
            .post(
                &format!("/api/v2/tickets/{}/notes", dest_id),
                RequestBody::Json(json!({"body": body, "private": true})),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connector(server: &MockServer) -> FreshdeskConnector {
        let base_url = server.uri();
        let creds = ConnectorCredentials::from_pairs(
            ConnectorKind::Freshdesk,
            [
                ("FRESHDESK_DOMAIN", "acme"),
                ("FRESHDESK_API_KEY", "key"),
                ("FRESHDESK_BASE_URL", base_url.as_str()),
            ],
        )
        .unwrap();
        FreshdeskConnector::new(&creds, &DeskportConfig::default())
            .unwrap()
            .with_retry_config(RetryConfig::quick())
    }

    fn ticket() -> Ticket {
        Ticket {
            id: "fd-12".into(),
            external_id: "12".into(),
            source: "freshdesk".into(),
            subject: "Refund".into(),
            status: TicketStatus::Open,
            priority: TicketPriority::Normal,
            assignee: None,
            requester: "ada@example.com".into(),
            tags: Default::default(),
            created_at: "2024-01-01T10:00:00Z".into(),
            updated_at: "2024-01-01T10:00:00Z".into(),
        }
    }

    #[test]
    fn test_status_labels_both_shapes() {
        let nested = json!([
            {"name": "priority", "choices": {"Low": 1}},
            {"name": "status", "choices": {"2": ["Open", "Being Processed"], "8": ["Escalated", "Open"]}}
        ]);
        let mut labels = status_labels(&nested);
        labels.sort();
        assert_eq!(labels, vec![(2, "Open".to_string()), (8, "Escalated".to_string())]);

        let flat = json!([{"name": "status", "choices": {"Open": 2, "Closed": 5}}]);
        assert_eq!(status_labels(&flat).len(), 2);
        assert!(status_labels(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_custom_status_from_ticket_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/ticket_fields"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "status", "choices": {"9": ["Waiting on vendor", "Open"]}}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/tickets"))
            .and(query_param("include", "requester"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 12, "subject": "Refund", "status": 9, "priority": 4,
                 "requester": {"email": "ada@example.com"}, "tags": ["billing"]},
                {"id": 13, "status": 4, "priority": 1, "requester_id": 77}
            ])))
            .mount(&server)
            .await;

        let mut freshdesk = connector(&server);
        SourceConnector::prepare(&mut freshdesk).await.unwrap();
        let page = freshdesk
            .ticket_page(&PageRequest {
                start: 0,
                page_size: 100,
                index: 0,
            })
            .await
            .unwrap();

        assert_eq!(page.records[0].status, TicketStatus::Pending);
        assert_eq!(page.records[0].priority, TicketPriority::Urgent);
        assert_eq!(page.records[0].requester, "ada@example.com");
        // Fetched labels do not cover 4; the fallback table does
        assert_eq!(page.records[1].status, TicketStatus::Solved);
        assert_eq!(page.records[1].priority, TicketPriority::Low);
        assert_eq!(page.records[1].requester, "contact:77");
    }

    #[tokio::test]
    async fn test_description_becomes_first_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/tickets/12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 12, "description": "<div>Please refund</div>", "description_text": "Please refund"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/tickets/12/conversations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 300, "body_text": "Done", "private": false, "from_email": "agent@acme.example",
                 "created_at": "2024-01-02T10:00:00Z"},
                {"id": 301, "body": "<p>fraud check</p>", "private": true, "user_id": 4}
            ])))
            .mount(&server)
            .await;

        let messages = connector(&server).ticket_messages(&ticket()).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].id, "fd-msg-12-description");
        assert_eq!(messages[0].author, "ada@example.com");
        assert_eq!(messages[0].created_at, "2024-01-01T10:00:00Z");
        assert_eq!(messages[1].message_type, MessageType::Reply);
        assert_eq!(messages[2].message_type, MessageType::Note);
        assert_eq!(messages[2].body, "fraud check");
    }

    #[tokio::test]
    async fn test_create_uses_unique_external_id_without_email() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/tickets"))
            .and(body_partial_json(json!({
                "unique_external_id": "user:9", "status": 7, "priority": 3
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 4100})))
            .expect(1)
            .mount(&server)
            .await;

        let new_ticket = NewTicket {
            source_id: "hs-1".into(),
            subject: "Hello".into(),
            body: "Body".into(),
            body_html: None,
            status: TicketStatus::OnHold,
            priority: TicketPriority::High,
            tags: vec![],
            requester: "user:9".into(),
        };
        let mut ctx = RunContext::new();
        let id = connector(&server)
            .create_ticket(&new_ticket, &mut ctx)
            .await
            .unwrap();
        assert_eq!(id, "4100");
    }

    #[test]
    fn test_every_freshdesk_id_maps() {
        let statuses = IdLookup::new(STATUS_FALLBACK, STATUS_KEYWORDS);
        let priorities = IdLookup::new(PRIORITY_FALLBACK, PRIORITY_KEYWORDS);
        for id in 0..50 {
            assert!(TicketStatus::ALL.contains(&statuses.resolve(id)));
            assert!(TicketPriority::ALL.contains(&priorities.resolve(id)));
        }
        assert_eq!(statuses.resolve(7), TicketStatus::OnHold);
        assert_eq!(statuses.resolve(6), TicketStatus::Pending);
    }
}
