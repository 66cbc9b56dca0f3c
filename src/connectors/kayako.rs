//! Kayako Classic connector
//!
//! REST+XML API behind `/api/index.php?e=<route>`. Every call is signed with
//! the API key, a fresh salt and `base64(HMAC-SHA256(secret, salt))`.
//!
//! - Tickets page through an offset window route
//!   (`/Tickets/Ticket/ListAll/<dept>/<status>/<owner>/<user>/<count>/<start>`,
//!   `-1` meaning "any").
//! - Users page by marker (`/Base/User/Filter/<marker>/<count>`, first id 1).
//! - Posts and notes live on separate routes; a post's `isprivate` flag also
//!   marks it as a note.

use super::{resolve_base_url, ConnectorKind, NewTicket, Section, SourceConnector, WriteAdapter};
use crate::config::{ConnectorCredentials, DeskportConfig};
use crate::http::{AuthStrategy, RequestBody, RequestExecutor, ResponseFormat};
use crate::migrate::RunContext;
use crate::model::{
    canonical_id, message_id, Customer, KbArticle, Message, MessageType, Organization, Rule,
    Ticket, TicketPriority, TicketStatus,
};
use crate::normalize::fields::{
    array_at, bool_field, require_str, str_field, strip_html, timestamp_field, u64_field,
};
use crate::normalize::{ArrayFields, IdLookup, PRIORITY_KEYWORDS, STATUS_KEYWORDS};
use crate::pagination::{Page, PageRequest, PageStrategy};
use crate::{DeskportError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Elements that are lists even when a response holds exactly one
pub const ARRAY_FIELDS: ArrayFields = ArrayFields(&[
    "ticket",
    "post",
    "note",
    "user",
    "userorganization",
    "department",
    "ticketstatus",
    "ticketpriority",
    "kbarticle",
    "category",
]);

/// Stock statuses of a fresh Kayako install
const STATUS_FALLBACK: &[(u64, &str)] = &[(1, "Open"), (2, "On Hold"), (3, "Closed")];

const PRIORITY_FALLBACK: &[(u64, &str)] = &[
    (1, "Low"),
    (2, "Normal"),
    (3, "High"),
    (4, "Urgent"),
    (5, "Emergency"),
    (6, "Critical"),
];

const DEFAULT_DEPARTMENT_ID: &str = "1";
const DEFAULT_STAFF_ID: &str = "1";

pub struct KayakoConnector {
    http: RequestExecutor,
    prefix: &'static str,
    statuses: IdLookup<TicketStatus>,
    priorities: IdLookup<TicketPriority>,
    department_id: String,
    staff_id: String,
}

fn route(path: &str) -> String {
    format!("?e={}", path)
}

impl KayakoConnector {
    pub fn new(creds: &ConnectorCredentials, config: &DeskportConfig) -> Result<Self> {
        let base_url = resolve_base_url(creds, || {
            format!("https://{}/api/index.php", creds.get("KAYAKO_DOMAIN"))
        });
        let auth = AuthStrategy::Hmac {
            api_key: creds.get("KAYAKO_API_KEY").to_string(),
            secret: creds.get("KAYAKO_SECRET_KEY").to_string(),
        };
        let http = RequestExecutor::new(
            "kayako",
            base_url,
            auth,
            ResponseFormat::Xml(ARRAY_FIELDS),
            &config.http,
        )?;

        Ok(Self {
            http,
            prefix: ConnectorKind::Kayako.prefix(),
            statuses: IdLookup::new(STATUS_FALLBACK, STATUS_KEYWORDS),
            priorities: IdLookup::new(PRIORITY_FALLBACK, PRIORITY_KEYWORDS),
            department_id: creds
                .optional("KAYAKO_DEPARTMENT_ID")
                .unwrap_or(DEFAULT_DEPARTMENT_ID)
                .to_string(),
            staff_id: creds
                .optional("KAYAKO_STAFF_ID")
                .unwrap_or(DEFAULT_STAFF_ID)
                .to_string(),
        })
    }

    /// Replace the executor's retry policy (tests use a fast one)
    pub fn with_retry_config(mut self, retry: crate::http::RetryConfig) -> Self {
        self.http = self.http.with_retry_config(retry);
        self
    }

    /// `(id, title)` pairs from a status/priority listing
    async fn fetch_labels(&self, path: &str, container: &str, item: &str) -> Result<Vec<(u64, String)>> {
        let body = self.http.get(&route(path)).await?;
        Ok(array_at(&body, &[container, item])
            .into_iter()
            .filter_map(|v| Some((u64_field(v, "id")?, str_field(v, "title")?)))
            .collect())
    }

    /// Fetch status and priority labels; on failure keep the fallback tables
    async fn load_lookups(&mut self) -> Result<()> {
        match self
            .fetch_labels("/Tickets/TicketStatus", "ticketstatuses", "ticketstatus")
            .await
        {
            Ok(labels) if !labels.is_empty() => self.statuses.set_labels(labels),
            Ok(_) => warn!("Kayako returned no ticket statuses, using fallback table"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(error = %e, "Could not fetch Kayako statuses, using fallback table"),
        }

        match self
            .fetch_labels("/Tickets/TicketPriority", "ticketpriorities", "ticketpriority")
            .await
        {
            Ok(labels) if !labels.is_empty() => self.priorities.set_labels(labels),
            Ok(_) => warn!("Kayako returned no ticket priorities, using fallback table"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(error = %e, "Could not fetch Kayako priorities, using fallback table"),
        }
        Ok(())
    }

    fn normalize_ticket(&self, raw: &Value) -> Result<Ticket> {
        let external_id = require_str(raw, "id", "kayako ticket")?;
        let status = str_field(raw, "statusid")
            .or_else(|| str_field(raw, "ticketstatusid"))
            .map(|s| self.statuses.resolve_raw(&s))
            .unwrap_or_default();
        let priority = str_field(raw, "priorityid")
            .or_else(|| str_field(raw, "ticketpriorityid"))
            .map(|p| self.priorities.resolve_raw(&p))
            .unwrap_or_default();

        let requester = str_field(raw, "email")
            .or_else(|| str_field(raw, "userid").map(|id| format!("user:{}", id)))
            .unwrap_or_else(|| "unknown".to_string());
        let tags: BTreeSet<String> = str_field(raw, "tags")
            .map(|t| {
                t.split([',', ' '])
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let created_at = timestamp_field(raw, "creationtime").unwrap_or_default();
        let updated_at = timestamp_field(raw, "lastactivity").unwrap_or_else(|| created_at.clone());

        Ok(Ticket {
            id: canonical_id(self.prefix, &external_id),
            external_id,
            source: ConnectorKind::Kayako.id().to_string(),
            subject: str_field(raw, "subject").unwrap_or_default(),
            status,
            priority,
            assignee: str_field(raw, "ownerstaffname"),
            requester,
            tags,
            created_at,
            updated_at,
        })
    }

    fn normalize_post(&self, ticket_id: &str, raw: &Value) -> Result<Message> {
        let external_id = require_str(raw, "id", "kayako post")?;
        let contents = str_field(raw, "contents").unwrap_or_default();
        let (body, body_html) = if bool_field(raw, "ishtml") {
            (strip_html(&contents), Some(contents))
        } else {
            (contents, None)
        };

        Ok(Message {
            id: message_id(self.prefix, &external_id),
            ticket_id: ticket_id.to_string(),
            author: str_field(raw, "email")
                .or_else(|| str_field(raw, "fullname"))
                .unwrap_or_else(|| "unknown".to_string()),
            body,
            body_html,
            message_type: MessageType::from_private_flag(bool_field(raw, "isprivate")),
            created_at: timestamp_field(raw, "dateline").unwrap_or_default(),
        })
    }

    /// Notes share no id space with posts, hence the `note-` infix
    fn normalize_note(&self, ticket_id: &str, raw: &Value) -> Result<Message> {
        let external_id = require_str(raw, "id", "kayako note")?;
        Ok(Message {
            id: message_id(self.prefix, &format!("note-{}", external_id)),
            ticket_id: ticket_id.to_string(),
            author: str_field(raw, "creatorstaffname").unwrap_or_else(|| "staff".to_string()),
            body: str_field(raw, "#text").unwrap_or_default(),
            body_html: None,
            message_type: MessageType::Note,
            created_at: timestamp_field(raw, "creationdate").unwrap_or_default(),
        })
    }

    fn normalize_user(&self, raw: &Value) -> Result<Customer> {
        let external_id = require_str(raw, "id", "kayako user")?;
        // Users with several addresses come back as a list of <email>
        let email = array_at(raw, &["email"])
            .first()
            .and_then(|v| v.as_str().map(str::to_string))
            .or_else(|| str_field(raw, "email"));
        let org_id = str_field(raw, "userorganizationid")
            .filter(|id| id != "0")
            .map(|id| canonical_id(self.prefix, &id));

        Ok(Customer {
            id: canonical_id(self.prefix, &external_id),
            external_id,
            source: ConnectorKind::Kayako.id().to_string(),
            name: str_field(raw, "fullname").unwrap_or_default(),
            email,
            phone: str_field(raw, "phone"),
            org_id,
            created_at: timestamp_field(raw, "dateline"),
        })
    }

    fn normalize_organization(&self, raw: &Value) -> Result<Organization> {
        let external_id = require_str(raw, "id", "kayako organization")?;
        let domains = str_field(raw, "website")
            .and_then(|site| website_domain(&site))
            .into_iter()
            .collect();

        Ok(Organization {
            id: canonical_id(self.prefix, &external_id),
            external_id,
            source: ConnectorKind::Kayako.id().to_string(),
            name: str_field(raw, "name").unwrap_or_default(),
            domains,
        })
    }

    fn normalize_article(&self, raw: &Value) -> Result<KbArticle> {
        let external_id = str_field(raw, "kbarticleid")
            .or_else(|| str_field(raw, "id"))
            .ok_or_else(|| DeskportError::MalformedResponse("kayako article without id".into()))?;
        let category = array_at(raw, &["categories", "category"])
            .first()
            .and_then(|c| c.as_str().map(str::to_string).or_else(|| str_field(c, "title")));

        Ok(KbArticle {
            id: canonical_id(self.prefix, &external_id),
            external_id,
            source: ConnectorKind::Kayako.id().to_string(),
            title: str_field(raw, "subject").unwrap_or_default(),
            body: str_field(raw, "contents").unwrap_or_default(),
            category,
            created_at: timestamp_field(raw, "dateline"),
        })
    }

    fn normalize_department(&self, raw: &Value) -> Result<Rule> {
        let external_id = require_str(raw, "id", "kayako department")?;
        Ok(Rule {
            id: canonical_id(self.prefix, &external_id),
            external_id,
            source: ConnectorKind::Kayako.id().to_string(),
            name: str_field(raw, "title").unwrap_or_default(),
            kind: "department".to_string(),
            active: true,
        })
    }

    /// Closest status id this install knows for a canonical status
    fn status_id(&self, status: TicketStatus) -> u64 {
        let candidates: &[TicketStatus] = match status {
            TicketStatus::Open => &[TicketStatus::Open],
            TicketStatus::Pending => &[TicketStatus::Pending, TicketStatus::OnHold],
            TicketStatus::OnHold => &[TicketStatus::OnHold],
            TicketStatus::Solved => &[TicketStatus::Solved, TicketStatus::Closed],
            TicketStatus::Closed => &[TicketStatus::Closed],
        };
        candidates
            .iter()
            .find_map(|s| self.statuses.id_for(*s))
            .or_else(|| self.statuses.id_for(TicketStatus::Open))
            .unwrap_or(1)
    }

    fn priority_id(&self, priority: TicketPriority) -> u64 {
        self.priorities
            .id_for(priority)
            .or_else(|| self.priorities.id_for(TicketPriority::Normal))
            .unwrap_or(2)
    }

    async fn post_form(&self, path: &str, fields: Vec<(String, String)>) -> Result<Value> {
        Ok(self.http.post(&route(path), RequestBody::Form(fields)).await?.body)
    }
}

fn website_domain(site: &str) -> Option<String> {
    let host = site
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.")
        .split(['/', '?', '#'])
        .next()?
        .to_lowercase();
    (!host.is_empty()).then_some(host)
}

fn form(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[async_trait]
impl SourceConnector for KayakoConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Kayako
    }

    async fn prepare(&mut self) -> Result<()> {
        self.load_lookups().await
    }

    fn page_strategy(&self, section: Section) -> PageStrategy {
        match section {
            Section::Tickets | Section::KbArticles => PageStrategy::OffsetWindow,
            Section::Customers => PageStrategy::Marker,
            Section::Organizations | Section::Rules => PageStrategy::Single,
        }
    }

    fn first_marker(&self, section: Section) -> u64 {
        match section {
            Section::Customers => 1,
            _ => 0,
        }
    }

    async fn ticket_page(&self, page: &PageRequest) -> Result<Page<Ticket>> {
        let path = format!(
            "/Tickets/Ticket/ListAll/-1/-1/-1/-1/{}/{}",
            page.page_size, page.start
        );
        let body = self.http.get(&route(&path)).await?;
        let items = array_at(&body, &["tickets", "ticket"]);
        debug!(count = items.len(), start = page.start, "Fetched Kayako tickets");
        Ok(Page::from_items("ticket", &items, "id", |v| self.normalize_ticket(v)))
    }

    async fn ticket_messages(&self, ticket: &Ticket) -> Result<Vec<Message>> {
        let ext = &ticket.external_id;

        let posts = self
            .http
            .get(&route(&format!("/Tickets/TicketPost/ListAll/{}", ext)))
            .await?;
        let mut messages: Vec<Message> = Page::from_items(
            "post",
            &array_at(&posts, &["posts", "post"]),
            "id",
            |v| self.normalize_post(&ticket.id, v),
        )
        .records;

        let notes = self
            .http
            .get(&route(&format!("/Tickets/TicketNote/ListAll/{}", ext)))
            .await?;
        messages.extend(
            Page::from_items("note", &array_at(&notes, &["notes", "note"]), "id", |v| {
                self.normalize_note(&ticket.id, v)
            })
            .records,
        );

        Ok(messages)
    }

    async fn customer_page(&self, page: &PageRequest) -> Result<Page<Customer>> {
        let path = format!("/Base/User/Filter/{}/{}", page.start, page.page_size);
        let body = self.http.get(&route(&path)).await?;
        let items = array_at(&body, &["users", "user"]);
        Ok(Page::from_items("user", &items, "id", |v| self.normalize_user(v)))
    }

    async fn organization_page(&self, _page: &PageRequest) -> Result<Page<Organization>> {
        let body = self.http.get(&route("/Base/UserOrganization")).await?;
        let items = array_at(&body, &["userorganizations", "userorganization"]);
        Ok(Page::from_items("organization", &items, "id", |v| {
            self.normalize_organization(v)
        }))
    }

    async fn kb_article_page(&self, page: &PageRequest) -> Result<Page<KbArticle>> {
        let path = format!(
            "/Knowledgebase/Article/ListAll/0/{}/{}",
            page.page_size, page.start
        );
        let body = self.http.get(&route(&path)).await?;
        let items = array_at(&body, &["kbarticles", "kbarticle"]);
        Ok(Page::from_items("kb article", &items, "kbarticleid", |v| {
            self.normalize_article(v)
        }))
    }

    async fn rule_page(&self, _page: &PageRequest) -> Result<Page<Rule>> {
        let body = self.http.get(&route("/Base/Department")).await?;
        let items = array_at(&body, &["departments", "department"]);
        Ok(Page::from_items("department", &items, "id", |v| {
            self.normalize_department(v)
        }))
    }
}

#[async_trait]
impl WriteAdapter for KayakoConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Kayako
    }

    async fn prepare(&mut self) -> Result<()> {
        self.load_lookups().await
    }

    async fn create_ticket(&self, ticket: &NewTicket, _ctx: &mut RunContext) -> Result<String> {
        let email = ticket.requester_email().ok_or_else(|| {
            DeskportError::Other(format!(
                "kayako needs a requester email, {} has '{}'",
                ticket.source_id, ticket.requester
            ))
        })?;
        let fullname = email.split('@').next().unwrap_or(email);
        let status_id = self.status_id(ticket.status).to_string();
        let priority_id = self.priority_id(ticket.priority).to_string();
        let contents = ticket.body_html.as_deref().unwrap_or(&ticket.body);
        let tags = ticket.tags.join(",");

        let mut fields = form(&[
            ("subject", ticket.subject.as_str()),
            ("fullname", fullname),
            ("email", email),
            ("contents", contents),
            ("departmentid", self.department_id.as_str()),
            ("ticketstatusid", status_id.as_str()),
            ("ticketpriorityid", priority_id.as_str()),
            ("autouserid", "1"),
        ]);
        if !tags.is_empty() {
            fields.push(("tags".to_string(), tags));
        }

        let body = self.post_form("/Tickets/Ticket", fields).await?;
        array_at(&body, &["tickets", "ticket"])
            .first()
            .and_then(|t| str_field(t, "id"))
            .ok_or_else(|| {
                DeskportError::MalformedResponse("kayako create returned no ticket id".into())
            })
    }

    async fn reply(&self, dest_id: &str, message: &Message, _ctx: &mut RunContext) -> Result<()> {
        let contents = message.body_html.as_deref().unwrap_or(&message.body);
        self.post_form(
            "/Tickets/TicketPost",
            form(&[
                ("ticketid", dest_id),
                ("contents", contents),
                ("staffid", self.staff_id.as_str()),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn add_note(&self, dest_id: &str, message: &Message, _ctx: &mut RunContext) -> Result<()> {
        self.post_form(
            "/Tickets/TicketNote",
            form(&[
                ("ticketid", dest_id),
                ("contents", message.body.as_str()),
                ("staffid", self.staff_id.as_str()),
            ]),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RetryConfig;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn connector(server: &MockServer) -> KayakoConnector {
        let base_url = format!("{}/api/index.php", server.uri());
        let creds = ConnectorCredentials::from_pairs(
            ConnectorKind::Kayako,
            [
                ("KAYAKO_DOMAIN", "support.example.com"),
                ("KAYAKO_API_KEY", "key"),
                ("KAYAKO_SECRET_KEY", "secret"),
                ("KAYAKO_BASE_URL", base_url.as_str()),
            ],
        )
        .unwrap();
        KayakoConnector::new(&creds, &DeskportConfig::default())
            .unwrap()
            .with_retry_config(RetryConfig::quick())
    }

    fn xml(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/xml")
    }

    #[tokio::test]
    async fn test_single_ticket_page_is_still_a_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/index.php"))
            .and(query_param("e", "/Tickets/Ticket/ListAll/-1/-1/-1/-1/10/0"))
            .respond_with(xml(
                r#"<tickets><ticket id="7"><subject><![CDATA[Printer & fax]]></subject>
                <statusid>3</statusid><priorityid>4</priorityid><email>ada@example.com</email>
                <ownerstaffname>Grace</ownerstaffname><creationtime>1700000000</creationtime>
                </ticket></tickets>"#,
            ))
            .mount(&server)
            .await;

        let kayako = connector(&server).await;
        let page = kayako
            .ticket_page(&PageRequest {
                start: 0,
                page_size: 10,
                index: 0,
            })
            .await
            .unwrap();

        assert_eq!(page.fetched, 1);
        let ticket = &page.records[0];
        assert_eq!(ticket.id, "ky-7");
        assert_eq!(ticket.subject, "Printer & fax");
        assert_eq!(ticket.status, TicketStatus::Closed);
        assert_eq!(ticket.priority, TicketPriority::Urgent);
        assert_eq!(ticket.requester, "ada@example.com");
        assert_eq!(ticket.assignee.as_deref(), Some("Grace"));
        assert_eq!(ticket.created_at, "2023-11-14T22:13:20Z");
        assert_eq!(ticket.updated_at, ticket.created_at);
    }

    #[tokio::test]
    async fn test_messages_merge_posts_and_notes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("e", "/Tickets/TicketPost/ListAll/7"))
            .respond_with(xml(
                r#"<posts>
                <post><id>1</id><email>ada@example.com</email><contents>Hi</contents><isprivate>0</isprivate><dateline>1700000000</dateline></post>
                <post><id>2</id><fullname>Grace</fullname><contents>&lt;b&gt;internal&lt;/b&gt;</contents><ishtml>1</ishtml><isprivate>1</isprivate><dateline>1700000100</dateline></post>
                </posts>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("e", "/Tickets/TicketNote/ListAll/7"))
            .respond_with(xml(
                r#"<notes><note id="1" creatorstaffname="Grace" creationdate="1700000200">Call back</note></notes>"#,
            ))
            .mount(&server)
            .await;

        let kayako = connector(&server).await;
        let ticket = Ticket {
            id: "ky-7".into(),
            external_id: "7".into(),
            source: "kayako".into(),
            subject: String::new(),
            status: TicketStatus::Open,
            priority: TicketPriority::Normal,
            assignee: None,
            requester: "ada@example.com".into(),
            tags: BTreeSet::new(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        let messages = kayako.ticket_messages(&ticket).await.unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].id, "ky-msg-1");
        assert_eq!(messages[0].message_type, MessageType::Reply);
        assert_eq!(messages[1].message_type, MessageType::Note);
        assert_eq!(messages[1].body, "internal");
        assert_eq!(messages[1].body_html.as_deref(), Some("<b>internal</b>"));
        assert_eq!(messages[2].id, "ky-msg-note-1");
        assert_eq!(messages[2].body, "Call back");
        assert_eq!(messages[2].author, "Grace");
        assert!(messages.iter().all(|m| m.ticket_id == "ky-7"));
    }

    #[tokio::test]
    async fn test_prepare_degrades_to_fallback_tables() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut kayako = connector(&server).await;
        SourceConnector::prepare(&mut kayako).await.unwrap();
        assert_eq!(kayako.statuses.resolve(2), TicketStatus::OnHold);
        assert_eq!(kayako.priorities.resolve(6), TicketPriority::Urgent);
    }

    #[tokio::test]
    async fn test_prepare_uses_fetched_labels() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("e", "/Tickets/TicketStatus"))
            .respond_with(xml(
                r#"<ticketstatuses><ticketstatus><id>9</id><title>Awaiting Customer</title></ticketstatus></ticketstatuses>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("e", "/Tickets/TicketPriority"))
            .respond_with(xml("<ticketpriorities></ticketpriorities>"))
            .mount(&server)
            .await;

        let mut kayako = connector(&server).await;
        SourceConnector::prepare(&mut kayako).await.unwrap();
        assert_eq!(kayako.statuses.resolve(9), TicketStatus::Pending);
        assert_eq!(kayako.status_id(TicketStatus::Pending), 9);
    }

    #[tokio::test]
    async fn test_prepare_propagates_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut kayako = connector(&server).await;
        let err = SourceConnector::prepare(&mut kayako).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_users_and_organizations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("e", "/Base/User/Filter/1/50"))
            .respond_with(xml(
                r#"<users><user><id>3</id><fullname>Ada</fullname><email>ada@example.com</email><email>ada@home.example</email><userorganizationid>5</userorganizationid></user></users>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("e", "/Base/UserOrganization"))
            .respond_with(xml(
                r#"<userorganizations><userorganization><id>5</id><name>Acme</name><website>https://www.acme.example/about</website></userorganization></userorganizations>"#,
            ))
            .mount(&server)
            .await;

        let kayako = connector(&server).await;
        let users = kayako
            .customer_page(&PageRequest {
                start: 1,
                page_size: 50,
                index: 0,
            })
            .await
            .unwrap();
        assert_eq!(users.max_key, Some(3));
        assert_eq!(users.records[0].email.as_deref(), Some("ada@example.com"));
        assert_eq!(users.records[0].org_id.as_deref(), Some("ky-5"));

        let orgs = kayako
            .organization_page(&PageRequest {
                start: 0,
                page_size: 50,
                index: 0,
            })
            .await
            .unwrap();
        assert_eq!(orgs.records[0].domains, vec!["acme.example".to_string()]);
    }

    #[tokio::test]
    async fn test_create_ticket_posts_signed_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("e", "/Tickets/Ticket"))
            .and(body_string_contains("email=ada%40example.com"))
            .and(body_string_contains("ticketstatusid=3"))
            .and(body_string_contains("signature="))
            .respond_with(xml(r#"<tickets><ticket id="88"></ticket></tickets>"#))
            .expect(1)
            .mount(&server)
            .await;

        let kayako = connector(&server).await;
        let ticket = NewTicket {
            source_id: "zd-1".into(),
            subject: "Hello".into(),
            body: "Body".into(),
            body_html: None,
            status: TicketStatus::Solved,
            priority: TicketPriority::High,
            tags: vec!["vip".into()],
            requester: "ada@example.com".into(),
        };
        let mut ctx = RunContext::new();
        assert_eq!(kayako.create_ticket(&ticket, &mut ctx).await.unwrap(), "88");
    }

    #[tokio::test]
    async fn test_create_ticket_without_email_fails_locally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let kayako = connector(&server).await;
        let ticket = NewTicket {
            source_id: "hs-1".into(),
            subject: "Hello".into(),
            body: "Body".into(),
            body_html: None,
            status: TicketStatus::Open,
            priority: TicketPriority::Normal,
            tags: vec![],
            requester: "user:9".into(),
        };
        let mut ctx = RunContext::new();
        assert!(kayako.create_ticket(&ticket, &mut ctx).await.is_err());
    }

    #[test]
    fn test_every_status_and_priority_id_maps() {
        let statuses = IdLookup::new(STATUS_FALLBACK, STATUS_KEYWORDS);
        let priorities = IdLookup::new(PRIORITY_FALLBACK, PRIORITY_KEYWORDS);
        for id in 0..100 {
            assert!(TicketStatus::ALL.contains(&statuses.resolve(id)));
            assert!(TicketPriority::ALL.contains(&priorities.resolve(id)));
        }
    }

    #[test]
    fn test_website_domain() {
        assert_eq!(website_domain("http://Acme.example"), Some("acme.example".into()));
        assert_eq!(website_domain(""), None);
    }
}
