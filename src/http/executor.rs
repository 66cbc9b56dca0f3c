//! Request executor
//!
//! One connector's HTTP call: auth injection, 429 handling with Retry-After,
//! status classification and format-aware decoding. Each attempt is built
//! from scratch so HMAC signatures are never replayed.

use super::auth::{AuthStrategy, Signature};
use super::retry::{with_retry, RetryConfig};
use crate::config::HttpConfig;
use crate::normalize::{xml_to_value, ArrayFields};
use crate::{DeskportError, Result};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest response body kept in error messages
const ERROR_BODY_LIMIT: usize = 500;

/// Wire format of a connector's responses
#[derive(Debug, Clone, Copy)]
pub enum ResponseFormat {
    Json,
    Xml(ArrayFields),
}

/// Request payload
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// Decoded response
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub status: u16,
    pub body: Value,
    /// Header names lower-cased
    pub headers: HashMap<String, String>,
}

impl ParsedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// HTTP client bound to one connector
pub struct RequestExecutor {
    client: Client,
    connector: &'static str,
    base_url: String,
    auth: AuthStrategy,
    format: ResponseFormat,
    retry: RetryConfig,
    default_retry_after: u64,
}

impl RequestExecutor {
    pub fn new(
        connector: &'static str,
        base_url: impl Into<String>,
        auth: AuthStrategy,
        format: ResponseFormat,
        http: &HttpConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(http.timeout())
            .user_agent(concat!("deskport/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let retry = RetryConfig {
            max_attempts: http.max_attempts.max(1),
            max_backoff: Duration::from_secs(http.max_retry_after_secs),
            ..RetryConfig::for_rate_limited()
        };

        Ok(Self {
            client,
            connector,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            format,
            retry,
            default_retry_after: http.default_retry_after_secs,
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Execute a call; 429s are retried within the attempt budget
    pub async fn execute(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&RequestBody>,
    ) -> Result<ParsedResponse> {
        let operation = format!("{} {} {}", self.connector, method, endpoint);
        let method = &method;
        let result = with_retry(&self.retry, &operation, move || {
            self.attempt(endpoint, method.clone(), body)
        })
        .await;

        match result {
            Err(DeskportError::RateLimited(_)) => Err(DeskportError::RateLimitExceeded {
                endpoint: endpoint.to_string(),
                attempts: self.retry.max_attempts,
            }),
            other => other,
        }
    }

    /// GET and return the decoded body
    pub async fn get(&self, endpoint: &str) -> Result<Value> {
        Ok(self.execute(endpoint, Method::GET, None).await?.body)
    }

    pub async fn post(&self, endpoint: &str, body: RequestBody) -> Result<ParsedResponse> {
        self.execute(endpoint, Method::POST, Some(&body)).await
    }

    pub async fn put(&self, endpoint: &str, body: RequestBody) -> Result<ParsedResponse> {
        self.execute(endpoint, Method::PUT, Some(&body)).await
    }

    /// One attempt. Transport failures on anything but GET are reported as
    /// `UnconfirmedWrite` unless the connection was never established, so
    /// the retry loop cannot resend a request the platform may have applied.
    async fn attempt(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&RequestBody>,
    ) -> Result<ParsedResponse> {
        let replayable = method == Method::GET;
        match self.send_once(endpoint, method, body).await {
            Err(DeskportError::Network(e)) if !replayable && !e.is_connect() => {
                warn!(
                    connector = self.connector,
                    endpoint,
                    error = %e,
                    "Write request got no response, not resending"
                );
                Err(DeskportError::UnconfirmedWrite {
                    endpoint: endpoint.to_string(),
                    source: e,
                })
            }
            other => other,
        }
    }

    async fn send_once(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&RequestBody>,
    ) -> Result<ParsedResponse> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.client.request(method, &url);

        let mut form = match body {
            Some(RequestBody::Form(fields)) => Some(fields.clone()),
            _ => None,
        };

        match self.auth.sign()? {
            Signature::Header { name, value } => request = request.header(name, value),
            Signature::Params(params) => match form.as_mut() {
                Some(fields) => fields.extend(params),
                None => request = request.query(&params),
            },
        }

        request = match (body, form) {
            (_, Some(fields)) => request.form(&fields),
            (Some(RequestBody::Json(json)), None) => request.json(json),
            _ => request,
        };

        debug!(connector = self.connector, url = %url, "Sending request");
        let response = request.send().await?;
        self.handle_response(endpoint, response).await
    }

    async fn handle_response(&self, endpoint: &str, response: Response) -> Result<ParsedResponse> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(self.default_retry_after);
            warn!(connector = self.connector, endpoint, retry_after, "Rate limited");
            return Err(DeskportError::RateLimited(retry_after));
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DeskportError::Auth(format!(
                "{} rejected credentials for {} (HTTP {})",
                self.connector,
                endpoint,
                status.as_u16()
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeskportError::Http {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();

        let text = response.text().await?;
        let body = self.decode(endpoint, &text)?;

        Ok(ParsedResponse {
            status: status.as_u16(),
            body,
            headers,
        })
    }

    fn decode(&self, endpoint: &str, text: &str) -> Result<Value> {
        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        match self.format {
            ResponseFormat::Json => serde_json::from_str(text).map_err(|e| {
                DeskportError::MalformedResponse(format!("{}: invalid JSON: {}", endpoint, e))
            }),
            ResponseFormat::Xml(arrays) => xml_to_value(text, &arrays).map_err(|e| {
                DeskportError::MalformedResponse(format!("{}: {}", endpoint, e))
            }),
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str("...");
    cut
}
