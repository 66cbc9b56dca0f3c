//! Per-run migration state handed to write adapters

use std::collections::HashMap;

/// State scoped to one migration invocation.
///
/// Holds the email → remote customer id cache so tickets sharing a requester
/// resolve to one remote customer, and the requester of each created ticket
/// for platforms whose reply calls must name the customer again.
#[derive(Debug, Default)]
pub struct RunContext {
    customers: HashMap<String, String>,
    requesters: HashMap<String, String>,
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_customer(&self, email: &str) -> Option<&str> {
        self.customers.get(&email_key(email)).map(String::as_str)
    }

    pub fn cache_customer(&mut self, email: &str, remote_id: impl Into<String>) {
        self.customers.insert(email_key(email), remote_id.into());
    }

    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }

    pub fn remember_requester(&mut self, dest_id: &str, email: &str) {
        self.requesters.insert(dest_id.to_string(), email.to_string());
    }

    pub fn requester_for(&self, dest_id: &str) -> Option<&str> {
        self.requesters.get(dest_id).map(String::as_str)
    }
}
