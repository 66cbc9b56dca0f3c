//! Connector credentials
//!
//! Each connector declares a fixed set of required environment variables.
//! Any missing or empty variable is a configuration error raised before the
//! first network call; there is no degraded mode.

use crate::connectors::ConnectorKind;
use crate::{DeskportError, Result};
use std::collections::HashMap;

/// Resolved credentials for one connector
#[derive(Debug, Clone)]
pub struct ConnectorCredentials {
    kind: ConnectorKind,
    values: HashMap<String, String>,
}

impl ConnectorCredentials {
    /// Read the connector's variables from the process environment
    pub fn from_env(kind: ConnectorKind) -> Result<Self> {
        let mut names: Vec<String> = kind
            .required_env()
            .iter()
            .chain(kind.optional_env().iter())
            .map(|n| n.to_string())
            .collect();
        names.push(kind.base_url_env());

        let pairs: Vec<(String, String)> = names
            .into_iter()
            .filter_map(|name| std::env::var(&name).ok().map(|v| (name, v)))
            .collect();

        Self::from_pairs(kind, pairs)
    }

    /// Build credentials from explicit pairs (tests, embedding applications)
    pub fn from_pairs<K, V>(kind: ConnectorKind, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let values: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();

        let missing: Vec<&str> = kind
            .required_env()
            .iter()
            .copied()
            .filter(|name| !values.contains_key(*name))
            .collect();

        if !missing.is_empty() {
            return Err(DeskportError::Config(format!(
                "{} requires environment variable(s): {}",
                kind,
                missing.join(", ")
            )));
        }

        Ok(Self { kind, values })
    }

    pub fn kind(&self) -> ConnectorKind {
        self.kind
    }

    /// A required variable; presence was checked at construction
    pub fn get(&self, name: &str) -> &str {
        self.values.get(name).map(String::as_str).unwrap_or_default()
    }

    pub fn optional(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// `<CONNECTOR>_BASE_URL` override, used against staging hosts and mock servers
    pub fn base_url_override(&self) -> Option<&str> {
        self.values
            .get(&self.kind.base_url_env())
            .map(|s| s.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_variables_are_reported_together() {
        let err = ConnectorCredentials::from_pairs(
            ConnectorKind::Kayako,
            [("KAYAKO_DOMAIN", "support.example.com")],
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(err.is_fatal());
        assert!(msg.contains("KAYAKO_API_KEY"));
        assert!(msg.contains("KAYAKO_SECRET_KEY"));
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let result = ConnectorCredentials::from_pairs(
            ConnectorKind::Freshdesk,
            [("FRESHDESK_DOMAIN", "acme"), ("FRESHDESK_API_KEY", "  ")],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_base_url_override() {
        let creds = ConnectorCredentials::from_pairs(
            ConnectorKind::Freshdesk,
            [
                ("FRESHDESK_DOMAIN", "acme"),
                ("FRESHDESK_API_KEY", "key"),
                ("FRESHDESK_BASE_URL", "http://127.0.0.1:9000/"),
            ],
        )
        .unwrap();
        assert_eq!(creds.get("FRESHDESK_API_KEY"), "key");
        assert_eq!(creds.base_url_override(), Some("http://127.0.0.1:9000"));
        assert_eq!(creds.optional("FRESHDESK_MISSING"), None);
    }
}
