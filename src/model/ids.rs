//! Canonical id conventions
//!
//! `<prefix>-<externalId>` for entities and `<prefix>-msg-<externalId>` for
//! messages. The prefix is unique per source platform and is the only
//! cross-system collision guard, so two exports can share a directory.

/// Canonical id for a ticket, customer, organization, article or rule
pub fn canonical_id(prefix: &str, external_id: &str) -> String {
    format!("{}-{}", prefix, external_id)
}

/// Canonical id for a message
pub fn message_id(prefix: &str, external_id: &str) -> String {
    format!("{}-msg-{}", prefix, external_id)
}
