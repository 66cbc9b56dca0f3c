//! Connector registry
//!
//! The one place that maps a `ConnectorKind` to a concrete adapter. Export
//! and migration only ever see the trait objects returned here.

use super::freshdesk::FreshdeskConnector;
use super::helpscout::HelpScoutConnector;
use super::kayako::KayakoConnector;
use super::zendesk::ZendeskConnector;
use super::{ConnectorKind, SourceConnector, WriteAdapter};
use crate::config::{ConnectorCredentials, DeskportConfig};
use crate::Result;

/// Read side of a connector
pub fn open_source(
    creds: &ConnectorCredentials,
    config: &DeskportConfig,
) -> Result<Box<dyn SourceConnector>> {
    Ok(match creds.kind() {
        ConnectorKind::Zendesk => Box::new(ZendeskConnector::new(creds, config)?),
        ConnectorKind::Freshdesk => Box::new(FreshdeskConnector::new(creds, config)?),
        ConnectorKind::Kayako => Box::new(KayakoConnector::new(creds, config)?),
        ConnectorKind::HelpScout => Box::new(HelpScoutConnector::new(creds, config)?),
    })
}

/// Write side of a connector
pub fn open_writer(
    creds: &ConnectorCredentials,
    config: &DeskportConfig,
) -> Result<Box<dyn WriteAdapter>> {
    Ok(match creds.kind() {
        ConnectorKind::Zendesk => Box::new(ZendeskConnector::new(creds, config)?),
        ConnectorKind::Freshdesk => Box::new(FreshdeskConnector::new(creds, config)?),
        ConnectorKind::Kayako => Box::new(KayakoConnector::new(creds, config)?),
        ConnectorKind::HelpScout => Box::new(HelpScoutConnector::new(creds, config)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(kind: ConnectorKind) -> ConnectorCredentials {
        let pairs: Vec<(&str, &str)> = kind.required_env().iter().map(|n| (*n, "x")).collect();
        ConnectorCredentials::from_pairs(kind, pairs).unwrap()
    }

    #[test]
    fn test_registry_resolves_every_kind() {
        let config = DeskportConfig::default();
        for kind in ConnectorKind::ALL {
            let source = open_source(&creds(kind), &config).unwrap();
            assert_eq!(source.kind(), kind);
            let writer = open_writer(&creds(kind), &config).unwrap();
            assert_eq!(writer.kind(), kind);
        }
    }
}
