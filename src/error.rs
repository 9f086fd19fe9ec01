//! Error types for the CIMC certificate tool.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("Config: {0}")]
    Config(String),

    #[error("Transport: {server}: {source}")]
    Transport {
        server: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Authentication: no login cookie returned by {server} (response attributes: {attributes:?})")]
    Authentication {
        server:     String,
        attributes: BTreeMap<String, String>,
    },

    #[error("Protocol: {0}")]
    Protocol(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl CertError {
    /// Short stable label used in log lines and the JSON report.
    pub fn kind(&self) -> &'static str {
        match self {
            CertError::Config(_)             => "configuration",
            CertError::Transport { .. }      => "transport",
            CertError::Authentication { .. } => "authentication",
            CertError::Protocol(_)
            | CertError::Xml(_)              => "protocol",
            CertError::Io(_)                 => "io",
        }
    }

    pub(crate) fn transport(server: &str, source: reqwest::Error) -> Self {
        CertError::Transport { server: server.to_string(), source }
    }
}

pub type Result<T> = std::result::Result<T, CertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_error_lists_attributes() {
        let mut attributes = BTreeMap::new();
        attributes.insert("errorCode".to_string(), "551".to_string());
        attributes.insert("errorDescr".to_string(), "Authorization required".to_string());
        let err = CertError::Authentication { server: "cimc-01".into(), attributes };
        let text = err.to_string();
        assert!(text.contains("cimc-01"), "{text}");
        assert!(text.contains("errorCode"), "{text}");
        assert_eq!(err.kind(), "authentication");
    }

    #[test]
    fn config_kind() {
        assert_eq!(CertError::Config("bad".into()).kind(), "configuration");
        assert_eq!(CertError::Protocol("bad".into()).kind(), "protocol");
    }
}
