//! Transport layer: carries one envelope to the remote and brings one back.
//!
//! The shell state machine only sees the [`Transport`] trait, so adding a
//! new authentication scheme never touches protocol code.
//!
//! # Supported Transports
//!
//! - **Plaintext** ([`HttpTransport`]): HTTP(S) POST with Basic credentials
//! - **Kerberos** ([`KerberosTransport`]): declared, not implemented
//! - **Scripted** ([`ScriptedTransport`]): in-memory replies for tests

pub mod http;
pub mod scripted;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{SessionConfig, TransportKind};
use crate::error::{Result, WinRmError};

pub use http::HttpTransport;
pub use scripted::{ScriptedReply, ScriptedTransport};

/// A request/response channel to a WS-Management listener.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Which variant this is.
    fn kind(&self) -> TransportKind;

    /// Send one envelope and return the response document.
    ///
    /// Implementations return the body for successful exchanges and for
    /// SOAP faults, so the caller can classify them. Credential rejections
    /// map to [`WinRmError::Authorization`], everything else that prevents a
    /// response to [`WinRmError::Transport`].
    async fn send(&self, envelope: &str) -> Result<String>;
}

/// Kerberos transport placeholder.
///
/// Exists so configurations naming it resolve to a concrete type; every
/// exchange fails with [`WinRmError::UnsupportedTransport`].
#[derive(Debug, Clone)]
pub struct KerberosTransport {
    endpoint_url: String,
}

impl KerberosTransport {
    /// Create the transport for a session.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            endpoint_url: config.endpoint_url(),
        }
    }
}

#[async_trait]
impl Transport for KerberosTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Kerberos
    }

    async fn send(&self, _envelope: &str) -> Result<String> {
        Err(WinRmError::UnsupportedTransport(format!(
            "Kerberos transport to {} is not supported yet",
            self.endpoint_url
        )))
    }
}

/// Build the transport named by the configuration.
pub fn connect(config: &SessionConfig) -> Result<Arc<dyn Transport>> {
    match config.transport {
        TransportKind::Plaintext => Ok(Arc::new(HttpTransport::new(config)?)),
        TransportKind::Kerberos => Ok(Arc::new(KerberosTransport::new(config))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_selects_variant() {
        let plain = connect(&SessionConfig::new("winhost:5985")).unwrap();
        assert_eq!(plain.kind(), TransportKind::Plaintext);

        let config = SessionConfig::new("winhost:5985").with_transport(TransportKind::Kerberos);
        let kerberos = connect(&config).unwrap();
        assert_eq!(kerberos.kind(), TransportKind::Kerberos);
        assert!(matches!(
            kerberos.send("<x/>").await,
            Err(WinRmError::UnsupportedTransport(_))
        ));
    }
}
