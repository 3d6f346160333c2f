//! HTTP(S) transport with Basic authentication.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, trace};

use super::Transport;
use crate::config::{SessionConfig, TransportKind};
use crate::error::{Result, WinRmError};

/// Content type of SOAP 1.2 requests.
const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";

/// Slack added to the operation timeout for the HTTP client timeout, so the
/// server gets to answer with its own timeout fault first.
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// Plaintext transport posting envelopes to `http(s)://<endpoint>/wsman`.
pub struct HttpTransport {
    client: Client,
    url: String,
    username: String,
    password: String,
    max_body: usize,
}

impl HttpTransport {
    /// Create the transport for a session.
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.operation_timeout + CLIENT_TIMEOUT_SLACK)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| {
                WinRmError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            url: config.endpoint_url(),
            username: config.username.clone(),
            password: config.password.clone(),
            max_body: config.max_envelope_size as usize,
        })
    }

    /// URL requests are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn oversized(&self, length: u64) -> WinRmError {
        WinRmError::Transport(format!(
            "response body of at least {} bytes exceeds the {} byte envelope limit",
            length, self.max_body
        ))
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("max_body", &self.max_body)
            .finish()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Plaintext
    }

    async fn send(&self, envelope: &str) -> Result<String> {
        trace!(url = %self.url, envelope = %envelope, "Sending envelope");

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", SOAP_CONTENT_TYPE)
            .body(envelope.to_string());
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let mut response = request.send().await?;
        let status = response.status();

        // Responses are bounded by the MaxEnvelopeSize we advertise.
        if let Some(length) = response.content_length() {
            if length > self.max_body as u64 {
                return Err(self.oversized(length));
            }
        }
        let mut raw = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if raw.len() + chunk.len() > self.max_body {
                return Err(self.oversized((raw.len() + chunk.len()) as u64));
            }
            raw.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&raw).into_owned();

        trace!(status = %status, body = %body, "Received response");

        match status {
            s if s.is_success() => Ok(body),
            // SOAP 1.2 over HTTP reports faults with 500; the caller classifies them.
            StatusCode::INTERNAL_SERVER_ERROR if !body.trim().is_empty() => Ok(body),
            StatusCode::UNAUTHORIZED => {
                debug!(url = %self.url, username = %self.username, "Credentials rejected");
                Err(WinRmError::Authorization(format!(
                    "the remote rejected the credentials for user {:?}",
                    self.username
                )))
            }
            other => Err(WinRmError::Transport(format!(
                "bad HTTP response returned from server: {} - {}",
                other,
                truncate(&body, 200)
            ))),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
