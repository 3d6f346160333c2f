//! Session configuration.
//!
//! Protocol defaults (locale, envelope size, operation timeout, codepage)
//! live on [`SessionConfig`] and are threaded into the envelope builder,
//! so two sessions with different settings never interfere.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WinRmError};

/// Default operation timeout sent in every request header.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum envelope size in bytes.
pub const DEFAULT_MAX_ENVELOPE_SIZE: u32 = 153_600;

/// Default locale for `Locale` and `DataLocale`.
pub const DEFAULT_LOCALE: &str = "en-US";

/// Console codepage the server assumes when none is requested.
pub const DEFAULT_CODEPAGE: u32 = 437;

/// Default URL path of the WS-Management listener.
pub const DEFAULT_PATH: &str = "wsman";

/// Transport used to carry envelopes to the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// HTTP(S) with Basic credentials.
    #[default]
    Plaintext,
    /// Kerberos (not implemented).
    Kerberos,
}

impl TransportKind {
    /// Parse a transport name, case-insensitively.
    pub fn parse(name: &str) -> Result<Self> {
        if name.eq_ignore_ascii_case("plaintext") {
            Ok(TransportKind::Plaintext)
        } else if name.eq_ignore_ascii_case("kerberos") {
            Ok(TransportKind::Kerberos)
        } else {
            Err(WinRmError::InvalidConfig(format!(
                "Invalid transport type: {}",
                name
            )))
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Plaintext => f.write_str("plaintext"),
            TransportKind::Kerberos => f.write_str("kerberos"),
        }
    }
}

/// How the receive loop asks for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveMode {
    /// One Receive exchange per stream (stdout, stderr, exitcode) per iteration.
    #[default]
    PerStream,
    /// A single Receive exchange requesting `stdout stderr` per iteration.
    Combined,
}

/// Configuration for one remote target.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Remote endpoint as `host:port`.
    pub endpoint: String,

    /// Use HTTPS instead of HTTP.
    #[serde(default)]
    pub use_ssl: bool,

    /// URL path of the listener.
    #[serde(default = "default_path")]
    pub path: String,

    /// Transport variant.
    #[serde(default)]
    pub transport: TransportKind,

    /// User name for Basic authentication.
    #[serde(default)]
    pub username: String,

    /// Password for Basic authentication.
    #[serde(default)]
    pub password: String,

    /// Locale sent as `Locale` and `DataLocale`.
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Maximum envelope size advertised to the server.
    #[serde(default = "default_max_envelope_size")]
    pub max_envelope_size: u32,

    /// Server-side operation timeout.
    #[serde(default = "default_operation_timeout")]
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Console codepage; only sent when it differs from 437.
    #[serde(default = "default_codepage")]
    pub codepage: u32,

    /// Ask the server not to load the user profile.
    #[serde(default)]
    pub no_profile: bool,

    /// Receive strategy.
    #[serde(default)]
    pub receive_mode: ReceiveMode,

    /// Client-side bound on the receive loop.
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub receive_deadline: Option<Duration>,

    /// Verify TLS certificates.
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

fn default_locale() -> String {
    DEFAULT_LOCALE.to_string()
}

fn default_max_envelope_size() -> u32 {
    DEFAULT_MAX_ENVELOPE_SIZE
}

fn default_operation_timeout() -> Duration {
    DEFAULT_OPERATION_TIMEOUT
}

fn default_codepage() -> u32 {
    DEFAULT_CODEPAGE
}

fn default_true() -> bool {
    true
}

impl SessionConfig {
    /// Create a configuration for `host:port` with protocol defaults.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            use_ssl: false,
            path: default_path(),
            transport: TransportKind::default(),
            username: String::new(),
            password: String::new(),
            locale: default_locale(),
            max_envelope_size: DEFAULT_MAX_ENVELOPE_SIZE,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            codepage: DEFAULT_CODEPAGE,
            no_profile: false,
            receive_mode: ReceiveMode::default(),
            receive_deadline: None,
            verify_ssl: true,
        }
    }

    /// Set Basic credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the transport variant.
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Enable or disable HTTPS.
    pub fn with_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    /// Set the locale.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Set the server-side operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the receive strategy.
    pub fn with_receive_mode(mut self, mode: ReceiveMode) -> Self {
        self.receive_mode = mode;
        self
    }

    /// Bound the receive loop on the client side.
    pub fn with_receive_deadline(mut self, deadline: Duration) -> Self {
        self.receive_deadline = Some(deadline);
        self
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            WinRmError::InvalidConfig(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| WinRmError::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the server would reject.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(WinRmError::InvalidConfig("endpoint is empty".to_string()));
        }
        url::Url::parse(&self.endpoint_url()).map_err(|e| {
            WinRmError::InvalidConfig(format!("Invalid endpoint {:?}: {}", self.endpoint, e))
        })?;
        if self.operation_timeout.is_zero() {
            return Err(WinRmError::InvalidConfig(
                "operation_timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_envelope_size == 0 {
            return Err(WinRmError::InvalidConfig(
                "max_envelope_size must be greater than zero".to_string(),
            ));
        }
        if self.locale.trim().is_empty() {
            return Err(WinRmError::InvalidConfig("locale is empty".to_string()));
        }
        Ok(())
    }

    /// Full URL of the listener, e.g. `http://host:5985/wsman`.
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!(
            "{}://{}/{}",
            scheme,
            self.endpoint,
            self.path.trim_start_matches('/')
        )
    }

    /// Operation timeout as an ISO-8601 duration (`PT60S`).
    pub fn operation_timeout_iso(&self) -> String {
        iso8601_duration(self.operation_timeout)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("endpoint", &self.endpoint)
            .field("use_ssl", &self.use_ssl)
            .field("path", &self.path)
            .field("transport", &self.transport)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("locale", &self.locale)
            .field("max_envelope_size", &self.max_envelope_size)
            .field("operation_timeout", &self.operation_timeout)
            .field("codepage", &self.codepage)
            .field("no_profile", &self.no_profile)
            .field("receive_mode", &self.receive_mode)
            .field("receive_deadline", &self.receive_deadline)
            .field("verify_ssl", &self.verify_ssl)
            .finish()
    }
}

/// Render a duration as an ISO-8601 `PT..S` value.
pub(crate) fn iso8601_duration(duration: Duration) -> String {
    let millis = duration.subsec_millis();
    if millis == 0 {
        format!("PT{}S", duration.as_secs())
    } else {
        format!("PT{}.{:03}S", duration.as_secs(), millis)
    }
}
