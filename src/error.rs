//! Error types for wsman-shell.
//!
//! Every protocol operation returns one of the kinds below instead of
//! panicking. Failures raised while a shell is being driven through its
//! lifecycle are wrapped in [`WinRmError::Stage`] so callers can see which
//! transition failed and in what state the shell was left.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::shell::ShellState;

/// Result type alias for wsman-shell operations.
pub type Result<T> = std::result::Result<T, WinRmError>;

/// Lifecycle step that was being attempted when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Create exchange (`Unopened -> Open`).
    OpenShell,
    /// Command exchange (`Open -> CommandRunning`).
    RunCommand,
    /// Receive loop (`CommandRunning -> CommandDone`).
    Receive,
    /// Signal(terminate) exchange.
    CleanupCommand,
    /// Delete exchange (`Open -> Closed`).
    CloseShell,
}

impl Stage {
    /// Stable lowercase name, used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::OpenShell => "open_shell",
            Stage::RunCommand => "run_command",
            Stage::Receive => "receive",
            Stage::CleanupCommand => "cleanup_command",
            Stage::CloseShell => "close_shell",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields extracted from a SOAP fault body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultDetails {
    /// SOAP `Code/Value` (e.g. `s:Receiver`), or the `WSManFault` `Code` attribute.
    pub code: Option<String>,
    /// SOAP `Subcode/Value` (e.g. `w:InvalidSelectors`).
    pub subcode: Option<String>,
    /// Human-readable message (`WSManFault/Message`, else `Reason/Text`).
    pub message: Option<String>,
    /// Text of the `Detail` element, whitespace-normalized.
    pub detail: Option<String>,
}

impl fmt::Display for FaultDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "code={} message={}",
            self.code.as_deref().unwrap_or("unknown"),
            self.message.as_deref().unwrap_or("(none)")
        )?;
        if let Some(subcode) = &self.subcode {
            write!(f, " subcode={}", subcode)?;
        }
        Ok(())
    }
}

/// Errors that can occur while talking WS-Management to a remote host.
#[derive(Error, Debug)]
pub enum WinRmError {
    /// Caller-supplied data violates a contract; nothing was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration rejected before any I/O.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connection or I/O failure reaching the remote.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote rejected the credentials.
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// The remote returned a structured `WSManFault`.
    #[error("WS-Management fault: {0}")]
    WsManFault(FaultDetails),

    /// The remote returned some other SOAP fault.
    #[error("Web service fault: {0}")]
    WebServiceFault(FaultDetails),

    /// `RelatesTo` did not echo the request `MessageID`.
    #[error("Correlation error: expected RelatesTo uuid:{expected}, got {actual:?}")]
    Correlation {
        /// MessageID of the request.
        expected: Uuid,
        /// RelatesTo value found in the response (empty when missing).
        actual: String,
    },

    /// Expected element absent or malformed in an otherwise well-formed response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Client-side deadline exceeded or the operation was cancelled.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The configured transport variant is not implemented.
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// A lifecycle transition failed.
    #[error("{stage} failed (shell state: {state}): {source}")]
    Stage {
        /// Transition being attempted.
        stage: Stage,
        /// Shell state when the failure surfaced.
        state: ShellState,
        /// Underlying cause.
        #[source]
        source: Box<WinRmError>,
    },
}

impl WinRmError {
    /// Attach lifecycle context to an error. Already-staged errors are kept as-is.
    pub fn at_stage(self, stage: Stage, state: ShellState) -> Self {
        match self {
            staged @ WinRmError::Stage { .. } => staged,
            other => WinRmError::Stage {
                stage,
                state,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error kind, looking through stage context.
    pub fn kind(&self) -> &WinRmError {
        match self {
            WinRmError::Stage { source, .. } => source.kind(),
            other => other,
        }
    }

    /// The lifecycle stage this error was raised in, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            WinRmError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether a caller-driven retry of the failed step could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            WinRmError::Transport(_) | WinRmError::Timeout(_)
        )
    }

    /// Fault details when the remote answered with a SOAP fault.
    pub fn fault(&self) -> Option<&FaultDetails> {
        match self.kind() {
            WinRmError::WsManFault(details) | WinRmError::WebServiceFault(details) => {
                Some(details)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for WinRmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WinRmError::Timeout(format!("HTTP request timed out: {}", err))
        } else {
            WinRmError::Transport(format!("HTTP request failed: {}", err))
        }
    }
}
