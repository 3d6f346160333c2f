//! # wsman-shell - A WS-Management Remote Shell Client
//!
//! wsman-shell runs commands on Windows hosts through the WS-Management
//! remote shell protocol (WinRM). It speaks SOAP 1.2 over HTTP(S) and
//! drives each remote shell through the Create, Command, Receive, Signal
//! and Delete exchanges.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Session (facade)                             │
//! │        run_command: open, execute, drain, terminate, close           │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Shell (state machine)                          │
//! │   Unopened → Open → CommandRunning → CommandDraining → CommandDone   │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                                                   │
//!          ▼                                                   ▼
//! ┌─────────────────────┐                         ┌─────────────────────┐
//! │   Envelope Builder  │                         │  Response Reader    │
//! │ (requests, headers) │                         │ (faults, streams)   │
//! └─────────────────────┘                         └─────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                Transport (HTTP Basic, Kerberos, scripted)            │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use wsman_shell::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SessionConfig::new("winhost:5985").with_credentials("admin", "secret");
//!     let session = Session::new(config)?;
//!
//!     let response = session.run_command("ipconfig", &["/all"]).await?;
//!     println!("{}", response);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::config::{ReceiveMode, SessionConfig, TransportKind};
    pub use crate::error::{FaultDetails, Result, Stage, WinRmError};
    pub use crate::protocol::{CommandOptions, ShellOptions, SignalCode};
    pub use crate::session::{CommandRequest, Response, Session};
    pub use crate::shell::{CommandOutput, Shell, ShellState};
    pub use crate::transport::{HttpTransport, ScriptedTransport, Transport};
    pub use tokio_util::sync::CancellationToken;
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error kinds and the crate-wide result alias.
pub mod error;

/// Session configuration, loadable from TOML.
pub mod config;

// ============================================================================
// Protocol
// ============================================================================

/// Envelope construction and response parsing.
///
/// Namespace, action and option URIs are protocol constants; element lookup
/// ignores prefixes.
pub mod protocol;

/// Request/response channels to the remote listener.
pub mod transport;

// ============================================================================
// Execution
// ============================================================================

/// Shell lifecycle state machine.
pub mod shell;

/// Whole-command facade with best-effort cleanup.
pub mod session;

pub use config::SessionConfig;
pub use error::{Result, WinRmError};
pub use session::{Response, Session};

/// Returns the current version of wsman-shell.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
