//! Command Facade.
//!
//! [`Session`] holds the configuration and transport for one remote host
//! and runs whole commands: open a shell, start the command, drain its
//! output, terminate it, delete the shell. When a step fails, whatever was
//! already allocated on the remote is released on a best-effort basis and
//! the original error is returned.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::protocol::{CommandOptions, EnvelopeBuilder, ShellOptions};
use crate::shell::{CommandOutput, Shell};
use crate::transport::{self, Transport};

/// Characters of each stream shown by [`Response`]'s `Display`.
const DISPLAY_PREVIEW_CHARS: usize = 20;

/// A connection profile for one remote host.
///
/// Immutable once built. Shells opened through the same session are
/// serialized; use several sessions for parallel commands.
pub struct Session {
    config: Arc<SessionConfig>,
    builder: Arc<EnvelopeBuilder>,
    transport: Arc<dyn Transport>,
    exclusive: Arc<Mutex<()>>,
}

impl Session {
    /// Validate `config` and connect the transport it names.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let transport = transport::connect(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Build a session over an existing transport.
    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let builder = Arc::new(EnvelopeBuilder::new(&config));
        Self {
            config: Arc::new(config),
            builder,
            transport,
            exclusive: Arc::new(Mutex::new(())),
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Transport in use.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// An unopened shell. Waits until no other shell of this session is alive.
    pub async fn shell(&self) -> Shell {
        let guard = self.exclusive.clone().lock_owned().await;
        Shell::new(
            self.transport.clone(),
            self.builder.clone(),
            self.config.receive_mode,
        )
        .with_exclusive(guard)
    }

    /// Run `command` with `arguments` to completion.
    pub async fn run_command(&self, command: &str, arguments: &[impl AsRef<str>]) -> Result<Response> {
        self.run(CommandRequest::new(command, arguments), &CancellationToken::new())
            .await
    }

    /// Run a command to completion, honoring `cancel` and the request deadline.
    #[instrument(skip(self, request, cancel), fields(endpoint = %self.config.endpoint, command = %request.command))]
    pub async fn run(&self, request: CommandRequest, cancel: &CancellationToken) -> Result<Response> {
        let shell_options = request
            .shell
            .clone()
            .unwrap_or_else(|| ShellOptions::from_config(&self.config));
        let deadline = request.deadline.or(self.config.receive_deadline);

        let mut shell = self.shell().await;
        shell.open(&shell_options).await?;

        if let Err(err) = shell
            .run_command(&request.command, &request.arguments, request.options)
            .await
        {
            release(&mut shell).await;
            return Err(err);
        }

        let output = match shell.receive_output(cancel, deadline).await {
            Ok(output) => output,
            Err(err) => {
                release(&mut shell).await;
                return Err(err);
            }
        };

        let terminated = shell.cleanup_command().await;
        if let Err(err) = &terminated {
            warn!(error = %err, "Failed to terminate finished command, deleting shell anyway");
        }
        let closed = shell.close().await;
        terminated?;
        closed?;

        let response = Response::from(output);
        info!(exit_code = response.exit_code, "Command completed");
        Ok(response)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .finish()
    }
}

/// Best-effort release after a failure: terminate the command if one is
/// alive, then delete the shell. Failures are logged only.
async fn release(shell: &mut Shell) {
    if shell.command_id().is_some() {
        if let Err(err) = shell.cleanup_command().await {
            warn!(error = %err, "Best-effort command cleanup failed");
        }
    }
    if shell.shell_id().is_some() {
        if let Err(err) = shell.close().await {
            warn!(error = %err, "Best-effort shell cleanup failed");
        }
    }
    debug!(state = %shell.state(), "Released shell after failure");
}

/// Everything needed to run one command.
#[derive(Debug, Clone, Default)]
pub struct CommandRequest {
    /// Program to run.
    pub command: String,
    /// Arguments, joined with single spaces on the wire.
    pub arguments: Vec<String>,
    /// Shell options; taken from the session configuration when unset.
    pub shell: Option<ShellOptions>,
    /// Command options.
    pub options: CommandOptions,
    /// Receive deadline; falls back to the session's.
    pub deadline: Option<Duration>,
}

impl CommandRequest {
    /// Request for `command` with `arguments`.
    pub fn new(command: impl Into<String>, arguments: &[impl AsRef<str>]) -> Self {
        Self {
            command: command.into(),
            arguments: arguments.iter().map(|a| a.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    /// Use `options` instead of the session's shell defaults.
    pub fn with_shell_options(mut self, options: ShellOptions) -> Self {
        self.shell = Some(options);
        self
    }

    /// Set the command options.
    pub fn with_command_options(mut self, options: CommandOptions) -> Self {
        self.options = options;
        self
    }

    /// Bound the receive loop to `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Result of a completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Decoded stdout, lossily converted to UTF-8.
    pub stdout: String,
    /// Decoded stderr, lossily converted to UTF-8.
    pub stderr: String,
    /// Remote exit code.
    pub exit_code: i32,
}

impl Response {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl From<CommandOutput> for Response {
    fn from(output: CommandOutput) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.exit_code,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Response code {}, out \"{}\", err \"{}\">",
            self.exit_code,
            preview(&self.stdout),
            preview(&self.stderr)
        )
    }
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(DISPLAY_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_display_truncates() {
        let response = Response {
            stdout: "a".repeat(25),
            stderr: String::new(),
            exit_code: 3,
        };
        assert_eq!(
            response.to_string(),
            format!("<Response code 3, out \"{}...\", err \"\">", "a".repeat(20))
        );
    }

    #[test]
    fn test_response_display_short_streams() {
        let response = Response {
            stdout: "hello".to_string(),
            stderr: "warn".to_string(),
            exit_code: 0,
        };
        assert_eq!(
            response.to_string(),
            "<Response code 0, out \"hello\", err \"warn\">"
        );
        assert!(response.success());
    }

    #[test]
    fn test_response_from_invalid_utf8() {
        let response = Response::from(CommandOutput {
            stdout: vec![b'o', b'k', 0xff],
            stderr: Vec::new(),
            exit_code: 1,
            iterations: 1,
        });
        assert_eq!(response.stdout, "ok\u{fffd}");
        assert!(!response.success());
    }

    #[test]
    fn test_command_request_builders() {
        let request = CommandRequest::new("ipconfig", &["/all"])
            .with_deadline(Duration::from_secs(5))
            .with_command_options(CommandOptions {
                console_mode_stdin: false,
                skip_cmd_shell: true,
            });
        assert_eq!(request.command, "ipconfig");
        assert_eq!(request.arguments, vec!["/all".to_string()]);
        assert_eq!(request.deadline, Some(Duration::from_secs(5)));
        assert!(request.options.skip_cmd_shell);
        assert!(request.shell.is_none());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = SessionConfig::new("winhost:5985").with_operation_timeout(Duration::ZERO);
        assert!(Session::new(config).is_err());
    }
}
