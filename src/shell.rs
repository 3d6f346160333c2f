//! Shell Session State Machine.
//!
//! A [`Shell`] walks one remote shell through
//! `Unopened -> Open -> CommandRunning -> CommandDraining -> CommandDone -> Open -> Closed`.
//! Every exchange uses a fresh `MessageID`. Nothing is retried here: a
//! failure comes back wrapped in [`WinRmError::Stage`] and marks the shell
//! poisoned, after which only cleanup (Signal, Delete) is accepted.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::ReceiveMode;
use crate::error::{Result, Stage, WinRmError};
use crate::protocol::{
    CommandOptions, Envelope, EnvelopeBuilder, OutputChunk, ResponseMessage, Scope, ShellOptions,
    SignalCode,
};
use crate::transport::Transport;

/// Lifecycle state of a remote shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellState {
    /// No Create exchange yet.
    Unopened,
    /// Shell exists, no command in flight.
    Open,
    /// Command started, no output read yet.
    CommandRunning,
    /// Receive loop in progress.
    CommandDraining,
    /// Exit code received; the command still needs a terminate signal.
    CommandDone,
    /// Shell deleted.
    Closed,
}

impl fmt::Display for ShellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShellState::Unopened => "unopened",
            ShellState::Open => "open",
            ShellState::CommandRunning => "command_running",
            ShellState::CommandDraining => "command_draining",
            ShellState::CommandDone => "command_done",
            ShellState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Everything a command wrote, plus its exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Concatenated stdout bytes.
    pub stdout: Vec<u8>,
    /// Concatenated stderr bytes.
    pub stderr: Vec<u8>,
    /// Exit code reported by the remote.
    pub exit_code: i32,
    /// Receive loop iterations it took.
    pub iterations: usize,
}

/// Output of one receive loop iteration.
struct ReceiveRound {
    chunks: Vec<OutputChunk>,
    exit_code: Option<i32>,
}

/// One remote shell and at most one command inside it.
pub struct Shell {
    transport: Arc<dyn Transport>,
    builder: Arc<EnvelopeBuilder>,
    receive_mode: ReceiveMode,
    state: ShellState,
    poisoned: bool,
    shell_id: Option<String>,
    command_id: Option<String>,
    _exclusive: Option<OwnedMutexGuard<()>>,
}

impl Shell {
    /// Create an unopened shell driving `transport`.
    pub fn new(
        transport: Arc<dyn Transport>,
        builder: Arc<EnvelopeBuilder>,
        receive_mode: ReceiveMode,
    ) -> Self {
        Self {
            transport,
            builder,
            receive_mode,
            state: ShellState::Unopened,
            poisoned: false,
            shell_id: None,
            command_id: None,
            _exclusive: None,
        }
    }

    /// Hold `guard` for the lifetime of the shell.
    pub(crate) fn with_exclusive(mut self, guard: OwnedMutexGuard<()>) -> Self {
        self._exclusive = Some(guard);
        self
    }

    /// Current state.
    pub fn state(&self) -> ShellState {
        self.state
    }

    /// Whether an earlier failure has ruled out further non-cleanup operations.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Server-issued shell id, once open.
    pub fn shell_id(&self) -> Option<&str> {
        self.shell_id.as_deref()
    }

    /// Server-issued command id, while a command is alive.
    pub fn command_id(&self) -> Option<&str> {
        self.command_id.as_deref()
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// `Unopened -> Open`: send Create and record the ShellId.
    pub async fn open(&mut self, options: &ShellOptions) -> Result<String> {
        self.check(Stage::OpenShell, &[ShellState::Unopened], false)?;

        match self.create_exchange(options).await {
            Ok(shell_id) => {
                debug!(shell_id = %shell_id, "Opened shell");
                self.shell_id = Some(shell_id.clone());
                self.state = ShellState::Open;
                Ok(shell_id)
            }
            Err(err) => Err(self.fail(err, Stage::OpenShell)),
        }
    }

    /// `Open -> CommandRunning`: send Command and record the CommandId.
    pub async fn run_command(
        &mut self,
        command: &str,
        arguments: &[impl AsRef<str>],
        options: CommandOptions,
    ) -> Result<String> {
        self.check(Stage::RunCommand, &[ShellState::Open], false)?;

        match self.command_exchange(command, arguments, options).await {
            Ok(command_id) => {
                debug!(
                    shell_id = ?self.shell_id,
                    command_id = %command_id,
                    command = %command,
                    "Started command"
                );
                self.command_id = Some(command_id.clone());
                self.state = ShellState::CommandRunning;
                Ok(command_id)
            }
            Err(err) => Err(self.fail(err, Stage::RunCommand)),
        }
    }

    /// `CommandRunning -> CommandDone`: poll until the remote reports an exit code.
    ///
    /// Returns [`WinRmError::Timeout`] as soon as `cancel` fires or
    /// `deadline` (measured from this call) elapses.
    pub async fn receive_output(
        &mut self,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<CommandOutput> {
        self.check(
            Stage::Receive,
            &[ShellState::CommandRunning, ShellState::CommandDraining],
            false,
        )?;
        self.state = ShellState::CommandDraining;

        let deadline_at = deadline.map(|d| Instant::now() + d);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut iterations = 0usize;

        loop {
            iterations += 1;
            let round = match self.receive_round(cancel, deadline_at, deadline).await {
                Ok(round) => round,
                Err(err) => return Err(self.fail(err, Stage::Receive)),
            };

            for chunk in round.chunks {
                match chunk.stream.as_str() {
                    "stdout" => stdout.extend_from_slice(&chunk.data),
                    "stderr" => stderr.extend_from_slice(&chunk.data),
                    _ => {}
                }
            }

            trace!(
                iteration = iterations,
                stdout_len = stdout.len(),
                stderr_len = stderr.len(),
                exit_code = ?round.exit_code,
                "Receive iteration"
            );

            if let Some(exit_code) = round.exit_code {
                debug!(
                    command_id = ?self.command_id,
                    exit_code,
                    iterations,
                    "Command finished"
                );
                self.state = ShellState::CommandDone;
                return Ok(CommandOutput {
                    stdout,
                    stderr,
                    exit_code,
                    iterations,
                });
            }
        }
    }

    /// Send Signal(terminate) for the current command; the shell goes back to `Open`.
    ///
    /// Accepted on a poisoned shell so callers can release what they hold.
    pub async fn cleanup_command(&mut self) -> Result<()> {
        self.check(
            Stage::CleanupCommand,
            &[
                ShellState::CommandRunning,
                ShellState::CommandDraining,
                ShellState::CommandDone,
            ],
            true,
        )?;

        match self.signal_exchange(SignalCode::Terminate).await {
            Ok(()) => {
                debug!(command_id = ?self.command_id, "Terminated command");
                self.command_id = None;
                self.state = ShellState::Open;
                Ok(())
            }
            Err(err) => Err(self.fail(err, Stage::CleanupCommand)),
        }
    }

    /// Send Delete for the shell. Any command still alive goes with it.
    ///
    /// Accepted on a poisoned shell so callers can release what they hold.
    pub async fn close(&mut self) -> Result<()> {
        self.check(
            Stage::CloseShell,
            &[
                ShellState::Open,
                ShellState::CommandRunning,
                ShellState::CommandDraining,
                ShellState::CommandDone,
            ],
            true,
        )?;

        match self.delete_exchange().await {
            Ok(()) => {
                debug!(shell_id = ?self.shell_id, "Closed shell");
                self.shell_id = None;
                self.command_id = None;
                self.state = ShellState::Closed;
                Ok(())
            }
            Err(err) => Err(self.fail(err, Stage::CloseShell)),
        }
    }

    // ------------------------------------------------------------------------
    // Exchanges
    // ------------------------------------------------------------------------

    async fn create_exchange(&self, options: &ShellOptions) -> Result<String> {
        let envelope = self.builder.create(options)?;
        let response = self.exchange(envelope, false).await?;
        response.require_text(Scope::Body, "ShellId")
    }

    async fn command_exchange(
        &self,
        command: &str,
        arguments: &[impl AsRef<str>],
        options: CommandOptions,
    ) -> Result<String> {
        let envelope = self
            .builder
            .command(self.require_shell_id()?, command, arguments, options)?;
        let response = self.exchange(envelope, false).await?;
        response.require_text(Scope::Body, "CommandId")
    }

    async fn signal_exchange(&self, code: SignalCode) -> Result<()> {
        let envelope =
            self.builder
                .signal(self.require_shell_id()?, self.require_command_id()?, code)?;
        self.exchange(envelope, true).await.map(|_| ())
    }

    async fn delete_exchange(&self) -> Result<()> {
        let envelope = self.builder.delete(self.require_shell_id()?)?;
        self.exchange(envelope, true).await.map(|_| ())
    }

    async fn receive_round(
        &self,
        cancel: &CancellationToken,
        deadline_at: Option<Instant>,
        deadline: Option<Duration>,
    ) -> Result<ReceiveRound> {
        match self.receive_mode {
            ReceiveMode::PerStream => {
                let mut chunks = Vec::new();
                for stream in ["stdout", "stderr"] {
                    let mut received = self
                        .receive_once(&[stream], cancel, deadline_at, deadline)
                        .await?;
                    chunks.append(&mut received);
                }
                let status = self
                    .receive_once(&["exitcode"], cancel, deadline_at, deadline)
                    .await?;
                let exit_code = status.first().and_then(|chunk| chunk.exit_code);
                Ok(ReceiveRound { chunks, exit_code })
            }
            ReceiveMode::Combined => {
                let chunks = self
                    .receive_once(&["stdout", "stderr"], cancel, deadline_at, deadline)
                    .await?;
                let exit_code = chunks.first().and_then(|chunk| chunk.exit_code);
                Ok(ReceiveRound { chunks, exit_code })
            }
        }
    }

    async fn receive_once(
        &self,
        streams: &[&str],
        cancel: &CancellationToken,
        deadline_at: Option<Instant>,
        deadline: Option<Duration>,
    ) -> Result<Vec<OutputChunk>> {
        let envelope =
            self.builder
                .receive(self.require_shell_id()?, self.require_command_id()?, streams)?;
        let response = bounded(self.exchange(envelope, false), cancel, deadline_at, deadline).await?;
        response.output_chunks(streams)
    }

    /// Send one envelope, classify faults, check correlation.
    async fn exchange(&self, envelope: Envelope, require_correlation: bool) -> Result<ResponseMessage> {
        trace!(action = %envelope.action, message_id = %envelope.message_id, "Exchange");

        let raw = self.transport.send(&envelope.xml).await?;
        let response = ResponseMessage::parse(&raw)?;

        if let Some(fault) = response.classify_fault().into_error() {
            return Err(fault);
        }

        if require_correlation {
            response.check_correlation(envelope.message_id)?;
        } else {
            response.check_correlation_if_present(envelope.message_id)?;
        }

        Ok(response)
    }

    // ------------------------------------------------------------------------
    // Guards
    // ------------------------------------------------------------------------

    fn check(&self, stage: Stage, allowed: &[ShellState], cleanup: bool) -> Result<()> {
        if self.poisoned && !cleanup {
            return Err(WinRmError::InvalidRequest(
                "shell is unusable after an earlier failure".to_string(),
            )
            .at_stage(stage, self.state));
        }
        if !allowed.contains(&self.state) {
            return Err(WinRmError::InvalidRequest(format!(
                "cannot {} while the shell is {}",
                stage, self.state
            ))
            .at_stage(stage, self.state));
        }
        Ok(())
    }

    fn fail(&mut self, err: WinRmError, stage: Stage) -> WinRmError {
        if !matches!(err.kind(), WinRmError::InvalidRequest(_)) {
            self.poisoned = true;
        }
        debug!(stage = %stage, state = %self.state, error = %err, "Shell operation failed");
        err.at_stage(stage, self.state)
    }

    fn require_shell_id(&self) -> Result<&str> {
        self.shell_id
            .as_deref()
            .ok_or_else(|| WinRmError::InvalidRequest("shell is not open".to_string()))
    }

    fn require_command_id(&self) -> Result<&str> {
        self.command_id
            .as_deref()
            .ok_or_else(|| WinRmError::InvalidRequest("no command is running".to_string()))
    }
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shell")
            .field("state", &self.state)
            .field("poisoned", &self.poisoned)
            .field("shell_id", &self.shell_id)
            .field("command_id", &self.command_id)
            .field("receive_mode", &self.receive_mode)
            .finish()
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        if let Some(shell_id) = &self.shell_id {
            warn!(shell_id = %shell_id, state = %self.state, "Shell dropped without being closed");
        }
    }
}

/// Run `future` unless `cancel` fires or `deadline_at` passes first.
async fn bounded<T>(
    future: impl Future<Output = Result<T>>,
    cancel: &CancellationToken,
    deadline_at: Option<Instant>,
    deadline: Option<Duration>,
) -> Result<T> {
    let expired = async {
        match deadline_at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WinRmError::Timeout("receive loop cancelled".to_string())),
        _ = expired => Err(WinRmError::Timeout(format!(
            "receive loop exceeded its deadline of {:?}",
            deadline.unwrap_or_default()
        ))),
        result = future => result,
    }
}
