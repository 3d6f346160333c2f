//! Command-line interface for wsman-shell.
//!
//! Flags override values loaded from the optional TOML configuration file.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use humantime_serde::re::humantime;

use wsman_shell::config::{ReceiveMode, SessionConfig, TransportKind};
use wsman_shell::protocol::{CommandOptions, ShellOptions};
use wsman_shell::session::CommandRequest;
use wsman_shell::Result;

/// wsman-shell - run a command on a Windows host over WS-Management
#[derive(Parser, Debug, Clone)]
#[command(name = "wsman-shell")]
#[command(version)]
#[command(about = "Run a command on a Windows host over WS-Management", long_about = None)]
pub struct Cli {
    /// Path to a TOML session configuration
    #[arg(short = 'c', long, env = "WSMAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Remote listener as host:port
    #[arg(short = 'e', long, env = "WSMAN_ENDPOINT")]
    pub endpoint: Option<String>,

    /// User name for Basic authentication
    #[arg(short = 'u', long, env = "WSMAN_USER")]
    pub user: Option<String>,

    /// Password for Basic authentication
    #[arg(short = 'p', long, env = "WSMAN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Transport (plaintext or kerberos)
    #[arg(long, value_parser = parse_transport)]
    pub transport: Option<TransportKind>,

    /// Use HTTPS
    #[arg(long)]
    pub ssl: bool,

    /// Accept invalid TLS certificates
    #[arg(long)]
    pub insecure: bool,

    /// Server-side operation timeout (e.g. 30s)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Give up reading output after this long (e.g. 5m)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub deadline: Option<Duration>,

    /// Read stdout and stderr in a single Receive per iteration
    #[arg(long)]
    pub combined: bool,

    /// Do not load the user profile
    #[arg(long)]
    pub no_profile: bool,

    /// Console codepage
    #[arg(long)]
    pub codepage: Option<u32>,

    /// Initial working directory of the remote shell
    #[arg(short = 'd', long)]
    pub working_directory: Option<String>,

    /// Environment variable for the remote shell (NAME=VALUE)
    #[arg(long = "env", value_parser = parse_env, action = clap::ArgAction::Append)]
    pub env: Vec<(String, String)>,

    /// Run the command without wrapping it in cmd.exe
    #[arg(long)]
    pub skip_cmd_shell: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Command and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// Get the verbosity level
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }

    /// Session configuration from the config file (if any) and the flags.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_file(path)?,
            None => SessionConfig::new(self.endpoint.clone().unwrap_or_default()),
        };

        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(user) = &self.user {
            config.username = user.clone();
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if self.ssl {
            config.use_ssl = true;
        }
        if self.insecure {
            config.verify_ssl = false;
        }
        if let Some(timeout) = self.timeout {
            config.operation_timeout = timeout;
        }
        if let Some(deadline) = self.deadline {
            config.receive_deadline = Some(deadline);
        }
        if self.combined {
            config.receive_mode = ReceiveMode::Combined;
        }
        if self.no_profile {
            config.no_profile = true;
        }
        if let Some(codepage) = self.codepage {
            config.codepage = codepage;
        }

        config.validate()?;
        Ok(config)
    }

    /// The command to run, with shell options derived from `config`.
    pub fn command_request(&self, config: &SessionConfig) -> CommandRequest {
        let (command, arguments) = match self.command.split_first() {
            Some((command, arguments)) => (command.clone(), arguments.to_vec()),
            None => (String::new(), Vec::new()),
        };

        let mut shell = ShellOptions::from_config(config);
        if let Some(dir) = &self.working_directory {
            shell = shell.working_directory(dir.clone());
        }
        for (name, value) in &self.env {
            shell = shell.env(name.clone(), value.clone());
        }

        CommandRequest::new(command, &arguments)
            .with_shell_options(shell)
            .with_command_options(CommandOptions {
                console_mode_stdin: false,
                skip_cmd_shell: self.skip_cmd_shell,
            })
    }
}

fn parse_transport(s: &str) -> std::result::Result<TransportKind, String> {
    TransportKind::parse(s).map_err(|e| e.to_string())
}

fn parse_env(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got {:?}", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_and_flags() {
        let cli = Cli::try_parse_from([
            "wsman-shell",
            "--endpoint",
            "winhost:5986",
            "-u",
            "admin",
            "--ssl",
            "--timeout",
            "30s",
            "-vv",
            "--",
            "ipconfig",
            "/all",
        ])
        .unwrap();

        assert_eq!(cli.verbosity(), 2);
        assert_eq!(cli.command, vec!["ipconfig", "/all"]);

        let config = cli.session_config().unwrap();
        assert_eq!(config.endpoint_url(), "https://winhost:5986/wsman");
        assert_eq!(config.username, "admin");
        assert_eq!(config.operation_timeout, Duration::from_secs(30));

        let request = cli.command_request(&config);
        assert_eq!(request.command, "ipconfig");
        assert_eq!(request.arguments, vec!["/all".to_string()]);
    }

    #[test]
    fn test_env_flag() {
        let cli = Cli::try_parse_from([
            "wsman-shell",
            "-e",
            "winhost:5985",
            "--env",
            "FOO=bar",
            "--env",
            "EMPTY=",
            "set",
        ])
        .unwrap();
        assert_eq!(
            cli.env,
            vec![
                ("FOO".to_string(), "bar".to_string()),
                ("EMPTY".to_string(), String::new())
            ]
        );

        assert!(Cli::try_parse_from(["wsman-shell", "--env", "=x", "set"]).is_err());
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let mut cli = Cli::try_parse_from(["wsman-shell", "hostname"]).unwrap();
        // WSMAN_ENDPOINT / WSMAN_CONFIG may be set in the environment.
        cli.endpoint = None;
        cli.config = None;

        let err = cli.session_config().unwrap_err();
        assert!(matches!(err, wsman_shell::WinRmError::InvalidConfig(_)));
    }

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["wsman-shell", "-e", "winhost:5985"]).is_err());
    }
}
