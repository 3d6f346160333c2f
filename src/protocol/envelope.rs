//! Envelope Builder.
//!
//! Produces fully addressed request envelopes for the five shell actions.
//! Every envelope gets a fresh `MessageID`; the caller keeps the returned
//! [`Envelope::message_id`] to check the response's `RelatesTo`.
//!
//! Building only fails on caller contract violations (empty identifiers,
//! duplicate environment variable names, empty command line), reported as
//! [`WinRmError::InvalidRequest`] before anything reaches the wire.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use tracing::trace;
use uuid::Uuid;

use super::xml::Element;
use super::{
    ACTION_COMMAND, ACTION_CREATE, ACTION_DELETE, ACTION_RECEIVE, ACTION_SIGNAL,
    ADDRESS_ANONYMOUS, NAMESPACES, OPTION_CODEPAGE, OPTION_CONSOLEMODE_STDIN, OPTION_NOPROFILE,
    OPTION_SKIP_CMD_SHELL, RESOURCE_URI_CMD, SIGNAL_CTRL_BREAK, SIGNAL_CTRL_C, SIGNAL_TERMINATE,
};
use crate::config::{iso8601_duration, SessionConfig, DEFAULT_CODEPAGE};
use crate::error::{Result, WinRmError};

// ============================================================================
// Actions and options
// ============================================================================

/// Protocol operation carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// `transfer/Create`
    Create,
    /// `transfer/Delete`
    Delete,
    /// `shell/Command`
    Command,
    /// `shell/Receive`
    Receive,
    /// `shell/Signal`
    Signal,
}

impl Action {
    /// The well-known action URI.
    pub fn uri(&self) -> &'static str {
        match self {
            Action::Create => ACTION_CREATE,
            Action::Delete => ACTION_DELETE,
            Action::Command => ACTION_COMMAND,
            Action::Receive => ACTION_RECEIVE,
            Action::Signal => ACTION_SIGNAL,
        }
    }

    /// Look an action up by URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        [
            Action::Create,
            Action::Delete,
            Action::Command,
            Action::Receive,
            Action::Signal,
        ]
        .into_iter()
        .find(|action| action.uri() == uri)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "Create",
            Action::Delete => "Delete",
            Action::Command => "Command",
            Action::Receive => "Receive",
            Action::Signal => "Signal",
        };
        f.write_str(name)
    }
}

/// Value of a `w:Option` header entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
    /// Serialized as `TRUE` / `FALSE`.
    Bool(bool),
    /// Serialized in decimal.
    Int(i64),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(true) => f.write_str("TRUE"),
            OptionValue::Bool(false) => f.write_str("FALSE"),
            OptionValue::Int(n) => write!(f, "{}", n),
        }
    }
}

/// Signal sent to a running command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalCode {
    /// Terminate the command and release its resources.
    #[default]
    Terminate,
    /// Ctrl-C.
    CtrlC,
    /// Ctrl-Break.
    CtrlBreak,
}

impl SignalCode {
    /// The signal code URI.
    pub fn uri(&self) -> &'static str {
        match self {
            SignalCode::Terminate => SIGNAL_TERMINATE,
            SignalCode::CtrlC => SIGNAL_CTRL_C,
            SignalCode::CtrlBreak => SIGNAL_CTRL_BREAK,
        }
    }
}

// ============================================================================
// Shell and command options
// ============================================================================

/// Parameters of a Create exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOptions {
    /// Input stream names (default `stdin`).
    pub input_streams: Vec<String>,
    /// Output stream names (default `stdout stderr`).
    pub output_streams: Vec<String>,
    /// Initial working directory.
    pub working_directory: Option<String>,
    /// Server-side idle timeout.
    pub idle_timeout: Option<Duration>,
    /// Environment variables; names must be unique.
    pub environment: Vec<(String, String)>,
    /// Send `WINRS_NOPROFILE=TRUE`.
    pub no_profile: bool,
    /// Console codepage; `WINRS_CODEPAGE` is only sent when it is not 437.
    pub codepage: u32,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            input_streams: vec!["stdin".to_string()],
            output_streams: vec!["stdout".to_string(), "stderr".to_string()],
            working_directory: None,
            idle_timeout: None,
            environment: Vec::new(),
            no_profile: false,
            codepage: DEFAULT_CODEPAGE,
        }
    }
}

impl ShellOptions {
    /// Defaults with the profile and codepage settings of a session.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            no_profile: config.no_profile,
            codepage: config.codepage,
            ..Default::default()
        }
    }

    /// Set the working directory.
    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((name.into(), value.into()));
        self
    }

    /// Skip loading the user profile.
    pub fn no_profile(mut self, no_profile: bool) -> Self {
        self.no_profile = no_profile;
        self
    }

    /// Set the console codepage.
    pub fn codepage(mut self, codepage: u32) -> Self {
        self.codepage = codepage;
        self
    }
}

/// Flags of a Command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandOptions {
    /// `WINRS_CONSOLEMODE_STDIN`
    pub console_mode_stdin: bool,
    /// `WINRS_SKIP_CMD_SHELL`
    pub skip_cmd_shell: bool,
}

// ============================================================================
// Envelope
// ============================================================================

/// A rendered request ready for the transport.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Operation this envelope performs.
    pub action: Action,
    /// Fresh identifier; the response must relate to it.
    pub message_id: Uuid,
    /// Serialized document.
    pub xml: String,
}

impl Envelope {
    /// The `MessageID` header value (`uuid:<id>`).
    pub fn message_id_header(&self) -> String {
        format!("uuid:{}", self.message_id)
    }
}

/// Builds envelopes from a session's protocol settings.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    endpoint_url: String,
    locale: String,
    max_envelope_size: u32,
    operation_timeout: String,
}

impl EnvelopeBuilder {
    /// Create a builder for one session.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            endpoint_url: config.endpoint_url(),
            locale: config.locale.clone(),
            max_envelope_size: config.max_envelope_size,
            operation_timeout: config.operation_timeout_iso(),
        }
    }

    /// Build the header block for `action` with a freshly generated MessageID.
    pub fn header(
        &self,
        action: Action,
        shell_id: Option<&str>,
        options: &[(&str, OptionValue)],
    ) -> (Uuid, Element) {
        let message_id = Uuid::new_v4();

        let mut header = Element::new("env:Header")
            .child(Element::new("a:To").text(self.endpoint_url.as_str()))
            .child(
                Element::new("a:ReplyTo").child(
                    Element::new("a:Address")
                        .attr("env:mustUnderstand", "true")
                        .text(ADDRESS_ANONYMOUS),
                ),
            )
            .child(
                Element::new("w:MaxEnvelopeSize")
                    .attr("env:mustUnderstand", "true")
                    .text(self.max_envelope_size.to_string()),
            )
            .child(Element::new("a:MessageID").text(format!("uuid:{}", message_id)))
            .child(
                Element::new("w:Locale")
                    .attr("xml:lang", self.locale.as_str())
                    .attr("env:mustUnderstand", "false"),
            )
            .child(
                Element::new("p:DataLocale")
                    .attr("xml:lang", self.locale.as_str())
                    .attr("env:mustUnderstand", "false"),
            )
            .child(Element::new("w:OperationTimeout").text(self.operation_timeout.as_str()))
            .child(
                Element::new("w:ResourceURI")
                    .attr("env:mustUnderstand", "true")
                    .text(RESOURCE_URI_CMD),
            )
            .child(
                Element::new("a:Action")
                    .attr("env:mustUnderstand", "true")
                    .text(action.uri()),
            );

        if let Some(shell_id) = shell_id {
            header.push(
                Element::new("w:SelectorSet").child(
                    Element::new("w:Selector")
                        .attr("Name", "ShellId")
                        .text(shell_id),
                ),
            );
        }

        if !options.is_empty() {
            let mut option_set = Element::new("w:OptionSet");
            for (name, value) in options {
                option_set.push(
                    Element::new("w:Option")
                        .attr("Name", *name)
                        .text(value.to_string()),
                );
            }
            header.push(option_set);
        }

        (message_id, header)
    }

    /// Body of a Create request.
    pub fn create_body(&self, options: &ShellOptions) -> Result<Element> {
        if options.input_streams.is_empty() || options.output_streams.is_empty() {
            return Err(WinRmError::InvalidRequest(
                "shell needs at least one input and one output stream".to_string(),
            ));
        }

        let mut shell = Element::new("rsp:Shell")
            .child(Element::new("rsp:InputStreams").text(options.input_streams.join(" ")))
            .child(Element::new("rsp:OutputStreams").text(options.output_streams.join(" ")));

        if let Some(dir) = &options.working_directory {
            shell.push(Element::new("rsp:WorkingDirectory").text(dir.as_str()));
        }

        if let Some(idle) = options.idle_timeout {
            shell.push(Element::new("rsp:IdleTimeOut").text(iso8601_duration(idle)));
        }

        if !options.environment.is_empty() {
            let mut seen = HashSet::new();
            let mut environment = Element::new("rsp:Environment");
            for (name, value) in &options.environment {
                if name.is_empty() {
                    return Err(WinRmError::InvalidRequest(
                        "environment variable name is empty".to_string(),
                    ));
                }
                if !seen.insert(name.as_str()) {
                    return Err(WinRmError::InvalidRequest(format!(
                        "duplicate environment variable: {}",
                        name
                    )));
                }
                environment.push(
                    Element::new("rsp:Variable")
                        .attr("Name", name.as_str())
                        .text(value.as_str()),
                );
            }
            shell.push(environment);
        }

        Ok(Element::new("env:Body").child(shell))
    }

    /// Body of a Command request. Arguments are space-joined verbatim.
    pub fn command_body(&self, command: &str, arguments: &[impl AsRef<str>]) -> Result<Element> {
        if command.trim().is_empty() {
            return Err(WinRmError::InvalidRequest("command line is empty".to_string()));
        }

        let mut command_line =
            Element::new("rsp:CommandLine").child(Element::new("rsp:Command").text(command));

        if !arguments.is_empty() {
            let joined = arguments
                .iter()
                .map(|arg| arg.as_ref())
                .collect::<Vec<_>>()
                .join(" ");
            command_line.push(Element::new("rsp:Arguments").text(joined));
        }

        Ok(Element::new("env:Body").child(command_line))
    }

    /// Body of a Receive request for the given stream names.
    pub fn receive_body(&self, command_id: &str, streams: &[&str]) -> Result<Element> {
        require_id("CommandId", command_id)?;
        if streams.is_empty() {
            return Err(WinRmError::InvalidRequest(
                "receive needs at least one desired stream".to_string(),
            ));
        }

        Ok(Element::new("env:Body").child(
            Element::new("rsp:Receive").child(
                Element::new("rsp:DesiredStream")
                    .attr("CommandId", command_id)
                    .text(streams.join(" ")),
            ),
        ))
    }

    /// Body of a Signal request.
    pub fn signal_body(&self, command_id: &str, code: SignalCode) -> Result<Element> {
        require_id("CommandId", command_id)?;

        Ok(Element::new("env:Body").child(
            Element::new("rsp:Signal")
                .attr("CommandId", command_id)
                .child(Element::new("rsp:Code").text(code.uri())),
        ))
    }

    /// Body of a Delete request: empty, only the selector matters.
    pub fn delete_body(&self) -> Element {
        Element::new("env:Body")
    }

    /// Create request.
    pub fn create(&self, options: &ShellOptions) -> Result<Envelope> {
        let body = self.create_body(options)?;

        let mut header_options = Vec::new();
        if options.no_profile {
            header_options.push((OPTION_NOPROFILE, OptionValue::Bool(true)));
        }
        if options.codepage != DEFAULT_CODEPAGE {
            header_options.push((OPTION_CODEPAGE, OptionValue::Int(i64::from(options.codepage))));
        }

        let (message_id, header) = self.header(Action::Create, None, &header_options);
        Ok(self.assemble(Action::Create, message_id, header, body))
    }

    /// Command request.
    pub fn command(
        &self,
        shell_id: &str,
        command: &str,
        arguments: &[impl AsRef<str>],
        options: CommandOptions,
    ) -> Result<Envelope> {
        require_id("ShellId", shell_id)?;
        let body = self.command_body(command, arguments)?;
        let header_options = [
            (
                OPTION_CONSOLEMODE_STDIN,
                OptionValue::Bool(options.console_mode_stdin),
            ),
            (OPTION_SKIP_CMD_SHELL, OptionValue::Bool(options.skip_cmd_shell)),
        ];
        let (message_id, header) = self.header(Action::Command, Some(shell_id), &header_options);
        Ok(self.assemble(Action::Command, message_id, header, body))
    }

    /// Receive request.
    pub fn receive(&self, shell_id: &str, command_id: &str, streams: &[&str]) -> Result<Envelope> {
        require_id("ShellId", shell_id)?;
        let body = self.receive_body(command_id, streams)?;
        let (message_id, header) = self.header(Action::Receive, Some(shell_id), &[]);
        Ok(self.assemble(Action::Receive, message_id, header, body))
    }

    /// Signal request.
    pub fn signal(&self, shell_id: &str, command_id: &str, code: SignalCode) -> Result<Envelope> {
        require_id("ShellId", shell_id)?;
        let body = self.signal_body(command_id, code)?;
        let (message_id, header) = self.header(Action::Signal, Some(shell_id), &[]);
        Ok(self.assemble(Action::Signal, message_id, header, body))
    }

    /// Delete request.
    pub fn delete(&self, shell_id: &str) -> Result<Envelope> {
        require_id("ShellId", shell_id)?;
        let (message_id, header) = self.header(Action::Delete, Some(shell_id), &[]);
        Ok(self.assemble(Action::Delete, message_id, header, self.delete_body()))
    }

    fn assemble(&self, action: Action, message_id: Uuid, header: Element, body: Element) -> Envelope {
        let mut envelope = Element::new("env:Envelope");
        for (prefix, uri) in NAMESPACES {
            envelope = envelope.attr(format!("xmlns:{}", prefix), uri);
        }
        let envelope = envelope.child(header).child(body);

        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}",
            envelope.render()
        );
        trace!(%action, %message_id, size = xml.len(), "Built envelope");

        Envelope {
            action,
            message_id,
            xml,
        }
    }
}

fn require_id(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(WinRmError::InvalidRequest(format!("{} is empty", what)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::xml;
    use pretty_assertions::assert_eq;

    fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::new(&SessionConfig::new("winhost:5985"))
    }

    fn parse(envelope: &Envelope) -> Element {
        xml::parse(&envelope.xml).unwrap()
    }

    #[test]
    fn test_header_common_fields() {
        let envelope = builder().create(&ShellOptions::default()).unwrap();
        let root = parse(&envelope);
        let header = root.child_named("Header").unwrap();

        assert_eq!(header.find("To").unwrap().text_content(), "http://winhost:5985/wsman");
        assert_eq!(header.find("Address").unwrap().text_content(), ADDRESS_ANONYMOUS);
        assert_eq!(header.find("MaxEnvelopeSize").unwrap().text_content(), "153600");
        assert_eq!(
            header.find("MessageID").unwrap().text_content(),
            envelope.message_id_header()
        );
        assert_eq!(header.find("Locale").unwrap().attribute("lang"), Some("en-US"));
        assert_eq!(header.find("DataLocale").unwrap().attribute("lang"), Some("en-US"));
        assert_eq!(header.find("OperationTimeout").unwrap().text_content(), "PT60S");
        assert_eq!(header.find("ResourceURI").unwrap().text_content(), RESOURCE_URI_CMD);
        assert_eq!(header.find("Action").unwrap().text_content(), ACTION_CREATE);
        assert!(header.find("SelectorSet").is_none());
    }

    #[test]
    fn test_envelope_declares_all_namespaces() {
        let envelope = builder().delete("S1").unwrap();
        let root = parse(&envelope);
        for (prefix, uri) in NAMESPACES {
            let key = format!("xmlns:{}", prefix);
            let declared = root
                .attributes
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.as_str());
            assert_eq!(declared, Some(uri), "missing declaration for {}", prefix);
        }
    }

    #[test]
    fn test_message_ids_are_fresh() {
        let b = builder();
        let first = b.delete("S1").unwrap();
        let second = b.delete("S1").unwrap();
        assert_ne!(first.message_id, second.message_id);
    }

    #[test]
    fn test_selector_set_carries_shell_id() {
        let envelope = builder().delete("SHELL-42").unwrap();
        let root = parse(&envelope);
        let selector = root.find("Selector").unwrap();
        assert_eq!(selector.attribute("Name"), Some("ShellId"));
        assert_eq!(selector.text_content(), "SHELL-42");
        assert!(root.child_named("Body").unwrap().elements().next().is_none());
    }

    #[test]
    fn test_create_options_only_when_needed() {
        let plain = parse(&builder().create(&ShellOptions::default()).unwrap());
        assert!(plain.find("OptionSet").is_none());

        let options = ShellOptions::default().no_profile(true).codepage(65001);
        let tuned = parse(&builder().create(&options).unwrap());
        let values: Vec<(String, String)> = tuned
            .find_all("Option")
            .iter()
            .map(|o| (o.attribute("Name").unwrap().to_string(), o.text_content()))
            .collect();
        assert_eq!(
            values,
            vec![
                ("WINRS_NOPROFILE".to_string(), "TRUE".to_string()),
                ("WINRS_CODEPAGE".to_string(), "65001".to_string()),
            ]
        );
    }

    #[test]
    fn test_create_body_fields() {
        let options = ShellOptions::default()
            .working_directory("C:\\Temp")
            .idle_timeout(Duration::from_secs(300))
            .env("PATH", "C:\\bin")
            .env("MODE", "test");
        let root = parse(&builder().create(&options).unwrap());
        let shell = root.find("Shell").unwrap();

        assert_eq!(shell.find("InputStreams").unwrap().text_content(), "stdin");
        assert_eq!(shell.find("OutputStreams").unwrap().text_content(), "stdout stderr");
        assert_eq!(shell.find("WorkingDirectory").unwrap().text_content(), "C:\\Temp");
        assert_eq!(shell.find("IdleTimeOut").unwrap().text_content(), "PT300S");

        let vars: Vec<(String, String)> = shell
            .find_all("Variable")
            .iter()
            .map(|v| (v.attribute("Name").unwrap().to_string(), v.text_content()))
            .collect();
        assert_eq!(
            vars,
            vec![
                ("PATH".to_string(), "C:\\bin".to_string()),
                ("MODE".to_string(), "test".to_string()),
            ]
        );
    }

    #[test]
    fn test_duplicate_env_var_rejected() {
        let options = ShellOptions::default().env("PATH", "a").env("PATH", "b");
        let err = builder().create(&options).unwrap_err();
        assert!(matches!(err, WinRmError::InvalidRequest(msg) if msg.contains("PATH")));
    }

    #[test]
    fn test_command_arguments_joined() {
        let envelope = builder()
            .command("S1", "cmd.exe", &["/c", "echo hi"], CommandOptions::default())
            .unwrap();
        let root = parse(&envelope);
        assert_eq!(root.find("Command").unwrap().text_content(), "cmd.exe");
        assert_eq!(root.find("Arguments").unwrap().text_content(), "/c echo hi");
    }

    #[test]
    fn test_command_without_arguments_omits_element() {
        let no_args: [&str; 0] = [];
        let envelope = builder()
            .command("S1", "ipconfig", &no_args, CommandOptions::default())
            .unwrap();
        let root = parse(&envelope);
        assert!(root.find("Arguments").is_none());
    }

    #[test]
    fn test_command_options_serialized_uppercase() {
        let options = CommandOptions {
            console_mode_stdin: true,
            skip_cmd_shell: false,
        };
        let envelope = builder().command("S1", "dir", &["C:\\"], options).unwrap();
        let root = parse(&envelope);
        let options: Vec<(String, String)> = root
            .find_all("Option")
            .iter()
            .map(|o| (o.attribute("Name").unwrap().to_string(), o.text_content()))
            .collect();
        assert_eq!(
            options,
            vec![
                ("WINRS_CONSOLEMODE_STDIN".to_string(), "TRUE".to_string()),
                ("WINRS_SKIP_CMD_SHELL".to_string(), "FALSE".to_string()),
            ]
        );
        assert_eq!(root.find("Selector").unwrap().text_content(), "S1");
    }

    #[test]
    fn test_command_rejects_empty_inputs() {
        let b = builder();
        assert!(matches!(
            b.command("S1", "  ", &["x"], CommandOptions::default()),
            Err(WinRmError::InvalidRequest(_))
        ));
        assert!(matches!(
            b.command("", "dir", &["x"], CommandOptions::default()),
            Err(WinRmError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_receive_body() {
        let envelope = builder().receive("S1", "C1", &["stdout", "stderr"]).unwrap();
        let root = parse(&envelope);
        let desired = root.find("DesiredStream").unwrap();
        assert_eq!(desired.attribute("CommandId"), Some("C1"));
        assert_eq!(desired.text_content(), "stdout stderr");
        assert_eq!(root.find("Action").unwrap().text_content(), ACTION_RECEIVE);
    }

    #[test]
    fn test_signal_body() {
        let envelope = builder().signal("S1", "C1", SignalCode::Terminate).unwrap();
        let root = parse(&envelope);
        let signal = root.find("Signal").unwrap();
        assert_eq!(signal.attribute("CommandId"), Some("C1"));
        assert_eq!(signal.find("Code").unwrap().text_content(), SIGNAL_TERMINATE);
    }

    #[test]
    fn test_config_threaded_into_header() {
        let config = SessionConfig::new("10.1.1.1:5986")
            .with_ssl(true)
            .with_locale("de-DE")
            .with_operation_timeout(Duration::from_secs(20));
        let envelope = EnvelopeBuilder::new(&config).delete("S1").unwrap();
        let root = parse(&envelope);
        assert_eq!(root.find("To").unwrap().text_content(), "https://10.1.1.1:5986/wsman");
        assert_eq!(root.find("Locale").unwrap().attribute("lang"), Some("de-DE"));
        assert_eq!(root.find("OperationTimeout").unwrap().text_content(), "PT20S");
    }

    #[test]
    fn test_action_uri_lookup() {
        assert_eq!(Action::from_uri(ACTION_SIGNAL), Some(Action::Signal));
        assert_eq!(Action::from_uri("urn:nope"), None);
    }
}
