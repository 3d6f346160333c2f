//! WS-Management message layer.
//!
//! Builds request envelopes ([`envelope`]), reads responses back
//! ([`response`]), both on top of a small element tree ([`xml`]). The
//! constants below are protocol values and must match what Windows expects
//! byte for byte.

pub mod envelope;
pub mod response;
pub mod xml;

pub use envelope::{
    Action, CommandOptions, Envelope, EnvelopeBuilder, OptionValue, ShellOptions, SignalCode,
};
pub use response::{Fault, OutputChunk, ResponseMessage, Scope};

// ============================================================================
// Namespaces
// ============================================================================

/// XML Schema.
pub const NS_XSD: &str = "http://www.w3.org/2001/XMLSchema";
/// XML Schema instance.
pub const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
/// SOAP 1.2 envelope.
pub const NS_SOAP_ENV: &str = "http://www.w3.org/2003/05/soap-envelope";
/// WS-Addressing.
pub const NS_ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
/// CIM binding.
pub const NS_CIMBINDING: &str = "http://schemas.dmtf.org/wbem/wsman/1/cimbinding.xsd";
/// WS-Enumeration.
pub const NS_ENUMERATION: &str = "http://schemas.xmlsoap.org/ws/2004/09/enumeration";
/// WS-Transfer.
pub const NS_TRANSFER: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer";
/// WS-Management.
pub const NS_WSMAN: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
/// Microsoft WS-Management extensions.
pub const NS_WSMAN_MS: &str = "http://schemas.microsoft.com/wbem/wsman/1/wsman.xsd";
/// Windows remote shell.
pub const NS_SHELL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
/// WS-Management configuration.
pub const NS_WSMAN_CONFIG: &str = "http://schemas.microsoft.com/wbem/wsman/1/config";

/// Prefix/URI pairs declared on every envelope, in declaration order.
pub const NAMESPACES: [(&str, &str); 11] = [
    ("xsd", NS_XSD),
    ("xsi", NS_XSI),
    ("env", NS_SOAP_ENV),
    ("a", NS_ADDRESSING),
    ("b", NS_CIMBINDING),
    ("n", NS_ENUMERATION),
    ("x", NS_TRANSFER),
    ("w", NS_WSMAN),
    ("p", NS_WSMAN_MS),
    ("rsp", NS_SHELL),
    ("cfg", NS_WSMAN_CONFIG),
];

// ============================================================================
// Addresses, resources and actions
// ============================================================================

/// Anonymous reply-to address.
pub const ADDRESS_ANONYMOUS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

/// Resource URI for cmd.exe shells.
pub const RESOURCE_URI_CMD: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";

/// Create a shell.
pub const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
/// Delete a shell.
pub const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
/// Start a command.
pub const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
/// Receive command output.
pub const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
/// Signal a command.
pub const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";

/// Terminate signal code.
pub const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";
/// Ctrl-C signal code.
pub const SIGNAL_CTRL_C: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/ctrl_c";
/// Ctrl-Break signal code.
pub const SIGNAL_CTRL_BREAK: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/ctrl_break";

// ============================================================================
// Option names
// ============================================================================

/// Skip loading the user profile.
pub const OPTION_NOPROFILE: &str = "WINRS_NOPROFILE";
/// Console codepage.
pub const OPTION_CODEPAGE: &str = "WINRS_CODEPAGE";
/// Console-mode stdin.
pub const OPTION_CONSOLEMODE_STDIN: &str = "WINRS_CONSOLEMODE_STDIN";
/// Run the command without wrapping it in `cmd.exe /c`.
pub const OPTION_SKIP_CMD_SHELL: &str = "WINRS_SKIP_CMD_SHELL";

/// Exit code reported while a command is still running.
pub const EXIT_CODE_PENDING: i32 = -1;
