//! Shared test utilities and fixtures for the wsman-shell test suite.
//!
//! This module provides:
//! - Response document builders for every shell action
//! - SOAP fault documents
//! - A session constructor over a [`ScriptedTransport`]
//!
//! Documents carry the `{relates_to}` placeholder, which the scripted
//! transport replaces with the request's `MessageID`.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use base64::prelude::*;

use wsman_shell::config::{ReceiveMode, SessionConfig};
use wsman_shell::transport::ScriptedTransport;
use wsman_shell::Session;

pub const NS_SOAP: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const NS_ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
pub const NS_SHELL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
pub const COMMAND_STATE_DONE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done";
pub const COMMAND_STATE_RUNNING: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Running";

// ============================================================================
// Sessions
// ============================================================================

/// Session over `transport` with default settings.
pub fn scripted_session(transport: Arc<ScriptedTransport>) -> Session {
    scripted_session_with(transport, ReceiveMode::PerStream)
}

/// Session over `transport` using `mode` for the receive loop.
pub fn scripted_session_with(transport: Arc<ScriptedTransport>, mode: ReceiveMode) -> Session {
    let config = SessionConfig::new("winhost:5985")
        .with_credentials("admin", "s3cret")
        .with_receive_mode(mode);
    Session::with_transport(config, transport)
}

// ============================================================================
// Response documents
// ============================================================================

/// Envelope with a correlated header and `body`.
pub fn envelope(body: &str) -> String {
    envelope_relating_to("{relates_to}", body)
}

/// Envelope whose `RelatesTo` is `relates_to`.
pub fn envelope_relating_to(relates_to: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="{soap}" xmlns:a="{addr}" xmlns:rsp="{shell}">
  <s:Header>
    <a:Action>http://schemas.xmlsoap.org/ws/2004/09/transfer/CreateResponse</a:Action>
    <a:MessageID>uuid:6b9b1a4e-5d9f-4b8e-9d9a-2f6f0f0e1d11</a:MessageID>
    <a:To>http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:To>
    <a:RelatesTo>{relates_to}</a:RelatesTo>
  </s:Header>
  <s:Body>{body}</s:Body>
</s:Envelope>"#,
        soap = NS_SOAP,
        addr = NS_ADDRESSING,
        shell = NS_SHELL,
        relates_to = relates_to,
        body = body
    )
}

/// Envelope without any `RelatesTo` header.
pub fn uncorrelated_envelope(body: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="{soap}" xmlns:rsp="{shell}"><s:Header/><s:Body>{body}</s:Body></s:Envelope>"#,
        soap = NS_SOAP,
        shell = NS_SHELL,
        body = body
    )
}

/// Create response carrying `shell_id`.
pub fn create_response(shell_id: &str) -> String {
    envelope(&format!(
        r#"<rsp:Shell><rsp:ShellId>{}</rsp:ShellId><rsp:InputStreams>stdin</rsp:InputStreams><rsp:OutputStreams>stdout stderr</rsp:OutputStreams></rsp:Shell>"#,
        shell_id
    ))
}

/// Command response carrying `command_id`.
pub fn command_response(command_id: &str) -> String {
    envelope(&format!(
        r#"<rsp:CommandResponse><rsp:CommandId>{}</rsp:CommandId></rsp:CommandResponse>"#,
        command_id
    ))
}

/// Receive response with `streams` (name, raw bytes) and an optional exit code.
///
/// `None` reports the command as still running.
pub fn receive_response(command_id: &str, streams: &[(&str, &[u8])], exit_code: Option<i32>) -> String {
    let mut body = String::from("<rsp:ReceiveResponse>");
    for (name, data) in streams {
        body.push_str(&format!(
            r#"<rsp:Stream Name="{}" CommandId="{}">{}</rsp:Stream>"#,
            name,
            command_id,
            BASE64_STANDARD.encode(data)
        ));
    }
    match exit_code {
        Some(code) => body.push_str(&format!(
            r#"<rsp:CommandState CommandId="{}" State="{}"><rsp:ExitCode>{}</rsp:ExitCode></rsp:CommandState>"#,
            command_id, COMMAND_STATE_DONE, code
        )),
        None => body.push_str(&format!(
            r#"<rsp:CommandState CommandId="{}" State="{}"/>"#,
            command_id, COMMAND_STATE_RUNNING
        )),
    }
    body.push_str("</rsp:ReceiveResponse>");
    envelope(&body)
}

/// Empty-bodied response, as returned for Signal and Delete.
pub fn empty_response() -> String {
    envelope("")
}

/// Signal response.
pub fn signal_response() -> String {
    envelope("<rsp:SignalResponse/>")
}

/// Response relating to a message nobody sent.
pub fn mismatched_response() -> String {
    envelope_relating_to("uuid:00000000-0000-0000-0000-000000000000", "")
}

/// WS-Management fault with `code` and `message`.
pub fn wsman_fault(code: &str, message: &str) -> String {
    envelope(&format!(
        r#"<s:Fault>
  <s:Code><s:Value>s:Sender</s:Value><s:Subcode><s:Value>w:InvalidParameter</s:Value></s:Subcode></s:Code>
  <s:Reason><s:Text xml:lang="en-US">The WS-Management service cannot process the request.</s:Text></s:Reason>
  <s:Detail>
    <f:WSManFault xmlns:f="http://schemas.microsoft.com/wbem/wsman/1/wsmanfault" Code="{}" Machine="winhost">
      <f:Message>{}</f:Message>
    </f:WSManFault>
  </s:Detail>
</s:Fault>"#,
        code, message
    ))
}

/// Plain SOAP fault without WS-Management detail.
pub fn web_service_fault(reason: &str) -> String {
    envelope(&format!(
        r#"<s:Fault><s:Code><s:Value>s:Receiver</s:Value></s:Code><s:Reason><s:Text xml:lang="en-US">{}</s:Text></s:Reason></s:Fault>"#,
        reason
    ))
}
