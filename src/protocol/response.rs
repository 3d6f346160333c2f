//! Response Extractor and Correlation Checker.
//!
//! Values are looked up by local name in either the header or the body,
//! whatever prefix the server bound to the namespace.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use uuid::Uuid;

use super::xml::{self, Element};
use super::EXIT_CODE_PENDING;
use crate::error::{FaultDetails, Result, WinRmError};

/// Part of the envelope a lookup is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// `Envelope/Header`
    Header,
    /// `Envelope/Body`
    Body,
}

impl Scope {
    fn local_name(&self) -> &'static str {
        match self {
            Scope::Header => "Header",
            Scope::Body => "Body",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.local_name())
    }
}

/// Fault classification of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Not a fault.
    None,
    /// SOAP fault carrying a `WSManFault` payload.
    WsMan(FaultDetails),
    /// Any other SOAP fault.
    WebService(FaultDetails),
}

impl Fault {
    /// Convert into the matching error, if this is a fault.
    pub fn into_error(self) -> Option<WinRmError> {
        match self {
            Fault::None => None,
            Fault::WsMan(details) => Some(WinRmError::WsManFault(details)),
            Fault::WebService(details) => Some(WinRmError::WebServiceFault(details)),
        }
    }
}

/// Output of one stream from one Receive round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Stream name (`stdout`, `stderr`, `exitcode`).
    pub stream: String,
    /// Decoded bytes, possibly empty.
    pub data: Vec<u8>,
    /// Exit code, once the command has finished.
    pub exit_code: Option<i32>,
}

/// A parsed response envelope.
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    root: Element,
}

impl ResponseMessage {
    /// Parse a response document.
    pub fn parse(xml_text: &str) -> Result<Self> {
        let root = xml::parse(xml_text)?;
        if root.local_name() != "Envelope" {
            return Err(WinRmError::Protocol(format!(
                "expected a SOAP Envelope, got <{}>",
                root.name
            )));
        }
        Ok(Self { root })
    }

    /// Root `Envelope` element.
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// The header or body element.
    pub fn section(&self, scope: Scope) -> Option<&Element> {
        self.root.child_named(scope.local_name())
    }

    /// Trimmed text of the first element named `local` within `scope`.
    pub fn extract_text(&self, scope: Scope, local: &str) -> Option<String> {
        self.section(scope)
            .and_then(|section| section.find(local))
            .map(|element| element.text_content().trim().to_string())
    }

    /// Attribute of the first element named `local` within `scope`.
    pub fn extract_attribute(&self, scope: Scope, local: &str, attribute: &str) -> Option<String> {
        self.section(scope)
            .and_then(|section| section.find(local))
            .and_then(|element| element.attribute(attribute))
            .map(str::to_string)
    }

    /// Like [`extract_text`](Self::extract_text) but absence or emptiness is a protocol error.
    pub fn require_text(&self, scope: Scope, local: &str) -> Result<String> {
        match self.extract_text(scope, local) {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(WinRmError::Protocol(format!("no {} in response", local))),
        }
    }

    /// Raw `RelatesTo` header value.
    pub fn relates_to_raw(&self) -> Option<String> {
        self.extract_text(Scope::Header, "RelatesTo")
    }

    /// `RelatesTo` as a UUID; `None` when missing or not of the form `uuid:<uuid>`.
    pub fn relates_to(&self) -> Option<Uuid> {
        self.relates_to_raw()
            .as_deref()
            .and_then(|raw| raw.strip_prefix("uuid:"))
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    /// Verify that `RelatesTo` echoes the request `MessageID`.
    pub fn check_correlation(&self, expected: Uuid) -> Result<()> {
        match self.relates_to() {
            Some(actual) if actual == expected => Ok(()),
            _ => Err(WinRmError::Correlation {
                expected,
                actual: self.relates_to_raw().unwrap_or_default(),
            }),
        }
    }

    /// Verify correlation only if the response carries a `RelatesTo`.
    pub fn check_correlation_if_present(&self, expected: Uuid) -> Result<()> {
        if self.relates_to_raw().is_some() {
            self.check_correlation(expected)
        } else {
            Ok(())
        }
    }

    /// Classify the body as a WS-Management fault, a generic SOAP fault, or neither.
    pub fn classify_fault(&self) -> Fault {
        let Some(fault) = self
            .section(Scope::Body)
            .and_then(|body| body.child_named("Fault"))
        else {
            return Fault::None;
        };

        let code = fault
            .child_named("Code")
            .and_then(|c| c.child_named("Value"))
            .map(|v| v.text_content().trim().to_string());
        let subcode = fault
            .child_named("Code")
            .and_then(|c| c.child_named("Subcode"))
            .and_then(|s| s.child_named("Value"))
            .map(|v| v.text_content().trim().to_string());
        let reason = fault
            .child_named("Reason")
            .map(|r| normalize_whitespace(&r.text_content()));
        let detail_element = fault.child_named("Detail");
        let detail = detail_element
            .map(|d| normalize_whitespace(&d.text_content()))
            .filter(|d| !d.is_empty());

        match detail_element.and_then(|d| d.find("WSManFault")) {
            Some(wsman) => Fault::WsMan(FaultDetails {
                code: wsman.attribute("Code").map(str::to_string).or(code),
                subcode,
                message: wsman
                    .find("Message")
                    .map(|m| normalize_whitespace(&m.text_content()))
                    .filter(|m| !m.is_empty())
                    .or(reason),
                detail,
            }),
            None => Fault::WebService(FaultDetails {
                code,
                subcode,
                message: reason,
                detail,
            }),
        }
    }

    /// Exit code reported in the body, if the command has finished.
    ///
    /// The pending sentinel (`-1`) is reported as `None`.
    pub fn exit_code(&self) -> Result<Option<i32>> {
        let Some(raw) = self.extract_text(Scope::Body, "ExitCode") else {
            return Ok(None);
        };
        let code = raw
            .parse::<i32>()
            .map_err(|_| WinRmError::Protocol(format!("malformed ExitCode {:?}", raw)))?;
        Ok((code != EXIT_CODE_PENDING).then_some(code))
    }

    /// Decode the output of each requested stream.
    ///
    /// A stream's bytes come from every `Stream` element whose `Name`
    /// matches (or element whose local name is the stream name), in document
    /// order. Each chunk carries the response's exit code.
    pub fn output_chunks(&self, streams: &[&str]) -> Result<Vec<OutputChunk>> {
        let body = self
            .section(Scope::Body)
            .ok_or_else(|| WinRmError::Protocol("response has no Body".to_string()))?;
        let exit_code = self.exit_code()?;
        let elements = body.descendants();

        streams
            .iter()
            .map(|stream| {
                let mut data = Vec::new();
                for element in &elements {
                    let named_stream = element.local_name() == "Stream"
                        && element.attribute("Name") == Some(*stream);
                    if !named_stream && element.local_name() != *stream {
                        continue;
                    }
                    let text = element.text_content();
                    let encoded = text.trim();
                    if encoded.is_empty() {
                        continue;
                    }
                    let decoded = BASE64_STANDARD.decode(encoded).map_err(|e| {
                        WinRmError::Protocol(format!("invalid base64 in {} stream: {}", stream, e))
                    })?;
                    data.extend_from_slice(&decoded);
                }
                Ok(OutputChunk {
                    stream: (*stream).to_string(),
                    data,
                    exit_code,
                })
            })
            .collect()
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
