//! In-memory transport replaying scripted replies.
//!
//! Each [`send`](Transport::send) records the request and pops the next
//! reply. Reply documents may contain a `{relates_to}` placeholder which is
//! replaced with the request's `MessageID`, so well-formed responses
//! correlate without the script knowing the generated identifiers.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Transport;
use crate::config::TransportKind;
use crate::error::{Result, WinRmError};
use crate::protocol::xml;
use crate::protocol::Action;

/// Placeholder substituted with the request `MessageID`.
pub const RELATES_TO_PLACEHOLDER: &str = "{relates_to}";

/// One scripted exchange.
#[derive(Debug)]
pub enum ScriptedReply {
    /// Answer with this document.
    Respond(String),
    /// Fail the exchange with this error.
    Fail(WinRmError),
    /// Sleep, then handle the inner reply.
    Delayed(Duration, Box<ScriptedReply>),
}

/// Transport answering from a queue of [`ScriptedReply`] values.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    /// Create an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().push_back(reply);
    }

    /// Queue a response document.
    pub fn respond(self, document: impl Into<String>) -> Self {
        self.push(ScriptedReply::Respond(document.into()));
        self
    }

    /// Queue a failure.
    pub fn fail(self, error: WinRmError) -> Self {
        self.push(ScriptedReply::Fail(error));
        self
    }

    /// Queue a response document delivered after `delay`.
    pub fn respond_after(self, delay: Duration, document: impl Into<String>) -> Self {
        self.push(ScriptedReply::Delayed(
            delay,
            Box::new(ScriptedReply::Respond(document.into())),
        ));
        self
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// Action of every request sent so far, in order.
    pub fn actions(&self) -> Vec<Action> {
        self.requests
            .lock()
            .iter()
            .filter_map(|request| {
                let root = xml::parse(request).ok()?;
                let uri = root.find("Action")?.text_content();
                Action::from_uri(uri.trim())
            })
            .collect()
    }

    /// Number of replies not consumed yet.
    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Plaintext
    }

    async fn send(&self, envelope: &str) -> Result<String> {
        self.requests.lock().push(envelope.to_string());

        let message_id = xml::parse(envelope)
            .ok()
            .and_then(|root| root.find("MessageID").map(|m| m.text_content()))
            .unwrap_or_default();

        let mut reply = self
            .replies
            .lock()
            .pop_front()
            .ok_or_else(|| WinRmError::Transport("no scripted reply left".to_string()))?;

        loop {
            match reply {
                ScriptedReply::Respond(document) => {
                    return Ok(document.replace(RELATES_TO_PLACEHOLDER, message_id.trim()));
                }
                ScriptedReply::Fail(error) => return Err(error),
                ScriptedReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &str = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing"><env:Header><a:Action>http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete</a:Action><a:MessageID>uuid:11111111-2222-3333-4444-555555555555</a:MessageID></env:Header><env:Body/></env:Envelope>"#;

    #[tokio::test]
    async fn test_replies_in_order_with_correlation() {
        let transport = ScriptedTransport::new()
            .respond("<r>{relates_to}</r>")
            .fail(WinRmError::Transport("boom".to_string()));

        let reply = transport.send(REQUEST).await.unwrap();
        assert_eq!(reply, "<r>uuid:11111111-2222-3333-4444-555555555555</r>");

        assert!(matches!(
            transport.send(REQUEST).await,
            Err(WinRmError::Transport(msg)) if msg == "boom"
        ));
        assert!(matches!(
            transport.send(REQUEST).await,
            Err(WinRmError::Transport(msg)) if msg == "no scripted reply left"
        ));

        assert_eq!(transport.requests().len(), 3);
        assert_eq!(transport.actions(), vec![Action::Delete; 3]);
        assert_eq!(transport.remaining(), 0);
    }
}
