//! The `<message>` envelope: parse, validate, synthesize.

use thiserror::Error;
use uuid::Uuid;

use crate::c14n::canonicalize;
use crate::tree::Element;

/// Namespace of the outer envelope.
pub const ENVELOPE_NS: &str = "https://xml-pipeline.org/ns/envelope/v1";

/// Sender name used for pump-originated diagnostics.
pub const SYSTEM_SENDER: &str = "system";
/// Sender name used for registry-served meta responses.
pub const CORE_SENDER: &str = "core";

/// A validated message envelope.
///
/// `thread` is optional on ingress (a fresh conversation acquires one at
/// dispatch); the pump always sets it before emission.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub from: String,
    pub thread: Option<Uuid>,
    pub to: Option<String>,
    pub payload: Element,
}

/// Envelope schema violations.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Root element is not an envelope <message>")]
    WrongRoot,
    #[error("Envelope is missing <from>")]
    MissingFrom,
    #[error("Envelope <thread> is not a UUID")]
    BadThread,
    #[error("Envelope is missing its <payload>")]
    MissingPayload,
    #[error("Envelope <payload> must contain exactly one element")]
    PayloadNotSingular,
}

impl Envelope {
    pub fn new(from: impl Into<String>, payload: Element) -> Self {
        Self {
            from: from.into(),
            thread: None,
            to: None,
            payload,
        }
    }

    pub fn with_thread(mut self, thread: Uuid) -> Self {
        self.thread = Some(thread);
        self
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Validate an envelope tree: correct root, `<from>` present, a
    /// `<payload>` wrapper with exactly one element, and a well-formed
    /// `<thread>` when present.
    pub fn from_element(root: &Element) -> Result<Self, EnvelopeError> {
        if !root.is(ENVELOPE_NS, "message") {
            return Err(EnvelopeError::WrongRoot);
        }

        let from = root.child_text("from").ok_or(EnvelopeError::MissingFrom)?;

        let thread = match root.child_text("thread") {
            Some(text) => Some(Uuid::parse_str(&text).map_err(|_| EnvelopeError::BadThread)?),
            None => None,
        };

        let to = root.child_text("to");

        let wrapper = root.find("payload").ok_or(EnvelopeError::MissingPayload)?;
        let mut payloads = wrapper.children();
        let payload = payloads.next().ok_or(EnvelopeError::PayloadNotSingular)?;
        if payloads.next().is_some() {
            return Err(EnvelopeError::PayloadNotSingular);
        }

        Ok(Self {
            from,
            thread,
            to,
            payload: payload.clone(),
        })
    }

    /// Build the envelope tree. Child order is fixed: `from`, `thread`,
    /// optional `to`, then the `payload` wrapper.
    pub fn to_element(&self) -> Element {
        let mut root = Element::in_ns("message", ENVELOPE_NS)
            .with_child(Element::in_ns("from", ENVELOPE_NS).with_text(&self.from));
        if let Some(thread) = self.thread {
            root.push_child(Element::in_ns("thread", ENVELOPE_NS).with_text(thread.to_string()));
        }
        if let Some(to) = &self.to {
            root.push_child(Element::in_ns("to", ENVELOPE_NS).with_text(to));
        }
        root.push_child(
            Element::in_ns("payload", ENVELOPE_NS).with_child(self.payload.clone()),
        );
        root
    }

    /// Canonical wire form.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        canonicalize(&self.to_element())
    }
}
