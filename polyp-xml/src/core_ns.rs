//! Reserved core namespace: diagnostics and introspection payloads.
//!
//! Everything here is pump-emitted or pump-consumed. `<huh>` carries a
//! deliberately canned error plus the offending bytes; `<SystemError>`
//! carries a generic runtime failure; the meta requests are answered by the
//! privileged core handler from cached registry artifacts.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use polyp_core::descriptor::{PayloadRecord, PayloadValue};
use polyp_core::error::SystemErrorCode;

use crate::schema::record_to_element;
use crate::tree::Element;

/// Namespace of the reserved core payloads.
pub const CORE_NS: &str = "https://xml-pipeline.org/ns/core/v1";

/// Original-attempt bytes are truncated to this size before encoding.
pub const HUH_TRUNCATE_BYTES: usize = 4 * 1024;

/// The canned abstract texts a `<huh>` may carry.
///
/// A wrong schema and a nonexistent capability read identically from
/// outside; the internal cause never reaches the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HuhText {
    EnvelopeMalformed,
    UnknownRootTag,
    InvalidPayload,
}

impl HuhText {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnvelopeMalformed => "Envelope malformed",
            Self::UnknownRootTag => "Unknown root tag",
            Self::InvalidPayload => "Invalid payload structure",
        }
    }
}

/// Build a `<huh>` payload record.
pub fn huh_record(text: HuhText, original: &[u8]) -> PayloadRecord {
    let truncated = &original[..original.len().min(HUH_TRUNCATE_BYTES)];
    PayloadRecord::new("huh")
        .with("error", text.as_str())
        .with("original-attempt", BASE64.encode(truncated))
}

/// Build a `<SystemError>` payload record with the code's generic message.
pub fn system_error_record(code: SystemErrorCode) -> PayloadRecord {
    PayloadRecord::new("SystemError")
        .with("code", code.as_str())
        .with("message", code.generic_message())
        .with("retry-allowed", code.retry_allowed())
}

/// Serialize a core payload record to its element form.
pub fn core_record_to_element(record: &PayloadRecord) -> Element {
    record_to_element(&record.type_name, CORE_NS, record)
}

/// Whether an element belongs to the core namespace.
pub fn is_core_element(el: &Element) -> bool {
    el.namespace.as_deref() == Some(CORE_NS)
}

/// Decoded `<huh>` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedHuh {
    pub error: String,
    pub original_attempt: Vec<u8>,
}

/// Decode a `<huh>` element; `None` if it is not one.
pub fn parse_huh(el: &Element) -> Option<ParsedHuh> {
    if !el.is(CORE_NS, "huh") {
        return None;
    }
    let error = el.child_text("error")?;
    let original_attempt = el
        .child_text("original-attempt")
        .and_then(|b64| BASE64.decode(b64).ok())
        .unwrap_or_default();
    Some(ParsedHuh {
        error,
        original_attempt,
    })
}

/// Decoded `<SystemError>` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSystemError {
    pub code: SystemErrorCode,
    pub message: String,
    pub retry_allowed: bool,
}

/// Decode a `<SystemError>` element; `None` if it is not one.
pub fn parse_system_error(el: &Element) -> Option<ParsedSystemError> {
    if !el.is(CORE_NS, "SystemError") {
        return None;
    }
    let code = SystemErrorCode::parse(&el.child_text("code")?)?;
    let message = el.child_text("message").unwrap_or_default();
    let retry_allowed = el
        .child_text("retry-allowed")
        .map(|t| t == "true" || t == "1")
        .unwrap_or_else(|| code.retry_allowed());
    Some(ParsedSystemError {
        code,
        message,
        retry_allowed,
    })
}

/// A parsed introspection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaRequest {
    ListCapabilities,
    Schema { capability: String },
    Example { capability: String },
    Prompt { capability: String },
}

impl MetaRequest {
    /// Decode a core-namespace element into a meta request. `None` when the
    /// element is not a recognizable request (including a request missing
    /// its `<capability>`).
    pub fn from_element(el: &Element) -> Option<Self> {
        if !is_core_element(el) {
            return None;
        }
        match el.name.as_str() {
            "list-capabilities" => Some(Self::ListCapabilities),
            "request-schema" => Some(Self::Schema {
                capability: el.child_text("capability")?,
            }),
            "request-example" => Some(Self::Example {
                capability: el.child_text("capability")?,
            }),
            "request-prompt" => Some(Self::Prompt {
                capability: el.child_text("capability")?,
            }),
            _ => None,
        }
    }
}

/// Build the `<capability-list>` response record.
pub fn capability_list_record(entries: &[(String, String)]) -> PayloadRecord {
    let items: Vec<PayloadValue> = entries
        .iter()
        .map(|(name, description)| {
            let mut fields = indexmap::IndexMap::new();
            fields.insert("name".to_string(), PayloadValue::Text(name.clone()));
            fields.insert(
                "description".to_string(),
                PayloadValue::Text(description.clone()),
            );
            PayloadValue::Record(fields)
        })
        .collect();
    PayloadRecord::new("capability-list").with("capability", PayloadValue::List(items))
}

/// Build a cached-artifact response record (`schema-response`,
/// `example-response`, or `prompt-response`).
pub fn artifact_response_record(
    kind: &str,
    capability: &str,
    body_field: &str,
    body: &str,
) -> PayloadRecord {
    PayloadRecord::new(kind)
        .with("capability", capability)
        .with(body_field, body)
}
