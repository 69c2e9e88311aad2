//! Per-listener preprocessing pipeline.
//!
//! Stage order is fixed: repair, canonicalize, envelope-validate, extract,
//! schema-validate, deserialize. The first four are envelope-level and run
//! once per message ([`prepare`]); the last two run once per target listener
//! ([`typed_payload`]), so a broadcast failure in one pipeline leaves the
//! others untouched. Any failure collapses onto a canned `<huh>` text; the
//! precise cause stays in the `detail` field for internal logging only.

use polyp_core::descriptor::{PayloadDescriptor, PayloadRecord};
use polyp_xml::c14n::canonicalize;
use polyp_xml::core_ns::HuhText;
use polyp_xml::envelope::Envelope;
use polyp_xml::parse::{parse_with_repair, Repair};
use polyp_xml::schema::deserialize_payload;
use polyp_xml::tree::Element;

/// A stage failure, reduced to its canned wire text.
#[derive(Debug, Clone)]
pub struct PipelineFailure {
    pub text: HuhText,
    /// Internal diagnostic; never leaves the process.
    pub detail: String,
    /// Sender recovered from the broken envelope, when one was parseable.
    pub sender_hint: Option<String>,
}

/// Output of the envelope-level stages.
#[derive(Debug, Clone)]
pub struct PreparedEnvelope {
    pub envelope: Envelope,
    /// The canonical byte form: the only representation that is witnessed,
    /// logged, or compared.
    pub canonical: Vec<u8>,
    pub repairs: Vec<Repair>,
}

/// Stages 1-4: repair, canonicalize, envelope-validate, payload-extract.
pub fn prepare(raw: &[u8]) -> Result<PreparedEnvelope, PipelineFailure> {
    let parsed = parse_with_repair(raw).map_err(|e| PipelineFailure {
        text: HuhText::EnvelopeMalformed,
        detail: e.to_string(),
        sender_hint: None,
    })?;

    let canonical = canonicalize(&parsed.root);

    let envelope = Envelope::from_element(&parsed.root).map_err(|e| PipelineFailure {
        text: HuhText::EnvelopeMalformed,
        detail: e.to_string(),
        sender_hint: parsed.root.child_text("from"),
    })?;

    Ok(PreparedEnvelope {
        envelope,
        canonical,
        repairs: parsed.repairs,
    })
}

/// Stages 5-6: validate the payload tree against a descriptor and build the
/// typed record.
pub fn typed_payload(
    payload: &Element,
    descriptor: &PayloadDescriptor,
) -> Result<PayloadRecord, PipelineFailure> {
    deserialize_payload(payload, descriptor).map_err(|e| PipelineFailure {
        text: HuhText::InvalidPayload,
        detail: e.to_string(),
        sender_hint: None,
    })
}
