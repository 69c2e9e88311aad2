//! Privileged handler for the introspection namespace.
//!
//! Serves capability listings and cached schema/example/prompt artifacts
//! straight from the registry snapshot, gated by [`MetaPolicy`]. A denied
//! gate and a missing capability produce the same canned refusal, so meta
//! requests cannot be used to probe the topology.

use polyp_core::config::{AuthLevel, MetaAccess, MetaPolicy};
use polyp_core::descriptor::PayloadRecord;
use polyp_xml::core_ns::{artifact_response_record, capability_list_record, HuhText, MetaRequest};

use crate::registry::RegistrySnapshot;

/// Answer a meta request, or say why not (as a canned huh text).
pub fn answer(
    snapshot: &RegistrySnapshot,
    request: &MetaRequest,
    policy: &MetaPolicy,
    auth: AuthLevel,
) -> Result<PayloadRecord, HuhText> {
    match request {
        MetaRequest::ListCapabilities => {
            if !policy.list {
                return Err(HuhText::InvalidPayload);
            }
            Ok(capability_list_record(&snapshot.capability_entries()))
        }
        MetaRequest::Schema { capability } => {
            artifact(snapshot, policy.schema, auth, capability, |l| {
                ("schema-response", "xsd", l.schema_xsd.clone())
            })
        }
        MetaRequest::Example { capability } => {
            artifact(snapshot, policy.example, auth, capability, |l| {
                ("example-response", "example", l.example_xml.clone())
            })
        }
        MetaRequest::Prompt { capability } => {
            artifact(snapshot, policy.prompt, auth, capability, |l| {
                ("prompt-response", "prompt", l.prompt_fragment.clone())
            })
        }
    }
}

fn artifact(
    snapshot: &RegistrySnapshot,
    access: MetaAccess,
    auth: AuthLevel,
    capability: &str,
    select: impl Fn(&crate::registry::Listener) -> (&'static str, &'static str, String),
) -> Result<PayloadRecord, HuhText> {
    if !auth.permits(access) {
        return Err(HuhText::InvalidPayload);
    }
    let listener = snapshot
        .lookup_by_name(capability)
        .ok_or(HuhText::InvalidPayload)?;
    let (kind, body_field, body) = select(listener.as_ref());
    Ok(artifact_response_record(kind, capability, body_field, &body))
}
