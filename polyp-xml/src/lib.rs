//! XML plane for the polyp message substrate.
//!
//! Everything that touches angle brackets lives here: the element tree, the
//! repair parser, exclusive-C14N serialization, the envelope codec, the
//! reserved core namespace, and schema/example synthesis from payload
//! descriptors. The crate is synchronous and side-effect free; the pump
//! decides what to do with the results.

pub mod c14n;
pub mod core_ns;
pub mod envelope;
pub mod parse;
pub mod schema;
pub mod tree;

pub use c14n::{canonicalize, to_canonical_string};
pub use core_ns::{
    core_record_to_element, huh_record, is_core_element, parse_huh, parse_system_error,
    system_error_record, HuhText, MetaRequest, ParsedHuh, ParsedSystemError, CORE_NS,
    HUH_TRUNCATE_BYTES,
};
pub use envelope::{Envelope, EnvelopeError, CORE_SENDER, ENVELOPE_NS, SYSTEM_SENDER};
pub use parse::{parse_with_repair, Parsed, Repair, XmlError};
pub use schema::{
    deserialize_payload, record_to_element, synthesize_example, synthesize_xsd, PayloadXmlError,
    CAPABILITY_NS,
};
pub use tree::{Element, Node};
