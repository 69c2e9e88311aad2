//! Schema synthesis and payload (de)serialization against descriptors.
//!
//! The registry calls into this module at registration time to materialize a
//! listener's XSD and example instance, and the pipelines call it per message
//! to validate and deserialize payload trees. Field order always follows
//! descriptor order, so every synthesized artifact is deterministic.

use thiserror::Error;

use polyp_core::descriptor::{
    FieldDescriptor, FieldKind, PayloadDescriptor, PayloadRecord, PayloadValue,
};

use crate::tree::Element;

/// Namespace for capability payload elements.
pub const CAPABILITY_NS: &str = "https://xml-pipeline.org/ns/capability/v1";

const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";

/// Payload validation/deserialization failures. Internal detail only; the
/// wire sees a canned `<huh>`.
#[derive(Debug, Clone, Error)]
pub enum PayloadXmlError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },
    #[error("Field appears more than once: {field}")]
    RepeatedField { field: String },
    #[error("Undeclared field: {field}")]
    UnknownField { field: String },
    #[error("Field value does not match its kind: {field}")]
    BadValue { field: String },
}

/// Serialize a record as a payload element under the given namespace.
pub fn record_to_element(root_name: &str, namespace: &str, record: &PayloadRecord) -> Element {
    let mut root = Element::in_ns(root_name, namespace);
    for (name, value) in &record.fields {
        for child in value_to_elements(name, namespace, value) {
            root.push_child(child);
        }
    }
    root
}

fn value_to_elements(name: &str, namespace: &str, value: &PayloadValue) -> Vec<Element> {
    match value {
        PayloadValue::List(items) => items
            .iter()
            .flat_map(|item| value_to_elements(name, namespace, item))
            .collect(),
        PayloadValue::Record(fields) => {
            let mut el = Element::in_ns(name, namespace);
            for (sub_name, sub_value) in fields {
                for child in value_to_elements(sub_name, namespace, sub_value) {
                    el.push_child(child);
                }
            }
            vec![el]
        }
        PayloadValue::Integer(v) => vec![Element::in_ns(name, namespace).with_text(v.to_string())],
        PayloadValue::Decimal(v) => vec![Element::in_ns(name, namespace).with_text(v.to_string())],
        PayloadValue::Boolean(v) => vec![Element::in_ns(name, namespace).with_text(v.to_string())],
        PayloadValue::Text(v) => vec![Element::in_ns(name, namespace).with_text(v)],
    }
}

/// Validate a payload tree against a descriptor and build the typed record.
///
/// This is schema validation and deserialization in one pass: required
/// fields must be present, values must parse as their declared kinds, and
/// undeclared elements are rejected. Optional fields fall back to their
/// declared defaults.
pub fn deserialize_payload(
    el: &Element,
    desc: &PayloadDescriptor,
) -> Result<PayloadRecord, PayloadXmlError> {
    for child in el.children() {
        if !desc.fields.contains_key(&child.name) {
            return Err(PayloadXmlError::UnknownField {
                field: child.name.clone(),
            });
        }
    }

    let mut record = PayloadRecord::new(desc.type_name.clone());
    for (name, field) in &desc.fields {
        let matches: Vec<&Element> = el.find_all(name).collect();
        let value = match &field.kind {
            FieldKind::List(inner) => {
                let mut items = Vec::with_capacity(matches.len());
                for item in &matches {
                    items.push(value_from_element(item, inner, name)?);
                }
                if items.is_empty() && !field.is_required() {
                    field.effective_default()
                } else {
                    PayloadValue::List(items)
                }
            }
            kind => match matches.len() {
                0 => {
                    if field.is_required() {
                        return Err(PayloadXmlError::MissingField { field: name.clone() });
                    }
                    field.effective_default()
                }
                1 => value_from_element(matches[0], kind, name)?,
                _ => return Err(PayloadXmlError::RepeatedField { field: name.clone() }),
            },
        };
        record.fields.insert(name.clone(), value);
    }
    Ok(record)
}

fn value_from_element(
    el: &Element,
    kind: &FieldKind,
    field: &str,
) -> Result<PayloadValue, PayloadXmlError> {
    let bad = || PayloadXmlError::BadValue {
        field: field.to_string(),
    };
    match kind {
        FieldKind::Integer => {
            let parsed = el.text().trim().parse::<i64>().map_err(|_| bad())?;
            Ok(PayloadValue::Integer(parsed))
        }
        FieldKind::Decimal => {
            let parsed = el.text().trim().parse::<f64>().map_err(|_| bad())?;
            Ok(PayloadValue::Decimal(parsed))
        }
        FieldKind::Boolean => match el.text().trim() {
            "true" | "1" => Ok(PayloadValue::Boolean(true)),
            "false" | "0" => Ok(PayloadValue::Boolean(false)),
            _ => Err(bad()),
        },
        FieldKind::Text => Ok(PayloadValue::Text(el.text())),
        // A repeated element is one item of the inner kind.
        FieldKind::List(inner) => value_from_element(el, inner, field),
        FieldKind::Record(desc) => {
            let record = deserialize_payload(el, desc)?;
            Ok(PayloadValue::Record(record.fields))
        }
    }
}

/// Synthesize the XSD document for a root tag and its descriptor.
pub fn synthesize_xsd(root_tag: &str, desc: &PayloadDescriptor) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<xs:schema xmlns:xs=\"{XSD_NS}\" targetNamespace=\"{CAPABILITY_NS}\" xmlns=\"{CAPABILITY_NS}\" elementFormDefault=\"qualified\">\n"
    ));
    out.push_str(&format!("  <xs:element name=\"{root_tag}\">\n"));
    write_complex_type(&mut out, desc, 4);
    out.push_str("  </xs:element>\n");
    out.push_str("</xs:schema>\n");
    out
}

fn write_complex_type(out: &mut String, desc: &PayloadDescriptor, indent: usize) {
    let pad = " ".repeat(indent);
    out.push_str(&format!("{pad}<xs:complexType>\n"));
    out.push_str(&format!("{pad}  <xs:sequence>\n"));
    for (name, field) in &desc.fields {
        write_field(out, name, field, indent + 4);
    }
    out.push_str(&format!("{pad}  </xs:sequence>\n"));
    out.push_str(&format!("{pad}</xs:complexType>\n"));
}

fn write_field(out: &mut String, name: &str, field: &FieldDescriptor, indent: usize) {
    let pad = " ".repeat(indent);
    let occurs = occurs_attrs(field);

    let (type_attr, nested): (Option<&str>, Option<&PayloadDescriptor>) =
        match element_kind(&field.kind) {
            ElementKind::Simple(xsd_type) => (Some(xsd_type), None),
            ElementKind::Complex(desc) => (None, Some(desc)),
        };

    let type_fragment = type_attr
        .map(|t| format!(" type=\"{t}\""))
        .unwrap_or_default();

    if field.doc.is_none() && nested.is_none() {
        out.push_str(&format!(
            "{pad}<xs:element name=\"{name}\"{type_fragment}{occurs}/>\n"
        ));
        return;
    }

    out.push_str(&format!(
        "{pad}<xs:element name=\"{name}\"{type_fragment}{occurs}>\n"
    ));
    if let Some(doc) = &field.doc {
        out.push_str(&format!("{pad}  <xs:annotation>\n"));
        out.push_str(&format!(
            "{pad}    <xs:documentation>{}</xs:documentation>\n",
            escape_xsd_text(doc)
        ));
        out.push_str(&format!("{pad}  </xs:annotation>\n"));
    }
    if let Some(desc) = nested {
        write_complex_type(out, desc, indent + 2);
    }
    out.push_str(&format!("{pad}</xs:element>\n"));
}

enum ElementKind<'a> {
    Simple(&'static str),
    Complex(&'a PayloadDescriptor),
}

fn element_kind(kind: &FieldKind) -> ElementKind<'_> {
    match kind {
        FieldKind::Integer => ElementKind::Simple("xs:integer"),
        FieldKind::Decimal => ElementKind::Simple("xs:decimal"),
        FieldKind::Boolean => ElementKind::Simple("xs:boolean"),
        FieldKind::Text => ElementKind::Simple("xs:string"),
        FieldKind::List(inner) => element_kind(inner),
        FieldKind::Record(desc) => ElementKind::Complex(desc),
    }
}

fn occurs_attrs(field: &FieldDescriptor) -> String {
    match &field.kind {
        FieldKind::List(_) => " minOccurs=\"0\" maxOccurs=\"unbounded\"".to_string(),
        _ if !field.is_required() => " minOccurs=\"0\"".to_string(),
        _ => String::new(),
    }
}

fn escape_xsd_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;")
}

/// Synthesize an example payload instance: declared defaults where present,
/// zero values otherwise, one item per list so the shape is visible.
pub fn synthesize_example(root_tag: &str, desc: &PayloadDescriptor) -> Element {
    let mut record = PayloadRecord::new(desc.type_name.clone());
    for (name, field) in &desc.fields {
        record.fields.insert(name.clone(), example_value(field));
    }
    record_to_element(root_tag, CAPABILITY_NS, &record)
}

fn example_value(field: &FieldDescriptor) -> PayloadValue {
    if let Some(default) = &field.default {
        return default.clone();
    }
    match &field.kind {
        FieldKind::List(inner) => PayloadValue::List(vec![example_value(&FieldDescriptor::new(
            (**inner).clone(),
        ))]),
        FieldKind::Record(desc) => PayloadValue::Record(
            desc.fields
                .iter()
                .map(|(name, field)| (name.clone(), example_value(field)))
                .collect(),
        ),
        kind => kind.default_value(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::c14n::to_canonical_string;
    use polyp_core::descriptor::FieldDescriptor;

    fn add_payload() -> PayloadDescriptor {
        PayloadDescriptor::new("AddPayload")
            .with_field(
                "a",
                FieldDescriptor::new(FieldKind::Integer).with_doc("left operand"),
            )
            .with_kind("b", FieldKind::Integer)
    }

    #[test]
    fn test_xsd_maps_primitive_types() {
        let desc = PayloadDescriptor::new("All")
            .with_kind("i", FieldKind::Integer)
            .with_kind("d", FieldKind::Decimal)
            .with_kind("f", FieldKind::Boolean)
            .with_kind("s", FieldKind::Text);
        let xsd = synthesize_xsd("x.all", &desc);
        assert!(xsd.contains("<xs:element name=\"i\" type=\"xs:integer\"/>"));
        assert!(xsd.contains("<xs:element name=\"d\" type=\"xs:decimal\"/>"));
        assert!(xsd.contains("<xs:element name=\"f\" type=\"xs:boolean\"/>"));
        assert!(xsd.contains("<xs:element name=\"s\" type=\"xs:string\"/>"));
        assert!(xsd.contains("<xs:element name=\"x.all\">"));
    }

    #[test]
    fn test_xsd_optional_and_list_occurs() {
        let desc = PayloadDescriptor::new("Q")
            .with_field(
                "limit",
                FieldDescriptor::new(FieldKind::Integer).with_default(PayloadValue::Integer(10)),
            )
            .with_kind("terms", FieldKind::List(Box::new(FieldKind::Text)));
        let xsd = synthesize_xsd("search.q", &desc);
        assert!(xsd.contains("name=\"limit\" type=\"xs:integer\" minOccurs=\"0\""));
        assert!(xsd
            .contains("name=\"terms\" type=\"xs:string\" minOccurs=\"0\" maxOccurs=\"unbounded\""));
    }

    #[test]
    fn test_xsd_includes_documentation() {
        let xsd = synthesize_xsd("calculator.add.addpayload", &add_payload());
        assert!(xsd.contains("<xs:documentation>left operand</xs:documentation>"));
    }

    #[test]
    fn test_xsd_nested_record() {
        let inner = PayloadDescriptor::new("Point")
            .with_kind("x", FieldKind::Integer)
            .with_kind("y", FieldKind::Integer);
        let desc =
            PayloadDescriptor::new("Move").with_kind("target", FieldKind::Record(Box::new(inner)));
        let xsd = synthesize_xsd("mover.move", &desc);
        // Nested complex type appears inside the field element.
        let target_pos = xsd.find("name=\"target\"").unwrap();
        let nested = &xsd[target_pos..];
        assert!(nested.contains("<xs:complexType>"));
        assert!(nested.contains("<xs:element name=\"x\" type=\"xs:integer\"/>"));
    }

    #[test]
    fn test_xsd_deterministic() {
        let desc = add_payload();
        assert_eq!(
            synthesize_xsd("calculator.add.addpayload", &desc),
            synthesize_xsd("calculator.add.addpayload", &desc)
        );
    }

    #[test]
    fn test_example_uses_zero_defaults() {
        let example = synthesize_example("calculator.add.addpayload", &add_payload());
        let text = to_canonical_string(&example);
        assert!(text.starts_with("<calculator.add.addpayload"));
        assert!(text.contains("<a>0</a>"));
        assert!(text.contains("<b>0</b>"));
    }

    #[test]
    fn test_example_prefers_declared_default() {
        let desc = PayloadDescriptor::new("Q").with_field(
            "limit",
            FieldDescriptor::new(FieldKind::Integer).with_default(PayloadValue::Integer(25)),
        );
        let example = synthesize_example("search.q", &desc);
        assert!(to_canonical_string(&example).contains("<limit>25</limit>"));
    }

    #[test]
    fn test_deserialize_roundtrip() {
        let desc = add_payload();
        let record = PayloadRecord::new("AddPayload").with("a", 2i64).with("b", 3i64);
        let el = record_to_element("calculator.add.addpayload", CAPABILITY_NS, &record);
        let decoded = deserialize_payload(&el, &desc).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_deserialize_rejects_non_integer() {
        let desc = add_payload();
        let el = Element::in_ns("calculator.add.addpayload", CAPABILITY_NS)
            .with_child(Element::in_ns("a", CAPABILITY_NS).with_text("not-a-number"))
            .with_child(Element::in_ns("b", CAPABILITY_NS).with_text("3"));
        assert!(matches!(
            deserialize_payload(&el, &desc),
            Err(PayloadXmlError::BadValue { .. })
        ));
    }

    #[test]
    fn test_deserialize_rejects_missing_required() {
        let desc = add_payload();
        let el = Element::in_ns("calculator.add.addpayload", CAPABILITY_NS)
            .with_child(Element::in_ns("a", CAPABILITY_NS).with_text("1"));
        assert!(matches!(
            deserialize_payload(&el, &desc),
            Err(PayloadXmlError::MissingField { .. })
        ));
    }

    #[test]
    fn test_deserialize_rejects_undeclared_element() {
        let desc = add_payload();
        let el = Element::in_ns("calculator.add.addpayload", CAPABILITY_NS)
            .with_child(Element::in_ns("a", CAPABILITY_NS).with_text("1"))
            .with_child(Element::in_ns("b", CAPABILITY_NS).with_text("2"))
            .with_child(Element::in_ns("c", CAPABILITY_NS).with_text("3"));
        assert!(matches!(
            deserialize_payload(&el, &desc),
            Err(PayloadXmlError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let desc = PayloadDescriptor::new("Q")
            .with_kind("q", FieldKind::Text)
            .with_field(
                "limit",
                FieldDescriptor::new(FieldKind::Integer).with_default(PayloadValue::Integer(10)),
            );
        let el = Element::in_ns("search.q", CAPABILITY_NS)
            .with_child(Element::in_ns("q", CAPABILITY_NS).with_text("rust"));
        let record = deserialize_payload(&el, &desc).unwrap();
        assert_eq!(record.get("limit"), Some(&PayloadValue::Integer(10)));
    }

    #[test]
    fn test_deserialize_list_collects_repeats() {
        let desc = PayloadDescriptor::new("Q")
            .with_kind("term", FieldKind::List(Box::new(FieldKind::Text)));
        let el = Element::in_ns("search.q", CAPABILITY_NS)
            .with_child(Element::in_ns("term", CAPABILITY_NS).with_text("a"))
            .with_child(Element::in_ns("term", CAPABILITY_NS).with_text("b"));
        let record = deserialize_payload(&el, &desc).unwrap();
        assert_eq!(
            record.get("term"),
            Some(&PayloadValue::List(vec![
                PayloadValue::Text("a".into()),
                PayloadValue::Text("b".into())
            ]))
        );
    }

    #[test]
    fn test_deserialize_rejects_repeated_scalar() {
        let desc = PayloadDescriptor::new("P").with_kind("x", FieldKind::Integer);
        let el = Element::in_ns("p.p", CAPABILITY_NS)
            .with_child(Element::in_ns("x", CAPABILITY_NS).with_text("1"))
            .with_child(Element::in_ns("x", CAPABILITY_NS).with_text("2"));
        assert!(matches!(
            deserialize_payload(&el, &desc),
            Err(PayloadXmlError::RepeatedField { .. })
        ));
    }

    #[test]
    fn test_boolean_lexical_forms() {
        let desc = PayloadDescriptor::new("B").with_kind("on", FieldKind::Boolean);
        for (input, expected) in [("true", true), ("1", true), ("false", false), ("0", false)] {
            let el = Element::in_ns("b.b", CAPABILITY_NS)
                .with_child(Element::in_ns("on", CAPABILITY_NS).with_text(input));
            let record = deserialize_payload(&el, &desc).unwrap();
            assert_eq!(record.get("on"), Some(&PayloadValue::Boolean(expected)));
        }
    }
}
