//! Payload type descriptors and dynamic payload values.
//!
//! A listener registers a [`PayloadDescriptor`] describing the record it
//! accepts: named fields with primitive kinds, optional documentation, and
//! optional defaults. Descriptors are the schema-of-record from which the
//! registry synthesizes XSDs, example instances, and prompt fragments.
//!
//! Payload instances are dynamic [`PayloadValue`] trees grouped into a
//! [`PayloadRecord`]. Handlers receive and return records; the pump never
//! hands a handler anything that has not been validated against a descriptor.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The kind of a single payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Whole number, maps to `xs:integer`.
    Integer,
    /// Floating point, maps to `xs:decimal`.
    Decimal,
    /// Maps to `xs:boolean`.
    Boolean,
    /// Maps to `xs:string`.
    Text,
    /// Repeated element of the inner kind (`maxOccurs="unbounded"`).
    List(Box<FieldKind>),
    /// Nested record, maps to a nested complex type.
    Record(Box<PayloadDescriptor>),
}

impl FieldKind {
    /// Human-readable name used in prompt field tables.
    pub fn display_name(&self) -> String {
        match self {
            FieldKind::Integer => "integer".to_string(),
            FieldKind::Decimal => "decimal".to_string(),
            FieldKind::Boolean => "boolean".to_string(),
            FieldKind::Text => "text".to_string(),
            FieldKind::List(inner) => format!("list of {}", inner.display_name()),
            FieldKind::Record(desc) => format!("record {}", desc.type_name),
        }
    }

    /// The default instance for this kind: `0`, `0.0`, `false`, empty
    /// string, empty list, or a record of field defaults.
    pub fn default_value(&self) -> PayloadValue {
        match self {
            FieldKind::Integer => PayloadValue::Integer(0),
            FieldKind::Decimal => PayloadValue::Decimal(0.0),
            FieldKind::Boolean => PayloadValue::Boolean(false),
            FieldKind::Text => PayloadValue::Text(String::new()),
            FieldKind::List(_) => PayloadValue::List(Vec::new()),
            FieldKind::Record(desc) => PayloadValue::Record(
                desc.fields
                    .iter()
                    .map(|(name, field)| (name.clone(), field.effective_default()))
                    .collect(),
            ),
        }
    }
}

/// One named field of a payload record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub kind: FieldKind,
    /// Optional documentation, carried into the XSD and the prompt table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    /// Default value. A field with a default is optional on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<PayloadValue>,
}

impl FieldDescriptor {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            doc: None,
            default: None,
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_default(mut self, default: PayloadValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Required fields are exactly the fields without a default.
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }

    /// The declared default, or the kind's zero value.
    pub fn effective_default(&self) -> PayloadValue {
        self.default
            .clone()
            .unwrap_or_else(|| self.kind.default_value())
    }
}

/// Structural description of a listener's payload record.
///
/// Field order is insertion order and is the deterministic order used for
/// schema synthesis, examples, and prompt tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadDescriptor {
    pub type_name: String,
    pub fields: IndexMap<String, FieldDescriptor>,
}

impl PayloadDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, field: FieldDescriptor) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Shorthand for a plain required field of the given kind.
    pub fn with_kind(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.with_field(name, FieldDescriptor::new(kind))
    }

    /// Structural equality: same field names, kinds, and requiredness in the
    /// same order. Broadcast registration demands this across all listeners
    /// sharing a root tag; documentation and type names may differ.
    pub fn same_structure(&self, other: &PayloadDescriptor) -> bool {
        if self.fields.len() != other.fields.len() {
            return false;
        }
        self.fields.iter().zip(other.fields.iter()).all(
            |((name_a, field_a), (name_b, field_b))| {
                name_a == name_b
                    && field_a.is_required() == field_b.is_required()
                    && kinds_match(&field_a.kind, &field_b.kind)
            },
        )
    }

    /// Validate a record against this descriptor.
    ///
    /// Checks that every required field is present, every present field fits
    /// its declared kind, and no undeclared fields appear.
    pub fn validate(&self, record: &PayloadRecord) -> Result<(), DescriptorError> {
        for (name, field) in &self.fields {
            match record.fields.get(name) {
                Some(value) => {
                    if !value.fits(&field.kind) {
                        return Err(DescriptorError::FieldKindMismatch {
                            field: name.clone(),
                        });
                    }
                }
                None => {
                    if field.is_required() {
                        return Err(DescriptorError::MissingField {
                            field: name.clone(),
                        });
                    }
                }
            }
        }
        for name in record.fields.keys() {
            if !self.fields.contains_key(name) {
                return Err(DescriptorError::UnknownField {
                    field: name.clone(),
                });
            }
        }
        Ok(())
    }
}

fn kinds_match(a: &FieldKind, b: &FieldKind) -> bool {
    match (a, b) {
        (FieldKind::List(ia), FieldKind::List(ib)) => kinds_match(ia, ib),
        (FieldKind::Record(da), FieldKind::Record(db)) => da.same_structure(db),
        _ => std::mem::discriminant(a) == std::mem::discriminant(b),
    }
}

/// Validation errors for records checked against a descriptor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DescriptorError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },
    #[error("Field has wrong kind: {field}")]
    FieldKindMismatch { field: String },
    #[error("Undeclared field: {field}")]
    UnknownField { field: String },
}

/// A dynamic payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    List(Vec<PayloadValue>),
    Record(IndexMap<String, PayloadValue>),
}

impl PayloadValue {
    /// Whether this value conforms to the given kind.
    pub fn fits(&self, kind: &FieldKind) -> bool {
        match (self, kind) {
            (PayloadValue::Integer(_), FieldKind::Integer) => true,
            (PayloadValue::Decimal(_), FieldKind::Decimal) => true,
            (PayloadValue::Boolean(_), FieldKind::Boolean) => true,
            (PayloadValue::Text(_), FieldKind::Text) => true,
            (PayloadValue::List(items), FieldKind::List(inner)) => {
                items.iter().all(|item| item.fits(inner))
            }
            (PayloadValue::Record(fields), FieldKind::Record(desc)) => {
                let record = PayloadRecord {
                    type_name: desc.type_name.clone(),
                    fields: fields.clone(),
                };
                desc.validate(&record).is_ok()
            }
            _ => false,
        }
    }

    /// Infer the kind of this value. Empty lists infer a text item kind.
    pub fn infer_kind(&self) -> FieldKind {
        match self {
            PayloadValue::Integer(_) => FieldKind::Integer,
            PayloadValue::Decimal(_) => FieldKind::Decimal,
            PayloadValue::Boolean(_) => FieldKind::Boolean,
            PayloadValue::Text(_) => FieldKind::Text,
            PayloadValue::List(items) => FieldKind::List(Box::new(
                items
                    .first()
                    .map(PayloadValue::infer_kind)
                    .unwrap_or(FieldKind::Text),
            )),
            PayloadValue::Record(fields) => {
                let mut desc = PayloadDescriptor::new("record");
                for (name, value) in fields {
                    desc = desc.with_kind(name.clone(), value.infer_kind());
                }
                FieldKind::Record(Box::new(desc))
            }
        }
    }
}

impl From<i64> for PayloadValue {
    fn from(v: i64) -> Self {
        PayloadValue::Integer(v)
    }
}

impl From<f64> for PayloadValue {
    fn from(v: f64) -> Self {
        PayloadValue::Decimal(v)
    }
}

impl From<bool> for PayloadValue {
    fn from(v: bool) -> Self {
        PayloadValue::Boolean(v)
    }
}

impl From<&str> for PayloadValue {
    fn from(v: &str) -> Self {
        PayloadValue::Text(v.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(v: String) -> Self {
        PayloadValue::Text(v)
    }
}

/// A typed payload instance: a named record of field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadRecord {
    pub type_name: String,
    pub fields: IndexMap<String, PayloadValue>,
}

impl PayloadRecord {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&PayloadValue> {
        self.fields.get(name)
    }

    /// Text field accessor; `None` if absent or non-text.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(PayloadValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Derive a descriptor whose kinds are inferred from the present values.
    ///
    /// Used by the pump to carry the shape of a handler-produced response
    /// through re-injection, where no registered schema applies.
    pub fn infer_descriptor(&self) -> PayloadDescriptor {
        let mut desc = PayloadDescriptor::new(self.type_name.clone());
        for (name, value) in &self.fields {
            desc = desc.with_kind(name.clone(), value.infer_kind());
        }
        desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shout_input() -> PayloadDescriptor {
        PayloadDescriptor::new("ShoutInput").with_kind("text", FieldKind::Text)
    }

    #[test]
    fn test_required_iff_no_default() {
        let required = FieldDescriptor::new(FieldKind::Integer);
        assert!(required.is_required());

        let optional =
            FieldDescriptor::new(FieldKind::Integer).with_default(PayloadValue::Integer(7));
        assert!(!optional.is_required());
    }

    #[test]
    fn test_default_values_per_kind() {
        assert_eq!(FieldKind::Integer.default_value(), PayloadValue::Integer(0));
        assert_eq!(
            FieldKind::Text.default_value(),
            PayloadValue::Text(String::new())
        );
        assert_eq!(
            FieldKind::Boolean.default_value(),
            PayloadValue::Boolean(false)
        );
        assert_eq!(
            FieldKind::List(Box::new(FieldKind::Integer)).default_value(),
            PayloadValue::List(Vec::new())
        );
    }

    #[test]
    fn test_validate_accepts_conforming_record() {
        let desc = shout_input();
        let record = PayloadRecord::new("ShoutInput").with("text", "hello");
        assert!(desc.validate(&record).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let desc = shout_input();
        let record = PayloadRecord::new("ShoutInput");
        assert!(matches!(
            desc.validate(&record),
            Err(DescriptorError::MissingField { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_kind() {
        let desc = shout_input();
        let record = PayloadRecord::new("ShoutInput").with("text", 42i64);
        assert!(matches!(
            desc.validate(&record),
            Err(DescriptorError::FieldKindMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_undeclared_field() {
        let desc = shout_input();
        let record = PayloadRecord::new("ShoutInput")
            .with("text", "hi")
            .with("extra", 1i64);
        assert!(matches!(
            desc.validate(&record),
            Err(DescriptorError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_optional_field_may_be_absent() {
        let desc = PayloadDescriptor::new("Opts").with_field(
            "count",
            FieldDescriptor::new(FieldKind::Integer).with_default(PayloadValue::Integer(1)),
        );
        let record = PayloadRecord::new("Opts");
        assert!(desc.validate(&record).is_ok());
    }

    #[test]
    fn test_same_structure_ignores_docs_and_type_name() {
        let a = PayloadDescriptor::new("QueryA").with_field(
            "q",
            FieldDescriptor::new(FieldKind::Text).with_doc("the query"),
        );
        let b = PayloadDescriptor::new("QueryB").with_kind("q", FieldKind::Text);
        assert!(a.same_structure(&b));
    }

    #[test]
    fn test_same_structure_rejects_kind_difference() {
        let a = PayloadDescriptor::new("Q").with_kind("q", FieldKind::Text);
        let b = PayloadDescriptor::new("Q").with_kind("q", FieldKind::Integer);
        assert!(!a.same_structure(&b));
    }

    #[test]
    fn test_same_structure_rejects_requiredness_difference() {
        let a = PayloadDescriptor::new("Q").with_kind("q", FieldKind::Text);
        let b = PayloadDescriptor::new("Q").with_field(
            "q",
            FieldDescriptor::new(FieldKind::Text).with_default(PayloadValue::Text(String::new())),
        );
        assert!(!a.same_structure(&b));
    }

    #[test]
    fn test_nested_record_validation() {
        let inner = PayloadDescriptor::new("Point")
            .with_kind("x", FieldKind::Integer)
            .with_kind("y", FieldKind::Integer);
        let desc = PayloadDescriptor::new("Move")
            .with_kind("target", FieldKind::Record(Box::new(inner)));

        let mut point = IndexMap::new();
        point.insert("x".to_string(), PayloadValue::Integer(1));
        point.insert("y".to_string(), PayloadValue::Integer(2));
        let record = PayloadRecord::new("Move").with("target", PayloadValue::Record(point));
        assert!(desc.validate(&record).is_ok());
    }

    #[test]
    fn test_infer_descriptor_roundtrip() {
        let record = PayloadRecord::new("ShoutResult")
            .with("text", "HELLO")
            .with("count", 3i64);
        let desc = record.infer_descriptor();
        assert_eq!(desc.type_name, "ShoutResult");
        assert!(desc.validate(&record).is_ok());
    }

    #[test]
    fn test_list_fits() {
        let kind = FieldKind::List(Box::new(FieldKind::Integer));
        let good = PayloadValue::List(vec![PayloadValue::Integer(1), PayloadValue::Integer(2)]);
        let bad = PayloadValue::List(vec![PayloadValue::Text("no".into())]);
        assert!(good.fits(&kind));
        assert!(!bad.fits(&kind));
    }
}
