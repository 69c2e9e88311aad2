//! Canonical serialization in the exclusive-C14N style.
//!
//! The canonical byte form is the only representation used for comparison,
//! witnessing, and logging. Rules applied: no XML declaration, no
//! self-closing tags, attributes sorted by name, namespace declarations
//! emitted only where the effective default namespace changes, and C14N
//! character escaping for text and attribute values.

use crate::tree::{Element, Node};

/// Serialize an element tree to canonical bytes.
pub fn canonicalize(root: &Element) -> Vec<u8> {
    let mut out = String::new();
    write_element(&mut out, root, None);
    out.into_bytes()
}

/// Canonical form as a string, for logs and prompt artifacts.
pub fn to_canonical_string(root: &Element) -> String {
    let mut out = String::new();
    write_element(&mut out, root, None);
    out
}

fn write_element(out: &mut String, element: &Element, inherited_ns: Option<&str>) {
    out.push('<');
    out.push_str(&element.name);

    let own_ns = element.namespace.as_deref();
    if own_ns != inherited_ns {
        match own_ns {
            Some(ns) => {
                out.push_str(" xmlns=\"");
                escape_attr(out, ns);
                out.push('"');
            }
            None => out.push_str(" xmlns=\"\""),
        }
    }

    let mut attrs: Vec<&(String, String)> = element.attributes().iter().collect();
    attrs.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_attr(out, value);
        out.push('"');
    }
    out.push('>');

    for node in element.nodes() {
        match node {
            Node::Element(child) => write_element(out, child, own_ns),
            Node::Text(text) => escape_text(out, text),
        }
    }

    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

fn escape_text(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
}

fn escape_attr(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
}
