//! Repair parser: possibly-malformed bytes in, element tree plus repair
//! notes out.
//!
//! Recovery is limited to the unambiguous cases: byte-order marks, junk
//! before the first tag, stray end tags, and elements left open at end of
//! input. Anything ambiguous (no root, multiple roots, undecodable markup)
//! is a hard error. Every applied fix is recorded so the pump can attach it
//! to the message's diagnostic companion.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::tree::Element;

/// A fix applied while recovering a malformed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repair {
    StrippedBom,
    StrippedLeadingJunk,
    DroppedStrayEndTag(String),
    AutoClosedElements(usize),
    DroppedTrailingContent,
}

/// Parse result: the single root and the repairs that were needed.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub root: Element,
    pub repairs: Vec<Repair>,
}

/// Unrecoverable parse failures.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("Document contains no element")]
    Empty,
    #[error("Document has more than one root element")]
    MultipleRoots,
    #[error("Malformed XML: {0}")]
    Malformed(String),
}

#[derive(Default)]
struct Bindings {
    default_ns: Option<Option<String>>,
    prefixes: Vec<(String, String)>,
}

struct OpenElement {
    element: Element,
    qname: String,
}

struct TreeBuilder {
    opens: Vec<OpenElement>,
    scopes: Vec<Bindings>,
    roots: Vec<Element>,
    repairs: Vec<Repair>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            opens: Vec::new(),
            scopes: Vec::new(),
            roots: Vec::new(),
            repairs: Vec::new(),
        }
    }

    fn resolve_default_ns(&self, extra: &Bindings) -> Option<String> {
        if let Some(default) = &extra.default_ns {
            return default.clone();
        }
        for scope in self.scopes.iter().rev() {
            if let Some(default) = &scope.default_ns {
                return default.clone();
            }
        }
        None
    }

    fn resolve_prefix(&self, prefix: &str, extra: &Bindings) -> Option<String> {
        if let Some((_, uri)) = extra.prefixes.iter().rev().find(|(p, _)| p == prefix) {
            return Some(uri.clone());
        }
        for scope in self.scopes.iter().rev() {
            if let Some((_, uri)) = scope.prefixes.iter().rev().find(|(p, _)| p == prefix) {
                return Some(uri.clone());
            }
        }
        None
    }

    fn build_element(
        &self,
        start: &quick_xml::events::BytesStart<'_>,
    ) -> Result<(Element, Bindings, String), XmlError> {
        let qname = String::from_utf8_lossy(start.name().as_ref()).into_owned();

        let mut bindings = Bindings::default();
        let mut attrs: Vec<(String, String)> = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| XmlError::Malformed(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| XmlError::Malformed(e.to_string()))?
                .into_owned();
            if key == "xmlns" {
                bindings.default_ns = Some(if value.is_empty() { None } else { Some(value) });
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                bindings.prefixes.push((prefix.to_string(), value));
            } else {
                let local = key.rsplit(':').next().unwrap_or(&key).to_string();
                attrs.push((local, value));
            }
        }

        let (namespace, local) = match qname.split_once(':') {
            Some((prefix, local)) => (self.resolve_prefix(prefix, &bindings), local.to_string()),
            None => (self.resolve_default_ns(&bindings), qname.clone()),
        };

        let mut element = Element::new(local);
        element.namespace = namespace;
        for (name, value) in attrs {
            element.set_attr(name, value);
        }
        Ok((element, bindings, qname))
    }

    fn attach(&mut self, element: Element) {
        match self.opens.last_mut() {
            Some(parent) => parent.element.push_child(element),
            None => self.roots.push(element),
        }
    }

    fn close_top(&mut self) {
        if let Some(open) = self.opens.pop() {
            self.scopes.pop();
            self.attach(open.element);
        }
    }

    fn handle_end(&mut self, qname: &str) {
        if self
            .opens
            .last()
            .map(|open| open.qname == qname)
            .unwrap_or(false)
        {
            self.close_top();
            return;
        }
        // End tag for an open ancestor: close intervening elements.
        if let Some(idx) = self.opens.iter().rposition(|open| open.qname == qname) {
            let auto_closed = self.opens.len() - idx - 1;
            for _ in 0..auto_closed {
                self.close_top();
            }
            self.repairs.push(Repair::AutoClosedElements(auto_closed));
            self.close_top();
            return;
        }
        self.repairs
            .push(Repair::DroppedStrayEndTag(qname.to_string()));
    }

    fn handle_text(&mut self, text: &str) {
        match self.opens.last_mut() {
            Some(open) => {
                if !text.trim().is_empty() {
                    open.element.push_text(text);
                }
            }
            None => {
                if !text.trim().is_empty() {
                    self.repairs.push(Repair::DroppedTrailingContent);
                }
            }
        }
    }
}

/// Parse raw bytes into a single-rooted tree, recovering where unambiguous.
pub fn parse_with_repair(raw: &[u8]) -> Result<Parsed, XmlError> {
    let mut repairs = Vec::new();

    let mut bytes = raw;
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        bytes = &bytes[3..];
        repairs.push(Repair::StrippedBom);
    }
    let start = bytes
        .iter()
        .position(|&b| b == b'<')
        .ok_or(XmlError::Empty)?;
    if bytes[..start].iter().any(|b| !b.is_ascii_whitespace()) {
        repairs.push(Repair::StrippedLeadingJunk);
    }
    bytes = &bytes[start..];

    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().check_end_names = false;
    reader.config_mut().allow_unmatched_ends = true;

    let mut builder = TreeBuilder::new();
    builder.repairs = repairs;
    let mut buf = Vec::new();

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                // A broken tail after a complete root is droppable junk.
                if builder.opens.is_empty() && builder.roots.len() == 1 {
                    builder.repairs.push(Repair::DroppedTrailingContent);
                    break;
                }
                return Err(XmlError::Malformed(e.to_string()));
            }
        };
        match event {
            Event::Start(ref start) => {
                let (element, bindings, qname) = builder.build_element(start)?;
                builder.opens.push(OpenElement { element, qname });
                builder.scopes.push(bindings);
            }
            Event::Empty(ref start) => {
                // Bindings on an empty element scope only itself and are
                // already applied during resolution.
                let (element, _, _) = builder.build_element(start)?;
                builder.attach(element);
            }
            Event::End(ref end) => {
                let qname = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                builder.handle_end(&qname);
            }
            Event::Text(ref text) => {
                let text = text
                    .unescape()
                    .map_err(|e| XmlError::Malformed(e.to_string()))?;
                builder.handle_text(&text);
            }
            Event::CData(ref cdata) => {
                let text = String::from_utf8_lossy(cdata.as_ref()).into_owned();
                builder.handle_text(&text);
            }
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
        buf.clear();
    }

    if !builder.opens.is_empty() {
        let open = builder.opens.len();
        while !builder.opens.is_empty() {
            builder.close_top();
        }
        builder.repairs.push(Repair::AutoClosedElements(open));
    }

    match builder.roots.len() {
        0 => Err(XmlError::Empty),
        1 => Ok(Parsed {
            root: builder.roots.remove(0),
            repairs: builder.repairs,
        }),
        _ => Err(XmlError::MultipleRoots),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed() {
        let parsed = parse_with_repair(b"<a><b>hi</b></a>").unwrap();
        assert_eq!(parsed.root.name, "a");
        assert_eq!(parsed.root.child_text("b").as_deref(), Some("hi"));
        assert!(parsed.repairs.is_empty());
    }

    #[test]
    fn test_parse_resolves_default_namespace() {
        let parsed =
            parse_with_repair(b"<message xmlns=\"urn:env\"><from>x</from></message>").unwrap();
        assert!(parsed.root.is("urn:env", "message"));
        let from = parsed.root.find("from").unwrap();
        assert_eq!(from.namespace.as_deref(), Some("urn:env"));
    }

    #[test]
    fn test_parse_resolves_prefix() {
        let parsed =
            parse_with_repair(b"<e:msg xmlns:e=\"urn:env\"><e:from>x</e:from></e:msg>").unwrap();
        assert!(parsed.root.is("urn:env", "msg"));
        assert!(parsed.root.find("from").unwrap().is("urn:env", "from"));
    }

    #[test]
    fn test_repair_auto_closes_open_elements() {
        let parsed = parse_with_repair(b"<a><b>hi").unwrap();
        assert_eq!(parsed.root.name, "a");
        assert_eq!(parsed.root.child_text("b").as_deref(), Some("hi"));
        assert!(parsed
            .repairs
            .iter()
            .any(|r| matches!(r, Repair::AutoClosedElements(2))));
    }

    #[test]
    fn test_repair_drops_stray_end_tag() {
        let parsed = parse_with_repair(b"<a></b></a>").unwrap();
        assert_eq!(parsed.root.name, "a");
        assert!(parsed
            .repairs
            .iter()
            .any(|r| matches!(r, Repair::DroppedStrayEndTag(t) if t == "b")));
    }

    #[test]
    fn test_repair_closes_intermediate_on_ancestor_end() {
        let parsed = parse_with_repair(b"<a><b><c>x</c></a>").unwrap();
        assert_eq!(parsed.root.name, "a");
        let b = parsed.root.find("b").unwrap();
        assert_eq!(b.find("c").unwrap().text(), "x");
        assert!(parsed
            .repairs
            .iter()
            .any(|r| matches!(r, Repair::AutoClosedElements(1))));
    }

    #[test]
    fn test_repair_strips_bom_and_junk() {
        let mut input = vec![0xEF, 0xBB, 0xBF];
        input.extend_from_slice(b"garbage<a/>");
        let parsed = parse_with_repair(&input).unwrap();
        assert_eq!(parsed.root.name, "a");
        assert!(parsed.repairs.contains(&Repair::StrippedBom));
        assert!(parsed.repairs.contains(&Repair::StrippedLeadingJunk));
    }

    #[test]
    fn test_empty_input_is_error() {
        assert!(matches!(parse_with_repair(b""), Err(XmlError::Empty)));
        assert!(matches!(parse_with_repair(b"   "), Err(XmlError::Empty)));
    }

    #[test]
    fn test_multiple_roots_is_error() {
        assert!(matches!(
            parse_with_repair(b"<a/><b/>"),
            Err(XmlError::MultipleRoots)
        ));
    }

    #[test]
    fn test_attributes_preserved() {
        let parsed = parse_with_repair(b"<a k=\"v\" other=\"2\"/>").unwrap();
        assert_eq!(parsed.root.attr("k"), Some("v"));
        assert_eq!(parsed.root.attr("other"), Some("2"));
    }

    #[test]
    fn test_xml_decl_ignored() {
        let parsed = parse_with_repair(b"<?xml version=\"1.0\"?><a/>").unwrap();
        assert_eq!(parsed.root.name, "a");
        assert!(parsed.repairs.is_empty());
    }

    #[test]
    fn test_entity_text_unescaped() {
        let parsed = parse_with_repair(b"<a>x &amp; y &lt;z&gt;</a>").unwrap();
        assert_eq!(parsed.root.text(), "x & y <z>");
    }
}
