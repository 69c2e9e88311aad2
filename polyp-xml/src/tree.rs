//! Namespace-aware element tree.
//!
//! The in-memory form every pipeline stage works on. Elements carry a
//! resolved namespace URI (prefixes are resolved at parse time and never
//! stored), a local name, attributes, and ordered children.

/// A child of an element.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// One XML element with resolved namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub namespace: Option<String>,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn in_ns(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value.into(),
            None => self.attributes.push((name, value.into())),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(Node::Text(text.into()));
    }

    pub fn nodes(&self) -> &[Node] {
        &self.children
    }

    /// Direct child elements, in document order.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// First direct child element with the given local name.
    pub fn find(&self, local: &str) -> Option<&Element> {
        self.children().find(|el| el.name == local)
    }

    /// All direct child elements with the given local name.
    pub fn find_all<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children().filter(move |el| el.name == local)
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Trimmed text of a direct child element, if present and non-empty.
    pub fn child_text(&self, local: &str) -> Option<String> {
        let text = self.find(local)?.text();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Namespace + local name check.
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.name == local && self.namespace.as_deref() == Some(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_accessors() {
        let el = Element::in_ns("message", "urn:test")
            .with_child(Element::new("from").with_text("greeter"))
            .with_child(Element::new("to").with_text("shouter"));

        assert!(el.is("urn:test", "message"));
        assert_eq!(el.child_text("from").as_deref(), Some("greeter"));
        assert_eq!(el.children().count(), 2);
        assert!(el.find("missing").is_none());
    }

    #[test]
    fn test_set_attr_overwrites() {
        let mut el = Element::new("e");
        el.set_attr("k", "a");
        el.set_attr("k", "b");
        assert_eq!(el.attr("k"), Some("b"));
        assert_eq!(el.attributes().len(), 1);
    }

    #[test]
    fn test_text_concatenates_direct_only() {
        let el = Element::new("outer")
            .with_text("a")
            .with_child(Element::new("inner").with_text("x"))
            .with_text("b");
        assert_eq!(el.text(), "ab");
    }

    #[test]
    fn test_find_all() {
        let el = Element::new("list")
            .with_child(Element::new("item").with_text("1"))
            .with_child(Element::new("other"))
            .with_child(Element::new("item").with_text("2"));
        let items: Vec<_> = el.find_all("item").map(|e| e.text()).collect();
        assert_eq!(items, vec!["1", "2"]);
    }
}
