//! Format-neutral attributed hierarchical document.
//!
//! Front-ends (XML today) build an `Element` tree; the discovery parser only
//! ever sees this shape.

use std::collections::BTreeMap;

/// One node of an attributed hierarchical document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    /// Raw text content; `None` when the node carries no text at all.
    pub text: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    /// Returns the first direct child with the given tag.
    pub fn child(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.tag == tag)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Returns the trimmed text, treating blank text as absent.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::Element;

    #[test]
    fn trimmed_text_treats_whitespace_as_absent() {
        assert_eq!(Element::new("A").with_text("  \n ").trimmed_text(), None);
        assert_eq!(
            Element::new("A").with_text(" 13E9 ").trimmed_text(),
            Some("13E9")
        );
        assert_eq!(Element::new("A").trimmed_text(), None);
    }

    #[test]
    fn child_returns_first_match() {
        let root = Element::new("Root")
            .with_child(Element::new("Metadata").with_attr("n", "1"))
            .with_child(Element::new("Metadata").with_attr("n", "2"));
        assert_eq!(root.child("Metadata").and_then(|m| m.attr("n")), Some("1"));
        assert!(root.child("Category").is_none());
    }
}
