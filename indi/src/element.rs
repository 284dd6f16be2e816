//! Parsed protocol elements and their wire serialization

use indexmap::IndexMap;
use quick_xml::escape::escape;
use std::fmt::Write as _;

/// One parsed (or to-be-sent) protocol command
///
/// Attributes keep their insertion order so multi-attribute tags serialize
/// back in the order they were received or built. `payload` is only used by
/// `oneBLOB` leaves and holds the raw base64 line exactly as it arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolElement {
    pub tag_name: String,
    pub attributes: IndexMap<String, String>,
    pub children: Vec<ProtocolElement>,
    pub text: Option<String>,
    pub payload: Vec<u8>,
}

impl ProtocolElement {
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            ..Default::default()
        }
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: ProtocolElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attribute value, treating an empty string as absent
    pub fn non_empty_attribute(&self, key: &str) -> Option<&str> {
        self.attribute(key).filter(|v| !v.is_empty())
    }

    pub fn device(&self) -> Option<&str> {
        self.non_empty_attribute("device")
    }

    pub fn name(&self) -> Option<&str> {
        self.non_empty_attribute("name")
    }

    /// Text content, or the empty string
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub(crate) fn append_text(&mut self, text: &str) {
        match &mut self.text {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(text);
            }
            None => self.text = Some(text.to_string()),
        }
    }

    /// Serialize in the one-tag-per-line layout the framer expects
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag_name);
        for (key, value) in &self.attributes {
            let _ = write!(out, " {}='{}'", key, escape(value.as_str()));
        }

        let has_text = self.text.as_deref().is_some_and(|t| !t.is_empty());
        if self.children.is_empty() && !has_text && self.payload.is_empty() {
            out.push_str("/>\n");
            return;
        }

        out.push_str(">\n");
        for child in &self.children {
            child.write_xml(out);
        }
        if !self.payload.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.payload));
            out.push('\n');
        } else if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            out.push_str("      ");
            out.push_str(&escape(text));
            out.push('\n');
        }
        let _ = writeln!(out, "</{}>", self.tag_name);
    }
}
