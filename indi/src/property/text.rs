use super::Element;
use crate::element::ProtocolElement;
use crate::error::IndiResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextElement {
    pub name: String,
    pub label: String,
    pub text: String,
}

impl TextElement {
    pub fn new(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_string(),
            text: text.to_string(),
        }
    }
}

impl Element for TextElement {
    type Update = String;

    fn name(&self) -> &str {
        &self.name
    }

    fn from_definition(child: &ProtocolElement, _device: &str, _property: &str) -> IndiResult<Self> {
        let name = child.name().unwrap_or_default();
        Ok(Self {
            name: name.to_string(),
            label: child.non_empty_attribute("label").unwrap_or(name).to_string(),
            text: child.text().to_string(),
        })
    }

    fn stage_update(
        &self,
        child: &ProtocolElement,
        _device: &str,
        _property: &str,
    ) -> IndiResult<Option<String>> {
        Ok(Some(child.text().to_string()))
    }

    fn commit_update(&mut self, update: String) {
        self.text = update;
    }
}
