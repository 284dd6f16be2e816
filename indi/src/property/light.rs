use super::{Element, PropertyState};
use crate::element::ProtocolElement;
use crate::error::{IndiError, IndiResult};

/// A state-only indicator; lights carry no permission or timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightElement {
    pub name: String,
    pub label: String,
    pub state: PropertyState,
}

fn parse_light(
    child: &ProtocolElement,
    name: &str,
    device: &str,
    property: &str,
) -> IndiResult<PropertyState> {
    PropertyState::parse(child.text()).ok_or_else(|| {
        IndiError::invalid(
            device,
            property,
            format!("{}: invalid light state '{}'", name, child.text()),
        )
    })
}

impl Element for LightElement {
    type Update = PropertyState;

    fn name(&self) -> &str {
        &self.name
    }

    fn from_definition(child: &ProtocolElement, device: &str, property: &str) -> IndiResult<Self> {
        let name = child.name().unwrap_or_default();
        Ok(Self {
            name: name.to_string(),
            label: child.non_empty_attribute("label").unwrap_or(name).to_string(),
            state: parse_light(child, name, device, property)?,
        })
    }

    fn stage_update(
        &self,
        child: &ProtocolElement,
        device: &str,
        property: &str,
    ) -> IndiResult<Option<PropertyState>> {
        parse_light(child, &self.name, device, property).map(Some)
    }

    fn commit_update(&mut self, update: PropertyState) {
        self.state = update;
    }
}
