use super::Element;
use crate::element::ProtocolElement;
use crate::error::{IndiError, IndiResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SwitchState {
    On,
    #[default]
    Off,
}

impl SwitchState {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("On") {
            Some(SwitchState::On)
        } else if s.eq_ignore_ascii_case("Off") {
            Some(SwitchState::Off)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwitchState::On => "On",
            SwitchState::Off => "Off",
        }
    }

    pub fn is_on(self) -> bool {
        self == SwitchState::On
    }
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many switches of a vector may be On at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SwitchRule {
    /// Exactly one
    #[default]
    OneOfMany,
    /// Zero or one
    AtMostOne,
    /// Any number
    AnyOfMany,
}

impl SwitchRule {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        [Self::OneOfMany, Self::AtMostOne, Self::AnyOfMany]
            .into_iter()
            .find(|rule| rule.as_str().eq_ignore_ascii_case(s))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwitchRule::OneOfMany => "OneOfMany",
            SwitchRule::AtMostOne => "AtMostOne",
            SwitchRule::AnyOfMany => "AnyOfMany",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchElement {
    pub name: String,
    pub label: String,
    pub state: SwitchState,
}

impl SwitchElement {
    pub fn new(name: &str, state: SwitchState) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_string(),
            state,
        }
    }
}

fn parse_state(
    child: &ProtocolElement,
    name: &str,
    device: &str,
    property: &str,
) -> IndiResult<SwitchState> {
    SwitchState::parse(child.text()).ok_or_else(|| {
        IndiError::invalid(
            device,
            property,
            format!("{}: invalid switch state '{}'", name, child.text()),
        )
    })
}

impl Element for SwitchElement {
    type Update = SwitchState;

    fn name(&self) -> &str {
        &self.name
    }

    fn from_definition(child: &ProtocolElement, device: &str, property: &str) -> IndiResult<Self> {
        let name = child.name().unwrap_or_default();
        Ok(Self {
            name: name.to_string(),
            label: child.non_empty_attribute("label").unwrap_or(name).to_string(),
            state: parse_state(child, name, device, property)?,
        })
    }

    fn stage_update(
        &self,
        child: &ProtocolElement,
        device: &str,
        property: &str,
    ) -> IndiResult<Option<SwitchState>> {
        parse_state(child, &self.name, device, property).map(Some)
    }

    fn commit_update(&mut self, update: SwitchState) {
        self.state = update;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_state_parse() {
        assert_eq!(SwitchState::parse("on"), Some(SwitchState::On));
        assert_eq!(SwitchState::parse(" Off "), Some(SwitchState::Off));
        assert_eq!(SwitchState::parse("1"), None);
        assert_eq!(SwitchState::from(true), SwitchState::On);
    }

    #[test]
    fn test_switch_rule_parse() {
        assert_eq!(SwitchRule::parse("AtMostOne"), Some(SwitchRule::AtMostOne));
        assert_eq!(SwitchRule::parse("anyofmany"), Some(SwitchRule::AnyOfMany));
        assert_eq!(SwitchRule::parse("Whatever"), None);
        assert_eq!(SwitchRule::default(), SwitchRule::OneOfMany);
    }
}
