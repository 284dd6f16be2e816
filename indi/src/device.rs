//! A remote device and the vector properties it has defined

use crate::element::ProtocolElement;
use crate::error::{IndiError, IndiResult};
use crate::property::{PropertyKind, SwitchState, VectorProperty};
use crate::protocol::{standard_properties as sp, DriverInterface};

/// Timestamp layout used when a message carries none
const MESSAGE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Format a `message` attribute as `"<timestamp>: <text>"`
///
/// Uses the command's own `timestamp` attribute, else the current UTC time.
pub fn format_message(command: &ProtocolElement) -> Option<String> {
    let message = command.attribute("message")?;
    let timestamp = match command.non_empty_attribute("timestamp") {
        Some(ts) => ts.to_string(),
        None => chrono::Utc::now().format(MESSAGE_TIME_FORMAT).to_string(),
    };
    Some(format!("{}: {}", timestamp, message))
}

/// One named endpoint behind the server
///
/// Properties keep discovery order; groups are derived from it.
#[derive(Debug, Clone, Default)]
pub struct Device {
    name: String,
    properties: Vec<VectorProperty>,
    messages: Vec<String>,
}

impl Device {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[VectorProperty] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&VectorProperty> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut VectorProperty> {
        self.properties.iter_mut().find(|p| p.name() == name)
    }

    /// Lookup that also checks the kind
    pub fn property_of_kind(&self, name: &str, kind: PropertyKind) -> Option<&VectorProperty> {
        self.property(name).filter(|p| p.kind() == kind)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// Group names in order of first appearance
    pub fn groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for property in &self.properties {
            if !groups.contains(&property.group()) {
                groups.push(property.group());
            }
        }
        groups
    }

    pub fn properties_in_group<'a>(
        &'a self,
        group: &'a str,
    ) -> impl Iterator<Item = &'a VectorProperty> + 'a {
        self.properties.iter().filter(move |p| p.group() == group)
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn message(&self, index: usize) -> Option<&str> {
        self.messages.get(index).map(String::as_str)
    }

    pub fn last_message(&self) -> Option<&str> {
        self.messages.last().map(String::as_str)
    }

    pub fn push_message(&mut self, message: String) {
        self.messages.push(message);
    }

    /// Append the command's `message` attribute to the log, if it has one
    pub fn check_message(&mut self, command: &ProtocolElement) -> Option<&str> {
        let message = format_message(command)?;
        self.messages.push(message);
        self.last_message()
    }

    /// Build and store a vector from a `def*Vector` command
    ///
    /// Returns `Ok(None)` when the definition has no elements; nothing is
    /// stored in that case.
    pub fn define_property(
        &mut self,
        definition: &ProtocolElement,
    ) -> IndiResult<Option<&VectorProperty>> {
        let name = definition
            .name()
            .ok_or_else(|| IndiError::invalid(&self.name, "", "missing name attribute"))?;
        if self.has_property(name) {
            return Err(IndiError::PropertyDuplicated {
                device: self.name.clone(),
                property: name.to_string(),
            });
        }

        let property = VectorProperty::from_definition(definition)?;
        if property.values().is_empty() {
            tracing::info!(
                "{}.{}: definition has no elements, ignored",
                self.name,
                property.name()
            );
            return Ok(None);
        }
        self.properties.push(property);
        Ok(self.properties.last())
    }

    /// Apply a `set*Vector` command to an existing vector
    pub fn update_property(&mut self, command: &ProtocolElement) -> IndiResult<&VectorProperty> {
        let name = command
            .name()
            .ok_or_else(|| IndiError::invalid(&self.name, "", "missing name attribute"))?;
        let device = self.name.clone();
        let property = self
            .property_mut(name)
            .ok_or_else(|| IndiError::PropertyNotFound {
                device,
                property: name.to_string(),
            })?;
        property.apply_update(command)?;
        Ok(property)
    }

    pub fn remove_property(&mut self, name: &str) -> IndiResult<VectorProperty> {
        match self.properties.iter().position(|p| p.name() == name) {
            Some(index) => Ok(self.properties.remove(index)),
            None => Err(IndiError::PropertyNotFound {
                device: self.name.clone(),
                property: name.to_string(),
            }),
        }
    }

    fn driver_text(&self, element: &str) -> Option<&str> {
        self.property(sp::DRIVER_INFO)?
            .text(element)
            .map(|t| t.text.as_str())
    }

    pub fn driver_name(&self) -> Option<&str> {
        self.driver_text(sp::DRIVER_NAME)
    }

    pub fn driver_exec(&self) -> Option<&str> {
        self.driver_text(sp::DRIVER_EXEC)
    }

    pub fn driver_version(&self) -> Option<&str> {
        self.driver_text(sp::DRIVER_VERSION)
    }

    /// Interface bits advertised in `DRIVER_INFO`, `GENERAL` if absent
    pub fn driver_interface(&self) -> DriverInterface {
        self.driver_text(sp::DRIVER_INTERFACE)
            .and_then(|raw| raw.trim().parse::<u16>().ok())
            .map(DriverInterface::from_bits)
            .unwrap_or(DriverInterface::GENERAL)
    }

    /// True when the standard `CONNECTION.CONNECT` switch is On
    pub fn is_connected(&self) -> bool {
        self.property(sp::CONNECTION)
            .and_then(|p| p.switch(sp::CONNECT))
            .is_some_and(|s| s.state == SwitchState::On)
    }
}
