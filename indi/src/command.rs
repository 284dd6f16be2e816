//! Outbound command builders
//!
//! Everything here returns a [`ProtocolElement`]; `to_xml()` turns it into the
//! wire text handed to the writer task.

use crate::element::ProtocolElement;
use crate::error::{IndiError, IndiResult};
use crate::property::{
    encode_blob, format_number, CommandFamily, PropertyKind, PropertyValues, SwitchRule,
    VectorProperty,
};
use crate::protocol::tags;
use crate::watch::{BlobHandling, WatchList};

/// Build the `new<Kind>Vector` command for a locally modified property copy
///
/// A `OneOfMany` switch vector only sends the element that is On; every other
/// kind sends all elements. Lights cannot be sent.
pub fn new_property_command(property: &VectorProperty) -> IndiResult<ProtocolElement> {
    let kind = property.kind();
    if kind == PropertyKind::Light {
        return Err(IndiError::PermissionDenied(format!(
            "{}.{} is a light vector",
            property.device(),
            property.name()
        )));
    }

    let mut command = ProtocolElement::new(kind.vector_tag(CommandFamily::New))
        .with_attribute("device", property.device())
        .with_attribute("name", property.name());
    if !property.timestamp().is_empty() {
        command.set_attribute("timestamp", property.timestamp());
    }

    let tag = kind.one_element_tag();
    match property.values() {
        PropertyValues::Number(elements) => {
            for e in elements {
                command.children.push(
                    ProtocolElement::new(tag.as_str())
                        .with_attribute("name", e.name.as_str())
                        .with_text(format_number(e.value)),
                );
            }
        }
        PropertyValues::Switch { rule, elements } => {
            let any_on = elements.iter().any(|e| e.state.is_on());
            let only_on = *rule == SwitchRule::OneOfMany && any_on;
            for e in elements.iter().filter(|e| !only_on || e.state.is_on()) {
                command.children.push(
                    ProtocolElement::new(tag.as_str())
                        .with_attribute("name", e.name.as_str())
                        .with_text(e.state.as_str()),
                );
            }
        }
        PropertyValues::Text(elements) => {
            for e in elements {
                command.children.push(
                    ProtocolElement::new(tag.as_str())
                        .with_attribute("name", e.name.as_str())
                        .with_text(e.text.as_str()),
                );
            }
        }
        PropertyValues::Blob(elements) => {
            for e in elements {
                let mut child = ProtocolElement::new(tag.as_str())
                    .with_attribute("name", e.name.as_str())
                    .with_attribute("size", e.data.len().to_string());
                if e.data.is_empty() {
                    child.set_attribute("enclen", "0");
                } else {
                    let encoded = encode_blob(&e.data);
                    child.set_attribute("enclen", encoded.len().to_string());
                    child.payload = encoded.into_bytes();
                }
                child.set_attribute("format", e.format.as_str());
                command.children.push(child);
            }
        }
        PropertyValues::Light(_) => {}
    }
    Ok(command)
}

/// `<getProperties version=.. [device=..] [name=..]/>`
pub fn get_properties(version: &str, device: Option<&str>, name: Option<&str>) -> ProtocolElement {
    let mut command = ProtocolElement::new(tags::GET_PROPERTIES).with_attribute("version", version);
    if let Some(device) = device.filter(|d| !d.is_empty()) {
        command.set_attribute("device", device);
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            command.set_attribute("name", name);
        }
    }
    command
}

/// The `getProperties` requests a fresh connection sends for a watch list
///
/// One device-less request when nothing is watched, otherwise one per watched
/// device, or one per watched property when the device names some.
pub fn get_properties_for_watch(watch: &WatchList, version: &str) -> Vec<ProtocolElement> {
    if watch.is_empty() {
        return vec![get_properties(version, None, None)];
    }
    let mut commands = Vec::new();
    for device in watch.devices() {
        let mut properties = watch.properties(device).peekable();
        if properties.peek().is_none() {
            commands.push(get_properties(version, Some(device), None));
        } else {
            commands.extend(properties.map(|p| get_properties(version, Some(device), Some(p))));
        }
    }
    commands
}

/// `<enableBLOB device=.. [name=..]>mode</enableBLOB>`
pub fn enable_blob(device: &str, property: Option<&str>, mode: BlobHandling) -> ProtocolElement {
    let mut command = ProtocolElement::new(tags::ENABLE_BLOB).with_attribute("device", device);
    if let Some(name) = property.filter(|p| !p.is_empty()) {
        command.set_attribute("name", name);
    }
    command.with_text(mode.as_str())
}

pub fn ping_request(uid: &str) -> ProtocolElement {
    ProtocolElement::new(tags::PING_REQUEST).with_attribute("uid", uid)
}

pub fn ping_reply(uid: &str) -> ProtocolElement {
    ProtocolElement::new(tags::PING_REPLY).with_attribute("uid", uid)
}
