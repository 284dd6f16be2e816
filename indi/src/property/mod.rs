//! Vector properties: the typed containers a driver defines, updates and deletes
//!
//! A vector is built once from a `def*Vector` command, mutated in place by
//! `set*Vector` commands and dropped by `delProperty`. Updates are staged
//! against the current elements first and only committed once every child has
//! parsed, so a rejected update leaves the vector exactly as it was.

mod blob;
mod light;
mod number;
mod switch;
mod text;

pub use blob::{decode_blob, encode_blob, BlobDecodeError, BlobElement, DecodedBlob};
pub use light::LightElement;
pub use number::{format_number, parse_number, NumberElement};
pub use switch::{SwitchElement, SwitchRule, SwitchState};
pub use text::TextElement;

use crate::element::ProtocolElement;
use crate::error::{IndiError, IndiResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// INDI property state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PropertyState {
    #[default]
    Idle,
    Ok,
    Busy,
    Alert,
}

impl PropertyState {
    /// Case-insensitive parse of `Idle`, `Ok`, `Busy`, `Alert`
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        [Self::Idle, Self::Ok, Self::Busy, Self::Alert]
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        }
    }
}

impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// INDI property permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Permission {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ro" => Some(Permission::ReadOnly),
            "wo" => Some(Permission::WriteOnly),
            "rw" => Some(Permission::ReadWrite),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ReadOnly => "ro",
            Permission::WriteOnly => "wo",
            Permission::ReadWrite => "rw",
        }
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, Permission::ReadOnly)
    }
}

/// The five INDI property kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    Number,
    Switch,
    Text,
    Light,
    Blob,
}

impl PropertyKind {
    /// Kind name as it appears inside tag names
    pub fn tag_stem(self) -> &'static str {
        match self {
            PropertyKind::Number => "Number",
            PropertyKind::Switch => "Switch",
            PropertyKind::Text => "Text",
            PropertyKind::Light => "Light",
            PropertyKind::Blob => "BLOB",
        }
    }

    fn from_stem(stem: &str) -> Option<Self> {
        match stem {
            "Number" => Some(PropertyKind::Number),
            "Switch" => Some(PropertyKind::Switch),
            "Text" => Some(PropertyKind::Text),
            "Light" => Some(PropertyKind::Light),
            "BLOB" => Some(PropertyKind::Blob),
            _ => None,
        }
    }

    pub fn def_element_tag(self) -> String {
        format!("def{}", self.tag_stem())
    }

    pub fn one_element_tag(self) -> String {
        format!("one{}", self.tag_stem())
    }

    pub fn vector_tag(self, family: CommandFamily) -> String {
        format!("{}{}Vector", family.prefix(), self.tag_stem())
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_stem())
    }
}

/// def / set / new command families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFamily {
    Def,
    Set,
    New,
}

impl CommandFamily {
    pub fn prefix(self) -> &'static str {
        match self {
            CommandFamily::Def => "def",
            CommandFamily::Set => "set",
            CommandFamily::New => "new",
        }
    }
}

/// Split a vector tag such as `setBLOBVector` into family and kind
pub fn classify_vector_tag(tag: &str) -> Option<(CommandFamily, PropertyKind)> {
    let stem = tag.strip_suffix("Vector")?;
    let (family, rest) = if let Some(rest) = stem.strip_prefix("def") {
        (CommandFamily::Def, rest)
    } else if let Some(rest) = stem.strip_prefix("set") {
        (CommandFamily::Set, rest)
    } else if let Some(rest) = stem.strip_prefix("new") {
        (CommandFamily::New, rest)
    } else {
        return None;
    };
    PropertyKind::from_stem(rest).map(|kind| (family, kind))
}

/// Behaviour shared by the five element types
pub(crate) trait Element: Sized {
    type Update;

    fn name(&self) -> &str;

    /// Build from a `def<Kind>` child of a definition
    fn from_definition(
        child: &ProtocolElement,
        device: &str,
        property: &str,
    ) -> IndiResult<Self>;

    /// Parse a `one<Kind>` child without mutating; `None` means nothing to apply
    fn stage_update(
        &self,
        child: &ProtocolElement,
        device: &str,
        property: &str,
    ) -> IndiResult<Option<Self::Update>>;

    fn commit_update(&mut self, update: Self::Update);
}

fn build_elements<E: Element>(
    definition: &ProtocolElement,
    kind: PropertyKind,
    device: &str,
    property: &str,
) -> IndiResult<Vec<E>> {
    let tag = kind.def_element_tag();
    let mut elements = Vec::new();
    for child in definition.children.iter().filter(|c| c.tag_name == tag) {
        if child.name().is_none() {
            tracing::debug!("Skipping unnamed {} in {}.{}", tag, device, property);
            continue;
        }
        elements.push(E::from_definition(child, device, property)?);
    }
    Ok(elements)
}

fn stage_elements<E: Element>(
    elements: &[E],
    command: &ProtocolElement,
    kind: PropertyKind,
    device: &str,
    property: &str,
) -> IndiResult<Vec<(usize, E::Update)>> {
    let tag = kind.one_element_tag();
    let mut staged = Vec::new();
    for child in command.children.iter().filter(|c| c.tag_name == tag) {
        let name = child
            .name()
            .ok_or_else(|| IndiError::invalid(device, property, format!("<{}> without a name", tag)))?;
        let Some(index) = elements.iter().position(|e| e.name() == name) else {
            tracing::debug!("Ignoring unknown element {}.{}.{}", device, property, name);
            continue;
        };
        if let Some(update) = elements[index].stage_update(child, device, property)? {
            staged.push((index, update));
        }
    }
    Ok(staged)
}

fn commit_elements<E: Element>(elements: &mut [E], staged: Vec<(usize, E::Update)>) {
    for (index, update) in staged {
        if let Some(element) = elements.get_mut(index) {
            element.commit_update(update);
        }
    }
}

/// Typed element list of a vector property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValues {
    Number(Vec<NumberElement>),
    Switch {
        rule: SwitchRule,
        elements: Vec<SwitchElement>,
    },
    Text(Vec<TextElement>),
    Light(Vec<LightElement>),
    Blob(Vec<BlobElement>),
}

impl PropertyValues {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValues::Number(_) => PropertyKind::Number,
            PropertyValues::Switch { .. } => PropertyKind::Switch,
            PropertyValues::Text(_) => PropertyKind::Text,
            PropertyValues::Light(_) => PropertyKind::Light,
            PropertyValues::Blob(_) => PropertyKind::Blob,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PropertyValues::Number(v) => v.len(),
            PropertyValues::Switch { elements, .. } => elements.len(),
            PropertyValues::Text(v) => v.len(),
            PropertyValues::Light(v) => v.len(),
            PropertyValues::Blob(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_names(&self) -> Vec<&str> {
        match self {
            PropertyValues::Number(v) => v.iter().map(|e| e.name.as_str()).collect(),
            PropertyValues::Switch { elements, .. } => {
                elements.iter().map(|e| e.name.as_str()).collect()
            }
            PropertyValues::Text(v) => v.iter().map(|e| e.name.as_str()).collect(),
            PropertyValues::Light(v) => v.iter().map(|e| e.name.as_str()).collect(),
            PropertyValues::Blob(v) => v.iter().map(|e| e.name.as_str()).collect(),
        }
    }
}

enum StagedUpdate {
    Number(Vec<(usize, <NumberElement as Element>::Update)>),
    Switch(Vec<(usize, SwitchState)>),
    Text(Vec<(usize, String)>),
    Light(Vec<(usize, PropertyState)>),
    Blob(Vec<(usize, DecodedBlob)>),
}

/// A named, typed vector of elements on one device
#[derive(Debug, Clone, PartialEq)]
pub struct VectorProperty {
    device: String,
    name: String,
    label: String,
    group: String,
    permission: Permission,
    state: PropertyState,
    timeout: f64,
    timestamp: String,
    values: PropertyValues,
}

impl VectorProperty {
    /// Empty vector with default metadata, mostly for building commands by hand
    pub fn new(device: &str, name: &str, values: PropertyValues) -> Self {
        let permission = if values.kind() == PropertyKind::Light {
            Permission::ReadOnly
        } else {
            Permission::ReadWrite
        };
        Self {
            device: device.to_string(),
            name: name.to_string(),
            label: name.to_string(),
            group: String::new(),
            permission,
            state: PropertyState::Idle,
            timeout: 0.0,
            timestamp: String::new(),
            values,
        }
    }

    /// Build a vector from a `def*Vector` command
    pub fn from_definition(definition: &ProtocolElement) -> IndiResult<Self> {
        let kind = match classify_vector_tag(&definition.tag_name) {
            Some((CommandFamily::Def, kind)) => kind,
            _ => return Err(IndiError::DispatchError(definition.tag_name.clone())),
        };
        let device = definition.device().ok_or_else(|| {
            IndiError::invalid("", definition.name().unwrap_or(""), "missing device attribute")
        })?;
        let name = definition
            .name()
            .ok_or_else(|| IndiError::invalid(device, "", "missing name attribute"))?;

        let state = match definition.attribute("state") {
            Some(raw) => PropertyState::parse(raw).unwrap_or_else(|| {
                tracing::warn!("{}.{}: invalid state '{}', using Idle", device, name, raw);
                PropertyState::Idle
            }),
            None => PropertyState::Idle,
        };

        let permission = if kind == PropertyKind::Light {
            Permission::ReadOnly
        } else {
            match definition.attribute("perm").and_then(Permission::parse) {
                Some(perm) => perm,
                None => {
                    tracing::warn!("{}.{}: missing or invalid perm, using ro", device, name);
                    Permission::ReadOnly
                }
            }
        };

        let timeout = if kind == PropertyKind::Light {
            0.0
        } else {
            definition
                .attribute("timeout")
                .and_then(parse_number)
                .unwrap_or(0.0)
        };

        let values = match kind {
            PropertyKind::Number => {
                PropertyValues::Number(build_elements(definition, kind, device, name)?)
            }
            PropertyKind::Switch => PropertyValues::Switch {
                rule: definition
                    .attribute("rule")
                    .and_then(SwitchRule::parse)
                    .unwrap_or_default(),
                elements: build_elements(definition, kind, device, name)?,
            },
            PropertyKind::Text => PropertyValues::Text(build_elements(definition, kind, device, name)?),
            PropertyKind::Light => {
                PropertyValues::Light(build_elements(definition, kind, device, name)?)
            }
            PropertyKind::Blob => PropertyValues::Blob(build_elements(definition, kind, device, name)?),
        };

        Ok(Self {
            device: device.to_string(),
            name: name.to_string(),
            label: definition
                .non_empty_attribute("label")
                .unwrap_or(name)
                .to_string(),
            group: definition.attribute("group").unwrap_or_default().to_string(),
            permission,
            state,
            timeout,
            timestamp: definition.attribute("timestamp").unwrap_or_default().to_string(),
            values,
        })
    }

    /// Apply a `set*Vector` command
    ///
    /// State is required and applied first, then timeout, then element values.
    /// Nothing is applied unless the whole command parses.
    pub fn apply_update(&mut self, command: &ProtocolElement) -> IndiResult<()> {
        match classify_vector_tag(&command.tag_name) {
            Some((CommandFamily::Set, kind)) if kind == self.kind() => {}
            _ => {
                return Err(IndiError::invalid(
                    &self.device,
                    &self.name,
                    format!("<{}> does not update a {} vector", command.tag_name, self.kind()),
                ))
            }
        }

        let state = command
            .attribute("state")
            .and_then(PropertyState::parse)
            .ok_or_else(|| IndiError::invalid(&self.device, &self.name, "missing or invalid state"))?;
        let timeout = match command.attribute("timeout") {
            Some(raw) => Some(parse_number(raw).ok_or_else(|| {
                IndiError::invalid(&self.device, &self.name, format!("invalid timeout '{}'", raw))
            })?),
            None => None,
        };

        let staged = self.stage(command)?;

        self.state = state;
        if let Some(timeout) = timeout {
            self.set_timeout(timeout);
        }
        if let Some(timestamp) = command.non_empty_attribute("timestamp") {
            self.timestamp = timestamp.to_string();
        }
        self.commit(staged);
        Ok(())
    }

    fn stage(&self, command: &ProtocolElement) -> IndiResult<StagedUpdate> {
        let (device, name, kind) = (self.device.as_str(), self.name.as_str(), self.kind());
        Ok(match &self.values {
            PropertyValues::Number(v) => {
                StagedUpdate::Number(stage_elements(v, command, kind, device, name)?)
            }
            PropertyValues::Switch { elements, .. } => {
                StagedUpdate::Switch(stage_elements(elements, command, kind, device, name)?)
            }
            PropertyValues::Text(v) => StagedUpdate::Text(stage_elements(v, command, kind, device, name)?),
            PropertyValues::Light(v) => {
                StagedUpdate::Light(stage_elements(v, command, kind, device, name)?)
            }
            PropertyValues::Blob(v) => StagedUpdate::Blob(stage_elements(v, command, kind, device, name)?),
        })
    }

    fn commit(&mut self, staged: StagedUpdate) {
        match (&mut self.values, staged) {
            (PropertyValues::Number(v), StagedUpdate::Number(s)) => commit_elements(v, s),
            (PropertyValues::Switch { elements, .. }, StagedUpdate::Switch(s)) => {
                commit_elements(elements, s)
            }
            (PropertyValues::Text(v), StagedUpdate::Text(s)) => commit_elements(v, s),
            (PropertyValues::Light(v), StagedUpdate::Light(s)) => commit_elements(v, s),
            (PropertyValues::Blob(v), StagedUpdate::Blob(s)) => commit_elements(v, s),
            _ => {}
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn state(&self) -> PropertyState {
        self.state
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn kind(&self) -> PropertyKind {
        self.values.kind()
    }

    pub fn values(&self) -> &PropertyValues {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut PropertyValues {
        &mut self.values
    }

    pub fn is_key(&self, device: &str, name: &str) -> bool {
        self.device == device && self.name == name
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    pub fn set_group(&mut self, group: &str) {
        self.group = group.to_string();
    }

    pub fn set_state(&mut self, state: PropertyState) {
        self.state = state;
    }

    pub fn set_timestamp(&mut self, timestamp: &str) {
        self.timestamp = timestamp.to_string();
    }

    /// No-op on lights
    pub fn set_permission(&mut self, permission: Permission) {
        if self.kind() != PropertyKind::Light {
            self.permission = permission;
        }
    }

    /// No-op on lights
    pub fn set_timeout(&mut self, timeout: f64) {
        if self.kind() != PropertyKind::Light {
            self.timeout = timeout;
        }
    }

    pub fn numbers(&self) -> Option<&[NumberElement]> {
        match &self.values {
            PropertyValues::Number(v) => Some(v),
            _ => None,
        }
    }

    pub fn switches(&self) -> Option<&[SwitchElement]> {
        match &self.values {
            PropertyValues::Switch { elements, .. } => Some(elements),
            _ => None,
        }
    }

    pub fn switch_rule(&self) -> Option<SwitchRule> {
        match &self.values {
            PropertyValues::Switch { rule, .. } => Some(*rule),
            _ => None,
        }
    }

    pub fn texts(&self) -> Option<&[TextElement]> {
        match &self.values {
            PropertyValues::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn lights(&self) -> Option<&[LightElement]> {
        match &self.values {
            PropertyValues::Light(v) => Some(v),
            _ => None,
        }
    }

    pub fn blobs(&self) -> Option<&[BlobElement]> {
        match &self.values {
            PropertyValues::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn number(&self, element: &str) -> Option<&NumberElement> {
        self.numbers()?.iter().find(|e| e.name == element)
    }

    pub fn switch(&self, element: &str) -> Option<&SwitchElement> {
        self.switches()?.iter().find(|e| e.name == element)
    }

    pub fn text(&self, element: &str) -> Option<&TextElement> {
        self.texts()?.iter().find(|e| e.name == element)
    }

    pub fn light(&self, element: &str) -> Option<&LightElement> {
        self.lights()?.iter().find(|e| e.name == element)
    }

    pub fn blob(&self, element: &str) -> Option<&BlobElement> {
        self.blobs()?.iter().find(|e| e.name == element)
    }

    /// The first switch that is On
    pub fn find_on_switch(&self) -> Option<&SwitchElement> {
        self.switches()?.iter().find(|e| e.state == SwitchState::On)
    }

    fn missing_element(&self, element: &str) -> IndiError {
        IndiError::invalid(
            &self.device,
            &self.name,
            format!("no {} element named '{}'", self.kind(), element),
        )
    }

    pub fn set_number(&mut self, element: &str, value: f64) -> IndiResult<()> {
        if let PropertyValues::Number(elements) = &mut self.values {
            if let Some(e) = elements.iter_mut().find(|e| e.name == element) {
                e.value = value;
                return Ok(());
            }
        }
        Err(self.missing_element(element))
    }

    pub fn set_text(&mut self, element: &str, text: &str) -> IndiResult<()> {
        if let PropertyValues::Text(elements) = &mut self.values {
            if let Some(e) = elements.iter_mut().find(|e| e.name == element) {
                e.text = text.to_string();
                return Ok(());
            }
        }
        Err(self.missing_element(element))
    }

    pub fn set_switch(&mut self, element: &str, state: SwitchState) -> IndiResult<()> {
        if let PropertyValues::Switch { elements, .. } = &mut self.values {
            if let Some(e) = elements.iter_mut().find(|e| e.name == element) {
                e.state = state;
                return Ok(());
            }
        }
        Err(self.missing_element(element))
    }

    /// Turn `element` On and every other switch Off
    pub fn select_switch(&mut self, element: &str) -> IndiResult<()> {
        if self.switch(element).is_none() {
            return Err(self.missing_element(element));
        }
        if let PropertyValues::Switch { elements, .. } = &mut self.values {
            for e in elements.iter_mut() {
                e.state = if e.name == element {
                    SwitchState::On
                } else {
                    SwitchState::Off
                };
            }
        }
        Ok(())
    }

    /// Turn every switch Off
    pub fn reset_switches(&mut self) {
        if let PropertyValues::Switch { elements, .. } = &mut self.values {
            for e in elements.iter_mut() {
                e.state = SwitchState::Off;
            }
        }
    }

    pub fn set_blob(&mut self, element: &str, data: Vec<u8>, format: &str) -> IndiResult<()> {
        if let PropertyValues::Blob(elements) = &mut self.values {
            if let Some(e) = elements.iter_mut().find(|e| e.name == element) {
                e.set_data(data, format);
                return Ok(());
            }
        }
        Err(self.missing_element(element))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::StreamFramer;
    use pretty_assertions::assert_eq;

    fn parse(xml: &str) -> ProtocolElement {
        let mut framer = StreamFramer::new();
        let mut elements = framer.feed(xml.as_bytes());
        assert_eq!(elements.len(), 1, "expected exactly one element from {}", xml);
        elements.remove(0).unwrap()
    }

    fn focuser_definition() -> ProtocolElement {
        parse(
            "<defNumberVector device='Focuser' name='ABS_FOCUS_POSITION' label='Position' group='Main' state='Idle' perm='rw' timeout='60'>\n\
             <defNumber name='FOCUS_ABSOLUTE_POSITION' label='Steps' format='%6.0f' min='0' max='50000' step='10'>\n\
             1200\n\
             </defNumber>\n\
             </defNumberVector>\n",
        )
    }

    #[test]
    fn test_classify_vector_tag() {
        assert_eq!(
            classify_vector_tag("setBLOBVector"),
            Some((CommandFamily::Set, PropertyKind::Blob))
        );
        assert_eq!(
            classify_vector_tag("defLightVector"),
            Some((CommandFamily::Def, PropertyKind::Light))
        );
        assert_eq!(
            classify_vector_tag("newSwitchVector"),
            Some((CommandFamily::New, PropertyKind::Switch))
        );
        assert_eq!(classify_vector_tag("delProperty"), None);
        assert_eq!(classify_vector_tag("defFooVector"), None);
    }

    #[test]
    fn test_enum_parsing_is_case_insensitive() {
        assert_eq!(PropertyState::parse("busy"), Some(PropertyState::Busy));
        assert_eq!(PropertyState::parse(" ALERT "), Some(PropertyState::Alert));
        assert_eq!(PropertyState::parse("Broken"), None);
        assert_eq!(Permission::parse("RW"), Some(Permission::ReadWrite));
        assert_eq!(Permission::parse("xx"), None);
        assert!(!Permission::ReadOnly.is_writable());
    }

    #[test]
    fn test_define_number_vector() {
        let property = VectorProperty::from_definition(&focuser_definition()).unwrap();
        assert_eq!(property.device(), "Focuser");
        assert_eq!(property.label(), "Position");
        assert_eq!(property.group(), "Main");
        assert_eq!(property.permission(), Permission::ReadWrite);
        assert_eq!(property.timeout(), 60.0);
        let element = property.number("FOCUS_ABSOLUTE_POSITION").unwrap();
        assert_eq!(element.value, 1200.0);
        assert_eq!(element.max, 50000.0);
        assert_eq!(element.format, "%6.0f");
    }

    #[test]
    fn test_define_skips_unnamed_children() {
        let definition = parse(
            "<defTextVector device='D' name='P' perm='ro'>\n\
             <defText name=''>\nignored\n</defText>\n\
             <defText name='KEPT'>\nvalue\n</defText>\n\
             </defTextVector>\n",
        );
        let property = VectorProperty::from_definition(&definition).unwrap();
        assert_eq!(property.values().element_names(), vec!["KEPT"]);
    }

    #[test]
    fn test_define_with_unreadable_number_defaults_to_zero() {
        let definition = parse(
            "<defNumberVector device='Focuser' name='TEMP' state='Idle' perm='ro'>\n\
             <defNumber name='SENSOR_A' format='%.2f'>\nn/a\n</defNumber>\n\
             <defNumber name='SENSOR_B' format='%.2f'>\n12.5\n</defNumber>\n\
             </defNumberVector>\n",
        );
        let property = VectorProperty::from_definition(&definition).unwrap();
        assert_eq!(property.number("SENSOR_A").unwrap().value, 0.0);
        assert_eq!(property.number("SENSOR_B").unwrap().value, 12.5);
    }

    #[test]
    fn test_define_requires_device_and_name() {
        let definition = parse("<defTextVector name='P'>\n<defText name='A'>\nx\n</defText>\n</defTextVector>\n");
        assert!(matches!(
            VectorProperty::from_definition(&definition),
            Err(IndiError::PropertyInvalid { .. })
        ));
    }

    #[test]
    fn test_light_ignores_permission_and_timeout() {
        let definition = parse(
            "<defLightVector device='D' name='STATUS' state='Ok' perm='rw' timeout='5'>\n\
             <defLight name='POWER'>\nOk\n</defLight>\n\
             </defLightVector>\n",
        );
        let mut property = VectorProperty::from_definition(&definition).unwrap();
        assert_eq!(property.permission(), Permission::ReadOnly);
        assert_eq!(property.timeout(), 0.0);
        property.set_permission(Permission::ReadWrite);
        property.set_timeout(10.0);
        assert_eq!(property.permission(), Permission::ReadOnly);
        assert_eq!(property.timeout(), 0.0);
        assert_eq!(property.light("POWER").unwrap().state, PropertyState::Ok);
    }

    #[test]
    fn test_update_applies_state_timeout_then_values() {
        let mut property = VectorProperty::from_definition(&focuser_definition()).unwrap();
        let update = parse(
            "<setNumberVector device='Focuser' name='ABS_FOCUS_POSITION' state='Busy' timeout='30' timestamp='2024-01-01T00:00:00'>\n\
             <oneNumber name='FOCUS_ABSOLUTE_POSITION' max='60000'>\n2400\n</oneNumber>\n\
             <oneNumber name='NOT_THERE'>\n1\n</oneNumber>\n\
             </setNumberVector>\n",
        );
        property.apply_update(&update).unwrap();
        assert_eq!(property.state(), PropertyState::Busy);
        assert_eq!(property.timeout(), 30.0);
        assert_eq!(property.timestamp(), "2024-01-01T00:00:00");
        let element = property.number("FOCUS_ABSOLUTE_POSITION").unwrap();
        assert_eq!(element.value, 2400.0);
        assert_eq!(element.max, 60000.0);
        assert_eq!(element.min, 0.0);
    }

    #[test]
    fn test_update_without_valid_state_is_rejected_untouched() {
        let mut property = VectorProperty::from_definition(&focuser_definition()).unwrap();
        let before = property.clone();
        let update = parse(
            "<setNumberVector device='Focuser' name='ABS_FOCUS_POSITION' state='Sleeping'>\n\
             <oneNumber name='FOCUS_ABSOLUTE_POSITION'>\n10\n</oneNumber>\n\
             </setNumberVector>\n",
        );
        assert!(matches!(
            property.apply_update(&update),
            Err(IndiError::PropertyInvalid { .. })
        ));
        assert_eq!(property, before);
    }

    #[test]
    fn test_update_with_bad_value_rolls_back_everything() {
        let mut property = VectorProperty::from_definition(&focuser_definition()).unwrap();
        let before = property.clone();
        let update = parse(
            "<setNumberVector device='Focuser' name='ABS_FOCUS_POSITION' state='Alert' timeout='1'>\n\
             <oneNumber name='FOCUS_ABSOLUTE_POSITION'>\nnot-a-number\n</oneNumber>\n\
             </setNumberVector>\n",
        );
        assert!(property.apply_update(&update).is_err());
        assert_eq!(property, before);
    }

    #[test]
    fn test_update_kind_mismatch_rejected() {
        let mut property = VectorProperty::from_definition(&focuser_definition()).unwrap();
        let update = parse("<setTextVector device='Focuser' name='ABS_FOCUS_POSITION' state='Ok'/>\n");
        assert!(property.apply_update(&update).is_err());
    }

    #[test]
    fn test_select_switch_is_exclusive() {
        let definition = parse(
            "<defSwitchVector device='Mount' name='TRACK' perm='rw' rule='oneofmany'>\n\
             <defSwitch name='ON'>\nOn\n</defSwitch>\n\
             <defSwitch name='OFF'>\nOff\n</defSwitch>\n\
             </defSwitchVector>\n",
        );
        let mut property = VectorProperty::from_definition(&definition).unwrap();
        assert_eq!(property.switch_rule(), Some(SwitchRule::OneOfMany));
        assert_eq!(property.find_on_switch().unwrap().name, "ON");
        property.select_switch("OFF").unwrap();
        assert_eq!(property.find_on_switch().unwrap().name, "OFF");
        assert_eq!(property.switch("ON").unwrap().state, SwitchState::Off);
        assert!(property.select_switch("MISSING").is_err());
        property.reset_switches();
        assert!(property.find_on_switch().is_none());
    }

    #[test]
    fn test_local_setters_check_kind() {
        let mut property = VectorProperty::from_definition(&focuser_definition()).unwrap();
        property.set_number("FOCUS_ABSOLUTE_POSITION", 99.0).unwrap();
        assert_eq!(property.number("FOCUS_ABSOLUTE_POSITION").unwrap().value, 99.0);
        assert!(property.set_text("FOCUS_ABSOLUTE_POSITION", "x").is_err());
        assert!(property.set_number("OTHER", 1.0).is_err());
    }
}
