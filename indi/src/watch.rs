//! Watch list and BLOB handling policy

use crate::device::Device;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// BLOB handling policy, as sent in `enableBLOB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlobHandling {
    /// No BLOB traffic
    Never,
    /// BLOBs interleaved with everything else
    #[default]
    Also,
    /// Only BLOB vectors
    Only,
}

impl BlobHandling {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        [Self::Never, Self::Also, Self::Only]
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlobHandling::Never => "Never",
            BlobHandling::Also => "Also",
            BlobHandling::Only => "Only",
        }
    }
}

impl fmt::Display for BlobHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-shot callback fired the first time a watched device is created
pub type DeviceCallback = Box<dyn FnOnce(&Device) + Send + Sync>;

#[derive(Default)]
struct WatchEntry {
    /// Empty means the whole device
    properties: IndexSet<String>,
    callback: Option<DeviceCallback>,
}

/// Which devices and properties the client mirrors
///
/// An empty list accepts everything.
#[derive(Default)]
pub struct WatchList {
    entries: IndexMap<String, WatchEntry>,
}

impl fmt::Debug for WatchList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(d, e)| (d, &e.properties)))
            .finish()
    }
}

impl WatchList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch every property of `device`
    pub fn watch_device(&mut self, device: &str) {
        self.entries.entry(device.to_string()).or_default();
    }

    /// Watch `device` and run `callback` once when it is first created
    pub fn watch_device_with_callback(&mut self, device: &str, callback: DeviceCallback) {
        self.entries.entry(device.to_string()).or_default().callback = Some(callback);
    }

    /// Narrow the watch on `device` to named properties
    pub fn watch_property(&mut self, device: &str, property: &str) {
        self.entries
            .entry(device.to_string())
            .or_default()
            .properties
            .insert(property.to_string());
    }

    /// Returns false if the device was not watched
    pub fn unwatch(&mut self, device: &str) -> bool {
        self.entries.shift_remove(device).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Property filter for `device`; empty when the whole device is watched
    pub fn properties(&self, device: &str) -> impl Iterator<Item = &str> {
        self.entries
            .get(device)
            .into_iter()
            .flat_map(|e| e.properties.iter().map(String::as_str))
    }

    pub fn accepts_device(&self, device: &str) -> bool {
        self.entries.is_empty() || self.entries.contains_key(device)
    }

    pub fn accepts_property(&self, device: &str, property: &str) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        match self.entries.get(device) {
            Some(entry) => entry.properties.is_empty() || entry.properties.contains(property),
            None => false,
        }
    }

    pub(crate) fn take_callback(&mut self, device: &str) -> Option<DeviceCallback> {
        self.entries.get_mut(device)?.callback.take()
    }
}

/// BLOB policy keyed by device and optional property
///
/// Property-less entries are the device-wide default; anything unset
/// resolves to [`BlobHandling::Also`].
#[derive(Debug, Clone, Default)]
pub struct BlobModes {
    modes: IndexMap<(String, Option<String>), BlobHandling>,
}

impl BlobModes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, device: &str, property: Option<&str>, mode: BlobHandling) {
        self.modes
            .insert((device.to_string(), property.map(str::to_string)), mode);
    }

    pub fn resolve(&self, device: &str, property: Option<&str>) -> BlobHandling {
        property
            .and_then(|p| self.modes.get(&(device.to_string(), Some(p.to_string()))))
            .or_else(|| self.modes.get(&(device.to_string(), None)))
            .copied()
            .unwrap_or_default()
    }

    /// Every explicit entry, in the order it was first set
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>, BlobHandling)> {
        self.modes
            .iter()
            .map(|((device, property), mode)| (device.as_str(), property.as_deref(), *mode))
    }

    pub fn clear(&mut self) {
        self.modes.clear();
    }
}
