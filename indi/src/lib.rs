//! INDI Protocol Client
//!
//! Client-side engine for the INDI astronomical instrument protocol.
//!
//! ## Features
//!
//! - Incremental framing of the line-oriented XML stream, BLOB payload lines included
//! - Typed vector properties with atomic updates and range/permission checks
//! - Device registry with watch-list filtering and per-device message logs
//! - Synchronous [`Dispatcher`] usable without any I/O
//! - Async [`IndiClient`] with reader/writer tasks, parse timeouts, keepalive
//!   pings and reconnection with exponential backoff and jitter
//! - BLOB policy (`enableBLOB`) per device or property, zlib-compressed payloads

mod client;
pub mod command;
pub mod device;
pub mod dispatcher;
pub mod element;
mod error;
pub mod framer;
pub mod property;
pub mod protocol;
pub mod watch;

pub use client::{ClientConfig, IndiClient, IndiEvent, ReconnectionConfig};
pub use device::Device;
pub use dispatcher::{ClientObserver, DispatchOutcome, Dispatcher, NoopObserver};
pub use element::ProtocolElement;
pub use error::{FramingError, IndiError, IndiResult};
pub use framer::StreamFramer;
pub use property::{
    BlobElement, LightElement, NumberElement, Permission, PropertyKind, PropertyState,
    PropertyValues, SwitchElement, SwitchRule, SwitchState, TextElement, VectorProperty,
};
pub use protocol::{standard_properties, DriverInterface, INDI_PROTOCOL_VERSION};
pub use watch::{BlobHandling, BlobModes, DeviceCallback, WatchList};

use serde::Deserialize;
use std::time::Duration;

/// Default INDI server port
pub const INDI_DEFAULT_PORT: u16 = 7624;

/// Timeout configuration for INDI operations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndiTimeoutConfig {
    /// Connection timeout for initial TCP connection (default: 30 seconds)
    pub connection_timeout_secs: u64,
    /// Timeout for completing a partial element (default: 60 seconds)
    /// If an element is not completed within this time, the parser resets
    pub message_timeout_secs: u64,
    /// Same, while a BLOB element is being received (default: 300 seconds)
    pub blob_timeout_secs: u64,
    /// Default wait for property responses (default: 30 seconds)
    pub property_timeout_secs: u64,
    /// Property state polling interval (default: 500ms)
    pub property_poll_interval_ms: u64,
    /// Connection keepalive interval (default: 30 seconds)
    pub keepalive_interval_secs: u64,
}

impl Default for IndiTimeoutConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 30,
            message_timeout_secs: 60,
            blob_timeout_secs: 300,
            property_timeout_secs: 30,
            property_poll_interval_ms: 500,
            keepalive_interval_secs: 30,
        }
    }
}

impl IndiTimeoutConfig {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_secs)
    }

    pub fn blob_timeout(&self) -> Duration {
        Duration::from_secs(self.blob_timeout_secs)
    }

    pub fn property_timeout(&self) -> Duration {
        Duration::from_secs(self.property_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

/// Timeout error with context
#[derive(Debug, Clone, thiserror::Error)]
#[error("Operation timeout for device '{device}', property '{property}': {context}")]
pub struct IndiTimeoutError {
    pub device: String,
    pub property: String,
    pub context: String,
    /// State seen on the last poll, `None` if the property never appeared
    pub last_state: Option<PropertyState>,
}
