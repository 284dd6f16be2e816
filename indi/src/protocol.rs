//! INDI protocol definitions

use std::fmt;

/// INDI protocol version sent with getProperties
pub const INDI_PROTOCOL_VERSION: &str = "1.7";

/// Command and element tag names
pub mod tags {
    pub const GET_PROPERTIES: &str = "getProperties";
    pub const DEL_PROPERTY: &str = "delProperty";
    pub const MESSAGE: &str = "message";
    pub const ENABLE_BLOB: &str = "enableBLOB";
    pub const PING_REQUEST: &str = "pingRequest";
    pub const PING_REPLY: &str = "pingReply";

    pub const DEF_BLOB_VECTOR: &str = "defBLOBVector";
    pub const SET_BLOB_VECTOR: &str = "setBLOBVector";
    pub const NEW_BLOB_VECTOR: &str = "newBLOBVector";
    pub const ONE_BLOB: &str = "oneBLOB";
}

/// Standard INDI properties
pub mod standard_properties {
    /// Connection control switch
    pub const CONNECTION: &str = "CONNECTION";
    pub const CONNECT: &str = "CONNECT";
    pub const DISCONNECT: &str = "DISCONNECT";

    /// Driver identification text vector
    pub const DRIVER_INFO: &str = "DRIVER_INFO";
    pub const DRIVER_NAME: &str = "DRIVER_NAME";
    pub const DRIVER_EXEC: &str = "DRIVER_EXEC";
    pub const DRIVER_VERSION: &str = "DRIVER_VERSION";
    pub const DRIVER_INTERFACE: &str = "DRIVER_INTERFACE";
}

/// Bit set advertised by a driver in `DRIVER_INFO.DRIVER_INTERFACE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DriverInterface(u16);

impl DriverInterface {
    pub const GENERAL: Self = Self(0);
    pub const TELESCOPE: Self = Self(1 << 0);
    pub const CCD: Self = Self(1 << 1);
    pub const GUIDER: Self = Self(1 << 2);
    pub const FOCUSER: Self = Self(1 << 3);
    pub const FILTER: Self = Self(1 << 4);
    pub const DOME: Self = Self(1 << 5);
    pub const GPS: Self = Self(1 << 6);
    pub const WEATHER: Self = Self(1 << 7);
    pub const ADAPTIVE_OPTICS: Self = Self(1 << 8);
    pub const DUSTCAP: Self = Self(1 << 9);
    pub const LIGHTBOX: Self = Self(1 << 10);
    pub const DETECTOR: Self = Self(1 << 11);
    pub const ROTATOR: Self = Self(1 << 12);
    pub const SPECTROGRAPH: Self = Self(1 << 13);
    pub const CORRELATOR: Self = Self(1 << 14);
    pub const AUX: Self = Self(1 << 15);
    pub const SENSOR: Self = Self(Self::SPECTROGRAPH.0 | Self::DETECTOR.0 | Self::CORRELATOR.0);

    const NAMES: [&'static str; 16] = [
        "Telescope",
        "CCD",
        "Guider",
        "Focuser",
        "Filter",
        "Dome",
        "GPS",
        "Weather",
        "AdaptiveOptics",
        "Dustcap",
        "LightBox",
        "Detector",
        "Rotator",
        "Spectrograph",
        "Correlator",
        "Aux",
    ];

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// True if every bit of `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Names of the set bits, lowest bit first
    pub fn names(self) -> Vec<&'static str> {
        (0..16)
            .filter(|bit| self.0 & (1 << bit) != 0)
            .map(|bit| Self::NAMES[bit])
            .collect()
    }
}

impl std::ops::BitOr for DriverInterface {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for DriverInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("General");
        }
        f.write_str(&self.names().join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_interface_names() {
        let iface = DriverInterface::from_bits(6);
        assert!(iface.contains(DriverInterface::CCD));
        assert!(iface.contains(DriverInterface::GUIDER));
        assert!(!iface.contains(DriverInterface::TELESCOPE));
        assert_eq!(iface.names(), vec!["CCD", "Guider"]);
        assert_eq!(iface.to_string(), "CCD|Guider");
    }

    #[test]
    fn test_driver_interface_sensor_and_general() {
        assert!(DriverInterface::SENSOR.contains(DriverInterface::DETECTOR));
        assert_eq!(DriverInterface::GENERAL.to_string(), "General");
        let combined = DriverInterface::TELESCOPE | DriverInterface::GPS;
        assert_eq!(combined.bits(), 0b100_0001);
    }
}
