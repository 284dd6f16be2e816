//! INDI error types
//!
//! Provides structured error types for the protocol engine and the client.
//! Property level errors reject a single command and never tear down the
//! connection; only transport errors are connection-fatal.

use std::time::Duration;

/// Errors raised by the stream framer
///
/// The framer resets its open-tag stack after returning any of these, so the
/// next line is parsed from a clean state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// A close tag did not match the innermost open tag
    #[error("mismatched close tag: expected </{expected}>, found </{found}>")]
    MismatchedClose { expected: String, found: String },
    /// A close tag arrived while no element was open
    #[error("unexpected close tag </{0}> at top level")]
    UnexpectedClose(String),
    /// A tag could not be tokenized
    #[error("malformed tag: {0}")]
    MalformedTag(String),
    /// Non-whitespace text outside of any element
    #[error("stray text outside of an element: {0}")]
    StrayText(String),
    /// A markup line was not valid UTF-8
    #[error("markup line is not valid UTF-8 ({0} bytes)")]
    InvalidUtf8(usize),
}

/// INDI client errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum IndiError {
    // =========================================================================
    // PROTOCOL ENGINE
    // =========================================================================
    /// A command referenced a device the client does not know
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    /// Malformed attributes, state strings or element values
    #[error("Invalid property {device}.{property}: {reason}")]
    PropertyInvalid {
        device: String,
        property: String,
        reason: String,
    },
    /// Redefinition of an existing property, or an unsolicited getProperties
    #[error("Property already defined: {device}.{property}")]
    PropertyDuplicated { device: String, property: String },
    /// A tag the dispatcher has no route for
    #[error("Unroutable command <{0}>")]
    DispatchError(String),
    /// Malformed markup boundaries
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),
    /// base64 or zlib failure while decoding a BLOB element
    #[error("BLOB decode failed for {device}.{property}.{element}: {reason}")]
    BlobDecode {
        device: String,
        property: String,
        element: String,
        reason: String,
    },

    // =========================================================================
    // CLIENT
    // =========================================================================
    /// Property not found
    #[error("Property not found: {device}.{property}")]
    PropertyNotFound { device: String, property: String },
    /// Attempted to write to a read-only property, or to a light
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// Property value out of range
    #[error("Value {value} out of range [{min}, {max}] for {device}.{property}.{element}")]
    ValueOutOfRange {
        device: String,
        property: String,
        element: String,
        value: f64,
        min: f64,
        max: f64,
    },
    /// Connection to INDI server failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// Connection timeout with context
    #[error("Connection timeout: failed to connect to {host}:{port} after {duration:?}")]
    ConnectionTimeout {
        host: String,
        port: u16,
        duration: Duration,
    },
    /// Not connected to server
    #[error("Not connected to INDI server")]
    NotConnected,
    /// Send channel closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
    /// Reconnection failed after max attempts
    #[error("Reconnection failed after {attempts} attempts: {last_error}")]
    ReconnectionFailed { attempts: u32, last_error: String },
}

impl IndiError {
    pub(crate) fn invalid(device: &str, property: &str, reason: impl Into<String>) -> Self {
        IndiError::PropertyInvalid {
            device: device.to_string(),
            property: property.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that only reject the offending command
    pub fn is_command_level(&self) -> bool {
        matches!(
            self,
            IndiError::DeviceNotFound(_)
                | IndiError::PropertyInvalid { .. }
                | IndiError::PropertyDuplicated { .. }
                | IndiError::DispatchError(_)
                | IndiError::Framing(_)
                | IndiError::BlobDecode { .. }
                | IndiError::PropertyNotFound { .. }
        )
    }
}

impl From<IndiError> for String {
    fn from(err: IndiError) -> String {
        err.to_string()
    }
}

/// Result type for INDI operations
pub type IndiResult<T> = Result<T, IndiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndiError::ConnectionFailed("connection refused".to_string());
        assert_eq!(err.to_string(), "Connection failed: connection refused");

        let err = IndiError::PropertyNotFound {
            device: "CCD Simulator".to_string(),
            property: "CCD_EXPOSURE".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Property not found: CCD Simulator.CCD_EXPOSURE"
        );

        let err = IndiError::ValueOutOfRange {
            device: "Focuser".to_string(),
            property: "ABS_FOCUS_POSITION".to_string(),
            element: "FOCUS_ABSOLUTE_POSITION".to_string(),
            value: 100000.0,
            min: 0.0,
            max: 50000.0,
        };
        assert!(err.to_string().contains("100000"));
        assert!(err.to_string().contains("50000"));
    }

    #[test]
    fn test_error_to_string_conversion() {
        let err = IndiError::NotConnected;
        let s: String = err.into();
        assert_eq!(s, "Not connected to INDI server");
    }

    #[test]
    fn test_connection_timeout_display() {
        let err = IndiError::ConnectionTimeout {
            host: "192.168.1.100".to_string(),
            port: 7624,
            duration: Duration::from_secs(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("192.168.1.100"));
        assert!(msg.contains("7624"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn test_framing_error_wraps() {
        let err: IndiError = FramingError::MismatchedClose {
            expected: "defTextVector".to_string(),
            found: "defNumberVector".to_string(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.starts_with("Framing error"));
        assert!(msg.contains("</defTextVector>"));
        assert!(err.is_command_level());
    }

    #[test]
    fn test_blob_decode_display() {
        let err = IndiError::BlobDecode {
            device: "CCD Simulator".to_string(),
            property: "CCD1".to_string(),
            element: "CCD1".to_string(),
            reason: "invalid base64".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("CCD Simulator.CCD1.CCD1"));
        assert!(msg.contains("invalid base64"));
    }

    #[test]
    fn test_transport_errors_are_not_command_level() {
        assert!(!IndiError::NotConnected.is_command_level());
        assert!(!IndiError::ChannelClosed("gone".to_string()).is_command_level());
        assert!(IndiError::DeviceNotFound("Mount".to_string()).is_command_level());
    }
}
