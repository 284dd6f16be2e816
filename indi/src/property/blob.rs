use super::Element;
use crate::element::ProtocolElement;
use crate::error::{IndiError, IndiResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Format suffix marking a zlib-compressed payload
const COMPRESSED_SUFFIX: &str = ".z";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlobElement {
    pub name: String,
    pub label: String,
    /// File-extension-like tag such as `.fits`, without any `.z` suffix
    pub format: String,
    pub data: Vec<u8>,
    /// Decoded (and inflated) byte count
    pub size: usize,
    /// base64 length of the last payload on the wire
    pub enclen: usize,
}

impl BlobElement {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_string(),
            ..Default::default()
        }
    }

    /// Replace the payload for an outbound command
    pub fn set_data(&mut self, data: Vec<u8>, format: &str) {
        self.size = data.len();
        self.enclen = data.len().div_ceil(3) * 4;
        self.data = data;
        self.format = format.to_string();
    }
}

/// A successfully decoded `oneBLOB` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlob {
    pub format: String,
    pub data: Vec<u8>,
    pub enclen: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BlobDecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("zlib inflate failed: {0}")]
    Inflate(#[from] std::io::Error),
}

/// Decode a base64 payload, inflating it when `format` ends in `.z`
///
/// Whitespace inside the payload is ignored. On success the returned format
/// has the compression suffix stripped.
pub fn decode_blob(format: &str, encoded: &[u8]) -> Result<DecodedBlob, BlobDecodeError> {
    let cleaned: Vec<u8> = encoded
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let decoded = BASE64.decode(&cleaned)?;

    match format.strip_suffix(COMPRESSED_SUFFIX) {
        Some(plain) => {
            let mut inflated = Vec::new();
            ZlibDecoder::new(decoded.as_slice()).read_to_end(&mut inflated)?;
            Ok(DecodedBlob {
                format: plain.to_string(),
                data: inflated,
                enclen: cleaned.len(),
            })
        }
        None => Ok(DecodedBlob {
            format: format.to_string(),
            data: decoded,
            enclen: cleaned.len(),
        }),
    }
}

pub fn encode_blob(data: &[u8]) -> String {
    BASE64.encode(data)
}

impl Element for BlobElement {
    type Update = DecodedBlob;

    fn name(&self) -> &str {
        &self.name
    }

    fn from_definition(child: &ProtocolElement, _device: &str, _property: &str) -> IndiResult<Self> {
        let name = child.name().unwrap_or_default();
        Ok(Self {
            label: child.non_empty_attribute("label").unwrap_or(name).to_string(),
            format: child.attribute("format").unwrap_or_default().to_string(),
            ..Self::new(name)
        })
    }

    fn stage_update(
        &self,
        child: &ProtocolElement,
        device: &str,
        property: &str,
    ) -> IndiResult<Option<DecodedBlob>> {
        let format = child.attribute("format").ok_or_else(|| {
            IndiError::invalid(device, property, format!("{}: missing format", self.name))
        })?;
        let size: usize = child
            .attribute("size")
            .and_then(|raw| raw.trim().parse().ok())
            .ok_or_else(|| {
                IndiError::invalid(device, property, format!("{}: missing or invalid size", self.name))
            })?;
        if size == 0 {
            return Ok(None);
        }

        let encoded = if child.payload.is_empty() {
            child.text().as_bytes()
        } else {
            child.payload.as_slice()
        };
        decode_blob(format, encoded)
            .map(Some)
            .map_err(|e| IndiError::BlobDecode {
                device: device.to_string(),
                property: property.to_string(),
                element: self.name.clone(),
                reason: e.to_string(),
            })
    }

    fn commit_update(&mut self, update: DecodedBlob) {
        self.size = update.data.len();
        self.enclen = update.enclen;
        self.format = update.format;
        self.data = update.data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_decode_plain() {
        let decoded = decode_blob(".fits", b"SGVsbG8=").unwrap();
        assert_eq!(decoded.data, b"Hello".to_vec());
        assert_eq!(decoded.format, ".fits");
        assert_eq!(decoded.enclen, 8);
    }

    #[test]
    fn test_decode_compressed_strips_suffix() {
        let original: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let encoded = encode_blob(&compress(&original));
        let decoded = decode_blob(".fits.z", encoded.as_bytes()).unwrap();
        assert_eq!(decoded.data.len(), original.len());
        assert_eq!(decoded.data, original);
        assert_eq!(decoded.format, ".fits");
    }

    #[test]
    fn test_decode_ignores_whitespace() {
        let decoded = decode_blob(".txt", b"  SGVs\r\nbG8=  ").unwrap();
        assert_eq!(decoded.data, b"Hello".to_vec());
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(
            decode_blob(".fits", b"not*base64!"),
            Err(BlobDecodeError::Base64(_))
        ));
        let not_zlib = encode_blob(b"plain bytes, no zlib header");
        assert!(matches!(
            decode_blob(".fits.z", not_zlib.as_bytes()),
            Err(BlobDecodeError::Inflate(_))
        ));
    }

    #[test]
    fn test_set_data_tracks_lengths() {
        let mut blob = BlobElement::new("CCD1");
        blob.set_data(vec![1, 2, 3, 4], ".raw");
        assert_eq!(blob.size, 4);
        assert_eq!(blob.enclen, 8);
        assert_eq!(encode_blob(&blob.data).len(), blob.enclen);
    }
}
