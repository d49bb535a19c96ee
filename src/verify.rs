//! Payload verification
//!
//! A fetched payload must be non-empty and, when required, a structurally complete
//! image. If the item carries a SHA-256 checksum the payload must match it as well.
//! The image check looks at container framing only - signature plus end marker - which
//! is what catches truncated and garbled transfers without decoding pixels.

use crate::config::VerifyConfig;
use sha2::{Digest, Sha256};

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
/// Length (0) + type + CRC of the IEND chunk that terminates every PNG
const PNG_IEND: &[u8] = b"\x00\x00\x00\x00IEND\xae\x42\x60\x82";
const JPEG_SOI: &[u8] = &[0xFF, 0xD8, 0xFF];
const JPEG_EOI: &[u8] = &[0xFF, 0xD9];

/// Recognised image container
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    /// Portable Network Graphics
    Png,
    /// JPEG/JFIF
    Jpeg,
    /// GIF87a / GIF89a
    Gif,
    /// RIFF WebP
    WebP,
}

/// Why a payload was rejected
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Zero-length payload
    #[error("payload is empty")]
    Empty,
    /// No known image signature
    #[error("payload is not a recognised image")]
    UnknownFormat,
    /// Recognised image with missing trailer or wrong declared size
    #[error("{format:?} payload is truncated or malformed")]
    Truncated {
        /// Detected container
        format: ImageFormat,
    },
    /// SHA-256 does not match the catalog value
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected lowercase hex digest
        expected: String,
        /// Actual lowercase hex digest
        actual: String,
    },
}

/// Verification gate applied to every fetched payload
#[derive(Clone, Debug, Default)]
pub struct PayloadVerifier {
    config: VerifyConfig,
}

impl PayloadVerifier {
    /// Create a verifier
    #[must_use]
    pub fn new(config: VerifyConfig) -> Self {
        Self { config }
    }

    /// Check a payload, optionally against an expected SHA-256 (lowercase hex)
    pub fn verify(&self, payload: &[u8], checksum: Option<&str>) -> Result<(), Rejection> {
        if payload.is_empty() {
            return Err(Rejection::Empty);
        }

        if self.config.require_image {
            check_image(payload)?;
        }

        if let Some(expected) = checksum {
            let actual = sha256_hex(payload);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(Rejection::ChecksumMismatch {
                    expected: expected.to_ascii_lowercase(),
                    actual,
                });
            }
        }

        Ok(())
    }
}

/// Lowercase hex SHA-256 of a payload
pub fn sha256_hex(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

/// Detect the container format from its leading signature
pub fn detect_format(payload: &[u8]) -> Option<ImageFormat> {
    if payload.starts_with(PNG_SIGNATURE) {
        Some(ImageFormat::Png)
    } else if payload.starts_with(JPEG_SOI) {
        Some(ImageFormat::Jpeg)
    } else if payload.starts_with(b"GIF87a") || payload.starts_with(b"GIF89a") {
        Some(ImageFormat::Gif)
    } else if payload.len() >= 12 && &payload[0..4] == b"RIFF" && &payload[8..12] == b"WEBP" {
        Some(ImageFormat::WebP)
    } else {
        None
    }
}

fn check_image(payload: &[u8]) -> Result<ImageFormat, Rejection> {
    let format = detect_format(payload).ok_or(Rejection::UnknownFormat)?;

    let complete = match format {
        ImageFormat::Png => payload.len() > PNG_SIGNATURE.len() && payload.ends_with(PNG_IEND),
        ImageFormat::Jpeg => payload.len() > JPEG_SOI.len() && payload.ends_with(JPEG_EOI),
        ImageFormat::Gif => payload.len() > 13 && payload.last() == Some(&0x3B),
        ImageFormat::WebP => {
            // RIFF size field covers everything after the first 8 bytes
            let declared = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
            declared as usize + 8 == payload.len()
        }
    };

    if complete {
        Ok(format)
    } else {
        Err(Rejection::Truncated { format })
    }
}
