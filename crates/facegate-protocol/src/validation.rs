//! Pure validators and sanitizers for device-supplied data.
//!
//! Everything a terminal sends is attacker-controlled until proven
//! otherwise: serials become registry and database keys, free-form strings
//! land in storage, and image payloads end up as files on disk. The
//! functions here are deterministic and side-effect free so each rule can
//! be unit tested in isolation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use facegate_core::constants::{JPEG_MAGIC, MAX_FIELD_LEN, MAX_IMAGE_BYTES};
use facegate_core::{Error, Result, SerialNumber};

/// Validate and normalize a raw serial number.
///
/// # Errors
/// Returns `Error::InvalidSerial` for empty, oversized, or
/// forbidden-character serials.
pub fn validate_serial(raw: &str) -> Result<SerialNumber> {
    SerialNumber::new(raw)
}

/// Trim and truncate a free-form device string to the storage cap.
///
/// Truncation respects char boundaries; a clamped string is stored, never
/// rejected — devices routinely pad fields with junk.
#[must_use]
pub fn clamp_field(raw: &str) -> String {
    clamp_field_to(raw, MAX_FIELD_LEN)
}

/// Trim and truncate to an explicit cap.
#[must_use]
pub fn clamp_field_to(raw: &str, max: usize) -> String {
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

/// Validate a base64 event photo and return the decoded bytes.
///
/// Checks, in order: encoded length ceiling (cheap pre-check before any
/// allocation), base64 decode, decoded length ceiling, JPEG magic prefix.
///
/// # Errors
/// Returns `Error::InvalidImage` describing the first failed check.
pub fn validate_image(encoded: &str) -> Result<Vec<u8>> {
    // base64 expands ~4/3; anything past this cannot decode under the cap.
    let encoded_ceiling = MAX_IMAGE_BYTES / 3 * 4 + 4;
    if encoded.len() > encoded_ceiling {
        return Err(Error::InvalidImage(format!(
            "encoded image {} bytes exceeds ceiling {encoded_ceiling}",
            encoded.len()
        )));
    }

    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| Error::InvalidImage(format!("base64 decode failed: {e}")))?;

    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(Error::InvalidImage(format!(
            "decoded image {} bytes exceeds ceiling {MAX_IMAGE_BYTES}",
            bytes.len()
        )));
    }
    if bytes.len() < JPEG_MAGIC.len() || bytes[..JPEG_MAGIC.len()] != JPEG_MAGIC {
        return Err(Error::InvalidImage("missing JPEG magic".to_string()));
    }
    Ok(bytes)
}

/// Build an image file name from sanitized components only.
///
/// The serial is already validated; the enrollment id and timestamp are
/// reduced to `[A-Za-z0-9_-]`, everything else mapped to `-`. Client input
/// can therefore never contribute path separators or dots.
#[must_use]
pub fn image_file_name(serial: &SerialNumber, enroll_id: &str, time: &str) -> String {
    format!(
        "{}_{}_{}.jpg",
        serial.as_str(),
        sanitize_component(enroll_id),
        sanitize_component(time)
    )
}

fn sanitize_component(raw: &str) -> String {
    raw.trim()
        .chars()
        .take(MAX_FIELD_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
