use crate::{Result, constants::MAX_SERIAL_LEN, error::Error};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Device serial number — the protocol identity of a terminal.
///
/// Serial numbers arrive inside untrusted JSON and end up as registry keys,
/// database keys, and image file name components, so the accepted alphabet
/// is deliberately narrow: letters, digits, `_` and `-`, at most
/// [`MAX_SERIAL_LEN`] characters, surrounding whitespace trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialNumber(String);

impl SerialNumber {
    /// Create a serial number with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidSerial` if the trimmed value is empty, longer
    /// than [`MAX_SERIAL_LEN`] characters, or contains characters outside
    /// `[A-Za-z0-9_-]`.
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidSerial("empty serial".to_string()));
        }
        if trimmed.len() > MAX_SERIAL_LEN {
            return Err(Error::InvalidSerial(format!(
                "serial exceeds {MAX_SERIAL_LEN} chars ({} given)",
                trimmed.len()
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::InvalidSerial(format!(
                "serial contains forbidden characters: {trimmed}"
            )));
        }
        Ok(SerialNumber(trimmed.to_string()))
    }

    /// Get the serial as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SerialNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SerialNumber::new(s)
    }
}

/// Server clock value for `cloudtime` reply fields.
///
/// Devices use this to discipline their RTC. Device-supplied event
/// timestamps are NOT parsed into this type; they stay opaque strings all
/// the way into storage (the dedup key compares them verbatim).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudTime(DateTime<Local>);

impl CloudTime {
    /// Capture the current local time.
    #[must_use]
    pub fn now() -> Self {
        CloudTime(Local::now())
    }

    /// Create from an existing DateTime.
    #[must_use]
    pub fn from_datetime(dt: DateTime<Local>) -> Self {
        CloudTime(dt)
    }

    /// Format for the wire: `YYYY-MM-DD HH:MM:SS`.
    #[must_use]
    pub fn format(&self) -> String {
        self.0.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// Get the inner DateTime reference.
    #[must_use]
    pub fn inner(&self) -> &DateTime<Local> {
        &self.0
    }
}

impl fmt::Display for CloudTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}
