use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Marker value the log API reports at the end of a segment.
pub const END_OF_SEGMENT: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkerError {
    #[error("malformed marker '{marker}': {reason}")]
    Malformed { marker: String, reason: String },
}

/// Opaque read position inside one log file, serialized as `segment:offset`.
///
/// Two values are special: the empty marker means "no position yet" (the API
/// then returns the most recent line), and `"0"` means "end of segment, no
/// known offset". Anything else is trusted verbatim when the server reports it
/// and only parsed when arithmetic is needed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker(String);

/// Parsed `segment:offset` pair borrowed from a [`Marker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position<'a> {
    pub segment: &'a str,
    pub offset: u64,
}

impl Marker {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn unset() -> Self {
        Self(String::new())
    }

    pub fn end_of_segment() -> Self {
        Self(END_OF_SEGMENT.to_string())
    }

    pub fn at(segment: &str, offset: u64) -> Self {
        Self(format!("{}:{}", segment, offset))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unset(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_end_of_segment(&self) -> bool {
        self.0 == END_OF_SEGMENT
    }

    /// Split into `segment:offset`, failing unless there is exactly one colon
    /// and the offset is a non-negative integer.
    pub fn position(&self) -> Result<Position<'_>, MarkerError> {
        let mut parts = self.0.split(':');
        let (segment, offset) = match (parts.next(), parts.next(), parts.next()) {
            (Some(segment), Some(offset), None) => (segment, offset),
            _ => {
                return Err(self.malformed("expected exactly one ':' separating segment and offset"))
            }
        };

        let offset = offset
            .parse::<u64>()
            .map_err(|e| self.malformed(&format!("offset '{}' is not a byte count: {}", offset, e)))?;

        Ok(Position { segment, offset })
    }

    /// Segment component, if the marker carries one.
    pub fn segment(&self) -> Option<&str> {
        self.position().ok().map(|p| p.segment)
    }

    /// Byte offset this marker starts reading from. The end-of-segment and
    /// unset markers both read from the start of the file.
    pub fn start_offset(&self) -> Result<u64, MarkerError> {
        if self.is_unset() || self.is_end_of_segment() {
            return Ok(0);
        }
        self.position().map(|p| p.offset)
    }

    /// Advance the offset by `n` bytes, keeping the segment unchanged.
    pub fn add(&self, n: u64) -> Result<Marker, MarkerError> {
        let position = self.position()?;
        let offset = position
            .offset
            .checked_add(n)
            .ok_or_else(|| self.malformed("offset overflow"))?;
        Ok(Marker::at(position.segment, offset))
    }

    fn malformed(&self, reason: &str) -> MarkerError {
        MarkerError::Malformed {
            marker: self.0.clone(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Marker {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Marker {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
