use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EncodeError;

/// Width of the job name segment of a frame header, in bytes.
pub const JOB_NAME_WIDTH: usize = 8;

/// Byte used to right-pad job names up to [`JOB_NAME_WIDTH`].
pub const FILL_BYTE: u8 = b' ';

/// Width of the correlation id segment of a frame header, in bytes.
pub const CORRELATION_ID_WIDTH: usize = 8;

/// Total header width: job name followed by correlation id.
pub const HEADER_WIDTH: usize = JOB_NAME_WIDTH + CORRELATION_ID_WIDTH;

/// Identifies one in-flight request so its response can be matched.
///
/// Encoded as a big-endian `u64` in frame headers and as a plain JSON
/// number in response bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn to_be_bytes(self) -> [u8; CORRELATION_ID_WIDTH] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; CORRELATION_ID_WIDTH]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl From<u64> for CorrelationId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated job name.
///
/// Must be non-empty, at most [`JOB_NAME_WIDTH`] bytes of UTF-8, and
/// free of the fill byte and control characters. The fill byte is
/// stripped on decode, so a name containing it would not survive the
/// trip through a frame header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobName(String);

impl JobName {
    pub fn new(name: impl Into<String>) -> Result<Self, EncodeError> {
        let name = name.into();

        if name.is_empty() {
            return Err(EncodeError::EmptyJobName);
        }
        if name.len() > JOB_NAME_WIDTH {
            return Err(EncodeError::JobNameTooLong {
                name,
                max: JOB_NAME_WIDTH,
            });
        }
        if name
            .bytes()
            .any(|b| b == FILL_BYTE || b.is_ascii_control())
        {
            return Err(EncodeError::InvalidJobName(name));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name right-padded with [`FILL_BYTE`] to the header width.
    pub fn padded(&self) -> [u8; JOB_NAME_WIDTH] {
        let mut out = [FILL_BYTE; JOB_NAME_WIDTH];
        out[..self.0.len()].copy_from_slice(self.0.as_bytes());
        out
    }
}

impl TryFrom<&str> for JobName {
    type Error = EncodeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<str> for JobName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
