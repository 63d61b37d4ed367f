//! DeviceId: identifies the peer that wrote a remote document.
//!
//! Wraps a u64 internally but displays as a 16-character hex string.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceIdError {
    #[error("Invalid device ID format: expected 16 hex chars")]
    InvalidFormat,
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] std::num::ParseIntError),
}

/// A unique identifier for a device running a syncer.
///
/// # Examples
/// ```
/// use vault_sync::DeviceId;
///
/// let parsed: DeviceId = "a1b2c3d4e5f67890".parse().unwrap();
/// assert_eq!(parsed.as_u64(), 0xa1b2c3d4e5f67890);
/// assert_eq!(parsed.to_string(), "a1b2c3d4e5f67890");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Generate a new random device ID. Never returns zero.
    pub fn generate() -> Self {
        use rand::Rng;
        loop {
            let id: u64 = rand::rng().random();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = DeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 16 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            let id = u64::from_str_radix(&s.to_ascii_lowercase(), 16)?;
            return Ok(Self(id));
        }
        Err(DeviceIdError::InvalidFormat)
    }
}

impl From<u64> for DeviceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// Serialize as hex string so documents and cache files stay readable
impl serde::Serialize for DeviceId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for DeviceId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
