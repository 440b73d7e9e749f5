//! Stream identities.
//!
//! There is exactly one global stream and zero or more local (per-region)
//! streams. Each stream is an independent timestamp sequence with its own
//! cursor and checkpoint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a region name.
pub const MAX_REGION_LEN: usize = 64;

/// Identifies a timestamp stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamKey {
    Global,
    Local(String),
}

impl StreamKey {
    /// Build a local stream key, validating the region name.
    pub fn local(region: impl Into<String>) -> Result<Self, InvalidStreamKey> {
        let region = region.into();
        validate_region(&region)?;
        Ok(Self::Local(region))
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// Key under which this stream's checkpoint lives in the metadata store.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Global => "tso/global/timestamp".to_string(),
            Self::Local(region) => format!("tso/local/{region}/timestamp"),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Local(region) => write!(f, "local/{region}"),
        }
    }
}

/// Error returned when a stream key or region name is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid stream key {key:?}: {reason}")]
pub struct InvalidStreamKey {
    pub key: String,
    pub reason: &'static str,
}

impl FromStr for StreamKey {
    type Err = InvalidStreamKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "global" => Ok(Self::Global),
            other => {
                let region = other.strip_prefix("local/").unwrap_or(other);
                Self::local(region)
            }
        }
    }
}

fn validate_region(region: &str) -> Result<(), InvalidStreamKey> {
    let invalid = |reason| InvalidStreamKey {
        key: region.to_string(),
        reason,
    };

    if region.is_empty() {
        return Err(invalid("region cannot be empty"));
    }
    if region.len() > MAX_REGION_LEN {
        return Err(invalid("region name too long (max 64 characters)"));
    }
    if region == "global" {
        return Err(invalid("\"global\" is reserved"));
    }
    if !region
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(invalid(
            "region must contain only alphanumeric characters, dashes, underscores, or dots",
        ));
    }
    Ok(())
}
