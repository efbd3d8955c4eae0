//! Identity and searchable attributes of a stored profile

use crate::types::labels::Labels;
use crate::types::profile_type::ProfileType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Time-sortable profile identifier.
///
/// Backed by a UUIDv7: the leading 48 bits are the creation time in
/// milliseconds, so byte-wise (and hex-string) ordering follows creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileId(Uuid);

/// Size of the binary form of a [`ProfileId`].
pub const PROFILE_ID_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid profile id {0:?}")]
pub struct ProfileIdError(pub String);

impl ProfileId {
    /// Allocate a new identifier for the current instant.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_bytes(bytes: [u8; PROFILE_ID_LEN]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProfileIdError> {
        Uuid::from_slice(bytes)
            .map(Self)
            .map_err(|_| ProfileIdError(format!("{} raw bytes", bytes.len())))
    }

    pub fn as_bytes(&self) -> &[u8; PROFILE_ID_LEN] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for ProfileId {
    type Err = ProfileIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s.trim())
            .map(Self)
            .map_err(|_| ProfileIdError(s.to_string()))
    }
}

impl Serialize for ProfileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProfileId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Metadata of a stored profile. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Identifier assigned by the backend at write time
    pub profile_id: ProfileId,

    /// Canonical id chosen by the primary writer of a fan-out write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<ProfileId>,

    pub service: String,

    #[serde(rename = "type")]
    pub profile_type: ProfileType,

    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,

    /// Creation time, whole seconds, UTC
    pub created_at: DateTime<Utc>,
}
