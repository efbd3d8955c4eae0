//! Kinds of stored profiles

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Type of a stored profile.
///
/// `Unknown` is the zero value: it never appears in a stored record and, in a
/// query, means "any type".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ProfileType {
    #[default]
    Unknown = 0,
    Cpu = 1,
    Heap = 2,
    Contention = 3,
    MutexContention = 4,
    LiveStacks = 5,
    ThreadCreation = 6,
    Trace = 7,
    Other = 127,
}

impl ProfileType {
    /// Every type a record may be stored with, in key order.
    pub const KNOWN: [ProfileType; 8] = [
        ProfileType::Cpu,
        ProfileType::Heap,
        ProfileType::Contention,
        ProfileType::MutexContention,
        ProfileType::LiveStacks,
        ProfileType::ThreadCreation,
        ProfileType::Trace,
        ProfileType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileType::Unknown => "unknown",
            ProfileType::Cpu => "cpu",
            ProfileType::Heap => "heap",
            ProfileType::Contention => "contention",
            ProfileType::MutexContention => "mutex-contention",
            ProfileType::LiveStacks => "live-stacks",
            ProfileType::ThreadCreation => "thread-creation",
            ProfileType::Trace => "trace",
            ProfileType::Other => "other",
        }
    }

    /// Single-byte tag used in storage keys.
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Inverse of [`as_u8`](Self::as_u8). Unrecognised tags map to `Unknown`.
    pub fn from_u8(tag: u8) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|t| t.as_u8() == tag)
            .unwrap_or(ProfileType::Unknown)
    }

    pub fn is_known(&self) -> bool {
        *self != ProfileType::Unknown
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid profile type {0:?}")]
pub struct ProfileTypeError(pub String);

impl FromStr for ProfileType {
    type Err = ProfileTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(ProfileType::Unknown.as_str()) {
            return Ok(ProfileType::Unknown);
        }
        Self::KNOWN
            .into_iter()
            .find(|t| s.eq_ignore_ascii_case(t.as_str()))
            .ok_or_else(|| ProfileTypeError(s.to_string()))
    }
}

impl Serialize for ProfileType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProfileType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
