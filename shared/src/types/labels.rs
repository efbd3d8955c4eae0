//! Label sets attached to stored profiles
//!
//! A label set is kept in canonical form (sorted by key, then value, with
//! exact duplicates removed) so that equality and subset checks can work on
//! the sorted representation directly. The wire form is `k1=v1,k2=v2` with
//! keys and values percent-encoded.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A single key/value attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Errors produced while parsing the `k=v,k=v` representation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelsError {
    #[error("label {0:?} has no '=' separator")]
    MissingSeparator(String),

    #[error("label {0:?} is not valid percent-encoded UTF-8")]
    Encoding(String),
}

/// Canonically sorted set of labels
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Build a label set, sorting and removing exact duplicates.
    pub fn new(labels: impl IntoIterator<Item = Label>) -> Self {
        let mut labels: Vec<Label> = labels.into_iter().collect();
        labels.sort();
        labels.dedup();
        Self(labels)
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(pairs.into_iter().map(|(k, v)| Label::new(k, v)))
    }

    pub fn from_map(map: &HashMap<String, String>) -> Self {
        Self::from_pairs(map.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Check that every label in `other` is present in `self` with the same value.
    ///
    /// An empty `other` is included in any set.
    pub fn includes(&self, other: &Labels) -> bool {
        if other.len() > self.len() {
            return false;
        }
        other.0.iter().all(|l| self.0.binary_search(l).is_ok())
    }

    /// Union of two label sets.
    pub fn add(&self, other: &Labels) -> Labels {
        Self::new(self.0.iter().chain(other.0.iter()).cloned())
    }
}

impl FromIterator<Label> for Labels {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(
                f,
                "{}={}",
                urlencoding::encode(&label.key),
                urlencoding::encode(&label.value)
            )?;
        }
        Ok(())
    }
}

impl FromStr for Labels {
    type Err = LabelsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut labels = Vec::new();
        for pair in s.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| LabelsError::MissingSeparator(pair.to_string()))?;
            // a pair without a key carries nothing to match on
            if key.is_empty() {
                continue;
            }
            let key = urlencoding::decode(key)
                .map_err(|_| LabelsError::Encoding(pair.to_string()))?;
            let value = urlencoding::decode(value)
                .map_err(|_| LabelsError::Encoding(pair.to_string()))?;
            labels.push(Label::new(key, value));
        }
        Ok(Self::new(labels))
    }
}

impl Serialize for Labels {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Labels {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
