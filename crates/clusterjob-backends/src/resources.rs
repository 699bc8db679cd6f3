//! Generic resource requirements.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::BackendError;

/// A single resource value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ResourceValue {
    /// Interpret as a non-negative integer (integers, or strings of digits)
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ResourceValue::Int(i) => u64::try_from(*i).ok(),
            ResourceValue::Str(s) => s.trim().parse().ok(),
            ResourceValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ResourceValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// True if this value is a plain number without a unit suffix
    pub fn is_plain_number(&self) -> bool {
        match self {
            ResourceValue::Int(_) => true,
            ResourceValue::Str(s) => !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
            ResourceValue::Bool(_) => false,
        }
    }
}

impl fmt::Display for ResourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceValue::Bool(b) => write!(f, "{}", b),
            ResourceValue::Int(i) => write!(f, "{}", i),
            ResourceValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ResourceValue {
    fn from(s: &str) -> Self {
        ResourceValue::Str(s.to_string())
    }
}

impl From<String> for ResourceValue {
    fn from(s: String) -> Self {
        ResourceValue::Str(s)
    }
}

impl From<i64> for ResourceValue {
    fn from(i: i64) -> Self {
        ResourceValue::Int(i)
    }
}

impl From<i32> for ResourceValue {
    fn from(i: i32) -> Self {
        ResourceValue::Int(i64::from(i))
    }
}

impl From<u32> for ResourceValue {
    fn from(i: u32) -> Self {
        ResourceValue::Int(i64::from(i))
    }
}

impl From<bool> for ResourceValue {
    fn from(b: bool) -> Self {
        ResourceValue::Bool(b)
    }
}

/// Mapping from resource key to value.
///
/// Keys iterate in sorted order, so header rendering is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceMap(BTreeMap<String, ResourceValue>);

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource, validating the key
    pub fn insert(
        &mut self,
        key: &str,
        value: impl Into<ResourceValue>,
    ) -> Result<Option<ResourceValue>, BackendError> {
        validate_key(key)?;
        Ok(self.0.insert(key.to_string(), value.into()))
    }

    /// Builder-style insert for literal maps
    pub fn with(mut self, key: &str, value: impl Into<ResourceValue>) -> Result<Self, BackendError> {
        self.insert(key, value)?;
        Ok(self)
    }

    /// Insert a key known to be valid (backend tables)
    pub(crate) fn insert_static(&mut self, key: &'static str, value: impl Into<ResourceValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ResourceValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ResourceValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fill in every key of `defaults` that is not already set
    pub fn merge_defaults(&mut self, defaults: &ResourceMap) {
        for (key, value) in &defaults.0 {
            self.0
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Resource keys become scheduler option names, so they are restricted to
/// identifier-like strings.
pub fn validate_key(key: &str) -> Result<(), BackendError> {
    let mut chars = key.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(BackendError::InvalidResourceKey(key.to_string()))
    }
}
