//! Named-parameter bag used to synchronize benchmark settings across members.

use core::fmt;

use rkyv::Archive;
use serde::{Deserialize, Serialize};

/// A typed parameter value.
#[derive(
    Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq,
)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ConfigValue {
    /// Name of the value's type, used in mismatch reports.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(val: bool) -> Self {
        Self::Bool(val)
    }
}

impl From<i64> for ConfigValue {
    fn from(val: i64) -> Self {
        Self::Int(val)
    }
}

impl From<u32> for ConfigValue {
    fn from(val: u32) -> Self {
        Self::Int(i64::from(val))
    }
}

impl From<f64> for ConfigValue {
    fn from(val: f64) -> Self {
        Self::Float(val)
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:.2}"),
        }
    }
}

/// One named parameter.
#[derive(Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfigEntry {
    pub name: String,
    pub value: ConfigValue,
}

/// Ordered mapping from parameter name to typed value.
///
/// Insertion order is preserved so that a config applied on another member
/// is applied field by field in the order it was built.
#[derive(
    Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Deserialize, Debug, Clone, Default, PartialEq,
)]
pub struct Config {
    entries: Vec<ConfigEntry>,
}

impl Config {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds a parameter, replacing the value of an existing key in place.
    #[must_use]
    pub fn add(mut self, name: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ConfigValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.value = value,
            None => self.entries.push(ConfigEntry { name, value }),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ConfigValue> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", entry.name, entry.value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces_in_place() {
        let config = Config::new()
            .add("sync", true)
            .add("num_threads", 4u32)
            .add("sync", false);

        assert_eq!(config.len(), 2);
        assert_eq!(config.get("sync"), Some(ConfigValue::Bool(false)));
        let names: Vec<_> = config.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["sync", "num_threads"]);
    }

    #[test]
    fn test_display() {
        let config = Config::new()
            .add("oob", true)
            .add("time", 60i64)
            .add("read_percentage", 0.8);
        assert_eq!(
            config.to_string(),
            "{oob=true, time=60, read_percentage=0.80}"
        );
    }
}
