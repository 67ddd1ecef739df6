//! Nested configuration values handed to the execution engine.
//!
//! A [`Config`] is an ordered tree of [`Value`]s. It is never mutated after it
//! has been handed to a job: every builder method consumes the config and
//! returns a new one, and a baseline is reused by cloning it first.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::core::{Hash32, fingerprint};
use crate::engine::{Artifact, Checkpoint};
use crate::error::ConfigError;

/// A single configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Artifact(Artifact),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "a bool",
            Value::Int(_) => "an integer",
            Value::Float(_) => "a float",
            Value::Str(_) => "a string",
            Value::List(_) => "a list",
            Value::Map(_) => "a map",
            Value::Artifact(_) => "an artifact",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_artifact(&self) -> Option<&Artifact> {
        match self {
            Value::Artifact(value) => Some(value),
            _ => None,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(value) => {
                1u8.hash(state);
                value.hash(state);
            }
            Value::Int(value) => {
                2u8.hash(state);
                value.hash(state);
            }
            Value::Float(value) => {
                3u8.hash(state);
                value.to_bits().hash(state);
            }
            Value::Str(value) => {
                4u8.hash(state);
                value.hash(state);
            }
            Value::List(items) => {
                5u8.hash(state);
                items.hash(state);
            }
            Value::Map(map) => {
                6u8.hash(state);
                map.hash(state);
            }
            Value::Artifact(artifact) => {
                7u8.hash(state);
                artifact.hash(state);
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(value) => serializer.serialize_bool(*value),
            Value::Int(value) => serializer.serialize_i64(*value),
            Value::Float(value) => serializer.serialize_f64(*value),
            Value::Str(value) => serializer.serialize_str(value),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut ser = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    ser.serialize_entry(key, value)?;
                }
                ser.end()
            }
            Value::Artifact(artifact) => serializer.serialize_str(artifact.location().as_str()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

// Only widths that fit into `i64` without loss.
macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Artifact> for Value {
    fn from(value: Artifact) -> Self {
        Value::Artifact(value)
    }
}

impl From<&Artifact> for Value {
    fn from(value: &Artifact) -> Self {
        Value::Artifact(value.clone())
    }
}

impl From<&Checkpoint> for Value {
    fn from(value: &Checkpoint) -> Self {
        Value::Artifact(value.artifact().clone())
    }
}

impl From<Config> for Value {
    fn from(value: Config) -> Self {
        Value::Map(value.entries)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match value {
            Json::Null => Value::Null,
            Json::Bool(value) => Value::Bool(value),
            Json::Number(number) => match number.as_i64() {
                Some(int) => Value::Int(int),
                None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(value) => Value::Str(value),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// A configuration object: ordered mapping of option name to [`Value`].
///
/// Nested keys are addressed with dotted paths, `network.decoder.lstm_size`.
/// Ordering is by key, so two configs built from the same inputs serialize
/// and hash identically.
#[derive(Debug, Clone, PartialEq, Default, Hash)]
pub struct Config {
    entries: BTreeMap<String, Value>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from a JSON object, e.g. experiment overrides read from
    /// disk.
    pub fn from_json(json: serde_json::Value) -> Result<Self, ConfigError> {
        match Value::from(json) {
            Value::Map(entries) => Ok(Self { entries }),
            _ => Err(ConfigError::NotAnObject),
        }
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set `path`, creating intermediate maps. A non-map value in the way is
    /// replaced.
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        insert(&mut self.entries, path, value.into());
        self
    }

    /// Remove `path` if present.
    pub fn without(mut self, path: &str) -> Self {
        remove(&mut self.entries, path);
        self
    }

    /// Deep merge, values from `overrides` win. Maps are merged key by key,
    /// everything else is replaced.
    pub fn merge(&self, overrides: &Config) -> Config {
        let mut entries = self.entries.clone();
        merge_into(&mut entries, &overrides.entries);
        Config { entries }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    pub fn get(&self, path: &str) -> Result<&Value, ConfigError> {
        let missing = || ConfigError::MissingKey(path.to_string());
        let mut parts = path.split('.');

        let head = parts.next().ok_or_else(missing)?;
        let mut current = self.entries.get(head).ok_or_else(missing)?;

        for part in parts {
            current = match current {
                Value::Map(map) => map.get(part).ok_or_else(missing)?,
                _ => return Err(missing()),
            };
        }

        Ok(current)
    }

    pub fn get_int(&self, path: &str) -> Result<i64, ConfigError> {
        match self.get(path)? {
            Value::Int(value) => Ok(*value),
            other => Err(wrong_type(path, "an integer", other)),
        }
    }

    pub fn get_float(&self, path: &str) -> Result<f64, ConfigError> {
        match self.get(path)? {
            Value::Float(value) => Ok(*value),
            Value::Int(value) => Ok(*value as f64),
            other => Err(wrong_type(path, "a number", other)),
        }
    }

    pub fn get_bool(&self, path: &str) -> Result<bool, ConfigError> {
        match self.get(path)? {
            Value::Bool(value) => Ok(*value),
            other => Err(wrong_type(path, "a bool", other)),
        }
    }

    pub fn get_str(&self, path: &str) -> Result<&str, ConfigError> {
        match self.get(path)? {
            Value::Str(value) => Ok(value),
            other => Err(wrong_type(path, "a string", other)),
        }
    }

    pub fn get_list(&self, path: &str) -> Result<&[Value], ConfigError> {
        match self.get(path)? {
            Value::List(items) => Ok(items),
            other => Err(wrong_type(path, "a list", other)),
        }
    }

    /// Every leaf path, in key order. Empty maps count as leaves.
    pub fn paths(&self) -> Vec<String> {
        let mut acc = Vec::new();
        for (key, value) in &self.entries {
            leaf_paths(key.clone(), value, &mut acc);
        }
        acc
    }

    /// Content hash of this configuration.
    pub fn fingerprint(&self) -> Hash32 {
        fingerprint(self)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for Config {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

fn wrong_type(path: &str, expected: &'static str, found: &Value) -> ConfigError {
    tracing::debug!("{path}: expected {expected}, found {}", found.type_name());
    ConfigError::WrongType {
        path: path.to_string(),
        expected,
    }
}

fn insert(map: &mut BTreeMap<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Map(BTreeMap::new()));

            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(BTreeMap::new());
            }

            if let Value::Map(inner) = entry {
                insert(inner, rest, value);
            }
        }
    }
}

fn remove(map: &mut BTreeMap<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            map.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Map(inner)) = map.get_mut(head) {
                remove(inner, rest);
            }
        }
    }
}

fn merge_into(base: &mut BTreeMap<String, Value>, overrides: &BTreeMap<String, Value>) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (Some(Value::Map(inner)), Value::Map(other)) => merge_into(inner, other),
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn leaf_paths(prefix: String, value: &Value, acc: &mut Vec<String>) {
    match value {
        Value::Map(map) if !map.is_empty() => {
            for (key, value) in map {
                leaf_paths(format!("{prefix}.{key}"), value, acc);
            }
        }
        _ => acc.push(prefix),
    }
}
