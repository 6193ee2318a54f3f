use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// A value that can address a child in the hierarchical cache.
///
/// Implementors must return the same string for equivalent values; the
/// string is used both as the map key and as a path segment in diagnostics.
pub trait CacheKey {
    /// Returns the canonical string form of this key.
    fn cache_key(&self) -> String;
}

impl CacheKey for str {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl CacheKey for String {
    fn cache_key(&self) -> String {
        self.clone()
    }
}

impl CacheKey for Uuid {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl CacheKey for bool {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

macro_rules! integer_cache_key {
    ($($ty:ty),*) => {
        $(impl CacheKey for $ty {
            fn cache_key(&self) -> String {
                self.to_string()
            }
        })*
    };
}

integer_cache_key!(i32, i64, u32, u64, usize);

impl<K: CacheKey + ?Sized> CacheKey for &K {
    fn cache_key(&self) -> String {
        (**self).cache_key()
    }
}

/// Identifier of a remote entity.
///
/// The remote API is not consistent about identifier types, so numbers and
/// strings are both accepted and normalised to their string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds an id from a JSON scalar. Objects, arrays, null and empty
    /// strings are not identifiers.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            serde_json::Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl CacheKey for EntityId {
    fn cache_key(&self) -> String {
        self.0.clone()
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i32> for EntityId {
    fn from(id: i32) -> Self {
        Self(id.to_string())
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        EntityId::from_json(&value).ok_or_else(|| {
            serde::de::Error::custom(format!("expected a string or number identifier, got {value}"))
        })
    }
}

/// A trait for models that have a primary key.
pub trait HasPrimaryKey {
    /// Returns the primary key of the model.
    fn primary_key(&self) -> EntityId;
}

/// A remote entity that can be cached by the read-through layer.
pub trait Entity: HasPrimaryKey + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Logical type name used to scope cache paths and change events,
    /// e.g. `"BuildConfiguration"`.
    const ENTITY_CLASS: &'static str;
}
