use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CacheError, CacheResult};
use crate::traits::CacheKey;

/// Canonical string for the scalar arguments of a remote call.
///
/// Only string, number and boolean properties take part; they are ordered by
/// name, so two argument objects with the same scalars address the same cache
/// node regardless of field order. Nested objects, arrays and nulls are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArgsDigest(String);

impl ArgsDigest {
    /// Computes the digest of any argument type that serializes to a JSON
    /// object. `()` and `None` yield the empty digest.
    pub fn of<A: Serialize + ?Sized>(args: &A) -> CacheResult<Self> {
        let value = serde_json::to_value(args)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> CacheResult<Self> {
        let scalars: BTreeMap<&str, Value> = match value {
            Value::Object(map) => map
                .iter()
                .filter(|(_, v)| matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_)))
                .map(|(k, v)| (k.as_str(), canonical_scalar(v)))
                .collect(),
            Value::Null => BTreeMap::new(),
            other => {
                return Err(CacheError::InvalidArguments(format!(
                    "expected an argument object, got {other}"
                )))
            }
        };
        Ok(Self(serde_json::to_string(&scalars)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Largest integer an `f64` represents exactly.
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// Integral floats are written as integers, so `1.0` and `1` digest alike.
fn canonical_scalar(value: &Value) -> Value {
    match value.as_f64() {
        Some(float)
            if value.is_f64() && float.fract() == 0.0 && float.abs() <= MAX_EXACT_FLOAT =>
        {
            Value::from(float as i64)
        }
        _ => value.clone(),
    }
}

impl fmt::Display for ArgsDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl CacheKey for ArgsDigest {
    fn cache_key(&self) -> String {
        self.0.clone()
    }
}
