//! Fragment cache key generation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Key of one cached fragment, e.g. `users.posts/4f1c..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    /// Same key under `prefix`, separated by `:`.
    pub fn prefixed(&self, prefix: &str) -> Self {
        Self(format!("{}:{}", prefix, self.0))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Derives a [`CacheKey`] from the logical identity of a fragment: the field
/// path, the id of the parent object and the field arguments.
///
/// Arguments are canonicalized (object keys sorted) before hashing, so
/// `{"a":1,"b":2}` and `{"b":2,"a":1}` map to the same key.
#[derive(Debug, Clone, Default)]
pub struct FragmentKeyGenerator {
    salt: Option<String>,
}

impl FragmentKeyGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Mix a schema version (or any deploy-scoped value) into every key.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn generate(&self, path: &str, object_id: &Value, arguments: &Value) -> CacheKey {
        let mut parts: BTreeMap<&str, String> = BTreeMap::new();
        parts.insert("path", path.to_string());
        parts.insert("object", canonical_json(object_id));
        parts.insert("arguments", canonical_json(arguments));
        if let Some(ref s) = self.salt {
            parts.insert("salt", s.clone());
        }
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(format!("{}/{}", path, hash))
    }
}

fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, sort(v))).collect();
                serde_json::to_value(sorted).unwrap_or(Value::Null)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}
