//! Query keys and their canonical string form.
//!
//! A [`QueryKey`] is an ordered list of JSON values, e.g. `["mediaDevices"]` or
//! `["device", {"kind": "audio"}]`. Two keys name the same cache entry iff their
//! [`CanonicalKey`]s are identical.

use std::{fmt, hash::Hash, sync::Arc};

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::KeyError;

#[derive(Clone)]
pub struct QueryKey {
    parts: Arc<[Value]>,
    // Computed once, keys are immutable.
    canonical: CanonicalKey,
}

/// Deterministic string form of a [`QueryKey`], used as the store's map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey(Arc<str>);

impl QueryKey {
    pub fn new<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Value>,
    {
        Self::from_values(parts.into_iter().map(Into::into).collect())
    }

    /// Builds a key from any serializable value.
    ///
    /// Sequences become one part per element, anything else becomes a single
    /// part. Fails for values JSON cannot represent, e.g. maps with non-string
    /// keys.
    pub fn from_parts<S: Serialize + ?Sized>(parts: &S) -> Result<Self, KeyError> {
        let parts = match serde_json::to_value(parts)? {
            Value::Array(parts) => parts,
            single => vec![single],
        };
        Ok(Self::from_values(parts))
    }

    fn from_values(parts: Vec<Value>) -> Self {
        let canonical = serialize_parts(&parts);
        Self {
            parts: parts.into(),
            canonical,
        }
    }

    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    pub fn canonical(&self) -> &CanonicalKey {
        &self.canonical
    }
}

/// Canonical form of `key`. Pure and total.
pub fn canonicalize(key: &QueryKey) -> CanonicalKey {
    key.canonical.clone()
}

// serde_json's default object map is ordered by member name, so deeply equal
// values always print identically.
fn serialize_parts(parts: &[Value]) -> CanonicalKey {
    CanonicalKey(Value::Array(parts.to_vec()).to_string().into())
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical.as_str())
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical.as_str())
    }
}

impl Serialize for QueryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.parts.iter())
    }
}

impl From<&str> for QueryKey {
    fn from(part: &str) -> Self {
        Self::new([part])
    }
}

impl<P: Into<Value>, const N: usize> From<[P; N]> for QueryKey {
    fn from(parts: [P; N]) -> Self {
        Self::new(parts)
    }
}

impl From<Vec<Value>> for QueryKey {
    fn from(parts: Vec<Value>) -> Self {
        Self::from_values(parts)
    }
}

impl CanonicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
