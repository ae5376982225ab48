//! Recursive, ordered metadata maps.
//!
//! [`Metadata`] maps string keys to values that are either a
//! [`VariantArray`] or a nested metadata. Scalars are stored as
//! one-element arrays so that every value survives the binary stream
//! unchanged. Insertion order is preserved and keys are unique.
//!
//! Cloning is O(1): the entry store is shared behind an `Arc` and writes
//! go through `Arc::make_mut`, so mutating one handle never changes what
//! an alias observes.

use crate::array::{ArrayElement, VariantArray};
use crate::error::{Error, Result};
use crate::stream::{BinaryStream, Streamable};
use std::sync::Arc;

/// A metadata value: a typed array or a nested map.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A type-erased array (scalars are one-element arrays).
    Array(VariantArray),
    /// A nested metadata map.
    Metadata(Metadata),
}

impl From<VariantArray> for Value {
    fn from(a: VariantArray) -> Self {
        Self::Array(a)
    }
}

impl From<Metadata> for Value {
    fn from(m: Metadata) -> Self {
        Self::Metadata(m)
    }
}

impl<T: ArrayElement> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::Array(VariantArray::from_vec(v))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Array(VariantArray::from_vec(vec![s.to_string()]))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Array(VariantArray::from_vec(vec![s]))
    }
}

macro_rules! impl_value_from_scalar {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::Array(VariantArray::from_vec(vec![v]))
            }
        })*
    };
}

impl_value_from_scalar!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl From<[u64; 6]> for Value {
    fn from(v: [u64; 6]) -> Self {
        Self::Array(VariantArray::from_vec(v.to_vec()))
    }
}

impl From<[f64; 6]> for Value {
    fn from(v: [f64; 6]) -> Self {
        Self::Array(VariantArray::from_vec(v.to_vec()))
    }
}

/// An ordered string → [`Value`] map with copy-on-write sharing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Arc<Vec<(String, Value)>>,
}

impl Metadata {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the map has no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Insert or replace `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let entries = Arc::make_mut(&mut self.entries);
        if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            entries.push((key, value));
        }
    }

    /// Remove `key`; returns the removed value if it was present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let entries = Arc::make_mut(&mut self.entries);
        let idx = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(idx).1)
    }

    /// Drop every key.
    pub fn clear(&mut self) {
        Arc::make_mut(&mut self.entries).clear();
    }

    /// Look up `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up `key`, failing with a semantic error naming it.
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.get(key)
            .ok_or_else(|| Error::semantic(format!("metadata is missing \"{key}\"")))
    }

    /// Look up an array value.
    pub fn array(&self, key: &str) -> Option<&VariantArray> {
        match self.get(key)? {
            Value::Array(a) => Some(a),
            Value::Metadata(_) => None,
        }
    }

    /// Look up an array value, failing with a semantic error naming it.
    pub fn require_array(&self, key: &str) -> Result<&VariantArray> {
        self.array(key)
            .ok_or_else(|| Error::semantic(format!("metadata is missing array \"{key}\"")))
    }

    /// Look up a nested map.
    pub fn metadata(&self, key: &str) -> Option<&Metadata> {
        match self.get(key)? {
            Value::Metadata(m) => Some(m),
            Value::Array(_) => None,
        }
    }

    /// Look up a nested map, failing with a semantic error naming it.
    pub fn require_metadata(&self, key: &str) -> Result<&Metadata> {
        self.metadata(key)
            .ok_or_else(|| Error::semantic(format!("metadata is missing map \"{key}\"")))
    }

    /// First element of `key` widened to u64.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.array(key)?.get_f64(0).ok().map(|v| v as u64)
    }

    /// First element of `key` widened to i64.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.array(key)?.get_f64(0).ok().map(|v| v as i64)
    }

    /// First element of `key` widened to f64.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.array(key)?.get_f64(0).ok()
    }

    /// First element of a string array at `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.array(key)?.get_str(0).ok()
    }

    /// All elements of a string array at `key`.
    pub fn get_strs(&self, key: &str) -> Option<Vec<String>> {
        let a = self.array(key)?;
        a.as_slice::<String>().map(|s| s.to_vec())
    }

    /// All elements of a numeric array at `key` widened to f64.
    pub fn get_f64s(&self, key: &str) -> Option<Vec<f64>> {
        self.array(key)?.to_f64_vec().ok()
    }

    /// All elements of a numeric array at `key` widened to u64.
    pub fn get_u64s(&self, key: &str) -> Option<Vec<u64>> {
        let v = self.array(key)?.to_f64_vec().ok()?;
        Some(v.into_iter().map(|x| x as u64).collect())
    }

    /// A 6-tuple extent stored at `key`.
    pub fn get_extent(&self, key: &str) -> Option<[u64; 6]> {
        let v = self.get_u64s(key)?;
        (v.len() == 6).then(|| [v[0], v[1], v[2], v[3], v[4], v[5]])
    }

    /// A 6-tuple bounds stored at `key`.
    pub fn get_bounds(&self, key: &str) -> Option<[f64; 6]> {
        let v = self.get_f64s(key)?;
        (v.len() == 6).then(|| [v[0], v[1], v[2], v[3], v[4], v[5]])
    }

    /// Append a string to the array at `key`, creating it when absent.
    pub fn append_str(&mut self, key: &str, value: impl Into<String>) {
        let mut arr = match self.get(key) {
            Some(Value::Array(a)) => a.clone(),
            _ => VariantArray::from_vec(Vec::<String>::new()),
        };
        if let VariantArray::Str(v) = &mut arr {
            v.push(value.into());
        }
        self.set(key, arr);
    }
}

impl Streamable for Metadata {
    fn to_stream(&self, stream: &mut BinaryStream) {
        stream.pack_u64(self.entries.len() as u64);
        for (key, value) in self.entries.iter() {
            stream.pack_str(key);
            match value {
                Value::Array(a) => {
                    stream.pack_u8(0);
                    a.to_stream(stream);
                }
                Value::Metadata(m) => {
                    stream.pack_u8(1);
                    m.to_stream(stream);
                }
            }
        }
    }

    fn from_stream(stream: &mut BinaryStream) -> Result<Self> {
        let n = stream.unpack_u64()? as usize;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            let key = stream.unpack_str()?;
            let value = match stream.unpack_u8()? {
                0 => Value::Array(VariantArray::from_stream(stream)?),
                1 => Value::Metadata(Metadata::from_stream(stream)?),
                tag => return Err(Error::format(format!("unknown metadata value tag {tag}"))),
            };
            entries.push((key, value));
        }
        Ok(Self {
            entries: Arc::new(entries),
        })
    }
}
