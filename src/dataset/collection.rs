//! Ordered name → array maps.

use crate::array::VariantArray;
use crate::error::{Error, Result};
use crate::stream::{BinaryStream, Streamable};
use std::sync::Arc;

/// An ordered collection of named arrays.
///
/// Values are shared (`Arc`) so a shallow dataset copy clones handles,
/// not element data. Names are unique; `set` replaces in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayCollection {
    entries: Vec<(String, Arc<VariantArray>)>,
}

impl ArrayCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of arrays.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the collection has no arrays.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether `name` is present.
    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Insert or replace `name`.
    pub fn set(&mut self, name: impl Into<String>, array: impl Into<Arc<VariantArray>>) {
        let name = name.into();
        let array = array.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = array;
        } else {
            self.entries.push((name, array));
        }
    }

    /// Look up an array by name.
    pub fn get(&self, name: &str) -> Option<&Arc<VariantArray>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, a)| a)
    }

    /// Look up an array by name, failing with a semantic error naming it.
    pub fn require(&self, name: &str) -> Result<&Arc<VariantArray>> {
        self.get(name)
            .ok_or_else(|| Error::semantic(format!("array \"{name}\" is not in the collection")))
    }

    /// Remove `name`; returns the removed array if it was present.
    pub fn remove(&mut self, name: &str) -> Option<Arc<VariantArray>> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    /// Iterate over `(name, array)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<VariantArray>)> {
        self.entries.iter().map(|(n, a)| (n.as_str(), a))
    }

    /// Names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

impl Streamable for ArrayCollection {
    fn to_stream(&self, stream: &mut BinaryStream) {
        stream.pack_u64(self.entries.len() as u64);
        for (name, array) in &self.entries {
            stream.pack_str(name);
            array.to_stream(stream);
        }
    }

    fn from_stream(stream: &mut BinaryStream) -> Result<Self> {
        let n = stream.unpack_u64()? as usize;
        let mut out = Self::new();
        for _ in 0..n {
            let name = stream.unpack_str()?;
            let array = VariantArray::from_stream(stream)?;
            out.set(name, Arc::new(array));
        }
        Ok(out)
    }
}
