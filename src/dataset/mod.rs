//! Datasets passed between pipeline stages.
//!
//! A [`Dataset`] is the unit of data flowing through the pipeline:
//! produced by a stage's `execute`, consumed by the downstream stage's
//! `execute`. Ownership is shared ([`DatasetRef`]); once produced a
//! dataset is treated as immutable. Stages that need to modify one make
//! a shallow copy and replace individual arrays.

mod collection;
mod mesh;
mod table;

pub use collection::ArrayCollection;
pub use mesh::{extent_size, extent_span, CartesianMesh};
pub use table::Table;

use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::stream::{BinaryStream, Streamable};
use std::sync::Arc;

/// Shared handle to an immutable dataset.
pub type DatasetRef = Arc<Dataset>;

/// A dataset produced by a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    /// No data; a valid (sentinel) result.
    Empty,
    /// A table of equal-length columns.
    Table(Table),
    /// A cartesian structured mesh.
    Mesh(CartesianMesh),
}

impl Dataset {
    /// Check whether this is the empty dataset.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Borrow the mesh, if this dataset is one.
    pub fn as_mesh(&self) -> Option<&CartesianMesh> {
        match self {
            Self::Mesh(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow the mesh, failing with a semantic error otherwise.
    pub fn require_mesh(&self) -> Result<&CartesianMesh> {
        self.as_mesh()
            .ok_or_else(|| Error::semantic("a cartesian mesh dataset is required"))
    }

    /// Borrow the table, if this dataset is one.
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Borrow the table, failing with a semantic error otherwise.
    pub fn require_table(&self) -> Result<&Table> {
        self.as_table()
            .ok_or_else(|| Error::semantic("a table dataset is required"))
    }

    /// The attached metadata, when the dataset carries one.
    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Self::Empty => None,
            Self::Table(t) => Some(t.metadata()),
            Self::Mesh(m) => Some(m.metadata()),
        }
    }

    /// Wrap in a shared handle.
    pub fn into_ref(self) -> DatasetRef {
        Arc::new(self)
    }
}

impl Streamable for Dataset {
    fn to_stream(&self, stream: &mut BinaryStream) {
        match self {
            Self::Empty => stream.pack_u8(0),
            Self::Table(t) => {
                stream.pack_u8(1);
                t.to_stream(stream);
            }
            Self::Mesh(m) => {
                stream.pack_u8(2);
                m.to_stream(stream);
            }
        }
    }

    fn from_stream(stream: &mut BinaryStream) -> Result<Self> {
        Ok(match stream.unpack_u8()? {
            0 => Self::Empty,
            1 => Self::Table(Table::from_stream(stream)?),
            2 => Self::Mesh(CartesianMesh::from_stream(stream)?),
            tag => return Err(Error::format(format!("unknown dataset tag {tag}"))),
        })
    }
}

/// Relative difference between a reference and a computed value,
/// falling back to the computed value's magnitude when the reference
/// is zero. Two exact zeros differ by zero.
fn relative_difference(reference: f64, computed: f64) -> f64 {
    if reference != 0.0 {
        (computed - reference).abs() / reference.abs()
    } else if computed != 0.0 {
        (computed - reference).abs() / computed.abs()
    } else {
        0.0
    }
}

fn diff_collections(what: &str, a: &ArrayCollection, b: &ArrayCollection, tol: f64) -> Result<()> {
    let a_names: Vec<&str> = a.names().collect();
    let b_names: Vec<&str> = b.names().collect();
    if a_names != b_names {
        return Err(Error::semantic(format!(
            "{what} arrays differ: {a_names:?} vs {b_names:?}"
        )));
    }
    for (name, left) in a.iter() {
        let right = b.require(name)?;
        if left.element_type() != right.element_type() || left.len() != right.len() {
            return Err(Error::semantic(format!(
                "{what} array \"{name}\" shape or type differs"
            )));
        }
        if !left.element_type().is_numeric() {
            if left != right {
                return Err(Error::semantic(format!(
                    "{what} array \"{name}\" string contents differ"
                )));
            }
            continue;
        }
        for i in 0..left.len() {
            let (va, vb) = (left.get_f64(i)?, right.get_f64(i)?);
            let rel_diff = relative_difference(va, vb);
            if rel_diff > tol {
                return Err(Error::semantic(format!(
                    "{what} array \"{name}\"[{i}]: relative difference {rel_diff} \
                     exceeds tolerance {tol}, ref value {va} is not equal to \
                     test value {vb}"
                )));
            }
        }
    }
    Ok(())
}

/// Compare two datasets element-wise within a relative tolerance.
///
/// `a` is the reference: each numeric element fails when
/// `|b - a| / |a|` (over `|b|` when `a` is zero) exceeds `tol`.
/// Returns `Ok(())` when the datasets are structurally identical and
/// all values agree; otherwise a semantic error describing the first
/// difference.
pub fn diff(a: &Dataset, b: &Dataset, tol: f64) -> Result<()> {
    match (a, b) {
        (Dataset::Empty, Dataset::Empty) => Ok(()),
        (Dataset::Table(ta), Dataset::Table(tb)) => {
            diff_collections("table", ta.columns(), tb.columns(), tol)
        }
        (Dataset::Mesh(ma), Dataset::Mesh(mb)) => {
            if ma.extent() != mb.extent() {
                return Err(Error::semantic(format!(
                    "mesh extents differ: {:?} vs {:?}",
                    ma.extent(),
                    mb.extent()
                )));
            }
            if relative_difference(ma.time(), mb.time()) > tol {
                return Err(Error::semantic(format!(
                    "mesh times differ: {} vs {}",
                    ma.time(),
                    mb.time()
                )));
            }
            diff_collections("point", ma.point_arrays(), mb.point_arrays(), tol)?;
            diff_collections("cell", ma.cell_arrays(), mb.cell_arrays(), tol)?;
            diff_collections(
                "information",
                ma.information_arrays(),
                mb.information_arrays(),
                tol,
            )
        }
        _ => Err(Error::semantic("dataset kinds differ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::VariantArray;

    #[test]
    fn test_empty_dataset() {
        let d = Dataset::Empty;
        assert!(d.is_empty());
        assert!(d.metadata().is_none());
        assert!(d.require_mesh().is_err());
    }

    #[test]
    fn test_round_trip_with_tag() {
        let mut t = Table::new();
        t.add_column("a", Arc::new(VariantArray::from_vec(vec![1.0f64])))
            .unwrap();
        let d = Dataset::Table(t);

        let mut s = BinaryStream::new();
        d.to_stream(&mut s);
        assert_eq!(Dataset::from_stream(&mut s).unwrap(), d);
    }

    fn column(values: Vec<f64>) -> Dataset {
        let mut t = Table::new();
        t.add_column("v", Arc::new(VariantArray::from_vec(values)))
            .unwrap();
        Dataset::Table(t)
    }

    #[test]
    fn test_diff_tolerance_is_relative() {
        let a = column(vec![1.0, 2.0]);
        let b = column(vec![1.0, 2.0 + 1e-9]);
        diff(&a, &b, 1e-6).unwrap();
        assert!(diff(&a, &b, 1e-12).is_err());
        assert!(diff(&a, &Dataset::Empty, 1e-6).is_err());

        // a pressure-magnitude field: 0.05 Pa on 1e5 Pa is 5e-7 relative
        let a = column(vec![1.0e5]);
        let b = column(vec![1.0e5 + 0.05]);
        diff(&a, &b, 1e-6).unwrap();
        assert!(diff(&a, &b, 1e-8).is_err());
    }

    #[test]
    fn test_diff_zero_reference_falls_back_to_computed() {
        // ref 0, comp 1: the difference is measured against comp
        assert!(diff(&column(vec![0.0]), &column(vec![1.0]), 0.5).is_err());
        // two exact zeros are equal
        diff(&column(vec![0.0]), &column(vec![0.0]), 0.0).unwrap();
    }
}
