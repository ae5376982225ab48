//! Cartesian structured meshes.

use crate::array::VariantArray;
use crate::dataset::ArrayCollection;
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::stream::{BinaryStream, Streamable};
use std::sync::Arc;

/// Span of an inclusive 6-tuple extent along one axis.
pub fn extent_span(extent: &[u64; 6], axis: usize) -> u64 {
    extent[2 * axis + 1] - extent[2 * axis] + 1
}

/// Number of mesh points covered by an inclusive extent.
pub fn extent_size(extent: &[u64; 6]) -> u64 {
    extent_span(extent, 0) * extent_span(extent, 1) * extent_span(extent, 2)
}

/// A structured mesh with axis-aligned coordinate arrays.
///
/// Coordinates are shared handles; a `clone` is a shallow copy that
/// aliases coordinate and data arrays. Stages that modify a mesh clone
/// it and replace individual arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct CartesianMesh {
    metadata: Metadata,
    x_variable: String,
    y_variable: String,
    z_variable: String,
    t_variable: String,
    x: Arc<VariantArray>,
    y: Arc<VariantArray>,
    z: Arc<VariantArray>,
    time: f64,
    time_step: u64,
    calendar: String,
    time_units: String,
    extent: [u64; 6],
    whole_extent: [u64; 6],
    bounds: [f64; 6],
    point_arrays: ArrayCollection,
    cell_arrays: ArrayCollection,
    information_arrays: ArrayCollection,
}

impl Default for CartesianMesh {
    fn default() -> Self {
        Self {
            metadata: Metadata::new(),
            x_variable: "lon".to_string(),
            y_variable: "lat".to_string(),
            z_variable: "z".to_string(),
            t_variable: "time".to_string(),
            x: Arc::new(VariantArray::from_vec(vec![0.0f64])),
            y: Arc::new(VariantArray::from_vec(vec![0.0f64])),
            z: Arc::new(VariantArray::from_vec(vec![0.0f64])),
            time: 0.0,
            time_step: 0,
            calendar: String::new(),
            time_units: String::new(),
            extent: [0; 6],
            whole_extent: [0; 6],
            bounds: [0.0; 6],
            point_arrays: ArrayCollection::new(),
            cell_arrays: ArrayCollection::new(),
            information_arrays: ArrayCollection::new(),
        }
    }
}

impl CartesianMesh {
    /// Create a mesh with default (single point) coordinates.
    pub fn new() -> Self {
        Self::default()
    }

    /// The attached metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable access to the attached metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Set the x coordinate axis and its variable name.
    pub fn set_x_coordinates(&mut self, variable: impl Into<String>, x: Arc<VariantArray>) {
        self.x_variable = variable.into();
        self.x = x;
    }

    /// Set the y coordinate axis and its variable name.
    pub fn set_y_coordinates(&mut self, variable: impl Into<String>, y: Arc<VariantArray>) {
        self.y_variable = variable.into();
        self.y = y;
    }

    /// Set the z coordinate axis and its variable name.
    pub fn set_z_coordinates(&mut self, variable: impl Into<String>, z: Arc<VariantArray>) {
        self.z_variable = variable.into();
        self.z = z;
    }

    /// The x coordinate axis.
    pub fn x_coordinates(&self) -> &Arc<VariantArray> {
        &self.x
    }

    /// The y coordinate axis.
    pub fn y_coordinates(&self) -> &Arc<VariantArray> {
        &self.y
    }

    /// The z coordinate axis.
    pub fn z_coordinates(&self) -> &Arc<VariantArray> {
        &self.z
    }

    /// Coordinate variable names (x, y, z, t).
    pub fn coordinate_variables(&self) -> (&str, &str, &str, &str) {
        (
            &self.x_variable,
            &self.y_variable,
            &self.z_variable,
            &self.t_variable,
        )
    }

    /// Set the time variable name.
    pub fn set_t_variable(&mut self, variable: impl Into<String>) {
        self.t_variable = variable.into();
    }

    /// The time value of this mesh.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Set the time value.
    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    /// The work index this mesh answers.
    pub fn time_step(&self) -> u64 {
        self.time_step
    }

    /// Set the work index.
    pub fn set_time_step(&mut self, step: u64) {
        self.time_step = step;
    }

    /// The CF calendar name, when known.
    pub fn calendar(&self) -> &str {
        &self.calendar
    }

    /// Set the CF calendar name.
    pub fn set_calendar(&mut self, calendar: impl Into<String>) {
        self.calendar = calendar.into();
    }

    /// The CF time units string, when known.
    pub fn time_units(&self) -> &str {
        &self.time_units
    }

    /// Set the CF time units string.
    pub fn set_time_units(&mut self, units: impl Into<String>) {
        self.time_units = units.into();
    }

    /// The extent held by this mesh.
    pub fn extent(&self) -> [u64; 6] {
        self.extent
    }

    /// Set the extent held by this mesh.
    pub fn set_extent(&mut self, extent: [u64; 6]) {
        self.extent = extent;
    }

    /// The extent of the full dataset.
    pub fn whole_extent(&self) -> [u64; 6] {
        self.whole_extent
    }

    /// Set the extent of the full dataset.
    pub fn set_whole_extent(&mut self, extent: [u64; 6]) {
        self.whole_extent = extent;
    }

    /// The coordinate bounds of this mesh.
    pub fn bounds(&self) -> [f64; 6] {
        self.bounds
    }

    /// Set the coordinate bounds.
    pub fn set_bounds(&mut self, bounds: [f64; 6]) {
        self.bounds = bounds;
    }

    /// Point-centered arrays.
    pub fn point_arrays(&self) -> &ArrayCollection {
        &self.point_arrays
    }

    /// Mutable point-centered arrays.
    pub fn point_arrays_mut(&mut self) -> &mut ArrayCollection {
        &mut self.point_arrays
    }

    /// Cell-centered arrays.
    pub fn cell_arrays(&self) -> &ArrayCollection {
        &self.cell_arrays
    }

    /// Mutable cell-centered arrays.
    pub fn cell_arrays_mut(&mut self) -> &mut ArrayCollection {
        &mut self.cell_arrays
    }

    /// Non-spatial arrays.
    pub fn information_arrays(&self) -> &ArrayCollection {
        &self.information_arrays
    }

    /// Mutable non-spatial arrays.
    pub fn information_arrays_mut(&mut self) -> &mut ArrayCollection {
        &mut self.information_arrays
    }

    /// Number of points covered by the extent.
    pub fn n_points(&self) -> u64 {
        extent_size(&self.extent)
    }

    /// Per-axis point counts (nx, ny, nz).
    pub fn dimensions(&self) -> (usize, usize, usize) {
        (
            extent_span(&self.extent, 0) as usize,
            extent_span(&self.extent, 1) as usize,
            extent_span(&self.extent, 2) as usize,
        )
    }

    /// Check the structural invariants.
    ///
    /// Coordinate array lengths must match the extent spans and every
    /// point array must cover the extent. Information arrays are free.
    pub fn validate(&self) -> Result<()> {
        let spans = [
            (self.x.len() as u64, extent_span(&self.extent, 0), "x"),
            (self.y.len() as u64, extent_span(&self.extent, 1), "y"),
            (self.z.len() as u64, extent_span(&self.extent, 2), "z"),
        ];
        for (have, want, axis) in spans {
            if have != want {
                return Err(Error::semantic(format!(
                    "{axis} coordinate length {have} does not cover extent span {want}"
                )));
            }
        }
        let n_points = self.n_points();
        for (name, array) in self.point_arrays.iter() {
            if array.len() as u64 != n_points {
                return Err(Error::semantic(format!(
                    "point array \"{name}\" has {} elements, extent covers {n_points}",
                    array.len()
                )));
            }
        }
        Ok(())
    }
}

impl Streamable for CartesianMesh {
    fn to_stream(&self, stream: &mut BinaryStream) {
        self.metadata.to_stream(stream);
        stream.pack_str(&self.x_variable);
        stream.pack_str(&self.y_variable);
        stream.pack_str(&self.z_variable);
        stream.pack_str(&self.t_variable);
        self.x.to_stream(stream);
        self.y.to_stream(stream);
        self.z.to_stream(stream);
        stream.pack_f64(self.time);
        stream.pack_u64(self.time_step);
        stream.pack_str(&self.calendar);
        stream.pack_str(&self.time_units);
        stream.pack_u64_vec(&self.extent);
        stream.pack_u64_vec(&self.whole_extent);
        stream.pack_f64_vec(&self.bounds);
        self.point_arrays.to_stream(stream);
        self.cell_arrays.to_stream(stream);
        self.information_arrays.to_stream(stream);
    }

    fn from_stream(stream: &mut BinaryStream) -> Result<Self> {
        let mut mesh = Self::new();
        mesh.metadata = Metadata::from_stream(stream)?;
        mesh.x_variable = stream.unpack_str()?;
        mesh.y_variable = stream.unpack_str()?;
        mesh.z_variable = stream.unpack_str()?;
        mesh.t_variable = stream.unpack_str()?;
        mesh.x = Arc::new(VariantArray::from_stream(stream)?);
        mesh.y = Arc::new(VariantArray::from_stream(stream)?);
        mesh.z = Arc::new(VariantArray::from_stream(stream)?);
        mesh.time = stream.unpack_f64()?;
        mesh.time_step = stream.unpack_u64()?;
        mesh.calendar = stream.unpack_str()?;
        mesh.time_units = stream.unpack_str()?;
        let unpack_6 = |v: Vec<u64>| -> Result<[u64; 6]> {
            v.try_into()
                .map_err(|_| Error::format("extent must have 6 entries"))
        };
        mesh.extent = unpack_6(stream.unpack_u64_vec()?)?;
        mesh.whole_extent = unpack_6(stream.unpack_u64_vec()?)?;
        mesh.bounds = stream
            .unpack_f64_vec()?
            .try_into()
            .map_err(|_| Error::format("bounds must have 6 entries"))?;
        mesh.point_arrays = ArrayCollection::from_stream(stream)?;
        mesh.cell_arrays = ArrayCollection::from_stream(stream)?;
        mesh.information_arrays = ArrayCollection::from_stream(stream)?;
        Ok(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_mesh() -> CartesianMesh {
        let mut mesh = CartesianMesh::new();
        mesh.set_x_coordinates("lon", Arc::new(VariantArray::from_vec(vec![0.0f64, 10.0])));
        mesh.set_y_coordinates("lat", Arc::new(VariantArray::from_vec(vec![10.0f64, 0.0])));
        mesh.set_z_coordinates("z", Arc::new(VariantArray::from_vec(vec![0.0f64])));
        mesh.set_extent([0, 1, 0, 1, 0, 0]);
        mesh.set_whole_extent([0, 1, 0, 1, 0, 0]);
        mesh.set_bounds([0.0, 10.0, 0.0, 10.0, 0.0, 0.0]);
        mesh.set_time(1.0);
        mesh.set_time_step(1);
        mesh.point_arrays_mut().set(
            "T",
            Arc::new(VariantArray::from_vec(vec![10.0f64, 11.0, 20.0, 21.0])),
        );
        mesh
    }

    #[test]
    fn test_validate_accepts_consistent_mesh() {
        sample_mesh().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_short_point_array() {
        let mut mesh = sample_mesh();
        mesh.point_arrays_mut()
            .set("bad", Arc::new(VariantArray::from_vec(vec![1.0f64])));
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_coordinate_mismatch() {
        let mut mesh = sample_mesh();
        mesh.set_extent([0, 2, 0, 1, 0, 0]);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_shallow_copy_aliases_arrays() {
        let mesh = sample_mesh();
        let copy = mesh.clone();
        assert!(Arc::ptr_eq(
            mesh.point_arrays().get("T").unwrap(),
            copy.point_arrays().get("T").unwrap()
        ));
    }

    #[test]
    fn test_round_trip() {
        let mesh = sample_mesh();
        let mut s = BinaryStream::new();
        mesh.to_stream(&mut s);
        assert_eq!(CartesianMesh::from_stream(&mut s).unwrap(), mesh);
    }
}
