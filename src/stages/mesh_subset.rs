//! Extracts the sub-mesh covering requested coordinate bounds.

use crate::coordinates::bounds_to_extent;
use crate::dataset::DatasetRef;
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::stage::{keys, PropertyBag, PropertyDescriptor, PropertyValue, Requests, Stage};
use smallvec::smallvec;
use std::sync::OnceLock;

fn descriptors() -> &'static [PropertyDescriptor] {
    static DESCRIPTORS: OnceLock<Vec<PropertyDescriptor>> = OnceLock::new();
    DESCRIPTORS.get_or_init(|| {
        vec![PropertyDescriptor::new(
            "bounds",
            PropertyValue::FloatList(Vec::new()),
            "coordinate bounds of the subset: x0,x1,y0,y1,z0,z1",
        )]
    })
}

/// Narrows every request to a fixed coordinate box.
///
/// The subset is produced upstream (the reader slices hyperslabs to the
/// translated extent); this stage owns the bounds-to-extent resolution
/// and the advertised extents.
pub struct MeshSubset {
    properties: PropertyBag,
}

impl Default for MeshSubset {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshSubset {
    /// Create the stage; `bounds` must be set to 6 values.
    pub fn new() -> Self {
        Self {
            properties: PropertyBag::from_descriptors(descriptors()),
        }
    }

    fn bounds(&self) -> Result<[f64; 6]> {
        let v = self.properties.float_list("bounds")?;
        if v.len() != 6 {
            return Err(Error::config(format!(
                "bounds needs 6 values, got {}",
                v.len()
            )));
        }
        Ok([v[0], v[1], v[2], v[3], v[4], v[5]])
    }

    fn subset_extent(&self, input_md: &Metadata) -> Result<[u64; 6]> {
        let coordinates = input_md.require_metadata("coordinates")?;
        bounds_to_extent(
            &self.bounds()?,
            coordinates.require_array("x")?,
            coordinates.require_array("y")?,
            coordinates.require_array("z")?,
        )
    }
}

impl Stage for MeshSubset {
    fn name(&self) -> &str {
        "mesh_subset"
    }

    fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }

    fn descriptors(&self) -> &'static [PropertyDescriptor] {
        descriptors()
    }

    fn report_metadata(&mut self, _port: usize, input_md: &[Metadata]) -> Result<Metadata> {
        let extent = self.subset_extent(&input_md[0])?;

        // advertise the narrowed domain
        let mut out_md = input_md[0].clone();
        out_md.set("whole_extent", extent);
        let coordinates = input_md[0].require_metadata("coordinates")?;
        let x = coordinates.require_array("x")?;
        let y = coordinates.require_array("y")?;
        let z = coordinates.require_array("z")?;
        let mut narrowed = coordinates.clone();
        narrowed.set("x", x.new_copy(extent[0] as usize, extent[1] as usize)?);
        narrowed.set("y", y.new_copy(extent[2] as usize, extent[3] as usize)?);
        narrowed.set("z", z.new_copy(extent[4] as usize, extent[5] as usize)?);
        out_md.set("coordinates", narrowed);
        out_md.set("bounds", self.bounds()?);
        Ok(out_md)
    }

    fn translate_request(
        &self,
        _port: usize,
        input_md: &[Metadata],
        request: &Metadata,
    ) -> Result<Requests> {
        let mut up_req = request.clone();
        up_req.remove(keys::BOUNDS);
        up_req.set(keys::EXTENT, self.subset_extent(&input_md[0])?);
        Ok(smallvec![up_req])
    }

    fn execute(
        &mut self,
        _port: usize,
        inputs: &[DatasetRef],
        _request: &Metadata,
    ) -> Result<DatasetRef> {
        // upstream already produced the subset extent
        Ok(inputs[0].clone())
    }
}
