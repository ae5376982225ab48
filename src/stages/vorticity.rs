//! Relative vorticity of a vector field on a lat/lon mesh.

use crate::array::{ArrayType, VariantArray};
use crate::dataset::{Dataset, DatasetRef};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::stage::{
    remove_array, request_arrays, PropertyBag, PropertyDescriptor, PropertyValue, Requests,
    Stage,
};
use crate::stages::cast;
use num_traits::Float;
use smallvec::smallvec;
use std::sync::{Arc, OnceLock};

const EARTH_RADIUS_M: f64 = 6371.0e3;

/// Finite-difference curl of (comp_0, comp_1) on a spherical lat/lon
/// grid. Interior points only; the boundary rows and columns stay zero.
fn vorticity<T: Float>(
    lat: &[T],
    lon: &[T],
    comp_0: &[T],
    comp_1: &[T],
) -> Vec<T> {
    let (nx, ny) = (lon.len(), lat.len());
    let deg_to_rad: T = cast(std::f64::consts::PI / 180.0);
    let radius: T = cast(EARTH_RADIUS_M);
    let half: T = cast(0.5);

    // grid spacing in meters from degrees longitude, per row
    let dlon = (lon[1] - lon[0]) * deg_to_rad;
    let dx: Vec<T> = lat
        .iter()
        .map(|lat_j| radius * (*lat_j * deg_to_rad).cos() * dlon)
        .collect();

    // centered spacing in meters from degrees latitude
    let mut dy = vec![T::zero(); ny];
    for j in 1..ny - 1 {
        dy[j] = half * radius * deg_to_rad * (lat[j - 1] - lat[j + 1]);
    }
    dy[0] = dy[1];
    dy[ny - 1] = dy[ny - 2];

    let mut w = vec![T::zero(); nx * ny];
    for j in 1..ny - 1 {
        let row = j * nx;
        let below = row - nx;
        let above = row + nx;
        for i in 1..nx - 1 {
            w[row + i] = half
                * ((comp_1[row + i + 1] - comp_1[row + i - 1]) / dx[j]
                    - (comp_0[below + i] - comp_0[above + i]) / dy[j]);
        }
    }
    w
}

fn descriptors() -> &'static [PropertyDescriptor] {
    static DESCRIPTORS: OnceLock<Vec<PropertyDescriptor>> = OnceLock::new();
    DESCRIPTORS.get_or_init(|| {
        vec![
            PropertyDescriptor::new(
                "component_0_variable",
                PropertyValue::Str(String::new()),
                "array containing the lon component of the vector",
            ),
            PropertyDescriptor::new(
                "component_1_variable",
                PropertyValue::Str(String::new()),
                "array containing the lat component of the vector",
            ),
            PropertyDescriptor::new(
                "vorticity_variable",
                PropertyValue::Str("vorticity".into()),
                "array to store the computed vorticity in",
            ),
        ]
    })
}

/// Computes relative vorticity from a (u, v) pair.
pub struct Vorticity {
    properties: PropertyBag,
}

impl Default for Vorticity {
    fn default() -> Self {
        Self::new()
    }
}

impl Vorticity {
    /// Create the stage; the component variables must be set.
    pub fn new() -> Self {
        Self {
            properties: PropertyBag::from_descriptors(descriptors()),
        }
    }

    fn output_variable(&self) -> Result<String> {
        Ok(self.properties.required_str("vorticity_variable")?.to_string())
    }
}

impl Stage for Vorticity {
    fn name(&self) -> &str {
        "vorticity"
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
        // advertise the array we will generate
        let mut out_md = input_md[0].clone();
        out_md.append_str("variables", self.output_variable()?);

        let mut atts = out_md.metadata("attributes").cloned().unwrap_or_default();
        let mut vort_atts = Metadata::new();
        vort_atts.set("units", "1/s");
        vort_atts.set("long_name", "relative vorticity");
        atts.set(self.output_variable()?, vort_atts);
        out_md.set("attributes", atts);
        Ok(out_md)
    }

    fn translate_request(
        &self,
        _port: usize,
        _input_md: &[Metadata],
        request: &Metadata,
    ) -> Result<Requests> {
        let comp_0 = self.properties.required_str("component_0_variable")?;
        let comp_1 = self.properties.required_str("component_1_variable")?;

        // preserve the downstream requirements, add the arrays we need,
        // and capture the array we produce
        let mut up_req = request.clone();
        request_arrays(&mut up_req, &[comp_0, comp_1]);
        remove_array(&mut up_req, &self.output_variable()?);
        Ok(smallvec![up_req])
    }

    fn execute(
        &mut self,
        _port: usize,
        inputs: &[DatasetRef],
        _request: &Metadata,
    ) -> Result<DatasetRef> {
        let in_mesh = inputs[0].require_mesh()?;

        let comp_0_var = self.properties.required_str("component_0_variable")?;
        let comp_1_var = self.properties.required_str("component_1_variable")?;
        let comp_0 = in_mesh.point_arrays().require(comp_0_var)?;
        let comp_1 = in_mesh.point_arrays().require(comp_1_var)?;

        let lon = in_mesh.x_coordinates().to_f64_vec()?;
        let lat = in_mesh.y_coordinates().to_f64_vec()?;
        let (nx, ny, _) = in_mesh.dimensions();
        if nx < 3 || ny < 3 {
            return Err(Error::semantic(format!(
                "vorticity needs at least a 3x3 mesh, got {nx}x{ny}"
            )));
        }
        if comp_0.len() != nx * ny || comp_1.len() != nx * ny {
            return Err(Error::semantic(
                "vorticity requires 2D (single level) components",
            ));
        }

        // dispatch on the component type and re-enter the generic kernel
        let vort = match comp_0.element_type() {
            ArrayType::Float32 => {
                let lat: Vec<f32> = lat.iter().map(|v| cast(*v)).collect();
                let lon: Vec<f32> = lon.iter().map(|v| cast(*v)).collect();
                let u = comp_0.as_slice::<f32>().ok_or_else(|| {
                    Error::semantic("vorticity components must share one type")
                })?;
                let v = comp_1.as_slice::<f32>().ok_or_else(|| {
                    Error::semantic("vorticity components must share one type")
                })?;
                VariantArray::from_vec(vorticity(&lat, &lon, u, v))
            }
            ArrayType::Float64 => {
                let u = comp_0.as_slice::<f64>().ok_or_else(|| {
                    Error::semantic("vorticity components must share one type")
                })?;
                let v = comp_1.as_slice::<f64>().ok_or_else(|| {
                    Error::semantic("vorticity components must share one type")
                })?;
                VariantArray::from_vec(vorticity(&lat, &lon, u, v))
            }
            other => {
                return Err(Error::semantic(format!(
                    "vorticity requires floating point components, got {other:?}"
                )))
            }
        };

        // pass everything through and add the vorticity array
        let mut out_mesh = in_mesh.clone();
        out_mesh
            .point_arrays_mut()
            .set(self.output_variable()?, Arc::new(vort));
        Ok(Dataset::Mesh(out_mesh).into_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::keys;

    #[test]
    fn test_constant_field_has_zero_interior_vorticity() {
        // a 3x3 mesh with constant u and v
        let lat = [10.0, 0.0, -10.0];
        let lon = [0.0, 10.0, 20.0];
        let u = [1.0f64; 9];
        let v = [1.0f64; 9];
        let w = vorticity(&lat, &lon, &u, &v);
        assert!(w[4].abs() < 1e-12);
        // boundary stays zero
        assert_eq!(w[0], 0.0);
        assert_eq!(w[8], 0.0);
    }

    #[test]
    fn test_translate_adds_components_and_strips_output() {
        let mut stage = Vorticity::new();
        stage
            .properties_mut()
            .set("component_0_variable", PropertyValue::Str("u".into()))
            .unwrap();
        stage
            .properties_mut()
            .set("component_1_variable", PropertyValue::Str("v".into()))
            .unwrap();

        let mut request = Metadata::new();
        request.set(keys::ARRAYS, vec!["vorticity".to_string()]);
        request.set("time_step", 3u64);

        let up = stage.translate_request(0, &[Metadata::new()], &request).unwrap();
        assert_eq!(up.len(), 1);
        let arrays = up[0].get_strs(keys::ARRAYS).unwrap();
        assert!(arrays.contains(&"u".to_string()));
        assert!(arrays.contains(&"v".to_string()));
        assert!(!arrays.contains(&"vorticity".to_string()));
        assert_eq!(up[0].get_u64("time_step"), Some(3));
    }

    #[test]
    fn test_report_appends_variable() {
        let mut stage = Vorticity::new();
        let mut input = Metadata::new();
        input.set("variables", vec!["u".to_string(), "v".to_string()]);

        let out = stage.report_metadata(0, &[input]).unwrap();
        assert_eq!(
            out.get_strs("variables").unwrap(),
            vec!["u", "v", "vorticity"]
        );
        assert!(out
            .metadata("attributes")
            .unwrap()
            .metadata("vorticity")
            .is_some());
    }
}
