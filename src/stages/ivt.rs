//! Integrated vapor transport.
//!
//! `IVT = -1/g * integral(v q dp)` over the pressure column, where `q`
//! is specific humidity and `v = (u, v)` the wind vector. A vertical
//! reduction: the 3D mesh becomes a 2D one.

use crate::array::{ArrayType, VariantArray};
use crate::dataset::{CartesianMesh, Dataset, DatasetRef};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::stage::{
    keys, remove_array, request_arrays, PropertyBag, PropertyDescriptor, PropertyValue,
    Requests, Stage,
};
use crate::stages::cast;
use num_traits::Float;
use smallvec::smallvec;
use std::sync::{Arc, OnceLock};

/// Trapezoid rule for `-1/g * integral(f dp)` down each column.
///
/// `f` has shape `[z, y, x]`; `p` holds the `nz` pressure levels in Pa.
fn integrate_columns<T: Float>(f: &[T], p: &[T], nx: usize, ny: usize, nz: usize) -> Vec<T> {
    let neg_one_over_g: T = cast(-1.0 / 9.81);
    let half: T = cast(0.5);
    let mut out = vec![T::zero(); nx * ny];
    for j in 0..ny {
        for i in 0..nx {
            let n2d = j * nx + i;
            let mut integral = T::zero();
            for k in 0..nz - 1 {
                let lo = k * nx * ny + n2d;
                let hi = (k + 1) * nx * ny + n2d;
                integral = integral + half * (f[lo] + f[hi]) * (p[k + 1] - p[k]);
            }
            out[n2d] = neg_one_over_g * integral;
        }
    }
    out
}

fn descriptors() -> &'static [PropertyDescriptor] {
    static DESCRIPTORS: OnceLock<Vec<PropertyDescriptor>> = OnceLock::new();
    DESCRIPTORS.get_or_init(|| {
        vec![
            PropertyDescriptor::new(
                "wind_u_variable",
                PropertyValue::Str("ua".into()),
                "variable containing the longitudinal component of the wind",
            ),
            PropertyDescriptor::new(
                "wind_v_variable",
                PropertyValue::Str("va".into()),
                "variable containing the latitudinal component of the wind",
            ),
            PropertyDescriptor::new(
                "specific_humidity_variable",
                PropertyValue::Str("hus".into()),
                "variable containing the specific humidity",
            ),
            PropertyDescriptor::new(
                "ivt_u_variable",
                PropertyValue::Str("ivt_u".into()),
                "variable to store the longitudinal IVT component in",
            ),
            PropertyDescriptor::new(
                "ivt_v_variable",
                PropertyValue::Str("ivt_v".into()),
                "variable to store the latitudinal IVT component in",
            ),
            PropertyDescriptor::new(
                "ivt_magnitude_variable",
                PropertyValue::Str("ivt".into()),
                "variable to store the IVT magnitude in",
            ),
            PropertyDescriptor::new(
                "output_components",
                PropertyValue::Bool(true),
                "attach the IVT vector components to the output",
            ),
            PropertyDescriptor::new(
                "compute_magnitude",
                PropertyValue::Bool(false),
                "also compute the magnitude of the IVT vector",
            ),
        ]
    })
}

/// Computes IVT from wind and specific humidity on pressure levels.
pub struct Ivt {
    properties: PropertyBag,
}

impl Default for Ivt {
    fn default() -> Self {
        Self::new()
    }
}

impl Ivt {
    /// Create the stage with the CMIP variable names as defaults.
    pub fn new() -> Self {
        Self {
            properties: PropertyBag::from_descriptors(descriptors()),
        }
    }

    /// The outputs selected by the properties, checked for consistency.
    fn outputs(&self) -> Result<(bool, bool)> {
        let components = self.properties.bool("output_components")?;
        let magnitude = self.properties.bool("compute_magnitude")?;
        if !components && !magnitude {
            return Err(Error::config(
                "ivt is configured to produce neither the components nor the magnitude",
            ));
        }
        Ok((components, magnitude))
    }
}

impl Stage for Ivt {
    fn name(&self) -> &str {
        "ivt"
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
        let (components, magnitude) = self.outputs()?;
        let mut out_md = input_md[0].clone();

        let mut whole_extent = out_md.get_extent("whole_extent").unwrap_or_default();
        whole_extent[4] = 0;
        whole_extent[5] = 0;
        out_md.set("whole_extent", whole_extent);
        if let Some(mut bounds) = out_md.get_bounds("bounds") {
            bounds[4] = 0.0;
            bounds[5] = 0.0;
            out_md.set("bounds", bounds);
        }

        let mut atts = out_md.metadata("attributes").cloned().unwrap_or_default();
        let mut advertise = |out_md: &mut Metadata, name: &str, long_name: &str| {
            out_md.append_str("variables", name);
            let mut var_atts = Metadata::new();
            var_atts.set("units", "kg m-1 s-1");
            var_atts.set("long_name", long_name);
            atts.set(name, var_atts);
        };
        if components {
            advertise(
                &mut out_md,
                &self.properties.required_str("ivt_u_variable")?.to_string(),
                "longitudinal component of integrated vapor transport",
            );
            advertise(
                &mut out_md,
                &self.properties.required_str("ivt_v_variable")?.to_string(),
                "latitudinal component of integrated vapor transport",
            );
        }
        if magnitude {
            advertise(
                &mut out_md,
                &self
                    .properties
                    .required_str("ivt_magnitude_variable")?
                    .to_string(),
                "magnitude of integrated vapor transport",
            );
        }
        out_md.set("attributes", atts);
        Ok(out_md)
    }

    fn translate_request(
        &self,
        _port: usize,
        _input_md: &[Metadata],
        request: &Metadata,
    ) -> Result<Requests> {
        let (components, magnitude) = self.outputs()?;

        let mut up_req = request.clone();
        request_arrays(
            &mut up_req,
            &[
                self.properties.required_str("wind_u_variable")?,
                self.properties.required_str("wind_v_variable")?,
                self.properties.required_str("specific_humidity_variable")?,
            ],
        );
        if components {
            remove_array(&mut up_req, self.properties.required_str("ivt_u_variable")?);
            remove_array(&mut up_req, self.properties.required_str("ivt_v_variable")?);
        }
        if magnitude {
            remove_array(
                &mut up_req,
                self.properties.required_str("ivt_magnitude_variable")?,
            );
        }

        // the reduction consumes the whole pressure column
        up_req.remove(keys::BOUNDS);
        up_req.remove(keys::EXTENT);
        Ok(smallvec![up_req])
    }

    fn execute(
        &mut self,
        _port: usize,
        inputs: &[DatasetRef],
        _request: &Metadata,
    ) -> Result<DatasetRef> {
        let (components, magnitude) = self.outputs()?;
        let in_mesh = inputs[0].require_mesh()?;
        let (nx, ny, nz) = in_mesh.dimensions();
        if nz < 2 {
            return Err(Error::semantic("ivt requires at least two pressure levels"));
        }

        let u = in_mesh
            .point_arrays()
            .require(self.properties.required_str("wind_u_variable")?)?;
        let v = in_mesh
            .point_arrays()
            .require(self.properties.required_str("wind_v_variable")?)?;
        let q = in_mesh
            .point_arrays()
            .require(self.properties.required_str("specific_humidity_variable")?)?;

        let (ivt_u, ivt_v) = match q.element_type() {
            ArrayType::Float32 => run::<f32>(in_mesh, u, v, q, nx, ny, nz)?,
            ArrayType::Float64 => run::<f64>(in_mesh, u, v, q, nx, ny, nz)?,
            other => {
                return Err(Error::semantic(format!(
                    "ivt requires floating point inputs, got {other:?}"
                )))
            }
        };

        let mut out_mesh = CartesianMesh::new();
        let (x_var, y_var, _, t_var) = in_mesh.coordinate_variables();
        out_mesh.set_x_coordinates(x_var.to_string(), in_mesh.x_coordinates().clone());
        out_mesh.set_y_coordinates(y_var.to_string(), in_mesh.y_coordinates().clone());
        let mut flat_z = in_mesh.z_coordinates().new_instance();
        flat_z.resize(1);
        out_mesh.set_z_coordinates("z", Arc::new(flat_z));
        out_mesh.set_t_variable(t_var.to_string());
        out_mesh.set_time(in_mesh.time());
        out_mesh.set_time_step(in_mesh.time_step());
        out_mesh.set_calendar(in_mesh.calendar());
        out_mesh.set_time_units(in_mesh.time_units());
        *out_mesh.metadata_mut() = in_mesh.metadata().clone();

        let mut extent = in_mesh.extent();
        let mut whole_extent = in_mesh.whole_extent();
        let mut bounds = in_mesh.bounds();
        for n in 4..6 {
            extent[n] = 0;
            whole_extent[n] = 0;
            bounds[n] = 0.0;
        }
        out_mesh.set_extent(extent);
        out_mesh.set_whole_extent(whole_extent);
        out_mesh.set_bounds(bounds);

        if magnitude {
            let mut mag = ivt_u.new_instance();
            mag.resize(ivt_u.len());
            for i in 0..ivt_u.len() {
                let (a, b) = (ivt_u.get_f64(i)?, ivt_v.get_f64(i)?);
                mag.set_f64(i, (a * a + b * b).sqrt())?;
            }
            out_mesh.point_arrays_mut().set(
                self.properties.required_str("ivt_magnitude_variable")?,
                Arc::new(mag),
            );
        }
        if components {
            out_mesh
                .point_arrays_mut()
                .set(self.properties.required_str("ivt_u_variable")?, Arc::new(ivt_u));
            out_mesh
                .point_arrays_mut()
                .set(self.properties.required_str("ivt_v_variable")?, Arc::new(ivt_v));
        }
        Ok(Dataset::Mesh(out_mesh).into_ref())
    }
}

fn run<T: Float + crate::array::ArrayElement>(
    in_mesh: &CartesianMesh,
    u: &VariantArray,
    v: &VariantArray,
    q: &VariantArray,
    nx: usize,
    ny: usize,
    nz: usize,
) -> Result<(VariantArray, VariantArray)> {
    let type_error = || Error::semantic("ivt inputs must share one element type");
    let u = u.as_slice::<T>().ok_or_else(type_error)?;
    let v = v.as_slice::<T>().ok_or_else(type_error)?;
    let q = q.as_slice::<T>().ok_or_else(type_error)?;
    let p: Vec<T> = in_mesh
        .z_coordinates()
        .to_f64_vec()?
        .into_iter()
        .map(|x| cast(x))
        .collect();

    let qu: Vec<T> = q.iter().zip(u).map(|(q, u)| *q * *u).collect();
    let qv: Vec<T> = q.iter().zip(v).map(|(q, v)| *q * *v).collect();
    Ok((
        VariantArray::from_vec(integrate_columns(&qu, &p, nx, ny, nz)),
        VariantArray::from_vec(integrate_columns(&qv, &p, nx, ny, nz)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_integral_against_hand_computed_value() {
        // one column, q*u constant 1: integral is -(p1 - p0)/g
        let f = [1.0f64, 1.0];
        let p = [100000.0, 50000.0];
        let out = integrate_columns(&f, &p, 1, 1, 2);
        let expected = -(50000.0 - 100000.0) / 9.81;
        assert!((out[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_no_outputs_selected_is_config_error() {
        let mut stage = Ivt::new();
        stage
            .properties_mut()
            .set("output_components", PropertyValue::Bool(false))
            .unwrap();
        assert!(matches!(stage.outputs(), Err(Error::Config(_))));

        stage
            .properties_mut()
            .set("compute_magnitude", PropertyValue::Bool(true))
            .unwrap();
        assert_eq!(stage.outputs().unwrap(), (false, true));
    }

    #[test]
    fn test_translate_requests_wind_and_humidity() {
        let stage = Ivt::new();
        let request = Metadata::new();
        let up = stage
            .translate_request(0, &[Metadata::new()], &request)
            .unwrap();
        let arrays = up[0].get_strs(keys::ARRAYS).unwrap();
        assert_eq!(arrays, vec!["ua", "va", "hus"]);
    }
}
