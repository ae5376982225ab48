//! Vertical integral over hybrid or sigma coordinates.

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

/// Vertical coordinate system of the integrand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordinateSystem {
    /// `p = a * p_top + b * ps`
    Hybrid,
    /// `p = (ps - p_top) * sigma + p_top`
    Sigma,
}

/// `-1/g * sum_k q * dp`, columnwise.
///
/// `array` has shape `[z, y, x]`; `a_or_sigma` and `b` sit on the
/// `nz + 1` level interfaces; `ps` has shape `[y, x]` in Pa.
fn vertical_integral<T: Float>(
    array: &[T],
    nx: usize,
    ny: usize,
    nz: usize,
    csystem: CoordinateSystem,
    a_or_sigma: &[T],
    b: &[T],
    ps: &[T],
    p_top: T,
) -> Vec<T> {
    let neg_one_over_g: T = cast(-1.0 / 9.81);
    let mut out = vec![T::zero(); nx * ny];
    for j in 0..ny {
        for i in 0..nx {
            let n2d = j * nx + i;
            let mut integral = T::zero();
            for k in 0..nz {
                let n3d = k * nx * ny + n2d;
                let dp = match csystem {
                    CoordinateSystem::Hybrid => {
                        let da = a_or_sigma[k + 1] - a_or_sigma[k];
                        let db = b[k + 1] - b[k];
                        p_top * da + ps[n2d] * db
                    }
                    CoordinateSystem::Sigma => {
                        let dsigma = a_or_sigma[k + 1] - a_or_sigma[k];
                        (ps[n2d] - p_top) * dsigma
                    }
                };
                integral = integral + neg_one_over_g * array[n3d] * dp;
            }
            out[n2d] = integral;
        }
    }
    out
}

fn descriptors() -> &'static [PropertyDescriptor] {
    static DESCRIPTORS: OnceLock<Vec<PropertyDescriptor>> = OnceLock::new();
    DESCRIPTORS.get_or_init(|| {
        vec![
            PropertyDescriptor::new(
                "integration_variable",
                PropertyValue::Str(String::new()),
                "the 3D array to integrate",
            ),
            PropertyDescriptor::new(
                "output_variable_name",
                PropertyValue::Str("integrated_var".into()),
                "name for the integrated output variable",
            ),
            PropertyDescriptor::new(
                "long_name",
                PropertyValue::Str("integrated_var".into()),
                "long name of the output variable",
            ),
            PropertyDescriptor::new(
                "units",
                PropertyValue::Str("unknown".into()),
                "units of the output variable",
            ),
            PropertyDescriptor::new(
                "hybrid_a_variable",
                PropertyValue::Str("a_bnds".into()),
                "name of the a coordinate of the hybrid coordinate system",
            ),
            PropertyDescriptor::new(
                "hybrid_b_variable",
                PropertyValue::Str("b_bnds".into()),
                "name of the b coordinate of the hybrid coordinate system",
            ),
            PropertyDescriptor::new(
                "sigma_variable",
                PropertyValue::Str("sigma_bnds".into()),
                "name of the sigma coordinate",
            ),
            PropertyDescriptor::new(
                "surface_p_variable",
                PropertyValue::Str("ps".into()),
                "name of the surface pressure variable",
            ),
            PropertyDescriptor::new(
                "p_top_variable",
                PropertyValue::Str("ptop".into()),
                "name of the model top pressure variable",
            ),
            PropertyDescriptor::new(
                "using_hybrid",
                PropertyValue::Bool(true),
                "whether the vertical coordinate is hybrid or sigma",
            ),
            PropertyDescriptor::new(
                "p_top_override_value",
                PropertyValue::Float(-1.0),
                "when positive, use this model top pressure instead of reading one",
            ),
        ]
    })
}

/// Integrates a 3D variable over its vertical column, producing a 2D
/// mesh (the z extent collapses).
pub struct VerticalIntegral {
    properties: PropertyBag,
}

impl Default for VerticalIntegral {
    fn default() -> Self {
        Self::new()
    }
}

impl VerticalIntegral {
    /// Create the stage; `integration_variable` must be set.
    pub fn new() -> Self {
        Self {
            properties: PropertyBag::from_descriptors(descriptors()),
        }
    }

    fn coordinate_system(&self) -> Result<CoordinateSystem> {
        Ok(if self.properties.bool("using_hybrid")? {
            CoordinateSystem::Hybrid
        } else {
            CoordinateSystem::Sigma
        })
    }

    fn p_top_override(&self) -> Result<Option<f64>> {
        let value = self.properties.float("p_top_override_value")?;
        Ok((value > 0.0).then_some(value))
    }
}

impl Stage for VerticalIntegral {
    fn name(&self) -> &str {
        "vertical_integral"
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
        let mut out_md = input_md[0].clone();

        let mut whole_extent = out_md.get_extent("whole_extent").unwrap_or_default();
        if whole_extent[5] == whole_extent[4] {
            return Err(Error::semantic(format!(
                "the vertical integral requires 3D data, the dataset whole_extent \
                 is {whole_extent:?}"
            )));
        }

        // the output has no z dimension
        whole_extent[4] = 0;
        whole_extent[5] = 0;
        out_md.set("whole_extent", whole_extent);
        if let Some(mut bounds) = out_md.get_bounds("bounds") {
            bounds[4] = 0.0;
            bounds[5] = 0.0;
            out_md.set("bounds", bounds);
        }
        if let Some(coordinates) = out_md.metadata("coordinates") {
            let mut coordinates = coordinates.clone();
            if let Some(z) = coordinates.array("z") {
                let mut flat = z.new_instance();
                flat.resize(1);
                coordinates.set("z", flat);
            }
            out_md.set("coordinates", coordinates);
        }

        let output_variable = self.properties.required_str("output_variable_name")?;
        out_md.append_str("variables", output_variable);

        let mut atts = out_md.metadata("attributes").cloned().unwrap_or_default();
        let mut out_atts = Metadata::new();
        out_atts.set("long_name", self.properties.str("long_name")?);
        out_atts.set("units", self.properties.str("units")?);
        atts.set(output_variable, out_atts);
        out_md.set("attributes", atts);
        Ok(out_md)
    }

    fn translate_request(
        &self,
        _port: usize,
        _input_md: &[Metadata],
        request: &Metadata,
    ) -> Result<Requests> {
        let mut up_req = request.clone();

        match self.coordinate_system()? {
            CoordinateSystem::Hybrid => {
                request_arrays(
                    &mut up_req,
                    &[
                        self.properties.required_str("hybrid_a_variable")?,
                        self.properties.required_str("hybrid_b_variable")?,
                    ],
                );
            }
            CoordinateSystem::Sigma => {
                request_arrays(&mut up_req, &[self.properties.required_str("sigma_variable")?]);
            }
        }
        request_arrays(&mut up_req, &[self.properties.required_str("surface_p_variable")?]);
        if self.p_top_override()?.is_none() {
            request_arrays(&mut up_req, &[self.properties.required_str("p_top_variable")?]);
        }
        request_arrays(&mut up_req, &[self.properties.required_str("integration_variable")?]);

        // intercept the request for our output
        remove_array(&mut up_req, self.properties.required_str("output_variable_name")?);

        // the integral needs the full vertical column
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
        let in_mesh = inputs[0].require_mesh()?;
        let (nx, ny, nz) = in_mesh.dimensions();
        let csystem = self.coordinate_system()?;

        let info = in_mesh.information_arrays();
        let a_or_sigma = match csystem {
            CoordinateSystem::Hybrid => {
                info.require(self.properties.required_str("hybrid_a_variable")?)?
            }
            CoordinateSystem::Sigma => {
                info.require(self.properties.required_str("sigma_variable")?)?
            }
        };
        if a_or_sigma.len() != nz + 1 {
            return Err(Error::semantic(format!(
                "the vertical coordinate has {} interfaces, {} levels need {}",
                a_or_sigma.len(),
                nz,
                nz + 1
            )));
        }
        let b = match csystem {
            CoordinateSystem::Hybrid => Some(
                info.require(self.properties.required_str("hybrid_b_variable")?)?
                    .clone(),
            ),
            CoordinateSystem::Sigma => None,
        };

        let ps = info.require(self.properties.required_str("surface_p_variable")?)?;
        if ps.len() != nx * ny {
            return Err(Error::semantic(format!(
                "surface pressure has {} values, the mesh has {} columns",
                ps.len(),
                nx * ny
            )));
        }

        let p_top = match self.p_top_override()? {
            Some(value) => value,
            None => info
                .require(self.properties.required_str("p_top_variable")?)?
                .get_f64(0)?,
        };

        let integrand_name = self.properties.required_str("integration_variable")?;
        let integrand = in_mesh.point_arrays().require(integrand_name)?;
        if integrand.len() != nx * ny * nz {
            return Err(Error::semantic(format!(
                "\"{integrand_name}\" has {} values, the mesh extent covers {}",
                integrand.len(),
                nx * ny * nz
            )));
        }

        // dispatch on the integrand type; coordinates and pressure are
        // widened to match
        let integrated = match integrand.element_type() {
            ArrayType::Float32 => run::<f32>(
                integrand, nx, ny, nz, csystem, a_or_sigma, b.as_deref(), ps, p_top,
            )?,
            ArrayType::Float64 => run::<f64>(
                integrand, nx, ny, nz, csystem, a_or_sigma, b.as_deref(), ps, p_top,
            )?,
            other => {
                return Err(Error::semantic(format!(
                    "the vertical integral requires a floating point integrand, got {other:?}"
                )))
            }
        };

        // build the collapsed output mesh
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

        // keep the non-spatial inputs, attach the integral
        for (name, array) in info.iter() {
            out_mesh.information_arrays_mut().set(name, array.clone());
        }
        out_mesh.point_arrays_mut().set(
            self.properties.required_str("output_variable_name")?,
            Arc::new(integrated),
        );
        Ok(Dataset::Mesh(out_mesh).into_ref())
    }
}

#[allow(clippy::too_many_arguments)]
fn run<T: Float + crate::array::ArrayElement>(
    integrand: &VariantArray,
    nx: usize,
    ny: usize,
    nz: usize,
    csystem: CoordinateSystem,
    a_or_sigma: &VariantArray,
    b: Option<&VariantArray>,
    ps: &VariantArray,
    p_top: f64,
) -> Result<VariantArray> {
    let array = integrand
        .as_slice::<T>()
        .ok_or_else(|| Error::semantic("integrand type mismatch"))?;
    let widen = |v: &VariantArray| -> Result<Vec<T>> {
        Ok(v.to_f64_vec()?.into_iter().map(|x| cast(x)).collect())
    };
    let a_or_sigma = widen(a_or_sigma)?;
    let b = match b {
        Some(b) => widen(b)?,
        None => vec![T::zero(); a_or_sigma.len()],
    };
    let ps = widen(ps)?;
    Ok(VariantArray::from_vec(vertical_integral(
        array,
        nx,
        ny,
        nz,
        csystem,
        &a_or_sigma,
        &b,
        &ps,
        cast(p_top),
    )))
}
