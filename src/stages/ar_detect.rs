//! Atmospheric river detection over IVT magnitude.
//!
//! A map-reduce stage: one downstream interval (day, month, season,
//! year) is produced from the many upstream time steps it spans. The
//! per-step map thresholds the IVT field and labels 4-connected
//! components; each component large enough is a candidate atmospheric
//! river and becomes one row of a detection table. The reduce operator
//! concatenates per-step rows — concatenation is not commutative, so
//! the operator is ordered and the driver combines partials by their
//! stable sequence ids.

use crate::array::VariantArray;
use crate::dataset::{CartesianMesh, Dataset, DatasetRef, Table};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::stage::{
    keys, request_arrays, DatasetReducer, PropertyBag, PropertyDescriptor, PropertyValue,
    Requests, Stage,
};
use crate::stages::temporal_reduction::{compute_intervals, Interval, IntervalSpan};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};

/// Label 4-connected components of `mask`; returns the point count of
/// each component, largest first.
fn component_areas(mask: &[bool], nx: usize, ny: usize) -> Vec<u64> {
    let mut seen = vec![false; mask.len()];
    let mut areas = Vec::new();
    let mut queue = VecDeque::new();
    for start in 0..mask.len() {
        if !mask[start] || seen[start] {
            continue;
        }
        let mut area = 0u64;
        seen[start] = true;
        queue.push_back(start);
        while let Some(p) = queue.pop_front() {
            area += 1;
            let (i, j) = (p % nx, p / nx);
            let mut visit = |q: usize| {
                if mask[q] && !seen[q] {
                    seen[q] = true;
                    queue.push_back(q);
                }
            };
            if i > 0 {
                visit(p - 1);
            }
            if i + 1 < nx {
                visit(p + 1);
            }
            if j > 0 {
                visit(p - nx);
            }
            if j + 1 < ny {
                visit(p + nx);
            }
        }
        areas.push(area);
    }
    areas.sort_unstable_by(|a, b| b.cmp(a));
    areas
}

/// The binary reduce operator: the per-step detection (the map) runs
/// in `lift`, and `reduce` concatenates detection rows. Ordered, so
/// the output table is in step order.
struct ArDetectReducer {
    ivt_variable: String,
    threshold: f64,
    min_area: u64,
    tolerate_missing: bool,
}

impl ArDetectReducer {
    /// Detect candidates on one step's mesh: one detection-table row.
    fn detect(&self, mesh: &CartesianMesh) -> Result<Table> {
        let (nx, ny, nz) = mesh.dimensions();
        if nz != 1 {
            return Err(Error::semantic(
                "ar detection expects a 2D (vertically reduced) mesh",
            ));
        }

        let ivt = mesh
            .point_arrays()
            .require(&self.ivt_variable)?
            .to_f64_vec()?;
        let mask: Vec<bool> = ivt.iter().map(|v| *v >= self.threshold).collect();
        let areas: Vec<u64> = component_areas(&mask, nx, ny)
            .into_iter()
            .filter(|a| *a >= self.min_area)
            .collect();

        let n_detections = areas.len() as u64;
        let total_area: u64 = areas.iter().sum();
        let max_area = areas.first().copied().unwrap_or(0);
        tracing::debug!(
            step = mesh.time_step(),
            n_detections,
            max_area,
            "ar detection"
        );

        let mut table = Table::new();
        table.add_column(
            "time_step",
            Arc::new(VariantArray::from_vec(vec![mesh.time_step()])),
        )?;
        table.add_column(
            "time",
            Arc::new(VariantArray::from_vec(vec![mesh.time()])),
        )?;
        table.add_column(
            "ar_count",
            Arc::new(VariantArray::from_vec(vec![n_detections])),
        )?;
        table.add_column(
            "max_area_points",
            Arc::new(VariantArray::from_vec(vec![max_area])),
        )?;
        table.add_column(
            "total_area_points",
            Arc::new(VariantArray::from_vec(vec![total_area])),
        )?;
        Ok(table)
    }

    /// Lift an upstream datum into detection-table form. Meshes are
    /// detected; already-lifted tables pass through, which is what
    /// makes the operator associative.
    fn lift(&self, dataset: &Dataset) -> Result<Table> {
        match dataset {
            Dataset::Table(table) => Ok(table.clone()),
            Dataset::Mesh(mesh) => self.detect(mesh),
            Dataset::Empty => Err(Error::semantic("cannot detect on an empty dataset")),
        }
    }
}

impl DatasetReducer for ArDetectReducer {
    fn reduce(&self, left: DatasetRef, right: DatasetRef) -> Result<DatasetRef> {
        let mut left = self.lift(&left)?;
        let right = self.lift(&right)?;
        left.concatenate(&right)?;
        Ok(Dataset::Table(left).into_ref())
    }

    fn finalize(&self, dataset: DatasetRef, _n: usize) -> Result<DatasetRef> {
        // a single-step interval may arrive unlifted
        Ok(Dataset::Table(self.lift(&dataset)?).into_ref())
    }

    fn ordered(&self) -> bool {
        true
    }

    fn tolerates_missing(&self) -> bool {
        self.tolerate_missing
    }
}

fn descriptors() -> &'static [PropertyDescriptor] {
    static DESCRIPTORS: OnceLock<Vec<PropertyDescriptor>> = OnceLock::new();
    DESCRIPTORS.get_or_init(|| {
        vec![
            PropertyDescriptor::new(
                "ivt_variable",
                PropertyValue::Str("ivt".into()),
                "variable containing the IVT magnitude",
            ),
            PropertyDescriptor::new(
                "threshold",
                PropertyValue::Float(250.0),
                "IVT magnitude above which a point is river candidate (kg m-1 s-1)",
            ),
            PropertyDescriptor::new(
                "min_area",
                PropertyValue::Int(1),
                "smallest component, in mesh points, reported as a detection",
            ),
            PropertyDescriptor::new(
                "interval",
                PropertyValue::Str("daily".into()),
                "steps reduced into one detection table: daily, monthly, \
                 seasonal, or yearly",
            ),
            PropertyDescriptor::new(
                "tolerate_missing",
                PropertyValue::Bool(false),
                "continue an interval when an upstream step fails",
            ),
            PropertyDescriptor::new(
                "thread_pool_size",
                PropertyValue::Int(-1),
                "number of threads for the upstream fan-out (-1)",
            ),
        ]
    })
}

/// Detects atmospheric river candidates in an IVT magnitude field,
/// one detection table per calendar interval.
pub struct ArDetect {
    properties: PropertyBag,
    intervals: Vec<IntervalSpan>,
    reducer: Option<ArDetectReducer>,
}

impl Default for ArDetect {
    fn default() -> Self {
        Self::new()
    }
}

impl ArDetect {
    /// Create the detector with the conventional 250 kg/m/s threshold.
    pub fn new() -> Self {
        Self {
            properties: PropertyBag::from_descriptors(descriptors()),
            intervals: Vec::new(),
            reducer: None,
        }
    }

    fn build_reducer(&self) -> Result<ArDetectReducer> {
        Ok(ArDetectReducer {
            ivt_variable: self.properties.required_str("ivt_variable")?.to_string(),
            threshold: self.properties.float("threshold")?,
            min_area: self.properties.int("min_area")?.max(1) as u64,
            tolerate_missing: self.properties.bool("tolerate_missing")?,
        })
    }
}

impl Stage for ArDetect {
    fn name(&self) -> &str {
        "ar_detect"
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

    fn pool_size(&self) -> i64 {
        self.properties.int("thread_pool_size").unwrap_or(-1)
    }

    fn reducer(&self) -> Option<&dyn DatasetReducer> {
        self.reducer.as_ref().map(|r| r as &dyn DatasetReducer)
    }

    fn report_metadata(&mut self, _port: usize, input_md: &[Metadata]) -> Result<Metadata> {
        let interval = Interval::from_name(self.properties.str("interval")?)?;
        self.intervals = compute_intervals(&input_md[0], interval)?;
        self.reducer = Some(self.build_reducer()?);

        // rewrite the pipeline keys: downstream sees intervals, not steps
        let mut out_md = input_md[0].clone();
        out_md.set("number_of_intervals", self.intervals.len() as u64);
        out_md.set(keys::INDEX_INITIALIZER, "number_of_intervals");
        out_md.set(keys::INDEX_REQUEST, "interval");

        if let Some(coordinates) = out_md.metadata("coordinates") {
            let mut coordinates = coordinates.clone();
            let times: Vec<f64> = self.intervals.iter().map(|s| s.time).collect();
            coordinates.set("t", times);
            out_md.set("coordinates", coordinates);
        }
        Ok(out_md)
    }

    fn translate_request(
        &self,
        _port: usize,
        input_md: &[Metadata],
        request: &Metadata,
    ) -> Result<Requests> {
        let index = request
            .get_u64("interval")
            .ok_or_else(|| Error::semantic("request is missing \"interval\""))?;
        let span = self.intervals.get(index as usize).ok_or_else(|| {
            Error::semantic(format!(
                "interval {index} requested, {} intervals exist",
                self.intervals.len()
            ))
        })?;
        let upstream_key = input_md[0]
            .get_str(keys::INDEX_REQUEST)
            .unwrap_or("time_step")
            .to_string();

        let mut up_reqs: Requests = SmallVec::new();
        for step in span.first_step..=span.last_step {
            let mut up_req = request.clone();
            up_req.remove("interval");
            up_req.set(keys::INDEX_REQUEST, upstream_key.as_str());
            up_req.set(upstream_key.as_str(), step);
            up_req.set(keys::SEQUENCE, step - span.first_step);
            request_arrays(&mut up_req, &[self.properties.required_str("ivt_variable")?]);
            up_reqs.push(up_req);
        }
        Ok(up_reqs)
    }

    fn execute(
        &mut self,
        _port: usize,
        inputs: &[DatasetRef],
        request: &Metadata,
    ) -> Result<DatasetRef> {
        let index = request.get_u64("interval").unwrap_or(0);
        if index as usize >= self.intervals.len() {
            return Err(Error::semantic("execute called before report_metadata"));
        }

        // the driver already detected and concatenated the steps; stamp
        // the interval identity on the result
        let mut table = inputs[0].require_table()?.clone();
        let md = table.metadata_mut();
        md.set(keys::INDEX_REQUEST, "interval");
        md.set("interval", index);
        Ok(Dataset::Table(table).into_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reducer() -> ArDetectReducer {
        ArDetectReducer {
            ivt_variable: "ivt".to_string(),
            threshold: 250.0,
            min_area: 1,
            tolerate_missing: false,
        }
    }

    fn ivt_mesh(step: u64, values: Vec<f64>) -> DatasetRef {
        let mut mesh = CartesianMesh::new();
        mesh.set_x_coordinates(
            "lon",
            Arc::new(VariantArray::from_vec(vec![0.0f64, 1.0, 2.0])),
        );
        mesh.set_y_coordinates("lat", Arc::new(VariantArray::from_vec(vec![0.0f64, 1.0])));
        mesh.set_extent([0, 2, 0, 1, 0, 0]);
        mesh.set_whole_extent([0, 2, 0, 1, 0, 0]);
        mesh.set_time_step(step);
        mesh.set_time(step as f64);
        mesh.point_arrays_mut()
            .set("ivt", Arc::new(VariantArray::from_vec(values)));
        Dataset::Mesh(mesh).into_ref()
    }

    #[test]
    fn test_component_labeling() {
        // two components on a 4x3 mask, diagonal does not connect
        #[rustfmt::skip]
        let mask = [
            true,  true,  false, false,
            false, false, false, true,
            false, false, true,  true,
        ];
        let areas = component_areas(&mask, 4, 3);
        assert_eq!(areas, vec![3, 2]);
    }

    #[test]
    fn test_empty_mask_has_no_components() {
        assert!(component_areas(&[false; 12], 4, 3).is_empty());
    }

    #[test]
    fn test_lift_detects_one_row_per_step() {
        // 300 and 260 are vertically adjacent: one component of area 2
        let table = reducer()
            .lift(&ivt_mesh(4, vec![300.0, 100.0, 0.0, 260.0, 100.0, 0.0]))
            .unwrap();
        assert_eq!(table.n_rows(), 1);
        assert_eq!(table.column("ar_count").unwrap().get_f64(0).unwrap(), 1.0);
        assert_eq!(
            table.column("total_area_points").unwrap().get_f64(0).unwrap(),
            2.0
        );
        assert_eq!(table.column("time_step").unwrap().get_f64(0).unwrap(), 4.0);
    }

    #[test]
    fn test_reduce_concatenates_in_step_order() {
        let r = reducer();
        let a = ivt_mesh(0, vec![300.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let b = ivt_mesh(1, vec![0.0; 6]);
        let c = ivt_mesh(2, vec![300.0, 0.0, 300.0, 0.0, 0.0, 0.0]);

        let combined = r.reduce(r.reduce(a, b).unwrap(), c).unwrap();
        let table = combined.require_table().unwrap();
        assert_eq!(table.n_rows(), 3);
        let counts: Vec<f64> = (0..3)
            .map(|row| table.column("ar_count").unwrap().get_f64(row).unwrap())
            .collect();
        assert_eq!(counts, vec![1.0, 0.0, 2.0]);
        assert!(r.ordered());
    }

    fn daily_metadata(n: u64) -> Metadata {
        let mut coordinates = Metadata::new();
        coordinates.set("t_variable", "time");
        coordinates.set("t", (0..n).map(|i| i as f64).collect::<Vec<_>>());

        let mut time_atts = Metadata::new();
        time_atts.set("units", "days since 2000-01-01");
        time_atts.set("calendar", "360_day");
        let mut attributes = Metadata::new();
        attributes.set("time", time_atts);

        let mut md = Metadata::new();
        md.set(keys::INDEX_INITIALIZER, "number_of_time_steps");
        md.set(keys::INDEX_REQUEST, "time_step");
        md.set("number_of_time_steps", n);
        md.set("coordinates", coordinates);
        md.set("attributes", attributes);
        md
    }

    #[test]
    fn test_report_rewrites_pipeline_keys() {
        let mut stage = ArDetect::new();
        stage
            .properties_mut()
            .set("interval", PropertyValue::Str("monthly".into()))
            .unwrap();

        let out = stage.report_metadata(0, &[daily_metadata(60)]).unwrap();
        assert_eq!(out.get_u64("number_of_intervals"), Some(2));
        assert_eq!(
            out.get_str(keys::INDEX_INITIALIZER),
            Some("number_of_intervals")
        );
        assert_eq!(out.get_str(keys::INDEX_REQUEST), Some("interval"));
        assert!(stage.reducer().is_some());
    }

    #[test]
    fn test_translate_fans_out_with_sequence_ids() {
        let mut stage = ArDetect::new();
        stage
            .properties_mut()
            .set("interval", PropertyValue::Str("monthly".into()))
            .unwrap();
        let input = daily_metadata(60);
        stage.report_metadata(0, &[input.clone()]).unwrap();

        let mut request = Metadata::new();
        request.set("interval", 1u64);
        let ups = stage.translate_request(0, &[input], &request).unwrap();
        assert_eq!(ups.len(), 30);
        assert_eq!(ups[0].get_u64("time_step"), Some(30));
        assert_eq!(ups[0].get_u64(keys::SEQUENCE), Some(0));
        assert_eq!(ups[29].get_u64("time_step"), Some(59));
        assert_eq!(ups[29].get_u64(keys::SEQUENCE), Some(29));
        assert!(!ups[0].has("interval"));
        assert_eq!(ups[0].get_strs(keys::ARRAYS).unwrap(), vec!["ivt"]);
    }

    #[test]
    fn test_execute_stamps_interval_identity() {
        let mut stage = ArDetect::new();
        stage.report_metadata(0, &[daily_metadata(2)]).unwrap();

        let detections = reducer()
            .lift(&ivt_mesh(1, vec![300.0, 0.0, 0.0, 0.0, 0.0, 0.0]))
            .unwrap();
        let mut request = Metadata::new();
        request.set("interval", 1u64);

        let out = stage
            .execute(0, &[Dataset::Table(detections).into_ref()], &request)
            .unwrap();
        let table = out.require_table().unwrap();
        assert_eq!(table.metadata().get_u64("interval"), Some(1));
        assert_eq!(
            table.metadata().get_str(keys::INDEX_REQUEST),
            Some("interval")
        );
    }
}
