//! Calendar-aware temporal reduction.
//!
//! A map-reduce stage: one downstream interval (day, month, season,
//! year) is produced from the many upstream time steps it spans. The
//! driver schedules the upstream requests through the stage's thread
//! pool and folds partial results through [`TemporalReducer`], which is
//! associative and commutative, so partials may combine in any order.

use crate::array::VariantArray;
use crate::calendar::{self, Calendar, Units};
use crate::dataset::{CartesianMesh, Dataset, DatasetRef};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::stage::{
    keys, request_arrays, DatasetReducer, PropertyBag, PropertyDescriptor, PropertyValue,
    Requests, Stage,
};
use smallvec::SmallVec;
use std::sync::{Arc, OnceLock};

/// Reduction operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Average,
    Minimum,
    Maximum,
}

impl Operator {
    fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "average" => Self::Average,
            "minimum" | "min" => Self::Minimum,
            "maximum" | "max" => Self::Maximum,
            other => return Err(Error::config(format!("unknown operator \"{other}\""))),
        })
    }
}

/// Grouping interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interval {
    Daily,
    Monthly,
    Seasonal,
    Yearly,
}

impl Interval {
    pub(crate) fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "daily" => Self::Daily,
            "monthly" => Self::Monthly,
            "seasonal" => Self::Seasonal,
            "yearly" => Self::Yearly,
            other => return Err(Error::config(format!("unknown interval \"{other}\""))),
        })
    }

    fn key(&self, date: &calendar::Date) -> (i64, u32) {
        match self {
            Self::Daily => (date.year * 400 + date.month as i64, date.day),
            Self::Monthly => (date.year, date.month),
            Self::Seasonal => (date.year, (date.month - 1) / 3),
            Self::Yearly => (date.year, 0),
        }
    }
}

/// One downstream index: the span of upstream steps it covers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IntervalSpan {
    pub(crate) first_step: u64,
    pub(crate) last_step: u64,
    /// Representative time (the first step's time value).
    pub(crate) time: f64,
}

/// Group the upstream time axis into calendar intervals; each span
/// becomes one downstream work index.
pub(crate) fn compute_intervals(
    input_md: &Metadata,
    interval: Interval,
) -> Result<Vec<IntervalSpan>> {
    let coordinates = input_md.require_metadata("coordinates")?;
    let t = coordinates.require_array("t")?.to_f64_vec()?;
    let t_variable = coordinates.get_str("t_variable").unwrap_or("time").to_string();
    let time_atts = input_md
        .require_metadata("attributes")?
        .require_metadata(&t_variable)?;
    let units = Units::parse(time_atts.get_str("units").ok_or_else(|| {
        Error::semantic("the temporal reduction requires time units upstream")
    })?)?;
    let cal = Calendar::from_name(time_atts.get_str("calendar").unwrap_or("standard"))?;

    let mut spans: Vec<IntervalSpan> = Vec::new();
    let mut current_key = None;
    for (step, time) in t.iter().enumerate() {
        let date = calendar::offset_to_date(*time, &units, cal)?;
        let key = interval.key(&date);
        if current_key == Some(key) {
            if let Some(span) = spans.last_mut() {
                span.last_step = step as u64;
            }
        } else {
            spans.push(IntervalSpan {
                first_step: step as u64,
                last_step: step as u64,
                time: *time,
            });
            current_key = Some(key);
        }
    }
    Ok(spans)
}

fn count_name(array: &str) -> String {
    format!("{array}__valid_count")
}

/// The binary reduce operator: elementwise average/min/max over the
/// named arrays, fill-value aware, commutative and associative.
struct TemporalReducer {
    arrays: Vec<String>,
    operator: Operator,
    fill_value: Option<f64>,
    tolerate_missing: bool,
}

impl TemporalReducer {
    fn is_valid(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match self.fill_value {
            Some(fill) => value != fill,
            None => true,
        }
    }

    /// Lift a mesh into accumulator form: per array a Float64 running
    /// value plus a per-point valid count. Already-lifted meshes pass
    /// through, which is what makes the operator associative.
    fn lift(&self, mesh: &CartesianMesh) -> Result<CartesianMesh> {
        if self
            .arrays
            .iter()
            .all(|name| mesh.point_arrays().has(&count_name(name)))
        {
            return Ok(mesh.clone());
        }
        let mut lifted = mesh.clone();
        for name in &self.arrays {
            let raw = mesh.point_arrays().require(name)?.to_f64_vec()?;
            let mut counts = vec![0.0f64; raw.len()];
            let mut values = vec![0.0f64; raw.len()];
            for i in 0..raw.len() {
                if self.is_valid(raw[i]) {
                    counts[i] = 1.0;
                    values[i] = raw[i];
                }
            }
            lifted
                .point_arrays_mut()
                .set(name.as_str(), Arc::new(VariantArray::from_vec(values)));
            lifted.point_arrays_mut().set(
                count_name(name),
                Arc::new(VariantArray::from_vec(counts)),
            );
        }
        Ok(lifted)
    }
}

impl DatasetReducer for TemporalReducer {
    fn reduce(&self, left: DatasetRef, right: DatasetRef) -> Result<DatasetRef> {
        let left = self.lift(left.require_mesh()?)?;
        let right = self.lift(right.require_mesh()?)?;

        let mut out = left.clone();
        for name in &self.arrays {
            let lv = left.point_arrays().require(name)?.to_f64_vec()?;
            let rv = right.point_arrays().require(name)?.to_f64_vec()?;
            let lc = left.point_arrays().require(&count_name(name))?.to_f64_vec()?;
            let rc = right.point_arrays().require(&count_name(name))?.to_f64_vec()?;
            if lv.len() != rv.len() {
                return Err(Error::semantic(format!(
                    "dimension mismatch reducing \"{name}\": {} vs {}",
                    lv.len(),
                    rv.len()
                )));
            }

            let mut values = vec![0.0f64; lv.len()];
            let mut counts = vec![0.0f64; lv.len()];
            for i in 0..lv.len() {
                counts[i] = lc[i] + rc[i];
                values[i] = match self.operator {
                    Operator::Average => lv[i] + rv[i],
                    Operator::Minimum => match (lc[i] > 0.0, rc[i] > 0.0) {
                        (true, true) => lv[i].min(rv[i]),
                        (true, false) => lv[i],
                        (false, true) => rv[i],
                        (false, false) => 0.0,
                    },
                    Operator::Maximum => match (lc[i] > 0.0, rc[i] > 0.0) {
                        (true, true) => lv[i].max(rv[i]),
                        (true, false) => lv[i],
                        (false, true) => rv[i],
                        (false, false) => 0.0,
                    },
                };
            }
            out.point_arrays_mut()
                .set(name.as_str(), Arc::new(VariantArray::from_vec(values)));
            out.point_arrays_mut().set(
                count_name(name),
                Arc::new(VariantArray::from_vec(counts)),
            );
        }
        Ok(Dataset::Mesh(out).into_ref())
    }

    fn finalize(&self, dataset: DatasetRef, _n: usize) -> Result<DatasetRef> {
        let mesh = self.lift(dataset.require_mesh()?)?;
        let mut out = mesh.clone();
        let missing = self.fill_value.unwrap_or(f64::NAN);
        for name in &self.arrays {
            let values = mesh.point_arrays().require(name)?.to_f64_vec()?;
            let counts = mesh.point_arrays().require(&count_name(name))?.to_f64_vec()?;
            let mut finished = vec![0.0f64; values.len()];
            for i in 0..values.len() {
                finished[i] = if counts[i] == 0.0 {
                    missing
                } else if self.operator == Operator::Average {
                    values[i] / counts[i]
                } else {
                    values[i]
                };
            }
            out.point_arrays_mut()
                .set(name.as_str(), Arc::new(VariantArray::from_vec(finished)));
            out.point_arrays_mut().remove(&count_name(name));
        }
        Ok(Dataset::Mesh(out).into_ref())
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
                "interval",
                PropertyValue::Str("monthly".into()),
                "grouping interval: daily, monthly, seasonal, or yearly",
            ),
            PropertyDescriptor::new(
                "operator",
                PropertyValue::Str("average".into()),
                "reduction operator: average, minimum, or maximum",
            ),
            PropertyDescriptor::new(
                "arrays",
                PropertyValue::StrList(Vec::new()),
                "arrays to reduce",
            ),
            PropertyDescriptor::new(
                "fill_value",
                PropertyValue::Float(f64::NAN),
                "samples equal to this value are excluded from the reduction",
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

/// Reduces per-step meshes to per-interval aggregates.
pub struct TemporalReduction {
    properties: PropertyBag,
    intervals: Vec<IntervalSpan>,
    reducer: Option<TemporalReducer>,
}

impl Default for TemporalReduction {
    fn default() -> Self {
        Self::new()
    }
}

impl TemporalReduction {
    /// Create the stage; `arrays` must be set.
    pub fn new() -> Self {
        Self {
            properties: PropertyBag::from_descriptors(descriptors()),
            intervals: Vec::new(),
            reducer: None,
        }
    }

    fn build_reducer(&self) -> Result<TemporalReducer> {
        let arrays = self.properties.str_list("arrays")?.to_vec();
        if arrays.is_empty() {
            return Err(Error::config(
                "the temporal reduction needs at least one array",
            ));
        }
        let fill = self.properties.float("fill_value")?;
        Ok(TemporalReducer {
            arrays,
            operator: Operator::from_name(self.properties.str("operator")?)?,
            fill_value: (!fill.is_nan()).then_some(fill),
            tolerate_missing: self.properties.bool("tolerate_missing")?,
        })
    }
}

impl Stage for TemporalReduction {
    fn name(&self) -> &str {
        "temporal_reduction"
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

        // the time axis contracts to one representative value per interval
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
            request_arrays(
                &mut up_req,
                &self
                    .properties
                    .str_list("arrays")?
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>(),
            );
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
        let span = self.intervals.get(index as usize).copied().ok_or_else(|| {
            Error::semantic("execute called before report_metadata")
        })?;

        // the driver already folded the upstream steps; stamp the
        // interval identity on the result
        let mut out_mesh = inputs[0].require_mesh()?.clone();
        out_mesh.set_time_step(index);
        out_mesh.set_time(span.time);
        let md = out_mesh.metadata_mut();
        md.set(keys::INDEX_REQUEST, "interval");
        md.set("interval", index);
        Ok(Dataset::Mesh(out_mesh).into_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily_metadata(n: u64, calendar: &str) -> Metadata {
        let mut coordinates = Metadata::new();
        coordinates.set("t_variable", "time");
        coordinates.set("t", (0..n).map(|i| i as f64).collect::<Vec<_>>());

        let mut time_atts = Metadata::new();
        time_atts.set("units", "days since 2000-01-01");
        time_atts.set("calendar", calendar);
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

    fn scalar_mesh(value: f64) -> DatasetRef {
        let mut mesh = CartesianMesh::new();
        mesh.point_arrays_mut()
            .set("T", Arc::new(VariantArray::from_vec(vec![value])));
        Dataset::Mesh(mesh).into_ref()
    }

    fn reducer(operator: &str) -> TemporalReducer {
        TemporalReducer {
            arrays: vec!["T".to_string()],
            operator: Operator::from_name(operator).unwrap(),
            fill_value: None,
            tolerate_missing: false,
        }
    }

    fn value_of(ds: &DatasetRef) -> f64 {
        ds.require_mesh()
            .unwrap()
            .point_arrays()
            .get("T")
            .unwrap()
            .get_f64(0)
            .unwrap()
    }

    #[test]
    fn test_monthly_intervals_on_360_day_calendar() {
        let mut stage = TemporalReduction::new();
        stage
            .properties_mut()
            .set("arrays", PropertyValue::StrList(vec!["T".into()]))
            .unwrap();
        let out = stage.report_metadata(0, &[daily_metadata(60, "360_day")]).unwrap();

        assert_eq!(out.get_u64("number_of_intervals"), Some(2));
        assert_eq!(out.get_str(keys::INDEX_INITIALIZER), Some("number_of_intervals"));
        assert_eq!(out.get_str(keys::INDEX_REQUEST), Some("interval"));
        assert_eq!(stage.intervals[0].first_step, 0);
        assert_eq!(stage.intervals[0].last_step, 29);
        assert_eq!(stage.intervals[1].first_step, 30);
        assert_eq!(stage.intervals[1].last_step, 59);
    }

    #[test]
    fn test_translate_fans_out_with_sequence_ids() {
        let mut stage = TemporalReduction::new();
        stage
            .properties_mut()
            .set("arrays", PropertyValue::StrList(vec!["T".into()]))
            .unwrap();
        let input = daily_metadata(60, "360_day");
        stage.report_metadata(0, &[input.clone()]).unwrap();

        let mut request = Metadata::new();
        request.set("interval", 1u64);
        let ups = stage.translate_request(0, &[input], &request).unwrap();
        assert_eq!(ups.len(), 30);
        assert_eq!(ups[0].get_u64("time_step"), Some(30));
        assert_eq!(ups[29].get_u64("time_step"), Some(59));
        assert_eq!(ups[29].get_u64(keys::SEQUENCE), Some(29));
        assert!(!ups[0].has("interval"));
        assert_eq!(ups[0].get_strs(keys::ARRAYS).unwrap(), vec!["T"]);
    }

    #[test]
    fn test_average_reduce_matches_monthly_mean() {
        // 30 daily scalars equal to the step index average to 14.5
        let r = reducer("average");
        let mut acc = scalar_mesh(0.0);
        for step in 1..30 {
            acc = r.reduce(acc, scalar_mesh(step as f64)).unwrap();
        }
        let out = r.finalize(acc, 30).unwrap();
        assert!((value_of(&out) - 14.5).abs() < 1e-12);
    }

    #[test]
    fn test_reduce_is_associative() {
        let r = reducer("average");
        let (a, b, c) = (scalar_mesh(1.0), scalar_mesh(5.0), scalar_mesh(9.0));

        let left = r
            .reduce(r.reduce(a.clone(), b.clone()).unwrap(), c.clone())
            .unwrap();
        let right = r.reduce(a, r.reduce(b, c).unwrap()).unwrap();
        let left = r.finalize(left, 3).unwrap();
        let right = r.finalize(right, 3).unwrap();
        assert!((value_of(&left) - value_of(&right)).abs() < 1e-12);
        assert!((value_of(&left) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_min_max_and_fill_values() {
        let mut r = reducer("maximum");
        r.fill_value = Some(-999.0);
        let acc = r.reduce(scalar_mesh(-999.0), scalar_mesh(3.0)).unwrap();
        let out = r.finalize(r.reduce(acc, scalar_mesh(2.0)).unwrap(), 3).unwrap();
        assert_eq!(value_of(&out), 3.0);

        let mut r = reducer("minimum");
        r.fill_value = Some(-999.0);
        let acc = r.reduce(scalar_mesh(-999.0), scalar_mesh(-999.0)).unwrap();
        let out = r.finalize(acc, 2).unwrap();
        // nothing valid: the fill value comes back
        assert_eq!(value_of(&out), -999.0);
    }
}
