//! The stage contract.
//!
//! A stage is a node in the pipeline with N inputs, M outputs, a
//! property bag, and three operations the driver invokes in separate
//! passes:
//!
//! - [`Stage::report_metadata`]: advertise what this stage can produce,
//!   given what its upstreams advertise.
//! - [`Stage::translate_request`]: turn a downstream request for this
//!   stage's output into one request per upstream input.
//! - [`Stage::execute`]: produce the requested dataset from the
//!   upstream answers.
//!
//! Stages are connected port-to-port by the driver and never hold
//! references to their neighbors; the only coupling is through metadata,
//! requests, and datasets.

mod properties;

pub use properties::{PropertyBag, PropertyDescriptor, PropertyValue};

use crate::dataset::DatasetRef;
use crate::error::Result;
use crate::metadata::Metadata;
use smallvec::SmallVec;

/// Well-known metadata and request keys.
pub mod keys {
    /// Names the key holding the total work index count.
    pub const INDEX_INITIALIZER: &str = "index_initializer_key";
    /// Names the key a request uses to select a work index.
    pub const INDEX_REQUEST: &str = "index_request_key";
    /// Requested array names.
    pub const ARRAYS: &str = "arrays";
    /// Requested coordinate bounds (6 doubles, inclusive).
    pub const BOUNDS: &str = "bounds";
    /// Requested index extent (6 unsigned integers, inclusive).
    pub const EXTENT: &str = "extent";
    /// Stable sequence id the driver attaches to map-reduce
    /// sub-requests so ordered reducers can combine deterministically.
    pub const SEQUENCE: &str = "sequence_id";
}

/// Upstream requests produced by [`Stage::translate_request`].
///
/// Almost every stage has a single input; map-reduce stages fan a
/// single downstream index out into many upstream requests.
pub type Requests = SmallVec<[Metadata; 1]>;

/// Binary reduce operator for map-reduce stages.
///
/// `reduce` must be associative; unless [`ordered`](Self::ordered) is
/// set it must also be commutative, because the thread pool combines
/// partial results in completion order.
pub trait DatasetReducer: Send + Sync {
    /// Combine two partial results.
    fn reduce(&self, left: DatasetRef, right: DatasetRef) -> Result<DatasetRef>;

    /// Finish a fully-reduced result. `n` is the number of upstream
    /// data that contributed (after missing ones were dropped).
    fn finalize(&self, dataset: DatasetRef, n: usize) -> Result<DatasetRef> {
        let _ = n;
        Ok(dataset)
    }

    /// When true the reduction is not commutative and the driver
    /// combines partials in `sequence_id` order.
    fn ordered(&self) -> bool {
        false
    }

    /// When true a failed upstream datum is dropped from the reduction;
    /// otherwise any failure fails the whole downstream index.
    fn tolerates_missing(&self) -> bool {
        false
    }
}

/// A pipeline stage.
pub trait Stage: Send {
    /// Stage name, used in logs and error records.
    fn name(&self) -> &str;

    /// Number of input connections this stage expects.
    fn n_inputs(&self) -> usize {
        1
    }

    /// Number of output ports this stage exposes.
    fn n_outputs(&self) -> usize {
        1
    }

    /// The stage's configuration values.
    fn properties(&self) -> &PropertyBag;

    /// Mutable configuration values. Writing any property invalidates
    /// the stage's cached reported metadata (the driver watches the
    /// bag's modification counter).
    fn properties_mut(&mut self) -> &mut PropertyBag;

    /// The stage's static property table, used by applications to
    /// generate `stage.prop` command-line flags.
    fn descriptors(&self) -> &'static [PropertyDescriptor] {
        &[]
    }

    /// Produce this stage's output metadata for `port` from the
    /// metadata of each connected upstream output. Must be pure with
    /// respect to the stage's properties and `input_md`.
    fn report_metadata(&mut self, port: usize, input_md: &[Metadata]) -> Result<Metadata>;

    /// Produce one upstream request per input for a downstream
    /// `request` against `port`. Sources return no requests.
    fn translate_request(
        &self,
        port: usize,
        input_md: &[Metadata],
        request: &Metadata,
    ) -> Result<Requests>;

    /// Produce the requested dataset from the upstream answers.
    fn execute(&mut self, port: usize, inputs: &[DatasetRef], request: &Metadata)
        -> Result<DatasetRef>;

    /// The reduce operator, for map-reduce stages whose
    /// `translate_request` fans one downstream index out into a
    /// sequence of upstream requests.
    fn reducer(&self) -> Option<&dyn DatasetReducer> {
        None
    }

    /// Worker count for this stage's thread pool (map-reduce fan-out
    /// and parallel I/O); −1 means hardware concurrency.
    fn pool_size(&self) -> i64 {
        -1
    }
}

/// Copy the two pipeline index keys (and the initializer's target
/// entry) from upstream metadata into a stage's reported metadata.
///
/// Pass-through stages forward both keys unchanged; map-reduce stages
/// rewrite them instead of calling this.
pub fn forward_pipeline_keys(upstream: &Metadata, report: &mut Metadata) {
    for key in [keys::INDEX_INITIALIZER, keys::INDEX_REQUEST] {
        if let Some(value) = upstream.get(key) {
            report.set(key, value.clone());
        }
    }
    if let Some(initializer) = upstream.get_str(keys::INDEX_INITIALIZER) {
        let initializer = initializer.to_string();
        if let Some(value) = upstream.get(&initializer) {
            report.set(initializer, value.clone());
        }
    }
}

/// Add `names` to a request's `arrays` set, preserving order and
/// dropping duplicates.
pub fn request_arrays(request: &mut Metadata, names: &[&str]) {
    let mut arrays = request.get_strs(keys::ARRAYS).unwrap_or_default();
    for name in names {
        if !arrays.iter().any(|a| a == name) {
            arrays.push(name.to_string());
        }
    }
    request.set(keys::ARRAYS, arrays);
}

/// Remove `name` from a request's `arrays` set.
///
/// Transform stages strip the variable they produce before passing a
/// request upstream.
pub fn remove_array(request: &mut Metadata, name: &str) {
    if let Some(arrays) = request.get_strs(keys::ARRAYS) {
        let filtered: Vec<String> = arrays.into_iter().filter(|a| a != name).collect();
        request.set(keys::ARRAYS, filtered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_pipeline_keys() {
        let mut upstream = Metadata::new();
        upstream.set(keys::INDEX_INITIALIZER, "number_of_time_steps");
        upstream.set(keys::INDEX_REQUEST, "time_step");
        upstream.set("number_of_time_steps", 42u64);

        let mut report = Metadata::new();
        forward_pipeline_keys(&upstream, &mut report);
        assert_eq!(
            report.get_str(keys::INDEX_INITIALIZER),
            Some("number_of_time_steps")
        );
        assert_eq!(report.get_str(keys::INDEX_REQUEST), Some("time_step"));
        assert_eq!(report.get_u64("number_of_time_steps"), Some(42));
    }

    #[test]
    fn test_request_arrays_dedup() {
        let mut request = Metadata::new();
        request_arrays(&mut request, &["u", "v"]);
        request_arrays(&mut request, &["v", "ps"]);
        assert_eq!(request.get_strs(keys::ARRAYS).unwrap(), vec!["u", "v", "ps"]);

        remove_array(&mut request, "v");
        assert_eq!(request.get_strs(keys::ARRAYS).unwrap(), vec!["u", "ps"]);
    }
}
