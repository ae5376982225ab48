//! Tolerance-aware dataset comparison.
//!
//! A two-input stage used by regression tests: input 0 is the
//! reference, input 1 the dataset under test. Execute fails when the
//! two differ beyond the tolerance, so a pipeline update over all
//! indices is a full regression run.

use crate::dataset::{diff, Dataset, DatasetRef};
use crate::error::Result;
use crate::metadata::Metadata;
use crate::stage::{PropertyBag, PropertyDescriptor, PropertyValue, Requests, Stage};
use smallvec::smallvec;
use std::sync::OnceLock;

fn descriptors() -> &'static [PropertyDescriptor] {
    static DESCRIPTORS: OnceLock<Vec<PropertyDescriptor>> = OnceLock::new();
    DESCRIPTORS.get_or_init(|| {
        vec![PropertyDescriptor::new(
            "tolerance",
            PropertyValue::Float(1e-6),
            "relative tolerance for numeric comparison",
        )]
    })
}

/// Compares two upstream datasets element-wise.
pub struct DatasetDiff {
    properties: PropertyBag,
}

impl Default for DatasetDiff {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetDiff {
    /// Create the stage with a 1e-6 tolerance.
    pub fn new() -> Self {
        Self {
            properties: PropertyBag::from_descriptors(descriptors()),
        }
    }
}

impl Stage for DatasetDiff {
    fn name(&self) -> &str {
        "dataset_diff"
    }

    fn n_inputs(&self) -> usize {
        2
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
        // drive the iteration from the reference input
        Ok(input_md[0].clone())
    }

    fn translate_request(
        &self,
        _port: usize,
        _input_md: &[Metadata],
        request: &Metadata,
    ) -> Result<Requests> {
        Ok(smallvec![request.clone(), request.clone()])
    }

    fn execute(
        &mut self,
        _port: usize,
        inputs: &[DatasetRef],
        _request: &Metadata,
    ) -> Result<DatasetRef> {
        let tolerance = self.properties.float("tolerance")?;
        diff(&inputs[0], &inputs[1], tolerance)?;
        Ok(Dataset::Empty.into_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::VariantArray;
    use crate::dataset::Table;
    use std::sync::Arc;

    fn table(value: f64) -> DatasetRef {
        let mut t = Table::new();
        t.add_column("v", Arc::new(VariantArray::from_vec(vec![value])))
            .unwrap();
        Dataset::Table(t).into_ref()
    }

    #[test]
    fn test_matching_datasets_pass() {
        let mut stage = DatasetDiff::new();
        let out = stage
            .execute(0, &[table(1.0), table(1.0 + 1e-9)], &Metadata::new())
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_differing_datasets_fail() {
        let mut stage = DatasetDiff::new();
        assert!(stage
            .execute(0, &[table(1.0), table(2.0)], &Metadata::new())
            .is_err());
    }

    #[test]
    fn test_translates_one_request_per_input() {
        let stage = DatasetDiff::new();
        let up = stage
            .translate_request(0, &[Metadata::new(), Metadata::new()], &Metadata::new())
            .unwrap();
        assert_eq!(up.len(), 2);
    }
}
