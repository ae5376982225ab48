//! Dataset writer stage.
//!
//! A pass-through terminal stage that writes each executed dataset to
//! its own file. The filename pattern interpolates the work index
//! (`%t%`), so ranks executing disjoint index blocks never share a
//! file. Meshes and tables are written as binary dumps (magic header +
//! versioned stream); tables can also be written as CSV.

use crate::dataset::{Dataset, DatasetRef};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::stage::{
    keys, PropertyBag, PropertyDescriptor, PropertyValue, Requests, Stage,
};
use crate::stream::{BinaryStream, Streamable};
use smallvec::smallvec;
use std::path::Path;
use std::sync::OnceLock;

/// Magic tag of dataset dump files.
pub const DATASET_MAGIC: &str = "stratus_dataset";
/// Current dump format revision.
pub const DATASET_REVISION: u32 = 1;

/// Write a dataset dump file.
pub fn write_dataset(path: impl AsRef<Path>, dataset: &Dataset) -> Result<()> {
    let mut stream = BinaryStream::new();
    stream.pack_header(DATASET_MAGIC, DATASET_REVISION);
    dataset.to_stream(&mut stream);
    std::fs::write(path.as_ref(), stream.as_slice())?;
    Ok(())
}

/// Read a dataset dump file.
pub fn read_dataset(path: impl AsRef<Path>) -> Result<Dataset> {
    let bytes = std::fs::read(path.as_ref())?;
    let mut stream = BinaryStream::from_bytes(&bytes);
    stream.unpack_header(DATASET_MAGIC, DATASET_REVISION)?;
    Dataset::from_stream(&mut stream)
}

fn descriptors() -> &'static [PropertyDescriptor] {
    static DESCRIPTORS: OnceLock<Vec<PropertyDescriptor>> = OnceLock::new();
    DESCRIPTORS.get_or_init(|| {
        vec![
            PropertyDescriptor::new(
                "file_name",
                PropertyValue::Str(String::new()),
                "output path; %t% is replaced with the work index",
            ),
            PropertyDescriptor::new(
                "output_format",
                PropertyValue::Str("auto".into()),
                "bin, csv, or auto (by extension)",
            ),
        ]
    })
}

/// Writes each executed dataset to an index-interpolated file.
pub struct DatasetWriter {
    properties: PropertyBag,
}

impl Default for DatasetWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetWriter {
    /// Create a writer; `file_name` must be set before use.
    pub fn new() -> Self {
        Self {
            properties: PropertyBag::from_descriptors(descriptors()),
        }
    }

    fn resolve_format(&self, path: &str) -> Result<&'static str> {
        match self.properties.str("output_format")? {
            "bin" => Ok("bin"),
            "csv" => Ok("csv"),
            "auto" => Ok(if path.ends_with(".csv") { "csv" } else { "bin" }),
            other => Err(Error::config(format!(
                "unknown output_format \"{other}\""
            ))),
        }
    }
}

impl Stage for DatasetWriter {
    fn name(&self) -> &str {
        "dataset_writer"
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
        Ok(input_md[0].clone())
    }

    fn translate_request(
        &self,
        _port: usize,
        _input_md: &[Metadata],
        request: &Metadata,
    ) -> Result<Requests> {
        Ok(smallvec![request.clone()])
    }

    fn execute(
        &mut self,
        _port: usize,
        inputs: &[DatasetRef],
        request: &Metadata,
    ) -> Result<DatasetRef> {
        let dataset = inputs[0].clone();
        if dataset.is_empty() {
            tracing::warn!(stage = self.name(), "skipping empty dataset");
            return Ok(dataset);
        }

        let request_key = request
            .get_str(keys::INDEX_REQUEST)
            .unwrap_or("time_step")
            .to_string();
        let index = request.get_u64(&request_key).unwrap_or(0);

        let pattern = self.properties.required_str("file_name")?;
        let path = pattern.replace("%t%", &index.to_string());

        match self.resolve_format(&path)? {
            "csv" => {
                let table = dataset.require_table()?;
                let file = std::fs::File::create(&path)?;
                table.to_csv(std::io::BufWriter::new(file))?;
            }
            _ => write_dataset(&path, &dataset)?,
        }
        tracing::debug!(path = %path, index, "wrote dataset");
        Ok(dataset)
    }
}
