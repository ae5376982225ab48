//! File-format seam.
//!
//! The reader and writer talk to files through the [`CfFormat`] /
//! [`CfFile`] traits: named dimensions, per-variable attributes, and
//! hyperslab reads, which is all the pipeline contract needs from a
//! CF-convention file. A NetCDF binding is an external collaborator
//! behind this seam.
//!
//! The crate ships [`NativeFormat`], a self-describing container (magic
//! header + versioned binary stream) used by the writer, the test
//! suite, and local tooling.
//!
//! All format calls go through a process-wide mutex, because the
//! third-party layer behind the seam is not assumed thread-safe and
//! pool workers open and read files concurrently.

use crate::array::VariantArray;
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::stream::{BinaryStream, Streamable};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Magic tag of native container files.
pub const CONTAINER_MAGIC: &str = "stratus_container";
/// Current container format revision.
pub const CONTAINER_REVISION: u32 = 1;

/// Serialize access to the file-format layer.
///
/// Every [`CfFile`] operation issued from a thread-pool worker holds
/// this lock for the duration of the call.
pub fn format_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .expect("format lock poisoned")
}

/// Description of one variable in a file.
#[derive(Debug, Clone, PartialEq)]
pub struct CfVariable {
    /// Variable name.
    pub name: String,
    /// Dimension names, slowest varying first.
    pub dimensions: Vec<String>,
    /// Dimension lengths, matching `dimensions`.
    pub shape: Vec<u64>,
    /// Element type of the stored data.
    pub data_type: crate::array::ArrayType,
    /// Variable attributes (`units`, `calendar`, `_FillValue`, ...).
    pub attributes: Metadata,
}

impl CfVariable {
    /// Total element count.
    pub fn len(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Check for zero elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An open file exposing CF-style access.
pub trait CfFile: Send {
    /// Names of every variable, in file order.
    fn variables(&self) -> Vec<String>;

    /// Describe one variable.
    fn variable(&self, name: &str) -> Result<CfVariable>;

    /// Length of a named dimension, when it exists.
    fn dimension_len(&self, name: &str) -> Option<u64>;

    /// Read a hyperslab: `starts`/`counts` per dimension, slowest
    /// varying first, matching the variable's dimension order.
    fn read(&self, name: &str, starts: &[u64], counts: &[u64]) -> Result<VariantArray>;

    /// Read a whole variable.
    fn read_all(&self, name: &str) -> Result<VariantArray> {
        let var = self.variable(name)?;
        let starts = vec![0u64; var.shape.len()];
        self.read(name, &starts, &var.shape)
    }
}

/// Opens files of one on-disk format.
pub trait CfFormat: Send + Sync {
    /// Open a file read-only.
    fn open(&self, path: &Path) -> Result<Box<dyn CfFile>>;
}

// ---------------------------------------------------------------------------
// native container implementation
// ---------------------------------------------------------------------------

struct NativeVariable {
    info: CfVariable,
    data: VariantArray,
}

/// An open native container file, fully resident.
pub struct NativeFile {
    dimensions: Vec<(String, u64)>,
    variables: Vec<NativeVariable>,
}

impl NativeFile {
    fn decode(stream: &mut BinaryStream) -> Result<Self> {
        stream.unpack_header(CONTAINER_MAGIC, CONTAINER_REVISION)?;
        let n_dims = stream.unpack_u64()? as usize;
        let mut dimensions = Vec::with_capacity(n_dims);
        for _ in 0..n_dims {
            let name = stream.unpack_str()?;
            let len = stream.unpack_u64()?;
            dimensions.push((name, len));
        }
        let n_vars = stream.unpack_u64()? as usize;
        let mut variables = Vec::with_capacity(n_vars);
        for _ in 0..n_vars {
            let name = stream.unpack_str()?;
            let dim_names = stream.unpack_str_vec()?;
            let attributes = Metadata::from_stream(stream)?;
            let data = VariantArray::from_stream(stream)?;
            let shape: Vec<u64> = dim_names
                .iter()
                .map(|d| {
                    dimensions
                        .iter()
                        .find(|(n, _)| n == d)
                        .map(|(_, len)| *len)
                        .ok_or_else(|| {
                            Error::format(format!("variable \"{name}\" uses unknown dimension \"{d}\""))
                        })
                })
                .collect::<Result<_>>()?;
            if shape.iter().product::<u64>() != data.len() as u64 {
                return Err(Error::format(format!(
                    "variable \"{name}\" has {} elements, shape {shape:?} needs {}",
                    data.len(),
                    shape.iter().product::<u64>()
                )));
            }
            variables.push(NativeVariable {
                info: CfVariable {
                    name,
                    dimensions: dim_names,
                    shape,
                    data_type: data.element_type(),
                    attributes,
                },
                data,
            });
        }
        Ok(Self {
            dimensions,
            variables,
        })
    }

    fn find(&self, name: &str) -> Result<&NativeVariable> {
        self.variables
            .iter()
            .find(|v| v.info.name == name)
            .ok_or_else(|| Error::semantic(format!("variable \"{name}\" is not in the file")))
    }
}

impl CfFile for NativeFile {
    fn variables(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.info.name.clone()).collect()
    }

    fn variable(&self, name: &str) -> Result<CfVariable> {
        Ok(self.find(name)?.info.clone())
    }

    fn dimension_len(&self, name: &str) -> Option<u64> {
        self.dimensions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, len)| *len)
    }

    fn read(&self, name: &str, starts: &[u64], counts: &[u64]) -> Result<VariantArray> {
        let var = self.find(name)?;
        let n_dims = var.info.shape.len();
        if starts.len() != n_dims || counts.len() != n_dims {
            return Err(Error::semantic(format!(
                "variable \"{name}\" has {n_dims} dimensions, got {} starts and {} counts",
                starts.len(),
                counts.len()
            )));
        }
        for d in 0..n_dims {
            if starts[d] + counts[d] > var.info.shape[d] {
                return Err(Error::semantic(format!(
                    "hyperslab [{}, {}) exceeds dimension \"{}\" of length {}",
                    starts[d],
                    starts[d] + counts[d],
                    var.info.dimensions[d],
                    var.info.shape[d]
                )));
            }
        }
        if n_dims == 0 {
            return var.data.new_copy(0, 0);
        }

        // strides for row-major (slowest first) layout
        let mut strides = vec![1u64; n_dims];
        for d in (0..n_dims - 1).rev() {
            strides[d] = strides[d + 1] * var.info.shape[d + 1];
        }

        // copy one contiguous innermost run per outer-index combination
        let mut out = var.data.new_instance();
        let run = counts[n_dims - 1];
        if run == 0 || counts.iter().any(|c| *c == 0) {
            return Ok(out);
        }
        let mut odometer = vec![0u64; n_dims - 1];
        loop {
            let mut offset = starts[n_dims - 1];
            for d in 0..n_dims - 1 {
                offset += (starts[d] + odometer[d]) * strides[d];
            }
            out.append(&var.data.new_copy(
                offset as usize,
                (offset + run - 1) as usize,
            )?)?;

            // advance the outer indices
            let mut d = n_dims - 1;
            loop {
                if d == 0 {
                    return Ok(out);
                }
                d -= 1;
                odometer[d] += 1;
                if odometer[d] < counts[d] {
                    break;
                }
                odometer[d] = 0;
            }
        }
    }
}

/// The native container format.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFormat;

impl CfFormat for NativeFormat {
    fn open(&self, path: &Path) -> Result<Box<dyn CfFile>> {
        let _guard = format_lock();
        let bytes = std::fs::read(path)?;
        let mut stream = BinaryStream::from_bytes(&bytes);
        let file = NativeFile::decode(&mut stream).map_err(|e| {
            Error::format(format!("failed to decode \"{}\": {e}", path.display()))
        })?;
        Ok(Box::new(file))
    }
}

/// Builder for writing native container files.
#[derive(Default)]
pub struct NativeFileWriter {
    dimensions: Vec<(String, u64)>,
    variables: Vec<(String, Vec<String>, Metadata, VariantArray)>,
}

impl NativeFileWriter {
    /// Start an empty file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a dimension.
    pub fn dimension(mut self, name: impl Into<String>, len: u64) -> Self {
        self.dimensions.push((name.into(), len));
        self
    }

    /// Add a variable over previously declared dimensions.
    pub fn variable<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        dimensions: impl IntoIterator<Item = S>,
        attributes: Metadata,
        data: VariantArray,
    ) -> Self {
        self.variables.push((
            name.into(),
            dimensions.into_iter().map(Into::into).collect(),
            attributes,
            data,
        ));
        self
    }

    /// Encode to a stream.
    pub fn encode(&self) -> Result<BinaryStream> {
        let mut stream = BinaryStream::new();
        stream.pack_header(CONTAINER_MAGIC, CONTAINER_REVISION);
        stream.pack_u64(self.dimensions.len() as u64);
        for (name, len) in &self.dimensions {
            stream.pack_str(name);
            stream.pack_u64(*len);
        }
        stream.pack_u64(self.variables.len() as u64);
        for (name, dims, attributes, data) in &self.variables {
            let expected: u64 = dims
                .iter()
                .map(|d| {
                    self.dimensions
                        .iter()
                        .find(|(n, _)| n == d)
                        .map(|(_, len)| *len)
                        .ok_or_else(|| {
                            Error::config(format!(
                                "variable \"{name}\" uses undeclared dimension \"{d}\""
                            ))
                        })
                })
                .product::<Result<u64>>()?;
            if expected != data.len() as u64 {
                return Err(Error::config(format!(
                    "variable \"{name}\" has {} elements, dimensions need {expected}",
                    data.len()
                )));
            }
            stream.pack_str(name);
            stream.pack_str_vec(dims);
            attributes.to_stream(&mut stream);
            data.to_stream(&mut stream);
        }
        Ok(stream)
    }

    /// Write the file to disk.
    pub fn write(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let stream = self.encode()?;
        let _guard = format_lock();
        std::fs::write(&path, stream.as_slice())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file(dir: &Path) -> PathBuf {
        let path = dir.join("t.bin");
        // T(time, lat, lon) with T[t][j][i] = 100t + 10j + i
        let mut data = Vec::new();
        for t in 0..3 {
            for j in 0..2 {
                for i in 0..2 {
                    data.push((100 * t + 10 * j + i) as f64);
                }
            }
        }
        let mut t_atts = Metadata::new();
        t_atts.set("units", "days since 2000-01-01");
        t_atts.set("calendar", "standard");
        NativeFileWriter::new()
            .dimension("time", 3)
            .dimension("lat", 2)
            .dimension("lon", 2)
            .variable("time", ["time"], t_atts, VariantArray::from_vec(vec![0.0f64, 1.0, 2.0]))
            .variable(
                "lat",
                ["lat"],
                Metadata::new(),
                VariantArray::from_vec(vec![0.0f64, 10.0]),
            )
            .variable(
                "lon",
                ["lon"],
                Metadata::new(),
                VariantArray::from_vec(vec![0.0f64, 10.0]),
            )
            .variable(
                "T",
                ["time", "lat", "lon"],
                Metadata::new(),
                VariantArray::from_vec(data),
            )
            .write(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_write_open_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_file(dir.path());

        let file = NativeFormat.open(&path).unwrap();
        assert_eq!(file.variables(), vec!["time", "lat", "lon", "T"]);
        assert_eq!(file.dimension_len("time"), Some(3));

        let var = file.variable("T").unwrap();
        assert_eq!(var.dimensions, vec!["time", "lat", "lon"]);
        assert_eq!(var.shape, vec![3, 2, 2]);
        assert!(file.variable("missing").is_err());
    }

    #[test]
    fn test_hyperslab_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_file(dir.path());
        let file = NativeFormat.open(&path).unwrap();

        // time slice 1, whole plane
        let slab = file.read("T", &[1, 0, 0], &[1, 2, 2]).unwrap();
        assert_eq!(
            slab.as_slice::<f64>().unwrap(),
            &[100.0, 101.0, 110.0, 111.0]
        );

        // one column
        let slab = file.read("T", &[0, 1, 1], &[3, 1, 1]).unwrap();
        assert_eq!(slab.as_slice::<f64>().unwrap(), &[11.0, 111.0, 211.0]);

        // out of range
        assert!(file.read("T", &[0, 0, 0], &[4, 2, 2]).is_err());
        assert!(file.read("T", &[0, 0], &[1, 1]).is_err());
    }

    #[test]
    fn test_writer_rejects_shape_mismatch() {
        let result = NativeFileWriter::new()
            .dimension("x", 3)
            .variable(
                "v",
                ["x"],
                Metadata::new(),
                VariantArray::from_vec(vec![1.0f64]),
            )
            .encode();
        assert!(result.is_err());
    }
}
