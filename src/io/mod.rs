//! File I/O: the format seam, the CF reader, the writer, and the
//! metadata disk cache.

pub mod cache;
pub mod format;
mod reader;
mod writer;

pub use format::{CfFile, CfFormat, CfVariable, NativeFileWriter, NativeFormat};
pub use reader::CfReader;
pub use writer::{read_dataset, write_dataset, DatasetWriter, DATASET_MAGIC, DATASET_REVISION};
