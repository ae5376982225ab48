//! # Stratus
//!
//! A demand-driven, map-reduce-capable pipeline engine for analyzing
//! large gridded climate and weather datasets.
//!
//! Pipelines are DAGs of stages connected port-to-port. Execution runs
//! in three passes: stages *report* the metadata they can produce
//! (bottom-up, cached), the executive enumerates per-index *requests*
//! from the terminal stage's metadata, and each request is *pulled*
//! through the graph — translated upstream at every stage, answered by
//! `execute` on the way back down. Work is partitioned across
//! communicator ranks in contiguous blocks, and map-reduce stages fan
//! single indices out over per-stage thread pools.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use stratus::prelude::*;
//!
//! let mut reader = CfReader::new();
//! reader.properties_mut().set_from_str("files_regex", "/data/.*\\.nc$")?;
//!
//! let mut pipeline = Pipeline::new();
//! let src = pipeline.add_stage("reader", Box::new(reader));
//! let vort = pipeline.add_stage("vorticity", Box::new(Vorticity::new()));
//! pipeline.connect(src, vort)?;
//!
//! let driver = PipelineDriver::new(pipeline);
//! let executive = Executive::new().with_arrays(["vorticity"]);
//! let meshes = driver.update(vort, &executive)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod array;
pub mod calendar;
pub mod comm;
pub mod coordinates;
pub mod dataset;
pub mod error;
pub mod io;
pub mod metadata;
pub mod pipeline;
pub mod pool;
pub mod stage;
pub mod stages;
pub mod stream;

/// Framework version, part of the metadata cache key.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::array::{ArrayType, VariantArray};
    pub use crate::comm::{Communicator, LocalComm, SelfComm};
    pub use crate::dataset::{ArrayCollection, CartesianMesh, Dataset, DatasetRef, Table};
    pub use crate::error::{Error, Result};
    pub use crate::io::{CfReader, DatasetWriter, NativeFileWriter, NativeFormat};
    pub use crate::metadata::{Metadata, Value};
    pub use crate::pipeline::{Executive, Pipeline, PipelineDriver, StageId};
    pub use crate::stage::{PropertyValue, Stage};
    pub use crate::stages::{
        ArDetect, DatasetDiff, Ivt, MeshSubset, TemporalReduction, VerticalIntegral, Vorticity,
    };
    pub use crate::stream::{BinaryStream, Streamable};
}

pub use error::{Error, Result};
