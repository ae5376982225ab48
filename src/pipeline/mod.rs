//! Pipeline graph, driver, and executive.

mod driver;
mod executive;
mod graph;

pub use driver::PipelineDriver;
pub use executive::Executive;
pub use graph::{Pipeline, PortLink, StageId};
