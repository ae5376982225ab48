//! Pipeline graph structure using daggy.
//!
//! Stages are connected port-to-port into a directed acyclic graph.
//! Nodes own their stage; connections are edges carrying the port pair.
//! Stages never hold references to their neighbors — a connection is
//! visible to a stage only through the metadata, requests, and datasets
//! the driver moves across it.

use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::stage::Stage;
use daggy::{Dag, NodeIndex, Walker};
use std::collections::HashMap;
use std::sync::Mutex;

/// Unique identifier for a stage in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(pub(crate) NodeIndex);

impl StageId {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

/// A port-to-port connection.
#[derive(Debug, Clone, Copy)]
pub struct PortLink {
    /// Output port on the upstream stage.
    pub src_port: usize,
    /// Input port on the downstream stage.
    pub dst_port: usize,
}

/// Cached reported metadata for one stage.
#[derive(Debug, Default)]
pub(crate) struct ReportCache {
    /// Cached metadata per output port; `None` until reported.
    pub reports: Vec<Option<Metadata>>,
    /// Property-bag modification count the cache was computed against.
    pub properties_seen: u64,
    /// Upstream cache epochs the cache was computed against.
    pub upstream_seen: Vec<u64>,
    /// Bumped every time the cache is recomputed; downstream stages
    /// compare epochs to decide whether their own caches are stale.
    pub epoch: u64,
}

/// A node in the pipeline graph.
pub(crate) struct StageNode {
    pub name: String,
    /// Execute calls for a stage are serialized within a rank by this
    /// lock; map-reduce fan-out runs upstream pulls concurrently but
    /// each stage runs one operation at a time.
    pub stage: Mutex<Box<dyn Stage>>,
    pub cache: Mutex<ReportCache>,
}

impl std::fmt::Debug for StageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageNode").field("name", &self.name).finish()
    }
}

/// A pipeline: a DAG of stages connected port-to-port.
pub struct Pipeline {
    graph: Dag<StageNode, PortLink>,
    by_name: HashMap<String, StageId>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self {
            graph: Dag::new(),
            by_name: HashMap::new(),
        }
    }

    /// Add a stage under a unique name; returns its id for linking.
    pub fn add_stage(&mut self, name: impl Into<String>, stage: Box<dyn Stage>) -> StageId {
        let name = name.into();
        let n_outputs = stage.n_outputs();
        let node = StageNode {
            name: name.clone(),
            stage: Mutex::new(stage),
            cache: Mutex::new(ReportCache {
                reports: vec![None; n_outputs],
                ..Default::default()
            }),
        };
        let id = StageId(self.graph.add_node(node));
        self.by_name.insert(name, id);
        id
    }

    /// Look up a stage id by name.
    pub fn stage_id(&self, name: &str) -> Option<StageId> {
        self.by_name.get(name).copied()
    }

    /// Connect `src` output port 0 to `dst` input port 0.
    pub fn connect(&mut self, src: StageId, dst: StageId) -> Result<()> {
        self.connect_ports(src, 0, dst, 0)
    }

    /// Connect an output port of `src` to an input port of `dst`.
    ///
    /// Rejects unknown ports, duplicate input connections, and edges
    /// that would close a cycle.
    pub fn connect_ports(
        &mut self,
        src: StageId,
        src_port: usize,
        dst: StageId,
        dst_port: usize,
    ) -> Result<()> {
        let src_outputs = self
            .node(src)?
            .stage
            .lock()
            .expect("stage poisoned")
            .n_outputs();
        if src_port >= src_outputs {
            return Err(Error::config(format!(
                "stage \"{}\" has no output port {src_port}",
                self.node(src)?.name
            )));
        }
        let dst_inputs = self
            .node(dst)?
            .stage
            .lock()
            .expect("stage poisoned")
            .n_inputs();
        if dst_port >= dst_inputs {
            return Err(Error::config(format!(
                "stage \"{}\" has no input port {dst_port}",
                self.node(dst)?.name
            )));
        }
        if self
            .inputs_of(dst)
            .iter()
            .any(|(_, _, port)| *port == dst_port)
        {
            return Err(Error::config(format!(
                "input port {dst_port} of stage \"{}\" is already connected",
                self.node(dst)?.name
            )));
        }
        self.graph
            .add_edge(src.0, dst.0, PortLink { src_port, dst_port })
            .map_err(|_| {
                Error::config(format!(
                    "connecting \"{}\" to \"{}\" would create a cycle",
                    self.node(src).map(|n| n.name.as_str()).unwrap_or("?"),
                    self.node(dst).map(|n| n.name.as_str()).unwrap_or("?"),
                ))
            })?;
        Ok(())
    }

    pub(crate) fn node(&self, id: StageId) -> Result<&StageNode> {
        self.graph
            .node_weight(id.0)
            .ok_or_else(|| Error::config(format!("no stage with id {}", id.index())))
    }

    /// Upstream connections of `dst`, ordered by destination port:
    /// `(upstream stage, upstream output port, this input port)`.
    pub(crate) fn inputs_of(&self, dst: StageId) -> Vec<(StageId, usize, usize)> {
        let mut inputs: Vec<(StageId, usize, usize)> = self
            .graph
            .parents(dst.0)
            .iter(&self.graph)
            .map(|(edge, parent)| {
                let link = self.graph.edge_weight(edge).expect("edge exists");
                (StageId(parent), link.src_port, link.dst_port)
            })
            .collect();
        inputs.sort_by_key(|(_, _, dst_port)| *dst_port);
        inputs
    }

    /// Names of all stages, in insertion order of ids.
    pub fn stage_names(&self) -> Vec<String> {
        self.graph
            .graph()
            .node_indices()
            .filter_map(|i| self.graph.node_weight(i).map(|n| n.name.clone()))
            .collect()
    }

    /// Run `f` against a stage, e.g. to set properties.
    ///
    /// The stage's report cache is left untouched; staleness is
    /// detected through the property bag's modification counter.
    pub fn with_stage<R>(&self, id: StageId, f: impl FnOnce(&mut dyn Stage) -> R) -> Result<R> {
        let node = self.node(id)?;
        let mut stage = node.stage.lock().expect("stage poisoned");
        Ok(f(stage.as_mut()))
    }

    /// Force recomputation of a stage's reported metadata (and,
    /// transitively, everything downstream) on the next update.
    pub fn set_modified(&self, id: StageId) -> Result<()> {
        self.with_stage(id, |stage| stage.properties_mut().set_modified())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
