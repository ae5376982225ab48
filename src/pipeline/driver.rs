//! Demand-driven pipeline execution.
//!
//! The driver walks the stage DAG in three passes. `report` runs
//! bottom-up, caching each stage's reported metadata; `pull` answers one
//! downstream request by translating it upstream, recursively pulling
//! the answers, and invoking `execute`. Map-reduce stages fan a single
//! request out into a sequence of upstream requests scheduled on the
//! stage's thread pool and folded through its reduce operator.

use crate::comm::{Communicator, SelfComm};
use crate::dataset::{Dataset, DatasetRef};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::pipeline::executive::Executive;
use crate::pipeline::graph::{Pipeline, StageId};
use crate::pool::ThreadPool;
use crate::stage::keys;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Executes a [`Pipeline`] on one rank.
pub struct PipelineDriver {
    pipeline: Pipeline,
    comm: Arc<dyn Communicator>,
    /// One lazily-created pool per map-reduce stage.
    pools: Mutex<HashMap<usize, Arc<ThreadPool>>>,
    /// Self-handle so map-reduce fan-out can run pulls on pool threads.
    me: Weak<PipelineDriver>,
}

impl PipelineDriver {
    /// Create a single-rank driver.
    pub fn new(pipeline: Pipeline) -> Arc<Self> {
        Self::with_communicator(pipeline, Arc::new(SelfComm))
    }

    /// Create a driver bound to a communicator.
    pub fn with_communicator(pipeline: Pipeline, comm: Arc<dyn Communicator>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            pipeline,
            comm,
            pools: Mutex::new(HashMap::new()),
            me: me.clone(),
        })
    }

    /// The pipeline being driven.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The communicator this driver partitions work over.
    pub fn communicator(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    /// Reported metadata of a stage's output port 0.
    pub fn report(&self, id: StageId) -> Result<Metadata> {
        self.report_port(id, 0).map(|(md, _)| md)
    }

    /// Reported metadata of a stage output, with the cache epoch used
    /// for transitive invalidation.
    fn report_port(&self, id: StageId, port: usize) -> Result<(Metadata, u64)> {
        let inputs = self.pipeline.inputs_of(id);
        let mut input_md = Vec::with_capacity(inputs.len());
        let mut upstream_epochs = Vec::with_capacity(inputs.len());
        for (up_id, up_port, _) in &inputs {
            let (md, epoch) = self.report_port(*up_id, *up_port)?;
            input_md.push(md);
            upstream_epochs.push(epoch);
        }

        let node = self.pipeline.node(id)?;
        let mut cache = node.cache.lock().expect("cache poisoned");
        let mut stage = node.stage.lock().expect("stage poisoned");
        let properties_now = stage.properties().modification_count();

        let stale =
            cache.properties_seen != properties_now || cache.upstream_seen != upstream_epochs;
        if stale {
            for slot in &mut cache.reports {
                *slot = None;
            }
            cache.properties_seen = properties_now;
            cache.upstream_seen = upstream_epochs;
            cache.epoch += 1;
        }
        if cache.reports[port].is_none() {
            tracing::debug!(stage = %node.name, port, "reporting metadata");
            let md = stage.report_metadata(port, &input_md).map_err(|e| {
                tracing::error!(stage = %node.name, error = %e, "report_metadata failed");
                e
            })?;
            cache.reports[port] = Some(md);
        }
        Ok((
            cache.reports[port].clone().expect("report cached"),
            cache.epoch,
        ))
    }

    fn pool_for(&self, id: StageId, size: i64) -> Arc<ThreadPool> {
        let mut pools = self.pools.lock().expect("pools poisoned");
        Arc::clone(
            pools
                .entry(id.index())
                .or_insert_with(|| Arc::new(ThreadPool::new(size))),
        )
    }

    /// Answer one downstream request against a stage output.
    pub fn pull(&self, id: StageId, port: usize, request: &Metadata) -> Result<DatasetRef> {
        let inputs = self.pipeline.inputs_of(id);
        let mut input_md = Vec::with_capacity(inputs.len());
        for (up_id, up_port, _) in &inputs {
            input_md.push(self.report_port(*up_id, *up_port)?.0);
        }

        let node = self.pipeline.node(id)?;
        let mut stage = node.stage.lock().expect("stage poisoned");
        let requests = stage
            .translate_request(port, &input_md, request)
            .map_err(|e| {
                tracing::error!(stage = %node.name, error = %e, "translate_request failed");
                e
            })?;

        let upstream_data: Vec<DatasetRef> = if stage.reducer().is_some() {
            if inputs.len() != 1 {
                return Err(Error::semantic(format!(
                    "map-reduce stage \"{}\" must have exactly one input",
                    node.name
                )));
            }
            let (up_id, up_port, _) = inputs[0];
            let pool = self.pool_for(id, stage.pool_size());
            let me = self
                .me
                .upgrade()
                .ok_or_else(|| Error::resource("pipeline driver was dropped mid-update"))?;

            let handles: Vec<(u64, crate::pool::TaskHandle<DatasetRef>)> = requests
                .into_iter()
                .enumerate()
                .map(|(i, sub_request)| {
                    let sequence = sub_request.get_u64(keys::SEQUENCE).unwrap_or(i as u64);
                    let driver = Arc::clone(&me);
                    let handle =
                        pool.spawn(move || driver.pull(up_id, up_port, &sub_request));
                    (sequence, handle)
                })
                .collect();

            let mut partials: Vec<(u64, Result<DatasetRef>)> = handles
                .into_iter()
                .map(|(sequence, handle)| (sequence, handle.wait()))
                .collect();

            let reducer = stage.reducer().expect("reducer present");
            if reducer.ordered() {
                partials.sort_by_key(|(sequence, _)| *sequence);
            }

            let mut accumulated: Option<DatasetRef> = None;
            let mut contributed = 0usize;
            for (sequence, partial) in partials {
                let dataset = match partial {
                    Ok(dataset) if !dataset.is_empty() => dataset,
                    Ok(_) | Err(_) if reducer.tolerates_missing() => {
                        tracing::warn!(
                            stage = %node.name,
                            sequence,
                            "upstream datum missing, continuing reduction"
                        );
                        continue;
                    }
                    Ok(_) => {
                        return Err(Error::semantic(format!(
                            "upstream datum {sequence} is empty and stage \"{}\" \
                             does not tolerate missing data",
                            node.name
                        )))
                    }
                    Err(e) => return Err(e),
                };
                accumulated = Some(match accumulated {
                    None => dataset,
                    Some(left) => reducer.reduce(left, dataset)?,
                });
                contributed += 1;
            }
            let accumulated = accumulated.ok_or_else(|| {
                Error::semantic(format!(
                    "every upstream datum for stage \"{}\" was missing",
                    node.name
                ))
            })?;
            vec![reducer.finalize(accumulated, contributed)?]
        } else {
            if requests.len() != inputs.len() {
                return Err(Error::semantic(format!(
                    "stage \"{}\" translated {} requests for {} inputs",
                    node.name,
                    requests.len(),
                    inputs.len()
                )));
            }
            let mut data = Vec::with_capacity(inputs.len());
            for ((up_id, up_port, _), sub_request) in inputs.iter().zip(requests) {
                data.push(self.pull(*up_id, *up_port, &sub_request)?);
            }
            data
        };

        stage.execute(port, &upstream_data, request).map_err(|e| {
            tracing::error!(stage = %node.name, error = %e, "execute failed");
            e
        })
    }

    /// Run the pipeline: report bottom-up, enumerate this rank's
    /// requests through the executive, answer each one.
    ///
    /// A request that fails is logged and yields `Dataset::Empty` in its
    /// slot; a report failure is fatal for the whole update. The result
    /// is ordered by this rank's work indices.
    pub fn update(&self, terminal: StageId, executive: &Executive) -> Result<Vec<DatasetRef>> {
        let metadata = self.report(terminal)?;
        let requests =
            executive.compose_requests(&metadata, self.comm.rank(), self.comm.size())?;
        tracing::info!(
            rank = self.comm.rank(),
            n_requests = requests.len(),
            "pipeline update"
        );

        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            if executive.cancelled() {
                tracing::info!(rank = self.comm.rank(), "update cancelled");
                break;
            }
            match self.pull(terminal, 0, &request) {
                Ok(dataset) => results.push(dataset),
                Err(e) => {
                    tracing::error!(error = %e, "request failed, continuing");
                    results.push(Dataset::Empty.into_ref());
                }
            }
        }
        Ok(results)
    }
}
