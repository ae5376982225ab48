//! Request enumeration and distributed partitioning.
//!
//! The executive turns a terminal stage's reported metadata into the
//! iteration of per-index requests this rank will run: it reads the
//! index initializer key, clamps to the configured step window,
//! intersects with an optional date range resolved against the
//! calendar, block-partitions the surviving indices across ranks, and
//! emits one base request per local index.

use crate::calendar::{self, Calendar, Units};
use crate::comm::block_partition;
use crate::coordinates::{lower_bound, upper_bound};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::stage::keys;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Composes the per-rank request iteration for a pipeline update.
#[derive(Clone)]
pub struct Executive {
    first_step: u64,
    last_step: i64,
    start_date: Option<String>,
    end_date: Option<String>,
    arrays: Vec<String>,
    bounds: Option<[f64; 6]>,
    cancel: Arc<AtomicBool>,
}

impl Default for Executive {
    fn default() -> Self {
        Self {
            first_step: 0,
            last_step: -1,
            start_date: None,
            end_date: None,
            arrays: Vec::new(),
            bounds: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Executive {
    /// An executive requesting every index, whole domain, no arrays.
    pub fn new() -> Self {
        Self::default()
    }

    /// First work index to process.
    pub fn with_first_step(mut self, step: u64) -> Self {
        self.first_step = step;
        self
    }

    /// Last work index to process; −1 means the final index.
    pub fn with_last_step(mut self, step: i64) -> Self {
        self.last_step = step;
        self
    }

    /// Restrict to steps on or after this date (`"Y-M-D[ h:m:s]"`),
    /// resolved against the reported time axis and calendar.
    pub fn with_start_date(mut self, date: impl Into<String>) -> Self {
        self.start_date = Some(date.into());
        self
    }

    /// Restrict to steps on or before this date.
    pub fn with_end_date(mut self, date: impl Into<String>) -> Self {
        self.end_date = Some(date.into());
        self
    }

    /// Arrays to request from the terminal stage.
    pub fn with_arrays<S: Into<String>>(mut self, arrays: impl IntoIterator<Item = S>) -> Self {
        self.arrays = arrays.into_iter().map(Into::into).collect();
        self
    }

    /// Coordinate bounds to request.
    pub fn with_bounds(mut self, bounds: [f64; 6]) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// The shared cancel flag; set it to stop between requests.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Check the cancel flag.
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Resolve a date to an offset on the reported time axis.
    fn date_offset(metadata: &Metadata, date: &str) -> Result<f64> {
        let coordinates = metadata.require_metadata("coordinates")?;
        let t_variable = coordinates
            .get_str("t_variable")
            .unwrap_or("time")
            .to_string();
        let attributes = metadata.require_metadata("attributes")?;
        let time_atts = attributes.require_metadata(&t_variable)?;
        let units = Units::parse(time_atts.get_str("units").ok_or_else(|| {
            Error::semantic(format!("time variable \"{t_variable}\" has no units"))
        })?)?;
        let cal = Calendar::from_name(time_atts.get_str("calendar").unwrap_or("standard"))?;
        calendar::date_to_offset(&calendar::parse_date(date)?, &units, cal)
    }

    /// Compose this rank's request iteration from reported metadata.
    pub fn compose_requests(
        &self,
        metadata: &Metadata,
        rank: usize,
        size: usize,
    ) -> Result<Vec<Metadata>> {
        let initializer = metadata
            .get_str(keys::INDEX_INITIALIZER)
            .ok_or_else(|| Error::semantic("metadata is missing the index initializer key"))?
            .to_string();
        let request_key = metadata
            .get_str(keys::INDEX_REQUEST)
            .ok_or_else(|| Error::semantic("metadata is missing the index request key"))?
            .to_string();
        let n_indices = metadata.get_u64(&initializer).ok_or_else(|| {
            Error::semantic(format!("metadata is missing \"{initializer}\""))
        })?;
        if n_indices == 0 {
            return Ok(Vec::new());
        }

        let mut first = self.first_step.min(n_indices - 1);
        let mut last = if self.last_step < 0 {
            n_indices - 1
        } else {
            (self.last_step as u64).min(n_indices - 1)
        };

        if self.start_date.is_some() || self.end_date.is_some() {
            let t = metadata
                .require_metadata("coordinates")?
                .require_array("t")?
                .to_f64_vec()?;
            if let Some(date) = &self.start_date {
                let offset = Self::date_offset(metadata, date)?;
                match lower_bound(&t, offset) {
                    Some(step) => first = first.max(step as u64),
                    // starts after the axis ends: nothing to do
                    None => return Ok(Vec::new()),
                }
            }
            if let Some(date) = &self.end_date {
                let offset = Self::date_offset(metadata, date)?;
                match upper_bound(&t, offset) {
                    Some(step) => last = last.min(step as u64),
                    None => return Ok(Vec::new()),
                }
            }
        }
        if first > last {
            return Ok(Vec::new());
        }

        let n_local = last - first + 1;
        let local = block_partition(n_local, rank, size);
        tracing::debug!(
            rank,
            size,
            first,
            last,
            n_local = local.end - local.start,
            "composed request iteration"
        );

        let mut base = Metadata::new();
        base.set(keys::INDEX_REQUEST, request_key.as_str());
        if !self.arrays.is_empty() {
            base.set(keys::ARRAYS, self.arrays.clone());
        }
        if let Some(bounds) = self.bounds {
            base.set(keys::BOUNDS, bounds);
        }

        Ok(local
            .map(|i| {
                let mut request = base.clone();
                request.set(request_key.as_str(), first + i);
                request
            })
            .collect())
    }
}
