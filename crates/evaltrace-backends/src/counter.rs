//! History that only counts evaluations.

use evaltrace_core::error::{HistoryError, Result};
use evaltrace_core::history::History;
use evaltrace_core::options::HistoryOptions;
use evaltrace_core::types::{
    EvaluationCounts, EvaluationResult, Mode, Quantity, SensiOrders, TraceValue, Vector,
};
use std::path::Path;
use std::time::Instant;
use tracing::{trace, warn};

const BACKEND: &str = "counter-only";

/// Keeps the evaluation counters and nothing else.
///
/// Trace queries fail with [`HistoryError::Unsupported`].
#[derive(Debug, Clone)]
pub struct CountHistory {
    options: HistoryOptions,
    counts: EvaluationCounts,
    start: Instant,
}

impl CountHistory {
    /// Creates a history with zeroed counters.
    pub fn new(options: HistoryOptions) -> Self {
        if let Some(file) = &options.storage_file {
            warn!(file = %file, "storage file is ignored by the counter-only history");
        }
        Self {
            options,
            counts: EvaluationCounts::new(),
            start: Instant::now(),
        }
    }
}

impl Default for CountHistory {
    fn default() -> Self {
        Self::new(HistoryOptions::default())
    }
}

impl History for CountHistory {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn update(
        &mut self,
        _x: &Vector,
        sensi_orders: SensiOrders,
        mode: Mode,
        _result: &EvaluationResult,
    ) -> Result<()> {
        self.counts.record(sensi_orders, mode);
        trace!(%mode, counts = ?self.counts, "evaluation counted");
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Err(HistoryError::unsupported(BACKEND, "len"))
    }

    fn counts(&self) -> Result<EvaluationCounts> {
        Ok(self.counts)
    }

    fn options(&self) -> &HistoryOptions {
        &self.options
    }

    fn start_time(&self) -> Instant {
        self.start
    }

    fn storage_path(&self) -> Option<&Path> {
        None
    }

    fn get_value(&self, _quantity: Quantity, _ix: usize) -> Result<Option<TraceValue>> {
        Err(HistoryError::unsupported(BACKEND, "get_value"))
    }
}
