//! History kept in memory.
//!
//! Every update is recorded, independently of the recording options. The
//! buffered trace can be written to a hierarchical store once the run is
//! over with [`MemoryHistory::to_hierarchical`].

use crate::hierarchical::store::iteration_from;
use crate::hierarchical::HierarchicalHistory;
use evaltrace_core::error::{HistoryError, Result};
use evaltrace_core::extract::extract_values;
use evaltrace_core::history::{check_index, History};
use evaltrace_core::options::HistoryOptions;
use evaltrace_core::types::{
    EvaluationCounts, EvaluationResult, ExtractedValues, Mode, Quantity, SensiOrders, TraceValue,
    Vector,
};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq)]
struct MemoryRow {
    x: Vector,
    values: ExtractedValues,
    time: f64,
}

/// In-memory trace of all evaluations.
#[derive(Debug, Clone)]
pub struct MemoryHistory {
    options: HistoryOptions,
    counts: EvaluationCounts,
    start: Instant,
    rows: Vec<MemoryRow>,
}

impl MemoryHistory {
    /// Creates an empty history.
    pub fn new(options: HistoryOptions) -> Self {
        if let Some(file) = &options.storage_file {
            warn!(file = %file, "storage file is ignored by the in-memory history");
        }
        Self {
            options,
            counts: EvaluationCounts::new(),
            start: Instant::now(),
            rows: Vec::new(),
        }
    }

    /// Writes the buffered trace into the group of `identity` in the
    /// hierarchical store at `file` and returns a history on that group.
    ///
    /// The counters and the iteration count are written along with the
    /// iterations. Fails with [`HistoryError::InvalidConfiguration`] if
    /// the group already holds iterations.
    pub fn to_hierarchical<P: AsRef<Path>>(
        &self,
        identity: &str,
        file: P,
    ) -> Result<HierarchicalHistory> {
        let file = file.as_ref();
        let options = HistoryOptions {
            storage_file: Some(file.to_string_lossy().into_owned()),
            ..self.options.clone()
        };
        let history = HierarchicalHistory::new(identity, file, options)?;

        history.write(|group| {
            let existing = group.attributes().iteration_count;
            if existing > 0 {
                return Err(HistoryError::invalid_configuration(
                    "storage_file",
                    format!(
                        "group '{}' already holds {existing} iterations",
                        history.group_key()
                    ),
                ));
            }
            for row in &self.rows {
                group.append(iteration_from(&row.x, &row.values, row.time));
            }
            group.set_counts(self.counts);
            Ok(())
        })?;

        debug!(
            group = history.group_key(),
            iterations = self.rows.len(),
            "in-memory history written to hierarchical store"
        );
        Ok(history)
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new(HistoryOptions::default())
    }
}

impl History for MemoryHistory {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn update(
        &mut self,
        x: &Vector,
        sensi_orders: SensiOrders,
        mode: Mode,
        result: &EvaluationResult,
    ) -> Result<()> {
        self.counts.record(sensi_orders, mode);
        self.rows.push(MemoryRow {
            x: x.clone(),
            values: extract_values(mode, result, &self.options),
            time: self.start.elapsed().as_secs_f64(),
        });
        trace!(%mode, len = self.rows.len(), "evaluation recorded in memory");
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.rows.len())
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

    fn get_value(&self, quantity: Quantity, ix: usize) -> Result<Option<TraceValue>> {
        check_index(ix, self.rows.len())?;
        let row = &self.rows[ix];
        Ok(match quantity {
            Quantity::X => Some(TraceValue::Vector(row.x.clone())),
            Quantity::Time => Some(TraceValue::Scalar(row.time)),
            other => row.values.get(other),
        })
    }
}
