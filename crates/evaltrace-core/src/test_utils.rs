//! Test utilities for history consumers.
//!
//! Provides [`VecHistory`], a minimal in-memory [`History`] that keeps each
//! iteration as a map from quantity to value. It is enough to exercise
//! trait defaults and [`crate::OptimizerHistory`] without a real backend.

use crate::error::Result;
use crate::extract::extract_values;
use crate::history::{check_index, History};
use crate::options::HistoryOptions;
use crate::types::{
    EvaluationCounts, EvaluationResult, Mode, Quantity, SensiOrders, TraceValue, Vector,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

/// Minimal trace-keeping history for tests.
#[derive(Debug, Clone)]
pub struct VecHistory {
    options: HistoryOptions,
    counts: EvaluationCounts,
    start: Instant,
    rows: Vec<BTreeMap<Quantity, TraceValue>>,
    /// Number of times `finalize` was called
    pub finalize_calls: usize,
}

impl VecHistory {
    /// Creates an empty history with the given options.
    pub fn new(options: HistoryOptions) -> Self {
        Self {
            options,
            counts: EvaluationCounts::new(),
            start: Instant::now(),
            rows: Vec::new(),
            finalize_calls: 0,
        }
    }

    /// Appends a row holding a single value, bypassing extraction.
    pub fn push_raw(&mut self, quantity: Quantity, value: TraceValue) {
        self.rows.push(BTreeMap::from([(quantity, value)]));
    }

    /// Appends a fully specified row, bypassing extraction and counters.
    pub fn push_row(&mut self, x: &Vector, values: &[(Quantity, TraceValue)]) {
        let mut row = BTreeMap::from([(Quantity::X, TraceValue::Vector(x.clone()))]);
        row.extend(values.iter().cloned());
        self.rows.push(row);
    }
}

impl History for VecHistory {
    fn backend_name(&self) -> &'static str {
        "test"
    }

    fn update(
        &mut self,
        x: &Vector,
        sensi_orders: SensiOrders,
        mode: Mode,
        result: &EvaluationResult,
    ) -> Result<()> {
        self.counts.record(sensi_orders, mode);
        let values = extract_values(mode, result, &self.options);
        let mut row: BTreeMap<Quantity, TraceValue> = Quantity::EXTRACTED
            .into_iter()
            .filter_map(|q| values.get(q).map(|v| (q, v)))
            .collect();
        row.insert(Quantity::X, TraceValue::Vector(x.clone()));
        row.insert(
            Quantity::Time,
            TraceValue::Scalar(self.start.elapsed().as_secs_f64()),
        );
        self.rows.push(row);
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.finalize_calls += 1;
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
        Ok(self.rows[ix].get(&quantity).cloned())
    }
}
