//! Closed set of history backends behind one type.

use evaltrace_backends::{CountHistory, CsvHistory, HierarchicalHistory, MemoryHistory};
use evaltrace_core::error::Result;
use evaltrace_core::history::{History, Trace};
use evaltrace_core::options::HistoryOptions;
use evaltrace_core::types::{
    EvaluationCounts, EvaluationResult, Mode, Quantity, SensiOrders, TraceValue, Vector,
};
use std::path::Path;
use std::time::Instant;

/// Any of the available history backends.
#[derive(Debug, Clone)]
pub enum AnyHistory {
    /// Counters only
    CounterOnly(CountHistory),
    /// Trace kept in memory
    Memory(MemoryHistory),
    /// Trace in a CSV file
    Csv(CsvHistory),
    /// Trace in a hierarchical store
    Hierarchical(HierarchicalHistory),
}

macro_rules! dispatch {
    ($self:expr, $h:ident => $body:expr) => {
        match $self {
            AnyHistory::CounterOnly($h) => $body,
            AnyHistory::Memory($h) => $body,
            AnyHistory::Csv($h) => $body,
            AnyHistory::Hierarchical($h) => $body,
        }
    };
}

impl History for AnyHistory {
    fn backend_name(&self) -> &'static str {
        dispatch!(self, h => h.backend_name())
    }

    fn update(
        &mut self,
        x: &Vector,
        sensi_orders: SensiOrders,
        mode: Mode,
        result: &EvaluationResult,
    ) -> Result<()> {
        dispatch!(self, h => h.update(x, sensi_orders, mode, result))
    }

    fn finalize(&mut self) -> Result<()> {
        dispatch!(self, h => h.finalize())
    }

    fn len(&self) -> Result<usize> {
        dispatch!(self, h => h.len())
    }

    fn counts(&self) -> Result<EvaluationCounts> {
        dispatch!(self, h => h.counts())
    }

    fn options(&self) -> &HistoryOptions {
        dispatch!(self, h => h.options())
    }

    fn start_time(&self) -> Instant {
        dispatch!(self, h => h.start_time())
    }

    fn storage_path(&self) -> Option<&Path> {
        dispatch!(self, h => h.storage_path())
    }

    fn get_value(&self, quantity: Quantity, ix: usize) -> Result<Option<TraceValue>> {
        dispatch!(self, h => h.get_value(quantity, ix))
    }

    fn get_trace(&self, quantity: Quantity) -> Result<Trace<TraceValue>> {
        dispatch!(self, h => h.get_trace(quantity))
    }
}

impl From<CountHistory> for AnyHistory {
    fn from(history: CountHistory) -> Self {
        Self::CounterOnly(history)
    }
}

impl From<MemoryHistory> for AnyHistory {
    fn from(history: MemoryHistory) -> Self {
        Self::Memory(history)
    }
}

impl From<CsvHistory> for AnyHistory {
    fn from(history: CsvHistory) -> Self {
        Self::Csv(history)
    }
}

impl From<HierarchicalHistory> for AnyHistory {
    fn from(history: HierarchicalHistory) -> Self {
        Self::Hierarchical(history)
    }
}
