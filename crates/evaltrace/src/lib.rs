//! # evaltrace
//!
//! Records every evaluation of an objective function during an
//! optimization run, persists the trace under a pluggable backend and
//! keeps a best-point summary.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use evaltrace::prelude::*;
//!
//! # fn main() -> evaltrace::Result<()> {
//! let options = HistoryOptions::new()
//!     .with_trace_record(true)
//!     .with_storage_file("traces/run_{id}.csv");
//! let history = create_history(options, "0", None)?;
//!
//! let x0 = Vector::from_vec(vec![1.0, 2.0]);
//! let mut tracker = OptimizerHistory::new(history, x0.clone());
//! tracker.update(
//!     &x0,
//!     SensiOrders::new(&[0]),
//!     Mode::Function,
//!     &EvaluationResult::new().with_fval(5.0),
//! )?;
//! tracker.finalize()?;
//! assert_eq!(tracker.fval_min(), 5.0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! - [`evaltrace_core`]: types, options, value extraction, the [`History`]
//!   trait and [`OptimizerHistory`]
//! - [`evaltrace_backends`]: counter-only, in-memory, CSV and hierarchical
//!   backends

pub mod any_history;
pub mod factory;

pub use any_history::AnyHistory;
pub use evaltrace_backends::{CountHistory, CsvHistory, HierarchicalHistory, MemoryHistory};
pub use evaltrace_core::{
    extract_values, EvaluationCounts, EvaluationResult, ExtractedValues, History, HistoryError,
    HistoryOptions, Matrix, Mode, OptimizerHistory, Quantity, Result, SensiOrders, TraceValue,
    Vector,
};
pub use factory::{create_history, load_history, StorageFormat};

// Re-export nalgebra for convenience
pub use nalgebra;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::any_history::AnyHistory;
    pub use crate::factory::{create_history, load_history};
    pub use evaltrace_backends::{CountHistory, CsvHistory, HierarchicalHistory, MemoryHistory};
    pub use evaltrace_core::prelude::*;
}
