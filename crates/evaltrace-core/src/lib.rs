//! Core traits and types for recording objective-function evaluation traces.
//!
//! This crate provides the foundations shared by every history backend:
//! the vocabulary of a trace, the configuration of what gets recorded, the
//! extraction of a canonical record from a raw evaluation result, and the
//! [`History`] interface itself. [`OptimizerHistory`] builds the best-point
//! summary on top of any history.
//!
//! # Key Concepts
//!
//! - **Mode**: an evaluation computes either function-value quantities or
//!   residual quantities
//! - **Sensitivity orders**: 0 = value/residuals, 1 = gradient/residual
//!   Jacobian, 2 = Hessian
//! - **Missing values**: a quantity not recorded for an iteration is `None`
//!
//! # Modules
//!
//! - [`error`]: Error types for history operations
//! - [`extract`]: Value extraction and residual-mode derivations
//! - [`history`]: The history interface
//! - [`optimizer_history`]: Initial and best point tracking
//! - [`options`]: Recording configuration
//! - [`types`]: Modes, quantities, values and counters

pub mod error;
pub mod extract;
pub mod history;
pub mod optimizer_history;
pub mod options;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export commonly used items at the crate root
pub use error::{HistoryError, Result};
pub use extract::extract_values;
pub use history::History;
pub use optimizer_history::OptimizerHistory;
pub use options::HistoryOptions;
pub use types::{
    EvaluationCounts, EvaluationResult, ExtractedValues, Matrix, Mode, Quantity, SensiOrders,
    TraceValue, Vector,
};

/// Prelude module for convenient imports.
///
/// # Example
/// ```
/// use evaltrace_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{HistoryError, Result};
    pub use crate::extract::extract_values;
    pub use crate::history::{History, Trace};
    pub use crate::optimizer_history::OptimizerHistory;
    pub use crate::options::HistoryOptions;
    pub use crate::types::{
        EvaluationCounts, EvaluationResult, ExtractedValues, Matrix, Mode, Quantity, SensiOrders,
        TraceValue, Vector,
    };
}
