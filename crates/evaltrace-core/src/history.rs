//! The history interface shared by all backends.
//!
//! A history receives one [`History::update`] per objective evaluation,
//! keeps the running evaluation counters and, depending on the backend, an
//! ordered trace of evaluation records that can be queried per quantity.
//! [`History::finalize`] is called exactly once at the end of a run.
//!
//! Backends implement [`History::get_value`]; the typed accessors and the
//! whole-trace queries are provided on top of it.

use crate::error::{HistoryError, Result};
use crate::options::HistoryOptions;
use crate::types::{
    EvaluationCounts, EvaluationResult, Matrix, Mode, Quantity, SensiOrders, TraceValue, Vector,
};
use std::path::Path;
use std::time::Instant;

/// Trace of one quantity; `None` marks iterations where it was not recorded.
pub type Trace<T> = Vec<Option<T>>;

/// Storage interface for objective-function evaluations.
pub trait History {
    /// Short backend name used in diagnostics.
    fn backend_name(&self) -> &'static str;

    /// Records one objective evaluation.
    ///
    /// # Arguments
    ///
    /// * `x` - The parameter vector
    /// * `sensi_orders` - The sensitivity orders computed
    /// * `mode` - Whether function values or residuals were computed
    /// * `result` - The quantities the evaluator returned
    fn update(
        &mut self,
        x: &Vector,
        sensi_orders: SensiOrders,
        mode: Mode,
        result: &EvaluationResult,
    ) -> Result<()>;

    /// Flushes anything not yet persisted. Called once after a run.
    fn finalize(&mut self) -> Result<()>;

    /// Number of recorded trace entries.
    fn len(&self) -> Result<usize>;

    /// Returns true if no trace entry has been recorded.
    fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }

    /// Current evaluation counters.
    fn counts(&self) -> Result<EvaluationCounts>;

    /// Options in effect for this history.
    fn options(&self) -> &HistoryOptions;

    /// Moment the history was created or reopened.
    fn start_time(&self) -> Instant;

    /// File backing the history, if it is persisted.
    fn storage_path(&self) -> Option<&Path>;

    /// Value of `quantity` at iteration `ix`.
    ///
    /// Fails with [`HistoryError::IndexOutOfRange`] if `ix >= len()`.
    fn get_value(&self, quantity: Quantity, ix: usize) -> Result<Option<TraceValue>>;

    /// Values of `quantity` over the whole trace.
    fn get_trace(&self, quantity: Quantity) -> Result<Trace<TraceValue>> {
        (0..self.len()?)
            .map(|ix| self.get_value(quantity, ix))
            .collect()
    }

    /// Number of function value evaluations.
    fn n_fval(&self) -> Result<usize> {
        self.counts().map(|c| c.n_fval)
    }

    /// Number of gradient evaluations.
    fn n_grad(&self) -> Result<usize> {
        self.counts().map(|c| c.n_grad)
    }

    /// Number of Hessian evaluations.
    fn n_hess(&self) -> Result<usize> {
        self.counts().map(|c| c.n_hess)
    }

    /// Number of residual evaluations.
    fn n_res(&self) -> Result<usize> {
        self.counts().map(|c| c.n_res)
    }

    /// Number of residual sensitivity evaluations.
    fn n_sres(&self) -> Result<usize> {
        self.counts().map(|c| c.n_sres)
    }

    /// Parameter vector at iteration `ix`.
    fn get_x(&self, ix: usize) -> Result<Option<Vector>> {
        vector_at(self, Quantity::X, ix)
    }

    /// Function value at iteration `ix`.
    fn get_fval(&self, ix: usize) -> Result<Option<f64>> {
        scalar_at(self, Quantity::Fval, ix)
    }

    /// Gradient at iteration `ix`.
    fn get_grad(&self, ix: usize) -> Result<Option<Vector>> {
        vector_at(self, Quantity::Grad, ix)
    }

    /// Hessian at iteration `ix`.
    fn get_hess(&self, ix: usize) -> Result<Option<Matrix>> {
        matrix_at(self, Quantity::Hess, ix)
    }

    /// Residuals at iteration `ix`.
    fn get_res(&self, ix: usize) -> Result<Option<Vector>> {
        vector_at(self, Quantity::Res, ix)
    }

    /// Residual sensitivities at iteration `ix`.
    fn get_sres(&self, ix: usize) -> Result<Option<Matrix>> {
        matrix_at(self, Quantity::Sres, ix)
    }

    /// Chi-square value at iteration `ix`.
    fn get_chi2(&self, ix: usize) -> Result<Option<f64>> {
        scalar_at(self, Quantity::Chi2, ix)
    }

    /// Chi-square sensitivity at iteration `ix`.
    fn get_schi2(&self, ix: usize) -> Result<Option<Vector>> {
        vector_at(self, Quantity::Schi2, ix)
    }

    /// Elapsed time at iteration `ix`, in seconds.
    fn get_time(&self, ix: usize) -> Result<Option<f64>> {
        scalar_at(self, Quantity::Time, ix)
    }

    /// Parameter trace.
    fn get_x_trace(&self) -> Result<Trace<Vector>> {
        typed_trace(self, Quantity::X, TraceValue::into_vector)
    }

    /// Function value trace.
    fn get_fval_trace(&self) -> Result<Trace<f64>> {
        typed_trace(self, Quantity::Fval, TraceValue::into_scalar)
    }

    /// Gradient trace.
    fn get_grad_trace(&self) -> Result<Trace<Vector>> {
        typed_trace(self, Quantity::Grad, TraceValue::into_vector)
    }

    /// Hessian trace.
    fn get_hess_trace(&self) -> Result<Trace<Matrix>> {
        typed_trace(self, Quantity::Hess, TraceValue::into_matrix)
    }

    /// Residual trace.
    fn get_res_trace(&self) -> Result<Trace<Vector>> {
        typed_trace(self, Quantity::Res, TraceValue::into_vector)
    }

    /// Residual sensitivity trace.
    fn get_sres_trace(&self) -> Result<Trace<Matrix>> {
        typed_trace(self, Quantity::Sres, TraceValue::into_matrix)
    }

    /// Chi-square trace.
    fn get_chi2_trace(&self) -> Result<Trace<f64>> {
        typed_trace(self, Quantity::Chi2, TraceValue::into_scalar)
    }

    /// Chi-square sensitivity trace.
    fn get_schi2_trace(&self) -> Result<Trace<Vector>> {
        typed_trace(self, Quantity::Schi2, TraceValue::into_vector)
    }

    /// Execution time trace.
    fn get_time_trace(&self) -> Result<Trace<f64>> {
        typed_trace(self, Quantity::Time, TraceValue::into_scalar)
    }
}

fn scalar_at<H: History + ?Sized>(history: &H, q: Quantity, ix: usize) -> Result<Option<f64>> {
    history
        .get_value(q, ix)?
        .map(|v| v.into_scalar(q))
        .transpose()
}

fn vector_at<H: History + ?Sized>(history: &H, q: Quantity, ix: usize) -> Result<Option<Vector>> {
    history
        .get_value(q, ix)?
        .map(|v| v.into_vector(q))
        .transpose()
}

fn matrix_at<H: History + ?Sized>(history: &H, q: Quantity, ix: usize) -> Result<Option<Matrix>> {
    history
        .get_value(q, ix)?
        .map(|v| v.into_matrix(q))
        .transpose()
}

fn typed_trace<H, T, F>(history: &H, q: Quantity, convert: F) -> Result<Trace<T>>
where
    H: History + ?Sized,
    F: Fn(TraceValue, Quantity) -> Result<T>,
{
    history
        .get_trace(q)?
        .into_iter()
        .map(|v| v.map(|v| convert(v, q)).transpose())
        .collect()
}

/// Fails with [`HistoryError::IndexOutOfRange`] unless `ix < len`.
pub fn check_index(ix: usize, len: usize) -> Result<()> {
    if ix >= len {
        return Err(HistoryError::index_out_of_range(ix, len));
    }
    Ok(())
}
