//! Best-point tracking on top of a history.
//!
//! [`OptimizerHistory`] wraps one [`History`] and keeps a summary of the
//! run: the initial point and its value, and the best point found so far
//! together with the derivative information known at that point.
//!
//! Optimizers frequently request the value and the derivatives at the same
//! point in separate calls. When a later call lands on the current best
//! point, the derivative slots still unset are filled from it. The same
//! reconciliation is applied when the summary is rebuilt from a reloaded
//! trace: if the minimum's iteration lacks a derivative, the immediately
//! following iteration is used when it evaluated the same point.

use crate::error::Result;
use crate::extract::extract_values;
use crate::history::History;
use crate::types::{
    points_match, EvaluationResult, Matrix, Mode, Quantity, SensiOrders, Vector,
};
use tracing::{debug, warn};

/// Number of leading iterations searched for the initial value when
/// rebuilding from a trace. Some optimizers evaluate derivatives first.
pub const MAX_INIT_ITER: usize = 3;

/// History container that tracks the initial and the best point.
#[derive(Debug, Clone)]
pub struct OptimizerHistory<H: History> {
    history: H,
    x0: Vector,
    fval0: Option<f64>,
    fval_min: f64,
    chi2_min: Option<f64>,
    x_min: Option<Vector>,
    grad_min: Option<Vector>,
    hess_min: Option<Matrix>,
    res_min: Option<Vector>,
    sres_min: Option<Matrix>,
}

impl<H: History> OptimizerHistory<H> {
    /// Creates a container with an empty summary.
    ///
    /// # Arguments
    ///
    /// * `history` - The history that stores the actual trace
    /// * `x0` - Initial parameters of the optimization
    pub fn new(history: H, x0: Vector) -> Self {
        Self {
            history,
            x0,
            fval0: None,
            fval_min: f64::INFINITY,
            chi2_min: None,
            x_min: None,
            grad_min: None,
            hess_min: None,
            res_min: None,
            sres_min: None,
        }
    }

    /// Creates a container whose summary is computed from the trace already
    /// stored in `history`.
    ///
    /// The history must keep a trace; the counter-only backend fails here.
    pub fn from_history(history: H, x0: Vector) -> Result<Self> {
        let mut container = Self::new(history, x0);
        container.compute_vals_from_trace()?;
        Ok(container)
    }

    /// Records an evaluation in the history and updates the summary.
    pub fn update(
        &mut self,
        x: &Vector,
        sensi_orders: SensiOrders,
        mode: Mode,
        result: &EvaluationResult,
    ) -> Result<()> {
        self.history.update(x, sensi_orders, mode, result)?;
        self.update_vals(x, mode, result);
        Ok(())
    }

    /// Finalizes the wrapped history.
    pub fn finalize(&mut self) -> Result<()> {
        self.history.finalize()
    }

    fn update_vals(&mut self, x: &Vector, mode: Mode, result: &EvaluationResult) {
        if points_match(x, &self.x0) {
            if self.fval0.is_none() {
                self.fval0 = result.fval;
            }
            self.x0 = x.clone();
        }

        if let Some(fval) = result.fval {
            if fval < self.fval_min {
                debug!(fval, previous = self.fval_min, "new best point");
                self.fval_min = fval;
                // Same chi-square the trace stores, derived from the
                // residuals when the evaluation did not report one
                self.chi2_min = extract_values(mode, result, self.history.options()).chi2;
                self.x_min = Some(x.clone());
                self.grad_min = result.grad.clone();
                self.hess_min = result.hess.clone();
                self.res_min = result.res.clone();
                self.sres_min = result.sres.clone();
            }
        }

        // Sensitivities evaluated in a separate call at the best point.
        if self.x_min.as_ref().is_some_and(|x_min| points_match(x, x_min)) {
            fill(&mut self.grad_min, result.grad.as_ref());
            fill(&mut self.hess_min, result.hess.as_ref());
            fill(&mut self.res_min, result.res.as_ref());
            fill(&mut self.sres_min, result.sres.as_ref());
        }
    }

    fn compute_vals_from_trace(&mut self) -> Result<()> {
        let len = self.history.len()?;

        for it in 0..len.min(MAX_INIT_ITER) {
            let Some(candidate) = self.history.get_fval(it)? else {
                continue;
            };
            let at_x0 = self
                .history
                .get_x(it)?
                .is_some_and(|x| points_match(&x, &self.x0));
            if !candidate.is_nan() && at_x0 {
                self.fval0 = Some(candidate);
                break;
            }
        }

        let fvals = self.history.get_fval_trace()?;
        let Some(ix_min) = first_min_index(&fvals) else {
            warn!(
                backend = self.history.backend_name(),
                len, "no function value in trace, best point left unset"
            );
            return Ok(());
        };

        for quantity in [Quantity::Fval, Quantity::Chi2, Quantity::X] {
            self.extract_from_history(quantity, ix_min)?;
        }

        if self.history.options().trace_record_res {
            self.extract_from_history(Quantity::Res, ix_min)?;
        }

        for quantity in [Quantity::Grad, Quantity::Sres, Quantity::Hess] {
            if !self.history.options().records(quantity) {
                continue;
            }
            self.extract_from_history(quantity, ix_min)?;
            let ix_try = ix_min + 1;
            if !self.is_set(quantity) && ix_try < len && self.same_point(ix_min, ix_try)? {
                self.extract_from_history(quantity, ix_try)?;
            }
        }

        debug!(ix_min, fval_min = self.fval_min, "summary rebuilt from trace");
        Ok(())
    }

    fn same_point(&self, a: usize, b: usize) -> Result<bool> {
        Ok(match (self.history.get_x(a)?, self.history.get_x(b)?) {
            (Some(xa), Some(xb)) => points_match(&xa, &xb),
            _ => false,
        })
    }

    fn is_set(&self, quantity: Quantity) -> bool {
        match quantity {
            Quantity::Grad => self.grad_min.is_some(),
            Quantity::Hess => self.hess_min.is_some(),
            Quantity::Res => self.res_min.is_some(),
            Quantity::Sres => self.sres_min.is_some(),
            Quantity::Chi2 => self.chi2_min.is_some(),
            Quantity::X => self.x_min.is_some(),
            Quantity::Fval => self.fval_min.is_finite(),
            Quantity::Schi2 | Quantity::Time => false,
        }
    }

    /// Copies `quantity` at iteration `ix` into the summary, unless it is
    /// missing or entirely `NaN`.
    fn extract_from_history(&mut self, quantity: Quantity, ix: usize) -> Result<()> {
        let value = self.history.get_value(quantity, ix)?;
        let Some(value) = value.filter(|v| !v.is_all_nan()) else {
            return Ok(());
        };
        match quantity {
            Quantity::Fval => self.fval_min = value.into_scalar(quantity)?,
            Quantity::Chi2 => self.chi2_min = Some(value.into_scalar(quantity)?),
            Quantity::X => self.x_min = Some(value.into_vector(quantity)?),
            Quantity::Grad => self.grad_min = Some(value.into_vector(quantity)?),
            Quantity::Res => self.res_min = Some(value.into_vector(quantity)?),
            Quantity::Hess => self.hess_min = Some(value.into_matrix(quantity)?),
            Quantity::Sres => self.sres_min = Some(value.into_matrix(quantity)?),
            Quantity::Schi2 | Quantity::Time => {}
        }
        Ok(())
    }

    /// The wrapped history.
    pub fn history(&self) -> &H {
        &self.history
    }

    /// Mutable access to the wrapped history.
    pub fn history_mut(&mut self) -> &mut H {
        &mut self.history
    }

    /// Consumes the container and returns the wrapped history.
    pub fn into_inner(self) -> H {
        self.history
    }

    /// Initial parameters.
    pub fn x0(&self) -> &Vector {
        &self.x0
    }

    /// Function value at the initial parameters, once evaluated.
    pub fn fval0(&self) -> Option<f64> {
        self.fval0
    }

    /// Best function value so far; `+∞` before any value was seen.
    pub fn fval_min(&self) -> f64 {
        self.fval_min
    }

    /// Chi-square at the best point.
    pub fn chi2_min(&self) -> Option<f64> {
        self.chi2_min
    }

    /// Best parameters so far.
    pub fn x_min(&self) -> Option<&Vector> {
        self.x_min.as_ref()
    }

    /// Gradient at the best point.
    pub fn grad_min(&self) -> Option<&Vector> {
        self.grad_min.as_ref()
    }

    /// Hessian (approximation) at the best point.
    pub fn hess_min(&self) -> Option<&Matrix> {
        self.hess_min.as_ref()
    }

    /// Residuals at the best point.
    pub fn res_min(&self) -> Option<&Vector> {
        self.res_min.as_ref()
    }

    /// Residual sensitivities at the best point.
    pub fn sres_min(&self) -> Option<&Matrix> {
        self.sres_min.as_ref()
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, value: Option<&T>) {
    if slot.is_none() {
        *slot = value.cloned();
    }
}

/// Index of the first minimum among present, non-`NaN` values.
fn first_min_index(values: &[Option<f64>]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter_map(|(ix, v)| v.filter(|v| !v.is_nan()).map(|v| (ix, v)))
        .fold(None, |best: Option<(usize, f64)>, (ix, v)| match best {
            Some((_, b)) if b <= v => best,
            _ => Some((ix, v)),
        })
        .map(|(ix, _)| ix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::HistoryOptions;
    use crate::test_utils::VecHistory;
    use crate::types::TraceValue;
    use proptest::prelude::*;

    fn v(values: &[f64]) -> Vector {
        Vector::from_vec(values.to_vec())
    }

    fn traced() -> VecHistory {
        VecHistory::new(HistoryOptions::new().with_trace_record(true))
    }

    #[test]
    fn test_gradient_backfilled_at_best_point() {
        let mut opt = OptimizerHistory::new(traced(), v(&[0.0, 0.0]));
        let fun = SensiOrders::new(&[0]);
        let grad = SensiOrders::new(&[1]);

        opt.update(&v(&[0.0, 0.0]), fun, Mode::Function, &EvaluationResult::new().with_fval(10.0))
            .unwrap();
        opt.update(&v(&[1.0, 1.0]), fun, Mode::Function, &EvaluationResult::new().with_fval(4.0))
            .unwrap();
        opt.update(
            &v(&[1.0, 1.0]),
            grad,
            Mode::Function,
            &EvaluationResult::new().with_grad(v(&[0.1, 0.1])),
        )
        .unwrap();

        assert_eq!(opt.fval_min(), 4.0);
        assert_eq!(opt.x_min(), Some(&v(&[1.0, 1.0])));
        assert_eq!(opt.grad_min(), Some(&v(&[0.1, 0.1])));
        assert_eq!(opt.fval0(), Some(10.0));
        assert_eq!(opt.history().len().unwrap(), 3);
    }

    #[test]
    fn test_live_chi2_matches_rebuilt() {
        let x0 = v(&[0.0]);
        let mut opt = OptimizerHistory::new(traced(), x0.clone());
        opt.update(
            &x0,
            SensiOrders::new(&[0]),
            Mode::Residual,
            &EvaluationResult::new()
                .with_fval(12.5)
                .with_res(v(&[3.0, 4.0])),
        )
        .unwrap();
        assert_eq!(opt.chi2_min(), Some(25.0));

        let rebuilt = OptimizerHistory::from_history(opt.into_inner(), x0).unwrap();
        assert_eq!(rebuilt.chi2_min(), Some(25.0));
    }

    #[test]
    fn test_new_minimum_resets_fields() {
        let mut opt = OptimizerHistory::new(traced(), v(&[0.0]));
        let orders = SensiOrders::new(&[0, 1]);
        opt.update(
            &v(&[1.0]),
            orders,
            Mode::Function,
            &EvaluationResult::new().with_fval(2.0).with_grad(v(&[1.0])),
        )
        .unwrap();
        opt.update(&v(&[2.0]), orders, Mode::Function, &EvaluationResult::new().with_fval(1.0))
            .unwrap();

        assert_eq!(opt.fval_min(), 1.0);
        // The new minimum carried no gradient: the old one must not leak
        assert_eq!(opt.grad_min(), None);
        assert_eq!(opt.fval0(), None);
    }

    #[test]
    fn test_no_backfill_away_from_best_point() {
        let mut opt = OptimizerHistory::new(traced(), v(&[0.0]));
        opt.update(
            &v(&[1.0]),
            SensiOrders::new(&[0]),
            Mode::Function,
            &EvaluationResult::new().with_fval(2.0),
        )
        .unwrap();
        opt.update(
            &v(&[3.0]),
            SensiOrders::new(&[1]),
            Mode::Function,
            &EvaluationResult::new().with_grad(v(&[9.0])),
        )
        .unwrap();
        assert_eq!(opt.grad_min(), None);
    }

    #[test]
    fn test_nan_value_never_becomes_minimum() {
        let mut opt = OptimizerHistory::new(traced(), v(&[0.0]));
        opt.update(
            &v(&[1.0]),
            SensiOrders::new(&[0]),
            Mode::Function,
            &EvaluationResult::new().with_fval(f64::NAN),
        )
        .unwrap();
        assert!(opt.fval_min().is_infinite());
        assert!(opt.x_min().is_none());
    }

    #[test]
    fn test_finalize_delegates() {
        let mut opt = OptimizerHistory::new(traced(), v(&[0.0]));
        opt.finalize().unwrap();
        assert_eq!(opt.history().finalize_calls, 1);
    }

    #[test]
    fn test_rebuild_uses_following_iteration() {
        let mut history = traced();
        let x_a = v(&[0.0, 0.0]);
        let x_b = v(&[1.0, 1.0]);
        history.push_row(&x_a, &[(Quantity::Fval, TraceValue::Scalar(5.0))]);
        history.push_row(&x_a, &[(Quantity::Fval, TraceValue::Scalar(3.0))]);
        history.push_row(
            &x_b,
            &[
                (Quantity::Fval, TraceValue::Scalar(1.0)),
                (Quantity::Chi2, TraceValue::Scalar(2.0)),
            ],
        );
        history.push_row(&x_b, &[(Quantity::Grad, TraceValue::Vector(v(&[0.2, 0.3])))]);

        let opt = OptimizerHistory::from_history(history, x_a).unwrap();
        assert_eq!(opt.fval0(), Some(5.0));
        assert_eq!(opt.fval_min(), 1.0);
        assert_eq!(opt.chi2_min(), Some(2.0));
        assert_eq!(opt.x_min(), Some(&x_b));
        assert_eq!(opt.grad_min(), Some(&v(&[0.2, 0.3])));
        assert_eq!(opt.hess_min(), None);
    }

    #[test]
    fn test_rebuild_ignores_following_iteration_at_other_point() {
        let mut history = traced();
        history.push_row(&v(&[1.0]), &[(Quantity::Fval, TraceValue::Scalar(1.0))]);
        history.push_row(&v(&[2.0]), &[(Quantity::Grad, TraceValue::Vector(v(&[0.5])))]);

        let opt = OptimizerHistory::from_history(history, v(&[0.0])).unwrap();
        assert_eq!(opt.x_min(), Some(&v(&[1.0])));
        assert_eq!(opt.grad_min(), None);
        assert_eq!(opt.fval0(), None);
    }

    #[test]
    fn test_rebuild_respects_recording_flags() {
        let mut history =
            VecHistory::new(HistoryOptions::new().with_record(Quantity::Grad, false));
        history.push_row(
            &v(&[1.0]),
            &[
                (Quantity::Fval, TraceValue::Scalar(1.0)),
                (Quantity::Grad, TraceValue::Vector(v(&[0.5]))),
            ],
        );
        let opt = OptimizerHistory::from_history(history, v(&[1.0])).unwrap();
        assert_eq!(opt.grad_min(), None);
        assert_eq!(opt.fval0(), Some(1.0));
    }

    #[test]
    fn test_rebuild_ties_pick_first_and_skip_nan() {
        let mut history = traced();
        history.push_row(&v(&[0.0]), &[(Quantity::Fval, TraceValue::Scalar(f64::NAN))]);
        history.push_row(&v(&[1.0]), &[(Quantity::Fval, TraceValue::Scalar(2.0))]);
        history.push_row(&v(&[2.0]), &[(Quantity::Fval, TraceValue::Scalar(2.0))]);

        let opt = OptimizerHistory::from_history(history, v(&[0.0])).unwrap();
        assert_eq!(opt.fval_min(), 2.0);
        assert_eq!(opt.x_min(), Some(&v(&[1.0])));
        // NaN at x0 is not adopted as the initial value
        assert_eq!(opt.fval0(), None);
    }

    #[test]
    fn test_rebuild_all_nan_gradient_counts_as_unset() {
        let mut history = traced();
        let x = v(&[1.0]);
        history.push_row(
            &x,
            &[
                (Quantity::Fval, TraceValue::Scalar(1.0)),
                (Quantity::Grad, TraceValue::Vector(v(&[f64::NAN]))),
            ],
        );
        history.push_row(&x, &[(Quantity::Grad, TraceValue::Vector(v(&[4.0])))]);
        let opt = OptimizerHistory::from_history(history, x).unwrap();
        assert_eq!(opt.grad_min(), Some(&v(&[4.0])));
    }

    #[test]
    fn test_rebuild_empty_trace() {
        let opt = OptimizerHistory::from_history(traced(), v(&[0.0])).unwrap();
        assert!(opt.fval_min().is_infinite());
        assert!(opt.x_min().is_none());
    }

    #[test]
    fn test_first_min_index() {
        assert_eq!(first_min_index(&[]), None);
        assert_eq!(first_min_index(&[None, Some(f64::NAN)]), None);
        assert_eq!(first_min_index(&[Some(3.0), Some(1.0), Some(1.0)]), Some(1));
        assert_eq!(first_min_index(&[None, Some(2.0), Some(-1.0)]), Some(2));
    }

    proptest! {
        #[test]
        fn prop_fval_min_is_running_minimum(
            values in prop::collection::vec(prop::option::of(-1e6f64..1e6), 1..40)
        ) {
            let mut opt = OptimizerHistory::new(traced(), v(&[0.0]));
            let mut expected = f64::INFINITY;
            for (i, value) in values.iter().enumerate() {
                let mut result = EvaluationResult::new();
                if let Some(f) = value {
                    result = result.with_fval(*f);
                    expected = expected.min(*f);
                }
                let before = opt.fval_min();
                opt.update(&v(&[i as f64]), SensiOrders::new(&[0]), Mode::Function, &result)
                    .unwrap();
                prop_assert!(opt.fval_min() <= before);
                prop_assert_eq!(opt.fval_min(), expected);
            }
        }
    }
}
