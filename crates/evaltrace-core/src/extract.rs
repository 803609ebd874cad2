//! Value extraction: from a raw evaluation result to a canonical record.
//!
//! The extractor copies every quantity whose recording flag is enabled and
//! which the evaluator provided. In residual mode it then derives the
//! quantities that follow from residuals and their Jacobian J:
//!
//! - chi-square: `Σ rᵢ²`
//! - chi-square sensitivity: `2 Jᵀ r`
//! - Hessian approximation (Fisher information): `Jᵀ J`
//! - gradient: `½ · schi2`, only when a chi-square sensitivity is available
//!
//! Derived values only fill slots that are still empty, and they are
//! computed independently of the recording flags.

use crate::options::HistoryOptions;
use crate::types::{EvaluationResult, ExtractedValues, Matrix, Mode, Quantity, Vector};
use tracing::debug;

/// Chi-square of a residual vector.
pub fn res_to_chi2(res: &Vector) -> f64 {
    res.dot(res)
}

/// Chi-square sensitivity `2 Jᵀ r`, or `None` if the shapes disagree.
pub fn sres_to_schi2(res: &Vector, sres: &Matrix) -> Option<Vector> {
    if sres.nrows() != res.len() {
        debug!(
            residuals = res.len(),
            jacobian_rows = sres.nrows(),
            "residual Jacobian does not match residual vector"
        );
        return None;
    }
    Some(sres.transpose() * res * 2.0)
}

/// Fisher information approximation `Jᵀ J`.
pub fn sres_to_fim(sres: &Matrix) -> Matrix {
    sres.transpose() * sres
}

fn recorded<T: Clone>(options: &HistoryOptions, quantity: Quantity, value: Option<&T>) -> Option<T> {
    if options.records(quantity) {
        value.cloned()
    } else {
        None
    }
}

/// Builds the canonical record of one evaluation.
///
/// Deterministic and free of side effects.
pub fn extract_values(
    mode: Mode,
    result: &EvaluationResult,
    options: &HistoryOptions,
) -> ExtractedValues {
    let mut values = ExtractedValues {
        fval: result.fval,
        grad: recorded(options, Quantity::Grad, result.grad.as_ref()),
        hess: recorded(options, Quantity::Hess, result.hess.as_ref()),
        res: recorded(options, Quantity::Res, result.res.as_ref()),
        sres: recorded(options, Quantity::Sres, result.sres.as_ref()),
        chi2: recorded(options, Quantity::Chi2, result.chi2.as_ref()),
        schi2: recorded(options, Quantity::Schi2, result.schi2.as_ref()),
    };

    if mode == Mode::Residual {
        let res = result.res.as_ref();
        let sres = result.sres.as_ref();

        let chi2 = res.map(res_to_chi2);
        let schi2 = res.zip(sres).and_then(|(r, j)| sres_to_schi2(r, j));
        let fim = sres.map(sres_to_fim);
        let grad = result
            .schi2
            .as_ref()
            .or(schi2.as_ref())
            .map(|s| s * 0.5);

        if values.chi2.is_none() {
            values.chi2 = chi2;
        }
        if values.schi2.is_none() {
            values.schi2 = schi2;
        }
        if values.hess.is_none() {
            values.hess = fim;
        }
        if values.grad.is_none() {
            values.grad = grad;
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn residual_result() -> EvaluationResult {
        EvaluationResult::new()
            .with_res(Vector::from_vec(vec![3.0, 4.0]))
            .with_sres(Matrix::identity(2, 2))
    }

    #[test]
    fn test_residual_derivations() {
        let options = HistoryOptions::new().with_trace_record(true);
        let values = extract_values(Mode::Residual, &residual_result(), &options);

        assert_relative_eq!(values.chi2.unwrap(), 25.0);
        assert_eq!(values.schi2.unwrap(), Vector::from_vec(vec![6.0, 8.0]));
        assert_eq!(values.hess.unwrap(), Matrix::identity(2, 2));
        assert_eq!(values.grad.unwrap(), Vector::from_vec(vec![3.0, 4.0]));
        assert_eq!(values.res.unwrap(), Vector::from_vec(vec![3.0, 4.0]));
        assert!(values.fval.is_none());
    }

    #[test]
    fn test_function_mode_does_not_derive() {
        let options = HistoryOptions::new();
        let values = extract_values(Mode::Function, &residual_result(), &options);
        assert!(values.chi2.is_none());
        assert!(values.schi2.is_none());
        assert!(values.grad.is_none());
        assert!(values.hess.is_none());
        // Residuals are still copied when present and flagged
        assert!(values.res.is_some());
    }

    #[test]
    fn test_flags_filter_copied_values() {
        let options = HistoryOptions::new()
            .with_record(Quantity::Grad, false)
            .with_record(Quantity::Hess, false);
        let result = EvaluationResult::new()
            .with_fval(1.5)
            .with_grad(Vector::from_vec(vec![1.0]))
            .with_hess(Matrix::identity(1, 1));
        let values = extract_values(Mode::Function, &result, &options);
        assert_eq!(values.fval, Some(1.5));
        assert!(values.grad.is_none());
        assert!(values.hess.is_none());
    }

    #[test]
    fn test_derivation_ignores_flags() {
        let options = HistoryOptions::new()
            .with_record(Quantity::Hess, false)
            .with_record(Quantity::Chi2, false);
        let values = extract_values(Mode::Residual, &residual_result(), &options);
        assert_eq!(values.hess, Some(Matrix::identity(2, 2)));
        assert_relative_eq!(values.chi2.unwrap(), 25.0);
    }

    #[test]
    fn test_raw_values_take_precedence() {
        let options = HistoryOptions::new();
        let result = residual_result()
            .with_chi2(7.0)
            .with_schi2(Vector::from_vec(vec![2.0, 2.0]));
        let values = extract_values(Mode::Residual, &result, &options);
        assert_eq!(values.chi2, Some(7.0));
        assert_eq!(values.schi2, Some(Vector::from_vec(vec![2.0, 2.0])));
        // Gradient follows the chi-square sensitivity that is available
        assert_eq!(values.grad, Some(Vector::from_vec(vec![1.0, 1.0])));
    }

    #[test]
    fn test_residuals_only() {
        let options = HistoryOptions::new();
        let result = EvaluationResult::new().with_res(Vector::from_vec(vec![1.0, 2.0]));
        let values = extract_values(Mode::Residual, &result, &options);
        assert_relative_eq!(values.chi2.unwrap(), 5.0);
        assert!(values.schi2.is_none());
        assert!(values.grad.is_none());
        assert!(values.hess.is_none());
    }

    #[test]
    fn test_shape_mismatch_skips_sensitivity() {
        let options = HistoryOptions::new();
        let result = EvaluationResult::new()
            .with_res(Vector::from_vec(vec![1.0, 2.0, 3.0]))
            .with_sres(Matrix::identity(2, 2));
        let values = extract_values(Mode::Residual, &result, &options);
        assert!(values.schi2.is_none());
        assert!(values.grad.is_none());
        assert_eq!(values.hess, Some(Matrix::identity(2, 2)));
    }

    #[test]
    fn test_deterministic() {
        let options = HistoryOptions::new();
        let a = extract_values(Mode::Residual, &residual_result(), &options);
        let b = extract_values(Mode::Residual, &residual_result(), &options);
        assert_eq!(a, b);
    }
}
