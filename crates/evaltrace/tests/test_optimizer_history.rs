//! Best-point tracking over the persistent backends.

use approx::assert_relative_eq;
use evaltrace::prelude::*;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn v(values: &[f64]) -> Vector {
    Vector::from_vec(values.to_vec())
}

/// Four evaluations: the minimum at index 2, its gradient evaluated
/// separately at index 3.
fn record_run(history: AnyHistory, x0: &Vector) -> OptimizerHistory<AnyHistory> {
    let mut tracker = OptimizerHistory::new(history, x0.clone());
    let fun = SensiOrders::new(&[0]);
    let x_best = v(&[1.0, -1.0]);

    tracker
        .update(x0, fun, Mode::Function, &EvaluationResult::new().with_fval(8.0))
        .unwrap();
    tracker
        .update(&v(&[2.0, 0.0]), fun, Mode::Function, &EvaluationResult::new().with_fval(3.0))
        .unwrap();
    tracker
        .update(&x_best, fun, Mode::Function, &EvaluationResult::new().with_fval(0.5))
        .unwrap();
    tracker
        .update(
            &x_best,
            SensiOrders::new(&[1]),
            Mode::Function,
            &EvaluationResult::new().with_grad(v(&[0.01, -0.02])),
        )
        .unwrap();
    tracker.finalize().unwrap();
    tracker
}

fn check_summary(tracker: &OptimizerHistory<AnyHistory>) {
    assert_eq!(tracker.fval0(), Some(8.0));
    assert_eq!(tracker.fval_min(), 0.5);
    assert_eq!(tracker.x_min(), Some(&v(&[1.0, -1.0])));
    assert_eq!(tracker.grad_min(), Some(&v(&[0.01, -0.02])));
    assert_eq!(tracker.hess_min(), None);
    assert_eq!(tracker.res_min(), None);
}

#[test]
fn test_summary_rebuilt_from_csv() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("trace.csv");
    let options = HistoryOptions::new()
        .with_trace_record(true)
        .with_storage_file(file.to_string_lossy());
    let x0 = v(&[0.0, 0.0]);

    let live = record_run(create_history(options, "0", None).unwrap(), &x0);
    check_summary(&live);

    let rebuilt = OptimizerHistory::from_history(load_history("0", &file).unwrap(), x0).unwrap();
    check_summary(&rebuilt);
    assert_eq!(rebuilt.history().len().unwrap(), 4);
}

#[test]
fn test_summary_rebuilt_from_hierarchical_store() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("runs").join("store.json");
    let options = HistoryOptions::new()
        .with_trace_record(true)
        .with_storage_file(file.to_string_lossy());
    let x0 = v(&[0.0, 0.0]);

    let live = record_run(create_history(options, "3", None).unwrap(), &x0);
    check_summary(&live);

    let rebuilt = OptimizerHistory::from_history(load_history("3", &file).unwrap(), x0).unwrap();
    check_summary(&rebuilt);
}

#[test]
fn test_residual_run_summary() {
    let x0 = v(&[0.0]);
    let history = create_history(HistoryOptions::new().with_trace_record(true), "0", None).unwrap();
    let mut tracker = OptimizerHistory::new(history, x0.clone());

    let res = v(&[0.3, 0.4]);
    let sres = Matrix::from_row_slice(2, 1, &[1.0, 2.0]);
    tracker
        .update(
            &x0,
            SensiOrders::new(&[0, 1]),
            Mode::Residual,
            &EvaluationResult::new()
                .with_fval(0.25)
                .with_chi2(0.25)
                .with_res(res.clone())
                .with_sres(sres.clone()),
        )
        .unwrap();

    assert_relative_eq!(tracker.fval_min(), 0.25);
    assert_eq!(tracker.chi2_min(), Some(0.25));
    assert_eq!(tracker.res_min(), Some(&res));
    assert_eq!(tracker.sres_min(), Some(&sres));

    let rebuilt = OptimizerHistory::from_history(tracker.into_inner(), x0).unwrap();
    assert_eq!(rebuilt.res_min(), Some(&res));
    assert_eq!(rebuilt.sres_min(), Some(&sres));
    // Derived from the residuals during extraction
    let hess = rebuilt.hess_min().unwrap();
    assert_relative_eq!(hess[(0, 0)], 5.0);
    let grad = rebuilt.grad_min().unwrap();
    assert_relative_eq!(grad[0], 1.1);
}

#[test]
fn test_counter_only_history_cannot_rebuild() {
    let history = create_history(HistoryOptions::new(), "0", None).unwrap();
    let err = OptimizerHistory::from_history(history, v(&[0.0])).unwrap_err();
    assert!(matches!(err, HistoryError::Unsupported { .. }));
}
