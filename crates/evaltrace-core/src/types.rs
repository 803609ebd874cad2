//! Type definitions shared by every history backend.
//!
//! This module provides the vocabulary of an evaluation trace: the
//! evaluation mode, the requested sensitivity orders, the recorded
//! quantities and the values they take, together with the running
//! evaluation counters.
//!
//! A quantity that was not recorded is represented by `None`. A `NaN`
//! stored inside a value is a genuine floating-point result.

use crate::error::{HistoryError, Result};
use nalgebra::{DMatrix, DVector};
use std::fmt;

/// Dynamic column vector of `f64`.
pub type Vector = DVector<f64>;

/// Dynamic matrix of `f64`.
pub type Matrix = DMatrix<f64>;

/// Relative tolerance used when deciding whether two parameter vectors
/// describe the same point.
pub const POINT_RTOL: f64 = 1e-5;

/// Absolute tolerance used when deciding whether two parameter vectors
/// describe the same point.
pub const POINT_ATOL: f64 = 1e-8;

/// Evaluation mode of an objective call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Function value, gradient and Hessian were requested.
    Function,
    /// Residuals and residual sensitivities were requested.
    Residual,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function => write!(f, "mode_fun"),
            Self::Residual => write!(f, "mode_res"),
        }
    }
}

/// Set of sensitivity orders computed by one objective call.
///
/// Order 0 is the value (or residuals), order 1 the gradient (or residual
/// Jacobian), order 2 the Hessian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SensiOrders(u8);

impl SensiOrders {
    /// Highest sensitivity order understood by the history.
    pub const MAX_ORDER: usize = 2;

    /// Creates a set from a list of orders. Orders above
    /// [`Self::MAX_ORDER`] are ignored.
    pub fn new(orders: &[usize]) -> Self {
        orders.iter().copied().collect()
    }

    /// Returns a copy of this set with `order` added.
    pub fn with(self, order: usize) -> Self {
        if order > Self::MAX_ORDER {
            return self;
        }
        Self(self.0 | (1 << order))
    }

    /// Returns true if `order` belongs to the set.
    pub fn contains(self, order: usize) -> bool {
        order <= Self::MAX_ORDER && self.0 & (1 << order) != 0
    }

    /// Returns true if no order was requested.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<usize> for SensiOrders {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), Self::with)
    }
}

/// Quantities recorded in a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quantity {
    /// Parameter vector
    X,
    /// Objective function value
    Fval,
    /// Gradient of the objective
    Grad,
    /// Hessian (or Fisher information approximation)
    Hess,
    /// Residual vector
    Res,
    /// Residual Jacobian
    Sres,
    /// Sum of squared residuals
    Chi2,
    /// Gradient of the chi-square
    Schi2,
    /// Elapsed wall time since history start, in seconds
    Time,
}

impl Quantity {
    /// All quantities, in storage order.
    pub const ALL: [Self; 9] = [
        Self::X,
        Self::Fval,
        Self::Grad,
        Self::Hess,
        Self::Res,
        Self::Sres,
        Self::Chi2,
        Self::Schi2,
        Self::Time,
    ];

    /// Quantities produced by value extraction.
    pub const EXTRACTED: [Self; 7] = [
        Self::Fval,
        Self::Grad,
        Self::Hess,
        Self::Res,
        Self::Sres,
        Self::Chi2,
        Self::Schi2,
    ];

    /// Stable name used in persisted traces.
    pub fn key(self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Fval => "value",
            Self::Grad => "gradient",
            Self::Hess => "hessian",
            Self::Res => "residual",
            Self::Sres => "residual_sensitivity",
            Self::Chi2 => "chi_square",
            Self::Schi2 => "chi_square_sensitivity",
            Self::Time => "time",
        }
    }

    /// Looks a quantity up by its persisted name.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|q| q.key() == key)
    }

    /// Rank of the values this quantity takes (0 scalar, 1 vector, 2 matrix).
    pub fn rank(self) -> usize {
        match self {
            Self::Fval | Self::Chi2 | Self::Time => 0,
            Self::X | Self::Grad | Self::Res | Self::Schi2 => 1,
            Self::Hess | Self::Sres => 2,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A recorded value of any rank.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceValue {
    /// Scalar value
    Scalar(f64),
    /// Vector value
    Vector(Vector),
    /// Matrix value
    Matrix(Matrix),
}

impl TraceValue {
    /// Human-readable kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Vector(_) => "vector",
            Self::Matrix(_) => "matrix",
        }
    }

    /// Returns true if every entry is `NaN`.
    ///
    /// An empty vector or matrix counts as all-`NaN`.
    pub fn is_all_nan(&self) -> bool {
        match self {
            Self::Scalar(v) => v.is_nan(),
            Self::Vector(v) => v.iter().all(|x| x.is_nan()),
            Self::Matrix(m) => m.iter().all(|x| x.is_nan()),
        }
    }

    /// Converts into a scalar, failing if the value has another rank.
    pub fn into_scalar(self, quantity: Quantity) -> Result<f64> {
        match self {
            Self::Scalar(v) => Ok(v),
            other => Err(mismatch(quantity, "scalar", &other)),
        }
    }

    /// Converts into a vector, failing if the value has another rank.
    pub fn into_vector(self, quantity: Quantity) -> Result<Vector> {
        match self {
            Self::Vector(v) => Ok(v),
            other => Err(mismatch(quantity, "vector", &other)),
        }
    }

    /// Converts into a matrix, failing if the value has another rank.
    ///
    /// A vector is accepted as a single-row matrix.
    pub fn into_matrix(self, quantity: Quantity) -> Result<Matrix> {
        match self {
            Self::Matrix(m) => Ok(m),
            Self::Vector(v) => Ok(Matrix::from_row_slice(1, v.len(), v.as_slice())),
            other => Err(mismatch(quantity, "matrix", &other)),
        }
    }
}

fn mismatch(quantity: Quantity, expected: &'static str, actual: &TraceValue) -> HistoryError {
    HistoryError::TypeMismatch {
        quantity: quantity.key(),
        expected,
        actual: actual.kind(),
    }
}

impl From<f64> for TraceValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vector> for TraceValue {
    fn from(value: Vector) -> Self {
        Self::Vector(value)
    }
}

impl From<Matrix> for TraceValue {
    fn from(value: Matrix) -> Self {
        Self::Matrix(value)
    }
}

/// Raw output of one objective evaluation.
///
/// Only the quantities the evaluator actually computed are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationResult {
    /// Function value
    pub fval: Option<f64>,
    /// Gradient
    pub grad: Option<Vector>,
    /// Hessian
    pub hess: Option<Matrix>,
    /// Residuals
    pub res: Option<Vector>,
    /// Residual Jacobian, one row per residual
    pub sres: Option<Matrix>,
    /// Chi-square value
    pub chi2: Option<f64>,
    /// Chi-square gradient
    pub schi2: Option<Vector>,
}

impl EvaluationResult {
    /// Creates an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the function value.
    pub fn with_fval(mut self, fval: f64) -> Self {
        self.fval = Some(fval);
        self
    }

    /// Sets the gradient.
    pub fn with_grad(mut self, grad: Vector) -> Self {
        self.grad = Some(grad);
        self
    }

    /// Sets the Hessian.
    pub fn with_hess(mut self, hess: Matrix) -> Self {
        self.hess = Some(hess);
        self
    }

    /// Sets the residuals.
    pub fn with_res(mut self, res: Vector) -> Self {
        self.res = Some(res);
        self
    }

    /// Sets the residual Jacobian.
    pub fn with_sres(mut self, sres: Matrix) -> Self {
        self.sres = Some(sres);
        self
    }

    /// Sets the chi-square value.
    pub fn with_chi2(mut self, chi2: f64) -> Self {
        self.chi2 = Some(chi2);
        self
    }

    /// Sets the chi-square gradient.
    pub fn with_schi2(mut self, schi2: Vector) -> Self {
        self.schi2 = Some(schi2);
        self
    }
}

/// Canonical record produced by value extraction.
///
/// Every recognized quantity has a slot; `None` marks a quantity that was
/// not recorded for this evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedValues {
    /// Function value
    pub fval: Option<f64>,
    /// Gradient
    pub grad: Option<Vector>,
    /// Hessian or Fisher information approximation
    pub hess: Option<Matrix>,
    /// Residuals
    pub res: Option<Vector>,
    /// Residual Jacobian
    pub sres: Option<Matrix>,
    /// Chi-square value
    pub chi2: Option<f64>,
    /// Chi-square gradient
    pub schi2: Option<Vector>,
}

impl ExtractedValues {
    /// Returns the value recorded for `quantity`, if any.
    ///
    /// `X` and `Time` are not part of the extracted record and always
    /// return `None`.
    pub fn get(&self, quantity: Quantity) -> Option<TraceValue> {
        match quantity {
            Quantity::Fval => self.fval.map(TraceValue::Scalar),
            Quantity::Grad => self.grad.clone().map(TraceValue::Vector),
            Quantity::Hess => self.hess.clone().map(TraceValue::Matrix),
            Quantity::Res => self.res.clone().map(TraceValue::Vector),
            Quantity::Sres => self.sres.clone().map(TraceValue::Matrix),
            Quantity::Chi2 => self.chi2.map(TraceValue::Scalar),
            Quantity::Schi2 => self.schi2.clone().map(TraceValue::Vector),
            Quantity::X | Quantity::Time => None,
        }
    }
}

/// Running evaluation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationCounts {
    /// Number of function value evaluations
    pub n_fval: usize,
    /// Number of gradient evaluations
    pub n_grad: usize,
    /// Number of Hessian evaluations
    pub n_hess: usize,
    /// Number of residual evaluations
    pub n_res: usize,
    /// Number of residual sensitivity evaluations
    pub n_sres: usize,
}

impl EvaluationCounts {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counters matching one objective call.
    pub fn record(&mut self, sensi_orders: SensiOrders, mode: Mode) {
        match mode {
            Mode::Function => {
                if sensi_orders.contains(0) {
                    self.n_fval += 1;
                }
                if sensi_orders.contains(1) {
                    self.n_grad += 1;
                }
                if sensi_orders.contains(2) {
                    self.n_hess += 1;
                }
            }
            Mode::Residual => {
                if sensi_orders.contains(0) {
                    self.n_res += 1;
                }
                if sensi_orders.contains(1) {
                    self.n_sres += 1;
                }
            }
        }
    }

    /// Component-wise maximum of two sets of counters.
    pub fn max(self, other: Self) -> Self {
        Self {
            n_fval: self.n_fval.max(other.n_fval),
            n_grad: self.n_grad.max(other.n_grad),
            n_hess: self.n_hess.max(other.n_hess),
            n_res: self.n_res.max(other.n_res),
            n_sres: self.n_sres.max(other.n_sres),
        }
    }
}

/// Returns true if two parameter vectors describe the same point.
///
/// Uses the tolerance rule `|a - b| <= atol + rtol * |b|` element-wise
/// with [`POINT_RTOL`] and [`POINT_ATOL`]. Vectors of different length
/// never match.
pub fn points_match(a: &Vector, b: &Vector) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b.iter())
            .all(|(x, y)| x == y || (x - y).abs() <= POINT_ATOL + POINT_RTOL * y.abs())
}

/// Returns true if `value` carries information: present and not all `NaN`.
pub fn is_informative(value: Option<&TraceValue>) -> bool {
    value.is_some_and(|v| !v.is_all_nan())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensi_orders() {
        let orders = SensiOrders::new(&[0, 2]);
        assert!(orders.contains(0));
        assert!(!orders.contains(1));
        assert!(orders.contains(2));
        assert!(!orders.contains(3));

        let ignored = SensiOrders::new(&[5]);
        assert!(ignored.is_empty());

        let collected: SensiOrders = [1usize].into_iter().collect();
        assert_eq!(collected, SensiOrders::default().with(1));
    }

    #[test]
    fn test_counts_function_mode() {
        let mut counts = EvaluationCounts::new();
        counts.record(SensiOrders::new(&[0, 1]), Mode::Function);
        counts.record(SensiOrders::new(&[2]), Mode::Function);
        assert_eq!(
            counts,
            EvaluationCounts {
                n_fval: 1,
                n_grad: 1,
                n_hess: 1,
                n_res: 0,
                n_sres: 0,
            }
        );
    }

    #[test]
    fn test_counts_residual_mode() {
        let mut counts = EvaluationCounts::new();
        counts.record(SensiOrders::new(&[0, 1, 2]), Mode::Residual);
        assert_eq!(counts.n_res, 1);
        assert_eq!(counts.n_sres, 1);
        // Order 2 has no residual counterpart
        assert_eq!(counts.n_hess, 0);
        assert_eq!(counts.n_fval, 0);
    }

    #[test]
    fn test_quantity_keys_round_trip() {
        for q in Quantity::ALL {
            assert_eq!(Quantity::from_key(q.key()), Some(q));
        }
        assert_eq!(Quantity::from_key("fval"), None);
    }

    #[test]
    fn test_points_match() {
        let a = Vector::from_vec(vec![1.0, 2.0]);
        let b = Vector::from_vec(vec![1.0 + 1e-9, 2.0]);
        let c = Vector::from_vec(vec![1.1, 2.0]);
        let d = Vector::from_vec(vec![1.0]);
        assert!(points_match(&a, &a));
        assert!(points_match(&a, &b));
        assert!(!points_match(&a, &c));
        assert!(!points_match(&a, &d));
    }

    #[test]
    fn test_trace_value_conversions() {
        let v = TraceValue::from(Vector::from_vec(vec![1.0, 2.0]));
        assert!(v.clone().into_scalar(Quantity::Fval).is_err());
        let m = v.into_matrix(Quantity::Hess).unwrap();
        assert_eq!(m.shape(), (1, 2));
        assert_eq!(m[(0, 1)], 2.0);

        assert!(TraceValue::Scalar(f64::NAN).is_all_nan());
        assert!(!is_informative(None));
        assert!(!is_informative(Some(&TraceValue::Scalar(f64::NAN))));
        assert!(is_informative(Some(&TraceValue::Vector(Vector::from_vec(vec![
            f64::NAN,
            1.0
        ])))));
    }
}
