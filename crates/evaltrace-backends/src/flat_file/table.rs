//! Column layout and cell encoding of the flat-file trace.
//!
//! The file has two header rows, giving each column a name and a label,
//! followed by one line per iteration with the iteration index in the
//! first column. Scalar columns carry the label `nan`. The parameter
//! vector is spread over one column per parameter, labelled with the
//! parameter name; the gradient and the chi-square sensitivity are spread
//! the same way when they are recorded, and otherwise occupy a single
//! empty column. Residuals, residual sensitivities and Hessians are
//! written as bracketed arrays.

use crate::text_codec::{format_matrix, format_vector, parse_matrix, parse_vector};
use evaltrace_core::error::{HistoryError, Result};
use evaltrace_core::types::{
    EvaluationCounts, ExtractedValues, Matrix, Quantity, TraceValue, Vector,
};
use std::collections::HashMap;
use std::path::Path;

/// Label of columns that are not spread over parameters.
pub const NULL_LABEL: &str = "nan";

const N_VALUE: &str = "n_value";
const N_GRAD: &str = "n_grad";
const N_HESS: &str = "n_hess";
const N_RES: &str = "n_res";
const N_SRES: &str = "n_sres";

const COUNTER_COLUMNS: [&str; 5] = [N_VALUE, N_GRAD, N_HESS, N_RES, N_SRES];

/// One line of the trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Seconds since the history started
    pub time: f64,
    /// Counters after this evaluation
    pub counts: EvaluationCounts,
    /// Evaluated parameters
    pub x: Option<Vector>,
    /// Objective function value
    pub fval: Option<f64>,
    /// Gradient, kept only when spread over parameter columns
    pub grad: Option<Vector>,
    /// Hessian
    pub hess: Option<Matrix>,
    /// Residuals
    pub res: Option<Vector>,
    /// Residual Jacobian
    pub sres: Option<Matrix>,
    /// Chi-square
    pub chi2: Option<f64>,
    /// Chi-square sensitivity, kept only when spread over parameter columns
    pub schi2: Option<Vector>,
}

impl Row {
    /// Value of `quantity` in this row.
    pub fn value(&self, quantity: Quantity) -> Option<TraceValue> {
        match quantity {
            Quantity::X => self.x.clone().map(TraceValue::Vector),
            Quantity::Fval => self.fval.map(TraceValue::Scalar),
            Quantity::Grad => self.grad.clone().map(TraceValue::Vector),
            Quantity::Hess => self.hess.clone().map(TraceValue::Matrix),
            Quantity::Res => self.res.clone().map(TraceValue::Vector),
            Quantity::Sres => self.sres.clone().map(TraceValue::Matrix),
            Quantity::Chi2 => self.chi2.map(TraceValue::Scalar),
            Quantity::Schi2 => self.schi2.clone().map(TraceValue::Vector),
            Quantity::Time => Some(TraceValue::Scalar(self.time)),
        }
    }
}

/// Column schema plus buffered rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    x_names: Vec<String>,
    grad_spread: bool,
    schi2_spread: bool,
    rows: Vec<Row>,
}

impl Table {
    /// Creates an empty table.
    pub fn new(x_names: Vec<String>, grad_spread: bool, schi2_spread: bool) -> Self {
        Self {
            x_names,
            grad_spread,
            schi2_spread,
            rows: Vec::new(),
        }
    }

    /// Parameter names, one per `x` column.
    pub fn x_names(&self) -> &[String] {
        &self.x_names
    }

    /// Whether gradients have one column per parameter.
    pub fn grad_spread(&self) -> bool {
        self.grad_spread
    }

    /// Whether chi-square sensitivities have one column per parameter.
    pub fn schi2_spread(&self) -> bool {
        self.schi2_spread
    }

    /// Buffered rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no row was appended yet.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Component-wise maximum of the counters over all rows.
    pub fn max_counts(&self) -> EvaluationCounts {
        self.rows
            .iter()
            .fold(EvaluationCounts::new(), |acc, row| acc.max(row.counts))
    }

    /// Appends one iteration.
    ///
    /// Vectors spread over parameter columns must have one entry per
    /// parameter name.
    pub fn push(
        &mut self,
        x: &Vector,
        values: &ExtractedValues,
        counts: EvaluationCounts,
        time: f64,
    ) -> Result<()> {
        self.check_width(Quantity::X, Some(x))?;
        let grad = values.grad.clone().filter(|_| self.grad_spread);
        let schi2 = values.schi2.clone().filter(|_| self.schi2_spread);
        self.check_width(Quantity::Grad, grad.as_ref())?;
        self.check_width(Quantity::Schi2, schi2.as_ref())?;

        self.rows.push(Row {
            time,
            counts,
            x: Some(x.clone()),
            fval: values.fval,
            grad,
            hess: values.hess.clone(),
            res: values.res.clone(),
            sres: values.sres.clone(),
            chi2: values.chi2,
            schi2,
        });
        Ok(())
    }

    fn check_width(&self, quantity: Quantity, vector: Option<&Vector>) -> Result<()> {
        match vector {
            Some(v) if v.len() != self.x_names.len() => Err(HistoryError::format(format!(
                "'{quantity}' has {} entries but the trace has {} parameter columns",
                v.len(),
                self.x_names.len()
            ))),
            _ => Ok(()),
        }
    }

    fn header(&self) -> (Vec<String>, Vec<String>) {
        let mut names = vec![String::new()];
        let mut labels = vec![String::new()];
        let mut single = |name: &str| {
            names.push(name.to_owned());
            labels.push(NULL_LABEL.to_owned());
        };
        single(Quantity::Time.key());
        for c in COUNTER_COLUMNS {
            single(c);
        }
        for q in [
            Quantity::Fval,
            Quantity::Chi2,
            Quantity::Res,
            Quantity::Sres,
            Quantity::Hess,
        ] {
            single(q.key());
        }

        // Without parameter names `x` is a single bracket-array column
        for (quantity, spread) in [
            (Quantity::X, !self.x_names.is_empty()),
            (Quantity::Grad, self.grad_spread),
            (Quantity::Schi2, self.schi2_spread),
        ] {
            if spread {
                for name in &self.x_names {
                    names.push(quantity.key().to_owned());
                    labels.push(name.clone());
                }
            } else {
                names.push(quantity.key().to_owned());
                labels.push(NULL_LABEL.to_owned());
            }
        }
        (names, labels)
    }

    fn record(&self, ix: usize, row: &Row) -> Vec<String> {
        let mut cells = Vec::with_capacity(12 + 3 * self.x_names.len());
        cells.push(ix.to_string());
        cells.push(row.time.to_string());
        let c = row.counts;
        for n in [c.n_fval, c.n_grad, c.n_hess, c.n_res, c.n_sres] {
            cells.push(n.to_string());
        }
        cells.push(scalar_cell(row.fval));
        cells.push(scalar_cell(row.chi2));
        cells.push(row.res.as_ref().map(format_vector).unwrap_or_default());
        cells.push(row.sres.as_ref().map(format_matrix).unwrap_or_default());
        cells.push(row.hess.as_ref().map(format_matrix).unwrap_or_default());

        let n = self.x_names.len();
        if n == 0 {
            cells.push(row.x.as_ref().map(format_vector).unwrap_or_default());
        } else {
            spread_cells(&mut cells, row.x.as_ref(), n);
        }
        if self.grad_spread {
            spread_cells(&mut cells, row.grad.as_ref(), n);
        } else {
            cells.push(String::new());
        }
        if self.schi2_spread {
            spread_cells(&mut cells, row.schi2.as_ref(), n);
        } else {
            cells.push(String::new());
        }
        cells
    }

    /// Rewrites `path` with the header and every row.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .map_err(|e| HistoryError::storage(path, e))?;

        let (names, labels) = self.header();
        writer
            .write_record(&names)
            .and_then(|()| writer.write_record(&labels))
            .map_err(|e| HistoryError::storage(path, e))?;
        for (ix, row) in self.rows.iter().enumerate() {
            writer
                .write_record(self.record(ix, row))
                .map_err(|e| HistoryError::storage(path, e))?;
        }
        writer.flush().map_err(|e| HistoryError::io(path, e))
    }

    /// Reads a table written by [`Table::write`].
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .map_err(|e| HistoryError::storage(path, e))?;
        let records = reader
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| HistoryError::storage(path, e))?;

        let [names, labels, data @ ..] = records.as_slice() else {
            return Err(HistoryError::format(format!(
                "{} lacks the two header rows",
                path.display()
            )));
        };
        let layout = Layout::from_header(names.iter().zip(labels.iter()).skip(1))?;

        let rows = data
            .iter()
            .map(|record| {
                let cells: Vec<&str> = record.iter().skip(1).collect();
                layout.row(&cells)
            })
            .collect::<Result<Vec<_>>>()?;

        let grad_spread = layout.spread(Quantity::Grad);
        let schi2_spread = layout.spread(Quantity::Schi2);
        Ok(Self {
            x_names: layout.x_names,
            grad_spread,
            schi2_spread,
            rows,
        })
    }
}

fn scalar_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn spread_cells(cells: &mut Vec<String>, vector: Option<&Vector>, n: usize) {
    match vector {
        Some(v) => cells.extend(v.iter().map(f64::to_string)),
        None => cells.extend(std::iter::repeat_n(String::new(), n)),
    }
}

/// Column positions recovered from the header rows.
struct Layout {
    single: HashMap<String, usize>,
    spread: HashMap<String, Vec<usize>>,
    x_names: Vec<String>,
}

impl Layout {
    fn from_header<'a, I>(columns: I) -> Result<Self>
    where
        I: Iterator<Item = (&'a str, &'a str)>,
    {
        let mut layout = Self {
            single: HashMap::new(),
            spread: HashMap::new(),
            x_names: Vec::new(),
        };
        for (pos, (name, label)) in columns.enumerate() {
            if label.is_empty() || label == NULL_LABEL {
                layout.single.insert(name.to_owned(), pos);
            } else {
                layout.spread.entry(name.to_owned()).or_default().push(pos);
                if name == Quantity::X.key() {
                    layout.x_names.push(label.to_owned());
                }
            }
        }
        if !layout.single.contains_key(Quantity::Time.key()) {
            return Err(HistoryError::format("trace header has no 'time' column"));
        }
        Ok(layout)
    }

    fn spread(&self, quantity: Quantity) -> bool {
        self.spread.contains_key(quantity.key())
    }

    fn cell<'c>(&self, cells: &[&'c str], name: &str) -> Option<&'c str> {
        self.single
            .get(name)
            .and_then(|&pos| cells.get(pos).copied())
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
    }

    fn scalar(&self, cells: &[&str], name: &str) -> Result<Option<f64>> {
        self.cell(cells, name).map(parse_scalar).transpose()
    }

    fn counter(&self, cells: &[&str], name: &str) -> Result<usize> {
        let Some(cell) = self.cell(cells, name) else {
            return Ok(0);
        };
        cell.parse::<usize>().or_else(|_| match parse_scalar(cell)? {
            // Counters written as floats by other tools
            v if v.is_finite() && v >= 0.0 && v.fract() == 0.0 => Ok(v as usize),
            _ => Err(HistoryError::format(format!("invalid counter '{cell}' in '{name}'"))),
        })
    }

    /// A spread vector; all-empty cells mean the value is missing.
    fn spread_vector(&self, cells: &[&str], quantity: Quantity) -> Result<Option<Vector>> {
        let Some(positions) = self.spread.get(quantity.key()) else {
            return Ok(None);
        };
        let raw: Vec<&str> = positions
            .iter()
            .map(|&pos| cells.get(pos).map_or("", |c| c.trim()))
            .collect();
        if raw.iter().all(|c| c.is_empty()) {
            return Ok(None);
        }
        raw.into_iter()
            .map(|c| if c.is_empty() { Ok(f64::NAN) } else { parse_scalar(c) })
            .collect::<Result<Vec<_>>>()
            .map(|v| Some(Vector::from_vec(v)))
    }

    fn row(&self, cells: &[&str]) -> Result<Row> {
        let counts = EvaluationCounts {
            n_fval: self.counter(cells, N_VALUE)?,
            n_grad: self.counter(cells, N_GRAD)?,
            n_hess: self.counter(cells, N_HESS)?,
            n_res: self.counter(cells, N_RES)?,
            n_sres: self.counter(cells, N_SRES)?,
        };
        Ok(Row {
            time: self.scalar(cells, Quantity::Time.key())?.unwrap_or(f64::NAN),
            counts,
            x: if self.spread(Quantity::X) {
                self.spread_vector(cells, Quantity::X)?
            } else {
                self.cell(cells, Quantity::X.key()).map(parse_vector).transpose()?
            },
            fval: self.scalar(cells, Quantity::Fval.key())?,
            grad: self.spread_vector(cells, Quantity::Grad)?,
            hess: self.cell(cells, Quantity::Hess.key()).map(parse_matrix).transpose()?,
            res: self.cell(cells, Quantity::Res.key()).map(parse_vector).transpose()?,
            sres: self.cell(cells, Quantity::Sres.key()).map(parse_matrix).transpose()?,
            chi2: self.scalar(cells, Quantity::Chi2.key())?,
            schi2: self.spread_vector(cells, Quantity::Schi2)?,
        })
    }
}

fn parse_scalar(cell: &str) -> Result<f64> {
    cell.parse::<f64>()
        .map_err(|_| HistoryError::format(format!("invalid number '{cell}'")))
}
