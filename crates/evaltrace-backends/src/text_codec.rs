//! Text encoding of vectors and matrices for flat-file cells.
//!
//! Vectors are written as `[a b c]`, matrices as `[[a b]\n [c d]]`, the
//! layout numerical tools commonly print arrays in. Elements use scientific
//! notation with 17 significant digits so every `f64` survives a round trip
//! bit for bit. `NaN` and infinities are written as `NaN`, `inf` and
//! `-inf`; parsing accepts any capitalization.

use evaltrace_core::error::{HistoryError, Result};
use evaltrace_core::types::{Matrix, TraceValue, Vector};
use std::fmt::Write;

fn push_element(out: &mut String, value: f64) {
    // Writing into a String cannot fail.
    let _ = write!(out, "{value:.16e}");
}

fn push_row<'a, I: Iterator<Item = &'a f64>>(out: &mut String, row: I) {
    out.push('[');
    for (i, value) in row.enumerate() {
        if i > 0 {
            out.push(' ');
        }
        push_element(out, *value);
    }
    out.push(']');
}

/// Formats a vector as `[a b c]`.
pub fn format_vector(vector: &Vector) -> String {
    let mut out = String::with_capacity(vector.len() * 24 + 2);
    push_row(&mut out, vector.iter());
    out
}

/// Formats a matrix as `[[a b]\n [c d]]`, one line per row.
pub fn format_matrix(matrix: &Matrix) -> String {
    let mut out = String::with_capacity(matrix.len() * 24 + 4 * matrix.nrows() + 2);
    out.push('[');
    for (i, row) in matrix.row_iter().enumerate() {
        if i > 0 {
            out.push_str("\n ");
        }
        push_row(&mut out, row.iter());
    }
    out.push(']');
    out
}

fn parse_elements(text: &str) -> Result<Vec<f64>> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| HistoryError::format(format!("invalid array element '{token}'")))
        })
        .collect()
}

fn strip_brackets(text: &str) -> Result<&str> {
    text.trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| HistoryError::format(format!("array text must be enclosed in brackets: '{text}'")))
}

/// Parses the output of [`format_vector`].
pub fn parse_vector(text: &str) -> Result<Vector> {
    let inner = strip_brackets(text)?;
    if inner.contains(['[', ']']) {
        return Err(HistoryError::format(format!(
            "nested brackets in vector text: '{text}'"
        )));
    }
    Ok(Vector::from_vec(parse_elements(inner)?))
}

/// Parses the output of [`format_matrix`].
///
/// Every row must have the same number of elements. `[]` is read as a
/// matrix without rows.
pub fn parse_matrix(text: &str) -> Result<Matrix> {
    let inner = strip_brackets(text)?.trim();
    if inner.is_empty() {
        return Ok(Matrix::zeros(0, 0));
    }

    let mut pieces: Vec<&str> = inner.split(']').collect();
    // The text after the last closing bracket must be blank.
    if pieces.pop().is_some_and(|tail| !tail.trim().is_empty()) {
        return Err(HistoryError::format(format!(
            "trailing characters in matrix text: '{text}'"
        )));
    }

    let mut ncols = None;
    let mut data = Vec::new();
    for piece in &pieces {
        let row = piece.trim().strip_prefix('[').ok_or_else(|| {
            HistoryError::format(format!("matrix row must start with '[': '{text}'"))
        })?;
        let values = parse_elements(row)?;
        match ncols {
            None => ncols = Some(values.len()),
            Some(n) if n != values.len() => {
                return Err(HistoryError::format(format!(
                    "ragged matrix rows ({n} and {} elements)",
                    values.len()
                )))
            }
            Some(_) => {}
        }
        data.extend(values);
    }

    Ok(Matrix::from_row_slice(
        pieces.len(),
        ncols.unwrap_or(0),
        &data,
    ))
}

/// Parses a vector or a matrix; a leading `[[` selects the matrix form.
pub fn parse_array(text: &str) -> Result<TraceValue> {
    if text.trim_start().starts_with("[[") {
        parse_matrix(text).map(TraceValue::Matrix)
    } else {
        parse_vector(text).map(TraceValue::Vector)
    }
}
