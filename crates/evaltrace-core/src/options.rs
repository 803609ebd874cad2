//! Configuration of history recording.
//!
//! [`HistoryOptions`] is a plain configuration record. It decides whether a
//! trace is kept at all, which quantities are persisted, how often the
//! flat-file backend flushes, and where a trace is stored. Backend
//! selection from these options lives in the facade crate's factory.

use crate::error::{HistoryError, Result};
use crate::types::Quantity;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Placeholder in [`HistoryOptions::storage_file`] replaced by the run identity.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Default number of rows between two flat-file flushes.
pub const DEFAULT_FLUSH_INTERVAL: usize = 10;

/// Options controlling how evaluations are recorded.
///
/// The per-quantity `trace_record_*` flags only take effect when
/// `trace_record` is set, and they only control what is *persisted*:
/// quantities derived during value extraction are computed regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HistoryOptions {
    /// Master switch: record a trace of function calls.
    pub trace_record: bool,
    /// Record gradients.
    pub trace_record_grad: bool,
    /// Record Hessians.
    pub trace_record_hess: bool,
    /// Record residuals.
    pub trace_record_res: bool,
    /// Record residual sensitivities.
    pub trace_record_sres: bool,
    /// Record chi-square values.
    pub trace_record_chi2: bool,
    /// Record chi-square sensitivities.
    pub trace_record_schi2: bool,
    /// Number of rows after which the flat-file trace is written out.
    pub flush_interval: usize,
    /// Storage file; `None`, a `*.csv` or a `*.json` path. Occurrences of
    /// `{id}` are replaced by the run identity.
    pub storage_file: Option<String>,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            trace_record: false,
            trace_record_grad: true,
            trace_record_hess: true,
            trace_record_res: true,
            trace_record_sres: true,
            trace_record_chi2: true,
            trace_record_schi2: true,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            storage_file: None,
        }
    }
}

impl HistoryOptions {
    /// Option keys, as accepted by [`HistoryOptions::from_json`].
    pub const KEYS: [&'static str; 9] = [
        "trace_record",
        "trace_record_grad",
        "trace_record_hess",
        "trace_record_res",
        "trace_record_sres",
        "trace_record_chi2",
        "trace_record_schi2",
        "flush_interval",
        "storage_file",
    ];

    /// Creates the default options (no trace, in-memory counters only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables trace recording.
    pub fn with_trace_record(mut self, enabled: bool) -> Self {
        self.trace_record = enabled;
        self
    }

    /// Sets the recording flag of one quantity.
    ///
    /// `X`, `Fval` and `Time` are always recorded; setting them is a no-op.
    pub fn with_record(mut self, quantity: Quantity, enabled: bool) -> Self {
        match quantity {
            Quantity::Grad => self.trace_record_grad = enabled,
            Quantity::Hess => self.trace_record_hess = enabled,
            Quantity::Res => self.trace_record_res = enabled,
            Quantity::Sres => self.trace_record_sres = enabled,
            Quantity::Chi2 => self.trace_record_chi2 = enabled,
            Quantity::Schi2 => self.trace_record_schi2 = enabled,
            Quantity::X | Quantity::Fval | Quantity::Time => {}
        }
        self
    }

    /// Sets the flush interval of the flat-file backend.
    pub fn with_flush_interval(mut self, interval: usize) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the storage file template.
    pub fn with_storage_file<S: Into<String>>(mut self, file: S) -> Self {
        self.storage_file = Some(file.into());
        self
    }

    /// Returns the recording flag of a quantity.
    pub fn records(&self, quantity: Quantity) -> bool {
        match quantity {
            Quantity::X | Quantity::Fval | Quantity::Time => true,
            Quantity::Grad => self.trace_record_grad,
            Quantity::Hess => self.trace_record_hess,
            Quantity::Res => self.trace_record_res,
            Quantity::Sres => self.trace_record_sres,
            Quantity::Chi2 => self.trace_record_chi2,
            Quantity::Schi2 => self.trace_record_schi2,
        }
    }

    /// Storage file with the identity placeholder substituted.
    pub fn storage_file_for(&self, identity: &str) -> Option<String> {
        self.storage_file
            .as_ref()
            .map(|file| file.replace(ID_PLACEHOLDER, identity))
    }

    /// Checks that the options are usable.
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval == 0 {
            return Err(HistoryError::invalid_configuration(
                "flush_interval",
                "must be a positive number of rows",
            ));
        }
        if self.storage_file.as_deref().is_some_and(str::is_empty) {
            return Err(HistoryError::invalid_configuration(
                "storage_file",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Parses options from a JSON object.
    ///
    /// Missing keys take their default value; unknown keys are rejected.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| HistoryError::invalid_configuration("options", e.to_string()))?;
        let object = value.as_object().ok_or_else(|| {
            HistoryError::invalid_configuration("options", "expected a JSON object")
        })?;
        if let Some(key) = object.keys().find(|k| !Self::KEYS.contains(&k.as_str())) {
            return Err(HistoryError::unknown_option(key.as_str()));
        }
        let options: Self = serde_json::from_value(value)
            .map_err(|e| HistoryError::invalid_configuration("options", e.to_string()))?;
        options.validate()?;
        Ok(options)
    }
}
