//! History persisted as a CSV table.
//!
//! Rows are buffered in memory and the whole file is rewritten every
//! `flush_interval` rows and on [`History::finalize`]. See [`table`] for
//! the column layout.

pub mod table;

use crate::flat_file::table::Table;
use evaltrace_core::error::{HistoryError, Result};
use evaltrace_core::extract::extract_values;
use evaltrace_core::history::{check_index, History};
use evaltrace_core::options::HistoryOptions;
use evaltrace_core::types::{
    EvaluationCounts, EvaluationResult, Mode, Quantity, SensiOrders, TraceValue, Vector,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// History stored in a CSV file.
#[derive(Debug, Clone)]
pub struct CsvHistory {
    file: PathBuf,
    x_names: Option<Vec<String>>,
    options: HistoryOptions,
    counts: EvaluationCounts,
    start: Instant,
    table: Option<Table>,
}

impl CsvHistory {
    /// Creates a history writing to `file`.
    ///
    /// The parent directory is created if needed. Without `x_names` the
    /// parameters are named `x0, x1, ...` once the first row arrives.
    pub fn new<P: AsRef<Path>>(
        file: P,
        x_names: Option<Vec<String>>,
        options: HistoryOptions,
    ) -> Result<Self> {
        options.validate()?;
        let file = file.as_ref().to_path_buf();
        if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| HistoryError::io(parent, e))?;
        }
        Ok(Self {
            file,
            x_names,
            options,
            counts: EvaluationCounts::new(),
            start: Instant::now(),
            table: None,
        })
    }

    /// Reopens a trace written by a previous run.
    ///
    /// The counters resume from their maxima in the file. The recovered
    /// options have `trace_record` set, and the gradient and chi-square
    /// sensitivity flags tell whether those columns are spread over the
    /// parameters.
    pub fn load<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref().to_path_buf();
        let table = Table::read(&file)?;
        if table.is_empty() {
            warn!(path = %file.display(), "reloaded CSV trace holds no rows");
        }

        let options = HistoryOptions {
            trace_record: true,
            trace_record_grad: table.grad_spread(),
            trace_record_schi2: table.schi2_spread(),
            storage_file: Some(file.to_string_lossy().into_owned()),
            ..HistoryOptions::default()
        };
        info!(path = %file.display(), rows = table.len(), "reloaded CSV history");

        Ok(Self {
            counts: table.max_counts(),
            x_names: Some(table.x_names().to_vec()),
            file,
            options,
            start: Instant::now(),
            table: Some(table),
        })
    }

    /// Parameter names, once known.
    pub fn x_names(&self) -> Option<&[String]> {
        self.table
            .as_ref()
            .map(Table::x_names)
            .or(self.x_names.as_deref())
    }

    fn flush(&self) -> Result<()> {
        let Some(table) = self.table.as_ref().filter(|t| !t.is_empty()) else {
            return Ok(());
        };
        table.write(&self.file)?;
        debug!(path = %self.file.display(), rows = table.len(), "CSV history flushed");
        Ok(())
    }

    fn rows(&self) -> usize {
        self.table.as_ref().map_or(0, Table::len)
    }
}

impl History for CsvHistory {
    fn backend_name(&self) -> &'static str {
        "csv"
    }

    fn update(
        &mut self,
        x: &Vector,
        sensi_orders: SensiOrders,
        mode: Mode,
        result: &EvaluationResult,
    ) -> Result<()> {
        let mut counts = self.counts;
        counts.record(sensi_orders, mode);
        if !self.options.trace_record {
            self.counts = counts;
            return Ok(());
        }

        let values = extract_values(mode, result, &self.options);
        let time = self.start.elapsed().as_secs_f64();
        let x_names = &self.x_names;
        let options = &self.options;
        let table = self.table.get_or_insert_with(|| {
            let names = x_names
                .clone()
                .unwrap_or_else(|| (0..x.len()).map(|i| format!("x{i}")).collect());
            Table::new(names, options.trace_record_grad, options.trace_record_schi2)
        });
        // A rejected row leaves the counters untouched
        table.push(x, &values, counts, time)?;
        self.counts = counts;
        let rows = table.len();
        trace!(%mode, rows, "row appended to CSV history");

        if rows % self.options.flush_interval == 0 {
            self.flush()?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.flush()
    }

    fn len(&self) -> Result<usize> {
        Ok(self.rows())
    }

    fn counts(&self) -> Result<EvaluationCounts> {
        Ok(self.counts)
    }

    fn options(&self) -> &HistoryOptions {
        &self.options
    }

    fn start_time(&self) -> Instant {
        self.start
    }

    fn storage_path(&self) -> Option<&Path> {
        Some(&self.file)
    }

    fn get_value(&self, quantity: Quantity, ix: usize) -> Result<Option<TraceValue>> {
        check_index(ix, self.rows())?;
        Ok(self
            .table
            .as_ref()
            .and_then(|table| table.rows().get(ix))
            .and_then(|row| row.value(quantity)))
    }
}
