//! Backend selection from [`HistoryOptions`].
//!
//! | `storage_file`    | `trace_record` | backend                 |
//! |-------------------|----------------|-------------------------|
//! | none              | false          | [`CountHistory`]        |
//! | none              | true           | [`MemoryHistory`]       |
//! | `*.csv`           | any            | [`CsvHistory`]          |
//! | `*.json`          | any            | [`HierarchicalHistory`] |
//!
//! Any other suffix is rejected with [`HistoryError::UnsupportedFormat`].

use crate::any_history::AnyHistory;
use evaltrace_backends::{CountHistory, CsvHistory, HierarchicalHistory, MemoryHistory};
use evaltrace_core::error::{HistoryError, Result};
use evaltrace_core::options::HistoryOptions;
use std::path::Path;
use tracing::debug;

/// Persistent storage formats, by file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    /// Flat CSV table (`.csv`)
    Csv,
    /// Hierarchical store (`.json`)
    Hierarchical,
}

impl StorageFormat {
    /// Detects the format of `path` from its suffix.
    pub fn from_path(path: &str) -> Result<Self> {
        match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("csv") => Ok(Self::Csv),
            Some("json") => Ok(Self::Hierarchical),
            _ => Err(HistoryError::unsupported_format(path)),
        }
    }
}

/// Creates the history described by `options` for the run `identity`.
///
/// `{id}` in the storage file is replaced by `identity`. `x_names` name
/// the parameter columns of a CSV trace and are ignored by the other
/// backends.
pub fn create_history(
    options: HistoryOptions,
    identity: &str,
    x_names: Option<Vec<String>>,
) -> Result<AnyHistory> {
    options.validate()?;

    let Some(file) = options.storage_file_for(identity) else {
        return Ok(if options.trace_record {
            MemoryHistory::new(options).into()
        } else {
            CountHistory::new(options).into()
        });
    };

    let format = StorageFormat::from_path(&file)?;
    debug!(identity, file = %file, ?format, "creating persistent history");
    Ok(match format {
        StorageFormat::Csv => CsvHistory::new(&file, x_names, options)?.into(),
        StorageFormat::Hierarchical => HierarchicalHistory::new(identity, &file, options)?.into(),
    })
}

/// Reopens a persisted history.
///
/// The backend is chosen from the suffix of `path`; `identity` selects the
/// group of a hierarchical store and is not used for CSV files.
pub fn load_history<P: AsRef<Path>>(identity: &str, path: P) -> Result<AnyHistory> {
    let path = path.as_ref();
    match StorageFormat::from_path(&path.to_string_lossy())? {
        StorageFormat::Csv => CsvHistory::load(path).map(Into::into),
        StorageFormat::Hierarchical => HierarchicalHistory::load(identity, path).map(Into::into),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evaltrace_core::history::History;

    #[test]
    fn test_format_detection() {
        assert_eq!(StorageFormat::from_path("a/b.csv").unwrap(), StorageFormat::Csv);
        assert_eq!(
            StorageFormat::from_path("b.json").unwrap(),
            StorageFormat::Hierarchical
        );
        assert!(StorageFormat::from_path("b.txt").is_err());
        assert!(StorageFormat::from_path("csv").is_err());
    }

    #[test]
    fn test_in_memory_selection() {
        let history = create_history(HistoryOptions::new(), "0", None).unwrap();
        assert!(matches!(history, AnyHistory::CounterOnly(_)));

        let history =
            create_history(HistoryOptions::new().with_trace_record(true), "0", None).unwrap();
        assert!(matches!(history, AnyHistory::Memory(_)));
        assert_eq!(history.len().unwrap(), 0);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let err = create_history(HistoryOptions::new().with_flush_interval(0), "0", None)
            .unwrap_err();
        assert!(err.is_configuration_error());
    }
}
