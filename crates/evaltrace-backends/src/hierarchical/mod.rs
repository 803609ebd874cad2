//! History persisted in a hierarchical store.
//!
//! Every run writes into its own group of a shared store (see [`store`]
//! for the layout). Counters, length and the trace itself are always read
//! back from disk, so several histories, or a reloaded one, observe the
//! same state. Each operation opens the group, applies its change and
//! closes it again; an update writes only the group attributes and the
//! new iteration.

pub mod store;

use crate::hierarchical::store::{
    create_group, group_key, iteration_from, with_group, with_group_mut, GroupReader, GroupWriter,
};
use evaltrace_core::error::Result;
use evaltrace_core::extract::extract_values;
use evaltrace_core::history::{check_index, History, Trace};
use evaltrace_core::options::HistoryOptions;
use evaltrace_core::types::{
    EvaluationCounts, EvaluationResult, Mode, Quantity, SensiOrders, TraceValue, Vector,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, trace};

/// History stored as one group of a hierarchical store.
#[derive(Debug, Clone)]
pub struct HierarchicalHistory {
    identity: String,
    file: PathBuf,
    group: String,
    options: HistoryOptions,
    start: Instant,
}

impl HierarchicalHistory {
    /// Opens the store at `file` and creates the group of `identity` if it
    /// does not exist yet.
    ///
    /// An existing group is left as it is, so constructing twice for the
    /// same identity appends to the same trace.
    pub fn new<P: AsRef<Path>>(identity: &str, file: P, options: HistoryOptions) -> Result<Self> {
        options.validate()?;
        let file = file.as_ref().to_path_buf();
        let group = group_key(identity);

        if create_group(&file, &group, options.flush_interval)? {
            debug!(group = %group, path = %file.display(), "created trace group");
        }

        Ok(Self {
            identity: identity.to_owned(),
            file,
            group,
            options,
            start: Instant::now(),
        })
    }

    /// Reopens the trace of `identity` stored in `file`.
    ///
    /// The recording options are inferred from the stored data: a quantity
    /// counts as recorded if some iteration holds a value of it that is not
    /// entirely `NaN`, and the trace counts as recorded if `x` does.
    pub fn load<P: AsRef<Path>>(identity: &str, file: P) -> Result<Self> {
        let file = file.as_ref().to_path_buf();
        let group = group_key(identity);

        let options = with_group(&file, &group, |trace| {
            let flagged = [
                Quantity::Grad,
                Quantity::Hess,
                Quantity::Res,
                Quantity::Sres,
                Quantity::Chi2,
                Quantity::Schi2,
            ];
            let mut candidates = flagged.to_vec();
            candidates.push(Quantity::X);
            let informative = trace.informative(&candidates)?;

            let mut options = HistoryOptions {
                trace_record: informative.contains(&Quantity::X),
                flush_interval: trace.attributes().flush_interval,
                storage_file: Some(file.to_string_lossy().into_owned()),
                ..HistoryOptions::default()
            };
            for quantity in flagged {
                options = options.with_record(quantity, informative.contains(&quantity));
            }
            info!(
                group = %group,
                iterations = trace.attributes().iteration_count,
                "reloaded hierarchical history"
            );
            Ok(options)
        })?;

        Ok(Self {
            identity: identity.to_owned(),
            file,
            group,
            options,
            start: Instant::now(),
        })
    }

    /// Run identity of this history.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Key of the group holding the trace.
    pub fn group_key(&self) -> &str {
        &self.group
    }

    /// Flush interval recorded in the group.
    pub fn flush_interval(&self) -> Result<usize> {
        self.read(|group| Ok(group.attributes().flush_interval))
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&GroupReader) -> Result<T>,
    {
        with_group(&self.file, &self.group, f)
    }

    pub(crate) fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut GroupWriter) -> Result<T>,
    {
        with_group_mut(&self.file, &self.group, f)
    }
}

impl History for HierarchicalHistory {
    fn backend_name(&self) -> &'static str {
        "hierarchical"
    }

    fn update(
        &mut self,
        x: &Vector,
        sensi_orders: SensiOrders,
        mode: Mode,
        result: &EvaluationResult,
    ) -> Result<()> {
        let record = self.options.trace_record.then(|| {
            let values = extract_values(mode, result, &self.options);
            iteration_from(x, &values, self.start.elapsed().as_secs_f64())
        });

        self.write(|group| {
            let mut counts = group.attributes().counts();
            counts.record(sensi_orders, mode);
            group.set_counts(counts);
            if let Some(iteration) = record {
                group.append(iteration);
            }
            trace!(
                group = %self.group,
                iterations = group.attributes().iteration_count,
                "hierarchical history updated"
            );
            Ok(())
        })
    }

    fn finalize(&mut self) -> Result<()> {
        // Every update is already on disk.
        debug!(group = %self.group, "hierarchical history finalized");
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        self.read(|group| Ok(group.attributes().iteration_count))
    }

    fn counts(&self) -> Result<EvaluationCounts> {
        self.read(|group| Ok(group.attributes().counts()))
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
        self.read(|group| {
            check_index(ix, group.attributes().iteration_count)?;
            group.value(quantity, ix)
        })
    }

    fn get_trace(&self, quantity: Quantity) -> Result<Trace<TraceValue>> {
        self.read(|group| group.trace(quantity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evaltrace_core::error::HistoryError;
    use evaltrace_core::types::Matrix;
    use tempfile::TempDir;

    fn store() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("store.json");
        (dir, path)
    }

    fn traced() -> HistoryOptions {
        HistoryOptions::new().with_trace_record(true)
    }

    #[test]
    fn test_new_creates_group_with_zero_counters() {
        let (_dir, path) = store();
        let history =
            HierarchicalHistory::new("run0", &path, traced().with_flush_interval(4)).unwrap();

        assert_eq!(history.len().unwrap(), 0);
        assert_eq!(history.counts().unwrap(), EvaluationCounts::new());
        assert_eq!(history.flush_interval().unwrap(), 4);
        assert_eq!(history.group_key(), "/optimization/results/run0/trace");
        assert_eq!(history.storage_path(), Some(path.as_path()));
    }

    #[test]
    fn test_update_counts_without_trace() {
        let (_dir, path) = store();
        let mut history = HierarchicalHistory::new("run0", &path, HistoryOptions::new()).unwrap();
        history
            .update(
                &Vector::from_vec(vec![1.0]),
                SensiOrders::new(&[0, 1]),
                Mode::Function,
                &EvaluationResult::new().with_fval(1.0),
            )
            .unwrap();
        assert_eq!(history.len().unwrap(), 0);
        assert_eq!(history.n_fval().unwrap(), 1);
        assert_eq!(history.n_grad().unwrap(), 1);
    }

    #[test]
    fn test_residual_update_stores_derived_quantities() {
        let (_dir, path) = store();
        let mut history = HierarchicalHistory::new("run0", &path, traced()).unwrap();
        let res = Vector::from_vec(vec![3.0, 4.0]);
        let sres = Matrix::identity(2, 2);
        history
            .update(
                &Vector::from_vec(vec![0.0, 0.0]),
                SensiOrders::new(&[0, 1]),
                Mode::Residual,
                &EvaluationResult::new().with_res(res.clone()).with_sres(sres.clone()),
            )
            .unwrap();

        assert_eq!(history.get_res(0).unwrap(), Some(res));
        assert_eq!(history.get_sres(0).unwrap(), Some(sres));
        assert_eq!(history.get_chi2(0).unwrap(), Some(25.0));
        assert_eq!(
            history.get_schi2(0).unwrap(),
            Some(Vector::from_vec(vec![6.0, 8.0]))
        );
        assert_eq!(history.get_fval(0).unwrap(), None);
        assert_eq!(history.n_res().unwrap(), 1);
        assert_eq!(history.n_sres().unwrap(), 1);
    }

    #[test]
    fn test_groups_are_isolated() {
        let (_dir, path) = store();
        let mut a = HierarchicalHistory::new("a", &path, traced()).unwrap();
        let b = HierarchicalHistory::new("b", &path, traced()).unwrap();
        a.update(
            &Vector::from_vec(vec![1.0]),
            SensiOrders::new(&[0]),
            Mode::Function,
            &EvaluationResult::new().with_fval(2.0),
        )
        .unwrap();
        assert_eq!(a.len().unwrap(), 1);
        assert_eq!(b.len().unwrap(), 0);
    }

    #[test]
    fn test_update_writes_only_the_new_iteration() {
        let (_dir, path) = store();
        let mut history = HierarchicalHistory::new("run0", &path, traced()).unwrap();
        let mut step = |fval: f64| {
            history
                .update(
                    &Vector::from_vec(vec![fval; 20]),
                    SensiOrders::new(&[0]),
                    Mode::Function,
                    &EvaluationResult::new().with_fval(fval),
                )
                .unwrap()
        };
        step(1.0);
        step(2.0);

        let iterations = store::data_dir(&path).join("optimization/results/run0/trace");
        let first = std::fs::read_to_string(iterations.join("0.json")).unwrap();
        std::fs::write(iterations.join("1.json"), &first).unwrap();
        let index = std::fs::read_to_string(&path).unwrap();

        step(3.0);
        step(4.0);
        // Earlier iterations and the index are left as they were
        assert_eq!(std::fs::read_to_string(iterations.join("0.json")).unwrap(), first);
        assert_eq!(std::fs::read_to_string(iterations.join("1.json")).unwrap(), first);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), index);

        assert_eq!(
            history.get_fval_trace().unwrap(),
            vec![Some(1.0), Some(1.0), Some(3.0), Some(4.0)]
        );
        assert_eq!(history.n_fval().unwrap(), 4);
    }

    #[test]
    fn test_load_missing_group() {
        let (_dir, path) = store();
        HierarchicalHistory::new("a", &path, traced()).unwrap();
        let err = HierarchicalHistory::load("b", &path).unwrap_err();
        assert!(matches!(err, HistoryError::MissingGroup { ref group, .. } if group.contains("/b/")));
    }

    #[test]
    fn test_out_of_range() {
        let (_dir, path) = store();
        let history = HierarchicalHistory::new("a", &path, traced()).unwrap();
        assert!(matches!(
            history.get_x(0),
            Err(HistoryError::IndexOutOfRange { index: 0, len: 0 })
        ));
    }
}
