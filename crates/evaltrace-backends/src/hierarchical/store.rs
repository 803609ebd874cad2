//! On-disk layout of the hierarchical store.
//!
//! The store file named by the caller is an index of the groups it holds.
//! Group data lives in a directory next to it, named after the file with a
//! `.d` suffix, one directory per group following its key
//! `/optimization/results/{id}/trace`:
//!
//! ```text
//! store.json
//! store.json.d/optimization/results/{id}/trace/attributes.json
//! store.json.d/optimization/results/{id}/trace/0.json
//! store.json.d/optimization/results/{id}/trace/1.json
//! ```
//!
//! The attributes document carries the iteration count, the evaluation
//! counters and the flush interval. Each iteration is its own document,
//! mapping entry names to row-major datasets, and is written exactly once:
//! an update touches the attributes of its group and the new iteration,
//! a query reads the attributes and the iteration it addresses.
//!
//! Groups are only ever accessed through [`with_group`] and
//! [`with_group_mut`]: the group is opened for the duration of a closure
//! and, for mutations, pending changes are written once the closure
//! succeeds. No handle is kept open between calls.

use evaltrace_core::error::{HistoryError, Result};
use evaltrace_core::types::{
    EvaluationCounts, ExtractedValues, Matrix, Quantity, TraceValue, Vector,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Root under which run groups are created.
pub const RESULTS_ROOT: &str = "/optimization/results";

const ATTRIBUTES_FILE: &str = "attributes.json";

/// Key of the trace group belonging to `identity`.
pub fn group_key(identity: &str) -> String {
    format!("{RESULTS_ROOT}/{identity}/trace")
}

/// Directory holding the group data of the store indexed by `file`.
pub fn data_dir(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".d");
    PathBuf::from(name)
}

fn group_dir(file: &Path, key: &str) -> Result<PathBuf> {
    let mut dir = data_dir(file);
    for part in key.split('/').filter(|p| !p.is_empty()) {
        if matches!(part, "." | "..") || part.contains('\\') {
            return Err(HistoryError::invalid_configuration(
                "identity",
                format!("'{key}' cannot be used as a group key"),
            ));
        }
        dir.push(part);
    }
    Ok(dir)
}

fn iteration_path(dir: &Path, ix: usize) -> PathBuf {
    dir.join(format!("{ix}.json"))
}

/// Entries of one iteration, by entry name.
pub type Iteration = BTreeMap<String, Dataset>;

/// Index document stored in the store file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreIndex {
    /// Keys of the groups present in the store
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

/// Attributes attached to a trace group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceAttributes {
    /// Number of recorded iterations
    pub iteration_count: usize,
    /// Function value evaluations
    pub n_value: usize,
    /// Gradient evaluations
    pub n_grad: usize,
    /// Hessian evaluations
    pub n_hess: usize,
    /// Residual evaluations
    pub n_res: usize,
    /// Residual sensitivity evaluations
    pub n_sres: usize,
    /// Flush interval the trace was created with
    pub flush_interval: usize,
}

impl TraceAttributes {
    /// Attributes of an empty group with zeroed counters.
    pub fn new(flush_interval: usize) -> Self {
        Self {
            flush_interval,
            ..Self::default()
        }
    }

    /// Evaluation counters held by the attributes.
    pub fn counts(&self) -> EvaluationCounts {
        EvaluationCounts {
            n_fval: self.n_value,
            n_grad: self.n_grad,
            n_hess: self.n_hess,
            n_res: self.n_res,
            n_sres: self.n_sres,
        }
    }

    /// Overwrites the evaluation counters.
    pub fn set_counts(&mut self, counts: EvaluationCounts) {
        self.n_value = counts.n_fval;
        self.n_grad = counts.n_grad;
        self.n_hess = counts.n_hess;
        self.n_res = counts.n_res;
        self.n_sres = counts.n_sres;
    }
}

/// Read access to one group, handed out by [`with_group`].
///
/// Iterations are loaded on demand, one document per call.
#[derive(Debug)]
pub struct GroupReader {
    dir: PathBuf,
    attributes: TraceAttributes,
}

impl GroupReader {
    /// Attributes of the group.
    pub fn attributes(&self) -> &TraceAttributes {
        &self.attributes
    }

    /// Entries of iteration `ix`; `None` beyond the iteration count or
    /// when nothing was stored for it.
    pub fn iteration(&self, ix: usize) -> Result<Option<Iteration>> {
        if ix >= self.attributes.iteration_count {
            return Ok(None);
        }
        read_json(&iteration_path(&self.dir, ix))
    }

    /// Value of `quantity` at `ix`; `None` when the iteration or the entry
    /// is absent.
    pub fn value(&self, quantity: Quantity, ix: usize) -> Result<Option<TraceValue>> {
        self.iteration(ix)?
            .as_ref()
            .and_then(|it| it.get(quantity.key()))
            .map(Dataset::to_value)
            .transpose()
    }

    /// Values of `quantity` over all iterations.
    pub fn trace(&self, quantity: Quantity) -> Result<Vec<Option<TraceValue>>> {
        (0..self.attributes.iteration_count)
            .map(|ix| self.value(quantity, ix))
            .collect()
    }

    /// The quantities among `candidates` for which some iteration holds a
    /// value that is not entirely `NaN`.
    pub fn informative(&self, candidates: &[Quantity]) -> Result<BTreeSet<Quantity>> {
        let mut found = BTreeSet::new();
        for ix in 0..self.attributes.iteration_count {
            if found.len() == candidates.len() {
                break;
            }
            let Some(iteration) = self.iteration(ix)? else {
                continue;
            };
            for &quantity in candidates {
                if iteration
                    .get(quantity.key())
                    .is_some_and(|dataset| !dataset.is_all_nan())
                {
                    found.insert(quantity);
                }
            }
        }
        Ok(found)
    }
}

/// Pending changes to one group, handed out by [`with_group_mut`].
#[derive(Debug)]
pub struct GroupWriter {
    attributes: TraceAttributes,
    appended: Vec<(usize, Iteration)>,
}

impl GroupWriter {
    /// Attributes of the group, including pending changes.
    pub fn attributes(&self) -> &TraceAttributes {
        &self.attributes
    }

    /// Overwrites the evaluation counters.
    pub fn set_counts(&mut self, counts: EvaluationCounts) {
        self.attributes.set_counts(counts);
    }

    /// Stores `iteration` under the next index.
    pub fn append(&mut self, iteration: Iteration) {
        let ix = self.attributes.iteration_count;
        self.appended.push((ix, iteration));
        self.attributes.iteration_count += 1;
    }
}

/// Builds the entries of one iteration from an extracted record.
pub fn iteration_from(x: &Vector, values: &ExtractedValues, time: f64) -> Iteration {
    let mut iteration: Iteration = Quantity::EXTRACTED
        .into_iter()
        .filter_map(|q| values.get(q).map(|v| (q.key().to_owned(), Dataset::from_value(&v))))
        .collect();
    iteration.insert(Quantity::X.key().to_owned(), Dataset::from_vector(x));
    iteration.insert(
        Quantity::Time.key().to_owned(),
        Dataset::from_value(&TraceValue::Scalar(time)),
    );
    iteration
}

/// A dense array with its shape; `data` is row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Array shape; empty for a scalar
    pub shape: Vec<usize>,
    /// Elements in row-major order
    #[serde(with = "stored_floats")]
    pub data: Vec<f64>,
}

impl Dataset {
    fn from_vector(vector: &Vector) -> Self {
        Self {
            shape: vec![vector.len()],
            data: vector.as_slice().to_vec(),
        }
    }

    /// Encodes a trace value.
    pub fn from_value(value: &TraceValue) -> Self {
        match value {
            TraceValue::Scalar(v) => Self {
                shape: Vec::new(),
                data: vec![*v],
            },
            TraceValue::Vector(v) => Self::from_vector(v),
            TraceValue::Matrix(m) => Self {
                shape: vec![m.nrows(), m.ncols()],
                data: m.transpose().as_slice().to_vec(),
            },
        }
    }

    /// Decodes the dataset; the rank is given by the shape.
    pub fn to_value(&self) -> Result<TraceValue> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(HistoryError::format(format!(
                "dataset of shape {:?} holds {} values",
                self.shape,
                self.data.len()
            )));
        }
        match self.shape.as_slice() {
            [] => Ok(TraceValue::Scalar(self.data[0])),
            [_] => Ok(TraceValue::Vector(Vector::from_vec(self.data.clone()))),
            [rows, cols] => Ok(TraceValue::Matrix(Matrix::from_row_slice(
                *rows, *cols, &self.data,
            ))),
            shape => Err(HistoryError::format(format!(
                "unsupported dataset rank {}",
                shape.len()
            ))),
        }
    }

    /// Whether every element is `NaN` (true for an empty dataset).
    pub fn is_all_nan(&self) -> bool {
        self.data.iter().all(|v| v.is_nan())
    }
}

/// JSON has no literal for `NaN` or the infinities, so those are stored
/// as the strings `"NaN"`, `"inf"` and `"-inf"`.
mod stored_floats {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum StoredFloat {
        Finite(f64),
        Special(String),
    }

    impl From<f64> for StoredFloat {
        fn from(value: f64) -> Self {
            if value.is_finite() {
                Self::Finite(value)
            } else {
                Self::Special(value.to_string())
            }
        }
    }

    pub fn serialize<S: Serializer>(data: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(data.iter().map(|v| StoredFloat::from(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<StoredFloat>::deserialize(deserializer)?
            .into_iter()
            .map(|v| match v {
                StoredFloat::Finite(v) => Ok(v),
                StoredFloat::Special(s) => s
                    .parse::<f64>()
                    .map_err(|_| D::Error::custom(format!("invalid float literal '{s}'"))),
            })
            .collect()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(HistoryError::io(path, e)),
    };
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| HistoryError::storage(path, e))
}

/// Writes through a temporary file renamed over `path`, so a document is
/// either fully written or not at all.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| HistoryError::io(parent, e))?;
    }
    let text = serde_json::to_string(value).map_err(|e| HistoryError::storage(path, e))?;
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    fs::write(&staging, text).map_err(|e| HistoryError::io(&staging, e))?;
    fs::rename(&staging, path).map_err(|e| HistoryError::io(path, e))
}

fn read_attributes(file: &Path, key: &str, dir: &Path) -> Result<TraceAttributes> {
    read_json(&dir.join(ATTRIBUTES_FILE))?.ok_or_else(|| HistoryError::missing_group(key, file))
}

/// Keys of the groups listed in the store index at `file`.
///
/// A store that does not exist yet has no groups.
pub fn groups(file: &Path) -> Result<BTreeSet<String>> {
    Ok(read_json::<StoreIndex>(file)?.unwrap_or_default().groups)
}

/// Creates the group `key` with zeroed counters unless it already exists.
///
/// Returns whether the group was created.
pub fn create_group(file: &Path, key: &str, flush_interval: usize) -> Result<bool> {
    let dir = group_dir(file, key)?;
    let mut index = read_json::<StoreIndex>(file)?.unwrap_or_default();
    let exists = dir.join(ATTRIBUTES_FILE).exists();
    if exists && index.groups.contains(key) {
        return Ok(false);
    }
    if !exists {
        write_json(&dir.join(ATTRIBUTES_FILE), &TraceAttributes::new(flush_interval))?;
    }
    index.groups.insert(key.to_owned());
    write_json(file, &index)?;
    Ok(!exists)
}

/// Opens the group `key` of the store at `file` read-only for the
/// duration of `f`.
///
/// Fails with [`HistoryError::MissingGroup`] if the group does not exist.
pub fn with_group<T, F>(file: &Path, key: &str, f: F) -> Result<T>
where
    F: FnOnce(&GroupReader) -> Result<T>,
{
    let dir = group_dir(file, key)?;
    let attributes = read_attributes(file, key, &dir)?;
    f(&GroupReader { dir, attributes })
}

/// Opens the group `key` of the store at `file` for the duration of `f`
/// and writes the appended iterations, then the attributes, if `f`
/// succeeds. On error nothing is written.
pub fn with_group_mut<T, F>(file: &Path, key: &str, f: F) -> Result<T>
where
    F: FnOnce(&mut GroupWriter) -> Result<T>,
{
    let dir = group_dir(file, key)?;
    let attributes = read_attributes(file, key, &dir)?;
    let mut writer = GroupWriter {
        attributes,
        appended: Vec::new(),
    };
    let out = f(&mut writer)?;

    for (ix, iteration) in &writer.appended {
        write_json(&iteration_path(&dir, *ix), iteration)?;
    }
    if writer.attributes != attributes {
        write_json(&dir.join(ATTRIBUTES_FILE), &writer.attributes)?;
    }
    debug!(
        group = %key,
        appended = writer.appended.len(),
        "hierarchical group written"
    );
    Ok(out)
}
