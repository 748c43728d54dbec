//! Intermediate frames: the normalized tabular output of a parser adapter.
//!
//! A frame is column-declared (name + dtype) and row-major. Before anything else touches it,
//! [`conform`] checks it against the table's contract:
//! - the frame's data type must match the file's;
//! - every contract column must be present, declared with the contract dtype;
//! - every row must carry one value per declared column.
//!
//! Any of those failing is a [`ContractError`] and fails the whole file. Individual values are
//! *not* checked here: a null in a non-null column or a value of the wrong kind is a row-level
//! problem handled later by quarantine. Columns the contract does not name are dropped.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use crate::error::ContractError;
use crate::registry::{DType, TableSpec, normalize_table_name};
use crate::rows::ContractRow;

/// One cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
}

impl Value {
    /// Whether this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The dtype this value satisfies, `None` for null.
    pub fn dtype(&self) -> Option<DType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DType::Bool),
            Value::Int(_) => Some(DType::Int64),
            Value::Float(_) => Some(DType::Float64),
            Value::Str(_) => Some(DType::Utf8),
        }
    }

    /// String contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer contents, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float contents, if this is a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Bool contents, if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Total order used for tie-breaking: `Null < Bool < Int < Float < Str`,
    /// floats compared with [`f64::total_cmp`].
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) => 2,
                Value::Float(_) => 3,
                Value::Str(_) => 4,
            }
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Declared frame column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameColumn {
    /// Column name.
    pub name: String,
    /// Declared dtype.
    pub dtype: DType,
}

/// Parser output for one bronze file, in parse order.
#[derive(Debug, Clone, PartialEq)]
pub struct IntermediateFrame {
    /// Data type the parser produced this frame for.
    pub data_type: String,
    /// Declared columns.
    pub columns: Vec<FrameColumn>,
    /// Row-major values, one `Vec` per row in parse order.
    pub rows: Vec<Vec<Value>>,
}

impl IntermediateFrame {
    /// Empty frame with the given columns.
    pub fn new<'a>(data_type: &str, columns: impl IntoIterator<Item = (&'a str, DType)>) -> Self {
        Self {
            data_type: data_type.to_string(),
            columns: columns
                .into_iter()
                .map(|(name, dtype)| FrameColumn {
                    name: name.to_string(),
                    dtype,
                })
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Empty frame declaring exactly the contract columns of `spec`.
    pub fn for_table(spec: &TableSpec) -> Self {
        Self::new(
            &spec.name,
            spec.columns.iter().map(|(n, c)| (n.as_str(), c.dtype)),
        )
    }

    /// Append a row.
    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    /// Row count.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the frame has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Check `frame` against `spec` and project it onto the contract columns.
///
/// Output rows are in parse order, values aligned with `spec.columns`.
pub fn conform(frame: IntermediateFrame, spec: &TableSpec) -> Result<Vec<ContractRow>, ContractError> {
    if normalize_table_name(&frame.data_type) != spec.name {
        return Err(ContractError::DataTypeMismatch {
            expected: spec.name.clone(),
            found: frame.data_type,
        });
    }

    let mut seen = HashSet::new();
    for c in &frame.columns {
        if !seen.insert(c.name.as_str()) {
            return Err(ContractError::DuplicateColumn(c.name.clone()));
        }
    }

    let mut projection = Vec::with_capacity(spec.columns.len());
    for (name, col) in &spec.columns {
        let idx = frame
            .columns
            .iter()
            .position(|c| &c.name == name)
            .ok_or_else(|| ContractError::MissingColumn {
                data_type: spec.name.clone(),
                column: name.clone(),
            })?;
        let declared = frame.columns[idx].dtype;
        if declared != col.dtype {
            return Err(ContractError::WrongDtype {
                column: name.clone(),
                expected: col.dtype,
                found: declared,
            });
        }
        projection.push(idx);
    }

    let extra = frame.columns.len().saturating_sub(projection.len());
    if extra > 0 {
        tracing::debug!(table = %spec.name, extra, "dropping columns outside the contract");
    }

    let width = frame.columns.len();
    let mut out = Vec::with_capacity(frame.rows.len());
    for (parse_index, mut row) in frame.rows.into_iter().enumerate() {
        if row.len() != width {
            return Err(ContractError::RaggedRow {
                row: parse_index,
                expected: width,
                found: row.len(),
            });
        }
        let values = projection
            .iter()
            .map(|&i| std::mem::replace(&mut row[i], Value::Null))
            .collect();
        out.push(ContractRow { parse_index, values });
    }
    Ok(out)
}
