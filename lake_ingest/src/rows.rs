//! Row shapes at each ingestion stage.
//!
//! ```text
//! IntermediateFrame --conform--> ContractRow --lineage--> SequencedRow
//!     --validate--> ValidatedRow --pit--> CanonicalEventRow
//!                \______________________\__> Rejected (quarantine)
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Serialize;

use crate::frame::Value;
use crate::registry::TableSpec;

/// A row projected onto the contract columns, still in parse order.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractRow {
    /// Position in the parser output.
    pub parse_index: usize,
    /// Values aligned with `TableSpec::columns`.
    pub values: Vec<Value>,
}

/// A contract row with its lineage assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedRow {
    /// Originating file.
    pub file_id: i64,
    /// Dense, 0-based position in the file's replay order.
    pub file_seq: i64,
    /// Position in the parser output.
    pub parse_index: usize,
    /// Values aligned with `TableSpec::columns`.
    pub values: Vec<Value>,
}

impl SequencedRow {
    /// JSON object of every contract column, used as the quarantine payload.
    pub fn payload_json(&self, spec: &TableSpec) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = spec
            .columns
            .keys()
            .zip(&self.values)
            .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(serde_json::Value::Null)))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// A sequenced row whose core fields and values passed the row checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRow {
    /// The underlying row.
    pub row: SequencedRow,
    /// Core field, copied out of `row.values`.
    pub exchange: String,
    /// Core field, copied out of `row.values`.
    pub symbol: String,
    /// Core field, copied out of `row.values`.
    pub ts_event_us: i64,
    /// Derived exchange-local date.
    pub trading_date: NaiveDate,
}

/// Why a row was diverted to quarantine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    /// No symbol window covers `(exchange, symbol, ts_event_us)`.
    MissingPitSymbolCoverage,
    /// More than one symbol window covers it.
    OverlappingSymbolWindows,
    /// A value is null in a non-null column or of the wrong kind.
    SchemaViolation,
    /// `ts_event_us` cannot be mapped to a calendar date.
    InvalidTimestamp,
}

impl QuarantineReason {
    /// Stable code stored in `quarantine_rows.reason`.
    pub fn as_str(self) -> &'static str {
        match self {
            QuarantineReason::MissingPitSymbolCoverage => "missing_pit_symbol_coverage",
            QuarantineReason::OverlappingSymbolWindows => "overlapping_symbol_windows",
            QuarantineReason::SchemaViolation => "schema_violation",
            QuarantineReason::InvalidTimestamp => "invalid_timestamp",
        }
    }
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuarantineReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missing_pit_symbol_coverage" => Ok(Self::MissingPitSymbolCoverage),
            "overlapping_symbol_windows" => Ok(Self::OverlappingSymbolWindows),
            "schema_violation" => Ok(Self::SchemaViolation),
            "invalid_timestamp" => Ok(Self::InvalidTimestamp),
            other => anyhow::bail!("unknown quarantine reason: {other}"),
        }
    }
}

/// A row on its way to quarantine.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    /// The row as sequenced.
    pub row: SequencedRow,
    /// Reason code.
    pub reason: QuarantineReason,
    /// Detail for remediation, e.g. the offending column.
    pub detail: Option<String>,
}

/// Quarantine-ready representation of one rejected row. The store attaches
/// table name, reason and `file_id` at append time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuarantineRow {
    /// Lineage position.
    pub file_seq: i64,
    /// Exchange, if the row carried a usable one.
    pub exchange: Option<String>,
    /// Symbol, if the row carried a usable one.
    pub symbol: Option<String>,
    /// Event time, if the row carried a usable one.
    pub ts_event_us: Option<i64>,
    /// Free-form detail.
    pub detail: Option<String>,
    /// Every contract column of the original row.
    pub payload: serde_json::Value,
}

impl Rejected {
    /// Convert for the quarantine store.
    pub fn to_quarantine_row(&self, spec: &TableSpec) -> QuarantineRow {
        let get = |col: &str| spec.column_index(col).and_then(|i| self.row.values.get(i));
        QuarantineRow {
            file_seq: self.row.file_seq,
            exchange: get(crate::registry::COL_EXCHANGE)
                .and_then(Value::as_str)
                .map(str::to_string),
            symbol: get(crate::registry::COL_SYMBOL)
                .and_then(Value::as_str)
                .map(str::to_string),
            ts_event_us: get(crate::registry::COL_TS_EVENT_US).and_then(Value::as_i64),
            detail: self.detail.clone(),
            payload: self.row.payload_json(spec),
        }
    }
}

/// A fully resolved event, ready for the event store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalEventRow {
    /// Partition key.
    pub exchange: String,
    /// Exchange-native symbol as received.
    pub symbol: String,
    /// Event time, UTC microseconds.
    pub ts_event_us: i64,
    /// Partition key, exchange-local date of `ts_event_us`.
    pub trading_date: NaiveDate,
    /// Resolved instrument surrogate.
    pub symbol_id: i64,
    /// Originating file.
    pub file_id: i64,
    /// Replay position within the file.
    pub file_seq: i64,
    /// Table-specific columns, in contract order.
    pub payload: IndexMap<String, Value>,
}

impl CanonicalEventRow {
    /// Assemble from a validated row and its resolved `symbol_id`.
    pub fn from_validated(v: ValidatedRow, symbol_id: i64, spec: &TableSpec) -> Self {
        let payload = spec
            .columns
            .keys()
            .zip(v.row.values)
            .filter(|(name, _)| !crate::registry::is_core_column(name))
            .map(|(name, value)| (name.clone(), value))
            .collect();
        Self {
            exchange: v.exchange,
            symbol: v.symbol,
            ts_event_us: v.ts_event_us,
            trading_date: v.trading_date,
            symbol_id,
            file_id: v.row.file_id,
            file_seq: v.row.file_seq,
            payload,
        }
    }
}
