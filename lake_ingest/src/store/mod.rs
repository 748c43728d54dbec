//! Sinks for ingestion output.
//!
//! - [`event`]: partitioned Parquet event tables.
//! - [`quarantine`]: rejected rows in SQLite, next to the manifest.
//!
//! The orchestrator only sees the [`EventSink`] and [`QuarantineSink`] traits, so tests can
//! inject stores that fail on demand.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use thiserror::Error;

use crate::registry::DType;
use crate::rows::{CanonicalEventRow, QuarantineReason, QuarantineRow};

pub mod event;
pub mod quarantine;

pub use event::ParquetEventStore;
pub use quarantine::SqliteQuarantineStore;

/// A row handed to the event store does not fit its table.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// A payload column is absent.
    #[error("table '{table}', file_seq {file_seq}: missing column '{column}'")]
    MissingColumn {
        /// Table name.
        table: String,
        /// Offending row.
        file_seq: i64,
        /// Column name.
        column: String,
    },

    /// Null in a non-nullable column.
    #[error("table '{table}', file_seq {file_seq}: null in non-nullable column '{column}'")]
    NullViolation {
        /// Table name.
        table: String,
        /// Offending row.
        file_seq: i64,
        /// Column name.
        column: String,
    },

    /// Value of the wrong kind.
    #[error("table '{table}', file_seq {file_seq}: column '{column}' expects {expected}")]
    TypeMismatch {
        /// Table name.
        table: String,
        /// Offending row.
        file_seq: i64,
        /// Column name.
        column: String,
        /// Declared dtype.
        expected: DType,
    },

    /// A payload column the table does not declare.
    #[error("table '{table}', file_seq {file_seq}: undeclared column '{column}'")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Offending row.
        file_seq: i64,
        /// Column name.
        column: String,
    },
}

/// One `exchange=/trading_date=` partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct PartitionKey {
    /// Exchange code.
    pub exchange: String,
    /// Exchange-local trading date.
    pub trading_date: NaiveDate,
}

/// What an append committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendSummary {
    /// Rows written.
    pub rows: u64,
    /// Partitions written, sorted.
    pub partitions: Vec<PartitionKey>,
}

/// Event table writer.
pub trait EventSink: Send + Sync {
    /// Validate and write `rows`. For every `file_id` present, the written rows replace
    /// whatever the store held for that file before. On error the store holds what it held
    /// before the call.
    fn append(&self, table_name: &str, rows: &[CanonicalEventRow]) -> anyhow::Result<AppendSummary>;

    /// Remove everything stored for `file_id`. Returns the number of files removed.
    fn purge_file(&self, table_name: &str, file_id: i64) -> anyhow::Result<usize>;
}

/// Quarantine writer.
pub trait QuarantineSink: Send + Sync {
    /// Persist `rows`, tagging each with `table_name`, `reason` and `file_id`.
    fn append(
        &self,
        table_name: &str,
        rows: &[QuarantineRow],
        reason: QuarantineReason,
        file_id: i64,
    ) -> anyhow::Result<usize>;

    /// Replace every quarantined row of `file_id` with `rows_by_reason`, all or nothing.
    /// Returns the number of rows written.
    fn replace_file(
        &self,
        table_name: &str,
        file_id: i64,
        rows_by_reason: &BTreeMap<QuarantineReason, Vec<QuarantineRow>>,
    ) -> anyhow::Result<usize>;

    /// Remove every quarantined row of `file_id`. Returns the number of rows removed.
    fn purge_file(&self, table_name: &str, file_id: i64) -> anyhow::Result<usize>;
}
