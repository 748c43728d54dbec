//! Error taxonomy for ingestion.
//!
//! - [`ConfigError`]: unknown exchange/table, bad registry or config. Fatal, never defaulted.
//! - [`ContractError`]: parser output does not meet the intermediate contract. Fatal for the file;
//!   the manifest records `failed` with the message as `status_reason`.
//! - Row-level problems are not errors; they become quarantine rows
//!   (see [`crate::rows::QuarantineReason`]).
//! - Infrastructure failures (database, filesystem, Parquet) travel as `anyhow::Error` and surface
//!   through [`IngestError::Infrastructure`] without touching the manifest.
//! - A file claimed by another worker surfaces as [`IngestError::InProgress`].

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::registry::DType;

/// Configuration problems. Raised immediately and never papered over with a default.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No timezone is configured for the exchange.
    #[error("unknown exchange '{0}': no trading timezone configured")]
    UnknownExchange(String),

    /// The data type / table is not in the schema registry.
    #[error("unknown table '{0}': not declared in the schema registry")]
    UnknownTable(String),

    /// No parser adapter is registered for the data type.
    #[error("no parser adapter registered for data type '{0}'")]
    NoParser(String),

    /// An IANA timezone name did not parse.
    #[error("invalid timezone '{tz}' for exchange '{exchange}'")]
    InvalidTimezone {
        /// Exchange code the timezone was configured for.
        exchange: String,
        /// The offending timezone name.
        tz: String,
    },

    /// A table spec violates the registry's structural rules.
    #[error("invalid table spec '{table}': {detail}")]
    InvalidTableSpec {
        /// Table name.
        table: String,
        /// What is wrong with it.
        detail: String,
    },
}

/// The parser output does not satisfy the intermediate-frame contract for its data type.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContractError {
    /// The adapter itself failed (I/O, decompression, malformed vendor data).
    #[error("parser failed: {0}")]
    Parser(String),

    /// The frame was produced for a different data type than the file declares.
    #[error("frame data type '{found}' does not match file data type '{expected}'")]
    DataTypeMismatch {
        /// Data type from the bronze file metadata.
        expected: String,
        /// Data type the frame claims.
        found: String,
    },

    /// A contract column is absent.
    #[error("required column '{column}' missing from '{data_type}' frame")]
    MissingColumn {
        /// Data type of the frame.
        data_type: String,
        /// Missing column.
        column: String,
    },

    /// A contract column is declared with the wrong dtype.
    #[error("column '{column}' declared as {found}, contract requires {expected}")]
    WrongDtype {
        /// Column name.
        column: String,
        /// Contract dtype.
        expected: DType,
        /// Frame dtype.
        found: DType,
    },

    /// The frame declares the same column twice.
    #[error("duplicate column '{0}' in frame")]
    DuplicateColumn(String),

    /// A row does not have one value per declared column.
    #[error("row {row} has {found} values, frame declares {expected} columns")]
    RaggedRow {
        /// Parse index of the row.
        row: usize,
        /// Declared column count.
        expected: usize,
        /// Values present.
        found: usize,
    },
}

/// Errors surfaced by [`crate::ingest::Ingestor::ingest_file`].
#[derive(Debug, Error)]
pub enum IngestError {
    /// Configuration problem. If the file already had a manifest record it is marked `failed`.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Another worker is ingesting the same file. Nothing was changed; retry later.
    #[error("file_id {file_id} is being ingested by {owner} (claim lapses at {expires_at})")]
    InProgress {
        /// Contended file.
        file_id: i64,
        /// Claim holder.
        owner: String,
        /// When the holder's claim lapses.
        expires_at: DateTime<Utc>,
    },

    /// A store was unreachable or a write failed. The manifest is left at its last
    /// confirmed status so the run can be retried.
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}
