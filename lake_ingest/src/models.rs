//! Diesel models mapping to the database schema.
//!
//! These types mirror the tables defined in the embedded migrations and in
//! [`crate::schema`]:
//! - [`crate::schema::file_manifest`]: one row per bronze file identity with status and counts
//! - [`crate::schema::quarantine_rows`]: rejected rows linked back to `file_manifest.id`
//! - [`crate::schema::file_claims`]: in-flight runs, at most one per `file_manifest.id`
//!
//! Timestamps are RFC-3339 UTC text (see [`crate::tz::to_rfc3339_millis`]) and trading
//! dates are `YYYY-MM-DD` text. Domain-facing types live in [`crate::manifest`] and
//! [`crate::store::quarantine`]; these structs are only the row shapes.

use diesel::prelude::*;

use crate::schema::*;

/// A row in [`crate::schema::file_manifest`].
#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = file_manifest, check_for_backend(diesel::sqlite::Sqlite))]
pub struct ManifestRow {
    /// Stable surrogate (`file_id`), assigned once per identity.
    pub id: i64,
    /// Vendor code (e.g., "tardis").
    pub vendor: String,
    /// Data type / target table (e.g., "trades").
    pub data_type: String,
    /// Path of the immutable bronze capture file.
    pub bronze_path: String,
    /// Content hash of the bronze file.
    pub file_hash: String,
    /// One of "pending" | "success" | "failed" | "quarantined".
    pub status: String,
    /// Rows produced by the parser in the last run.
    pub rows_total: i64,
    /// Rows written to the event store in the last run.
    pub rows_written: i64,
    /// Rows written to quarantine in the last run.
    pub rows_quarantined: i64,
    /// Smallest trading date written (YYYY-MM-DD).
    pub trading_date_min: Option<String>,
    /// Largest trading date written (YYYY-MM-DD).
    pub trading_date_max: Option<String>,
    /// Human-readable reason for failed/quarantined outcomes.
    pub status_reason: Option<String>,
    /// Number of recorded status transitions.
    pub attempts: i32,
    /// When discovery first saw the file (RFC-3339 UTC).
    pub discovered_at: String,
    /// Row creation time (RFC-3339 UTC).
    pub created_at: String,
    /// Time of the last recorded status transition (RFC-3339 UTC).
    pub processed_at: Option<String>,
    /// Maintained by trigger on UPDATE.
    pub updated_at: String,
}

/// Insertable form of [`ManifestRow`]; everything else takes column defaults.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = file_manifest)]
pub struct NewManifestRow<'a> {
    /// Vendor code.
    pub vendor: &'a str,
    /// Data type / target table.
    pub data_type: &'a str,
    /// Bronze file path.
    pub bronze_path: &'a str,
    /// Content hash.
    pub file_hash: &'a str,
    /// Initial status, always "pending".
    pub status: &'a str,
    /// Discovery time (RFC-3339 UTC).
    pub discovered_at: &'a str,
}

/// Status transition payload applied by the manifest store.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = file_manifest, treat_none_as_null = true)]
pub struct ManifestStatusChange<'a> {
    /// New status.
    pub status: &'a str,
    /// Rows seen.
    pub rows_total: i64,
    /// Rows written.
    pub rows_written: i64,
    /// Rows quarantined.
    pub rows_quarantined: i64,
    /// Smallest written trading date.
    pub trading_date_min: Option<String>,
    /// Largest written trading date.
    pub trading_date_max: Option<String>,
    /// Reason text (failed / quarantined), cleared otherwise.
    pub status_reason: Option<&'a str>,
    /// Transition time.
    pub processed_at: Option<String>,
}

/// A row in [`crate::schema::quarantine_rows`].
#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = quarantine_rows, check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(belongs_to(ManifestRow, foreign_key = file_id))]
pub struct QuarantineRecordRow {
    /// Database primary key.
    pub id: i64,
    /// Target table of the rejected row.
    pub table_name: String,
    /// FK to [`ManifestRow::id`].
    pub file_id: i64,
    /// Lineage position of the rejected row within its file.
    pub file_seq: i64,
    /// Exchange, when the row carried one.
    pub exchange: Option<String>,
    /// Exchange symbol, when the row carried one.
    pub symbol: Option<String>,
    /// Event time, when the row carried one.
    pub ts_event_us: Option<i64>,
    /// Reason code, e.g. "missing_pit_symbol_coverage".
    pub reason: String,
    /// Free-form detail for remediation.
    pub detail: Option<String>,
    /// The full row as a JSON object.
    pub payload: String,
    /// Insert time (RFC-3339 UTC).
    pub created_at: String,
}

/// Insertable / upsertable form of [`QuarantineRecordRow`].
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = quarantine_rows, treat_none_as_null = true)]
pub struct NewQuarantineRecordRow<'a> {
    /// Target table.
    pub table_name: &'a str,
    /// Originating file.
    pub file_id: i64,
    /// Lineage position.
    pub file_seq: i64,
    /// Exchange, if any.
    pub exchange: Option<&'a str>,
    /// Symbol, if any.
    pub symbol: Option<&'a str>,
    /// Event time, if any.
    pub ts_event_us: Option<i64>,
    /// Reason code.
    pub reason: &'a str,
    /// Free-form detail.
    pub detail: Option<&'a str>,
    /// Row payload as JSON.
    pub payload: &'a str,
}

/// A row in [`crate::schema::file_claims`].
#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = file_claims, check_for_backend(diesel::sqlite::Sqlite))]
pub struct FileClaimRow {
    /// Claim token; never reused.
    pub id: i64,
    /// Claimed file.
    pub file_id: i64,
    /// Who holds the claim, for diagnostics.
    pub owner: String,
    /// Claim time (RFC-3339 UTC).
    pub claimed_at: String,
    /// Lapse time (RFC-3339 UTC).
    pub expires_at: String,
}

/// Insertable form of [`FileClaimRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = file_claims)]
pub struct NewFileClaimRow<'a> {
    /// Claimed file.
    pub file_id: i64,
    /// Holder.
    pub owner: &'a str,
    /// Claim time.
    pub claimed_at: &'a str,
    /// Lapse time.
    pub expires_at: &'a str,
}
