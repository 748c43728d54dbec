//! Quarantine store (SQLite, same database as the manifest).
//!
//! Structurally permissive: the full original row is kept as JSON, so rows that failed
//! schema checks can still be stored. Rows are keyed by `(table_name, file_id, file_seq)`;
//! appending the same key again replaces the earlier row instead of duplicating it.
//! [`QuarantineSink::replace_file`] swaps a file's whole row set in one `BEGIN IMMEDIATE`
//! transaction, so a failed write leaves the previous rows in place.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{Context, anyhow};
use diesel::SqliteConnection;
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::Serialize;

use crate::db::connection::connect_sqlite;
use crate::models::{NewQuarantineRecordRow, QuarantineRecordRow};
use crate::rows::{QuarantineReason, QuarantineRow};
use crate::schema::quarantine_rows::dsl as qr;
use crate::store::QuarantineSink;

/// A stored quarantine row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuarantineRecord {
    /// Target table.
    pub table_name: String,
    /// Originating file.
    pub file_id: i64,
    /// Lineage position.
    pub file_seq: i64,
    /// Exchange, if the row carried one.
    pub exchange: Option<String>,
    /// Symbol, if the row carried one.
    pub symbol: Option<String>,
    /// Event time, if the row carried one.
    pub ts_event_us: Option<i64>,
    /// Reason code.
    pub reason: QuarantineReason,
    /// Free-form detail.
    pub detail: Option<String>,
    /// The original row.
    pub payload: serde_json::Value,
}

/// Row count per `(table_name, reason)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarantineSummary {
    /// Target table.
    pub table_name: String,
    /// Reason code.
    pub reason: String,
    /// Rows.
    pub rows: i64,
}

/// Quarantine rows in SQLite.
pub struct SqliteQuarantineStore {
    conn: Mutex<SqliteConnection>,
}

impl SqliteQuarantineStore {
    /// Wrap an open, migrated connection.
    pub fn new(conn: SqliteConnection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Open `database_url` with the standard PRAGMAs.
    pub fn open(database_url: &str) -> anyhow::Result<Self> {
        Ok(Self::new(connect_sqlite(database_url)?))
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut SqliteConnection) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("quarantine connection mutex poisoned"))?;
        f(&mut conn)
    }

    /// Rows of one file, in `file_seq` order.
    pub fn list_for_file(&self, table_name: &str, file_id: i64) -> anyhow::Result<Vec<QuarantineRecord>> {
        let rows: Vec<QuarantineRecordRow> = self.with_conn(|conn| {
            Ok(qr::quarantine_rows
                .filter(qr::table_name.eq(table_name))
                .filter(qr::file_id.eq(file_id))
                .order(qr::file_seq.asc())
                .select(QuarantineRecordRow::as_select())
                .load(conn)?)
        })?;
        rows.into_iter().map(record_from_row).collect()
    }

    /// Counts per `(table_name, reason)`, sorted.
    pub fn summary(&self) -> anyhow::Result<Vec<QuarantineSummary>> {
        let rows: Vec<(String, String, i64)> = self.with_conn(|conn| {
            Ok(qr::quarantine_rows
                .group_by((qr::table_name, qr::reason))
                .select((qr::table_name, qr::reason, count_star()))
                .order((qr::table_name.asc(), qr::reason.asc()))
                .load(conn)?)
        })?;
        Ok(rows
            .into_iter()
            .map(|(table_name, reason, rows)| QuarantineSummary {
                table_name,
                reason,
                rows,
            })
            .collect())
    }
}

fn record_from_row(r: QuarantineRecordRow) -> anyhow::Result<QuarantineRecord> {
    let payload = serde_json::from_str(&r.payload)
        .with_context(|| format!("quarantine row {}: bad payload JSON", r.id))?;
    Ok(QuarantineRecord {
        reason: r.reason.parse()?,
        table_name: r.table_name,
        file_id: r.file_id,
        file_seq: r.file_seq,
        exchange: r.exchange,
        symbol: r.symbol,
        ts_event_us: r.ts_event_us,
        detail: r.detail,
        payload,
    })
}

fn insert_rows(
    conn: &mut SqliteConnection,
    table_name: &str,
    file_id: i64,
    reason: QuarantineReason,
    rows: &[QuarantineRow],
) -> anyhow::Result<usize> {
    let mut n = 0;
    for r in rows {
        let payload = serde_json::to_string(&r.payload)
            .with_context(|| format!("file_id {file_id}, file_seq {}: encode payload", r.file_seq))?;
        let new = NewQuarantineRecordRow {
            table_name,
            file_id,
            file_seq: r.file_seq,
            exchange: r.exchange.as_deref(),
            symbol: r.symbol.as_deref(),
            ts_event_us: r.ts_event_us,
            reason: reason.as_str(),
            detail: r.detail.as_deref(),
            payload: &payload,
        };
        n += diesel::insert_into(qr::quarantine_rows)
            .values(&new)
            .on_conflict((qr::table_name, qr::file_id, qr::file_seq))
            .do_update()
            .set(&new)
            .execute(conn)?;
    }
    Ok(n)
}

fn delete_file(conn: &mut SqliteConnection, table_name: &str, file_id: i64) -> QueryResult<usize> {
    diesel::delete(
        qr::quarantine_rows
            .filter(qr::table_name.eq(table_name))
            .filter(qr::file_id.eq(file_id)),
    )
    .execute(conn)
}

impl QuarantineSink for SqliteQuarantineStore {
    fn append(
        &self,
        table_name: &str,
        rows: &[QuarantineRow],
        reason: QuarantineReason,
        file_id: i64,
    ) -> anyhow::Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = self.with_conn(|conn| {
            conn.immediate_transaction(|conn| insert_rows(conn, table_name, file_id, reason, rows))
        })?;

        tracing::debug!(table = table_name, file_id, %reason, rows = written, "quarantine rows written");
        Ok(written)
    }

    fn replace_file(
        &self,
        table_name: &str,
        file_id: i64,
        rows_by_reason: &BTreeMap<QuarantineReason, Vec<QuarantineRow>>,
    ) -> anyhow::Result<usize> {
        let (removed, written) = self.with_conn(|conn| {
            conn.immediate_transaction(|conn| {
                let removed = delete_file(conn, table_name, file_id)?;
                let mut written = 0;
                for (reason, rows) in rows_by_reason {
                    written += insert_rows(conn, table_name, file_id, *reason, rows)?;
                }
                Ok((removed, written))
            })
        })?;

        tracing::debug!(table = table_name, file_id, removed, rows = written, "quarantine rows replaced");
        Ok(written)
    }

    fn purge_file(&self, table_name: &str, file_id: i64) -> anyhow::Result<usize> {
        self.with_conn(|conn| Ok(delete_file(conn, table_name, file_id)?))
    }
}
