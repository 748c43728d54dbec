use std::sync::Mutex;

use anyhow::{Context, anyhow};
use chrono::{Duration, Utc};
use diesel::SqliteConnection;
use diesel::prelude::*;

use crate::{
    bronze::{BronzeFileMetadata, FileIdentity},
    db::connection::connect_sqlite,
    manifest::{
        Claim, ClaimToken, ManifestRecord, ManifestStatus, ManifestStore, RepoError, RepoResult,
        RunResult,
    },
    models::{FileClaimRow, ManifestRow, ManifestStatusChange, NewFileClaimRow, NewManifestRow},
    tz,
};

use crate::schema::file_claims::dsl as fc;
use crate::schema::file_manifest::dsl as fm;

/// Manifest store over a single SQLite connection.
///
/// The connection sits behind a `Mutex`, so one store can be shared across threads of a
/// process. Across processes, writes use `BEGIN IMMEDIATE` and rely on the connection's
/// `busy_timeout` to queue.
pub struct SqliteManifestStore {
    conn: Mutex<SqliteConnection>,
}

impl SqliteManifestStore {
    /// Wrap an open connection. The schema must already be migrated.
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
        f: impl FnOnce(&mut SqliteConnection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("manifest connection mutex poisoned"))?;
        f(&mut conn)
    }
}

fn find_row(
    conn: &mut SqliteConnection,
    vendor: &str,
    data_type: &str,
    bronze_path: &str,
    file_hash: &str,
) -> QueryResult<Option<ManifestRow>> {
    fm::file_manifest
        .filter(fm::vendor.eq(vendor))
        .filter(fm::data_type.eq(data_type))
        .filter(fm::bronze_path.eq(bronze_path))
        .filter(fm::file_hash.eq(file_hash))
        .select(ManifestRow::as_select())
        .first(conn)
        .optional()
}

fn same_identity(row: &ManifestRow, meta: &BronzeFileMetadata) -> bool {
    row.vendor == meta.vendor
        && row.data_type == meta.data_type
        && row.bronze_path == meta.bronze_path
        && row.file_hash == meta.file_hash
}

fn to_db_count(n: u64, what: &str) -> anyhow::Result<i64> {
    i64::try_from(n).with_context(|| format!("{what}={n} does not fit the manifest"))
}

fn from_db_count(n: i64, what: &str, file_id: i64) -> anyhow::Result<u64> {
    u64::try_from(n).with_context(|| format!("file_id {file_id}: negative {what}={n}"))
}

fn record_from_row(r: ManifestRow) -> anyhow::Result<ManifestRecord> {
    let file_id = r.id;
    let status = r
        .status
        .parse::<ManifestStatus>()
        .with_context(|| format!("file_id {file_id}: bad status"))?;
    let date = |s: Option<String>| s.as_deref().map(tz::parse_date).transpose();

    Ok(ManifestRecord {
        file_id,
        status,
        rows_total: from_db_count(r.rows_total, "rows_total", file_id)?,
        rows_written: from_db_count(r.rows_written, "rows_written", file_id)?,
        rows_quarantined: from_db_count(r.rows_quarantined, "rows_quarantined", file_id)?,
        trading_date_min: date(r.trading_date_min)?,
        trading_date_max: date(r.trading_date_max)?,
        status_reason: r.status_reason,
        attempts: u32::try_from(r.attempts)
            .with_context(|| format!("file_id {file_id}: negative attempts={}", r.attempts))?,
        discovered_at: tz::parse_ts_to_utc(&r.discovered_at)?,
        created_at: tz::parse_ts_to_utc(&r.created_at)?,
        processed_at: r.processed_at.as_deref().map(tz::parse_ts_to_utc).transpose()?,
        identity: FileIdentity {
            vendor: r.vendor,
            data_type: r.data_type,
            bronze_path: r.bronze_path,
            file_hash: r.file_hash,
        },
    })
}

impl ManifestStore for SqliteManifestStore {
    fn resolve_file_id(&self, meta: &BronzeFileMetadata) -> RepoResult<i64> {
        let discovered_at = tz::to_rfc3339_millis(meta.discovered_at);
        let row = NewManifestRow {
            vendor: &meta.vendor,
            data_type: &meta.data_type,
            bronze_path: &meta.bronze_path,
            file_hash: &meta.file_hash,
            status: ManifestStatus::Pending.as_str(),
            discovered_at: &discovered_at,
        };

        self.with_conn(|conn| {
            conn.immediate_transaction(|conn| {
                // INSERT .. ON CONFLICT DO NOTHING, then read back the surviving row.
                let inserted = diesel::insert_into(fm::file_manifest)
                    .values(&row)
                    .on_conflict((fm::vendor, fm::data_type, fm::bronze_path, fm::file_hash))
                    .do_nothing()
                    .execute(conn)?;

                let file_id: i64 = fm::file_manifest
                    .filter(fm::vendor.eq(&meta.vendor))
                    .filter(fm::data_type.eq(&meta.data_type))
                    .filter(fm::bronze_path.eq(&meta.bronze_path))
                    .filter(fm::file_hash.eq(&meta.file_hash))
                    .select(fm::id)
                    .first(conn)?;

                if inserted > 0 {
                    tracing::info!(
                        file_id,
                        vendor = %meta.vendor,
                        data_type = %meta.data_type,
                        bronze_path = %meta.bronze_path,
                        "manifest record created"
                    );
                }
                Ok(file_id)
            })
        })
    }

    fn filter_pending(&self, candidates: &[BronzeFileMetadata]) -> RepoResult<Vec<BronzeFileMetadata>> {
        self.with_conn(|conn| {
            conn.transaction(|conn| {
                let mut out = Vec::with_capacity(candidates.len());
                for meta in candidates {
                    let status: Option<String> = fm::file_manifest
                        .filter(fm::vendor.eq(&meta.vendor))
                        .filter(fm::data_type.eq(&meta.data_type))
                        .filter(fm::bronze_path.eq(&meta.bronze_path))
                        .filter(fm::file_hash.eq(&meta.file_hash))
                        .select(fm::status)
                        .first(conn)
                        .optional()?;
                    if status.as_deref() != Some(ManifestStatus::Success.as_str()) {
                        out.push(meta.clone());
                    }
                }
                Ok(out)
            })
        })
    }

    fn update_status(
        &self,
        file_id: i64,
        status: ManifestStatus,
        meta: &BronzeFileMetadata,
        result: &RunResult,
        force: bool,
    ) -> RepoResult<ManifestRecord> {
        result.check_conservation()?;

        let change = ManifestStatusChange {
            status: status.as_str(),
            rows_total: to_db_count(result.rows_total, "rows_total")?,
            rows_written: to_db_count(result.rows_written, "rows_written")?,
            rows_quarantined: to_db_count(result.rows_quarantined, "rows_quarantined")?,
            trading_date_min: result.trading_date_min.map(tz::format_date),
            trading_date_max: result.trading_date_max.map(tz::format_date),
            status_reason: result.reason.as_deref(),
            processed_at: Some(tz::now_rfc3339()),
        };

        let updated = self.with_conn(|conn| {
            conn.immediate_transaction(|conn| {
                let current = fm::file_manifest
                    .find(file_id)
                    .select(ManifestRow::as_select())
                    .first(conn)
                    .optional()?
                    .ok_or(RepoError::UnknownFileId(file_id))?;

                if !same_identity(&current, meta) {
                    return Err(RepoError::IdentityMismatch {
                        file_id,
                        identity: meta.identity(),
                    }
                    .into());
                }
                if current.status == ManifestStatus::Success.as_str() && !force {
                    return Err(RepoError::SuccessOverwrite { file_id }.into());
                }

                let row: ManifestRow = diesel::update(fm::file_manifest.find(file_id))
                    .set((&change, fm::attempts.eq(fm::attempts + 1)))
                    .returning(ManifestRow::as_returning())
                    .get_result(conn)?;
                Ok(row)
            })
        })?;

        tracing::debug!(file_id, status = %status, force, "manifest status recorded");
        record_from_row(updated)
    }

    fn claim(&self, file_id: i64, owner: &str, lease: Duration, force: bool) -> RepoResult<Claim> {
        let now = Utc::now();
        let expires = now
            .checked_add_signed(lease)
            .ok_or_else(|| anyhow!("claim lease {lease} is out of range"))?;
        let claimed_at = tz::to_rfc3339_millis(now);
        let expires_at = tz::to_rfc3339_millis(expires);
        let new = NewFileClaimRow {
            file_id,
            owner,
            claimed_at: &claimed_at,
            expires_at: &expires_at,
        };

        self.with_conn(|conn| {
            conn.immediate_transaction(|conn| {
                let current = fm::file_manifest
                    .find(file_id)
                    .select(ManifestRow::as_select())
                    .first(conn)
                    .optional()?
                    .ok_or(RepoError::UnknownFileId(file_id))?;
                if current.status == ManifestStatus::Success.as_str() && !force {
                    return Ok(Claim::AlreadySuccess(record_from_row(current)?));
                }

                let held: Option<FileClaimRow> = fc::file_claims
                    .filter(fc::file_id.eq(file_id))
                    .select(FileClaimRow::as_select())
                    .first(conn)
                    .optional()?;
                if let Some(held) = held {
                    let expires_at = tz::parse_ts_to_utc(&held.expires_at)
                        .with_context(|| format!("file_id {file_id}: bad claim expiry"))?;
                    if expires_at > now {
                        return Ok(Claim::Busy {
                            owner: held.owner,
                            expires_at,
                        });
                    }
                    diesel::delete(fc::file_claims.find(held.id)).execute(conn)?;
                    tracing::warn!(file_id, owner = %held.owner, expired = %held.expires_at, "taking over lapsed claim");
                }

                let token: i64 = diesel::insert_into(fc::file_claims)
                    .values(&new)
                    .returning(fc::id)
                    .get_result(conn)?;
                Ok(Claim::Acquired {
                    record: record_from_row(current)?,
                    token: ClaimToken { file_id, token },
                })
            })
        })
    }

    fn release(&self, token: ClaimToken) -> RepoResult<bool> {
        let removed = self.with_conn(|conn| {
            Ok(diesel::delete(
                fc::file_claims
                    .filter(fc::id.eq(token.token))
                    .filter(fc::file_id.eq(token.file_id)),
            )
            .execute(conn)?)
        })?;
        Ok(removed > 0)
    }

    fn get(&self, file_id: i64) -> RepoResult<Option<ManifestRecord>> {
        let row = self.with_conn(|conn| {
            Ok(fm::file_manifest
                .find(file_id)
                .select(ManifestRow::as_select())
                .first(conn)
                .optional()?)
        })?;
        row.map(record_from_row).transpose()
    }

    fn find(&self, identity: &FileIdentity) -> RepoResult<Option<ManifestRecord>> {
        let row = self.with_conn(|conn| {
            Ok(find_row(
                conn,
                &identity.vendor,
                &identity.data_type,
                &identity.bronze_path,
                &identity.file_hash,
            )?)
        })?;
        row.map(record_from_row).transpose()
    }

    fn list(&self, status: Option<ManifestStatus>) -> RepoResult<Vec<ManifestRecord>> {
        let rows: Vec<ManifestRow> = self.with_conn(|conn| {
            let rows = match status {
                Some(s) => fm::file_manifest
                    .filter(fm::status.eq(s.as_str()))
                    .order(fm::id.asc())
                    .select(ManifestRow::as_select())
                    .load(conn)?,
                None => fm::file_manifest
                    .order(fm::id.asc())
                    .select(ManifestRow::as_select())
                    .load(conn)?,
            };
            Ok(rows)
        })?;
        rows.into_iter().map(record_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn store() -> (tempfile::TempDir, SqliteManifestStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.db");
        let url = path.to_string_lossy().to_string();
        crate::db::migrate::run_sqlite(&url).unwrap();
        (dir, SqliteManifestStore::open(&url).unwrap())
    }

    fn meta(path: &str) -> BronzeFileMetadata {
        BronzeFileMetadata {
            vendor: "tardis".into(),
            data_type: "trades".into(),
            bronze_path: path.into(),
            file_hash: "h1".into(),
            discovered_at: Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn record_maps_columns() {
        let (_dir, store) = store();
        let m = meta("/bronze/a.csv.gz");
        let id = store.resolve_file_id(&m).unwrap();
        let rec = store.get(id).unwrap().unwrap();
        assert_eq!(rec.identity, m.identity());
        assert_eq!(rec.status, ManifestStatus::Pending);
        assert_eq!(rec.discovered_at, m.discovered_at);
        assert_eq!(rec.attempts, 0);
        assert!(rec.processed_at.is_none());
        assert_eq!(store.find(&m.identity()).unwrap(), Some(rec));
    }

    #[test]
    fn identity_mismatch_is_refused() {
        let (_dir, store) = store();
        let a = store.resolve_file_id(&meta("/a")).unwrap();
        let err = store
            .update_status(a, ManifestStatus::Failed, &meta("/b"), &RunResult::failed("x"), false)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RepoError>(),
            Some(RepoError::IdentityMismatch { file_id, .. }) if *file_id == a
        ));
    }

    #[test]
    fn negative_attempts_are_reported() {
        let (_dir, store) = store();
        let id = store.resolve_file_id(&meta("/a")).unwrap();
        store
            .with_conn(|conn| {
                diesel::update(fm::file_manifest.find(id))
                    .set(fm::attempts.eq(-1))
                    .execute(conn)?;
                Ok(())
            })
            .unwrap();

        let err = store.get(id).unwrap_err();
        assert!(format!("{err:#}").contains("negative attempts=-1"), "{err:#}");
    }
}
