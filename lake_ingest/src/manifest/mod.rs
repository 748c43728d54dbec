//! File manifest: the idempotency ledger for bronze files.
//!
//! One record per [`FileIdentity`]. The record is created `pending` on first sight, receives a
//! stable `file_id`, and afterwards changes only through [`ManifestStore::update_status`].
//! Records are never deleted.
//!
//! Rules enforced by every implementation:
//! - the same identity always resolves to the same `file_id`, also under concurrent callers;
//! - a `success` record is only overwritten with `force`;
//! - `rows_total == rows_written + rows_quarantined` for every persisted status;
//! - at most one worker holds a [`Claim`] on a file at a time.
//!
//! A claim is how a worker marks a file "running" without persisting that as a status. It
//! lapses after its lease, so a worker killed mid-run leaves the file retryable.
//!
//! The SQLite implementation lives in [`repo`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::bronze::{BronzeFileMetadata, FileIdentity};

pub mod repo;

pub use repo::SqliteManifestStore;

/// Persisted status of a file. The in-flight "running" state is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    /// Seen, not yet processed to completion.
    Pending,
    /// Every row written or quarantined.
    Success,
    /// Processing failed before any row was committed.
    Failed,
    /// Every row was quarantined.
    Quarantined,
}

impl ManifestStatus {
    /// Text stored in `file_manifest.status`.
    pub fn as_str(self) -> &'static str {
        match self {
            ManifestStatus::Pending => "pending",
            ManifestStatus::Success => "success",
            ManifestStatus::Failed => "failed",
            ManifestStatus::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManifestStatus {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "quarantined" => Ok(Self::Quarantined),
            other => Err(RepoError::InvalidStatus(other.to_string())),
        }
    }
}

/// Errors that can occur while interacting with the manifest.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    /// The record is `success` and the caller did not force.
    #[error("file_id {file_id} is already success; refusing to overwrite without force")]
    SuccessOverwrite {
        /// Record in question.
        file_id: i64,
    },

    /// No record has this id.
    #[error("unknown file_id {0}")]
    UnknownFileId(i64),

    /// The metadata passed alongside a `file_id` belongs to a different record.
    #[error("file_id {file_id} does not belong to {identity:?}")]
    IdentityMismatch {
        /// Record in question.
        file_id: i64,
        /// Identity the caller passed.
        identity: FileIdentity,
    },

    /// Counts do not add up.
    #[error(
        "row conservation violated: rows_total={total} != rows_written={written} + rows_quarantined={quarantined}"
    )]
    ConservationViolated {
        /// Rows seen.
        total: u64,
        /// Rows written.
        written: u64,
        /// Rows quarantined.
        quarantined: u64,
    },

    /// A status string that is not one of the four manifest states.
    #[error("'{0}' is not a manifest status")]
    InvalidStatus(String),
}

/// Result type used throughout the manifest for fallible operations.
pub type RepoResult<T> = anyhow::Result<T>;

/// Outcome figures recorded with a status transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Rows produced by the parser.
    pub rows_total: u64,
    /// Rows committed to the event store.
    pub rows_written: u64,
    /// Rows committed to quarantine.
    pub rows_quarantined: u64,
    /// Smallest trading date written.
    pub trading_date_min: Option<NaiveDate>,
    /// Largest trading date written.
    pub trading_date_max: Option<NaiveDate>,
    /// Reason for `failed` / `quarantined`.
    pub reason: Option<String>,
}

impl RunResult {
    /// Zero counts with a reason; what a `failed` run records.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Check `rows_total == rows_written + rows_quarantined`.
    pub fn check_conservation(&self) -> Result<(), RepoError> {
        if self.rows_written.checked_add(self.rows_quarantined) == Some(self.rows_total) {
            Ok(())
        } else {
            Err(RepoError::ConservationViolated {
                total: self.rows_total,
                written: self.rows_written,
                quarantined: self.rows_quarantined,
            })
        }
    }
}

/// One manifest record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestRecord {
    /// Stable surrogate for the identity.
    pub file_id: i64,
    /// Identity of the file.
    pub identity: FileIdentity,
    /// Current status.
    pub status: ManifestStatus,
    /// Rows seen in the last recorded run.
    pub rows_total: u64,
    /// Rows written in the last recorded run.
    pub rows_written: u64,
    /// Rows quarantined in the last recorded run.
    pub rows_quarantined: u64,
    /// Smallest trading date written.
    pub trading_date_min: Option<NaiveDate>,
    /// Largest trading date written.
    pub trading_date_max: Option<NaiveDate>,
    /// Reason for `failed` / `quarantined`.
    pub status_reason: Option<String>,
    /// Number of recorded status transitions.
    pub attempts: u32,
    /// First seen by discovery.
    pub discovered_at: DateTime<Utc>,
    /// Record creation.
    pub created_at: DateTime<Utc>,
    /// Last status transition.
    pub processed_at: Option<DateTime<Utc>>,
}

/// Proof that a worker holds the claim on a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimToken {
    /// Claimed file.
    pub file_id: i64,
    /// Unique per claim, never reused.
    pub token: i64,
}

/// Outcome of [`ManifestStore::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The caller holds the file until it releases the claim or the lease lapses.
    Acquired {
        /// Record as it was when the claim was taken.
        record: ManifestRecord,
        /// Pass to [`ManifestStore::release`].
        token: ClaimToken,
    },
    /// The record is `success` and the caller did not force. No claim was taken.
    AlreadySuccess(ManifestRecord),
    /// Another worker holds an unexpired claim.
    Busy {
        /// Holder, as it described itself.
        owner: String,
        /// When the holder's lease lapses.
        expires_at: DateTime<Utc>,
    },
}

/// Portable surface; the SQLite implementation lives in `repo.rs`.
pub trait ManifestStore: Send + Sync {
    /// Return the `file_id` for `meta`'s identity, creating a `pending` record on first sight.
    fn resolve_file_id(&self, meta: &BronzeFileMetadata) -> RepoResult<i64>;

    /// Candidates with no `success` record, in input order.
    fn filter_pending(&self, candidates: &[BronzeFileMetadata]) -> RepoResult<Vec<BronzeFileMetadata>>;

    /// Record a status transition and return the updated record.
    ///
    /// Fails with [`RepoError::SuccessOverwrite`] when the record is `success` and `force`
    /// is false, and with [`RepoError::ConservationViolated`] when the counts do not add up.
    fn update_status(
        &self,
        file_id: i64,
        status: ManifestStatus,
        meta: &BronzeFileMetadata,
        result: &RunResult,
        force: bool,
    ) -> RepoResult<ManifestRecord>;

    /// Claim `file_id` for one run, for at most `lease`.
    ///
    /// A `success` record is only claimed with `force`. A claim whose lease has lapsed is
    /// taken over.
    fn claim(&self, file_id: i64, owner: &str, lease: Duration, force: bool) -> RepoResult<Claim>;

    /// Drop a claim. Returns false when the claim had already lapsed and been taken over.
    fn release(&self, token: ClaimToken) -> RepoResult<bool>;

    /// Record by id.
    fn get(&self, file_id: i64) -> RepoResult<Option<ManifestRecord>>;

    /// Record by identity.
    fn find(&self, identity: &FileIdentity) -> RepoResult<Option<ManifestRecord>>;

    /// All records, optionally filtered by status, ordered by `file_id`.
    fn list(&self, status: Option<ManifestStatus>) -> RepoResult<Vec<ManifestRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_round_trips() {
        for s in [
            ManifestStatus::Pending,
            ManifestStatus::Success,
            ManifestStatus::Failed,
            ManifestStatus::Quarantined,
        ] {
            assert_eq!(s.as_str().parse::<ManifestStatus>().unwrap(), s);
        }
        assert_eq!(
            "running".parse::<ManifestStatus>().unwrap_err(),
            RepoError::InvalidStatus("running".into())
        );
    }

    #[test]
    fn conservation_check() {
        let ok = RunResult {
            rows_total: 5,
            rows_written: 3,
            rows_quarantined: 2,
            ..RunResult::default()
        };
        assert!(ok.check_conservation().is_ok());
        assert!(RunResult::failed("boom").check_conservation().is_ok());

        let bad = RunResult {
            rows_total: 5,
            rows_written: 3,
            ..RunResult::default()
        };
        assert!(matches!(
            bad.check_conservation(),
            Err(RepoError::ConservationViolated { total: 5, written: 3, quarantined: 0 })
        ));
    }
}
