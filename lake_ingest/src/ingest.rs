//! Ingestion orchestrator.
//!
//! Per-file state machine:
//! ```text
//! pending --run--> (running, in memory only) --> success | quarantined | failed
//! success --force--> running --> ...
//! ```
//!
//! One run of [`Ingestor::ingest_file`]:
//! 1. look up the table spec and parser (config errors end here, manifest untouched);
//! 2. resolve the `file_id` and claim it; skip if the record is `success` and the run is not
//!    forced, refuse if another worker holds the claim;
//! 3. parse, check the contract, assign lineage, validate rows, resolve symbols;
//! 4. verify that every parsed row is either resolved or rejected, exactly once;
//! 5. replace the file's output in the event store and the quarantine store;
//! 6. record the terminal status in the manifest, then release the claim.
//!
//! Contract and parser failures record `failed` and return `Ok`. An unknown exchange also
//! records `failed` but returns [`IngestError::Config`]. Store failures return
//! [`IngestError::Infrastructure`] and leave the manifest at its last confirmed status.
//! Output already written is purged best-effort, unless the manifest (read again after the
//! failure) says `success`: that output is what the manifest describes.
//!
//! Each store replaces a file's output all or nothing, and the event store is written first.
//! A forced rerun of a `success` file whose quarantine write fails therefore keeps the previous
//! quarantine rows next to freshly written event partitions; both derive from the same bronze
//! file.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{Duration, NaiveDate};
use roaring::RoaringTreemap;
use serde::Serialize;

use crate::bronze::BronzeFileMetadata;
use crate::dimension::{DimensionHandle, SymbolDimension};
use crate::error::{ConfigError, ContractError, IngestError};
use crate::manifest::{Claim, ManifestRecord, ManifestStatus, ManifestStore, RepoError, RunResult};
use crate::parser::{ParserAdapter, ParserRegistry};
use crate::registry::{SchemaRegistry, TableSpec};
use crate::rows::{CanonicalEventRow, QuarantineReason, QuarantineRow, Rejected};
use crate::store::{EventSink, PartitionKey, QuarantineSink};
use crate::trading_date::TradingCalendar;
use crate::{frame, lineage, pit, validate};

/// Default lease of a file claim.
pub const DEFAULT_CLAIM_LEASE_SECS: i64 = 3600;

/// Per-run switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Reprocess even if the manifest says `success`.
    pub force: bool,
}

/// What one call to [`Ingestor::ingest_file`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Manifest id of the file.
    pub file_id: i64,
    /// Target table.
    pub table: String,
    /// Manifest status after the call.
    pub status: ManifestStatus,
    /// True when the file was already `success` and nothing ran.
    pub skipped: bool,
    /// Rows produced by the parser.
    pub rows_total: u64,
    /// Rows written to the event store.
    pub rows_written: u64,
    /// Rows written to quarantine.
    pub rows_quarantined: u64,
    /// Quarantined rows per reason.
    pub quarantined_by_reason: BTreeMap<QuarantineReason, u64>,
    /// Smallest trading date written.
    pub trading_date_min: Option<NaiveDate>,
    /// Largest trading date written.
    pub trading_date_max: Option<NaiveDate>,
    /// Partitions written in this run.
    pub partitions: Vec<PartitionKey>,
    /// Reason recorded for `failed` / `quarantined`.
    pub status_reason: Option<String>,
}

impl IngestReport {
    fn skipped(rec: &ManifestRecord, table: &str) -> Self {
        Self {
            file_id: rec.file_id,
            table: table.to_string(),
            status: rec.status,
            skipped: true,
            rows_total: rec.rows_total,
            rows_written: rec.rows_written,
            rows_quarantined: rec.rows_quarantined,
            quarantined_by_reason: BTreeMap::new(),
            trading_date_min: rec.trading_date_min,
            trading_date_max: rec.trading_date_max,
            partitions: Vec::new(),
            status_reason: rec.status_reason.clone(),
        }
    }

    fn failed(file_id: i64, table: &str, reason: String) -> Self {
        Self {
            file_id,
            table: table.to_string(),
            status: ManifestStatus::Failed,
            skipped: false,
            rows_total: 0,
            rows_written: 0,
            rows_quarantined: 0,
            quarantined_by_reason: BTreeMap::new(),
            trading_date_min: None,
            trading_date_max: None,
            partitions: Vec::new(),
            status_reason: Some(reason),
        }
    }
}

/// Result for one file of a batch.
#[derive(Debug)]
pub struct FileOutcome {
    /// The file.
    pub meta: BronzeFileMetadata,
    /// What happened.
    pub result: Result<IngestReport, IngestError>,
}

enum FileFailure {
    Contract(ContractError),
    Config(ConfigError),
}

struct Staged {
    rows_total: u64,
    resolved: Vec<CanonicalEventRow>,
    rejected: Vec<Rejected>,
}

/// Wires the stages and stores together. All collaborators are injected.
pub struct Ingestor {
    registry: Arc<SchemaRegistry>,
    calendar: TradingCalendar,
    parsers: ParserRegistry,
    dimension: Arc<DimensionHandle>,
    manifest: Arc<dyn ManifestStore>,
    events: Arc<dyn EventSink>,
    quarantine: Arc<dyn QuarantineSink>,
    owner: String,
    claim_lease: Duration,
}

impl Ingestor {
    /// Assemble an ingestor.
    pub fn new(
        registry: Arc<SchemaRegistry>,
        calendar: TradingCalendar,
        parsers: ParserRegistry,
        dimension: Arc<DimensionHandle>,
        manifest: Arc<dyn ManifestStore>,
        events: Arc<dyn EventSink>,
        quarantine: Arc<dyn QuarantineSink>,
    ) -> Self {
        Self {
            registry,
            calendar,
            parsers,
            dimension,
            manifest,
            events,
            quarantine,
            owner: format!("pid {}", std::process::id()),
            claim_lease: Duration::seconds(DEFAULT_CLAIM_LEASE_SECS),
        }
    }

    /// How long a claim protects a file from other workers. Runs longer than this can be
    /// taken over.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Ingest one bronze file.
    pub fn ingest_file(
        &self,
        meta: &BronzeFileMetadata,
        opts: IngestOptions,
    ) -> Result<IngestReport, IngestError> {
        let spec = self.registry.get(&meta.data_type)?;
        let parser = self.parsers.get(&meta.data_type)?;

        let file_id = self.manifest.resolve_file_id(meta)?;
        let span = tracing::info_span!("ingest_file", file_id, table = %spec.name);
        let _enter = span.enter();

        let token = match self.manifest.claim(file_id, &self.owner, self.claim_lease, opts.force)? {
            Claim::Acquired { token, .. } => token,
            Claim::AlreadySuccess(rec) => {
                tracing::info!("already ingested, skipping");
                return Ok(IngestReport::skipped(&rec, &spec.name));
            }
            Claim::Busy { owner, expires_at } => {
                tracing::warn!(%owner, %expires_at, "file claimed by another worker");
                return Err(IngestError::InProgress {
                    file_id,
                    owner,
                    expires_at,
                });
            }
        };

        let result = self.run_claimed(file_id, meta, spec, parser, opts);
        match self.manifest.release(token) {
            Ok(true) => {}
            Ok(false) => tracing::warn!("claim lapsed before the run finished"),
            Err(e) => tracing::warn!(error = %format!("{e:#}"), "could not release claim"),
        }
        result
    }

    fn run_claimed(
        &self,
        file_id: i64,
        meta: &BronzeFileMetadata,
        spec: &TableSpec,
        parser: &dyn ParserAdapter,
        opts: IngestOptions,
    ) -> Result<IngestReport, IngestError> {
        let dim = self.dimension.snapshot();
        let staged = match self.stage(file_id, meta, spec, parser, &dim) {
            Ok(staged) => staged,
            Err(FileFailure::Contract(e)) => {
                let reason = e.to_string();
                self.record_failure(file_id, meta, spec, &reason, opts)?;
                return Ok(IngestReport::failed(file_id, &spec.name, reason));
            }
            Err(FileFailure::Config(e)) => {
                self.record_failure(file_id, meta, spec, &e.to_string(), opts)?;
                return Err(IngestError::Config(e));
            }
        };

        check_conservation(&staged)?;

        match self.commit(file_id, meta, spec, &staged, opts) {
            Ok(report) => Ok(report),
            Err(e) => {
                if let Some(RepoError::SuccessOverwrite { .. }) = e.downcast_ref::<RepoError>() {
                    // Another worker recorded success after our claim lapsed; its output is
                    // identical to ours.
                    let rec = self
                        .manifest
                        .get(file_id)?
                        .ok_or_else(|| anyhow!("file_id {file_id} vanished"))?;
                    tracing::info!("completed concurrently by another worker");
                    return Ok(IngestReport::skipped(&rec, &spec.name));
                }
                tracing::error!(error = %format!("{e:#}"), "ingestion aborted");
                self.purge_unrecorded(file_id, spec);
                Err(IngestError::Infrastructure(e))
            }
        }
    }

    /// Ingest every candidate that is not yet `success` (every candidate when forced),
    /// one file at a time, in input order.
    pub fn ingest_pending(
        &self,
        candidates: &[BronzeFileMetadata],
        opts: IngestOptions,
    ) -> anyhow::Result<Vec<FileOutcome>> {
        let todo = if opts.force {
            candidates.to_vec()
        } else {
            self.manifest.filter_pending(candidates)?
        };
        tracing::info!(candidates = candidates.len(), pending = todo.len(), "batch ingestion");

        Ok(todo
            .into_iter()
            .map(|meta| {
                let result = self.ingest_file(&meta, opts);
                FileOutcome { meta, result }
            })
            .collect())
    }

    fn stage(
        &self,
        file_id: i64,
        meta: &BronzeFileMetadata,
        spec: &TableSpec,
        parser: &dyn ParserAdapter,
        dim: &SymbolDimension,
    ) -> Result<Staged, FileFailure> {
        let frame = parser
            .parse(meta)
            .map_err(|e| FileFailure::Contract(ContractError::Parser(e.to_string())))?;
        let rows = frame::conform(frame, spec).map_err(FileFailure::Contract)?;
        let rows_total = rows.len() as u64;

        let sequenced = lineage::assign(file_id, rows, spec);
        let checked = validate::validate(sequenced, spec, &self.calendar).map_err(FileFailure::Config)?;
        let resolution = pit::resolve(checked.accepted, dim, spec);

        let mut rejected = checked.rejected;
        rejected.extend(resolution.quarantined);
        rejected.sort_by_key(|r| r.row.file_seq);

        Ok(Staged {
            rows_total,
            resolved: resolution.resolved,
            rejected,
        })
    }

    fn commit(
        &self,
        file_id: i64,
        meta: &BronzeFileMetadata,
        spec: &TableSpec,
        staged: &Staged,
        opts: IngestOptions,
    ) -> anyhow::Result<IngestReport> {
        let partitions = if staged.resolved.is_empty() {
            self.events.purge_file(&spec.name, file_id)?;
            Vec::new()
        } else {
            self.events.append(&spec.name, &staged.resolved)?.partitions
        };

        let mut by_reason: BTreeMap<QuarantineReason, Vec<QuarantineRow>> = BTreeMap::new();
        for r in &staged.rejected {
            by_reason.entry(r.reason).or_default().push(r.to_quarantine_row(spec));
        }
        self.quarantine.replace_file(&spec.name, file_id, &by_reason)?;

        let rows_written = staged.resolved.len() as u64;
        let rows_quarantined = staged.rejected.len() as u64;
        let quarantined_by_reason: BTreeMap<QuarantineReason, u64> = by_reason
            .iter()
            .map(|(reason, rows)| (*reason, rows.len() as u64))
            .collect();

        let status = if staged.rows_total > 0 && rows_written == 0 {
            ManifestStatus::Quarantined
        } else {
            ManifestStatus::Success
        };
        let reason = (status == ManifestStatus::Quarantined).then(|| {
            let parts: Vec<String> = quarantined_by_reason
                .iter()
                .map(|(r, n)| format!("{r}={n}"))
                .collect();
            format!("all {rows_quarantined} rows quarantined ({})", parts.join(", "))
        });

        let result = RunResult {
            rows_total: staged.rows_total,
            rows_written,
            rows_quarantined,
            trading_date_min: staged.resolved.iter().map(|r| r.trading_date).min(),
            trading_date_max: staged.resolved.iter().map(|r| r.trading_date).max(),
            reason,
        };
        let rec = self
            .manifest
            .update_status(file_id, status, meta, &result, opts.force)?;

        if rows_quarantined > 0 {
            tracing::warn!(
                rows_quarantined,
                reasons = ?quarantined_by_reason,
                "rows quarantined"
            );
        }
        tracing::info!(
            status = %rec.status,
            rows_total = rec.rows_total,
            rows_written = rec.rows_written,
            rows_quarantined = rec.rows_quarantined,
            partitions = partitions.len(),
            "file ingested"
        );

        Ok(IngestReport {
            file_id,
            table: spec.name.clone(),
            status: rec.status,
            skipped: false,
            rows_total: rec.rows_total,
            rows_written: rec.rows_written,
            rows_quarantined: rec.rows_quarantined,
            quarantined_by_reason,
            trading_date_min: rec.trading_date_min,
            trading_date_max: rec.trading_date_max,
            partitions,
            status_reason: rec.status_reason,
        })
    }

    // A failed run leaves no rows behind, including rows of an earlier run.
    fn record_failure(
        &self,
        file_id: i64,
        meta: &BronzeFileMetadata,
        spec: &TableSpec,
        reason: &str,
        opts: IngestOptions,
    ) -> anyhow::Result<()> {
        tracing::warn!(reason, "file failed");
        self.events.purge_file(&spec.name, file_id)?;
        self.quarantine.purge_file(&spec.name, file_id)?;
        self.manifest.update_status(
            file_id,
            ManifestStatus::Failed,
            meta,
            &RunResult::failed(reason),
            opts.force,
        )?;
        Ok(())
    }

    /// Purge partial output after an infrastructure failure, unless the manifest says
    /// `success`: then the stores hold output the manifest accounts for.
    fn purge_unrecorded(&self, file_id: i64, spec: &TableSpec) {
        match self.manifest.get(file_id) {
            Ok(Some(rec)) if rec.status == ManifestStatus::Success => {
                tracing::warn!("manifest says success; keeping stored output");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "manifest unreadable; keeping stored output");
                return;
            }
        }
        if let Err(e) = self.events.purge_file(&spec.name, file_id) {
            tracing::warn!(error = %format!("{e:#}"), "could not purge partial event output");
        }
        if let Err(e) = self.quarantine.purge_file(&spec.name, file_id) {
            tracing::warn!(error = %format!("{e:#}"), "could not purge partial quarantine output");
        }
    }
}

/// Every `file_seq` in `0..rows_total` appears exactly once across resolved and rejected rows.
fn check_conservation(staged: &Staged) -> anyhow::Result<()> {
    let written: RoaringTreemap = staged.resolved.iter().map(|r| r.file_seq as u64).collect();
    let quarantined: RoaringTreemap = staged.rejected.iter().map(|r| r.row.file_seq as u64).collect();

    let duplicates = written.len() != staged.resolved.len() as u64
        || quarantined.len() != staged.rejected.len() as u64
        || !written.is_disjoint(&quarantined);
    let all = &written | &quarantined;
    let complete = all.len() == staged.rows_total
        && (staged.rows_total == 0 || all.max() == Some(staged.rows_total - 1));

    if duplicates || !complete {
        return Err(RepoError::ConservationViolated {
            total: staged.rows_total,
            written: staged.resolved.len() as u64,
            quarantined: staged.rejected.len() as u64,
        }
        .into());
    }
    Ok(())
}
