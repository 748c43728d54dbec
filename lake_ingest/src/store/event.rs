//! Parquet event store.
//!
//! Layout (Hive-style):
//! ```text
//! <root>/<table>/exchange=<exchange>/trading_date=<YYYY-MM-DD>/file_id=<file_id>.parquet
//! ```
//! Each bronze file owns exactly one Parquet file per partition it touches, so writers of
//! different files never contend, and a re-ingest of the same file replaces its own output
//! and nothing else.
//!
//! Append protocol for one `file_id`:
//! 1. validate every row against the table spec;
//! 2. write each partition to a hidden temp file inside the partition directory;
//! 3. rename every temp file onto its final name, moving the file it replaces to a hidden backup;
//! 4. move files of this `file_id` in partitions the new run no longer produces to backups;
//! 5. delete the backups.
//!
//! A failure in 1 or 2 leaves the previous output untouched. A failure in 3 or 4 undoes the
//! renames already done, so the file's previous partitions come back. Readers skip hidden
//! files; a reader listing a partition while step 3 runs can see some partitions already new.
//! Rows inside a file are stored in `file_seq` order.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use indexmap::IndexMap;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::frame::Value;
use crate::registry::{
    COL_EXCHANGE, COL_FILE_ID, COL_FILE_SEQ, COL_SYMBOL, COL_SYMBOL_ID, COL_TS_EVENT_US, DType,
    SchemaRegistry, TableSpec,
};
use crate::rows::CanonicalEventRow;
use crate::store::{AppendSummary, EventSink, PartitionKey, StoreError};
use crate::tz;

const EXCHANGE_PREFIX: &str = "exchange=";
const DATE_PREFIX: &str = "trading_date=";
const FILE_PREFIX: &str = "file_id=";
const FILE_SUFFIX: &str = ".parquet";

/// Whether `exchange` can be used verbatim as a partition directory value.
pub fn is_valid_partition_value(exchange: &str) -> bool {
    !exchange.is_empty()
        && !exchange.starts_with('.')
        && !exchange.contains(['/', '\\', '=', '\0'])
}

/// Arrow schema of an event table: contract columns, then `symbol_id`, `file_id`, `file_seq`.
/// `trading_date` lives in the path only.
pub fn arrow_schema(spec: &TableSpec) -> SchemaRef {
    let mut fields: Vec<Field> = spec
        .columns
        .iter()
        .map(|(name, c)| Field::new(name, c.dtype.arrow_type(), c.nullable))
        .collect();
    for name in [COL_SYMBOL_ID, COL_FILE_ID, COL_FILE_SEQ] {
        fields.push(Field::new(name, DataType::Int64, false));
    }
    Arc::new(Schema::new(fields))
}

/// Event tables under one lake root.
#[derive(Debug, Clone)]
pub struct ParquetEventStore {
    root: PathBuf,
    registry: Arc<SchemaRegistry>,
}

impl ParquetEventStore {
    /// Store rooted at `root`, writing tables declared in `registry`.
    pub fn new(root: impl Into<PathBuf>, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            root: root.into(),
            registry,
        }
    }

    /// Lake root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<table>/exchange=<ex>/trading_date=<date>`
    pub fn partition_dir(&self, table: &str, key: &PartitionKey) -> PathBuf {
        self.root
            .join(table)
            .join(format!("{EXCHANGE_PREFIX}{}", key.exchange))
            .join(format!("{DATE_PREFIX}{}", tz::format_date(key.trading_date)))
    }

    fn file_name(file_id: i64) -> String {
        format!("{FILE_PREFIX}{file_id}{FILE_SUFFIX}")
    }

    fn spec(&self, table: &str) -> anyhow::Result<&TableSpec> {
        Ok(self.registry.get(table)?)
    }

    /// Partitions of `table` holding at least one data file, sorted.
    pub fn partitions(&self, table: &str) -> anyhow::Result<Vec<PartitionKey>> {
        let mut out: Vec<PartitionKey> = self
            .scan(table)?
            .into_iter()
            .map(|(key, _, _)| key)
            .collect();
        out.dedup();
        Ok(out)
    }

    /// Every `(partition, file_id, path)` of `table`, sorted by partition then file_id.
    fn scan(&self, table: &str) -> anyhow::Result<Vec<(PartitionKey, i64, PathBuf)>> {
        let table_dir = self.root.join(table);
        let mut out = Vec::new();
        for (ex_name, ex_path) in list_dir(&table_dir)? {
            let Some(exchange) = ex_name.strip_prefix(EXCHANGE_PREFIX) else {
                continue;
            };
            for (date_name, date_path) in list_dir(&ex_path)? {
                let Some(date) = date_name.strip_prefix(DATE_PREFIX) else {
                    continue;
                };
                let trading_date = tz::parse_date(date)
                    .with_context(|| format!("bad partition {}", date_path.display()))?;
                for (file_name, file_path) in list_dir(&date_path)? {
                    let Some(file_id) = file_name
                        .strip_prefix(FILE_PREFIX)
                        .and_then(|s| s.strip_suffix(FILE_SUFFIX))
                        .and_then(|s| s.parse::<i64>().ok())
                    else {
                        continue;
                    };
                    let key = PartitionKey {
                        exchange: exchange.to_string(),
                        trading_date,
                    };
                    out.push((key, file_id, file_path));
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Rows of one bronze file, in `file_seq` order.
    pub fn read_file(&self, table: &str, file_id: i64) -> anyhow::Result<Vec<CanonicalEventRow>> {
        let spec = self.spec(table)?;
        let mut rows = Vec::new();
        for (key, fid, path) in self.scan(table)? {
            if fid == file_id {
                rows.extend(read_parquet(spec, key.trading_date, &path)?);
            }
        }
        rows.sort_by_key(|r| r.file_seq);
        Ok(rows)
    }

    /// Rows of one partition, ordered by `(file_id, file_seq)`.
    pub fn read_partition(&self, table: &str, key: &PartitionKey) -> anyhow::Result<Vec<CanonicalEventRow>> {
        let spec = self.spec(table)?;
        let mut rows = Vec::new();
        for (k, _, path) in self.scan(table)? {
            if &k == key {
                rows.extend(read_parquet(spec, key.trading_date, &path)?);
            }
        }
        rows.sort_by_key(|r| (r.file_id, r.file_seq));
        Ok(rows)
    }

    fn write_file_id(
        &self,
        spec: &TableSpec,
        file_id: i64,
        rows: &[&CanonicalEventRow],
        journal: &mut PublishJournal,
    ) -> anyhow::Result<Vec<PartitionKey>> {
        let mut by_partition: BTreeMap<PartitionKey, Vec<&CanonicalEventRow>> = BTreeMap::new();
        for r in rows {
            by_partition
                .entry(PartitionKey {
                    exchange: r.exchange.clone(),
                    trading_date: r.trading_date,
                })
                .or_default()
                .push(r);
        }

        let schema = arrow_schema(spec);
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_created_by(format!("lake_ingest {}", env!("CARGO_PKG_VERSION")))
            .build();

        // Stage everything before touching any final name.
        let mut staged = Vec::with_capacity(by_partition.len());
        for (key, mut part_rows) in by_partition {
            part_rows.sort_by_key(|r| r.file_seq);
            let dir = self.partition_dir(&spec.name, &key);
            fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

            let batch = build_batch(spec, schema.clone(), &part_rows)?;
            let mut tmp = tempfile::Builder::new()
                .prefix(&format!(".{}", Self::file_name(file_id)))
                .suffix(".tmp")
                .tempfile_in(&dir)
                .with_context(|| format!("stage in {}", dir.display()))?;
            let mut writer = ArrowWriter::try_new(&mut tmp, schema.clone(), Some(props.clone()))?;
            writer.write(&batch)?;
            writer.close()?;
            tmp.as_file().sync_all()?;

            staged.push((key, tmp, dir.join(Self::file_name(file_id))));
        }

        self.publish(&spec.name, file_id, staged, journal)
    }

    /// Rename staged files onto their final names, then set aside this file's partitions the
    /// new output no longer covers. Every step is recorded in `journal`.
    fn publish(
        &self,
        table: &str,
        file_id: i64,
        staged: Vec<(PartitionKey, tempfile::NamedTempFile, PathBuf)>,
        journal: &mut PublishJournal,
    ) -> anyhow::Result<Vec<PartitionKey>> {
        let mut written = Vec::with_capacity(staged.len());
        for (key, tmp, target) in staged {
            if target.is_file() {
                journal.set_aside(&target)?;
            }
            tmp.persist(&target)
                .with_context(|| format!("publish {}", target.display()))?;
            journal.published.push(target);
            written.push(key);
        }

        let keep: HashSet<&PartitionKey> = written.iter().collect();
        for (key, fid, path) in self.scan(table)? {
            if fid == file_id && !keep.contains(&key) {
                journal.set_aside(&path)?;
                tracing::debug!(file_id, path = %path.display(), "retired stale partition file");
            }
        }
        Ok(written)
    }
}

/// Renames done while publishing one file's output.
///
/// Replaced and stale files are moved to hidden `.prev` names rather than deleted, so a
/// failure part way through can put every partition back as it was.
#[derive(Debug, Default)]
struct PublishJournal {
    /// New files now under their final name.
    published: Vec<PathBuf>,
    /// `(original, hidden backup)` pairs.
    set_aside: Vec<(PathBuf, PathBuf)>,
}

impl PublishJournal {
    fn set_aside(&mut self, path: &Path) -> anyhow::Result<()> {
        let name = path
            .file_name()
            .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
        let backup = path.with_file_name(format!(".{}.prev", name.to_string_lossy()));
        fs::rename(path, &backup).with_context(|| format!("set aside {}", path.display()))?;
        self.set_aside.push((path.to_path_buf(), backup));
        Ok(())
    }

    /// Drop the backups; the new output stays.
    fn commit(self) {
        for (_, backup) in &self.set_aside {
            if let Err(e) = fs::remove_file(backup) {
                tracing::warn!(path = %backup.display(), error = %e, "could not remove backup");
            }
        }
    }

    /// Undo in reverse order: remove new files, then restore backups.
    fn rollback(self) {
        for path in self.published.iter().rev() {
            if let Err(e) = fs::remove_file(path) {
                tracing::error!(path = %path.display(), error = %e, "rollback: could not remove published file");
            }
        }
        for (path, backup) in self.set_aside.iter().rev() {
            if let Err(e) = fs::rename(backup, path) {
                tracing::error!(path = %path.display(), error = %e, "rollback: could not restore file");
            }
        }
        if !self.published.is_empty() || !self.set_aside.is_empty() {
            tracing::warn!(
                published = self.published.len(),
                restored = self.set_aside.len(),
                "partition publish rolled back"
            );
        }
    }
}

impl EventSink for ParquetEventStore {
    fn append(&self, table_name: &str, rows: &[CanonicalEventRow]) -> anyhow::Result<AppendSummary> {
        let spec = self.spec(table_name)?;
        for r in rows {
            validate_row(spec, r)?;
        }

        let mut by_file: BTreeMap<i64, Vec<&CanonicalEventRow>> = BTreeMap::new();
        for r in rows {
            by_file.entry(r.file_id).or_default().push(r);
        }

        let mut summary = AppendSummary::default();
        let mut journal = PublishJournal::default();
        for (file_id, file_rows) in by_file {
            match self.write_file_id(spec, file_id, &file_rows, &mut journal) {
                Ok(partitions) => summary.partitions.extend(partitions),
                Err(e) => {
                    journal.rollback();
                    return Err(e);
                }
            }
            summary.rows += file_rows.len() as u64;
        }
        journal.commit();
        summary.partitions.sort();
        summary.partitions.dedup();

        tracing::debug!(
            table = table_name,
            rows = summary.rows,
            partitions = summary.partitions.len(),
            "event rows written"
        );
        Ok(summary)
    }

    fn purge_file(&self, table_name: &str, file_id: i64) -> anyhow::Result<usize> {
        self.spec(table_name)?;
        let mut removed = 0;
        for (_, fid, path) in self.scan(table_name)? {
            if fid == file_id {
                fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Check one row against the table before anything is written.
pub fn validate_row(spec: &TableSpec, row: &CanonicalEventRow) -> Result<(), StoreError> {
    if !is_valid_partition_value(&row.exchange) {
        return Err(StoreError::TypeMismatch {
            table: spec.name.clone(),
            file_seq: row.file_seq,
            column: COL_EXCHANGE.into(),
            expected: DType::Utf8,
        });
    }

    for (name, col) in spec.payload_columns() {
        let value = row.payload.get(name).ok_or_else(|| StoreError::MissingColumn {
            table: spec.name.clone(),
            file_seq: row.file_seq,
            column: name.clone(),
        })?;
        match value.dtype() {
            None if !col.nullable => {
                return Err(StoreError::NullViolation {
                    table: spec.name.clone(),
                    file_seq: row.file_seq,
                    column: name.clone(),
                });
            }
            Some(found) if found != col.dtype => {
                return Err(StoreError::TypeMismatch {
                    table: spec.name.clone(),
                    file_seq: row.file_seq,
                    column: name.clone(),
                    expected: col.dtype,
                });
            }
            _ => {}
        }
    }

    if let Some(extra) = row.payload.keys().find(|k| !spec.columns.contains_key(k.as_str())) {
        return Err(StoreError::UnknownColumn {
            table: spec.name.clone(),
            file_seq: row.file_seq,
            column: extra.clone(),
        });
    }
    Ok(())
}

fn list_dir(dir: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("list {}", dir.display())),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        out.push((name, entry.path()));
    }
    out.sort();
    Ok(out)
}

fn value_array<'a>(dtype: DType, values: impl Iterator<Item = &'a Value>) -> ArrayRef {
    match dtype {
        DType::Int64 => Arc::new(values.map(Value::as_i64).collect::<Int64Array>()),
        DType::Float64 => Arc::new(values.map(Value::as_f64).collect::<Float64Array>()),
        DType::Utf8 => Arc::new(values.map(Value::as_str).collect::<StringArray>()),
        DType::Bool => Arc::new(values.map(Value::as_bool).collect::<BooleanArray>()),
    }
}

fn build_batch(
    spec: &TableSpec,
    schema: SchemaRef,
    rows: &[&CanonicalEventRow],
) -> anyhow::Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for (name, col) in &spec.columns {
        let array: ArrayRef = match name.as_str() {
            COL_EXCHANGE => Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.exchange))),
            COL_SYMBOL => Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.symbol))),
            COL_TS_EVENT_US => Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.ts_event_us))),
            _ => value_array(
                col.dtype,
                rows.iter().map(|r| r.payload.get(name).unwrap_or(&Value::Null)),
            ),
        };
        columns.push(array);
    }
    columns.push(Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.symbol_id))));
    columns.push(Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.file_id))));
    columns.push(Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.file_seq))));

    RecordBatch::try_new(schema, columns).context("assemble record batch")
}

fn read_parquet(spec: &TableSpec, trading_date: NaiveDate, path: &Path) -> anyhow::Result<Vec<CanonicalEventRow>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("read parquet metadata {}", path.display()))?
        .build()?;

    let mut out = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("decode {}", path.display()))?;
        let exchange = typed::<StringArray>(&batch, COL_EXCHANGE)?;
        let symbol = typed::<StringArray>(&batch, COL_SYMBOL)?;
        let ts = typed::<Int64Array>(&batch, COL_TS_EVENT_US)?;
        let symbol_id = typed::<Int64Array>(&batch, COL_SYMBOL_ID)?;
        let file_id = typed::<Int64Array>(&batch, COL_FILE_ID)?;
        let file_seq = typed::<Int64Array>(&batch, COL_FILE_SEQ)?;

        let payload_cols: Vec<(&String, DType, &ArrayRef)> = spec
            .payload_columns()
            .map(|(name, c)| {
                batch
                    .column_by_name(name)
                    .map(|a| (name, c.dtype, a))
                    .ok_or_else(|| anyhow!("{} lacks column '{name}'", path.display()))
            })
            .collect::<anyhow::Result<_>>()?;

        for i in 0..batch.num_rows() {
            let mut payload = IndexMap::with_capacity(payload_cols.len());
            for (name, dtype, array) in &payload_cols {
                payload.insert((*name).clone(), cell(*dtype, array, i)?);
            }
            out.push(CanonicalEventRow {
                exchange: exchange.value(i).to_string(),
                symbol: symbol.value(i).to_string(),
                ts_event_us: ts.value(i),
                trading_date,
                symbol_id: symbol_id.value(i),
                file_id: file_id.value(i),
                file_seq: file_seq.value(i),
                payload,
            });
        }
    }
    Ok(out)
}

fn typed<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("missing column '{name}'"))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("column '{name}' has unexpected type"))
}

fn cell(dtype: DType, array: &ArrayRef, i: usize) -> anyhow::Result<Value> {
    if array.is_null(i) {
        return Ok(Value::Null);
    }
    let any = array.as_any();
    let v = match dtype {
        DType::Int64 => any.downcast_ref::<Int64Array>().map(|a| Value::Int(a.value(i))),
        DType::Float64 => any.downcast_ref::<Float64Array>().map(|a| Value::Float(a.value(i))),
        DType::Utf8 => any.downcast_ref::<StringArray>().map(|a| Value::Str(a.value(i).to_string())),
        DType::Bool => any.downcast_ref::<BooleanArray>().map(|a| Value::Bool(a.value(i))),
    };
    match v {
        Some(v) => Ok(v),
        None => bail!("column type {} does not match declared {dtype}", array.data_type()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ParquetEventStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetEventStore::new(dir.path(), Arc::new(SchemaRegistry::builtin()));
        (dir, store)
    }

    fn trade(file_id: i64, seq: i64, exchange: &str, day: u32, price: f64) -> CanonicalEventRow {
        CanonicalEventRow {
            exchange: exchange.into(),
            symbol: "BTCUSDT".into(),
            ts_event_us: 1_000 + seq,
            trading_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            symbol_id: 7,
            file_id,
            file_seq: seq,
            payload: IndexMap::from([
                ("price".to_string(), Value::Float(price)),
                ("size".to_string(), Value::Float(0.5)),
                ("side".to_string(), Value::Null),
                ("trade_id".to_string(), Value::from(format!("t{seq}"))),
            ]),
        }
    }

    #[test]
    fn writes_hive_layout_and_reads_back_in_seq_order() {
        let (dir, store) = store();
        let rows = vec![
            trade(1, 2, "binance", 16, 3.0),
            trade(1, 0, "binance", 15, 1.0),
            trade(1, 1, "binance", 16, 2.0),
        ];
        let summary = store.append("trades", &rows).unwrap();
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.partitions.len(), 2);

        assert!(dir
            .path()
            .join("trades/exchange=binance/trading_date=2024-01-16/file_id=1.parquet")
            .is_file());

        let back = store.read_file("trades", 1).unwrap();
        assert_eq!(back.iter().map(|r| r.file_seq).collect::<Vec<_>>(), [0, 1, 2]);
        assert_eq!(back[0], rows[1]);
        assert_eq!(back[2], rows[0]);
    }

    #[test]
    fn rewrite_drops_stale_partitions_of_the_same_file_only() {
        let (_dir, store) = store();
        store
            .append("trades", &[trade(1, 0, "binance", 15, 1.0), trade(1, 1, "binance", 16, 1.0)])
            .unwrap();
        store.append("trades", &[trade(2, 0, "binance", 16, 9.0)]).unwrap();

        store.append("trades", &[trade(1, 0, "binance", 15, 1.0)]).unwrap();

        assert_eq!(store.read_file("trades", 1).unwrap().len(), 1);
        let key = PartitionKey {
            exchange: "binance".into(),
            trading_date: NaiveDate::from_ymd_opt(2024, 1, 16).unwrap(),
        };
        let part = store.read_partition("trades", &key).unwrap();
        assert_eq!(part.iter().map(|r| r.file_id).collect::<Vec<_>>(), [2]);

        assert_eq!(store.purge_file("trades", 1).unwrap(), 1);
        assert_eq!(store.partitions("trades").unwrap(), vec![key]);
    }

    #[test]
    fn invalid_rows_write_nothing() {
        let (dir, store) = store();
        let good = trade(1, 0, "binance", 15, 1.0);
        let mut bad = trade(1, 1, "binance", 15, 1.0);
        bad.payload.insert("price".into(), Value::Null);

        let err = store.append("trades", &[good, bad]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::NullViolation {
                table: "trades".into(),
                file_seq: 1,
                column: "price".into(),
            })
        );
        assert!(!dir.path().join("trades").exists());

        let mut extra = trade(1, 0, "binance", 15, 1.0);
        extra.payload.insert("venue_flag".into(), Value::Bool(true));
        assert!(store.append("trades", &[extra]).is_err());
        assert!(store.append("no_such_table", &[]).is_err());
    }

    fn hidden_entries(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect()
    }

    #[test]
    fn failed_publish_restores_previous_partitions() {
        let (_dir, store) = store();
        store
            .append("trades", &[trade(1, 0, "binance", 14, 1.0), trade(1, 1, "binance", 15, 1.0)])
            .unwrap();
        let day = |d: u32| PartitionKey {
            exchange: "binance".into(),
            trading_date: NaiveDate::from_ymd_opt(2024, 1, d).unwrap(),
        };
        let day14 = store.partition_dir("trades", &day(14));
        let day15 = store.partition_dir("trades", &day(15));
        let day16 = store.partition_dir("trades", &day(16));
        let before = fs::read(day15.join("file_id=1.parquet")).unwrap();

        // A directory squatting on the day-16 target makes the second rename fail,
        // after day 15 has already been replaced.
        fs::create_dir_all(day16.join("file_id=1.parquet")).unwrap();
        fs::write(day16.join("file_id=1.parquet/keep"), b"x").unwrap();

        let rerun = [trade(1, 0, "binance", 15, 2.0), trade(1, 1, "binance", 16, 2.0)];
        assert!(store.append("trades", &rerun).is_err());

        assert_eq!(fs::read(day15.join("file_id=1.parquet")).unwrap(), before);
        assert!(day14.join("file_id=1.parquet").is_file());
        assert!(hidden_entries(&day14).is_empty());
        assert!(hidden_entries(&day15).is_empty());
        assert!(hidden_entries(&day16).is_empty());
    }

    #[test]
    fn successful_rewrite_leaves_no_backups() {
        let (_dir, store) = store();
        store
            .append("trades", &[trade(1, 0, "binance", 14, 1.0), trade(1, 1, "binance", 15, 1.0)])
            .unwrap();
        store.append("trades", &[trade(1, 0, "binance", 15, 2.0)]).unwrap();

        let dir15 = store.partition_dir(
            "trades",
            &PartitionKey {
                exchange: "binance".into(),
                trading_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            },
        );
        assert!(hidden_entries(&dir15).is_empty());
        let back = store.read_file("trades", 1).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].payload["price"], Value::Float(2.0));
        assert_eq!(store.partitions("trades").unwrap().len(), 1);
    }

    #[test]
    fn partition_values_are_path_safe() {
        assert!(is_valid_partition_value("binance-futures"));
        assert!(!is_valid_partition_value("../etc"));
        assert!(!is_valid_partition_value("a/b"));
        assert!(!is_valid_partition_value("a=b"));
        assert!(!is_valid_partition_value(""));
    }
}
