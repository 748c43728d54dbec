//! Symbol dimension: SCD Type 2 windows mapping exchange symbols to `symbol_id`.
//!
//! Each [`SymbolDimensionRow`] covers the half-open interval
//! `[valid_from_ts_us, valid_until_ts_us)`. The current window of a listing carries
//! [`VALID_UNTIL_MAX`]. Windows for one `(exchange, exchange_symbol)` are not supposed to
//! overlap; when they do, lookups report every match and the resolver quarantines the row.
//!
//! The dimension is loaded once per run and shared read-only through a
//! [`DimensionHandle`]. Swapping in a new snapshot never affects a run that already holds
//! the previous one.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use arc_swap::ArcSwap;
use arrow::array::{Array, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};

/// Sentinel `valid_until_ts_us` for open-ended (current) windows.
pub const VALID_UNTIL_MAX: i64 = i64::MAX;

/// One version of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolDimensionRow {
    /// Stable instrument surrogate.
    pub symbol_id: i64,
    /// Exchange code.
    pub exchange: String,
    /// Symbol as the exchange publishes it.
    pub exchange_symbol: String,
    /// Inclusive start, UTC micros.
    pub valid_from_ts_us: i64,
    /// Exclusive end, UTC micros.
    pub valid_until_ts_us: i64,
    /// Base asset, when known.
    #[serde(default)]
    pub base_asset: Option<String>,
    /// Quote asset, when known.
    #[serde(default)]
    pub quote_asset: Option<String>,
    /// Tick size, when known.
    #[serde(default)]
    pub tick_size: Option<f64>,
}

impl SymbolDimensionRow {
    /// `valid_from <= ts < valid_until`
    pub fn contains(&self, ts_us: i64) -> bool {
        self.valid_from_ts_us <= ts_us && ts_us < self.valid_until_ts_us
    }

    /// Whether this is the open-ended current window.
    pub fn is_current(&self) -> bool {
        self.valid_until_ts_us == VALID_UNTIL_MAX
    }
}

/// Result of a point-in-time lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowMatch<'a> {
    /// Exactly one window covers the timestamp.
    One(&'a SymbolDimensionRow),
    /// Nothing covers it.
    None,
    /// Several windows cover it.
    Many(Vec<&'a SymbolDimensionRow>),
}

#[derive(Debug, Default)]
struct KeyWindows {
    // Sorted by (valid_from, valid_until, symbol_id).
    windows: Vec<SymbolDimensionRow>,
    overlapping: bool,
}

impl KeyWindows {
    fn seal(&mut self) {
        self.windows.sort_by(|a, b| {
            (a.valid_from_ts_us, a.valid_until_ts_us, a.symbol_id).cmp(&(
                b.valid_from_ts_us,
                b.valid_until_ts_us,
                b.symbol_id,
            ))
        });
        let mut reach = i64::MIN;
        self.overlapping = false;
        for w in &self.windows {
            if w.valid_from_ts_us < reach {
                self.overlapping = true;
                break;
            }
            reach = reach.max(w.valid_until_ts_us);
        }
    }

    fn lookup(&self, ts_us: i64) -> WindowMatch<'_> {
        if self.overlapping {
            let hits: Vec<_> = self.windows.iter().filter(|w| w.contains(ts_us)).collect();
            return match hits.len() {
                0 => WindowMatch::None,
                1 => WindowMatch::One(hits[0]),
                _ => WindowMatch::Many(hits),
            };
        }
        // Disjoint windows: the candidate is the last one starting at or before ts.
        let idx = self.windows.partition_point(|w| w.valid_from_ts_us <= ts_us);
        match idx.checked_sub(1).map(|i| &self.windows[i]) {
            Some(w) if w.contains(ts_us) => WindowMatch::One(w),
            _ => WindowMatch::None,
        }
    }
}

/// Indexed, immutable snapshot of the symbol dimension.
#[derive(Debug, Default)]
pub struct SymbolDimension {
    // exchange -> exchange_symbol -> windows
    by_key: HashMap<String, HashMap<String, KeyWindows>>,
    len: usize,
}

impl SymbolDimension {
    /// Index `rows`. Empty or inverted windows can never match and are dropped.
    pub fn from_rows(rows: impl IntoIterator<Item = SymbolDimensionRow>) -> Self {
        let mut by_key: HashMap<String, HashMap<String, KeyWindows>> = HashMap::new();
        let mut len = 0;
        for row in rows {
            if row.valid_from_ts_us >= row.valid_until_ts_us {
                tracing::warn!(
                    symbol_id = row.symbol_id,
                    exchange = %row.exchange,
                    symbol = %row.exchange_symbol,
                    "dropping empty symbol window"
                );
                continue;
            }
            by_key
                .entry(row.exchange.clone())
                .or_default()
                .entry(row.exchange_symbol.clone())
                .or_default()
                .windows
                .push(row);
            len += 1;
        }
        for (exchange, symbols) in by_key.iter_mut() {
            for (symbol, kw) in symbols.iter_mut() {
                kw.seal();
                if kw.overlapping {
                    tracing::warn!(%exchange, %symbol, "overlapping symbol windows");
                }
            }
        }
        Self { by_key, len }
    }

    /// Windows covering `(exchange, exchange_symbol, ts_us)`.
    pub fn lookup(&self, exchange: &str, exchange_symbol: &str, ts_us: i64) -> WindowMatch<'_> {
        match self.by_key.get(exchange).and_then(|m| m.get(exchange_symbol)) {
            Some(kw) => kw.lookup(ts_us),
            None => WindowMatch::None,
        }
    }

    /// Number of indexed windows.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the dimension has no windows.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Keys whose windows overlap, sorted.
    pub fn overlapping_keys(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self
            .by_key
            .iter()
            .flat_map(|(ex, symbols)| {
                symbols
                    .iter()
                    .filter(|(_, kw)| kw.overlapping)
                    .map(move |(sym, _)| (ex.clone(), sym.clone()))
            })
            .collect();
        keys.sort();
        keys
    }

    /// Load from a Parquet file with the [`SymbolDimensionRow`] columns.
    ///
    /// `base_asset`, `quote_asset` and `tick_size` are optional columns.
    pub fn load_parquet(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .with_context(|| format!("read parquet metadata {}", path.display()))?
            .build()?;

        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch.with_context(|| format!("decode {}", path.display()))?;
            rows.extend(rows_from_batch(&batch)?);
        }
        let dim = Self::from_rows(rows);
        tracing::info!(path = %path.display(), windows = dim.len(), "symbol dimension loaded");
        Ok(dim)
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<Option<&'a T>> {
    match batch.column_by_name(name) {
        None => Ok(None),
        Some(col) => col
            .as_any()
            .downcast_ref::<T>()
            .map(Some)
            .ok_or_else(|| anyhow!("column '{name}' has unexpected type {}", col.data_type())),
    }
}

fn required<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a T> {
    column(batch, name)?.ok_or_else(|| anyhow!("symbol dimension is missing column '{name}'"))
}

fn rows_from_batch(batch: &RecordBatch) -> anyhow::Result<Vec<SymbolDimensionRow>> {
    let symbol_id = required::<Int64Array>(batch, "symbol_id")?;
    let exchange = required::<StringArray>(batch, "exchange")?;
    let exchange_symbol = required::<StringArray>(batch, "exchange_symbol")?;
    let valid_from = required::<Int64Array>(batch, "valid_from_ts_us")?;
    let valid_until = required::<Int64Array>(batch, "valid_until_ts_us")?;
    let base = column::<StringArray>(batch, "base_asset")?;
    let quote = column::<StringArray>(batch, "quote_asset")?;
    let tick = column::<Float64Array>(batch, "tick_size")?;

    let opt_str = |a: Option<&StringArray>, i: usize| {
        a.filter(|a| !a.is_null(i)).map(|a| a.value(i).to_string())
    };

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        if symbol_id.is_null(i)
            || exchange.is_null(i)
            || exchange_symbol.is_null(i)
            || valid_from.is_null(i)
            || valid_until.is_null(i)
        {
            bail!("symbol dimension row {i} has a null key column");
        }
        out.push(SymbolDimensionRow {
            symbol_id: symbol_id.value(i),
            exchange: exchange.value(i).to_string(),
            exchange_symbol: exchange_symbol.value(i).to_string(),
            valid_from_ts_us: valid_from.value(i),
            valid_until_ts_us: valid_until.value(i),
            base_asset: opt_str(base, i),
            quote_asset: opt_str(quote, i),
            tick_size: tick.filter(|a| !a.is_null(i)).map(|a| a.value(i)),
        });
    }
    Ok(out)
}

/// Shared, swappable reference to the current [`SymbolDimension`].
#[derive(Debug)]
pub struct DimensionHandle {
    inner: ArcSwap<SymbolDimension>,
}

impl DimensionHandle {
    /// Wrap an initial snapshot.
    pub fn new(dim: SymbolDimension) -> Self {
        Self {
            inner: ArcSwap::from_pointee(dim),
        }
    }

    /// Snapshot for one run.
    pub fn snapshot(&self) -> Arc<SymbolDimension> {
        self.inner.load_full()
    }

    /// Publish a new snapshot; in-flight runs keep the one they loaded.
    pub fn replace(&self, dim: SymbolDimension) {
        self.inner.store(Arc::new(dim));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field, Schema};
    use parquet::arrow::ArrowWriter;

    fn window(id: i64, ex: &str, sym: &str, from: i64, until: i64) -> SymbolDimensionRow {
        SymbolDimensionRow {
            symbol_id: id,
            exchange: ex.into(),
            exchange_symbol: sym.into(),
            valid_from_ts_us: from,
            valid_until_ts_us: until,
            base_asset: None,
            quote_asset: None,
            tick_size: None,
        }
    }

    #[test]
    fn half_open_boundaries() {
        let dim = SymbolDimension::from_rows([
            window(1, "binance", "BTCUSDT", 100, 200),
            window(2, "binance", "BTCUSDT", 200, VALID_UNTIL_MAX),
        ]);
        assert_eq!(dim.lookup("binance", "BTCUSDT", 99), WindowMatch::None);
        assert!(matches!(dim.lookup("binance", "BTCUSDT", 100), WindowMatch::One(w) if w.symbol_id == 1));
        assert!(matches!(dim.lookup("binance", "BTCUSDT", 199), WindowMatch::One(w) if w.symbol_id == 1));
        assert!(matches!(dim.lookup("binance", "BTCUSDT", 200), WindowMatch::One(w) if w.symbol_id == 2));
        assert!(matches!(dim.lookup("binance", "BTCUSDT", i64::MAX - 1), WindowMatch::One(w) if w.is_current()));
        assert_eq!(dim.lookup("binance", "ETHUSDT", 150), WindowMatch::None);
        assert_eq!(dim.lookup("okx", "BTCUSDT", 150), WindowMatch::None);
    }

    #[test]
    fn gaps_are_not_covered() {
        let dim = SymbolDimension::from_rows([
            window(1, "x", "A", 0, 10),
            window(1, "x", "A", 20, 30),
        ]);
        assert_eq!(dim.lookup("x", "A", 15), WindowMatch::None);
        assert!(matches!(dim.lookup("x", "A", 25), WindowMatch::One(_)));
        assert!(dim.overlapping_keys().is_empty());
    }

    #[test]
    fn overlaps_report_every_match() {
        let dim = SymbolDimension::from_rows([
            window(1, "x", "A", 0, 100),
            window(2, "x", "A", 10, 20), // nested
            window(3, "x", "B", 0, 10),
        ]);
        assert_eq!(dim.overlapping_keys(), vec![("x".to_string(), "A".to_string())]);
        match dim.lookup("x", "A", 15) {
            WindowMatch::Many(ws) => {
                assert_eq!(ws.iter().map(|w| w.symbol_id).collect::<Vec<_>>(), [1, 2]);
            }
            other => panic!("expected overlap, got {other:?}"),
        }
        assert!(matches!(dim.lookup("x", "A", 50), WindowMatch::One(w) if w.symbol_id == 1));
    }

    #[test]
    fn empty_windows_are_dropped() {
        let dim = SymbolDimension::from_rows([window(1, "x", "A", 10, 10), window(2, "x", "A", 20, 5)]);
        assert!(dim.is_empty());
    }

    #[test]
    fn handle_snapshots_survive_replacement() {
        let handle = DimensionHandle::new(SymbolDimension::from_rows([window(1, "x", "A", 0, 10)]));
        let before = handle.snapshot();
        handle.replace(SymbolDimension::default());
        assert_eq!(before.len(), 1);
        assert!(handle.snapshot().is_empty());
    }

    #[test]
    fn loads_from_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dim_symbol.parquet");

        let schema = Arc::new(Schema::new(vec![
            Field::new("symbol_id", DataType::Int64, false),
            Field::new("exchange", DataType::Utf8, false),
            Field::new("exchange_symbol", DataType::Utf8, false),
            Field::new("valid_from_ts_us", DataType::Int64, false),
            Field::new("valid_until_ts_us", DataType::Int64, false),
            Field::new("tick_size", DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec!["binance", "binance"])),
                Arc::new(StringArray::from(vec!["BTCUSDT", "ETHUSDT"])),
                Arc::new(Int64Array::from(vec![0, 0])),
                Arc::new(Int64Array::from(vec![VALID_UNTIL_MAX, 1_000])),
                Arc::new(Float64Array::from(vec![Some(0.01), None])),
            ],
        )
        .unwrap();
        let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let dim = SymbolDimension::load_parquet(&path).unwrap();
        assert_eq!(dim.len(), 2);
        match dim.lookup("binance", "BTCUSDT", 5) {
            WindowMatch::One(w) => {
                assert_eq!(w.tick_size, Some(0.01));
                assert_eq!(w.base_asset, None);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(dim.lookup("binance", "ETHUSDT", 1_000), WindowMatch::None);
    }
}
