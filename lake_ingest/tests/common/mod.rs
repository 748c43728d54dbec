#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use diesel::QueryableByName;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Text};
use lake_ingest::bronze::BronzeFileMetadata;
use lake_ingest::db::{connection, migrate};
use lake_ingest::dimension::{DimensionHandle, SymbolDimension, SymbolDimensionRow, VALID_UNTIL_MAX};
use lake_ingest::frame::{IntermediateFrame, Value};
use lake_ingest::ingest::Ingestor;
use lake_ingest::manifest::SqliteManifestStore;
use lake_ingest::parser::{ParseError, ParserAdapter, ParserRegistry};
use lake_ingest::registry::SchemaRegistry;
use lake_ingest::store::{EventSink, ParquetEventStore, QuarantineSink, SqliteQuarantineStore};
use lake_ingest::trading_date::TradingCalendar;
use tempfile::TempDir;

#[derive(QueryableByName)]
struct JournalMode {
    #[diesel(sql_type = Text)]
    journal_mode: String,
}
#[derive(QueryableByName)]
struct ForeignKeys {
    #[diesel(sql_type = Integer)]
    foreign_keys: i32,
}
#[derive(QueryableByName)]
struct BusyTimeout {
    #[diesel(sql_type = Integer, column_name = "timeout")]
    busy_timeout: i32,
}

pub struct TestDb {
    _dir: TempDir,    // keep alive for the life of the test
    pub path: String, // <tmpdir>/test.db
}

pub fn setup_db() -> (TestDb, SqliteConnection) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("test.db").to_string_lossy().to_string();

    migrate::run_all(&path).expect("migrations");

    let conn = connection::connect_sqlite(&path).expect("connect");
    (TestDb { _dir: dir, path }, conn)
}

pub fn assert_sqlite_pragmas(conn: &mut SqliteConnection) {
    use diesel::sql_query;

    let jm: JournalMode = sql_query("PRAGMA journal_mode;").get_result(conn).unwrap();
    assert_eq!(jm.journal_mode.to_lowercase(), "wal"); // WAL is persistent per DB file

    let fk: ForeignKeys = sql_query("PRAGMA foreign_keys;").get_result(conn).unwrap();
    assert_eq!(fk.foreign_keys, 1);

    let bt: BusyTimeout = sql_query("PRAGMA busy_timeout;").get_result(conn).unwrap();
    assert_eq!(bt.busy_timeout, 5000);
}

#[derive(QueryableByName)]
struct FkViolation {
    #[diesel(sql_type = Text)]
    table: String,
}

pub fn fk_check_empty(conn: &mut SqliteConnection) {
    use diesel::sql_query;

    let rows: Vec<FkViolation> = sql_query("PRAGMA foreign_key_check;").load(conn).unwrap();
    let tables: Vec<_> = rows.iter().map(|r| r.table.as_str()).collect();
    assert!(tables.is_empty(), "foreign key violations in {tables:?}");
}

/// UTC microseconds for a wall-clock UTC time.
pub fn us(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap().timestamp_micros()
}

pub fn meta(data_type: &str, bronze_path: &str, file_hash: &str) -> BronzeFileMetadata {
    BronzeFileMetadata {
        vendor: "tardis".into(),
        data_type: data_type.into(),
        bronze_path: bronze_path.into(),
        file_hash: file_hash.into(),
        discovered_at: Utc.with_ymd_and_hms(2024, 1, 20, 8, 0, 0).unwrap(),
    }
}

/// One `trades` contract row: exchange, symbol, ts_event_us, price, size, side, trade_id.
pub fn trade(exchange: &str, symbol: &str, ts_us: i64, price: f64, trade_id: &str) -> Vec<Value> {
    vec![
        exchange.into(),
        symbol.into(),
        Value::Int(ts_us),
        Value::Float(price),
        Value::Float(1.0),
        "buy".into(),
        trade_id.into(),
    ]
}

pub fn trades_frame(rows: Vec<Vec<Value>>) -> IntermediateFrame {
    let reg = SchemaRegistry::builtin();
    let mut frame = IntermediateFrame::for_table(reg.get("trades").unwrap());
    for r in rows {
        frame.push_row(r);
    }
    frame
}

pub fn window(symbol_id: i64, exchange: &str, symbol: &str, from: i64, until: i64) -> SymbolDimensionRow {
    SymbolDimensionRow {
        symbol_id,
        exchange: exchange.into(),
        exchange_symbol: symbol.into(),
        valid_from_ts_us: from,
        valid_until_ts_us: until,
        base_asset: None,
        quote_asset: None,
        tick_size: None,
    }
}

/// BTCUSDT on binance has a gap on 2024-01-15 between 12:00 and 13:00 UTC.
pub fn default_dimension() -> SymbolDimension {
    SymbolDimension::from_rows([
        window(1, "binance", "BTCUSDT", 0, us(2024, 1, 15, 12, 0, 0)),
        window(1, "binance", "BTCUSDT", us(2024, 1, 15, 13, 0, 0), VALID_UNTIL_MAX),
        window(2, "binance", "ETHUSDT", 0, VALID_UNTIL_MAX),
        window(10, "nasdaq", "AAPL", 0, VALID_UNTIL_MAX),
        window(20, "xtks", "7203", 0, VALID_UNTIL_MAX),
    ])
}

#[derive(Default)]
struct FixtureInner {
    frames: Mutex<HashMap<String, Result<IntermediateFrame, String>>>,
    calls: AtomicUsize,
}

/// Parser returning whatever frame a test registered for a bronze path.
#[derive(Clone)]
pub struct FixtureParser {
    data_type: String,
    inner: Arc<FixtureInner>,
}

impl FixtureParser {
    pub fn new(data_type: &str) -> Self {
        Self {
            data_type: data_type.into(),
            inner: Arc::default(),
        }
    }

    pub fn set(&self, bronze_path: &str, frame: IntermediateFrame) {
        self.inner.frames.lock().unwrap().insert(bronze_path.into(), Ok(frame));
    }

    pub fn set_error(&self, bronze_path: &str, message: &str) {
        self.inner
            .frames
            .lock()
            .unwrap()
            .insert(bronze_path.into(), Err(message.into()));
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

impl ParserAdapter for FixtureParser {
    fn data_type(&self) -> &str {
        &self.data_type
    }

    fn parse(&self, meta: &BronzeFileMetadata) -> Result<IntermediateFrame, ParseError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        match self.inner.frames.lock().unwrap().get(&meta.bronze_path) {
            Some(Ok(frame)) => Ok(frame.clone()),
            Some(Err(msg)) => Err(ParseError::Malformed(msg.clone())),
            None => Err(ParseError::Io {
                path: meta.bronze_path.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
        }
    }
}

/// A fully wired ingestor over temp storage, with handles to inspect every store.
pub struct Harness {
    pub db: TestDb,
    pub lake: TempDir,
    pub registry: Arc<SchemaRegistry>,
    pub manifest: Arc<SqliteManifestStore>,
    pub events: Arc<ParquetEventStore>,
    pub quarantine: Arc<SqliteQuarantineStore>,
    pub dimension: Arc<DimensionHandle>,
    pub trades: FixtureParser,
    pub ingestor: Ingestor,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(default_dimension(), None, None)
    }

    /// Same as [`Harness::new`] but writes go through the given sinks.
    pub fn build(
        dim: SymbolDimension,
        events_override: Option<Arc<dyn EventSink>>,
        quarantine_override: Option<Arc<dyn QuarantineSink>>,
    ) -> Self {
        let (db, _conn) = setup_db();
        let lake = TempDir::new().expect("lake dir");
        let registry = Arc::new(SchemaRegistry::builtin());

        let manifest = Arc::new(SqliteManifestStore::open(&db.path).expect("manifest store"));
        let events = Arc::new(ParquetEventStore::new(lake.path(), registry.clone()));
        let quarantine = Arc::new(SqliteQuarantineStore::open(&db.path).expect("quarantine store"));
        let dimension = Arc::new(DimensionHandle::new(dim));
        let trades = FixtureParser::new("trades");

        let ingestor = Ingestor::new(
            registry.clone(),
            TradingCalendar::new(),
            ParserRegistry::new().with(trades.clone()),
            dimension.clone(),
            manifest.clone(),
            events_override.unwrap_or_else(|| events.clone() as Arc<dyn EventSink>),
            quarantine_override.unwrap_or_else(|| quarantine.clone() as Arc<dyn QuarantineSink>),
        );

        Self {
            db,
            lake,
            registry,
            manifest,
            events,
            quarantine,
            dimension,
            trades,
            ingestor,
        }
    }

    /// A second ingestor over the same manifest, dimension and parser, writing through the
    /// given sinks. Stands in for another worker.
    pub fn worker_with(&self, events: Arc<dyn EventSink>, quarantine: Arc<dyn QuarantineSink>) -> Ingestor {
        Ingestor::new(
            self.registry.clone(),
            TradingCalendar::new(),
            ParserRegistry::new().with(self.trades.clone()),
            self.dimension.clone(),
            self.manifest.clone(),
            events,
            quarantine,
        )
    }

    /// A worker writing through the harness's own stores.
    pub fn worker(&self) -> Ingestor {
        self.worker_with(self.events.clone(), self.quarantine.clone())
    }

    /// Every file under the lake root with its bytes, sorted by relative path.
    pub fn lake_snapshot(&self) -> Vec<(String, Vec<u8>)> {
        fn walk(dir: &std::path::Path, root: &std::path::Path, out: &mut Vec<(String, Vec<u8>)>) {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path, root, out);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_string_lossy().to_string();
                    out.push((rel, std::fs::read(&path).unwrap()));
                }
            }
        }
        let mut out = Vec::new();
        walk(self.lake.path(), self.lake.path(), &mut out);
        out.sort();
        out
    }
}
