//! Schema registry: table specs consumed read-only by ingestion.
//!
//! A [`TableSpec`] declares, for one event table:
//! - the intermediate contract columns (name, dtype, nullability) in storage order;
//! - the partition keys (always `exchange` then the derived `trading_date`);
//! - the tie-break keys that define the replay order used for `file_seq`.
//!
//! Every table must carry the core columns `exchange` (utf8), `symbol` (utf8) and
//! `ts_event_us` (int64), all non-null. Lineage and resolution columns
//! (`symbol_id`, `file_id`, `file_seq`) and the `trading_date` partition key are
//! appended by ingestion and are reserved names.
//!
//! Specs can be loaded from TOML:
//! ```toml
//! [tables.trades]
//! partition_keys = ["exchange", "trading_date"]
//! tie_break_keys = ["exchange", "symbol", "ts_event_us", "trade_id"]
//!
//! [tables.trades.columns]
//! exchange    = { dtype = "utf8" }
//! symbol      = { dtype = "utf8" }
//! ts_event_us = { dtype = "int64" }
//! price       = { dtype = "float64" }
//! size        = { dtype = "float64" }
//! trade_id    = { dtype = "utf8", nullable = true }
//! ```

use std::fmt;

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Core column: exchange code.
pub const COL_EXCHANGE: &str = "exchange";
/// Core column: exchange-native symbol.
pub const COL_SYMBOL: &str = "symbol";
/// Core column: event time, UTC microseconds.
pub const COL_TS_EVENT_US: &str = "ts_event_us";
/// Derived partition key.
pub const COL_TRADING_DATE: &str = "trading_date";
/// Resolved instrument surrogate.
pub const COL_SYMBOL_ID: &str = "symbol_id";
/// Lineage: originating file.
pub const COL_FILE_ID: &str = "file_id";
/// Lineage: position within the file's replay order.
pub const COL_FILE_SEQ: &str = "file_seq";

const RESERVED: [&str; 4] = [COL_TRADING_DATE, COL_SYMBOL_ID, COL_FILE_ID, COL_FILE_SEQ];
const PARTITION_KEYS: [&str; 2] = [COL_EXCHANGE, COL_TRADING_DATE];

/// Column dtypes supported by the intermediate contract and the event tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Float64,
    /// UTF-8 string.
    Utf8,
    /// Boolean.
    Bool,
}

impl DType {
    /// Arrow type used when the column is persisted.
    pub fn arrow_type(self) -> arrow::datatypes::DataType {
        use arrow::datatypes::DataType as A;
        match self {
            DType::Int64 => A::Int64,
            DType::Float64 => A::Float64,
            DType::Utf8 => A::Utf8,
            DType::Bool => A::Boolean,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::Int64 => "int64",
            DType::Float64 => "float64",
            DType::Utf8 => "utf8",
            DType::Bool => "bool",
        };
        f.write_str(s)
    }
}

/// One contract column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    /// Declared dtype.
    pub dtype: DType,
    /// Whether null values are allowed.
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnSpec {
    /// Non-null column of `dtype`.
    pub const fn required(dtype: DType) -> Self {
        Self {
            dtype,
            nullable: false,
        }
    }

    /// Nullable column of `dtype`.
    pub const fn optional(dtype: DType) -> Self {
        Self {
            dtype,
            nullable: true,
        }
    }
}

/// Declaration of one event table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    /// Table name; filled from the registry key when loaded from TOML.
    #[serde(default)]
    pub name: String,
    /// Contract columns in storage order.
    pub columns: IndexMap<String, ColumnSpec>,
    /// Partition keys; must be `["exchange", "trading_date"]`.
    pub partition_keys: Vec<String>,
    /// Ordered keys defining the replay order within a file.
    pub tie_break_keys: Vec<String>,
}

impl TableSpec {
    /// Position of `column` among the contract columns.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.get_index_of(column)
    }

    /// Contract columns other than the three core columns, in storage order.
    pub fn payload_columns(&self) -> impl Iterator<Item = (&String, &ColumnSpec)> {
        self.columns
            .iter()
            .filter(|(name, _)| !is_core_column(name))
    }

    /// Indices of the tie-break keys among the contract columns.
    ///
    /// Only meaningful on a validated spec, where every key is known to exist.
    pub fn tie_break_indices(&self) -> Vec<usize> {
        self.tie_break_keys
            .iter()
            .filter_map(|k| self.column_index(k))
            .collect()
    }

    /// Structural checks every table must pass before it is registered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bad = |detail: String| ConfigError::InvalidTableSpec {
            table: self.name.clone(),
            detail,
        };

        if self.name.trim().is_empty() {
            return Err(bad("table name cannot be empty".into()));
        }

        for (core, dtype) in [
            (COL_EXCHANGE, DType::Utf8),
            (COL_SYMBOL, DType::Utf8),
            (COL_TS_EVENT_US, DType::Int64),
        ] {
            match self.columns.get(core) {
                None => return Err(bad(format!("missing core column '{core}'"))),
                Some(c) if c.dtype != dtype => {
                    return Err(bad(format!("core column '{core}' must be {dtype}, not {}", c.dtype)));
                }
                Some(c) if c.nullable => {
                    return Err(bad(format!("core column '{core}' cannot be nullable")));
                }
                Some(_) => {}
            }
        }

        if let Some(r) = RESERVED.iter().find(|r| self.columns.contains_key(**r)) {
            return Err(bad(format!("'{r}' is reserved for ingestion-derived columns")));
        }

        if self.partition_keys != PARTITION_KEYS {
            return Err(bad(format!(
                "partition_keys must be {PARTITION_KEYS:?}, got {:?}",
                self.partition_keys
            )));
        }

        if self.tie_break_keys.is_empty() {
            return Err(bad("tie_break_keys cannot be empty".into()));
        }
        for k in &self.tie_break_keys {
            if !self.columns.contains_key(k) {
                return Err(bad(format!("tie-break key '{k}' is not a column")));
            }
        }

        Ok(())
    }
}

/// Whether `name` is one of the three columns every table carries.
pub fn is_core_column(name: &str) -> bool {
    matches!(name, COL_EXCHANGE | COL_SYMBOL | COL_TS_EVENT_US)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    tables: IndexMap<String, TableSpec>,
}

/// Table names and data types are matched trimmed and lowercased.
pub fn normalize_table_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Read-only collection of [`TableSpec`]s keyed by table name (== data type).
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: IndexMap<String, TableSpec>,
}

impl SchemaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `trades` and `quotes` tables.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        for spec in [trades_spec(), quotes_spec()] {
            // Built-in specs are valid by construction.
            reg.tables.insert(spec.name.clone(), spec);
        }
        reg
    }

    /// Adds or replaces a table after validating it.
    pub fn insert(&mut self, mut spec: TableSpec) -> Result<(), ConfigError> {
        spec.name = normalize_table_name(&spec.name);
        spec.validate()?;
        self.tables.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Looks up a table by name or data type, normalized the same way as [`Self::insert`].
    /// Unknown tables are a configuration error.
    pub fn get(&self, table: &str) -> Result<&TableSpec, ConfigError> {
        self.tables
            .get(&normalize_table_name(table))
            .ok_or_else(|| ConfigError::UnknownTable(table.to_string()))
    }

    /// Registered table names in registration order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Merges the tables declared in a TOML document into this registry.
    pub fn extend_from_toml_str(&mut self, toml_str: &str) -> anyhow::Result<()> {
        let file: RegistryFile = toml::from_str(toml_str).context("failed to parse registry TOML")?;
        self.extend(file.tables)?;
        Ok(())
    }

    /// Merges `(name, spec)` pairs, using the key as the table name.
    pub fn extend(&mut self, tables: IndexMap<String, TableSpec>) -> Result<(), ConfigError> {
        for (name, mut spec) in tables {
            spec.name = name;
            self.insert(spec)?;
        }
        Ok(())
    }

    /// Read a registry TOML file on top of the built-in tables.
    pub fn load_path(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("read registry file {}", path.as_ref().display()))?;
        let mut reg = Self::builtin();
        reg.extend_from_toml_str(&text)?;
        Ok(reg)
    }
}

fn core_columns() -> IndexMap<String, ColumnSpec> {
    IndexMap::from([
        (COL_EXCHANGE.to_string(), ColumnSpec::required(DType::Utf8)),
        (COL_SYMBOL.to_string(), ColumnSpec::required(DType::Utf8)),
        (COL_TS_EVENT_US.to_string(), ColumnSpec::required(DType::Int64)),
    ])
}

fn trades_spec() -> TableSpec {
    let mut columns = core_columns();
    columns.insert("price".into(), ColumnSpec::required(DType::Float64));
    columns.insert("size".into(), ColumnSpec::required(DType::Float64));
    columns.insert("side".into(), ColumnSpec::optional(DType::Utf8));
    columns.insert("trade_id".into(), ColumnSpec::optional(DType::Utf8));
    TableSpec {
        name: "trades".into(),
        columns,
        partition_keys: PARTITION_KEYS.map(String::from).to_vec(),
        tie_break_keys: vec![
            COL_EXCHANGE.into(),
            COL_SYMBOL.into(),
            COL_TS_EVENT_US.into(),
            "trade_id".into(),
        ],
    }
}

fn quotes_spec() -> TableSpec {
    let mut columns = core_columns();
    columns.insert("ts_recv_us".into(), ColumnSpec::optional(DType::Int64));
    columns.insert("bid_px".into(), ColumnSpec::optional(DType::Float64));
    columns.insert("bid_sz".into(), ColumnSpec::optional(DType::Float64));
    columns.insert("ask_px".into(), ColumnSpec::optional(DType::Float64));
    columns.insert("ask_sz".into(), ColumnSpec::optional(DType::Float64));
    columns.insert("seq_no".into(), ColumnSpec::optional(DType::Int64));
    TableSpec {
        name: "quotes".into(),
        columns,
        partition_keys: PARTITION_KEYS.map(String::from).to_vec(),
        tie_break_keys: vec![
            COL_EXCHANGE.into(),
            COL_SYMBOL.into(),
            COL_TS_EVENT_US.into(),
            "seq_no".into(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_specs_validate() {
        let reg = SchemaRegistry::builtin();
        for name in ["trades", "quotes"] {
            reg.get(name).unwrap().validate().unwrap();
        }
        assert_eq!(
            reg.get("book_deltas").unwrap_err(),
            ConfigError::UnknownTable("book_deltas".into())
        );
    }

    #[test]
    fn payload_columns_skip_core() {
        let reg = SchemaRegistry::builtin();
        let names: Vec<_> = reg
            .get("trades")
            .unwrap()
            .payload_columns()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, ["price", "size", "side", "trade_id"]);
    }

    #[test]
    fn toml_tables_extend_the_registry() {
        let toml_str = r#"
[tables.Funding]
partition_keys = ["exchange", "trading_date"]
tie_break_keys = ["exchange", "symbol", "ts_event_us"]

[tables.Funding.columns]
exchange    = { dtype = "utf8" }
symbol      = { dtype = "utf8" }
ts_event_us = { dtype = "int64" }
rate        = { dtype = "float64", nullable = true }
"#;
        let mut reg = SchemaRegistry::builtin();
        reg.extend_from_toml_str(toml_str).unwrap();
        let spec = reg.get("funding").unwrap();
        assert_eq!(spec.name, "funding");
        assert_eq!(reg.get(" Funding").unwrap().name, "funding");
        assert_eq!(reg.get("TRADES").unwrap().name, "trades");
        assert_eq!(spec.columns["rate"], ColumnSpec::optional(DType::Float64));
        assert_eq!(reg.table_names().count(), 3);
    }

    #[test]
    fn specs_without_core_columns_are_rejected() {
        let mut spec = trades_spec();
        spec.columns.shift_remove(COL_TS_EVENT_US);
        let err = SchemaRegistry::new().insert(spec).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTableSpec { ref detail, .. } if detail.contains("ts_event_us")));
    }

    #[test]
    fn reserved_and_unknown_keys_are_rejected() {
        let mut spec = trades_spec();
        spec.columns
            .insert(COL_FILE_SEQ.into(), ColumnSpec::required(DType::Int64));
        assert!(SchemaRegistry::new().insert(spec).is_err());

        let mut spec = trades_spec();
        spec.tie_break_keys.push("nope".into());
        assert!(SchemaRegistry::new().insert(spec).is_err());

        let mut spec = trades_spec();
        spec.partition_keys = vec!["symbol".into()];
        assert!(SchemaRegistry::new().insert(spec).is_err());
    }
}
