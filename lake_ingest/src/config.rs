//! Lake configuration: parsing, normalization, and loading.
//!
//! ```toml
//! database_url = "sqlite:///var/lake/manifest.db"
//! lake_root = "/var/lake/silver"
//! symbol_dimension = "/var/lake/dim/dim_symbol.parquet"
//!
//! [exchanges]
//! my-venue = "Europe/Paris"
//!
//! [tables.funding.columns]
//! exchange    = { dtype = "utf8" }
//! symbol      = { dtype = "utf8" }
//! ts_event_us = { dtype = "int64" }
//! rate        = { dtype = "float64" }
//!
//! [tables.funding]
//! partition_keys = ["exchange", "trading_date"]
//! tie_break_keys = ["exchange", "symbol", "ts_event_us"]
//! ```
//!
//! Key behaviors:
//! - Exchange codes and table names are trimmed and lowercased; duplicates after
//!   normalization are an error.
//! - Timezone names are parsed eagerly, so a typo fails at load time rather than mid-run.
//! - `DATABASE_URL` and `LAKE_ROOT` in the environment override the file.
//!
//! Entrypoints: [`load_config_str`], [`load_config_path`], [`LakeConfig::from_env`].

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use shared_utils::env::{get_env_override, get_env_var};

use crate::registry::{SchemaRegistry, TableSpec};
use crate::trading_date::TradingCalendar;

/// Environment variable overriding [`LakeConfig::database_url`].
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Environment variable overriding [`LakeConfig::lake_root`].
pub const ENV_LAKE_ROOT: &str = "LAKE_ROOT";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LakeConfig {
    /// SQLite database holding the manifest and quarantine tables.
    pub database_url: String,
    /// Root directory of the event tables.
    pub lake_root: PathBuf,
    /// Symbol dimension snapshot (Parquet).
    #[serde(default)]
    pub symbol_dimension: Option<PathBuf>,
    /// Exchange code -> IANA timezone, on top of the built-in venues.
    #[serde(default)]
    pub exchanges: IndexMap<String, String>,
    /// Extra table specs, on top of the built-in tables.
    #[serde(default)]
    pub tables: IndexMap<String, TableSpec>,
}

impl LakeConfig {
    /// Configuration from the environment alone (`DATABASE_URL`, `LAKE_ROOT`).
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: get_env_var(ENV_DATABASE_URL)?,
            lake_root: PathBuf::from(get_env_var(ENV_LAKE_ROOT)?),
            symbol_dimension: None,
            exchanges: IndexMap::new(),
            tables: IndexMap::new(),
        })
    }

    /// Replace file values with `DATABASE_URL` / `LAKE_ROOT` when those are set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = get_env_override(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Some(root) = get_env_override(ENV_LAKE_ROOT) {
            self.lake_root = PathBuf::from(root);
        }
    }

    /// Calendar with the configured exchange overrides.
    pub fn calendar(&self) -> anyhow::Result<TradingCalendar> {
        let mut cal = TradingCalendar::new();
        for (exchange, tz) in &self.exchanges {
            cal = cal.with_exchange_tz_name(exchange, tz)?;
        }
        Ok(cal)
    }

    /// Built-in tables plus the configured ones.
    pub fn registry(&self) -> anyhow::Result<SchemaRegistry> {
        let mut reg = SchemaRegistry::builtin();
        reg.extend(self.tables.clone())?;
        Ok(reg)
    }
}

/// Normalize in place. See the module docs for the rules.
pub fn normalize_config(cfg: &mut LakeConfig) -> anyhow::Result<()> {
    cfg.database_url = cfg.database_url.trim().to_string();
    if cfg.database_url.is_empty() {
        bail!("database_url cannot be empty");
    }
    if cfg.lake_root.as_os_str().is_empty() {
        bail!("lake_root cannot be empty");
    }

    let mut exchanges = IndexMap::with_capacity(cfg.exchanges.len());
    for (code, tz) in std::mem::take(&mut cfg.exchanges) {
        let norm = code.trim().to_lowercase();
        if norm.is_empty() {
            bail!("empty exchange code");
        }
        if exchanges.insert(norm.clone(), tz.trim().to_string()).is_some() {
            bail!("duplicate exchange code after normalization: {norm}");
        }
    }
    cfg.exchanges = exchanges;

    let mut tables = IndexMap::with_capacity(cfg.tables.len());
    for (name, spec) in std::mem::take(&mut cfg.tables) {
        let norm = name.trim().to_lowercase();
        if tables.insert(norm.clone(), spec).is_some() {
            bail!("duplicate table name after normalization: {norm}");
        }
    }
    cfg.tables = tables;

    // Fail now on bad timezones and table specs.
    cfg.calendar()?;
    cfg.registry()?;
    Ok(())
}

/// Parse + normalize from a TOML string. Environment overrides are not applied.
pub fn load_config_str(s: &str) -> anyhow::Result<LakeConfig> {
    let mut cfg: LakeConfig = toml::from_str(s).context("invalid lake config TOML")?;
    normalize_config(&mut cfg)?;
    Ok(cfg)
}

/// Read a file, apply environment overrides, then normalize.
pub fn load_config_path(path: impl AsRef<Path>) -> anyhow::Result<LakeConfig> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut cfg: LakeConfig =
        toml::from_str(&s).with_context(|| format!("invalid lake config {}", path.display()))?;
    cfg.apply_env_overrides();
    normalize_config(&mut cfg)?;
    Ok(cfg)
}
