//! Exchange-local trading dates.
//!
//! `trading_date = date(ts_event_us converted from UTC into the exchange's timezone)`.
//!
//! Exchanges resolve through a [`TradingCalendar`]: a static table of well-known venues plus
//! per-deployment overrides from `[exchanges]` in the config file. An exchange that resolves
//! nowhere is a [`ConfigError::UnknownExchange`]; there is no UTC fallback.

use std::collections::HashMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::error::ConfigError;
use crate::tz::utc_from_micros;

static DEFAULT_EXCHANGES: Lazy<HashMap<&'static str, Tz>> = Lazy::new(|| {
    use chrono_tz::{America, Asia, Australia, Europe};

    let mut m = HashMap::new();
    // Crypto venues roll their day at UTC midnight.
    for ex in [
        "binance", "binance-futures", "bitfinex", "bitmex", "bybit", "coinbase", "deribit",
        "gateio", "huobi", "kraken", "kucoin", "okx",
    ] {
        m.insert(ex, Tz::UTC);
    }
    for ex in ["nasdaq", "xnas", "nyse", "xnys", "arca", "iex", "cboe"] {
        m.insert(ex, America::New_York);
    }
    for ex in ["cme", "xcme", "cbot"] {
        m.insert(ex, America::Chicago);
    }
    for ex in ["lse", "xlon"] {
        m.insert(ex, Europe::London);
    }
    for ex in ["xetr", "eurex"] {
        m.insert(ex, Europe::Berlin);
    }
    for ex in ["xtks", "tse"] {
        m.insert(ex, Asia::Tokyo);
    }
    for ex in ["hkex", "xhkg"] {
        m.insert(ex, Asia::Hong_Kong);
    }
    for ex in ["nse", "bse"] {
        m.insert(ex, Asia::Kolkata);
    }
    for ex in ["asx", "xasx"] {
        m.insert(ex, Australia::Sydney);
    }
    m
});

/// Why a trading date could not be derived.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TradingDateError {
    /// The exchange has no timezone. Fatal for the whole run.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The timestamp cannot be represented as a calendar date. Row-level.
    #[error("ts_event_us {0} is outside the representable date range")]
    OutOfRange(i64),
}

/// Exchange code -> IANA timezone lookup.
#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    overrides: HashMap<String, Tz>,
}

impl TradingCalendar {
    /// Calendar with only the built-in venues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the timezone for `exchange`.
    pub fn with_exchange(mut self, exchange: &str, tz: Tz) -> Self {
        self.overrides.insert(normalize(exchange), tz);
        self
    }

    /// Like [`Self::with_exchange`], parsing an IANA name such as `"America/New_York"`.
    pub fn with_exchange_tz_name(self, exchange: &str, tz_name: &str) -> Result<Self, ConfigError> {
        let tz: Tz = tz_name.trim().parse().map_err(|_| ConfigError::InvalidTimezone {
            exchange: exchange.to_string(),
            tz: tz_name.to_string(),
        })?;
        Ok(self.with_exchange(exchange, tz))
    }

    /// Timezone for `exchange`. Lookup is case-insensitive.
    pub fn timezone(&self, exchange: &str) -> Result<Tz, ConfigError> {
        let key = normalize(exchange);
        self.overrides
            .get(&key)
            .or_else(|| DEFAULT_EXCHANGES.get(key.as_str()))
            .copied()
            .ok_or_else(|| ConfigError::UnknownExchange(exchange.to_string()))
    }

    /// Exchange-local calendar date of `ts_event_us`.
    pub fn trading_date(&self, ts_event_us: i64, exchange: &str) -> Result<NaiveDate, TradingDateError> {
        let tz = self.timezone(exchange)?;
        let utc = utc_from_micros(ts_event_us).ok_or(TradingDateError::OutOfRange(ts_event_us))?;
        Ok(utc.with_timezone(&tz).date_naive())
    }
}

fn normalize(exchange: &str) -> String {
    exchange.trim().to_ascii_lowercase()
}

/// [`TradingCalendar::trading_date`] against the built-in venues only.
pub fn trading_date(ts_event_us: i64, exchange: &str) -> Result<NaiveDate, TradingDateError> {
    TradingCalendar::new().trading_date(ts_event_us, exchange)
}
