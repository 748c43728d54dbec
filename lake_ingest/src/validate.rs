//! Row checks and partition-key derivation.
//!
//! For each sequenced row, in order:
//! 1. every value must be null only where the column is nullable and otherwise match the
//!    column dtype, and the exchange must be usable as a directory name, else
//!    `schema_violation`;
//! 2. the exchange must have a timezone, else the whole run fails with a config error;
//! 3. `ts_event_us` must map to a calendar date, else `invalid_timestamp`.

use crate::error::ConfigError;
use crate::frame::Value;
use crate::registry::{COL_EXCHANGE, COL_SYMBOL, COL_TS_EVENT_US, TableSpec};
use crate::rows::{QuarantineReason, Rejected, SequencedRow, ValidatedRow};
use crate::store::event::is_valid_partition_value;
use crate::trading_date::{TradingCalendar, TradingDateError};

/// Rows that passed and rows diverted to quarantine.
#[derive(Debug, Default)]
pub struct Validated {
    /// Passed every check, in `file_seq` order.
    pub accepted: Vec<ValidatedRow>,
    /// Rejected, in `file_seq` order.
    pub rejected: Vec<Rejected>,
}

/// Check every row of one file.
pub fn validate(
    rows: Vec<SequencedRow>,
    spec: &TableSpec,
    calendar: &TradingCalendar,
) -> Result<Validated, ConfigError> {
    let ex_idx = core_index(spec, COL_EXCHANGE)?;
    let sym_idx = core_index(spec, COL_SYMBOL)?;
    let ts_idx = core_index(spec, COL_TS_EVENT_US)?;

    let mut out = Validated::default();
    for row in rows {
        if let Some(detail) = value_violation(&row, spec) {
            out.rejected.push(Rejected {
                row,
                reason: QuarantineReason::SchemaViolation,
                detail: Some(detail),
            });
            continue;
        }

        // Types were checked above, so the core fields are present and well-typed.
        let (Some(exchange), Some(symbol), Some(ts_event_us)) = (
            row.values[ex_idx].as_str(),
            row.values[sym_idx].as_str(),
            row.values[ts_idx].as_i64(),
        ) else {
            out.rejected.push(Rejected {
                row,
                reason: QuarantineReason::SchemaViolation,
                detail: Some("core column missing".into()),
            });
            continue;
        };

        match calendar.trading_date(ts_event_us, exchange) {
            Ok(trading_date) => {
                let exchange = exchange.to_string();
                let symbol = symbol.to_string();
                out.accepted.push(ValidatedRow {
                    row,
                    exchange,
                    symbol,
                    ts_event_us,
                    trading_date,
                });
            }
            Err(TradingDateError::Config(e)) => return Err(e),
            Err(e @ TradingDateError::OutOfRange(_)) => out.rejected.push(Rejected {
                row,
                reason: QuarantineReason::InvalidTimestamp,
                detail: Some(e.to_string()),
            }),
        }
    }
    Ok(out)
}

fn core_index(spec: &TableSpec, column: &str) -> Result<usize, ConfigError> {
    spec.column_index(column)
        .ok_or_else(|| ConfigError::InvalidTableSpec {
            table: spec.name.clone(),
            detail: format!("missing core column '{column}'"),
        })
}

fn value_violation(row: &SequencedRow, spec: &TableSpec) -> Option<String> {
    for ((name, col), value) in spec.columns.iter().zip(&row.values) {
        match value.dtype() {
            None if !col.nullable => {
                return Some(format!("null in non-nullable column '{name}'"));
            }
            Some(found) if found != col.dtype => {
                return Some(format!("column '{name}' expects {}, got {found}", col.dtype));
            }
            _ => {}
        }
    }
    if let Some(Value::Str(s)) = spec
        .column_index(COL_EXCHANGE)
        .and_then(|i| row.values.get(i))
    {
        if s.trim().is_empty() || !is_valid_partition_value(s) {
            return Some(format!("exchange '{s}' is not usable as a partition value"));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SchemaRegistry;

    fn row(seq: i64, values: Vec<Value>) -> SequencedRow {
        SequencedRow {
            file_id: 1,
            file_seq: seq,
            parse_index: seq as usize,
            values,
        }
    }

    fn trade(ex: &str, sym: Value, ts: Value, price: Value) -> Vec<Value> {
        vec![ex.into(), sym, ts, price, Value::Float(1.0), Value::Null, Value::Null]
    }

    #[test]
    fn splits_good_rows_from_bad() {
        let reg = SchemaRegistry::builtin();
        let spec = reg.get("trades").unwrap();
        let rows = vec![
            row(0, trade("binance", "BTCUSDT".into(), Value::Int(0), Value::Float(1.0))),
            row(1, trade("binance", Value::Null, Value::Int(0), Value::Float(1.0))),
            row(2, trade("binance", "BTCUSDT".into(), Value::Int(0), Value::Int(5))),
            row(3, trade("binance", "BTCUSDT".into(), Value::Int(i64::MIN), Value::Float(1.0))),
            row(4, trade(" ", "BTCUSDT".into(), Value::Int(0), Value::Float(1.0))),
        ];

        let out = validate(rows, spec, &TradingCalendar::new()).unwrap();
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].exchange, "binance");
        assert_eq!(out.accepted[0].trading_date.to_string(), "1970-01-01");

        let got: Vec<_> = out
            .rejected
            .iter()
            .map(|r| (r.row.file_seq, r.reason, r.detail.clone().unwrap()))
            .collect();
        assert_eq!(got[0], (1, QuarantineReason::SchemaViolation, "null in non-nullable column 'symbol'".into()));
        assert_eq!(got[1], (2, QuarantineReason::SchemaViolation, "column 'price' expects float64, got int64".into()));
        assert_eq!(got[2].0, 3);
        assert_eq!(got[2].1, QuarantineReason::InvalidTimestamp);
        assert_eq!(
            got[3],
            (4, QuarantineReason::SchemaViolation, "exchange ' ' is not usable as a partition value".into())
        );
    }

    #[test]
    fn unknown_exchange_aborts() {
        let reg = SchemaRegistry::builtin();
        let spec = reg.get("trades").unwrap();
        let rows = vec![
            row(0, trade("binance", "A".into(), Value::Int(0), Value::Float(1.0))),
            row(1, trade("atlantis", "A".into(), Value::Int(0), Value::Float(1.0))),
        ];
        assert_eq!(
            validate(rows, spec, &TradingCalendar::new()).unwrap_err(),
            ConfigError::UnknownExchange("atlantis".into())
        );
    }
}
