//! Point-in-time symbol resolution.
//!
//! Each validated row is matched against the dimension snapshot with
//! `valid_from_ts_us <= ts_event_us < valid_until_ts_us` for its `(exchange, symbol)`:
//! - one match: the row gets that window's `symbol_id`;
//! - none: quarantined as `missing_pit_symbol_coverage`;
//! - several: quarantined as `overlapping_symbol_windows`.
//!
//! Pure over its inputs; nothing is ever dropped.

use crate::dimension::{SymbolDimension, WindowMatch};
use crate::registry::TableSpec;
use crate::rows::{CanonicalEventRow, QuarantineReason, Rejected, ValidatedRow};

/// Output of [`resolve`].
#[derive(Debug, Default)]
pub struct PitResolution {
    /// Rows with a `symbol_id`, input order preserved.
    pub resolved: Vec<CanonicalEventRow>,
    /// Rows without exactly one covering window, input order preserved.
    pub quarantined: Vec<Rejected>,
}

/// Resolve `symbol_id` for every row.
pub fn resolve(rows: Vec<ValidatedRow>, dim: &SymbolDimension, spec: &TableSpec) -> PitResolution {
    let mut out = PitResolution::default();
    for v in rows {
        let outcome = match dim.lookup(&v.exchange, &v.symbol, v.ts_event_us) {
            WindowMatch::One(w) => Ok(w.symbol_id),
            WindowMatch::None => Err((QuarantineReason::MissingPitSymbolCoverage, None)),
            WindowMatch::Many(ws) => {
                let ids: Vec<String> = ws.iter().map(|w| w.symbol_id.to_string()).collect();
                Err((
                    QuarantineReason::OverlappingSymbolWindows,
                    Some(format!("candidate symbol_ids: {}", ids.join(","))),
                ))
            }
        };
        match outcome {
            Ok(symbol_id) => out
                .resolved
                .push(CanonicalEventRow::from_validated(v, symbol_id, spec)),
            Err((reason, detail)) => out.quarantined.push(Rejected {
                row: v.row,
                reason,
                detail,
            }),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{SymbolDimensionRow, VALID_UNTIL_MAX};
    use crate::frame::Value;
    use crate::registry::SchemaRegistry;
    use crate::rows::SequencedRow;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn window(id: i64, sym: &str, from: i64, until: i64) -> SymbolDimensionRow {
        SymbolDimensionRow {
            symbol_id: id,
            exchange: "binance".into(),
            exchange_symbol: sym.into(),
            valid_from_ts_us: from,
            valid_until_ts_us: until,
            base_asset: None,
            quote_asset: None,
            tick_size: None,
        }
    }

    fn validated(seq: i64, sym: &str, ts: i64) -> ValidatedRow {
        ValidatedRow {
            row: SequencedRow {
                file_id: 3,
                file_seq: seq,
                parse_index: seq as usize,
                values: vec![
                    "binance".into(),
                    sym.into(),
                    Value::Int(ts),
                    Value::Float(10.0),
                    Value::Float(2.0),
                    "sell".into(),
                    Value::Null,
                ],
            },
            exchange: "binance".into(),
            symbol: sym.into(),
            ts_event_us: ts,
            trading_date: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
        }
    }

    #[test]
    fn one_none_many() {
        let reg = SchemaRegistry::builtin();
        let spec = reg.get("trades").unwrap();
        let dim = SymbolDimension::from_rows([
            window(1, "BTCUSDT", 0, VALID_UNTIL_MAX),
            window(2, "ETHUSDT", 0, 100),
            window(3, "ETHUSDT", 50, 200),
        ]);
        let out = resolve(
            vec![
                validated(0, "BTCUSDT", 5),
                validated(1, "DOGEUSDT", 5),
                validated(2, "ETHUSDT", 75),
                validated(3, "ETHUSDT", 150),
            ],
            &dim,
            spec,
        );

        assert_eq!(out.resolved.len(), 2);
        assert_eq!((out.resolved[0].file_seq, out.resolved[0].symbol_id), (0, 1));
        assert_eq!((out.resolved[1].file_seq, out.resolved[1].symbol_id), (3, 3));
        assert_eq!(out.resolved[0].payload["side"], Value::from("sell"));
        assert!(!out.resolved[0].payload.contains_key("symbol"));

        let q: Vec<_> = out.quarantined.iter().map(|r| (r.row.file_seq, r.reason)).collect();
        assert_eq!(
            q,
            [
                (1, QuarantineReason::MissingPitSymbolCoverage),
                (2, QuarantineReason::OverlappingSymbolWindows),
            ]
        );
        assert_eq!(out.quarantined[1].detail.as_deref(), Some("candidate symbol_ids: 2,3"));
    }

    proptest! {
        // Against disjoint windows, a row is resolved iff exactly one window contains it,
        // and every input row lands in exactly one output.
        #[test]
        fn resolution_matches_linear_scan(
            bounds in prop::collection::btree_set(-1_000i64..1_000, 0..12),
            lookups in prop::collection::vec(-1_200i64..1_200, 0..40),
        ) {
            let bounds: Vec<i64> = bounds.into_iter().collect();
            // Every other gap between consecutive bounds becomes a window.
            let windows: Vec<_> = bounds
                .windows(2)
                .enumerate()
                .filter(|(i, _)| i % 2 == 0)
                .map(|(i, w)| window(i as i64, "X", w[0], w[1]))
                .collect();
            let dim = SymbolDimension::from_rows(windows.clone());

            let reg = SchemaRegistry::builtin();
            let spec = reg.get("trades").unwrap();
            let rows: Vec<_> = lookups.iter().enumerate().map(|(i, ts)| validated(i as i64, "X", *ts)).collect();
            let out = resolve(rows, &dim, spec);
            prop_assert_eq!(out.resolved.len() + out.quarantined.len(), lookups.len());

            for r in &out.resolved {
                let hits: Vec<_> = windows.iter().filter(|w| w.contains(r.ts_event_us)).collect();
                prop_assert_eq!(hits.len(), 1);
                prop_assert_eq!(hits[0].symbol_id, r.symbol_id);
            }
            for q in &out.quarantined {
                let ts = lookups[q.row.parse_index];
                prop_assert!(windows.iter().all(|w| !w.contains(ts)));
                prop_assert_eq!(q.reason, QuarantineReason::MissingPitSymbolCoverage);
            }
        }
    }
}
