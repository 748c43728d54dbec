//! Lineage assignment.
//!
//! Every row of a file gets `(file_id, file_seq)`. `file_seq` is dense and 0-based
//! (`0..n`), following the table's tie-break keys and then parse order. The sort is a pure
//! function of row contents plus parse order, so re-ingesting the same bytes always yields
//! the same `file_seq` for the same row.

use std::cmp::Ordering;

use crate::registry::TableSpec;
use crate::rows::{ContractRow, SequencedRow};

/// Assign lineage to the conformed rows of one file. Output is ordered by `file_seq`.
pub fn assign(file_id: i64, rows: Vec<ContractRow>, spec: &TableSpec) -> Vec<SequencedRow> {
    let keys = spec.tie_break_indices();
    let mut rows = rows;
    rows.sort_by(|a, b| compare(&keys, a, b));

    rows.into_iter()
        .enumerate()
        .map(|(seq, r)| SequencedRow {
            file_id,
            file_seq: seq as i64,
            parse_index: r.parse_index,
            values: r.values,
        })
        .collect()
}

fn compare(keys: &[usize], a: &ContractRow, b: &ContractRow) -> Ordering {
    keys.iter()
        .map(|&k| a.values[k].total_cmp(&b.values[k]))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
        .then(a.parse_index.cmp(&b.parse_index))
}
