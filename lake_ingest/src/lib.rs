//! Deterministic ingestion core for a market-data lake.
//!
//! Bronze vendor files go in; partitioned Parquet event tables, a quarantine table and a
//! file manifest come out. The crate guarantees:
//! - exactly-once observable effects per bronze file, driven by the [`manifest`];
//! - no silent drops: every parsed row is either written or quarantined;
//! - replay order by `(file_id, file_seq)` that is identical across reruns ([`lineage`]);
//! - point-in-time instrument identity against an SCD2 symbol dimension ([`pit`]).
//!
//! The entry point is [`ingest::Ingestor`].

#![warn(missing_docs)]

pub mod bronze;
pub mod config;
pub mod db;
pub mod dimension;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod lineage;
pub mod manifest;
pub mod models;
pub mod parser;
pub mod pit;
pub mod registry;
pub mod rows;
#[allow(missing_docs)]
pub mod schema;
pub mod store;
pub mod trading_date;
pub mod tz;
pub mod validate;
