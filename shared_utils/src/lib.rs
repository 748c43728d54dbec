//! Small helpers shared across the lake workspace.

pub mod env;
