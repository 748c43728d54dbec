//! Parser adapters: the seam between vendor formats and the intermediate contract.
//!
//! Adapters live outside this crate. They are registered per data type in a
//! [`ParserRegistry`] and looked up at ingestion time, the same way concrete data
//! providers are built from an id. A data type without an adapter is a configuration
//! error.

use std::collections::HashMap;

use thiserror::Error;

use crate::bronze::BronzeFileMetadata;
use crate::error::ConfigError;
use crate::frame::IntermediateFrame;
use crate::registry::normalize_table_name;

/// Failure inside an adapter. The file is marked `failed` with this message.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The capture file could not be read.
    #[error("read {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The vendor data is malformed.
    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Turns one bronze file into an [`IntermediateFrame`].
pub trait ParserAdapter: Send + Sync {
    /// Data type this adapter produces frames for.
    fn data_type(&self) -> &str;

    /// Parse the file. Rows must come out in the order they appear in the source.
    fn parse(&self, meta: &BronzeFileMetadata) -> Result<IntermediateFrame, ParseError>;
}

/// Data type -> adapter.
#[derive(Default)]
pub struct ParserRegistry {
    adapters: HashMap<String, Box<dyn ParserAdapter>>,
}

impl ParserRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under its data type, replacing any previous one.
    pub fn register(&mut self, adapter: Box<dyn ParserAdapter>) -> &mut Self {
        self.adapters.insert(normalize_table_name(adapter.data_type()), adapter);
        self
    }

    /// Builder-style [`Self::register`].
    pub fn with(mut self, adapter: impl ParserAdapter + 'static) -> Self {
        self.register(Box::new(adapter));
        self
    }

    /// Adapter for `data_type`.
    pub fn get(&self, data_type: &str) -> Result<&dyn ParserAdapter, ConfigError> {
        self.adapters
            .get(&normalize_table_name(data_type))
            .map(|a| a.as_ref())
            .ok_or_else(|| ConfigError::NoParser(data_type.to_string()))
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.adapters.keys().collect();
        keys.sort();
        f.debug_struct("ParserRegistry").field("data_types", &keys).finish()
    }
}
