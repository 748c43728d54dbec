//! Bronze file metadata as handed over by discovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable vendor capture file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BronzeFileMetadata {
    /// Vendor code, e.g. "tardis".
    pub vendor: String,
    /// Data type, which is also the target table name.
    pub data_type: String,
    /// Location of the capture file.
    pub bronze_path: String,
    /// Content hash of the capture file.
    pub file_hash: String,
    /// When discovery first saw the file.
    pub discovered_at: DateTime<Utc>,
}

/// The four fields that identify a bronze file in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Vendor code.
    pub vendor: String,
    /// Data type.
    pub data_type: String,
    /// Capture file path.
    pub bronze_path: String,
    /// Content hash.
    pub file_hash: String,
}

impl BronzeFileMetadata {
    /// Identity of this file.
    pub fn identity(&self) -> FileIdentity {
        FileIdentity {
            vendor: self.vendor.clone(),
            data_type: self.data_type.clone(),
            bronze_path: self.bronze_path.clone(),
            file_hash: self.file_hash.clone(),
        }
    }
}
