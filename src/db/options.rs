use std::fs;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::util::Result;

/// Engine configuration.
///
/// Every field has a default, so a JSON document only needs to name the
/// fields it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbOptions {
    /// Bytes written to the mutable memtable before it is rotated and
    /// scheduled for flush.
    pub write_buffer_size: usize,
    /// Number of level-0 files that triggers an automatic compaction.
    pub l0_compaction_trigger: usize,
    pub disable_automatic_compactions: bool,
    /// Treat the bottom levels as living on shared storage.
    pub shared_storage: bool,
    /// Whether elision-only compactions scheduled by snapshot closes run.
    pub elision_only_compactions: bool,
}

impl Default for DbOptions {
    fn default() -> Self {
        DbOptions {
            write_buffer_size: 4 * 1024 * 1024, // 4MB
            l0_compaction_trigger: 4,
            disable_automatic_compactions: false,
            shared_storage: false,
            elision_only_compactions: true,
        }
    }
}

impl DbOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Bounds applied to a user-facing iterator.
#[derive(Debug, Clone, Default)]
pub struct IterOptions {
    /// Inclusive lower bound
    pub lower_bound: Option<Bytes>,
    /// Exclusive upper bound
    pub upper_bound: Option<Bytes>,
}

impl IterOptions {
    pub fn with_bounds(lower: impl Into<Bytes>, upper: impl Into<Bytes>) -> Self {
        IterOptions {
            lower_bound: Some(lower.into()),
            upper_bound: Some(upper.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let options = DbOptions::from_json(r#"{"write_buffer_size": 1024}"#).unwrap();
        assert_eq!(options.write_buffer_size, 1024);
        assert_eq!(options.l0_compaction_trigger, 4);
        assert!(options.elision_only_compactions);
    }

    #[test]
    fn test_json_round_trip() {
        let options = DbOptions {
            shared_storage: true,
            disable_automatic_compactions: true,
            ..Default::default()
        };
        let json = options.to_json().unwrap();
        assert_eq!(DbOptions::from_json(&json).unwrap(), options);
    }

    #[test]
    fn test_invalid_json_is_invalid_argument() {
        let err = DbOptions::from_json("{").unwrap_err();
        assert_eq!(err.code(), &crate::util::Code::InvalidArgument);
    }
}
