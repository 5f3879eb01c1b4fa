//! Runtime configuration for a [`crate::Netfs`] context
//!
//! Read from JSON, every field optional:
//!
//! ```
//! use netfs::NetfsConfig;
//!
//! let config = NetfsConfig::from_json(r#"{"debug_mask": 1, "max_requests": 64}"#).unwrap();
//! assert_eq!(config.max_requests, Some(64));
//! assert_eq!(config.report_page_rows, 32);
//! ```

use serde::Deserialize;

use crate::error::NetfsError;

/// Debug mask bit: request lifecycle messages
pub const DEBUG_LIFECYCLE: u32 = 1 << 0;
/// Debug mask bit: reference get/put messages
pub const DEBUG_REFS: u32 = 1 << 1;
/// Debug mask bit: reporter pagination messages
pub const DEBUG_REPORT: u32 = 1 << 2;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NetfsConfig {
    /// Netfs support debugging mask
    pub debug_mask: u32,
    /// Cap on live requests; `None` means unlimited
    pub max_requests: Option<usize>,
    /// Rows per page when streaming the requests listing
    pub report_page_rows: usize,
}

impl Default for NetfsConfig {
    fn default() -> Self {
        Self {
            debug_mask: 0,
            max_requests: None,
            report_page_rows: 32,
        }
    }
}

impl NetfsConfig {
    /// Parse and validate a JSON config.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the JSON is malformed, has unknown keys,
    /// or fails validation.
    pub fn from_json(json: &str) -> Result<Self, NetfsError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| NetfsError::InvalidConfig(format!("Failed to parse config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config from `reader`.
    ///
    /// # Errors
    ///
    /// Same as [`NetfsConfig::from_json`], plus I/O errors from the reader.
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, NetfsError> {
        let config: Self = serde_json::from_reader(reader)
            .map_err(|e| NetfsError::InvalidConfig(format!("Failed to read config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `InvalidConfig` when `report_page_rows` is zero.
    pub fn validate(&self) -> Result<(), NetfsError> {
        if self.report_page_rows == 0 {
            return Err(NetfsError::InvalidConfig(
                "report_page_rows must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn debug(&self, bit: u32) -> bool {
        self.debug_mask & bit != 0
    }
}
