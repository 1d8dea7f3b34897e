//! User-level configuration (`~/.recap/config.toml`).
//!
//! Discovery scan roots and marker keywords are configuration, not
//! compiled-in constants, so tests can point everything at tempdirs.

use crate::core::error::RecapError;
use crate::core::store;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecapConfig {
    /// Whole-word, case-sensitive marker keywords scanned in added lines.
    pub marker_keywords: Vec<String>,
    /// Directories walked by `workspaces --discover`.
    pub scan_roots: Vec<PathBuf>,
    /// Upper bound on the external summarization call, in seconds.
    pub summary_timeout_secs: u64,
    /// Maximum directory depth for discovery walks.
    pub discovery_max_depth: usize,
}

impl Default for RecapConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").map(PathBuf::from).unwrap_or_default();
        RecapConfig {
            marker_keywords: vec!["TODO".to_string(), "FIXME".to_string()],
            scan_roots: vec![
                home.join("Projects"),
                home.join("Documents"),
                home.join("Desktop"),
            ],
            summary_timeout_secs: 10,
            discovery_max_depth: 5,
        }
    }
}

impl RecapConfig {
    /// Load from the user directory, falling back to defaults when the file
    /// is absent. A malformed file is an error, not a silent fallback.
    pub fn load() -> Result<Self, RecapError> {
        let path = store::user_home()?.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(RecapConfig::default());
        }
        let raw = fs::read_to_string(&path).map_err(RecapError::IoError)?;
        toml::from_str(&raw).map_err(|e| {
            RecapError::ValidationError(format!("invalid config at {}: {}", path.display(), e))
        })
    }
}
