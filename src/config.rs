//! Engine configuration

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Maximum concurrent file transfers per job
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Entries requested per directory page
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// File names shown in the activity label before the overflow count
pub const DEFAULT_ACTIVITY_LABEL_NAMES: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub concurrency: usize,
    pub page_size: u32,
    pub activity_label_names: usize,
    pub progress_events: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
            activity_label_names: DEFAULT_ACTIVITY_LABEL_NAMES,
            progress_events: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: EngineConfig = serde_json::from_str(json).map_err(|e| EngineError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.concurrency == 0 {
            return Err(EngineError::Config {
                message: "concurrency must be at least 1".to_string(),
            });
        }
        if self.page_size == 0 {
            return Err(EngineError::Config {
                message: "page_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
