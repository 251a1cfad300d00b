//! Application configuration module
//!
//! This module handles viewer-wide configuration: the colors used by the
//! visual-state priority chain and the batching settings.

mod manager;

pub use manager::{ConfigError, ConfigManager, SharedConfig, create_shared_config};

use gv_core::{BatchConfig, ColorSettings};
use serde::{Deserialize, Serialize};

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    /// Configuration format version
    #[serde(default)]
    pub version: u32,
    /// Selection, highlight and isolation colors
    #[serde(default)]
    pub colors: ColorSettings,
    /// Merge policy and build settings
    #[serde(default)]
    pub batching: BatchConfig,
}

impl AppConfig {
    /// Current configuration version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            ..Default::default()
        }
    }
}
