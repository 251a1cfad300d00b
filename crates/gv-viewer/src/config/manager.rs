//! Configuration manager for loading, saving, and managing app configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use super::AppConfig;

/// Shared configuration manager type
pub type SharedConfig = Arc<RwLock<ConfigManager>>;

/// Configuration error types
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// IO error during file operations
    Io(String),
    /// Error during serialization
    Serialize(String),
    /// Error during deserialization
    Deserialize(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO error: {}", msg),
            ConfigError::Serialize(msg) => write!(f, "Serialization error: {}", msg),
            ConfigError::Deserialize(msg) => write!(f, "Deserialization error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration manager handles loading, saving, and accessing app configuration
pub struct ConfigManager {
    config: AppConfig,
    config_path: PathBuf,
    dirty: bool,
}

impl ConfigManager {
    /// Create a new configuration manager, loading from the OS config directory if available
    pub fn new() -> Self {
        Self::with_path(Self::default_config_path())
    }

    /// Create a configuration manager backed by a specific file
    pub fn with_path(config_path: PathBuf) -> Self {
        let config = match Self::load_from_path(&config_path) {
            Ok(Some(config)) => config,
            Ok(None) => {
                tracing::info!("No config file found, using defaults");
                AppConfig::new()
            }
            Err(e) => {
                tracing::warn!("Failed to load config file: {}", e);
                AppConfig::new()
            }
        };

        Self {
            config,
            config_path,
            dirty: false,
        }
    }

    /// Get the OS-standard configuration directory
    fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gv-viewer")
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::config_dir().join("config.ron")
    }

    /// Load configuration from a file path. A missing file is not an error.
    pub fn load_from_path(path: &Path) -> Result<Option<AppConfig>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::Io(e.to_string())),
        };

        let config = ron::from_str(&content).map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(Some(config))
    }

    /// Get a reference to the current configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Get a mutable reference to the configuration (marks as dirty)
    pub fn config_mut(&mut self) -> &mut AppConfig {
        self.dirty = true;
        &mut self.config
    }

    /// Check if the configuration has unsaved changes
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Save the configuration to disk
    pub fn save(&mut self) -> Result<(), ConfigError> {
        if !self.dirty {
            return Ok(());
        }

        // Ensure config directory exists
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = ron::ser::to_string_pretty(&self.config, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(&self.config_path, &content).map_err(|e| ConfigError::Io(e.to_string()))?;

        tracing::info!("Saved config to {:?}", self.config_path);
        self.dirty = false;
        Ok(())
    }

    /// Reset configuration to defaults
    pub fn reset_to_defaults(&mut self) {
        self.config = AppConfig::new();
        self.dirty = true;
    }

    /// Get the config file path (for display purposes)
    pub fn config_file_path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a new shared configuration manager
pub fn create_shared_config() -> SharedConfig {
    Arc::new(RwLock::new(ConfigManager::new()))
}

#[cfg(test)]
mod tests {
    use gv_core::MergePolicy;

    use super::*;

    fn temp_config_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("gv-viewer-test-{}-{}", name, std::process::id()))
            .join("config.ron")
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let manager = ConfigManager::with_path(temp_config_path("missing"));
        assert_eq!(manager.config(), &AppConfig::new());
        assert!(!manager.is_dirty());
    }

    #[test]
    fn test_save_and_reload() {
        let path = temp_config_path("reload");
        let mut manager = ConfigManager::with_path(path.clone());
        manager.config_mut().batching.merge_policy = Some(MergePolicy::Scene);
        manager.config_mut().colors.selection_color = [1.0, 0.0, 0.0];
        assert!(manager.is_dirty());
        manager.save().unwrap();
        assert!(!manager.is_dirty());

        let reloaded = ConfigManager::with_path(path.clone());
        assert_eq!(reloaded.config(), manager.config());

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_corrupt_file_reports_deserialize_error() {
        let path = temp_config_path("corrupt");
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::write(&path, "(version: \"nope\"").unwrap();

        let result = ConfigManager::load_from_path(&path);
        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
        // Falls back to defaults.
        assert_eq!(ConfigManager::with_path(path.clone()).config(), &AppConfig::new());

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_reset_marks_dirty() {
        let mut manager = ConfigManager::with_path(temp_config_path("reset"));
        manager.reset_to_defaults();
        assert!(manager.is_dirty());
    }
}
