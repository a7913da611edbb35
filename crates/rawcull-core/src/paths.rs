//! Path provider abstraction.
//!
//! Resolves where settings, the disk preview cache, logs and the recent
//! folder list live, so tests and frontends can relocate all of them at once.

use std::path::PathBuf;
use std::sync::Arc;

/// Trait for providing application data paths.
pub trait PathProvider: Send + Sync {
    /// Get the root application data directory.
    fn app_data_dir(&self) -> PathBuf;

    fn config_dir(&self) -> PathBuf {
        self.app_data_dir().join("Config")
    }

    /// Get the settings file path.
    fn settings_path(&self) -> PathBuf {
        self.config_dir().join("settings.json")
    }

    /// Get the recent folders file path.
    fn recent_folders_path(&self) -> PathBuf {
        self.config_dir().join("recent_folders.json")
    }

    /// Get the disk preview cache directory.
    fn cache_dir(&self) -> PathBuf {
        self.app_data_dir().join("Cache")
    }

    /// Get the logs directory.
    fn logs_dir(&self) -> PathBuf {
        self.app_data_dir().join("Logs")
    }
}

/// Shared reference to a PathProvider implementation.
pub type SharedPathProvider = Arc<dyn PathProvider>;

/// Default provider using `<data_dir>/RawCull/`.
#[derive(Debug, Clone)]
pub struct DefaultPathProvider {
    app_data_dir: PathBuf,
}

impl DefaultPathProvider {
    pub fn new() -> Self {
        let app_data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("RawCull");
        Self { app_data_dir }
    }

    /// Create a provider rooted at a custom base directory.
    ///
    /// Useful for testing.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            app_data_dir: base_dir,
        }
    }
}

impl Default for DefaultPathProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PathProvider for DefaultPathProvider {
    fn app_data_dir(&self) -> PathBuf {
        self.app_data_dir.clone()
    }
}
