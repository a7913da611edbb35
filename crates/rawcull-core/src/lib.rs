//! RawCull Core Library
//!
//! Preview extraction and rating persistence for culling folders of RAW
//! camera files. The crate has no UI; a frontend supplies a root folder and
//! navigation intents, and gets back an ordered catalog, embedded previews
//! and durable XMP star ratings.
//!
//! # Architecture
//!
//! - `models`: Data structures (ImageEntry, Catalog, PreviewImage, AppSettings)
//! - `services`: Scanner, FolderIndex, SidecarStore, PreviewExtractor,
//!   PreviewCache, Prefetcher, BrowseSession and friends
//! - `events`: Event emission abstraction (EventSink trait)
//! - `paths`: Path provider abstraction (PathProvider trait)
//! - `jobs`: Generation tracking for cancellable background work
//! - `utils`: Error handling and utilities
//!
//! # Example
//!
//! ```no_run
//! use rawcull_core::{events::NoOpEventSink, paths::DefaultPathProvider, RawcullCore};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let core = RawcullCore::new(Arc::new(DefaultPathProvider::new()), Arc::new(NoOpEventSink)).unwrap();
//! let mut session = core.open_session(Path::new("/photos/2024-06-01")).unwrap();
//! let preview = session.current_preview().unwrap();
//! println!("{}x{}", preview.width(), preview.height());
//! session.rate_current(4).unwrap();
//! ```

pub mod events;
pub mod jobs;
pub mod models;
pub mod paths;
pub mod services;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use events::{EventSink, LoggingEventSink, NoOpEventSink, SharedEventSink};
pub use jobs::{Generation, GenerationClock, GenerationToken};
pub use models::{AppSettings, Catalog, ImageEntry, PreviewImage, Rating};
pub use paths::{DefaultPathProvider, PathProvider, SharedPathProvider};
pub use services::{
    BrowseSession, FolderIndex, PreviewCache, PreviewExtractor, Prefetcher, RawPreviewExtractor,
    RecentFolders, SettingsManager, SidecarStore,
};
pub use utils::{AppError, AppResult, CommandError, ExtractError};

use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;

use services::{DiskCache, ExtractOptions, RatingStore, SessionDeps};

/// RawCull core application context.
///
/// Holds the shared collaborators built from settings. Each opened folder
/// gets its own [`BrowseSession`].
pub struct RawcullCore {
    /// Path provider for resolving application paths
    pub path_provider: SharedPathProvider,
    /// Event sink for emitting events to the frontend
    pub event_sink: SharedEventSink,
    settings: AppSettings,
    store: Arc<dyn RatingStore>,
    extractor: Arc<dyn PreviewExtractor>,
    disk_pruned: Once,
}

impl RawcullCore {
    /// Load settings through `path_provider` and build the shared services.
    pub fn new(path_provider: SharedPathProvider, event_sink: SharedEventSink) -> AppResult<Self> {
        let settings = SettingsManager::new(path_provider.as_ref())?.load()?;
        Ok(Self::with_settings(path_provider, event_sink, settings))
    }

    pub fn with_settings(
        path_provider: SharedPathProvider,
        event_sink: SharedEventSink,
        settings: AppSettings,
    ) -> Self {
        let extractor = RawPreviewExtractor::new(ExtractOptions::from(&settings.extract));
        Self {
            path_provider,
            event_sink,
            settings,
            store: Arc::new(SidecarStore::new()),
            extractor: Arc::new(extractor),
            disk_pruned: Once::new(),
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn RatingStore> {
        &self.store
    }

    pub fn extractor(&self) -> &Arc<dyn PreviewExtractor> {
        &self.extractor
    }

    /// The on-disk preview tier, when enabled in settings.
    ///
    /// The first call prunes entries past the configured age and size limits.
    pub fn disk_cache(&self) -> Option<DiskCache> {
        if !self.settings.cache.disk_cache {
            return None;
        }
        match DiskCache::new(self.path_provider.cache_dir()) {
            Ok(cache) => {
                self.disk_pruned.call_once(|| self.prune_disk_cache(&cache));
                Some(cache)
            }
            Err(e) => {
                tracing::warn!("Disk cache unavailable, continuing in memory only: {}", e);
                None
            }
        }
    }

    fn prune_disk_cache(&self, cache: &DiskCache) {
        let settings = &self.settings.cache;
        let max_age = (settings.disk_max_age_days > 0)
            .then(|| Duration::from_secs(settings.disk_max_age_days.saturating_mul(24 * 3600)));
        let max_bytes = (settings.disk_max_megabytes > 0)
            .then(|| settings.disk_max_megabytes.saturating_mul(1024 * 1024));
        if let Err(e) = cache.prune(max_age, max_bytes) {
            tracing::warn!("Failed to prune disk cache: {}", e);
        }
    }

    /// Scan `root`, remember it in the recent folders list and open a session.
    pub fn open_session(&self, root: &Path) -> AppResult<BrowseSession> {
        let session = BrowseSession::open(
            root,
            &self.settings,
            SessionDeps {
                store: Arc::clone(&self.store),
                extractor: Arc::clone(&self.extractor),
                disk_cache: self.disk_cache(),
                events: Arc::clone(&self.event_sink),
            },
        )?;

        match RecentFolders::new(self.path_provider.as_ref()) {
            Ok(mut recent) => {
                if let Err(e) = recent.add(session.catalog().root()) {
                    tracing::warn!("Failed to update recent folders: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to load recent folders: {}", e),
        }
        Ok(session)
    }

    pub fn recent_folders(&self) -> AppResult<RecentFolders> {
        RecentFolders::new(self.path_provider.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_core_opens_session_and_records_recent() {
        let app = TempDir::new().unwrap();
        let photos = TempDir::new().unwrap();
        std::fs::write(photos.path().join("a.nef"), b"not really a raw").unwrap();

        let provider = Arc::new(DefaultPathProvider::with_base_dir(app.path().to_path_buf()));
        let core = RawcullCore::new(provider, Arc::new(NoOpEventSink)).unwrap();
        assert_eq!(core.settings(), &AppSettings::default());

        let mut session = core.open_session(photos.path()).unwrap();
        assert_eq!(session.catalog().len(), 1);
        // 扩展名像 NEF，内容却不是 TIFF
        assert!(matches!(
            session.current_preview(),
            Err(AppError::Preview(ExtractError::CorruptFile(_)))
        ));

        let recent = core.recent_folders().unwrap();
        assert_eq!(recent.folders(), &[photos.path().to_path_buf()]);
        assert!(app.path().join("Cache").join("previews").is_dir());
    }

    #[test]
    fn test_disk_cache_prunes_stale_entries_on_first_use() {
        use std::time::SystemTime;

        let app = TempDir::new().unwrap();
        let provider = Arc::new(DefaultPathProvider::with_base_dir(app.path().to_path_buf()));
        let previews = provider.cache_dir().join("previews");
        std::fs::create_dir_all(&previews).unwrap();
        let stale = previews.join("0123.png");
        let fresh = previews.join("4567.png");
        std::fs::write(&stale, b"old").unwrap();
        std::fs::write(&fresh, b"new").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60 * 24 * 3600))
            .unwrap();

        let core = RawcullCore::with_settings(provider, Arc::new(NoOpEventSink), AppSettings::default());
        assert!(core.disk_cache().is_some());
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn test_disk_cache_can_be_disabled() {
        let app = TempDir::new().unwrap();
        let mut settings = AppSettings::default();
        settings.cache.disk_cache = false;
        let core = RawcullCore::with_settings(
            Arc::new(DefaultPathProvider::with_base_dir(app.path().to_path_buf())),
            Arc::new(NoOpEventSink),
            settings,
        );
        assert!(core.disk_cache().is_none());
    }
}
