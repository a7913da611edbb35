//! RawCull 服务模块
//!
//! 包含扫描、评分持久化、预览提取与缓存、预取和浏览会话

pub mod disk_cache;
pub mod extractor;
pub mod folder_index;
pub mod prefetcher;
pub mod preview_cache;
pub mod recent;
pub mod scanner;
pub mod session;
pub mod settings;
pub mod sidecar;
pub mod watcher;

// 重新导出常用类型
pub use disk_cache::{CleanupStats, DiskCache};
pub use extractor::{ExtractOptions, PreviewExtractor, RawPreviewExtractor};
pub use folder_index::{FolderIndex, RescanSummary};
pub use prefetcher::{PrefetchOptions, Prefetcher};
pub use preview_cache::{CacheOptions, CacheStats, PreviewCache, WarmOutcome};
pub use recent::RecentFolders;
pub use scanner::{is_raw_file, ScanOptions, ScanResult, Scanner, RAW_EXTENSIONS};
pub use session::{AppliedChanges, BrowseSession, FilterOutcome, RateOutcome, SessionDeps};
pub use settings::SettingsManager;
pub use sidecar::{RatingStore, SidecarRead, SidecarStore};
pub use watcher::{FileChangeEvent, FileChangeType, FolderWatcher};
