//! 数据模型

pub mod catalog;
pub mod entry;
pub mod preview;
pub mod settings;

pub use catalog::{
    natural_path_cmp, sort_entries, Catalog, Direction, FilterState, FilteredIndices, ScanWarning,
    ScanWarningKind, SortOrder,
};
pub use entry::{CacheKey, ImageEntry, ModSignature, PreviewStatus, Rating};
pub use preview::{Orientation, PreviewImage};
pub use settings::{
    AppSettings, CacheSettings, ExtractSettings, PrefetchSettings, ScanSettings, SessionSettings,
};
