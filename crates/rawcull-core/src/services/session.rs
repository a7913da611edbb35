//! 浏览会话
//!
//! 面向前端的门面：持有索引、缓存、预取器、光标和过滤条件，
//! 把“下一张 / 上一张 / 跳转 / 过滤 / 评分”这样的意图翻译成核心调用。

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;

use super::disk_cache::DiskCache;
use super::extractor::PreviewExtractor;
use super::folder_index::{FolderIndex, RescanSummary};
use super::prefetcher::{PrefetchOptions, Prefetcher};
use super::preview_cache::{CacheOptions, PreviewCache};
use super::scanner::{is_raw_file, is_sidecar_file, ScanOptions};
use super::sidecar::{RatingStore, SidecarStore};
use super::watcher::{FileChangeEvent, FileChangeType, FolderWatcher};
use crate::events::{EventSinkExt, RatingChangedPayload, SharedEventSink, RATING_CHANGED, SCAN_WARNING};
use crate::models::{
    AppSettings, Catalog, Direction, FilterState, ImageEntry, PreviewImage, PreviewStatus, Rating,
};
use crate::utils::error::{AppError, AppResult};

/// 会话依赖的协作者
pub struct SessionDeps {
    pub store: Arc<dyn RatingStore>,
    pub extractor: Arc<dyn PreviewExtractor>,
    pub disk_cache: Option<DiskCache>,
    pub events: SharedEventSink,
}

/// 修改过滤条件的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "index", rename_all = "camelCase")]
pub enum FilterOutcome {
    /// 当前条目仍满足条件
    Stayed(usize),
    /// 光标移到了最近的满足条件的条目
    Moved(usize),
    /// 没有条目满足条件，光标不动
    Empty,
}

/// 评分结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateOutcome {
    pub index: usize,
    pub rating: Rating,
    /// 开启自动前进时移动到的位置
    pub advanced_to: Option<usize>,
}

/// 一次 `apply_file_changes` 的处理结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedChanges {
    pub invalidated: Vec<PathBuf>,
    pub reloaded: Vec<usize>,
    pub needs_rescan: bool,
}

/// 浏览会话
pub struct BrowseSession {
    index: FolderIndex,
    cache: PreviewCache,
    prefetcher: Prefetcher,
    events: SharedEventSink,
    cursor: Option<usize>,
    filter: FilterState,
    auto_advance: bool,
    changes_tx: Sender<FileChangeEvent>,
    changes_rx: Receiver<FileChangeEvent>,
    watcher: Option<FolderWatcher>,
    needs_rescan: bool,
}

impl BrowseSession {
    /// 扫描根目录并打开会话，光标停在第一张
    pub fn open(root: &Path, settings: &AppSettings, deps: SessionDeps) -> AppResult<Self> {
        let index = FolderIndex::open(root, ScanOptions::from(&settings.scan), deps.store)?;
        for warning in index.catalog().warnings() {
            deps.events.emit_typed(SCAN_WARNING, warning);
        }

        let options = CacheOptions::from_settings(&settings.cache, &settings.extract);
        let cache = match deps.disk_cache {
            Some(disk) => PreviewCache::with_disk_cache(deps.extractor, options, disk),
            None => PreviewCache::new(deps.extractor, options),
        };
        let prefetcher = Prefetcher::new(
            cache.clone(),
            PrefetchOptions::from(&settings.prefetch),
            Arc::clone(&deps.events),
        );
        let (changes_tx, changes_rx) = mpsc::channel();

        let mut session = Self {
            index,
            cache,
            prefetcher,
            events: deps.events,
            cursor: None,
            filter: FilterState::default(),
            auto_advance: settings.session.auto_advance,
            changes_tx,
            changes_rx,
            watcher: None,
            needs_rescan: false,
        };
        if !session.catalog().is_empty() {
            session.move_to(0);
        }
        Ok(session)
    }

    /// 使用文件系统 sidecar 存储打开会话
    pub fn open_with_sidecars(
        root: &Path,
        settings: &AppSettings,
        extractor: Arc<dyn PreviewExtractor>,
        disk_cache: Option<DiskCache>,
        events: SharedEventSink,
    ) -> AppResult<Self> {
        let deps = SessionDeps {
            store: Arc::new(SidecarStore::new()),
            extractor,
            disk_cache,
            events,
        };
        Self::open(root, settings, deps)
    }

    pub fn catalog(&self) -> &Catalog {
        self.index.catalog()
    }

    pub fn cache(&self) -> &PreviewCache {
        &self.cache
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn filter(&self) -> FilterState {
        self.filter
    }

    pub fn current_entry(&self) -> Option<&ImageEntry> {
        self.cursor.and_then(|i| self.catalog().get(i))
    }

    /// 当前条目的预览（同步，前台优先）；结果记录到条目上
    pub fn current_preview(&mut self) -> AppResult<Arc<PreviewImage>> {
        let index = self.require_cursor()?;
        let entry = self
            .catalog()
            .get(index)
            .ok_or(AppError::IndexOutOfRange { index, len: self.catalog().len() })?;

        match self.cache.get(entry) {
            Ok(image) => {
                let status = PreviewStatus::Available {
                    width: image.width(),
                    height: image.height(),
                };
                self.index.record_preview(index, status);
                Ok(image)
            }
            Err(error) => {
                tracing::warn!("预览不可用 {}: {}", entry.path.display(), error);
                self.index
                    .record_preview(index, PreviewStatus::Unavailable { error: error.clone() });
                Err(error.into())
            }
        }
    }

    /// 胶片条缩略图
    pub fn thumbnail(&self, index: usize, edge: u32) -> AppResult<RgbImage> {
        let entry = self.entry(index)?;
        Ok(self.cache.thumbnail(entry, edge)?)
    }

    /// 直接跳到某个下标（不受过滤条件限制）
    pub fn go_to(&mut self, index: usize) -> AppResult<usize> {
        self.entry(index)?;
        self.move_to(index);
        Ok(index)
    }

    /// 下一张满足过滤条件的条目；没有时光标不动
    pub fn next(&mut self) -> Option<usize> {
        let from = self.cursor?.checked_add(1)?;
        let target = self
            .catalog()
            .nearest_filtered(from, Direction::Forward, self.filter.min_rating)?;
        Some(self.move_to(target))
    }

    pub fn previous(&mut self) -> Option<usize> {
        let from = self.cursor?.checked_sub(1)?;
        let target = self
            .catalog()
            .nearest_filtered(from, Direction::Backward, self.filter.min_rating)?;
        Some(self.move_to(target))
    }

    pub fn first(&mut self) -> Option<usize> {
        let target = self.catalog().first_filtered(self.filter.min_rating)?;
        Some(self.move_to(target))
    }

    pub fn last(&mut self) -> Option<usize> {
        let target = self.catalog().last_filtered(self.filter.min_rating)?;
        Some(self.move_to(target))
    }

    /// 跳到最后一张已评分（且满足过滤条件）的条目
    pub fn jump_last_rated(&mut self) -> Option<usize> {
        let min = self.filter.min_rating.max(Rating::new(1).ok()?);
        let target = self.catalog().last_filtered(min)?;
        Some(self.move_to(target))
    }

    /// 修改最低评分过滤
    ///
    /// 当前条目仍满足条件时不动；否则先向后、再向前找最近的满足条件的条目；
    /// 一个都没有时光标保持原位。
    pub fn set_filter(&mut self, min_rating: i64) -> AppResult<FilterOutcome> {
        let min = Rating::new(min_rating)?;
        self.filter = FilterState::new(min);

        let Some(cursor) = self.cursor else {
            return Ok(FilterOutcome::Empty);
        };
        let catalog = self.catalog();
        if catalog.get(cursor).is_some_and(|e| self.filter.passes(e)) {
            self.prefetcher.on_navigate(catalog, cursor, self.filter);
            return Ok(FilterOutcome::Stayed(cursor));
        }

        let target = catalog
            .nearest_filtered(cursor, Direction::Forward, min)
            .or_else(|| catalog.nearest_filtered(cursor, Direction::Backward, min));
        Ok(match target {
            Some(index) => FilterOutcome::Moved(self.move_to(index)),
            None => FilterOutcome::Empty,
        })
    }

    /// 给当前条目评分；开启自动前进时移到下一张满足条件的条目
    pub fn rate_current(&mut self, rating: i64) -> AppResult<RateOutcome> {
        let index = self.require_cursor()?;
        let rating = self.set_rating(index, rating)?;
        let advanced_to = if self.auto_advance { self.next() } else { None };
        Ok(RateOutcome {
            index,
            rating,
            advanced_to,
        })
    }

    /// 给任意条目评分（不移动光标）
    pub fn set_rating(&mut self, index: usize, rating: i64) -> AppResult<Rating> {
        let rating = self.index.set_rating(index, rating)?;
        if let Some(entry) = self.catalog().get(index) {
            self.events.emit_typed(
                RATING_CHANGED,
                &RatingChangedPayload {
                    path: entry.path.clone(),
                    index,
                    rating: rating.value(),
                },
            );
        }
        Ok(rating)
    }

    /// 开始监控根目录；变化在 [`apply_file_changes`](Self::apply_file_changes) 时处理
    pub fn watch(&mut self) -> AppResult<()> {
        if self.watcher.is_none() {
            let watcher = FolderWatcher::start_with_sender(self.index.root(), self.changes_tx.clone())?;
            self.watcher = Some(watcher);
        }
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// 外部事件源（或测试）向会话投递文件变化
    pub fn change_sender(&self) -> Sender<FileChangeEvent> {
        self.changes_tx.clone()
    }

    /// 在前台处理所有排队的文件变化
    pub fn apply_file_changes(&mut self) -> AppliedChanges {
        let mut applied = AppliedChanges::default();
        let pending: Vec<FileChangeEvent> = self.changes_rx.try_iter().collect();

        for change in pending {
            if is_raw_file(&change.path) {
                match change.change_type {
                    FileChangeType::Created => {
                        if !self.catalog().contains_path(&change.path) {
                            self.needs_rescan = true;
                        }
                    }
                    FileChangeType::Modified | FileChangeType::Removed => {
                        self.cache.invalidate_path(&change.path);
                        if !applied.invalidated.contains(&change.path) {
                            applied.invalidated.push(change.path.clone());
                        }
                        if change.change_type == FileChangeType::Removed {
                            self.needs_rescan = true;
                        }
                    }
                }
            } else if is_sidecar_file(&change.path) {
                for raw in self.raws_for_sidecar(&change.path) {
                    if let Some(index) = self.index.reload_rating(&raw) {
                        if !applied.reloaded.contains(&index) {
                            applied.reloaded.push(index);
                        }
                    }
                }
            }
        }

        applied.needs_rescan = self.needs_rescan;
        applied
    }

    pub fn needs_rescan(&self) -> bool {
        self.needs_rescan
    }

    /// 重新扫描；光标尽量停在原来的文件上
    pub fn rescan(&mut self) -> AppResult<RescanSummary> {
        let current_path = self.current_entry().map(|e| e.path.clone());
        let summary = self.index.rescan()?;

        for path in summary.changed.iter().chain(&summary.removed) {
            self.cache.invalidate_path(path);
        }
        self.needs_rescan = false;

        let len = self.catalog().len();
        let target = current_path
            .and_then(|p| self.catalog().position_of(&p))
            .or_else(|| self.cursor.map(|c| c.min(len.saturating_sub(1))));
        match target {
            Some(index) if index < len => {
                self.move_to(index);
            }
            _ => self.cursor = None,
        }
        Ok(summary)
    }

    fn move_to(&mut self, index: usize) -> usize {
        self.cursor = Some(index);
        self.prefetcher.on_navigate(self.index.catalog(), index, self.filter);
        index
    }

    fn require_cursor(&self) -> AppResult<usize> {
        self.cursor.ok_or(AppError::IndexOutOfRange { index: 0, len: 0 })
    }

    fn entry(&self, index: usize) -> AppResult<&ImageEntry> {
        self.catalog().get(index).ok_or(AppError::IndexOutOfRange {
            index,
            len: self.catalog().len(),
        })
    }

    /// 可能使用这个 sidecar 的 RAW 文件：`a.xmp` 对应 `a.*`，`a.nef.xmp` 对应 `a.nef`
    fn raws_for_sidecar(&self, sidecar: &Path) -> Vec<PathBuf> {
        let catalog = self.catalog();
        let base = sidecar.with_extension("");
        let mut indices: Vec<usize> = catalog.indices_with_stem(&base).to_vec();
        indices.extend(catalog.position_of(&base));
        indices.sort_unstable();
        indices.dedup();
        indices
            .into_iter()
            .filter_map(|i| catalog.get(i))
            .filter(|e| SidecarStore::candidates(&e.path).iter().any(|c| c == sidecar))
            .map(|e| e.path.clone())
            .collect()
    }
}
