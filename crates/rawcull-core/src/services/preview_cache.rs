//! 预览缓存服务
//!
//! 内存 LRU（按条目数和像素字节数双重限制）+ 可选磁盘缓存。
//! 同一缓存键的并发请求只触发一次提取；前台请求优先于后台预取。

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use image::RgbImage;
use lru::LruCache;
use serde::Serialize;

use super::disk_cache::DiskCache;
use super::extractor::PreviewExtractor;
use crate::jobs::GenerationToken;
use crate::models::{CacheKey, CacheSettings, ExtractSettings, ImageEntry, ModSignature, PreviewImage};
use crate::utils::dedup::Dedup;
use crate::utils::error::ExtractError;

/// 后台任务等待前台空闲时的轮询间隔
const IDLE_POLL: Duration = Duration::from_millis(25);

/// 缓存容量与超时配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub extract_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_entries: 32,
            max_bytes: 768 * 1024 * 1024,
            extract_timeout: Duration::from_secs(5),
        }
    }
}

impl CacheOptions {
    pub fn from_settings(cache: &CacheSettings, extract: &ExtractSettings) -> Self {
        Self {
            max_entries: cache.max_entries.max(1),
            max_bytes: usize::try_from(cache.max_megabytes.saturating_mul(1024 * 1024))
                .unwrap_or(usize::MAX),
            extract_timeout: Duration::from_millis(extract.timeout_ms.max(1)),
        }
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub extractions: u64,
    pub entries: usize,
    pub bytes: usize,
}

/// 后台预热结果
#[derive(Debug, Clone)]
pub enum WarmOutcome {
    AlreadyCached,
    Loaded(Arc<PreviewImage>),
    /// 等待期间用户已导航到别处
    Stale,
    Failed(ExtractError),
}

/// 正在进行的前台请求计数
#[derive(Default)]
struct ForegroundGate {
    active: Mutex<usize>,
    idle: Condvar,
}

struct ForegroundGuard<'a>(&'a ForegroundGate);

impl ForegroundGate {
    fn enter(&self) -> ForegroundGuard<'_> {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        ForegroundGuard(self)
    }

    /// 等待前台空闲，超时返回 false
    fn wait_idle(&self, timeout: Duration) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let (active, _) = self
            .idle
            .wait_timeout_while(active, timeout, |n| *n > 0)
            .unwrap_or_else(|e| e.into_inner());
        *active == 0
    }
}

impl Drop for ForegroundGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.0.active.lock().unwrap_or_else(|e| e.into_inner());
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.0.idle.notify_all();
        }
    }
}

type ExtractResult = Result<Arc<PreviewImage>, ExtractError>;

/// 一次提取线程的结果槽
///
/// 调用方超时返回后线程仍在运行，槽留在 `running` 表中，
/// 后来的同键请求等待这个槽而不是再启动一次提取。
#[derive(Default)]
struct PendingExtraction {
    result: Mutex<Option<ExtractResult>>,
    done: Condvar,
}

impl PendingExtraction {
    fn finish(&self, result: ExtractResult) {
        *self.result.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
        self.done.notify_all();
    }

    /// 最多等待 `timeout`，超时返回 `None`
    fn wait(&self, timeout: Duration) -> Option<ExtractResult> {
        let result = self.result.lock().unwrap_or_else(|e| e.into_inner());
        let (result, _) = self
            .done
            .wait_timeout_while(result, timeout, |r| r.is_none())
            .unwrap_or_else(|e| e.into_inner());
        result.clone()
    }
}

struct LruState {
    cache: LruCache<CacheKey, Arc<PreviewImage>>,
    bytes: usize,
}

struct Inner {
    extractor: Arc<dyn PreviewExtractor>,
    options: CacheOptions,
    state: Mutex<LruState>,
    in_flight: Dedup<CacheKey, Arc<PreviewImage>, ExtractError>,
    /// 提取线程尚未结束的键（包括调用方已超时放弃的）
    running: Mutex<HashMap<CacheKey, Arc<PendingExtraction>>>,
    foreground: ForegroundGate,
    disk: Option<DiskCache>,
    hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    extractions: AtomicU64,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, LruState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<PreviewImage>> {
        self.state().cache.get(key).cloned()
    }

    /// 插入并按容量淘汰最久未使用的条目；刚插入的条目总会保留
    fn insert(&self, key: CacheKey, image: Arc<PreviewImage>) {
        let size = image.byte_size();
        let mut state = self.state();

        if let Some((_, old)) = state.cache.pop_entry(&key) {
            state.bytes = state.bytes.saturating_sub(old.byte_size());
        }

        while !state.cache.is_empty()
            && (state.cache.len() >= self.options.max_entries
                || state.bytes + size > self.options.max_bytes)
        {
            if let Some((evicted, old)) = state.cache.pop_lru() {
                state.bytes = state.bytes.saturating_sub(old.byte_size());
                tracing::debug!("淘汰预览缓存: {:?}", evicted.path);
            }
        }

        state.bytes += size;
        state.cache.put(key, image);
    }

    /// 删除某个路径下所有签名的缓存，返回被删除的键
    fn purge_path(&self, path: &Path) -> Vec<CacheKey> {
        let mut state = self.state();
        let keys: Vec<CacheKey> = state
            .cache
            .iter()
            .filter(|(k, _)| k.path == path)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            if let Some(old) = state.cache.pop(key) {
                state.bytes = state.bytes.saturating_sub(old.byte_size());
            }
        }
        keys
    }

    fn running(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<PendingExtraction>>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 在独立线程中提取，超过超时时间视为损坏文件
    ///
    /// 每个键同时最多一个提取线程。超时后线程继续运行，成功的结果仍会写入缓存；
    /// 线程结束前到来的同键请求只等待它的结果。
    fn extract_with_timeout(self: &Arc<Self>, key: &CacheKey) -> ExtractResult {
        let (pending, started) = {
            let mut running = self.running();
            match running.get(key) {
                Some(pending) => (Arc::clone(pending), false),
                None => {
                    let pending = Arc::new(PendingExtraction::default());
                    running.insert(key.clone(), Arc::clone(&pending));
                    (pending, true)
                }
            }
        };
        if !started {
            tracing::debug!("等待仍在进行的提取: {:?}", key.path);
        } else if let Err(e) = self.spawn_extraction(key.clone(), Arc::clone(&pending)) {
            self.running().remove(key);
            pending.finish(Err(e.clone()));
            return Err(e);
        }

        pending.wait(self.options.extract_timeout).unwrap_or_else(|| {
            tracing::warn!(
                "预览提取超时 ({} ms): {:?}",
                self.options.extract_timeout.as_millis(),
                key.path
            );
            Err(ExtractError::CorruptFile(format!(
                "提取超时（{} ms）",
                self.options.extract_timeout.as_millis()
            )))
        })
    }

    fn spawn_extraction(
        self: &Arc<Self>,
        key: CacheKey,
        pending: Arc<PendingExtraction>,
    ) -> Result<(), ExtractError> {
        let worker = Arc::clone(self);
        thread::Builder::new()
            .name("preview-extract".to_string())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| worker.extractor.extract(&key.path)))
                    .unwrap_or_else(|_| {
                        tracing::error!("预览提取崩溃: {:?}", key.path);
                        Err(ExtractError::CorruptFile("提取过程崩溃".to_string()))
                    })
                    .map(Arc::new);
                worker.extractions.fetch_add(1, Ordering::Relaxed);

                // 先写入内存缓存再移出 running 表，之后的请求一定能命中其中之一
                if let Ok(image) = &result {
                    worker.insert(key.clone(), Arc::clone(image));
                }
                let stored = result.as_ref().ok().cloned();
                pending.finish(result);
                {
                    let mut running = worker.running();
                    if running.get(&key).is_some_and(|p| Arc::ptr_eq(p, &pending)) {
                        running.remove(&key);
                    }
                }

                if let (Some(disk), Some(image)) = (&worker.disk, stored) {
                    if let Err(e) = disk.store(&key, &image) {
                        tracing::warn!("写入磁盘缓存失败 {:?}: {}", key.path, e);
                    }
                }
            })
            .map(|_| ())
            .map_err(|e| ExtractError::CorruptFile(format!("无法启动提取线程: {}", e)))
    }

    #[cfg(test)]
    fn is_extracting(&self, key: &CacheKey) -> bool {
        self.running().contains_key(key)
    }
}

/// 预览缓存（可廉价克隆的句柄，内部状态共享）
#[derive(Clone)]
pub struct PreviewCache {
    inner: Arc<Inner>,
}

impl PreviewCache {
    pub fn new(extractor: Arc<dyn PreviewExtractor>, options: CacheOptions) -> Self {
        Self::build(extractor, options, None)
    }

    pub fn with_disk_cache(
        extractor: Arc<dyn PreviewExtractor>,
        options: CacheOptions,
        disk: DiskCache,
    ) -> Self {
        Self::build(extractor, options, Some(disk))
    }

    fn build(extractor: Arc<dyn PreviewExtractor>, options: CacheOptions, disk: Option<DiskCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                extractor,
                options,
                state: Mutex::new(LruState {
                    cache: LruCache::unbounded(),
                    bytes: 0,
                }),
                in_flight: Dedup::new(),
                running: Mutex::new(HashMap::new()),
                foreground: ForegroundGate::default(),
                disk,
                hits: AtomicU64::new(0),
                disk_hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                extractions: AtomicU64::new(0),
            }),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    /// 前台获取预览：命中直接返回，否则提取（期间后台预取让路）
    pub fn get(&self, entry: &ImageEntry) -> Result<Arc<PreviewImage>, ExtractError> {
        self.fetch(&entry.cache_key(), true)
    }

    /// 后台预热：等待前台空闲、确认任务未过期后再提取
    pub fn warm(&self, key: &CacheKey, token: &GenerationToken) -> WarmOutcome {
        if self.contains(key) {
            return WarmOutcome::AlreadyCached;
        }
        while !self.inner.foreground.wait_idle(IDLE_POLL) {
            if token.is_stale() {
                return WarmOutcome::Stale;
            }
        }
        if token.is_stale() {
            return WarmOutcome::Stale;
        }
        match self.fetch(key, false) {
            Ok(image) => WarmOutcome::Loaded(image),
            Err(e) => WarmOutcome::Failed(e),
        }
    }

    /// 以文件当前签名为准；签名变化时清掉旧签名的缓存
    fn live_key(&self, key: &CacheKey) -> Result<CacheKey, ExtractError> {
        let signature = ModSignature::of(&key.path).map_err(|e| {
            ExtractError::CorruptFile(format!("无法读取文件信息 {}: {}", key.path.display(), e))
        })?;
        if signature == key.signature {
            return Ok(key.clone());
        }
        tracing::debug!("文件已修改，作废旧预览: {:?}", key.path);
        for old in self.inner.purge_path(&key.path) {
            if let Some(disk) = &self.inner.disk {
                disk.remove(&old);
            }
        }
        Ok(CacheKey::new(key.path.clone(), signature))
    }

    fn fetch(&self, key: &CacheKey, foreground: bool) -> ExtractResult {
        let key = self.live_key(key)?;
        if let Some(image) = self.inner.lookup(&key) {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(image);
        }
        self.inner.misses.fetch_add(1, Ordering::Relaxed);

        let _guard = foreground.then(|| self.inner.foreground.enter());
        let inner = &self.inner;
        inner.in_flight.call(key.clone(), || {
            // 排队期间可能已被其他请求填充
            if let Some(image) = inner.lookup(&key) {
                return Ok(image);
            }
            if let Some(image) = inner.disk.as_ref().and_then(|d| d.load(&key)) {
                inner.disk_hits.fetch_add(1, Ordering::Relaxed);
                let image = Arc::new(image);
                inner.insert(key.clone(), Arc::clone(&image));
                return Ok(image);
            }
            inner.extract_with_timeout(&key)
        })
    }

    /// 内存中是否已有（不改变 LRU 顺序）
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.state().cache.contains(key)
    }

    /// 作废某个条目的内存和磁盘缓存
    pub fn invalidate(&self, entry: &ImageEntry) {
        self.invalidate_path(&entry.path);
        if let Some(disk) = &self.inner.disk {
            disk.remove(&entry.cache_key());
        }
    }

    /// 作废某个路径所有签名的缓存
    pub fn invalidate_path(&self, path: &Path) {
        for key in self.inner.purge_path(path) {
            if let Some(disk) = &self.inner.disk {
                disk.remove(&key);
            }
        }
    }

    /// 清空内存缓存
    pub fn clear(&self) {
        let mut state = self.inner.state();
        state.cache.clear();
        state.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.state().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state();
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            disk_hits: self.inner.disk_hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            extractions: self.inner.extractions.load(Ordering::Relaxed),
            entries: state.cache.len(),
            bytes: state.bytes,
        }
    }

    /// 胶片条缩略图：按最长边 `edge` 等比缩小；启用磁盘缓存时保存为 WebP
    pub fn thumbnail(&self, entry: &ImageEntry, edge: u32) -> Result<RgbImage, ExtractError> {
        let key = self.live_key(&entry.cache_key())?;
        if let Some(thumb) = self.inner.disk.as_ref().and_then(|d| d.load_thumbnail(&key, edge)) {
            return Ok(thumb);
        }

        let preview = self.fetch(&key, true)?;
        let thumb = if preview.width().max(preview.height()) <= edge {
            preview.pixels().clone()
        } else {
            preview.to_dynamic().thumbnail(edge, edge).to_rgb8()
        };

        if let Some(disk) = &self.inner.disk {
            if let Err(e) = disk.store_thumbnail(&key, edge, &thumb) {
                tracing::warn!("写入缩略图缓存失败 {:?}: {}", key.path, e);
            }
        }
        Ok(thumb)
    }
}
