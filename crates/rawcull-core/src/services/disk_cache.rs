//! 预览磁盘缓存
//!
//! 目录结构：
//! - `previews/<digest>.png` + `previews/<digest>.json`（方向、解码器、尺寸）
//! - `thumbnails/<digest>_<edge>.webp`
//!
//! 预览以无损 PNG 保存，读回的像素与首次提取完全一致。
//! 文件名由 [`CacheKey::digest`] 决定，源文件变化后旧文件自然失效，由 [`DiskCache::prune`] 回收。
//! 命中时刷新修改时间，所以按修改时间清理相当于按最近使用清理。

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use image::{DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

use crate::models::{CacheKey, Orientation, PreviewImage};
use crate::utils::error::AppResult;
use crate::utils::fsutil::atomic_write;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewMeta {
    orientation: Orientation,
    decoder: String,
    width: u32,
    height: u32,
}

/// 清理统计
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStats {
    pub total_files: usize,
    pub deleted_files: usize,
    pub freed_bytes: u64,
}

struct CachedFile {
    path: PathBuf,
    modified: SystemTime,
    len: u64,
}

/// 把文件修改时间更新为当前时间
fn touch(path: &Path) {
    let touched = fs::File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = touched {
        tracing::debug!("无法刷新缓存文件时间 {:?}: {}", path, e);
    }
}

fn static_decoder_name(name: &str) -> &'static str {
    match name {
        "tiff" => "tiff",
        "cr3" => "cr3",
        "raf" => "raf",
        _ => "disk",
    }
}

/// 磁盘缓存
#[derive(Debug, Clone)]
pub struct DiskCache {
    previews_dir: PathBuf,
    thumbnails_dir: PathBuf,
}

impl DiskCache {
    pub fn new(root: PathBuf) -> AppResult<Self> {
        let previews_dir = root.join("previews");
        let thumbnails_dir = root.join("thumbnails");
        fs::create_dir_all(&previews_dir)?;
        fs::create_dir_all(&thumbnails_dir)?;
        Ok(Self {
            previews_dir,
            thumbnails_dir,
        })
    }

    fn preview_paths(&self, key: &CacheKey) -> (PathBuf, PathBuf) {
        let digest = key.digest();
        (
            self.previews_dir.join(format!("{}.png", digest)),
            self.previews_dir.join(format!("{}.json", digest)),
        )
    }

    fn thumbnail_path(&self, key: &CacheKey, edge: u32) -> PathBuf {
        self.thumbnails_dir
            .join(format!("{}_{}.webp", key.digest(), edge))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        let (png, meta) = self.preview_paths(key);
        png.is_file() && meta.is_file()
    }

    /// 读取缓存的预览；文件缺失或损坏返回 `None`
    pub fn load(&self, key: &CacheKey) -> Option<PreviewImage> {
        let (png, meta_path) = self.preview_paths(key);
        let meta: PreviewMeta = serde_json::from_slice(&fs::read(&meta_path).ok()?).ok()?;
        let bytes = fs::read(&png).ok()?;
        let pixels = match image::load_from_memory_with_format(&bytes, ImageFormat::Png) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::warn!("磁盘缓存损坏，删除 {:?}: {}", png, e);
                self.remove(key);
                return None;
            }
        };
        if (pixels.width(), pixels.height()) != (meta.width, meta.height) {
            self.remove(key);
            return None;
        }
        touch(&png);
        touch(&meta_path);
        Some(PreviewImage::new(
            pixels,
            meta.orientation,
            static_decoder_name(&meta.decoder),
        ))
    }

    /// 写入预览（像素已校正方向）
    pub fn store(&self, key: &CacheKey, preview: &PreviewImage) -> AppResult<()> {
        let (png, meta_path) = self.preview_paths(key);
        let mut bytes = Cursor::new(Vec::new());
        preview.pixels().write_to(&mut bytes, ImageFormat::Png)?;
        atomic_write(&png, bytes.get_ref())?;

        let meta = PreviewMeta {
            orientation: preview.orientation(),
            decoder: preview.decoder().to_string(),
            width: preview.width(),
            height: preview.height(),
        };
        atomic_write(&meta_path, &serde_json::to_vec(&meta)?)?;
        Ok(())
    }

    pub fn remove(&self, key: &CacheKey) {
        let (png, meta) = self.preview_paths(key);
        let _ = fs::remove_file(png);
        let _ = fs::remove_file(meta);
    }

    pub fn load_thumbnail(&self, key: &CacheKey, edge: u32) -> Option<RgbImage> {
        let bytes = fs::read(self.thumbnail_path(key, edge)).ok()?;
        image::load_from_memory_with_format(&bytes, ImageFormat::WebP)
            .ok()
            .map(|img| img.to_rgb8())
    }

    pub fn store_thumbnail(&self, key: &CacheKey, edge: u32, thumb: &RgbImage) -> AppResult<()> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(thumb.clone()).write_to(&mut out, ImageFormat::WebP)?;
        atomic_write(&self.thumbnail_path(key, edge), out.get_ref())?;
        Ok(())
    }

    fn cached_files(&self) -> AppResult<Vec<CachedFile>> {
        let mut files = Vec::new();
        for dir in [&self.previews_dir, &self.thumbnails_dir] {
            if !dir.exists() {
                continue;
            }
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                if !metadata.is_file() {
                    continue;
                }
                files.push(CachedFile {
                    path: entry.path(),
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    len: metadata.len(),
                });
            }
        }
        Ok(files)
    }

    /// 删除超过 `max_age` 未使用的缓存文件
    pub fn cleanup(&self, max_age: Duration) -> AppResult<CleanupStats> {
        self.prune(Some(max_age), None)
    }

    /// 先删除超过 `max_age` 未使用的文件，再从最久未使用的开始删除，直到总大小不超过 `max_bytes`
    pub fn prune(&self, max_age: Option<Duration>, max_bytes: Option<u64>) -> AppResult<CleanupStats> {
        let mut files = self.cached_files()?;
        let mut stats = CleanupStats {
            total_files: files.len(),
            ..CleanupStats::default()
        };
        let now = SystemTime::now();

        files.sort_by_key(|f| f.modified);
        let mut remaining: u64 = files.iter().map(|f| f.len).sum();
        for file in &files {
            let expired = max_age.is_some_and(|max| {
                now.duration_since(file.modified)
                    .map_or(false, |age| age > max)
            });
            let over_budget = max_bytes.is_some_and(|max| remaining > max);
            if !expired && !over_budget {
                continue;
            }
            if fs::remove_file(&file.path).is_ok() {
                stats.deleted_files += 1;
                stats.freed_bytes += file.len;
                remaining = remaining.saturating_sub(file.len);
            }
        }

        tracing::info!(
            "预览缓存清理完成: 删除 {} 个文件，释放 {} 字节",
            stats.deleted_files,
            stats.freed_bytes
        );
        Ok(stats)
    }

    /// 缓存占用的总字节数
    pub fn size_bytes(&self) -> u64 {
        [&self.previews_dir, &self.thumbnails_dir]
            .iter()
            .filter_map(|dir| fs::read_dir(dir).ok())
            .flatten()
            .filter_map(|e| e.ok()?.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    }
}
