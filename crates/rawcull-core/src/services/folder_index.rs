//! 文件夹索引
//!
//! 扫描根目录下的 RAW 文件，合并 sidecar 中的评分，维护有序的 [`Catalog`]。
//! 目录由索引独占；其他组件只通过下标或路径引用条目。

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use exif::{In, Reader, Tag};
use rayon::prelude::*;
use serde::Serialize;

use super::scanner::{ScanOptions, Scanner};
use super::sidecar::RatingStore;
use crate::models::{
    sort_entries, Catalog, ImageEntry, PreviewStatus, Rating, ScanWarning, ScanWarningKind,
    SortOrder,
};
use crate::utils::error::{AppError, AppResult};

/// 重新扫描与上次结果的差异
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RescanSummary {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    /// 签名变化的文件，调用方需要作废它们的预览缓存
    pub changed: Vec<PathBuf>,
}

impl RescanSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// 文件夹索引
pub struct FolderIndex {
    options: ScanOptions,
    store: Arc<dyn RatingStore>,
    catalog: Catalog,
}

impl FolderIndex {
    /// 扫描根目录并构建有序目录
    ///
    /// 根目录不存在或不可读时返回 `AppError::Scan`；
    /// 单个文件或子目录的问题只记为警告。
    pub fn scan(root: &Path, options: &ScanOptions, store: &dyn RatingStore) -> AppResult<Catalog> {
        let root = absolute(root)?;
        let scanned = Scanner::new(options.clone()).scan_directory(&root)?;
        let read_capture_time = options.sort == SortOrder::CaptureTime;

        let loaded: Vec<(ImageEntry, Option<ScanWarning>)> = scanned
            .files
            .into_par_iter()
            .map(|file| {
                let mut entry = ImageEntry::new(file.path, file.signature);
                let sidecar = store.read(&entry.path);
                entry.rating = sidecar.rating;
                let warning = sidecar.warning.map(|reason| {
                    entry.sidecar_warning = Some(reason.clone());
                    ScanWarning {
                        path: store.sidecar_path(&entry.path),
                        kind: ScanWarningKind::CorruptSidecar,
                        message: reason,
                    }
                });
                if read_capture_time {
                    entry.captured_at = read_capture_time_of(&entry.path);
                }
                (entry, warning)
            })
            .collect();

        let mut warnings = scanned.warnings;
        let mut entries = Vec::with_capacity(loaded.len());
        for (entry, warning) in loaded {
            entries.push(entry);
            warnings.extend(warning);
        }

        sort_entries(&mut entries, options.sort);
        dedup_paths(&mut entries);

        tracing::info!(
            "索引完成: {} 个条目, {} 个警告 ({})",
            entries.len(),
            warnings.len(),
            root.display()
        );
        Ok(Catalog::new(root, entries, warnings))
    }

    /// 扫描并持有目录
    pub fn open(root: &Path, options: ScanOptions, store: Arc<dyn RatingStore>) -> AppResult<Self> {
        let catalog = Self::scan(root, &options, store.as_ref())?;
        Ok(Self {
            options,
            store,
            catalog,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn root(&self) -> &Path {
        self.catalog.root()
    }

    pub fn store(&self) -> &Arc<dyn RatingStore> {
        &self.store
    }

    /// 重新扫描同一根目录，返回增删改的文件
    ///
    /// 签名未变的条目保留已知的预览状态。
    pub fn rescan(&mut self) -> AppResult<RescanSummary> {
        let root = self.catalog.root().to_path_buf();
        let mut fresh = Self::scan(&root, &self.options, self.store.as_ref())?;

        let old: HashMap<&Path, &ImageEntry> =
            self.catalog.iter().map(|e| (e.path.as_path(), e)).collect();
        let mut summary = RescanSummary::default();

        for index in 0..fresh.len() {
            let Some(entry) = fresh.get_mut(index) else { continue };
            match old.get(entry.path.as_path()) {
                None => summary.added.push(entry.path.clone()),
                Some(previous) if previous.signature != entry.signature => {
                    summary.changed.push(entry.path.clone())
                }
                Some(previous) => entry.preview = previous.preview.clone(),
            }
        }
        summary.removed = self
            .catalog
            .iter()
            .filter(|e| !fresh.contains_path(&e.path))
            .map(|e| e.path.clone())
            .collect();

        tracing::info!(
            "重新扫描 {}: 新增 {}, 删除 {}, 修改 {}",
            root.display(),
            summary.added.len(),
            summary.removed.len(),
            summary.changed.len()
        );
        self.catalog = fresh;
        Ok(summary)
    }

    /// 设置评分并写入 sidecar
    ///
    /// 写入失败时恢复原评分并返回 `AppError::Persist`，内存与磁盘不会不一致。
    pub fn set_rating(&mut self, index: usize, value: i64) -> AppResult<Rating> {
        let rating = Rating::new(value)?;
        let len = self.catalog.len();
        let entry = self
            .catalog
            .get_mut(index)
            .ok_or(AppError::IndexOutOfRange { index, len })?;

        let previous = std::mem::replace(&mut entry.rating, rating);
        let path = entry.path.clone();

        match self.store.write(&path, rating) {
            Ok(()) => {
                entry.sidecar_warning = None;
                tracing::debug!("评分已保存: {:?} -> {}", path, rating.value());
                Ok(rating)
            }
            Err(e) => {
                entry.rating = previous;
                tracing::warn!("评分写入失败，已回滚 {:?}: {}", path, e);
                Err(match e {
                    AppError::Persist { .. } => e,
                    other => AppError::Persist {
                        path,
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    /// sidecar 被外部修改后重新读取评分，返回条目下标
    pub fn reload_rating(&mut self, path: &Path) -> Option<usize> {
        let index = self.catalog.position_of(path)?;
        let read = self.store.read(path);
        let sidecar = self.store.sidecar_path(path);

        let entry = self.catalog.get_mut(index)?;
        entry.rating = read.rating;
        entry.sidecar_warning = read.warning.clone();

        if let Some(reason) = read.warning {
            self.catalog.push_warning(ScanWarning {
                path: sidecar,
                kind: ScanWarningKind::CorruptSidecar,
                message: reason,
            });
        }
        Some(index)
    }

    /// 记录前台预览结果，供界面显示占位图
    pub fn record_preview(&mut self, index: usize, status: PreviewStatus) {
        if let Some(entry) = self.catalog.get_mut(index) {
            entry.preview = status;
        }
    }
}

fn absolute(root: &Path) -> AppResult<PathBuf> {
    if root.is_absolute() {
        return Ok(root.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| AppError::Scan {
        path: root.to_path_buf(),
        message: format!("无法解析相对路径: {}", e),
    })?;
    Ok(cwd.join(root))
}

/// 已排序的条目中去掉重复路径（跟随符号链接时可能出现）
fn dedup_paths(entries: &mut Vec<ImageEntry>) {
    let mut seen = std::collections::HashSet::new();
    entries.retain(|e| seen.insert(e.path.clone()));
}

/// 读取 EXIF 拍摄时间（Unix 秒）；容器不被识别或没有该字段时返回 `None`
fn read_capture_time_of(path: &Path) -> Option<i64> {
    let file = File::open(path).ok()?;
    let exif = Reader::new()
        .read_from_container(&mut BufReader::new(file))
        .ok()?;
    let field = exif
        .get_field(Tag::DateTimeOriginal, In::PRIMARY)
        .or_else(|| exif.get_field(Tag::DateTime, In::PRIMARY))?;
    parse_exif_datetime(&field.display_value().to_string())
}

/// EXIF 日期格式: "2024:01:15 10:30:45"（display_value 可能是 "2024-01-15 10:30:45"）
fn parse_exif_datetime(value: &str) -> Option<i64> {
    let value = value.trim_matches('"').trim();
    ["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|dt| dt.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use crate::services::sidecar::{SidecarRead, SidecarStore};
    use crate::test_support::{jpeg_bytes, TiffBuilder};
    use std::fs;
    use tempfile::TempDir;

    const XMP_RATED_2: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><rdf:Description xmlns:xmp="http://ns.adobe.com/xap/1.0/" xmp:Rating="2"/></rdf:RDF></x:xmpmeta>"#;

    fn store() -> Arc<dyn RatingStore> {
        Arc::new(SidecarStore::new())
    }

    /// 写入总是失败的存储
    struct FailingStore;

    impl RatingStore for FailingStore {
        fn read(&self, _raw_path: &Path) -> SidecarRead {
            SidecarRead::default()
        }

        fn write(&self, raw_path: &Path, _rating: Rating) -> AppResult<()> {
            Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("read-only: {}", raw_path.display()),
            )))
        }

        fn sidecar_path(&self, raw_path: &Path) -> PathBuf {
            raw_path.with_extension("xmp")
        }
    }

    fn abc_folder() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        fs::write(base.join("c.raw"), b"raw").unwrap();
        fs::write(base.join("b.raw"), b"raw").unwrap();
        fs::write(base.join("a.raw"), b"raw").unwrap();
        fs::write(base.join("a.xmp"), XMP_RATED_2).unwrap();
        fs::write(base.join("c.xmp"), "<x:xmpmeta><rdf:RDF><rdf:Desc").unwrap();
        tmp
    }

    #[test]
    fn test_scan_merges_sidecar_ratings() {
        let tmp = abc_folder();
        let catalog = FolderIndex::scan(tmp.path(), &ScanOptions::default(), store().as_ref()).unwrap();

        let names: Vec<String> = catalog.iter().map(|e| e.file_name()).collect();
        assert_eq!(names, vec!["a.raw", "b.raw", "c.raw"]);
        let ratings: Vec<u8> = catalog.iter().map(|e| e.rating.value()).collect();
        assert_eq!(ratings, vec![2, 0, 0]);

        assert_eq!(catalog.warnings().len(), 1);
        let warning = &catalog.warnings()[0];
        assert_eq!(warning.kind, ScanWarningKind::CorruptSidecar);
        assert_eq!(warning.path, tmp.path().join("c.xmp"));
        assert!(catalog.get(2).unwrap().sidecar_warning.is_some());
        assert!(catalog.iter().all(|e| e.path.is_absolute()));
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let tmp = TempDir::new().unwrap();
        let result = FolderIndex::scan(&tmp.path().join("nope"), &ScanOptions::default(), store().as_ref());
        assert!(matches!(result, Err(AppError::Scan { .. })));
    }

    #[test]
    fn test_natural_order_across_subfolders() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        fs::create_dir(base.join("day10")).unwrap();
        fs::create_dir(base.join("Day2")).unwrap();
        for name in ["IMG_10.nef", "img_2.nef", "IMG_1.nef", "Day2/IMG_3.nef", "day10/IMG_1.nef"] {
            fs::write(base.join(name), b"r").unwrap();
        }

        let catalog = FolderIndex::scan(base, &ScanOptions::default(), store().as_ref()).unwrap();
        let rel: Vec<String> = catalog
            .iter()
            .map(|e| e.path.strip_prefix(base).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(
            rel,
            vec!["Day2/IMG_3.nef", "day10/IMG_1.nef", "IMG_1.nef", "img_2.nef", "IMG_10.nef"]
        );
    }

    #[test]
    fn test_set_rating_round_trips_through_sidecar() {
        let tmp = abc_folder();
        let store = store();
        let mut index = FolderIndex::open(tmp.path(), ScanOptions::default(), store.clone()).unwrap();

        for value in 0..=5 {
            index.set_rating(1, value).unwrap();
            let path = &index.catalog().get(1).unwrap().path;
            assert_eq!(store.read(path).rating.value() as i64, value);
            assert_eq!(index.catalog().get(1).unwrap().rating.value() as i64, value);
        }
    }

    #[test]
    fn test_set_rating_twice_keeps_last_and_other_fields() {
        let tmp = abc_folder();
        let store = store();
        let mut index = FolderIndex::open(tmp.path(), ScanOptions::default(), store.clone()).unwrap();

        index.set_rating(0, 3).unwrap();
        index.set_rating(0, 5).unwrap();

        let content = fs::read_to_string(tmp.path().join("a.xmp")).unwrap();
        assert!(content.contains(r#"xmp:Rating="5""#));
        assert!(!content.contains(r#"xmp:Rating="3""#));
        assert!(content.contains(r#"xmlns:x="adobe:ns:meta/""#));
        assert_eq!(store.read(&tmp.path().join("a.raw")).rating.value(), 5);
    }

    #[test]
    fn test_invalid_rating_leaves_entry_unchanged() {
        let tmp = abc_folder();
        let mut index = FolderIndex::open(tmp.path(), ScanOptions::default(), store()).unwrap();

        for bad in [-1, 6, 100] {
            assert!(matches!(index.set_rating(0, bad), Err(AppError::InvalidRating(v)) if v == bad));
        }
        assert_eq!(index.catalog().get(0).unwrap().rating.value(), 2);
        assert!(fs::read_to_string(tmp.path().join("a.xmp")).unwrap().contains(r#"xmp:Rating="2""#));
        assert!(!tmp.path().join("b.xmp").exists());
    }

    #[test]
    fn test_index_out_of_range() {
        let tmp = abc_folder();
        let mut index = FolderIndex::open(tmp.path(), ScanOptions::default(), store()).unwrap();
        assert!(matches!(
            index.set_rating(3, 1),
            Err(AppError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let tmp = abc_folder();
        let mut index = FolderIndex::open(tmp.path(), ScanOptions::default(), Arc::new(FailingStore)).unwrap();

        let err = index.set_rating(1, 4).unwrap_err();
        assert!(matches!(err, AppError::Persist { .. }));
        assert_eq!(err.code(), "E_PERSIST");
        assert_eq!(index.catalog().get(1).unwrap().rating, Rating::UNRATED);
    }

    #[test]
    fn test_filtered_navigation_on_scanned_catalog() {
        let tmp = abc_folder();
        let mut index = FolderIndex::open(tmp.path(), ScanOptions::default(), store()).unwrap();
        index.set_rating(2, 4).unwrap();

        let min = Rating::new(1).unwrap();
        assert_eq!(index.catalog().filtered_indices(min).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(index.catalog().nearest_filtered(1, Direction::Forward, min), Some(2));
        assert_eq!(index.catalog().last_filtered(min), Some(2));
    }

    #[test]
    fn test_rescan_reports_differences() {
        let tmp = abc_folder();
        let base = tmp.path();
        let mut index = FolderIndex::open(base, ScanOptions::default(), store()).unwrap();
        index.record_preview(1, PreviewStatus::Available { width: 4, height: 3 });

        fs::remove_file(base.join("c.raw")).unwrap();
        fs::write(base.join("d.raw"), b"raw").unwrap();
        fs::write(base.join("a.raw"), b"raw but longer").unwrap();

        let summary = index.rescan().unwrap();
        assert_eq!(summary.added, vec![base.join("d.raw")]);
        assert_eq!(summary.removed, vec![base.join("c.raw")]);
        assert_eq!(summary.changed, vec![base.join("a.raw")]);
        assert_eq!(index.catalog().len(), 3);
        assert_eq!(
            index.catalog().get(1).unwrap().preview,
            PreviewStatus::Available { width: 4, height: 3 }
        );

        assert!(index.rescan().unwrap().is_empty());
    }

    #[test]
    fn test_reload_rating_after_external_edit() {
        let tmp = abc_folder();
        let base = tmp.path();
        let mut index = FolderIndex::open(base, ScanOptions::default(), store()).unwrap();

        fs::write(base.join("b.xmp"), XMP_RATED_2.replace("\"2\"", "\"4\"")).unwrap();
        assert_eq!(index.reload_rating(&base.join("b.raw")), Some(1));
        assert_eq!(index.catalog().get(1).unwrap().rating.value(), 4);
        assert_eq!(index.reload_rating(&base.join("zzz.raw")), None);
    }

    #[test]
    fn test_capture_time_sort_falls_back_to_mtime() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        let tiff = TiffBuilder::new().jpeg_ifd(jpeg_bytes(8, 8)).build();
        let set_mtime = |name: &str, secs: u64| {
            let path = base.join(name);
            fs::write(&path, &tiff).unwrap();
            File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs))
                .unwrap();
        };
        // 没有拍摄时间字段，按修改时间排序，相同时按文件名
        set_mtime("a.dng", 1_300_000_000);
        set_mtime("b.dng", 1_000_000_000);
        set_mtime("c.dng", 1_000_000_000);

        let options = ScanOptions {
            sort: SortOrder::CaptureTime,
            ..ScanOptions::default()
        };
        let catalog = FolderIndex::scan(base, &options, store().as_ref()).unwrap();
        assert!(catalog.iter().all(|e| e.captured_at.is_none()));
        let names: Vec<String> = catalog.iter().map(|e| e.file_name()).collect();
        assert_eq!(names, vec!["b.dng", "c.dng", "a.dng"]);
    }

    #[test]
    fn test_parse_exif_datetime() {
        assert_eq!(parse_exif_datetime("2024:01:15 10:30:45"), Some(1705314645));
        assert_eq!(parse_exif_datetime("\"2024-01-15 10:30:45\""), Some(1705314645));
        assert_eq!(parse_exif_datetime("garbage"), None);
    }
}
