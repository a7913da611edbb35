//! 文件扫描服务
//!
//! 负责扫描目录、过滤 RAW 文件

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::models::{ModSignature, ScanSettings, ScanWarning, ScanWarningKind, SortOrder};
use crate::utils::error::{AppError, AppResult};

/// 支持的 RAW 格式
pub const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "nef", "nrw", "arw", "srf", "sr2", "raf", "orf", "rw2", "dng", "pef", "srw",
    "3fr", "ari", "bay", "crw", "dcr", "erf", "fff", "mef", "mrw", "ptx", "pxn", "r3d", "rwl",
    "rwz", "x3f", "kdc", "raw",
];

/// 扫描选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// 是否递归扫描子目录
    pub recursive: bool,
    /// 排除的目录名（如 .git, node_modules）
    pub exclude_dirs: Vec<String>,
    pub skip_hidden: bool,
    pub follow_links: bool,
    pub sort: SortOrder,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&ScanSettings::default())
    }
}

impl From<&ScanSettings> for ScanOptions {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            recursive: settings.recursive,
            exclude_dirs: settings.exclude_dirs.clone(),
            skip_hidden: settings.skip_hidden,
            follow_links: settings.follow_links,
            sort: settings.sort,
        }
    }
}

/// 扫描到的单个文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundFile {
    pub path: PathBuf,
    pub signature: ModSignature,
}

/// 扫描结果
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub files: Vec<FoundFile>,
    pub warnings: Vec<ScanWarning>,
    /// 扫描的目录数
    pub dirs_scanned: usize,
    /// 跳过的非 RAW 文件数
    pub files_skipped: usize,
}

/// 文件扫描器
pub struct Scanner {
    options: ScanOptions,
}

impl Scanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    pub fn with_defaults() -> Self {
        Self::new(ScanOptions::default())
    }

    /// 根目录必须存在、是目录且可读，否则返回 `AppError::Scan`
    pub fn check_root(root: &Path) -> AppResult<()> {
        let scan_err = |message: String| AppError::Scan {
            path: root.to_path_buf(),
            message,
        };
        let meta = fs::metadata(root).map_err(|e| scan_err(format!("目录不存在或无法访问: {}", e)))?;
        if !meta.is_dir() {
            return Err(scan_err("路径不是目录".to_string()));
        }
        fs::read_dir(root).map_err(|e| scan_err(format!("目录不可读: {}", e)))?;
        Ok(())
    }

    /// 扫描目录；无法访问的子目录和文件记为警告，不中断扫描
    pub fn scan_directory(&self, root: &Path) -> AppResult<ScanResult> {
        Self::check_root(root)?;

        let mut walker = WalkDir::new(root).follow_links(self.options.follow_links);
        if !self.options.recursive {
            walker = walker.max_depth(1);
        }

        let mut result = ScanResult::default();
        for entry in walker
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || self.should_include_entry(e))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    tracing::warn!("扫描错误: {}", e);
                    result.warnings.push(ScanWarning {
                        path,
                        kind: ScanWarningKind::UnreadableDirectory,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                result.dirs_scanned += 1;
                continue;
            }
            if !is_raw_file(entry.path()) || is_apple_double(entry.path()) {
                result.files_skipped += 1;
                continue;
            }

            // 不跟随链接时，指向文件的符号链接仍按目标文件收录
            let metadata = if entry.path_is_symlink() {
                fs::metadata(entry.path())
            } else {
                entry.metadata().map_err(io::Error::from)
            };
            match metadata {
                Ok(meta) if meta.is_file() => result.files.push(FoundFile {
                    path: entry.into_path(),
                    signature: ModSignature::from_metadata(&meta),
                }),
                Ok(_) => {
                    tracing::debug!("跳过非普通文件: {}", entry.path().display());
                    result.files_skipped += 1;
                }
                Err(e) => {
                    tracing::warn!("无法读取文件信息 {}: {}", entry.path().display(), e);
                    result.warnings.push(ScanWarning {
                        path: entry.into_path(),
                        kind: ScanWarningKind::UnreadableFile,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "扫描完成: {} 个目录, {} 个 RAW 文件, {} 个跳过, {} 个警告",
            result.dirs_scanned,
            result.files.len(),
            result.files_skipped,
            result.warnings.len()
        );
        Ok(result)
    }

    /// 检查是否应该进入此目录（返回 true 表示包含）
    fn should_include_entry(&self, entry: &walkdir::DirEntry) -> bool {
        if !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if self.options.skip_hidden && name.starts_with('.') {
            return false;
        }
        !self.options.exclude_dirs.iter().any(|d| d == &*name)
    }
}

/// 快速检查文件是否是支持的 RAW 格式
pub fn is_raw_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| RAW_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// macOS 在非 HFS 卷上留下的 `._name` 资源文件
fn is_apple_double(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with("._"))
        .unwrap_or(false)
}

/// 是否为 sidecar 文件（`.xmp`，不区分大小写）
pub fn is_sidecar_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("xmp"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(result: &ScanResult) -> Vec<String> {
        let mut names: Vec<String> = result
            .files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_is_raw_file() {
        assert!(is_raw_file(Path::new("photo.nef")));
        assert!(is_raw_file(Path::new("photo.CR2")));
        assert!(is_raw_file(Path::new("dir/photo.Raf")));
        assert!(!is_raw_file(Path::new("photo.jpg")));
        assert!(!is_raw_file(Path::new("photo.xmp")));
        assert!(!is_raw_file(Path::new("nef")));
    }

    #[test]
    fn test_is_sidecar_file() {
        assert!(is_sidecar_file(Path::new("a.xmp")));
        assert!(is_sidecar_file(Path::new("a.XMP")));
        assert!(!is_sidecar_file(Path::new("a.nef")));
    }

    #[test]
    fn test_scan_finds_raw_files_recursively() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        fs::write(base.join("a.nef"), b"raw").unwrap();
        fs::write(base.join("b.CR3"), b"raw").unwrap();
        fs::write(base.join("notes.txt"), b"text").unwrap();
        fs::write(base.join("a.xmp"), b"<x/>").unwrap();
        fs::write(base.join("._a.nef"), b"apple").unwrap();
        fs::create_dir(base.join("day2")).unwrap();
        fs::write(base.join("day2").join("c.arw"), b"raw").unwrap();

        let result = Scanner::with_defaults().scan_directory(base).unwrap();
        assert_eq!(names(&result), vec!["a.nef", "b.CR3", "c.arw"]);
        assert!(result.warnings.is_empty());
        assert_eq!(result.dirs_scanned, 2);
        assert_eq!(result.files[0].signature.size, 3);
    }

    #[test]
    fn test_scan_skips_hidden_and_excluded_dirs() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        for dir in [".thumbs", "node_modules", "keep"] {
            fs::create_dir(base.join(dir)).unwrap();
            fs::write(base.join(dir).join(format!("{}.nef", dir.trim_start_matches('.'))), b"r").unwrap();
        }

        let result = Scanner::with_defaults().scan_directory(base).unwrap();
        assert_eq!(names(&result), vec!["keep.nef"]);

        let all = Scanner::new(ScanOptions {
            skip_hidden: false,
            exclude_dirs: Vec::new(),
            ..ScanOptions::default()
        })
        .scan_directory(base)
        .unwrap();
        assert_eq!(all.files.len(), 3);
    }

    #[test]
    fn test_non_recursive_stays_in_root() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        fs::write(base.join("top.nef"), b"r").unwrap();
        fs::create_dir(base.join("sub")).unwrap();
        fs::write(base.join("sub").join("deep.nef"), b"r").unwrap();

        let result = Scanner::new(ScanOptions {
            recursive: false,
            ..ScanOptions::default()
        })
        .scan_directory(base)
        .unwrap();
        assert_eq!(names(&result), vec!["top.nef"]);
    }

    #[test]
    fn test_root_errors() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing");
        assert!(matches!(
            Scanner::with_defaults().scan_directory(&missing),
            Err(AppError::Scan { ref path, .. }) if path == &missing
        ));

        let file = tmp.path().join("a.nef");
        fs::write(&file, b"r").unwrap();
        assert!(matches!(
            Scanner::with_defaults().scan_directory(&file),
            Err(AppError::Scan { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_raw_is_found_without_following_links() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("target.nef");
        fs::write(&target, b"raw").unwrap();
        let base = tmp.path();
        symlink(&target, base.join("linked.nef")).unwrap();
        symlink(outside.path(), base.join("linked_dir.nef")).unwrap();
        symlink(base.join("missing.nef"), base.join("broken.nef")).unwrap();

        let result = Scanner::with_defaults().scan_directory(base).unwrap();

        assert_eq!(names(&result), vec!["linked.nef"]);
        let found = &result.files[0];
        assert_eq!(found.path, base.join("linked.nef"));
        assert_eq!(found.signature.size, 3);
        assert_eq!(result.files_skipped, 1);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].kind, ScanWarningKind::UnreadableFile);
        assert_eq!(result.warnings[0].path, base.join("broken.nef"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_is_warning() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        fs::write(base.join("ok.nef"), b"r").unwrap();
        let locked = base.join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("hidden.nef"), b"r").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // root 用户不受权限限制，此时跳过断言
        let readable = fs::read_dir(&locked).is_ok();
        let result = Scanner::with_defaults().scan_directory(base).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if !readable {
            assert_eq!(names(&result), vec!["ok.nef"]);
            assert_eq!(result.warnings.len(), 1);
            assert_eq!(result.warnings[0].kind, ScanWarningKind::UnreadableDirectory);
        }
    }
}
