//! 应用程序设置数据模型

use serde::{Deserialize, Serialize};

use super::catalog::SortOrder;

/// 扫描设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanSettings {
    /// 是否递归扫描子文件夹
    pub recursive: bool,
    /// 排除的文件夹名
    pub exclude_dirs: Vec<String>,
    /// 跳过隐藏目录
    pub skip_hidden: bool,
    /// 跟随符号链接
    pub follow_links: bool,
    pub sort: SortOrder,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            recursive: true,
            exclude_dirs: vec![
                String::from(".git"),
                String::from("node_modules"),
                String::from("$RECYCLE.BIN"),
                String::from("System Volume Information"),
            ],
            skip_hidden: true,
            follow_links: false,
            sort: SortOrder::Name,
        }
    }
}

/// 预览缓存设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// 内存中最多保留的预览数
    pub max_entries: usize,
    /// 内存中预览像素的总上限（MB）
    pub max_megabytes: u64,
    /// 是否启用磁盘缓存
    pub disk_cache: bool,
    /// 磁盘缓存文件超过多少天未使用即删除，0 表示不按时间清理
    pub disk_max_age_days: u64,
    /// 磁盘缓存总大小上限（MB），0 表示不限制
    pub disk_max_megabytes: u64,
    /// 胶片条缩略图边长
    pub thumbnail_edge: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 32,
            max_megabytes: 768,
            disk_cache: true,
            disk_max_age_days: 30,
            disk_max_megabytes: 2048,
            thumbnail_edge: 256,
        }
    }
}

/// 预取设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrefetchSettings {
    /// 当前位置前后各预取多少张
    pub radius: usize,
    /// 后台工作线程数
    pub workers: usize,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            radius: 3,
            workers: 2,
        }
    }
}

/// 预览提取设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractSettings {
    /// 单次提取超时（毫秒）
    pub timeout_ms: u64,
    /// 标记扫描时 JPEG 的最小字节数
    pub min_scan_bytes: usize,
    /// 预览最长边上限，0 表示不缩放
    pub max_edge: u32,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            min_scan_bytes: 10 * 1024,
            max_edge: 0,
        }
    }
}

/// 浏览会话设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// 评分后自动跳到下一张
    pub auto_advance: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { auto_advance: true }
    }
}

/// 应用程序设置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub scan: ScanSettings,
    pub cache: CacheSettings,
    pub prefetch: PrefetchSettings,
    pub extract: ExtractSettings,
    pub session: SessionSettings,
}
