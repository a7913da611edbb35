//! 图片条目数据模型

use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::utils::error::{AppError, ExtractError};

/// 星级评分（0-5，0 表示未评分）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const UNRATED: Rating = Rating(0);
    pub const MAX: Rating = Rating(5);

    /// 校验并创建评分，超出 0-5 返回 `InvalidRating`
    pub fn new(value: i64) -> Result<Self, AppError> {
        if (0..=5).contains(&value) {
            Ok(Rating(value as u8))
        } else {
            Err(AppError::InvalidRating(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_rated(self) -> bool {
        self.0 > 0
    }
}

impl TryFrom<i64> for Rating {
    type Error = AppError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Rating::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..5 {
            f.write_str(if i < self.0 { "★" } else { "☆" })?;
        }
        Ok(())
    }
}

/// 文件修改签名：修改时间（纳秒）+ 文件大小
///
/// 任一变化都视为文件内容已变，旧的缓存预览作废。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModSignature {
    pub modified_ns: i64,
    pub size: u64,
}

impl ModSignature {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let modified_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self {
            modified_ns,
            size: meta.len(),
        }
    }

    /// 读取文件当前的签名
    pub fn of(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_metadata(&std::fs::metadata(path)?))
    }

    /// 修改时间（秒），用于按拍摄时间排序时的回退值
    pub fn modified_secs(&self) -> i64 {
        self.modified_ns / 1_000_000_000
    }
}

/// 预览缓存键：路径 + 修改签名
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub signature: ModSignature,
}

impl CacheKey {
    pub fn new(path: impl Into<PathBuf>, signature: ModSignature) -> Self {
        Self {
            path: path.into(),
            signature,
        }
    }

    /// 稳定的十六进制摘要，用作磁盘缓存文件名
    pub fn digest(&self) -> String {
        let mut hasher = Xxh3::new();
        hasher.update(self.path.to_string_lossy().as_bytes());
        hasher.update(&self.signature.modified_ns.to_le_bytes());
        hasher.update(&self.signature.size.to_le_bytes());
        format!("{:032x}", hasher.digest128())
    }
}

/// 预览提取状态
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PreviewStatus {
    #[default]
    Unknown,
    Available { width: u32, height: u32 },
    Unavailable { error: ExtractError },
}

/// 目录中的一张 RAW 图片
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEntry {
    pub path: PathBuf,
    pub signature: ModSignature,
    pub rating: Rating,
    /// EXIF 拍摄时间（Unix 秒），仅在按拍摄时间排序时读取
    pub captured_at: Option<i64>,
    pub preview: PreviewStatus,
    /// 加载时 sidecar 损坏的原因
    pub sidecar_warning: Option<String>,
}

impl ImageEntry {
    pub fn new(path: PathBuf, signature: ModSignature) -> Self {
        Self {
            path,
            signature,
            rating: Rating::UNRATED,
            captured_at: None,
            preview: PreviewStatus::Unknown,
            sidecar_warning: None,
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.path.clone(), self.signature)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// 小写扩展名
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}
