//! RawCull 错误处理模块
//!
//! 定义应用程序错误类型和预览提取错误类型

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// 预览提取错误
///
/// 需要 `Clone`：同一个缓存键的并发请求共享领头请求的结果。
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum ExtractError {
    /// 没有任何解码器认识这个容器
    #[error("不支持的格式: {0}")]
    UnsupportedFormat(String),

    /// 容器合法，但里面没有可用的嵌入预览
    #[error("没有嵌入预览: {0}")]
    NoEmbeddedPreview(String),

    /// 头部损坏、数据截断、偏移越界、解码失败或超时
    #[error("文件损坏: {0}")]
    CorruptFile(String),
}

impl ExtractError {
    pub fn code(&self) -> &'static str {
        match self {
            ExtractError::UnsupportedFormat(_) => "E_UNSUPPORTED_FORMAT",
            ExtractError::NoEmbeddedPreview(_) => "E_NO_EMBEDDED_PREVIEW",
            ExtractError::CorruptFile(_) => "E_CORRUPT_FILE",
        }
    }
}

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 图像处理错误
    #[error("图像处理错误: {0}")]
    Image(#[from] image::ImageError),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 根目录不存在或不可读
    #[error("扫描失败 {}: {message}", path.display())]
    Scan { path: PathBuf, message: String },

    /// 评分超出 0-5
    #[error("无效评分: {0}（必须在 0 到 5 之间）")]
    InvalidRating(i64),

    /// 评分写入 sidecar 失败
    #[error("无法保存评分到 {}: {message}", path.display())]
    Persist { path: PathBuf, message: String },

    /// sidecar 无法解析
    #[error("sidecar 损坏 {}: {reason}", path.display())]
    CorruptSidecar { path: PathBuf, reason: String },

    /// 预览提取错误
    #[error(transparent)]
    Preview(#[from] ExtractError),

    /// 索引越界
    #[error("索引越界: {index}（共 {len} 项）")]
    IndexOutOfRange { index: usize, len: usize },

    /// 路径无效
    #[error("路径无效: {0}")]
    InvalidPath(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 文件监控错误
    #[error("文件监控错误: {0}")]
    Watch(String),

    /// 通用错误
    #[error("{0}")]
    General(String),
}

impl AppError {
    /// 稳定的错误码，供前端区分错误类别
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "E_IO_ERROR",
            AppError::Image(_) => "E_IMAGE_ERROR",
            AppError::Json(_) => "E_JSON",
            AppError::Scan { .. } => "E_SCAN",
            AppError::InvalidRating(_) => "E_INVALID_RATING",
            AppError::Persist { .. } => "E_PERSIST",
            AppError::CorruptSidecar { .. } => "E_CORRUPT_SIDECAR",
            AppError::Preview(e) => e.code(),
            AppError::IndexOutOfRange { .. } => "E_INDEX_OUT_OF_RANGE",
            AppError::InvalidPath(_) => "E_PATH_INVALID",
            AppError::Config(_) => "E_CONFIG",
            AppError::Watch(_) => "E_WATCH",
            AppError::General(_) => "E_GENERAL",
        }
    }
}

/// 返回给前端的错误包装
#[derive(Debug, Clone, Serialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
}

impl From<AppError> for CommandError {
    fn from(err: AppError) -> Self {
        CommandError {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        CommandError {
            code: self.code().to_string(),
            message: self.to_string(),
        }
        .serialize(serializer)
    }
}

/// 应用程序结果类型别名
pub type AppResult<T> = Result<T, AppError>;
