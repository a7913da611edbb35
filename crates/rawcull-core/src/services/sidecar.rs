//! XMP sidecar 评分读写服务
//!
//! 评分保存在 RAW 文件旁的 `<stem>.xmp` 中，Lightroom / darktable 等工具
//! 都能识别 `xmp:Rating` 字段。写入时只改动评分字段，其它内容原样保留。

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;

use crate::models::Rating;
use crate::utils::error::{AppError, AppResult};
use crate::utils::fsutil::atomic_write;

const XMP_NS: &str = "http://ns.adobe.com/xap/1.0/";

/// 新建 sidecar 时使用的模板
const XMP_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/" x:xmptk="RawCull">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
      xmlns:xmp="http://ns.adobe.com/xap/1.0/"
      xmp:Rating="{rating}"/>
  </rdf:RDF>
</x:xmpmeta>
"#;

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"xmp:Rating\s*=\s*["']([^"']*)["']"#).expect("valid xmp:Rating attr regex")
    })
}

fn element_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<xmp:Rating\s*>([^<]*)</xmp:Rating\s*>").expect("valid xmp:Rating element regex")
    })
}

/// 读取结果：损坏的 sidecar 按 0 分处理，并带上原因
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SidecarRead {
    pub rating: Rating,
    pub warning: Option<String>,
}

/// 评分持久化接口
pub trait RatingStore: Send + Sync {
    /// 读取评分，永不失败：缺失为 0，损坏为 0 + 警告
    fn read(&self, raw_path: &Path) -> SidecarRead;

    /// 写入评分，保留 sidecar 中的其它字段
    fn write(&self, raw_path: &Path, rating: Rating) -> AppResult<()>;

    /// 该 RAW 文件对应的 sidecar 路径（已存在的优先）
    fn sidecar_path(&self, raw_path: &Path) -> PathBuf;
}

/// 解析 XMP 内容中的评分
///
/// 返回 `Ok(None)` 表示合法数据包但没有评分字段；`-1`（Lightroom 的"拒绝"）原样返回。
pub fn parse_rating(content: &str) -> Result<Option<i64>, String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err("文件为空".to_string());
    }
    let has_meta = trimmed.contains("<x:xmpmeta");
    let has_rdf = trimmed.contains("<rdf:RDF");
    if !has_meta && !has_rdf {
        return Err("不是 XMP 数据包".to_string());
    }
    if (has_meta && !trimmed.contains("</x:xmpmeta>")) || (has_rdf && !trimmed.contains("</rdf:RDF>"))
    {
        return Err("XMP 数据包不完整".to_string());
    }

    let raw_value = attr_regex()
        .captures(trimmed)
        .or_else(|| element_regex().captures(trimmed))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string());

    let Some(raw_value) = raw_value else {
        return Ok(None);
    };

    let value = match raw_value.parse::<i64>() {
        Ok(v) => v,
        Err(_) => match raw_value.parse::<f64>() {
            Ok(f) if f.fract() == 0.0 && f.is_finite() => f as i64,
            _ => return Err(format!("评分不是整数: {:?}", raw_value)),
        },
    };

    if !(-1..=5).contains(&value) {
        return Err(format!("评分超出范围: {}", value));
    }
    Ok(Some(value))
}

/// 把评分合并进已有 XMP 内容，无法定位插入点时返回 `None`
pub fn merge_rating(content: &str, rating: Rating) -> Option<String> {
    let value = rating.value();

    if attr_regex().is_match(content) {
        let replacement = format!(r#"xmp:Rating="{}""#, value);
        return Some(attr_regex().replace(content, replacement.as_str()).into_owned());
    }

    if element_regex().is_match(content) {
        let replacement = format!("<xmp:Rating>{}</xmp:Rating>", value);
        return Some(element_regex().replace(content, replacement.as_str()).into_owned());
    }

    let ns_decl = if content.contains("xmlns:xmp=") {
        String::new()
    } else {
        format!(r#" xmlns:xmp="{}""#, XMP_NS)
    };

    if let Some(start) = content.find("<rdf:Description") {
        let tag_end = start + content[start..].find('>')?;
        let insert_at = if content[..tag_end].ends_with('/') {
            tag_end - 1
        } else {
            tag_end
        };
        let mut merged = String::with_capacity(content.len() + 64);
        merged.push_str(&content[..insert_at]);
        merged.push_str(&ns_decl);
        merged.push_str(&format!(r#" xmp:Rating="{}""#, value));
        merged.push_str(&content[insert_at..]);
        return Some(merged);
    }

    if let Some(pos) = content.find("</rdf:RDF>") {
        let mut merged = String::with_capacity(content.len() + 128);
        merged.push_str(&content[..pos]);
        merged.push_str(&format!(
            "  <rdf:Description rdf:about=\"\" xmlns:xmp=\"{}\" xmp:Rating=\"{}\"/>\n  ",
            XMP_NS, value
        ));
        merged.push_str(&content[pos..]);
        return Some(merged);
    }

    None
}

/// 新建 sidecar 的内容
pub fn template(rating: Rating) -> String {
    XMP_TEMPLATE.replace("{rating}", &rating.value().to_string())
}

/// 基于文件系统的 sidecar 存储
#[derive(Default)]
pub struct SidecarStore {
    /// 每个 RAW 文件一把写锁，保证同一文件的写入按调用顺序完成
    write_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl SidecarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取时依次尝试的 sidecar 路径：`a.xmp`、`a.XMP`、`a.cr2.xmp`
    pub fn candidates(raw_path: &Path) -> [PathBuf; 3] {
        let mut full = raw_path.as_os_str().to_os_string();
        full.push(".xmp");
        [
            raw_path.with_extension("xmp"),
            raw_path.with_extension("XMP"),
            PathBuf::from(full),
        ]
    }

    fn existing_sidecar(raw_path: &Path) -> Option<PathBuf> {
        Self::candidates(raw_path).into_iter().find(|p| p.is_file())
    }

    fn lock_for(&self, raw_path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(raw_path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 把无法解析的 sidecar 改名为 `.bak`，不直接覆盖用户数据
    fn backup_corrupt(path: &Path) -> AppResult<PathBuf> {
        let mut name = OsString::from(path.as_os_str());
        name.push(".bak");
        let backup = PathBuf::from(name);
        fs::rename(path, &backup).map_err(|e| AppError::Persist {
            path: path.to_path_buf(),
            message: format!("无法备份损坏的 sidecar: {}", e),
        })?;
        tracing::warn!("已备份损坏的 sidecar: {:?} -> {:?}", path, backup);
        Ok(backup)
    }
}

impl RatingStore for SidecarStore {
    fn read(&self, raw_path: &Path) -> SidecarRead {
        let Some(path) = Self::existing_sidecar(raw_path) else {
            return SidecarRead::default();
        };

        let content = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("无法读取 sidecar {:?}: {}", path, e);
                return SidecarRead {
                    rating: Rating::UNRATED,
                    warning: Some(format!("无法读取: {}", e)),
                };
            }
        };

        let parsed = match std::str::from_utf8(&content) {
            Ok(text) => parse_rating(text),
            Err(_) => Err("不是 UTF-8 文本".to_string()),
        };

        match parsed {
            Ok(Some(v)) if v > 0 => SidecarRead {
                rating: Rating::new(v).unwrap_or_default(),
                warning: None,
            },
            Ok(_) => SidecarRead::default(),
            Err(reason) => {
                tracing::warn!("sidecar 损坏，按未评分处理 {:?}: {}", path, reason);
                SidecarRead {
                    rating: Rating::UNRATED,
                    warning: Some(reason),
                }
            }
        }
    }

    fn write(&self, raw_path: &Path, rating: Rating) -> AppResult<()> {
        let lock = self.lock_for(raw_path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let target = self.sidecar_path(raw_path);
        let persist_err = |message: String| AppError::Persist {
            path: target.clone(),
            message,
        };

        let content = match fs::read(&target) {
            Ok(bytes) => {
                let merged = std::str::from_utf8(&bytes)
                    .ok()
                    .filter(|text| parse_rating(text).is_ok())
                    .and_then(|text| merge_rating(text, rating));
                match merged {
                    Some(merged) => merged,
                    None => {
                        Self::backup_corrupt(&target)?;
                        template(rating)
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => template(rating),
            Err(e) => return Err(persist_err(format!("无法读取现有 sidecar: {}", e))),
        };

        atomic_write(&target, content.as_bytes()).map_err(|e| persist_err(e.to_string()))?;
        tracing::debug!("评分已写入 {:?}: {}", target, rating.value());
        Ok(())
    }

    fn sidecar_path(&self, raw_path: &Path) -> PathBuf {
        Self::existing_sidecar(raw_path).unwrap_or_else(|| raw_path.with_extension("xmp"))
    }
}
