//! 嵌入预览提取服务
//!
//! 只解析 RAW 容器结构并解码其中已有的 JPEG / RGB 预览，从不做去马赛克。
//! 格式识别交给 [`DecoderRegistry`]，每个容器格式一个 [`FormatDecoder`]。

pub mod bmff;
pub mod jpeg;
pub mod raf;
pub mod registry;
pub mod source;
pub mod tiff;

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};

use crate::models::{ExtractSettings, Orientation, PreviewImage};
use crate::utils::error::ExtractError;

pub use registry::{
    DecoderRegistry, FormatDecoder, LocatedPreviews, PreviewCandidate, PreviewPayload,
};
pub use source::RawSource;

/// 预览提取接口（缓存和预取只依赖这个 trait）
pub trait PreviewExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<PreviewImage, ExtractError>;
}

/// 提取选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    /// 标记扫描时 JPEG 的最小字节数（排除小缩略图）
    pub min_scan_bytes: usize,
    /// 预览最长边上限，0 表示不缩放
    pub max_edge: u32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            min_scan_bytes: 10 * 1024,
            max_edge: 0,
        }
    }
}

impl From<&ExtractSettings> for ExtractOptions {
    fn from(s: &ExtractSettings) -> Self {
        Self {
            min_scan_bytes: s.min_scan_bytes,
            max_edge: s.max_edge,
        }
    }
}

/// 排序后的候选及其探测信息
struct Ranked {
    candidate: PreviewCandidate,
    area: u64,
}

/// 基于注册表的 RAW 预览提取器
pub struct RawPreviewExtractor {
    registry: DecoderRegistry,
    options: ExtractOptions,
}

impl RawPreviewExtractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self::with_registry(DecoderRegistry::with_builtin(), options)
    }

    pub fn with_registry(registry: DecoderRegistry, options: ExtractOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    /// 从任意字节来源提取，`extension` 仅在文件头无法识别时使用
    pub fn extract_from(
        &self,
        mut source: RawSource,
        extension: Option<&str>,
    ) -> Result<PreviewImage, ExtractError> {
        let header = source.read_up_to(0, registry::HEADER_LEN)?;
        let decoder = self.registry.resolve(extension, &header).ok_or_else(|| {
            ExtractError::UnsupportedFormat(extension.unwrap_or("未知").to_string())
        })?;

        let located = decoder.locate(&mut source)?;
        let (mut ranked, out_of_bounds) = rank(&mut source, located.candidates)?;

        if ranked.is_empty() {
            if let Some(reason) = out_of_bounds {
                return Err(ExtractError::CorruptFile(reason));
            }
            match jpeg::scan_largest(&mut source, self.options.min_scan_bytes)? {
                Some(candidate) => {
                    tracing::debug!("{}: 容器内没有预览记录，使用标记扫描结果", decoder.name());
                    ranked.push(Ranked { candidate, area: 0 });
                }
                None => {
                    return Err(ExtractError::NoEmbeddedPreview(format!(
                        "{} 容器中没有嵌入预览",
                        decoder.name()
                    )))
                }
            }
        }

        let mut last_error = None;
        for r in &ranked {
            match self.decode(&mut source, &r.candidate, located.orientation) {
                Ok((pixels, orientation)) => {
                    tracing::debug!(
                        "{}: 使用 {}x{} 预览 @{} ({} 字节)",
                        decoder.name(),
                        pixels.width(),
                        pixels.height(),
                        r.candidate.offset,
                        r.candidate.length
                    );
                    return Ok(PreviewImage::new(pixels, orientation, decoder.name()));
                }
                Err(e) => {
                    tracing::debug!("{}: 候选预览 @{} 解码失败: {}", decoder.name(), r.candidate.offset, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ExtractError::CorruptFile("没有可解码的预览".to_string())))
    }

    fn decode(
        &self,
        source: &mut RawSource,
        candidate: &PreviewCandidate,
        container_orientation: Option<Orientation>,
    ) -> Result<(RgbImage, Orientation), ExtractError> {
        let bytes = source.read_at(candidate.offset, candidate.length)?;
        let (img, orientation) = match candidate.payload {
            PreviewPayload::Jpeg => {
                let img = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg)
                    .map_err(|e| ExtractError::CorruptFile(format!("JPEG 解码失败: {}", e)))?;
                let orientation = container_orientation
                    .or_else(|| jpeg::exif_orientation(&bytes))
                    .unwrap_or_default();
                (img, orientation)
            }
            PreviewPayload::Rgb8 { width, height } => {
                let buf = RgbImage::from_raw(width, height, bytes).ok_or_else(|| {
                    ExtractError::CorruptFile("RGB 缩略图尺寸与数据长度不符".to_string())
                })?;
                (
                    DynamicImage::ImageRgb8(buf),
                    container_orientation.unwrap_or_default(),
                )
            }
        };

        let max_edge = self.options.max_edge;
        let img = if max_edge > 0 && img.width().max(img.height()) > max_edge {
            img.resize(max_edge, max_edge, FilterType::Triangle)
        } else {
            img
        };
        Ok((orientation.apply(img).to_rgb8(), orientation))
    }
}

impl Default for RawPreviewExtractor {
    fn default() -> Self {
        Self::new(ExtractOptions::default())
    }
}

impl PreviewExtractor for RawPreviewExtractor {
    fn extract(&self, path: &Path) -> Result<PreviewImage, ExtractError> {
        let extension = path.extension().map(|e| e.to_string_lossy().to_string());
        let source = RawSource::open(path)?;
        self.extract_from(source, extension.as_deref())
    }
}

/// 过滤越界与无损候选，按像素面积、字节数从大到小排序
///
/// 第二个返回值记录越界原因：全部候选越界说明文件被截断。
fn rank(
    source: &mut RawSource,
    candidates: Vec<PreviewCandidate>,
) -> Result<(Vec<Ranked>, Option<String>), ExtractError> {
    let mut ranked = Vec::with_capacity(candidates.len());
    let mut out_of_bounds = None;

    for candidate in candidates {
        if !source.contains(candidate.offset, candidate.length) {
            out_of_bounds = Some(format!(
                "预览数据超出文件末尾: offset={} len={} 文件大小={}",
                candidate.offset,
                candidate.length,
                source.len()
            ));
            continue;
        }
        let area = match candidate.payload {
            PreviewPayload::Rgb8 { width, height } => width as u64 * height as u64,
            PreviewPayload::Jpeg => {
                let head = source.read_at(candidate.offset, candidate.length.min(jpeg::SOF_SCAN_LEN))?;
                if head.len() < 2 || head[0] != 0xFF || head[1] != 0xD8 {
                    tracing::debug!("跳过非 JPEG 数据 @{}", candidate.offset);
                    continue;
                }
                match jpeg::read_header(&head) {
                    Some(info) if info.lossless => continue,
                    Some(info) => info.area(),
                    None => 0,
                }
            }
        };
        ranked.push(Ranked { candidate, area });
    }

    ranked.sort_by(|a, b| {
        (b.area, b.candidate.length).cmp(&(a.area, a.candidate.length))
    });
    Ok((ranked, out_of_bounds))
}
