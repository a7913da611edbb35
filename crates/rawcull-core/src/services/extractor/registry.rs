//! 格式能力注册表：文件头 / 扩展名 -> 解码器

use super::bmff::Cr3Decoder;
use super::raf::RafDecoder;
use super::source::RawSource;
use super::tiff::TiffDecoder;
use crate::models::Orientation;
use crate::utils::error::ExtractError;

/// 识别格式时读取的文件头长度
pub const HEADER_LEN: u64 = 64;

/// 预览数据的编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewPayload {
    Jpeg,
    /// 未压缩 RGB，每像素 3 字节
    Rgb8 { width: u32, height: u32 },
}

/// 容器中的一个候选预览
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewCandidate {
    pub offset: u64,
    pub length: u64,
    pub payload: PreviewPayload,
}

impl PreviewCandidate {
    pub fn jpeg(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            payload: PreviewPayload::Jpeg,
        }
    }
}

/// 解码器定位到的所有候选预览
#[derive(Debug, Clone, Default)]
pub struct LocatedPreviews {
    pub candidates: Vec<PreviewCandidate>,
    /// 容器记录的方向；`None` 时回退到 JPEG 自带的 EXIF
    pub orientation: Option<Orientation>,
}

impl LocatedPreviews {
    /// 按偏移去重后加入
    pub fn push(&mut self, candidate: PreviewCandidate) {
        if candidate.length == 0 {
            return;
        }
        if !self.candidates.iter().any(|c| c.offset == candidate.offset) {
            self.candidates.push(candidate);
        }
    }
}

/// 某一类 RAW 容器的预览定位器
pub trait FormatDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// 小写扩展名
    fn extensions(&self) -> &'static [&'static str];

    /// 根据文件头判断是否为本格式
    fn sniff(&self, header: &[u8]) -> bool;

    /// 只解析容器结构，不解码像素
    fn locate(&self, source: &mut RawSource) -> Result<LocatedPreviews, ExtractError>;
}

/// 解码器注册表
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn FormatDecoder>>,
}

impl DecoderRegistry {
    pub fn empty() -> Self {
        Self {
            decoders: Vec::new(),
        }
    }

    /// 内置 TIFF 系、CR3、RAF 解码器
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(RafDecoder));
        registry.register(Box::new(Cr3Decoder));
        registry.register(Box::new(TiffDecoder));
        registry
    }

    pub fn register(&mut self, decoder: Box<dyn FormatDecoder>) {
        self.decoders.push(decoder);
    }

    /// 先按文件头匹配，再按扩展名匹配
    pub fn resolve(&self, extension: Option<&str>, header: &[u8]) -> Option<&dyn FormatDecoder> {
        if let Some(d) = self.decoders.iter().find(|d| d.sniff(header)) {
            return Some(d.as_ref());
        }
        let ext = extension?.to_ascii_lowercase();
        self.decoders
            .iter()
            .find(|d| d.extensions().contains(&ext.as_str()))
            .map(|d| d.as_ref())
    }

    pub fn supports_extension(&self, extension: &str) -> bool {
        let ext = extension.to_ascii_lowercase();
        self.decoders
            .iter()
            .any(|d| d.extensions().contains(&ext.as_str()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
