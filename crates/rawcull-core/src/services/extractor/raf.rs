//! Fujifilm RAF 的预览定位：文件头固定位置记录了内嵌 JPEG 的偏移和长度

use super::registry::{FormatDecoder, LocatedPreviews, PreviewCandidate};
use super::source::{ByteOrder, RawSource};
use crate::utils::error::ExtractError;

const MAGIC: &[u8] = b"FUJIFILMCCD-RAW";
const JPEG_OFFSET_POS: u64 = 84;

/// Fujifilm RAF 解码器
pub struct RafDecoder;

impl FormatDecoder for RafDecoder {
    fn name(&self) -> &'static str {
        "raf"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["raf"]
    }

    fn sniff(&self, header: &[u8]) -> bool {
        header.starts_with(MAGIC)
    }

    fn locate(&self, source: &mut RawSource) -> Result<LocatedPreviews, ExtractError> {
        let magic = source.read_up_to(0, MAGIC.len() as u64)?;
        if magic != MAGIC {
            return Err(ExtractError::CorruptFile("无效的 RAF 文件头".to_string()));
        }
        let fields = source.read_at(JPEG_OFFSET_POS, 8)?;
        let offset = ByteOrder::Big.u32(&fields[0..4]) as u64;
        let length = ByteOrder::Big.u32(&fields[4..8]) as u64;

        let mut out = LocatedPreviews::default();
        out.push(PreviewCandidate::jpeg(offset, length));
        Ok(out)
    }
}
