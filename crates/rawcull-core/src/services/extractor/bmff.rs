//! Canon CR3（ISO-BMFF 容器）的预览定位
//!
//! 预览位于顶层 PRVW uuid 盒子中，缩略图 THMB 和方向信息 CMT1 位于
//! moov 下的 Canon uuid 盒子中。

use super::registry::{FormatDecoder, LocatedPreviews, PreviewCandidate};
use super::source::{ByteOrder, RawSource};
use super::tiff;
use crate::utils::error::ExtractError;

const CANON_UUID: [u8; 16] = [
    0x85, 0xc0, 0xb6, 0x87, 0x82, 0x0f, 0x11, 0xe0, 0x81, 0x11, 0xf4, 0xce, 0x46, 0x2b, 0x6a, 0x48,
];
const PREVIEW_UUID: [u8; 16] = [
    0xea, 0xf4, 0x2b, 0x5e, 0x1c, 0x98, 0x4b, 0x88, 0xb9, 0xfb, 0xb7, 0xdc, 0x40, 0x6e, 0x4d, 0x16,
];

const MAX_DEPTH: u8 = 6;
/// CMT1 中 TIFF 的读取上限
const MAX_CMT_LEN: u64 = 1024 * 1024;
/// 在 PRVW / THMB 盒子开头查找 JPEG SOI 的范围
const SOI_SEARCH: u64 = 64;

struct BoxHeader {
    kind: [u8; 4],
    payload: u64,
    end: u64,
}

fn read_box(source: &mut RawSource, pos: u64, limit: u64) -> Result<BoxHeader, ExtractError> {
    let head = source.read_at(pos, 8)?;
    let size32 = ByteOrder::Big.u32(&head[0..4]) as u64;
    let kind = [head[4], head[5], head[6], head[7]];
    let (size, header_len) = match size32 {
        0 => (limit - pos, 8),
        1 => (ByteOrder::Big.u64(&source.read_at(pos + 8, 8)?), 16),
        n => (n, 8),
    };
    let end = pos
        .checked_add(size)
        .filter(|&end| size >= header_len && end <= limit)
        .ok_or_else(|| {
            ExtractError::CorruptFile(format!(
                "BMFF 盒子越界: {} @{} size={}",
                String::from_utf8_lossy(&kind),
                pos,
                size
            ))
        })?;
    Ok(BoxHeader {
        kind,
        payload: pos + header_len,
        end,
    })
}

fn walk(
    source: &mut RawSource,
    start: u64,
    limit: u64,
    depth: u8,
    out: &mut LocatedPreviews,
) -> Result<(), ExtractError> {
    let mut pos = start;
    while pos + 8 <= limit {
        let b = read_box(source, pos, limit)?;
        match &b.kind {
            b"moov" if depth < MAX_DEPTH => walk(source, b.payload, b.end, depth + 1, out)?,
            b"uuid" if depth < MAX_DEPTH && b.payload + 16 <= b.end => {
                let uuid = source.read_at(b.payload, 16)?;
                if uuid == CANON_UUID {
                    walk(source, b.payload + 16, b.end, depth + 1, out)?;
                } else if uuid == PREVIEW_UUID {
                    // uuid 之后有 8 字节未知字段，然后才是 PRVW 盒子
                    walk(source, b.payload + 24, b.end, depth + 1, out)?;
                }
            }
            b"PRVW" | b"THMB" => {
                let head = source.read_up_to(b.payload, SOI_SEARCH.min(b.end - b.payload))?;
                if let Some(i) = head.windows(3).position(|w| w == [0xFF, 0xD8, 0xFF]) {
                    let offset = b.payload + i as u64;
                    out.push(PreviewCandidate::jpeg(offset, b.end - offset));
                }
            }
            b"CMT1" => {
                let len = (b.end - b.payload).min(MAX_CMT_LEN);
                let bytes = source.read_at(b.payload, len)?;
                if let Some(o) = tiff::read_orientation(bytes) {
                    out.orientation = Some(o);
                }
            }
            _ => {}
        }
        pos = b.end;
    }
    Ok(())
}

/// Canon CR3 解码器
pub struct Cr3Decoder;

impl FormatDecoder for Cr3Decoder {
    fn name(&self) -> &'static str {
        "cr3"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["cr3"]
    }

    fn sniff(&self, header: &[u8]) -> bool {
        header.len() >= 12 && &header[4..8] == b"ftyp" && &header[8..12] == b"crx "
    }

    fn locate(&self, source: &mut RawSource) -> Result<LocatedPreviews, ExtractError> {
        if source.len() < 8 {
            return Err(ExtractError::CorruptFile("CR3 文件过短".to_string()));
        }
        let limit = source.len();
        let first = read_box(source, 0, limit)?;
        if &first.kind != b"ftyp" {
            return Err(ExtractError::CorruptFile("缺少 ftyp 盒子".to_string()));
        }
        let mut out = LocatedPreviews::default();
        walk(source, 0, limit, 0, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Orientation;
    use crate::test_support::{cr3_bytes, jpeg_bytes};

    #[test]
    fn test_locates_prvw_and_thmb() {
        let preview = jpeg_bytes(48, 32);
        let thumb = jpeg_bytes(16, 10);
        let bytes = cr3_bytes(&preview, &thumb, 6);
        let located = Cr3Decoder.locate(&mut RawSource::from_bytes(bytes.clone())).unwrap();

        assert_eq!(located.orientation, Some(Orientation::Rotate90));
        assert_eq!(located.candidates.len(), 2);
        let starts: Vec<&[u8]> = located
            .candidates
            .iter()
            .map(|c| &bytes[c.offset as usize..c.offset as usize + 3])
            .collect();
        assert!(starts.iter().all(|s| *s == [0xFF, 0xD8, 0xFF]));
    }

    #[test]
    fn test_box_overrunning_file_is_corrupt() {
        let mut bytes = cr3_bytes(&jpeg_bytes(8, 8), &jpeg_bytes(8, 8), 1);
        bytes.truncate(bytes.len() - 10);
        let err = Cr3Decoder.locate(&mut RawSource::from_bytes(bytes)).unwrap_err();
        assert!(matches!(err, ExtractError::CorruptFile(_)));
    }

    #[test]
    fn test_sniff() {
        assert!(Cr3Decoder.sniff(b"\0\0\0\x18ftypcrx \0\0\0\x01"));
        assert!(!Cr3Decoder.sniff(b"\0\0\0\x18ftypisom"));
    }
}
