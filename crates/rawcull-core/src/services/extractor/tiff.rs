//! TIFF 系 RAW 容器（CR2、NEF、ARW、DNG、ORF、RW2 等）的预览定位
//!
//! 遍历 IFD 链和 SubIFD，收集三类候选：
//! - `JPEGInterchangeFormat` / `JPEGInterchangeFormatLength` 指向的 JPEG
//! - JPEG 压缩的条带（排除 CFA / LinearRaw 原始数据和 CR2 的 RAW IFD）
//! - 未压缩的缩小分辨率 RGB 条带

use std::collections::{HashMap, HashSet, VecDeque};

use super::registry::{FormatDecoder, LocatedPreviews, PreviewCandidate, PreviewPayload};
use super::source::{ByteOrder, RawSource};
use crate::models::Orientation;
use crate::utils::error::ExtractError;

const TAG_NEW_SUBFILE_TYPE: u16 = 0x00FE;
const TAG_IMAGE_WIDTH: u16 = 0x0100;
const TAG_IMAGE_LENGTH: u16 = 0x0101;
const TAG_BITS_PER_SAMPLE: u16 = 0x0102;
const TAG_COMPRESSION: u16 = 0x0103;
const TAG_PHOTOMETRIC: u16 = 0x0106;
const TAG_STRIP_OFFSETS: u16 = 0x0111;
const TAG_ORIENTATION: u16 = 0x0112;
const TAG_SAMPLES_PER_PIXEL: u16 = 0x0115;
const TAG_STRIP_BYTE_COUNTS: u16 = 0x0117;
const TAG_SUB_IFDS: u16 = 0x014A;
const TAG_JPEG_OFFSET: u16 = 0x0201;
const TAG_JPEG_LENGTH: u16 = 0x0202;
/// Panasonic RW2 的 JpgFromRaw
const TAG_RW2_JPEG: u16 = 0x002E;
/// CR2 RAW IFD 特有的切片信息
const TAG_CR2_SLICES: u16 = 0xC5D8;

const COMPRESSION_NONE: u32 = 1;
const COMPRESSION_OLD_JPEG: u32 = 6;
const COMPRESSION_JPEG: u32 = 7;
const PHOTOMETRIC_RGB: u32 = 2;
const PHOTOMETRIC_CFA: u32 = 32803;
const PHOTOMETRIC_LINEAR_RAW: u32 = 34892;

const MAX_IFDS: usize = 32;
const MAX_DEPTH: u8 = 4;
const MAX_ENTRIES: u16 = 1024;
const MAX_VALUES: u32 = 65_536;

#[derive(Debug, Clone, Copy)]
struct Entry {
    typ: u16,
    count: u32,
    raw: [u8; 4],
}

/// 一个 IFD 的目录项
struct Ifd {
    entries: HashMap<u16, Entry>,
}

/// TIFF 结构读取器，所有偏移相对于 `base`
struct TiffReader<'a> {
    source: &'a mut RawSource,
    order: ByteOrder,
    base: u64,
}

fn type_size(typ: u16) -> Option<u64> {
    match typ {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 | 13 => Some(4),
        5 | 10 | 12 | 16 | 17 | 18 => Some(8),
        _ => None,
    }
}

impl<'a> TiffReader<'a> {
    /// 校验文件头，返回读取器和 IFD0 偏移
    fn open(source: &'a mut RawSource, base: u64) -> Result<(Self, u64), ExtractError> {
        if !source.contains(base, 8) {
            return Err(ExtractError::CorruptFile("TIFF 头不完整".to_string()));
        }
        let header = source.read_at(base, 8)?;
        let order = match &header[0..2] {
            b"II" => ByteOrder::Little,
            b"MM" => ByteOrder::Big,
            _ => return Err(ExtractError::CorruptFile("无效的 TIFF 字节序标记".to_string())),
        };
        let magic = order.u16(&header[2..4]);
        // 42 标准 TIFF；0x4F52/0x5352 Olympus ORF；0x55 Panasonic RW2
        if !matches!(magic, 42 | 0x4F52 | 0x5352 | 0x55) {
            return Err(ExtractError::CorruptFile(format!("未知的 TIFF 标识: {:#x}", magic)));
        }
        let ifd0 = order.u32(&header[4..8]) as u64;
        Ok((Self { source, order, base }, ifd0))
    }

    fn read_ifd(&mut self, offset: u64) -> Result<(Ifd, u64), ExtractError> {
        let abs = self.base + offset;
        let count_bytes = self.source.read_at(abs, 2)?;
        let count = self.order.u16(&count_bytes);
        if count == 0 || count > MAX_ENTRIES {
            return Err(ExtractError::CorruptFile(format!("IFD 条目数异常: {}", count)));
        }
        let body = self.source.read_at(abs + 2, count as u64 * 12 + 4)?;
        let mut entries = HashMap::with_capacity(count as usize);
        for chunk in body[..count as usize * 12].chunks_exact(12) {
            let tag = self.order.u16(&chunk[0..2]);
            let entry = Entry {
                typ: self.order.u16(&chunk[2..4]),
                count: self.order.u32(&chunk[4..8]),
                raw: [chunk[8], chunk[9], chunk[10], chunk[11]],
            };
            entries.insert(tag, entry);
        }
        let next = self.order.u32(&body[count as usize * 12..]) as u64;
        Ok((Ifd { entries }, next))
    }

    /// 读取 SHORT / LONG 类数值数组
    fn values(&mut self, entry: &Entry) -> Result<Vec<u32>, ExtractError> {
        let size = type_size(entry.typ)
            .ok_or_else(|| ExtractError::CorruptFile(format!("未知的 TIFF 类型: {}", entry.typ)))?;
        if entry.count > MAX_VALUES {
            return Err(ExtractError::CorruptFile(format!("值数量异常: {}", entry.count)));
        }
        let total = size * entry.count as u64;
        let data = if total <= 4 {
            entry.raw[..total as usize].to_vec()
        } else {
            let offset = self.order.u32(&entry.raw) as u64;
            self.source.read_at(self.base + offset, total)?
        };
        let values = match size {
            1 => data.iter().map(|&b| b as u32).collect(),
            2 => data.chunks_exact(2).map(|c| self.order.u16(c) as u32).collect(),
            _ => data
                .chunks_exact(size as usize)
                .map(|c| self.order.u32(&c[..4]))
                .collect(),
        };
        Ok(values)
    }

    fn first(&mut self, ifd: &Ifd, tag: u16) -> Result<Option<u32>, ExtractError> {
        match ifd.entries.get(&tag) {
            Some(entry) => Ok(self.values(entry)?.first().copied()),
            None => Ok(None),
        }
    }

    /// 把多个条带合并为一段连续区间，不连续时返回 `None`
    fn strip_span(&mut self, ifd: &Ifd) -> Result<Option<(u64, u64)>, ExtractError> {
        let (Some(offsets), Some(counts)) = (
            ifd.entries.get(&TAG_STRIP_OFFSETS).copied(),
            ifd.entries.get(&TAG_STRIP_BYTE_COUNTS).copied(),
        ) else {
            return Ok(None);
        };
        let offsets = self.values(&offsets)?;
        let counts = self.values(&counts)?;
        if offsets.is_empty() || offsets.len() != counts.len() {
            return Ok(None);
        }
        let start = offsets[0] as u64;
        let mut end = start;
        for (o, c) in offsets.iter().zip(&counts) {
            if *o as u64 != end {
                return Ok(None);
            }
            end += *c as u64;
        }
        Ok(Some((self.base + start, end - start)))
    }

    fn collect_candidates(&mut self, ifd: &Ifd, out: &mut LocatedPreviews) -> Result<(), ExtractError> {
        if let (Some(offset), Some(length)) = (
            self.first(ifd, TAG_JPEG_OFFSET)?,
            self.first(ifd, TAG_JPEG_LENGTH)?,
        ) {
            out.push(PreviewCandidate::jpeg(self.base + offset as u64, length as u64));
        }

        if let Some(entry) = ifd.entries.get(&TAG_RW2_JPEG).copied() {
            if entry.typ == 7 && entry.count > 4 {
                let offset = self.order.u32(&entry.raw) as u64;
                out.push(PreviewCandidate::jpeg(self.base + offset, entry.count as u64));
            }
        }

        let compression = self.first(ifd, TAG_COMPRESSION)?.unwrap_or(COMPRESSION_NONE);
        let photometric = self.first(ifd, TAG_PHOTOMETRIC)?;
        let is_raw_data = matches!(photometric, Some(PHOTOMETRIC_CFA | PHOTOMETRIC_LINEAR_RAW))
            || ifd.entries.contains_key(&TAG_CR2_SLICES);
        if is_raw_data {
            return Ok(());
        }

        if compression == COMPRESSION_OLD_JPEG || compression == COMPRESSION_JPEG {
            if let Some((offset, length)) = self.strip_span(ifd)? {
                out.push(PreviewCandidate::jpeg(offset, length));
            }
            return Ok(());
        }

        if compression == COMPRESSION_NONE && photometric == Some(PHOTOMETRIC_RGB) {
            let reduced = self.first(ifd, TAG_NEW_SUBFILE_TYPE)?.unwrap_or(0) & 1 == 1;
            let samples = self.first(ifd, TAG_SAMPLES_PER_PIXEL)?.unwrap_or(1);
            let bits_ok = match ifd.entries.get(&TAG_BITS_PER_SAMPLE).copied() {
                Some(entry) => self.values(&entry)?.iter().all(|&b| b == 8),
                None => false,
            };
            let width = self.first(ifd, TAG_IMAGE_WIDTH)?.unwrap_or(0);
            let height = self.first(ifd, TAG_IMAGE_LENGTH)?.unwrap_or(0);
            if reduced && samples == 3 && bits_ok && width > 0 && height > 0 {
                if let Some((offset, length)) = self.strip_span(ifd)? {
                    if length == width as u64 * height as u64 * 3 {
                        out.push(PreviewCandidate {
                            offset,
                            length,
                            payload: PreviewPayload::Rgb8 { width, height },
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// 遍历 IFD0、后续 IFD 链和 SubIFD
    fn walk(&mut self, ifd0: u64) -> Result<LocatedPreviews, ExtractError> {
        let mut out = LocatedPreviews::default();
        let mut queue: VecDeque<(u64, u8)> = VecDeque::from([(ifd0, 0)]);
        let mut visited = HashSet::new();
        let mut first_error: Option<ExtractError> = None;

        while let Some((offset, depth)) = queue.pop_front() {
            if offset == 0 || visited.len() >= MAX_IFDS || !visited.insert(offset) {
                continue;
            }
            let is_ifd0 = visited.len() == 1;
            let ifd = match self.read_ifd(offset) {
                Ok((ifd, next)) => {
                    if next != 0 {
                        queue.push_back((next, depth));
                    }
                    ifd
                }
                // IFD0 损坏即整个文件损坏
                Err(e) if is_ifd0 => return Err(e),
                Err(e) => {
                    tracing::debug!("跳过损坏的 IFD @{}: {}", offset, e);
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            if is_ifd0 {
                if let Some(v) = self.first(&ifd, TAG_ORIENTATION)? {
                    if (1..=8).contains(&v) {
                        out.orientation = Some(Orientation::from_exif(v as u16));
                    }
                }
            }

            if let Err(e) = self.collect_candidates(&ifd, &mut out) {
                tracing::debug!("IFD @{} 的预览信息无效: {}", offset, e);
                first_error.get_or_insert(e);
            }

            if depth < MAX_DEPTH {
                if let Some(entry) = ifd.entries.get(&TAG_SUB_IFDS).copied() {
                    match self.values(&entry) {
                        Ok(subs) => queue.extend(subs.into_iter().map(|s| (s as u64, depth + 1))),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
        }

        // 结构有损坏且一个候选都没找到，按损坏文件处理
        match first_error {
            Some(e) if out.candidates.is_empty() => Err(e),
            _ => Ok(out),
        }
    }
}

/// 只读取 IFD0 的方向（CR3 的 CMT1 盒子里是一个完整的 TIFF）
pub(crate) fn read_orientation(bytes: Vec<u8>) -> Option<Orientation> {
    let mut source = RawSource::from_bytes(bytes);
    let (mut reader, ifd0) = TiffReader::open(&mut source, 0).ok()?;
    let (ifd, _) = reader.read_ifd(ifd0).ok()?;
    let v = reader.first(&ifd, TAG_ORIENTATION).ok()??;
    (1..=8).contains(&v).then(|| Orientation::from_exif(v as u16))
}

/// TIFF 系解码器
pub struct TiffDecoder;

impl FormatDecoder for TiffDecoder {
    fn name(&self) -> &'static str {
        "tiff"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[
            "cr2", "nef", "nrw", "arw", "srf", "sr2", "dng", "pef", "srw", "3fr", "fff", "erf",
            "dcr", "kdc", "mef", "mos", "rwl", "iiq", "orf", "rw2", "raw", "ptx", "pxn", "tif", "tiff",
        ]
    }

    fn sniff(&self, header: &[u8]) -> bool {
        header.len() >= 4
            && matches!(
                &header[..4],
                b"II*\0" | b"MM\0*" | b"IIRO" | b"IIRS" | b"MMOR" | b"IIU\0"
            )
    }

    fn locate(&self, source: &mut RawSource) -> Result<LocatedPreviews, ExtractError> {
        let (mut reader, ifd0) = TiffReader::open(source, 0)?;
        reader.walk(ifd0)
    }
}
