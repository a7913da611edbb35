//! JPEG 流辅助：SOF 解析、结束位置、全文件标记扫描、EXIF 方向

use std::io::Cursor;

use exif::{In, Reader, Tag};

use super::registry::PreviewCandidate;
use super::source::{RawSource, MAX_READ};
use crate::models::Orientation;
use crate::utils::error::ExtractError;

/// 探测 JPEG 头部时读取的字节数（APP1 里的 EXIF 可能较大）
pub const SOF_SCAN_LEN: u64 = 128 * 1024;

/// 全文件扫描的窗口大小，相邻窗口重叠两个字节
const SCAN_WINDOW: u64 = 32 * 1024 * 1024;

/// 从 SOF 段读出的基本信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegInfo {
    pub width: u32,
    pub height: u32,
    /// SOF3 等无损编码，RAW 传感器数据常用，不是可显示的预览
    pub lossless: bool,
}

impl JpegInfo {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

fn is_sof(marker: u8) -> bool {
    (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

fn be16(b: &[u8], pos: usize) -> usize {
    u16::from_be_bytes([b[pos], b[pos + 1]]) as usize
}

/// 读取下一个标记，返回 (标记, 标记之后的位置)
fn next_marker(bytes: &[u8], pos: usize) -> Option<(u8, usize)> {
    if bytes.get(pos) != Some(&0xFF) {
        return None;
    }
    let mut p = pos + 1;
    while bytes.get(p) == Some(&0xFF) {
        p += 1;
    }
    bytes.get(p).map(|&m| (m, p + 1))
}

/// 解析段头直到 SOF，拿到尺寸
pub fn read_header(bytes: &[u8]) -> Option<JpegInfo> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut pos = 2;
    loop {
        let (marker, after) = next_marker(bytes, pos)?;
        pos = after;
        match marker {
            0x01 | 0xD0..=0xD8 => continue,
            0xD9 | 0xDA => return None,
            _ => {}
        }
        if pos + 2 > bytes.len() {
            return None;
        }
        let len = be16(bytes, pos);
        if len < 2 {
            return None;
        }
        if is_sof(marker) {
            if pos + 7 > bytes.len() {
                return None;
            }
            return Some(JpegInfo {
                height: be16(bytes, pos + 3) as u32,
                width: be16(bytes, pos + 5) as u32,
                lossless: matches!(marker, 0xC3 | 0xC7 | 0xCB | 0xCF),
            });
        }
        pos += len;
    }
}

/// 从 SOI 开始解析的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    /// EOI 之后的位置
    End(usize),
    /// 数据在流结束前耗尽
    Truncated,
    Invalid,
}

fn walk_stream(bytes: &[u8], start: usize) -> Walk {
    let mut pos = start + 2;
    loop {
        let Some(&first) = bytes.get(pos) else {
            return Walk::Truncated;
        };
        let Some((marker, after)) = next_marker(bytes, pos) else {
            return if first == 0xFF { Walk::Truncated } else { Walk::Invalid };
        };
        pos = after;
        match marker {
            0xD9 => return Walk::End(pos),
            0x01 | 0xD0..=0xD7 => continue,
            _ => {}
        }
        if pos + 2 > bytes.len() {
            return Walk::Truncated;
        }
        let len = be16(bytes, pos);
        if len < 2 {
            return Walk::Invalid;
        }
        if pos + len > bytes.len() {
            return Walk::Truncated;
        }
        pos += len;
        if marker == 0xDA {
            // 熵编码数据：跳过 FF00 填充和 RST 标记
            loop {
                let Some(rel) = bytes[pos..].iter().position(|&b| b == 0xFF) else {
                    return Walk::Truncated;
                };
                pos += rel;
                let Some(&next) = bytes.get(pos + 1) else {
                    return Walk::Truncated;
                };
                match next {
                    0x00 | 0xD0..=0xD7 => pos += 2,
                    0xFF => pos += 1,
                    _ => break,
                }
            }
        }
    }
}

/// 从 `start` 处的 SOI 开始解析，返回 EOI 之后的位置
pub fn stream_end(bytes: &[u8], start: usize) -> Option<usize> {
    match walk_stream(bytes, start) {
        Walk::End(end) => Some(end),
        Walk::Truncated | Walk::Invalid => None,
    }
}

/// 全文件扫描，找出最大的内嵌 JPEG（解码器没有给出候选时的兜底）
///
/// 按窗口读取，内存占用与文件大小无关；单个流超过 [`MAX_READ`] 时忽略。
pub fn scan_largest(
    source: &mut RawSource,
    min_bytes: usize,
) -> Result<Option<PreviewCandidate>, ExtractError> {
    scan_windows(source, min_bytes, SCAN_WINDOW, MAX_READ)
}

fn scan_windows(
    source: &mut RawSource,
    min_bytes: usize,
    window: u64,
    max_window: u64,
) -> Result<Option<PreviewCandidate>, ExtractError> {
    let total = source.len();
    let window = window.max(16);
    let mut best: Option<(u64, u64, u64)> = None;
    let mut base = 0u64;
    let mut size = window;

    while base < total {
        let data = source.read_up_to(base, size)?;
        let at_eof = base + data.len() as u64 >= total;
        let mut pos = 0;
        let mut resume_at = None;

        while pos + 3 <= data.len() {
            let Some(rel) = data[pos..]
                .windows(3)
                .position(|w| w[0] == 0xFF && w[1] == 0xD8 && w[2] == 0xFF)
            else {
                break;
            };
            let start = pos + rel;
            match walk_stream(&data, start) {
                Walk::End(end) => {
                    let len = end - start;
                    if len >= min_bytes {
                        let head = &data[start..end.min(start + SOF_SCAN_LEN as usize)];
                        match read_header(head) {
                            Some(info) if !info.lossless => {
                                let offset = base + start as u64;
                                let better = best.map_or(true, |(area, _, blen)| {
                                    (info.area(), len as u64) > (area, blen)
                                });
                                if better {
                                    best = Some((info.area(), offset, len as u64));
                                }
                            }
                            _ => {}
                        }
                    }
                    pos = end;
                }
                Walk::Truncated if !at_eof => {
                    resume_at = Some(start);
                    break;
                }
                Walk::Truncated | Walk::Invalid => pos = start + 2,
            }
        }

        match resume_at {
            // 流从窗口开头起仍未结束：扩大窗口重读
            Some(0) if size < max_window => size = (size * 2).min(max_window),
            Some(0) => {
                tracing::debug!("跳过超过 {} 字节的 JPEG 流 (offset={})", max_window, base);
                base += 2;
                size = window;
            }
            Some(start) => {
                base += start as u64;
                size = window;
            }
            None if at_eof => break,
            // 保留末尾两个字节，跨窗口的 SOI 不会漏掉
            None => base += pos.max(data.len() - 2) as u64,
        }
    }

    Ok(best.map(|(_, offset, len)| PreviewCandidate::jpeg(offset, len)))
}

/// 读取 JPEG 自带 EXIF 中的方向
pub fn exif_orientation(jpeg: &[u8]) -> Option<Orientation> {
    let exif = Reader::new()
        .read_from_container(&mut Cursor::new(jpeg))
        .ok()?;
    let field = exif.get_field(Tag::Orientation, In::PRIMARY)?;
    let value = field.value.get_uint(0)?;
    (1..=8)
        .contains(&value)
        .then(|| Orientation::from_exif(value as u16))
}
