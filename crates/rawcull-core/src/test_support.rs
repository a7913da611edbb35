//! 测试用的合成 RAW 容器与模拟提取器

use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

use crate::models::{ImageEntry, ModSignature, Orientation, PreviewImage};
use crate::services::extractor::PreviewExtractor;
use crate::utils::error::ExtractError;

/// 生成一张带渐变的真实 JPEG
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, 128])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

pub fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, bytes).unwrap();
    path
}

/// 为磁盘上已存在的文件构造条目
pub fn entry_for(path: &Path) -> ImageEntry {
    ImageEntry::new(path.to_path_buf(), ModSignature::of(path).unwrap())
}

#[derive(Clone, Copy)]
enum Val {
    Inline(u32),
    BlobOffset(usize),
    BlobLen(usize),
}

const SHORT: u16 = 3;
const LONG: u16 = 4;

/// 小端 TIFF 构造器：IFD0 总是带方向标签，其余 IFD 依次链接
pub struct TiffBuilder {
    orientation: u16,
    ifds: Vec<Vec<(u16, u16, Val)>>,
    blobs: Vec<Vec<u8>>,
}

impl TiffBuilder {
    pub fn new() -> Self {
        Self {
            orientation: 1,
            ifds: Vec::new(),
            blobs: Vec::new(),
        }
    }

    pub fn orientation(mut self, value: u16) -> Self {
        self.orientation = value;
        self
    }

    fn blob(&mut self, data: Vec<u8>) -> usize {
        self.blobs.push(data);
        self.blobs.len() - 1
    }

    /// JPEGInterchangeFormat / Length 指向的预览
    pub fn jpeg_ifd(mut self, jpeg: Vec<u8>) -> Self {
        let b = self.blob(jpeg);
        self.ifds.push(vec![
            (0x00FE, LONG, Val::Inline(1)),
            (0x0201, LONG, Val::BlobOffset(b)),
            (0x0202, LONG, Val::BlobLen(b)),
        ]);
        self
    }

    /// JPEG 压缩（Compression=6）的单条带
    pub fn jpeg_strip_ifd(mut self, data: Vec<u8>) -> Self {
        let b = self.blob(data);
        self.ifds.push(vec![
            (0x0103, SHORT, Val::Inline(6)),
            (0x0106, SHORT, Val::Inline(6)),
            (0x0111, LONG, Val::BlobOffset(b)),
            (0x0117, LONG, Val::BlobLen(b)),
        ]);
        self
    }

    /// CFA 原始数据条带
    pub fn cfa_strip_ifd(mut self, data: Vec<u8>) -> Self {
        let b = self.blob(data);
        self.ifds.push(vec![
            (0x00FE, LONG, Val::Inline(0)),
            (0x0103, SHORT, Val::Inline(7)),
            (0x0106, SHORT, Val::Inline(32803)),
            (0x0111, LONG, Val::BlobOffset(b)),
            (0x0117, LONG, Val::BlobLen(b)),
        ]);
        self
    }

    /// 未压缩 RGB8 缩略图条带
    pub fn rgb_strip_ifd(mut self, width: u32, height: u32, data: Vec<u8>) -> Self {
        let b = self.blob(data);
        self.ifds.push(vec![
            (0x00FE, LONG, Val::Inline(1)),
            (0x0100, LONG, Val::Inline(width)),
            (0x0101, LONG, Val::Inline(height)),
            (0x0102, SHORT, Val::Inline(8)),
            (0x0103, SHORT, Val::Inline(1)),
            (0x0106, SHORT, Val::Inline(2)),
            (0x0111, LONG, Val::BlobOffset(b)),
            (0x0115, SHORT, Val::Inline(3)),
            (0x0117, LONG, Val::BlobLen(b)),
        ]);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut ifds = self.ifds;
        if ifds.is_empty() {
            ifds.push(Vec::new());
        }
        ifds[0].push((0x0112, SHORT, Val::Inline(self.orientation as u32)));
        for ifd in &mut ifds {
            ifd.sort_by_key(|e| e.0);
        }

        let mut ifd_offsets = Vec::with_capacity(ifds.len());
        let mut pos = 8usize;
        for ifd in &ifds {
            ifd_offsets.push(pos);
            pos += 2 + 12 * ifd.len() + 4;
        }
        let mut blob_offsets = Vec::with_capacity(self.blobs.len());
        for blob in &self.blobs {
            blob_offsets.push(pos);
            pos += blob.len();
        }

        let mut out = Vec::with_capacity(pos);
        out.extend_from_slice(b"II*\0");
        out.extend_from_slice(&8u32.to_le_bytes());
        for (i, ifd) in ifds.iter().enumerate() {
            out.extend_from_slice(&(ifd.len() as u16).to_le_bytes());
            for &(tag, typ, val) in ifd {
                let v = match val {
                    Val::Inline(v) => v,
                    Val::BlobOffset(b) => blob_offsets[b] as u32,
                    Val::BlobLen(b) => self.blobs[b].len() as u32,
                };
                out.extend_from_slice(&tag.to_le_bytes());
                out.extend_from_slice(&typ.to_le_bytes());
                out.extend_from_slice(&1u32.to_le_bytes());
                if typ == SHORT {
                    out.extend_from_slice(&(v as u16).to_le_bytes());
                    out.extend_from_slice(&[0, 0]);
                } else {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            let next = ifd_offsets.get(i + 1).copied().unwrap_or(0) as u32;
            out.extend_from_slice(&next.to_le_bytes());
        }
        for blob in &self.blobs {
            out.extend_from_slice(blob);
        }
        out
    }
}

/// 最小 RAF：100 字节文件头 + JPEG
pub fn raf_bytes(jpeg: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 100];
    out[..28].copy_from_slice(b"FUJIFILMCCD-RAW 0201FF383501");
    out[84..88].copy_from_slice(&100u32.to_be_bytes());
    out[88..92].copy_from_slice(&(jpeg.len() as u32).to_be_bytes());
    out.extend_from_slice(jpeg);
    out
}

fn bmff_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn preview_box(kind: &[u8; 4], jpeg: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 16];
    payload[12..16].copy_from_slice(&(jpeg.len() as u32).to_be_bytes());
    payload.extend_from_slice(jpeg);
    bmff_box(kind, &payload)
}

/// 最小 CR3：ftyp + moov(Canon uuid: CMT1, THMB) + 预览 uuid(PRVW)
pub fn cr3_bytes(preview: &[u8], thumb: &[u8], orientation: u16) -> Vec<u8> {
    const CANON_UUID: [u8; 16] = [
        0x85, 0xc0, 0xb6, 0x87, 0x82, 0x0f, 0x11, 0xe0, 0x81, 0x11, 0xf4, 0xce, 0x46, 0x2b, 0x6a,
        0x48,
    ];
    const PREVIEW_UUID: [u8; 16] = [
        0xea, 0xf4, 0x2b, 0x5e, 0x1c, 0x98, 0x4b, 0x88, 0xb9, 0xfb, 0xb7, 0xdc, 0x40, 0x6e, 0x4d,
        0x16,
    ];

    let ftyp = bmff_box(b"ftyp", b"crx \0\0\0\x01crx isom");

    let mut canon = CANON_UUID.to_vec();
    canon.extend(bmff_box(b"CMT1", &TiffBuilder::new().orientation(orientation).build()));
    canon.extend(preview_box(b"THMB", thumb));
    let moov = bmff_box(b"moov", &bmff_box(b"uuid", &canon));

    let mut prvw = PREVIEW_UUID.to_vec();
    prvw.extend_from_slice(&[0u8; 8]);
    prvw.extend(preview_box(b"PRVW", preview));
    let prvw = bmff_box(b"uuid", &prvw);

    [ftyp, moov, prvw].concat()
}

/// 可手动放行的闸门
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

/// 记录调用的模拟提取器，不读取文件内容
pub struct MockExtractor {
    calls: AtomicUsize,
    log: Mutex<Vec<PathBuf>>,
    delay: Duration,
    size: (u32, u32),
    failing: Mutex<HashSet<PathBuf>>,
    gate: Option<Arc<Gate>>,
    started: Mutex<Option<mpsc::Sender<PathBuf>>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            size: (16, 8),
            failing: Mutex::new(HashSet::new()),
            gate: None,
            started: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    /// 每次提取开始时发送路径，并等待闸门打开
    pub fn gated(mut self, gate: Arc<Gate>, started: mpsc::Sender<PathBuf>) -> Self {
        self.gate = Some(gate);
        self.started = Mutex::new(Some(started));
        self
    }

    pub fn fail_on(&self, path: &Path) {
        self.failing.lock().unwrap().insert(path.to_path_buf());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn extracted(&self) -> Vec<PathBuf> {
        self.log.lock().unwrap().clone()
    }
}

impl PreviewExtractor for MockExtractor {
    fn extract(&self, path: &Path) -> Result<PreviewImage, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(path.to_path_buf());
        if let Some(tx) = self.started.lock().unwrap().as_ref() {
            let _ = tx.send(path.to_path_buf());
        }
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.failing.lock().unwrap().contains(path) {
            return Err(ExtractError::CorruptFile(format!("mock failure: {}", path.display())));
        }
        let seed = path.to_string_lossy().len() as u8;
        let (w, h) = self.size;
        Ok(PreviewImage::new(
            RgbImage::from_pixel(w, h, Rgb([seed, seed.wrapping_mul(3), 7])),
            Orientation::Normal,
            "mock",
        ))
    }
}
