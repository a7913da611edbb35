//! 带边界检查的随机读取

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use crate::utils::error::ExtractError;

/// 单次读取的上限，防止损坏的长度字段触发超大分配
pub const MAX_READ: u64 = 256 * 1024 * 1024;

trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// RAW 文件的字节来源
pub struct RawSource {
    inner: Box<dyn ReadSeek>,
    len: u64,
}

impl RawSource {
    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        let file = File::open(path)
            .map_err(|e| ExtractError::CorruptFile(format!("无法打开 {}: {}", path.display(), e)))?;
        let len = file
            .metadata()
            .map_err(|e| ExtractError::CorruptFile(format!("无法读取文件信息: {}", e)))?
            .len();
        Ok(Self {
            inner: Box::new(BufReader::new(file)),
            len,
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self {
            inner: Box::new(Cursor::new(bytes)),
            len,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 判断区间是否完全落在文件内
    pub fn contains(&self, offset: u64, len: u64) -> bool {
        offset.checked_add(len).map_or(false, |end| end <= self.len)
    }

    /// 精确读取 `len` 字节，越界视为文件截断
    pub fn read_at(&mut self, offset: u64, len: u64) -> Result<Vec<u8>, ExtractError> {
        if len > MAX_READ {
            return Err(ExtractError::CorruptFile(format!(
                "长度字段异常: {} 超过单次读取上限 {}",
                len, MAX_READ
            )));
        }
        if !self.contains(offset, len) {
            return Err(ExtractError::CorruptFile(format!(
                "读取越界: offset={} len={} 文件大小={}",
                offset, len, self.len
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.inner
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.inner.read_exact(&mut buf))
            .map_err(|e| ExtractError::CorruptFile(format!("读取失败: {}", e)))?;
        Ok(buf)
    }

    /// 最多读取 `max` 字节，文件不足时返回较短的数据
    pub fn read_up_to(&mut self, offset: u64, max: u64) -> Result<Vec<u8>, ExtractError> {
        let available = self.len.saturating_sub(offset).min(max);
        self.read_at(offset.min(self.len), available)
    }
}

/// 字节序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn u16(self, b: &[u8]) -> u16 {
        let arr = [b[0], b[1]];
        match self {
            ByteOrder::Little => u16::from_le_bytes(arr),
            ByteOrder::Big => u16::from_be_bytes(arr),
        }
    }

    pub fn u32(self, b: &[u8]) -> u32 {
        let arr = [b[0], b[1], b[2], b[3]];
        match self {
            ByteOrder::Little => u32::from_le_bytes(arr),
            ByteOrder::Big => u32::from_be_bytes(arr),
        }
    }

    pub fn u64(self, b: &[u8]) -> u64 {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&b[..8]);
        match self {
            ByteOrder::Little => u64::from_le_bytes(arr),
            ByteOrder::Big => u64::from_be_bytes(arr),
        }
    }
}
