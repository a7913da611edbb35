//! 文件系统辅助函数

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// 原子写入：先写同目录下的临时文件并 fsync，再 rename 覆盖目标
///
/// 读者要么看到旧内容，要么看到完整的新内容。
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
