//! 最近打开的文件夹

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::paths::PathProvider;
use crate::utils::error::{AppError, AppResult};
use crate::utils::fsutil::atomic_write;

/// 最多保留的文件夹数
pub const MAX_RECENT: usize = 5;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecentFile {
    folders: Vec<PathBuf>,
}

/// 最近文件夹列表（最近的在前）
pub struct RecentFolders {
    path: PathBuf,
    folders: Vec<PathBuf>,
}

impl RecentFolders {
    pub fn new(provider: &dyn PathProvider) -> AppResult<Self> {
        Self::load(provider.recent_folders_path())
    }

    /// 读取列表，丢弃已不存在的文件夹；文件损坏时从空列表开始
    pub fn load(path: PathBuf) -> AppResult<Self> {
        let folders = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<RecentFile>(&bytes) {
                Ok(file) => file.folders,
                Err(e) => {
                    tracing::warn!("最近文件夹列表损坏，已忽略 {:?}: {}", path, e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(AppError::Config(format!("无法读取最近文件夹列表: {}", e))),
        };

        let mut recent = Self { path, folders: Vec::new() };
        for folder in folders.into_iter().filter(|f| f.is_dir()) {
            if !recent.folders.contains(&folder) && recent.folders.len() < MAX_RECENT {
                recent.folders.push(folder);
            }
        }
        Ok(recent)
    }

    pub fn folders(&self) -> &[PathBuf] {
        &self.folders
    }

    /// 记录一次打开：移到最前，超出上限的丢弃，并立即保存
    pub fn add(&mut self, folder: &Path) -> AppResult<()> {
        self.folders.retain(|f| f != folder);
        self.folders.insert(0, folder.to_path_buf());
        self.folders.truncate(MAX_RECENT);
        self.save()
    }

    pub fn clear(&mut self) -> AppResult<()> {
        self.folders.clear();
        self.save()
    }

    fn save(&self) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = RecentFile {
            folders: self.folders.clone(),
        };
        atomic_write(&self.path, &serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }
}
