//! 文件系统监控服务
//!
//! 使用 notify 监控根目录，把 RAW 和 sidecar 文件的变化送入通道，
//! 由浏览会话在前台统一处理。

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Result as NotifyResult, Watcher};
use serde::{Deserialize, Serialize};

use super::scanner::{is_raw_file, is_sidecar_file};
use crate::utils::error::{AppError, AppResult};

/// 文件变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileChangeType {
    Created,
    Modified,
    Removed,
}

/// 文件变更事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeEvent {
    pub path: PathBuf,
    pub change_type: FileChangeType,
}

/// 根目录监控器，析构时停止监控
pub struct FolderWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl FolderWatcher {
    /// 开始递归监控 `root`，返回监控器和事件接收端
    pub fn start(root: &Path) -> AppResult<(Self, Receiver<FileChangeEvent>)> {
        let (tx, rx) = mpsc::channel();
        let watcher = Self::start_with_sender(root, tx)?;
        Ok((watcher, rx))
    }

    pub fn start_with_sender(root: &Path, tx: Sender<FileChangeEvent>) -> AppResult<Self> {
        if !root.is_dir() {
            return Err(AppError::InvalidPath(format!(
                "监控路径不存在: {}",
                root.display()
            )));
        }

        let mut watcher = notify::recommended_watcher(move |res: NotifyResult<Event>| match res {
            Ok(event) => {
                for change in process_event(event) {
                    // 接收端关闭说明会话已结束
                    let _ = tx.send(change);
                }
            }
            Err(e) => tracing::warn!("文件监控错误: {}", e),
        })
        .map_err(|e| AppError::Watch(e.to_string()))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| AppError::Watch(e.to_string()))?;

        tracing::info!("开始监控路径: {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        tracing::info!("停止监控路径: {}", self.root.display());
    }
}

fn is_relevant(path: &Path) -> bool {
    is_raw_file(path) || is_sidecar_file(path)
}

/// 把 notify 事件转换为变更事件
///
/// 重命名拆成旧路径删除 + 新路径创建；sidecar 常被其他工具以“写临时文件再改名”的方式保存。
fn process_event(event: Event) -> Vec<FileChangeEvent> {
    let change = |path: &PathBuf, change_type| FileChangeEvent {
        path: path.clone(),
        change_type,
    };

    let mut changes = Vec::new();
    match event.kind {
        EventKind::Modify(ModifyKind::Name(_)) if event.paths.len() >= 2 => {
            changes.push(change(&event.paths[0], FileChangeType::Removed));
            changes.push(change(&event.paths[1], FileChangeType::Created));
        }
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => {
            changes.extend(event.paths.iter().map(|p| change(p, FileChangeType::Created)));
        }
        EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Name(_))
        | EventKind::Modify(ModifyKind::Metadata(_))
        | EventKind::Modify(ModifyKind::Other) => {
            changes.extend(event.paths.iter().map(|p| change(p, FileChangeType::Modified)));
        }
        EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => {
            changes.extend(event.paths.iter().map(|p| change(p, FileChangeType::Removed)));
        }
        _ => {}
    }
    changes.retain(|c| is_relevant(&c.path));
    changes
}
