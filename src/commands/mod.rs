//! 子命令实现
//!
//! 每个子命令写入调用方提供的 `Write`，方便测试。

pub mod browse;
pub mod preview;
pub mod rate;
pub mod recent;
pub mod scan;
pub mod settings;
