//! 工具模块

pub mod dedup;
pub mod error;
pub mod fsutil;

pub use dedup::Dedup;
pub use error::{AppError, AppResult, CommandError, ExtractError};
pub use fsutil::atomic_write;
