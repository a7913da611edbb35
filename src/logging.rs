//! 日志初始化
//!
//! 控制台输出到 stderr；另外按天滚动写入日志目录下的 `rawcull.log`。

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` 有效时完全按它过滤，否则默认 info
fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// 初始化全局日志；返回的 guard 必须保留到程序退出，否则文件日志会丢失
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = env_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref());
    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, "rawcull.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().with_writer(writer).with_ansi(false);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                eprintln!("无法创建日志目录，只输出到控制台: {}", e);
                (None, None)
            }
        },
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        // 已有全局订阅者（例如测试中重复初始化）
        return None;
    }
    guard
}
