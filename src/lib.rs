//! RawCull - RAW 照片快速筛选与评分工具
//!
//! 命令行前端：解析参数、初始化日志，把子命令交给 `rawcull-core`。

pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rawcull_core::paths::{DefaultPathProvider, PathProvider, SharedPathProvider};
use rawcull_core::{LoggingEventSink, RawcullCore};

use commands::{browse, preview, rate, recent, scan, settings};

/// RawCull - 在 RAW 文件夹中快速浏览、评分和筛选
#[derive(Parser, Debug)]
#[command(name = "rawcull", version, about, long_about = None)]
pub struct Cli {
    /// 应用数据目录（默认 <data_dir>/RawCull）
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// 不写日志文件
    #[arg(long, global = true)]
    pub no_log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 列出文件夹中的 RAW 文件、评分和扫描警告
    Scan(scan::ScanArgs),
    /// 写入一个文件的评分
    Rate(rate::RateArgs),
    /// 提取嵌入预览并保存为图片
    Preview(preview::PreviewArgs),
    /// 交互式浏览（从标准输入读取按键命令）
    Browse(browse::BrowseArgs),
    /// 最近打开的文件夹
    Recent,
    /// 查看或重置设置
    Settings(settings::SettingsArgs),
}

fn path_provider(data_dir: Option<&PathBuf>) -> DefaultPathProvider {
    match data_dir {
        Some(dir) => DefaultPathProvider::with_base_dir(dir.clone()),
        None => DefaultPathProvider::new(),
    }
}

/// 命令执行所需的共享上下文
pub struct Context {
    pub core: RawcullCore,
}

impl Context {
    pub fn new(paths: SharedPathProvider) -> anyhow::Result<Self> {
        let core = RawcullCore::new(paths, Arc::new(LoggingEventSink))?;
        Ok(Self { core })
    }
}

impl Cli {
    pub fn execute(self, ctx: &Context) -> anyhow::Result<()> {
        let stdout = std::io::stdout();
        match self.command {
            Command::Scan(args) => scan::run(ctx, args, &mut stdout.lock()),
            Command::Rate(args) => rate::run(ctx, args, &mut stdout.lock()),
            Command::Preview(args) => preview::run(ctx, args, &mut stdout.lock()),
            Command::Browse(args) => {
                browse::run(ctx, args, &mut std::io::stdin().lock(), &mut stdout.lock())
            }
            Command::Recent => recent::run(ctx, &mut stdout.lock()),
            Command::Settings(args) => settings::run(ctx, args, &mut stdout.lock()),
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let paths = path_provider(cli.data_dir.as_ref());
    let log_dir = (!cli.no_log_file).then(|| paths.logs_dir());
    let _guard = logging::init(log_dir.as_deref());

    tracing::debug!("RawCull 启动: {:?}", cli.command);

    let result = Context::new(Arc::new(paths)).and_then(|ctx| cli.execute(&ctx));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("错误: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
