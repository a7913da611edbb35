//! `rawcull browse`：按行读取按键命令的交互式浏览
//!
//! 命令：`n`/`p` 下一张/上一张，`0`-`5` 评分，`f N` 最低评分过滤，
//! `l` 最后一张已评分，`g N` 跳到下标，`r` 重新扫描，`q` 退出。

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Args;
use rawcull_core::services::FilterOutcome;
use rawcull_core::BrowseSession;
use thiserror::Error;

use crate::Context;

#[derive(Args, Debug)]
pub struct BrowseArgs {
    /// 要浏览的文件夹
    pub root: PathBuf,

    /// 监控文件夹变化
    #[arg(long)]
    pub watch: bool,
}

/// 一条浏览命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseCommand {
    Next,
    Previous,
    Rate(i64),
    Filter(i64),
    LastRated,
    GoTo(usize),
    Rescan,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("空命令")]
    Empty,
    #[error("未知命令: {0}")]
    Unknown(String),
    #[error("缺少参数: {0}")]
    MissingArgument(&'static str),
    #[error("无效的数字: {0}")]
    InvalidNumber(String),
}

impl std::str::FromStr for BrowseCommand {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let head = parts.next().ok_or(ParseError::Empty)?;
        let command = match head {
            "n" => BrowseCommand::Next,
            "p" => BrowseCommand::Previous,
            "l" => BrowseCommand::LastRated,
            "r" => BrowseCommand::Rescan,
            "q" => BrowseCommand::Quit,
            "f" => BrowseCommand::Filter(number(parts.next(), "f")?),
            "g" => BrowseCommand::GoTo(number(parts.next(), "g")?),
            digit if digit.len() == 1 && digit.as_bytes()[0].is_ascii_digit() => {
                BrowseCommand::Rate(i64::from(digit.as_bytes()[0] - b'0'))
            }
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        match parts.next() {
            Some(extra) => Err(ParseError::Unknown(extra.to_string())),
            None => Ok(command),
        }
    }
}

fn number<T: std::str::FromStr>(arg: Option<&str>, command: &'static str) -> Result<T, ParseError> {
    let arg = arg.ok_or(ParseError::MissingArgument(command))?;
    arg.parse().map_err(|_| ParseError::InvalidNumber(arg.to_string()))
}

pub fn run(
    ctx: &Context,
    args: BrowseArgs,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let mut session = ctx.core.open_session(&args.root)?;
    for warning in session.catalog().warnings() {
        writeln!(out, "警告: {}: {}", warning.path.display(), warning.message)?;
    }
    if args.watch {
        session.watch()?;
    }
    repl(&mut session, input, out)
}

/// 主循环；输入结束或 `q` 时返回
pub fn repl(
    session: &mut BrowseSession,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    show(session, out)?;
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(());
        }
        if session.is_watching() {
            sync_changes(session, out)?;
        }
        let command = match line.trim().parse::<BrowseCommand>() {
            Ok(command) => command,
            Err(ParseError::Empty) => continue,
            Err(e) => {
                writeln!(out, "{}", e)?;
                continue;
            }
        };
        if command == BrowseCommand::Quit {
            return Ok(());
        }
        if let Err(e) = execute(session, command, out) {
            writeln!(out, "错误: {}", e)?;
            continue;
        }
        show(session, out)?;
    }
}

fn execute(
    session: &mut BrowseSession,
    command: BrowseCommand,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        BrowseCommand::Next => {
            if session.next().is_none() {
                writeln!(out, "已经是最后一张")?;
            }
        }
        BrowseCommand::Previous => {
            if session.previous().is_none() {
                writeln!(out, "已经是第一张")?;
            }
        }
        BrowseCommand::Rate(value) => {
            let outcome = session.rate_current(value)?;
            writeln!(out, "#{} {}", outcome.index, outcome.rating)?;
        }
        BrowseCommand::Filter(min) => {
            if session.set_filter(min)? == FilterOutcome::Empty {
                writeln!(out, "没有满足条件的图片")?;
            }
        }
        BrowseCommand::LastRated => {
            if session.jump_last_rated().is_none() {
                writeln!(out, "没有已评分的图片")?;
            }
        }
        BrowseCommand::GoTo(index) => {
            session.go_to(index)?;
        }
        BrowseCommand::Rescan => {
            let summary = session.rescan()?;
            writeln!(
                out,
                "新增 {}，移除 {}，修改 {}",
                summary.added.len(),
                summary.removed.len(),
                summary.changed.len()
            )?;
        }
        BrowseCommand::Quit => {}
    }
    Ok(())
}

fn sync_changes(session: &mut BrowseSession, out: &mut impl Write) -> anyhow::Result<()> {
    let applied = session.apply_file_changes();
    if applied.needs_rescan {
        let summary = session.rescan()?;
        if !summary.is_empty() {
            writeln!(out, "文件夹已变化，重新扫描")?;
        }
    }
    Ok(())
}

fn show(session: &mut BrowseSession, out: &mut impl Write) -> anyhow::Result<()> {
    let len = session.catalog().len();
    let Some(index) = session.cursor() else {
        writeln!(out, "（文件夹中没有 RAW 文件）")?;
        return Ok(());
    };
    let dims = match session.current_preview() {
        Ok(preview) => format!("{}x{}", preview.width(), preview.height()),
        Err(e) => format!("预览不可用: {}", e),
    };
    if let Some(entry) = session.current_entry() {
        writeln!(
            out,
            "[{}/{}] {} {}  {}",
            index + 1,
            len,
            entry.rating,
            entry.file_name(),
            dims
        )?;
    }
    Ok(())
}
