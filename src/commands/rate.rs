//! `rawcull rate`

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use rawcull_core::Rating;

use crate::Context;

#[derive(Args, Debug)]
pub struct RateArgs {
    /// RAW 文件
    pub file: PathBuf,

    /// 评分 0-5
    #[arg(allow_negative_numbers = true)]
    pub rating: i64,
}

pub fn run(ctx: &Context, args: RateArgs, out: &mut impl Write) -> anyhow::Result<()> {
    let rating = Rating::new(args.rating)?;
    anyhow::ensure!(args.file.is_file(), "文件不存在: {}", args.file.display());

    let store = ctx.core.store();
    store
        .write(&args.file, rating)
        .with_context(|| format!("写入评分失败: {}", args.file.display()))?;
    writeln!(out, "{}  {}", rating, store.sidecar_path(&args.file).display())?;
    Ok(())
}
