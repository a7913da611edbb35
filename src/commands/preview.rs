//! `rawcull preview`

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use image::imageops::FilterType;

use crate::Context;

#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// RAW 文件
    pub file: PathBuf,

    /// 输出图片路径，格式由扩展名决定
    #[arg(short, long)]
    pub out: PathBuf,

    /// 缩小到该最长边
    #[arg(long, value_name = "EDGE")]
    pub thumbnail: Option<u32>,
}

pub fn run(ctx: &Context, args: PreviewArgs, out: &mut impl Write) -> anyhow::Result<()> {
    let preview = ctx.core.extractor().extract(&args.file)?;
    let mut image = preview.to_dynamic();
    if let Some(edge) = args.thumbnail.filter(|e| *e > 0) {
        image = image.resize(edge, edge, FilterType::Triangle);
    }
    image
        .save(&args.out)
        .with_context(|| format!("保存失败: {}", args.out.display()))?;

    writeln!(
        out,
        "{}x{} ({}) -> {}",
        image.width(),
        image.height(),
        preview.decoder(),
        args.out.display()
    )?;
    Ok(())
}
