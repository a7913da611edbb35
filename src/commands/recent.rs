//! `rawcull recent`

use std::io::Write;

use crate::Context;

pub fn run(ctx: &Context, out: &mut impl Write) -> anyhow::Result<()> {
    let recent = ctx.core.recent_folders()?;
    if recent.folders().is_empty() {
        writeln!(out, "（无）")?;
    }
    for folder in recent.folders() {
        writeln!(out, "{}", folder.display())?;
    }
    Ok(())
}
