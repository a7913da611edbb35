//! `rawcull settings`

use std::io::Write;

use clap::Args;
use rawcull_core::SettingsManager;

use crate::Context;

#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// 恢复默认设置
    #[arg(long)]
    pub reset: bool,
}

pub fn run(ctx: &Context, args: SettingsArgs, out: &mut impl Write) -> anyhow::Result<()> {
    let manager = SettingsManager::new(ctx.core.path_provider.as_ref())?;
    let settings = if args.reset {
        manager.reset()?
    } else {
        ctx.core.settings().clone()
    };
    writeln!(out, "# {}", manager.path().display())?;
    serde_json::to_writer_pretty(&mut *out, &settings)?;
    writeln!(out)?;
    Ok(())
}
