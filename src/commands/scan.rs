//! `rawcull scan`

use std::io::Write;
use std::path::PathBuf;

use chrono::{Local, TimeZone};
use clap::{Args, ValueEnum};
use rawcull_core::models::{FilterState, SortOrder};
use rawcull_core::services::{FolderIndex, ScanOptions};
use rawcull_core::{Catalog, CommandError, Rating};
use serde::Serialize;

use crate::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortArg {
    Name,
    CaptureTime,
}

impl From<SortArg> for SortOrder {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => SortOrder::Name,
            SortArg::CaptureTime => SortOrder::CaptureTime,
        }
    }
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// 要扫描的文件夹
    pub root: PathBuf,

    /// 只列出评分不低于该值的文件
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(i64).range(0..=5))]
    pub min_rating: i64,

    /// 排序方式（默认使用设置中的值）
    #[arg(long, value_enum)]
    pub sort: Option<SortArg>,

    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanReport<'a> {
    root: &'a std::path::Path,
    total: usize,
    entries: Vec<&'a rawcull_core::ImageEntry>,
    warnings: &'a [rawcull_core::models::ScanWarning],
}

pub fn run(ctx: &Context, args: ScanArgs, out: &mut impl Write) -> anyhow::Result<()> {
    let mut options = ScanOptions::from(&ctx.core.settings().scan);
    if let Some(sort) = args.sort {
        options.sort = sort.into();
    }
    let catalog = match FolderIndex::scan(&args.root, &options, ctx.core.store().as_ref()) {
        Ok(catalog) => catalog,
        Err(e) if args.json => {
            // JSON 模式下错误也以结构化形式输出
            let payload = CommandError::from(e);
            serde_json::to_writer_pretty(&mut *out, &payload)?;
            writeln!(out)?;
            anyhow::bail!("[{}] {}", payload.code, payload.message);
        }
        Err(e) => return Err(e.into()),
    };
    let filter = FilterState::new(Rating::new(args.min_rating)?);

    if args.json {
        write_json(&catalog, filter, out)
    } else {
        write_table(&catalog, filter, options.sort, out)
    }
}

fn write_json(catalog: &Catalog, filter: FilterState, out: &mut impl Write) -> anyhow::Result<()> {
    let report = ScanReport {
        root: catalog.root(),
        total: catalog.len(),
        entries: catalog.iter().filter(|e| filter.passes(e)).collect(),
        warnings: catalog.warnings(),
    };
    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)?;
    Ok(())
}

fn write_table(
    catalog: &Catalog,
    filter: FilterState,
    sort: SortOrder,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    for index in catalog.filtered_indices(filter.min_rating) {
        let Some(entry) = catalog.get(index) else {
            continue;
        };
        let relative = entry.path.strip_prefix(catalog.root()).unwrap_or(&entry.path);
        match sort {
            SortOrder::CaptureTime => {
                let secs = entry
                    .captured_at
                    .unwrap_or_else(|| entry.signature.modified_secs());
                writeln!(
                    out,
                    "{:>5}  {}  {}  {}",
                    index,
                    entry.rating,
                    format_time(secs),
                    relative.display()
                )?;
            }
            SortOrder::Name => {
                writeln!(out, "{:>5}  {}  {}", index, entry.rating, relative.display())?;
            }
        }
    }

    let shown = catalog.count_filtered(filter.min_rating);
    writeln!(out, "{} / {} 个文件", shown, catalog.len())?;
    for warning in catalog.warnings() {
        writeln!(out, "警告: {}: {}", warning.path.display(), warning.message)?;
    }
    Ok(())
}

fn format_time(secs: i64) -> String {
    match Local.timestamp_opt(secs, 0).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::from("-"),
    }
}

/// 供测试构造独立上下文
#[cfg(test)]
pub(crate) fn test_context(data_dir: &std::path::Path) -> Context {
    use rawcull_core::paths::DefaultPathProvider;
    use std::sync::Arc;
    Context::new(Arc::new(DefaultPathProvider::with_base_dir(data_dir.to_path_buf()))).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(root: PathBuf) -> ScanArgs {
        ScanArgs {
            root,
            min_rating: 0,
            sort: None,
            json: false,
        }
    }

    #[test]
    fn test_scan_lists_entries_and_filters() {
        let app = TempDir::new().unwrap();
        let photos = TempDir::new().unwrap();
        std::fs::write(photos.path().join("IMG_2.cr2"), b"x").unwrap();
        std::fs::write(photos.path().join("IMG_10.cr2"), b"x").unwrap();
        std::fs::write(photos.path().join("notes.txt"), b"x").unwrap();
        let ctx = test_context(app.path());

        let mut out = Vec::new();
        run(&ctx, args(photos.path().to_path_buf()), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let two = text.find("IMG_2.cr2").unwrap();
        let ten = text.find("IMG_10.cr2").unwrap();
        assert!(two < ten);
        assert!(text.contains("2 / 2"));

        let mut out = Vec::new();
        let mut filtered = args(photos.path().to_path_buf());
        filtered.min_rating = 1;
        run(&ctx, filtered, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("0 / 2"));
    }

    #[test]
    fn test_scan_json_output() {
        let app = TempDir::new().unwrap();
        let photos = TempDir::new().unwrap();
        std::fs::write(photos.path().join("a.nef"), b"x").unwrap();
        let ctx = test_context(app.path());

        let mut out = Vec::new();
        let mut json = args(photos.path().to_path_buf());
        json.json = true;
        run(&ctx, json, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(value["entries"][0]["rating"], 0);
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let app = TempDir::new().unwrap();
        let ctx = test_context(app.path());
        let mut out = Vec::new();
        assert!(run(&ctx, args(app.path().join("nope")), &mut out).is_err());

        let mut out = Vec::new();
        let mut json = args(app.path().join("nope"));
        json.json = true;
        assert!(run(&ctx, json, &mut out).is_err());
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["code"], "E_SCAN");
    }
}
