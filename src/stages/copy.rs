use std::fs;
use std::time::Instant;

use anyhow::Context;
use camino::Utf8Path;
use indicatif::ProgressBar;

use crate::engine::{Completion, TaskContext, TaskResult};
use crate::stages::{collect_sources, rebase};
use crate::utils::as_overhead;

/// Static assets shipped as-is, relative to the work directory.
pub const PATTERNS: &[&str] = &[
    "files/**/*",
    "fonts/**/*",
    "images/**/*",
    "!images/sprites_sources",
    "*.png",
    "*.xml",
    "*.ico",
];

pub fn run(ctx: &TaskContext<'_>) -> TaskResult {
    let copied = copy_assets(&ctx.config.directory.work, &ctx.config.directory.dist)?;
    tracing::debug!(copied, "static assets copied");
    Ok(Completion::Done)
}

/// Copy the static assets from `work` to `dist`, keeping their relative
/// paths. Returns the number of files copied.
pub fn copy_assets(work: &Utf8Path, dist: &Utf8Path) -> anyhow::Result<usize> {
    let s = Instant::now();
    let files = collect_sources(work, PATTERNS)?;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_message("Copying static files...");
    if let Ok(style) = crate::utils::get_style_run() {
        pb.set_style(style);
    }

    for file in &files {
        let target = rebase(file, work, dist);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(file, &target).with_context(|| format!("couldn't copy {file} to {target}"))?;
        pb.inc(1);
    }

    pb.finish_and_clear();
    tracing::info!("copied {} static files {}", files.len(), as_overhead(s));

    Ok(files.len())
}
