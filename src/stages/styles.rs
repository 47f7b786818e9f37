//! SASS compilation for `sass:css`.

use camino::{Utf8Path, Utf8PathBuf};

use crate::engine::{Completion, TaskContext, TaskResult};

/// Entry stylesheets, tried in order, relative to the work directory.
const ENTRIES: [&str; 2] = ["sass/main.scss", "sass/main.sass"];

pub fn run(ctx: &TaskContext<'_>) -> TaskResult {
    let work = &ctx.config.directory.work;

    let Some(entry) = ENTRIES.iter().map(|e| work.join(e)).find(|e| e.is_file()) else {
        tracing::warn!("no entry stylesheet found, expected one of {ENTRIES:?} in {work}");
        return Ok(Completion::Done);
    };

    compile(&entry, &output_path(work))
}

#[cfg(feature = "styles")]
fn compile(entry: &Utf8Path, out: &Utf8Path) -> TaskResult {
    use anyhow::Context;

    let css = compile_file(entry)?;

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, css).with_context(|| format!("couldn't write {out}"))?;

    tracing::info!("compiled {entry} into {out}");
    Ok(Completion::Done)
}

#[cfg(not(feature = "styles"))]
fn compile(_: &Utf8Path, _: &Utf8Path) -> TaskResult {
    Ok(Completion::Refused(crate::error::ConfigError::FeatureDisabled("styles")))
}

/// Compile a stylesheet with its imports into expanded CSS.
#[cfg(feature = "styles")]
pub fn compile_file(entry: &Utf8Path) -> anyhow::Result<String> {
    let opts = grass::Options::default().style(grass::OutputStyle::Expanded);
    Ok(grass::from_path(entry, &opts)?)
}

/// Output path of the compiled stylesheet.
pub fn output_path(work: &Utf8Path) -> Utf8PathBuf {
    work.join("css/main.css")
}
