use std::fs;
use std::time::Instant;

use anyhow::Context;
use camino::Utf8Path;

use crate::engine::{Completion, TaskContext, TaskResult};
use crate::utils::as_overhead;

pub fn run(ctx: &TaskContext<'_>) -> TaskResult {
    clear_dir(&ctx.config.directory.dist)?;
    Ok(Completion::Done)
}

/// Delete the directory if it exists.
pub fn clear_dir(dir: &Utf8Path) -> anyhow::Result<()> {
    let s = Instant::now();

    if fs::metadata(dir).is_ok() {
        fs::remove_dir_all(dir).with_context(|| format!("couldn't remove {dir}"))?;
    }

    tracing::info!("cleaned the {dir} directory {}", as_overhead(s));
    Ok(())
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn removes_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let dist = Utf8PathBuf::try_from(dir.path().join("dist")).unwrap();
        fs::create_dir_all(dist.join("views/en")).unwrap();
        fs::write(dist.join("views/en/home.html"), "x").unwrap();

        clear_dir(&dist).unwrap();
        assert!(!dist.exists());
    }

    #[test]
    fn missing_directory_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let dist = Utf8PathBuf::try_from(dir.path().join("dist")).unwrap();
        clear_dir(&dist).unwrap();
    }
}
