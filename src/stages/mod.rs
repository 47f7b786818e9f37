//! Stage bodies run by the pipeline tasks.
//!
//! Stages backed by a crate (styles, images, copy, clean) do the work
//! in-process. The rest delegate to an external program configured under
//! `commands.<task>`; an unconfigured command is reported as a warning and
//! the stage completes without doing anything.

pub mod clean;
pub mod copy;
pub mod images;
pub mod styles;
pub mod templates;
pub mod upload;

use std::collections::BTreeSet;
use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;

use crate::config::CommandSpec;
use crate::engine::{Completion, TaskContext, TaskResult};
use crate::notice::Notice;

/// Collect files under `root` matching `patterns`, which are relative to
/// `root`. Patterns starting with `!` exclude whatever they match, along
/// with everything below it. The result is sorted and free of duplicates.
pub fn collect_sources(root: &Utf8Path, patterns: &[&str]) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let (exclude, include): (Vec<&str>, Vec<&str>) =
        patterns.iter().copied().partition(|pattern| pattern.starts_with('!'));

    let exclude = exclude
        .iter()
        .map(|pattern| Pattern::new(&pattern[1..]))
        .collect::<Result<Vec<_>, _>>()?;

    let mut found = BTreeSet::new();

    for pattern in include {
        let full = root.join(pattern);
        for path in glob::glob(full.as_str())? {
            let path = Utf8PathBuf::try_from(path?)?;
            if !path.is_file() {
                continue;
            }

            let relative = path.strip_prefix(root).unwrap_or(&path);
            let excluded = relative
                .ancestors()
                .any(|part| exclude.iter().any(|ex| ex.matches(part.as_str())));

            if !excluded {
                found.insert(path);
            }
        }
    }

    Ok(found.into_iter().collect())
}

/// Values substituted into the arguments of an external command.
#[derive(Debug, Default)]
pub struct Invocation<'a> {
    pub file: Option<&'a Utf8Path>,
    pub files: &'a [Utf8PathBuf],
    pub out: Option<&'a Utf8Path>,
    pub locals: Option<&'a str>,
    /// Written to the program's stdin.
    pub input: Option<&'a str>,
}

impl Invocation<'_> {
    /// Expand the placeholders in `args`. An argument that is exactly
    /// `{files}` becomes one argument per file.
    pub fn expand(&self, args: &[String]) -> Vec<String> {
        let mut expanded = Vec::with_capacity(args.len());

        for arg in args {
            if arg == "{files}" {
                expanded.extend(self.files.iter().map(ToString::to_string));
                continue;
            }

            let files = self
                .files
                .iter()
                .map(|file| file.as_str())
                .collect::<Vec<_>>()
                .join(" ");

            expanded.push(
                arg.replace("{files}", &files)
                    .replace("{file}", self.file.map_or("", Utf8Path::as_str))
                    .replace("{out}", self.out.map_or("", Utf8Path::as_str))
                    .replace("{locals}", self.locals.unwrap_or_default()),
            );
        }

        expanded
    }
}

/// Whether the command has to be started once per file.
pub fn per_file(spec: &CommandSpec) -> bool {
    spec.args
        .iter()
        .any(|arg| arg.contains("{file}") || arg.contains("{out}"))
}

/// Run an external program to completion. A non-zero exit status is an
/// error carrying the program's stderr.
pub fn run_command(spec: &CommandSpec, invocation: &Invocation<'_>) -> anyhow::Result<()> {
    let args = invocation.expand(&spec.args);
    tracing::debug!(program = %spec.program, ?args, "running command");

    let stdin = match invocation.input {
        Some(_) => Stdio::piped(),
        None => Stdio::null(),
    };

    let mut child = Command::new(&spec.program)
        .args(&args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to run {} with args {args:?}", spec.program))?;

    if let (Some(input), Some(mut pipe)) = (invocation.input, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .with_context(|| format!("couldn't write to {}", spec.program))?;
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to wait for {}", spec.program))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        tracing::info!("{}", stdout.trim_end());
    }

    if !output.status.success() {
        return Err(anyhow!(
            "{} exited with {}\n{}",
            spec.program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(())
}

/// Command configured for `task`, or a warning notice when there is none.
pub(crate) fn command_for<'a>(ctx: &TaskContext<'a>, task: &str) -> Option<&'a CommandSpec> {
    let spec = ctx.config.command(task);

    if spec.is_none() {
        Notice::warning(format!(
            "No command configured for this task, skipping.\nAdd `commands.{task}` to {}.",
            ctx.config.config_file
        ))
        .title(task)
        .emit();
    }

    spec
}

/// Run the command of `task` over the files under `root` matching
/// `patterns`. Commands referring to `{file}` or `{out}` are started once per
/// file with `out` naming the file's destination; others once with every
/// file. No matching files means nothing to do.
pub(crate) fn external<F>(
    ctx: &TaskContext<'_>,
    task: &str,
    root: &Utf8Path,
    patterns: &[&str],
    out: F,
) -> TaskResult
where
    F: Fn(&Utf8Path) -> Option<Utf8PathBuf>,
{
    let Some(spec) = command_for(ctx, task) else {
        return Ok(Completion::Done);
    };

    let files = collect_sources(root, patterns)?;
    if files.is_empty() {
        tracing::info!("no files matching {patterns:?} under {root}");
        return Ok(Completion::Done);
    }

    if !per_file(spec) {
        run_command(
            spec,
            &Invocation {
                files: &files,
                ..Invocation::default()
            },
        )?;
        return Ok(Completion::Done);
    }

    for file in &files {
        let dest = out(file);
        if let Some(parent) = dest.as_deref().and_then(Utf8Path::parent) {
            std::fs::create_dir_all(parent)?;
        }

        run_command(
            spec,
            &Invocation {
                file: Some(file),
                files: &files,
                out: dest.as_deref(),
                ..Invocation::default()
            },
        )
        .with_context(|| format!("while processing {file}"))?;
    }

    Ok(Completion::Done)
}

/// Run the command of `task` once, without any input files.
pub(crate) fn external_once(ctx: &TaskContext<'_>, task: &str, file: Option<&Utf8Path>) -> TaskResult {
    if let Some(spec) = command_for(ctx, task) {
        run_command(
            spec,
            &Invocation {
                file,
                ..Invocation::default()
            },
        )?;
    }

    Ok(Completion::Done)
}

/// Map `path` from under `from` to the same relative place under `to`.
pub fn rebase(path: &Utf8Path, from: &Utf8Path, to: &Utf8Path) -> Utf8PathBuf {
    to.join(path.strip_prefix(from).unwrap_or(path))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn tree(files: &[&str]) -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        for file in files {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, file).unwrap();
        }

        (dir, root)
    }

    fn relative(root: &Utf8Path, files: Vec<Utf8PathBuf>) -> Vec<String> {
        files
            .iter()
            .map(|f| f.strip_prefix(root).unwrap().to_string())
            .collect()
    }

    #[test]
    fn collects_sorted_unique_files() {
        let (_dir, root) = tree(&["js/b.js", "js/a.js", "js/lib/c.js", "js/readme.md"]);

        let files = collect_sources(&root, &["js/**/*.js", "js/*.js"]).unwrap();
        assert_eq!(relative(&root, files), ["js/a.js", "js/b.js", "js/lib/c.js"]);
    }

    #[test]
    fn exclusions_cover_whole_directories() {
        let (_dir, root) = tree(&[
            "images/logo.png",
            "images/sprites_sources/a.png",
            "images/sprites_sources/deep/b.png",
        ]);

        let files = collect_sources(&root, &["images/**/*", "!images/sprites_sources"]).unwrap();
        assert_eq!(relative(&root, files), ["images/logo.png"]);
    }

    #[test]
    fn expands_placeholders() {
        let files = vec![Utf8PathBuf::from("a.js"), Utf8PathBuf::from("b.js")];
        let invocation = Invocation {
            file: Some(Utf8Path::new("a.js")),
            files: &files,
            out: Some(Utf8Path::new("dist/a.js")),
            locals: Some("{}"),
            input: None,
        };

        let args = ["--in={file}", "{files}", "-o", "{out}", "-O", "{locals}", "all={files}"]
            .map(String::from);

        assert_eq!(
            invocation.expand(&args),
            ["--in=a.js", "a.js", "b.js", "-o", "dist/a.js", "-O", "{}", "all=a.js b.js"]
        );
    }

    #[test]
    fn per_file_depends_on_placeholders() {
        let once = CommandSpec {
            program: "jshint".into(),
            args: vec!["{files}".into()],
        };
        let each = CommandSpec {
            program: "htmlmin".into(),
            args: vec!["{file}".into(), "-o".into(), "{out}".into()],
        };

        assert!(!per_file(&once));
        assert!(per_file(&each));
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_stderr() {
        let spec = CommandSpec {
            program: "sh".into(),
            args: vec!["-c".into(), "echo broken >&2; exit 3".into()],
        };

        let err = run_command(&spec, &Invocation::default()).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[cfg(unix)]
    #[test]
    fn input_is_fed_through_stdin() {
        let spec = CommandSpec {
            program: "sh".into(),
            args: vec!["-c".into(), "read line; test \"$line\" = secret".into()],
        };
        let invocation = Invocation {
            input: Some("secret\n"),
            ..Invocation::default()
        };

        run_command(&spec, &invocation).unwrap();
        assert!(run_command(&spec, &Invocation::default()).is_err());
    }

    #[test]
    fn rebase_keeps_relative_layout() {
        let path = rebase(
            Utf8Path::new("src/views/en/home.html"),
            Utf8Path::new("src"),
            Utf8Path::new("dist"),
        );
        assert_eq!(path, "dist/views/en/home.html");
    }
}
