//! FTP upload of the distribution directory, through `curl`.
//!
//! Credentials never appear on the command line: they are handed to curl as
//! a config read from stdin (`--config -`).

use anyhow::Context;
use camino::Utf8Path;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::config::{CommandSpec, FtpCredentials};
use crate::engine::{Completion, TaskContext, TaskResult};
use crate::error::ConfigError;
use crate::stages::{Invocation, collect_sources, run_command};

const DEFAULT_PROGRAM: &str = "curl";

pub fn run(ctx: &TaskContext<'_>) -> TaskResult {
    let credentials = match ctx.config.ftp_credentials() {
        Ok(credentials) => credentials,
        Err(err) => return Ok(Completion::Refused(err)),
    };

    if !ctx.options.upload {
        return Ok(Completion::Refused(ConfigError::UploadDisabled));
    }

    let program = ctx
        .config
        .command("upload")
        .map_or(DEFAULT_PROGRAM, |spec| spec.program.as_str());

    let dist = &ctx.config.directory.dist;
    let files = collect_sources(dist, &["**/*"])?;
    let config = curl_config(&credentials);

    files
        .par_iter()
        .map(|file| {
            let relative = file.strip_prefix(dist).unwrap_or(file);
            let spec = upload_command(program, &credentials, file, relative);
            let invocation = Invocation {
                input: Some(&config),
                ..Invocation::default()
            };
            run_command(&spec, &invocation)
                .with_context(|| format!("couldn't upload {relative}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    tracing::info!(
        "uploaded {} files to {}{}",
        files.len(),
        credentials.host,
        credentials.destination
    );

    Ok(Completion::Done)
}

fn upload_command(
    program: &str,
    credentials: &FtpCredentials,
    file: &Utf8Path,
    relative: &Utf8Path,
) -> CommandSpec {
    CommandSpec {
        program: program.into(),
        args: vec![
            "--silent".into(),
            "--show-error".into(),
            "--ftp-create-dirs".into(),
            "--config".into(),
            "-".into(),
            "--upload-file".into(),
            file.to_string(),
            remote_url(&credentials.host, &credentials.destination, relative),
        ],
    }
}

/// curl config carrying the login, as read by `--config`.
fn curl_config(credentials: &FtpCredentials) -> String {
    let user = format!("{}:{}", credentials.user, credentials.password)
        .replace('\\', "\\\\")
        .replace('"', "\\\"");
    format!("user = \"{user}\"\n")
}

/// FTP URL of `relative` under `destination` on `host`.
pub fn remote_url(host: &str, destination: &str, relative: &Utf8Path) -> String {
    let host = host.trim_start_matches("ftp://").trim_end_matches('/');
    let destination = destination.trim_matches('/');

    if destination.is_empty() {
        format!("ftp://{host}/{relative}")
    } else {
        format!("ftp://{host}/{destination}/{relative}")
    }
}
