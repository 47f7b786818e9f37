use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use console::style;
use kobo::{Config, Notice, Options, pipeline};

#[derive(ValueEnum, Debug, Clone, Copy, Default)]
enum Optimizer {
    #[default]
    Standard,
    Advanced,
}

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
struct Args {
    /// Task to run.
    #[clap(index = 1, default_value = "default")]
    task: String,

    /// Image optimizer used by the `images` task.
    #[clap(long, value_enum, default_value = "standard")]
    option: Optimizer,

    /// Allow the `upload` task to send the distribution directory.
    #[clap(long)]
    upload: bool,

    /// Base name of the sprite sheet built by `images:sprite`.
    #[clap(long)]
    name: Option<String>,

    /// JSON configuration file.
    #[clap(long)]
    config: Option<Utf8PathBuf>,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    kobo::init_logging();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let options = Options {
        advanced: matches!(args.option, Optimizer::Advanced),
        upload: args.upload,
        sprite_name: args.name,
    };

    let engine = pipeline::engine(config, options)?;

    match engine.run(&args.task) {
        Ok(diagnostics) => {
            eprintln!("{diagnostics}");
            Notice::success(format!("Task '{}' finished.", args.task))
                .title(&args.task)
                .emit();
        }
        Err(err) => {
            Notice::error(err.to_string()).title(&args.task).emit();
            eprintln!("{} {}", style("failed:").red(), err.failed_tasks().join(", "));
            return Ok(ExitCode::FAILURE);
        }
    }

    if !engine.services().is_empty() {
        tracing::info!("listening, press Ctrl+C to stop");
        engine.services().wait()?;
    }

    Ok(ExitCode::SUCCESS)
}
