use std::fmt::Display;
use std::time::Instant;

use console::Style;
use indicatif::{ProgressStyle, style::TemplateError};

const ANSI_BLUE: Style = Style::new().blue();

/// Install the global subscriber: env filter (default `info`), fmt output
/// routed through the progress bars, and the indicatif layer. Calling it
/// more than once is harmless.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        use tracing_indicatif::IndicatifLayer;
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        use tracing_subscriber::{EnvFilter, fmt};

        let indicatif = IndicatifLayer::new();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(indicatif.get_stderr_writer()),
            )
            .with(indicatif)
            .try_init();
    }
}

/// Style of the progress bar attached to a whole run.
pub(crate) fn get_style_run() -> Result<ProgressStyle, TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
        .progress_chars("=>-"))
}

/// Style of the spinner attached to a single task.
pub(crate) fn get_style_task() -> Result<ProgressStyle, TemplateError> {
    ProgressStyle::default_spinner().template("{spinner:.blue} {msg}")
}

pub fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_templates_are_valid() {
        assert!(get_style_run().is_ok());
        assert!(get_style_task().is_ok());
    }

    #[test]
    fn logging_can_be_installed_twice() {
        init_logging();
        init_logging();
    }
}
