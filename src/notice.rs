//! Titled console notices.
//!
//! Refusals and failures are reported to the user as a framed block with a
//! title and a colour chosen by the level, in addition to the regular
//! `tracing` events.

use console::{Style, style};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Normal,
    Success,
    Info,
    Warning,
    Error,
}

impl Level {
    fn name(self) -> &'static str {
        match self {
            Level::Normal => "normal",
            Level::Success => "success",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }

    fn style(self) -> Style {
        match self {
            Level::Normal => Style::new().white(),
            Level::Success => Style::new().green(),
            Level::Info => Style::new().blue(),
            Level::Warning => Style::new().yellow(),
            Level::Error => Style::new().red(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notice {
    level: Level,
    title: Option<String>,
    message: String,
}

impl Notice {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            title: None,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Level::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Level::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::Error, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Level::Success, message)
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Plain text rendering, without colours.
    pub fn render(&self) -> String {
        let title = self
            .title
            .as_deref()
            .unwrap_or(self.level.name())
            .to_uppercase();

        format!(
            "**~~~~~~~~* {title} LOG - OPEN *~~~~~~~~~**\n{}\n**~~~~~~~~* {title} LOG - CLOSE *~~~~~~~~**",
            self.message
        )
    }

    /// Print the notice to stderr and mirror it as a tracing event.
    pub fn emit(&self) {
        let text = self.level.style().apply_to(self.render());
        tracing_indicatif::suspend_tracing_indicatif(|| eprintln!("{text}"));

        let title = self.title.as_deref().unwrap_or(self.level.name());
        tracing::debug!(level = self.level.name(), title, "{}", self.message);
    }
}

/// Short styled banner printed when a task starts, e.g. `SASS:CSS TASK RUNNING...`.
pub fn banner(task: &str) -> String {
    style(format!("{} TASK RUNNING...", task.to_uppercase()))
        .cyan()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_defaults_to_level_name() {
        let text = Notice::warning("careful").render();
        assert!(text.starts_with("**~~~~~~~~* WARNING LOG - OPEN"));
        assert!(text.contains("\ncareful\n"));
        assert!(text.ends_with("WARNING LOG - CLOSE *~~~~~~~~**"));
    }

    #[test]
    fn explicit_title_is_uppercased() {
        let text = Notice::error("boom").title("sass:css").render();
        assert!(text.contains("SASS:CSS LOG - OPEN"));
        assert!(text.contains("SASS:CSS LOG - CLOSE"));
    }

    #[test]
    fn banner_names_task() {
        assert!(banner("pug:lint").contains("PUG:LINT TASK RUNNING..."));
    }
}
