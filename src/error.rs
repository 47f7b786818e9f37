use std::net::SocketAddr;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Umbrella error for everything the library can report to the binary.
#[derive(Debug, Error)]
pub enum KoboError {
    #[error("Configuration error:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Couldn't register task:\n{0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Error while starting the server:\n{0}")]
    Server(#[from] ServerError),
}

/// A required setting is missing or invalid. Tasks report these as a
/// refusal: they perform no work and the run carries on.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No languages configured. Remember to set up your languages in {0}.")]
    NoLocales(String),

    #[error("Remember to set up your FTP config ({}) in {file}.", .missing.join(", "))]
    MissingFtp {
        file: String,
        missing: Vec<&'static str>,
    },

    #[error("Uploading is disabled. Pass --upload to send the distribution directory.")]
    UploadDisabled,

    #[error("Remember to set up your TINIFY API key in {0}.")]
    MissingApiKey(String),

    #[error("This build of kobo was compiled without the '{0}' feature.")]
    FeatureDisabled(&'static str),

    #[error("Couldn't read configuration file '{path}'.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse configuration file '{path}'.\n{source}")]
    Parse {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Task '{0}' is already registered")]
    Duplicate(String),

    #[error("Task '{task}' would create a dependency cycle through '{dependency}'")]
    Cycle { task: String, dependency: String },
}

/// A stage's action reported failure, or panicked.
#[derive(Debug, Error)]
#[error("Task '{task}' failed:\n{reason:#}")]
pub struct TaskFailure {
    pub task: String,
    pub reason: anyhow::Error,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error(transparent)]
    Task(#[from] TaskFailure),

    #[error("{} task(s) in a parallel group failed:\n{}", .0.len(), display_all(.0))]
    Parallel(Vec<RunError>),
}

impl RunError {
    /// Names of every task that failed, in the order they were reported.
    pub fn failed_tasks(&self) -> Vec<&str> {
        match self {
            RunError::UnknownTask(name) => vec![name.as_str()],
            RunError::Task(failure) => vec![failure.task.as_str()],
            RunError::Parallel(errors) => errors.iter().flat_map(RunError::failed_tasks).collect(),
        }
    }
}

fn display_all(errors: &[RunError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Couldn't bind to {addr}.\n{source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Failed to build runtime")]
    Runtime(#[source] std::io::Error),
}

/// Errors raised while answering a single HTTP request. They are always
/// turned into a JSON response by the central handler.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Document '{path}' not found")]
    NotFound {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't read '{path}': {source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't serve '{uri}': {source}")]
    Static {
        uri: String,
        source: std::io::Error,
    },
}

impl RequestError {
    /// Status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RequestError::NotFound { .. } => Some(404),
            RequestError::Read { .. } | RequestError::Static { .. } => None,
        }
    }
}
