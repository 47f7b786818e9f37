#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod config;
pub mod engine;
mod error;
pub mod notice;
pub mod pipeline;
pub mod server;
pub mod stages;
mod utils;
pub mod watch;

pub use crate::config::Config;
pub use crate::engine::{
    Completion, Dependencies, Diagnostics, Engine, Options, Registry, TaskContext, TaskResult,
};
pub use crate::error::*;
pub use crate::notice::Notice;
pub use crate::server::{DevServer, LocaleConfig, Reloader};
pub use crate::utils::init_logging;
pub use crate::watch::{WatchRule, Watcher};
