//! File watcher.
//!
//! A [`Watcher`] holds a list of [`WatchRule`]s, each mapping a set of glob
//! patterns to a sequence of tasks. Filesystem events are debounced with
//! `notify-debouncer-full` and every rule matching a changed path re-runs its
//! sequence through the [`Engine`], independently of the other rules.
//!
//! ## Coalescing
//!
//! A rule never has more than one run in flight. An event arriving while the
//! rule is running only marks it dirty; when the run finishes, a dirty rule
//! runs exactly once more. A burst of edits therefore costs at most one
//! follow-up run instead of one run per event.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::new_debouncer;

use crate::engine::Engine;
use crate::error::WatchError;
use crate::notice::Notice;

/// Glob patterns and the tasks re-run when a matching file changes.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub patterns: Vec<String>,
    pub tasks: Vec<String>,
}

impl WatchRule {
    pub fn new<P, T>(patterns: P, tasks: T) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            tasks: tasks.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Default)]
struct RuleState {
    running: bool,
    pending: bool,
    runs: usize,
}

struct ActiveRule {
    rule: WatchRule,
    roots: Vec<WatchRoot>,
    filters: Vec<Pattern>,
    state: Mutex<RuleState>,
    idle: Condvar,
}

impl ActiveRule {
    fn matches(&self, path: &Path) -> bool {
        self.filters.iter().any(|filter| filter.matches_path(path))
    }

    fn lock(&self) -> MutexGuard<'_, RuleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_once(&self, engine: &Engine) {
        tracing::info!(tasks = ?self.rule.tasks, "change detected, re-running tasks...");

        match engine.run_sequence(self.rule.tasks.as_slice()) {
            Ok(_) => tracing::info!("rebuild complete, watching for changes..."),
            Err(err) => Notice::error(err.to_string()).title("watch").emit(),
        }
    }
}

/// Background listener mapping file changes to task re-runs.
pub struct Watcher {
    engine: Engine,
    debounce: Duration,
    rules: Vec<Arc<ActiveRule>>,
}

impl Watcher {
    pub fn new(engine: Engine, debounce: Duration) -> Self {
        Self {
            engine,
            debounce,
            rules: Vec::new(),
        }
    }

    /// Register a rule. Invalid patterns are skipped with a warning.
    pub fn watch(&mut self, rule: WatchRule) {
        let mut roots = Vec::new();
        let mut filters = Vec::new();

        for pattern in &rule.patterns {
            match resolve_watch_path(pattern) {
                Ok((root, filter)) => {
                    roots.push(root);
                    filters.push(filter);
                }
                Err(err) => tracing::warn!("not watching {pattern}: {err}"),
            }
        }

        self.rules.push(Arc::new(ActiveRule {
            rule,
            roots,
            filters,
            state: Mutex::default(),
            idle: Condvar::new(),
        }));
    }

    pub fn rules(&self) -> impl Iterator<Item = &WatchRule> {
        self.rules.iter().map(|active| &active.rule)
    }

    /// Trigger every rule matching at least one of `paths`. Returns the
    /// number of rules triggered.
    pub fn dispatch<P: AsRef<Path>>(&self, paths: &[P]) -> usize {
        let mut triggered = 0;

        for rule in &self.rules {
            if paths.iter().any(|path| rule.matches(path.as_ref())) {
                self.trigger(rule);
                triggered += 1;
            }
        }

        triggered
    }

    fn trigger(&self, rule: &Arc<ActiveRule>) {
        {
            let mut state = rule.lock();
            if state.running {
                state.pending = true;
                return;
            }
            state.running = true;
        }

        let engine = self.engine.clone();
        let rule = rule.clone();

        thread::spawn(move || {
            loop {
                rule.run_once(&engine);

                let mut state = rule.lock();
                state.runs += 1;

                if state.pending {
                    state.pending = false;
                    continue;
                }

                state.running = false;
                rule.idle.notify_all();
                break;
            }
        });
    }

    /// Block until no rule has a run in flight.
    pub fn wait_idle(&self) {
        for rule in &self.rules {
            let mut state = rule.lock();
            while state.running {
                state = rule
                    .idle
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    /// Number of completed runs per rule, in registration order.
    pub fn runs(&self) -> Vec<usize> {
        self.rules.iter().map(|rule| rule.lock().runs).collect()
    }

    /// Start listening on a background thread for the rest of the process.
    pub fn start(self) -> Result<JoinHandle<anyhow::Result<()>>, WatchError> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(self.debounce, None, tx)?;

        let watched: HashSet<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.roots.iter().cloned())
            .collect();

        for root in collapse_watch_paths(watched) {
            tracing::info!(recursive = root.recursive, "watching {}", root.path);
            debouncer.watch(root.path.as_std_path(), root.mode())?;
        }

        let handle = thread::spawn(move || {
            // Keep the debouncer alive for as long as the loop runs.
            let _debouncer = debouncer;

            for result in rx {
                match result {
                    Ok(events) => {
                        let paths: Vec<PathBuf> = events
                            .into_iter()
                            .filter(|de| !matches!(de.event.kind, EventKind::Access(_)))
                            .flat_map(|de| de.event.paths.clone())
                            .collect();

                        if !paths.is_empty() {
                            tracing::debug!(?paths, "events received");
                            self.dispatch(&paths);
                        }
                    }
                    Err(errors) => {
                        for err in errors {
                            tracing::error!("watch error: {err:?}");
                        }
                    }
                }
            }

            Ok(())
        });

        Ok(handle)
    }
}

/// A directory handed to the notify watcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchRoot {
    pub path: Utf8PathBuf,
    pub recursive: bool,
}

impl WatchRoot {
    fn recursive(path: Utf8PathBuf) -> Self {
        Self {
            path,
            recursive: true,
        }
    }

    fn flat(path: Utf8PathBuf) -> Self {
        Self {
            path,
            recursive: false,
        }
    }

    fn mode(&self) -> RecursiveMode {
        if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }
}

/// Splits a glob string into the directory to watch and a compiled absolute
/// Pattern (for matching).
///
/// Concrete files are watched through their parent directory, without
/// recursion. When the static part of the pattern doesn't exist yet, its
/// nearest existing ancestor is watched instead, so that the files are
/// picked up once they appear.
pub fn resolve_watch_path(glob_str: impl AsRef<str>) -> Result<(WatchRoot, Pattern), WatchError> {
    let path = Utf8Path::new(glob_str.as_ref());

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();
    let concrete = suffix_part.as_str().is_empty();

    let (existing, missing) = split_existing(&root_part)?;
    let target = existing.join(&missing);

    let root = match missing.components().count() {
        0 if concrete && existing.is_file() => {
            WatchRoot::flat(existing.parent().unwrap_or(&existing).to_path_buf())
        }
        1 if concrete => WatchRoot::flat(existing),
        _ => WatchRoot::recursive(existing),
    };

    if !missing.as_str().is_empty() {
        tracing::debug!(%target, root = %root.path, "not created yet, watching ancestor");
    }

    let pattern = if concrete {
        target
    } else {
        target.join(&suffix_part)
    };

    Ok((root, Pattern::new(pattern.as_str())?))
}

/// Canonical nearest existing ancestor of `path`, and the part of `path`
/// below it that doesn't exist yet.
fn split_existing(path: &Utf8Path) -> Result<(Utf8PathBuf, Utf8PathBuf), WatchError> {
    for ancestor in path.ancestors() {
        let probe = if ancestor.as_str().is_empty() {
            Utf8Path::new(".")
        } else {
            ancestor
        };

        if probe.exists() {
            let missing = path.strip_prefix(ancestor).unwrap_or(path);
            return Ok((probe.canonicalize_utf8()?, missing.to_path_buf()));
        }
    }

    Ok((path.canonicalize_utf8()?, Utf8PathBuf::new()))
}

/// Reduces a set of roots to the minimal set to hand to the watcher.
///
/// If we watch `/a` recursively, `/a/b` is already covered whether it is
/// recursive or not. A flat root only covers itself.
fn collapse_watch_paths(roots: HashSet<WatchRoot>) -> Vec<WatchRoot> {
    let mut roots: Vec<_> = roots.into_iter().collect();
    roots.sort();

    let recursive: Vec<Utf8PathBuf> = roots
        .iter()
        .filter(|root| root.recursive)
        .map(|root| root.path.clone())
        .collect();

    roots
        .into_iter()
        .filter(|root| {
            !recursive.iter().any(|path| {
                root.path.starts_with(path) && !(root.recursive && root.path == *path)
            })
        })
        .collect()
}
