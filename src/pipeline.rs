//! The project pipeline: every task `kobo` knows about, with its
//! dependencies and stage body.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;

use crate::config::Config;
use crate::engine::{Completion, Dependencies, Engine, Options, Registry, TaskContext, TaskResult};
use crate::error::{KoboError, RegistryError};
use crate::server::DevServer;
use crate::stages::{self, clean, copy, images, rebase, styles, templates, upload};
use crate::watch::{WatchRule, Watcher};

/// Tasks run by `build`, in order.
pub const BUILD: &[&str] = &[
    "clean",
    "sass:lint",
    "sass:css",
    "js:hint",
    "pug:lint",
    "pug",
    "html:hint",
    "html",
    "html:minify",
    "copy",
    "images",
    "upload",
];

/// Tasks run by `default`, in order.
pub const DEFAULT: &[&str] = &[
    "sass:lint",
    "sass:css",
    "js:hint",
    "pug:lint",
    "pug",
    "html:hint",
    "server",
    "watch",
];

const SASS: &[&str] = &["sass/**/*.scss", "sass/**/*.sass"];
const JS: &[&str] = &["js/**/*.js"];
const PUG: &[&str] = &["templates/**/*.pug"];
const HTML: &[&str] = &["*.html", "views/**/*.html"];

/// Registry with every task of the pipeline.
pub fn registry() -> Result<Registry, RegistryError> {
    let mut r = Registry::new();

    r.register("clean", Dependencies::None, clean::run)?;

    r.register("sass:lint", Dependencies::None, |ctx| {
        stages::external(ctx, "sass:lint", &ctx.config.directory.work, SASS, |_| None)
    })?;
    r.register("sass:css", Dependencies::None, styles::run)?;

    r.register("js:hint", Dependencies::None, |ctx| {
        stages::external(ctx, "js:hint", &ctx.config.directory.work, JS, |_| None)
    })?;
    r.register("js:test", Dependencies::None, |ctx| {
        let karma = ctx.config.directory.test.join("karma.conf.js");
        stages::external_once(ctx, "js:test", Some(&karma))
    })?;

    r.register("pug:lint", Dependencies::None, |ctx| {
        stages::external(ctx, "pug:lint", &ctx.config.directory.work, PUG, |_| None)
    })?;
    r.register("jade:pug", Dependencies::None, templates::run_jade)?;
    r.register("pug", Dependencies::None, templates::run)?;

    r.register("html:hint", Dependencies::None, |ctx| {
        stages::external(ctx, "html:hint", &ctx.config.directory.work, HTML, |_| None)
    })?;
    r.register("html", Dependencies::None, |ctx| {
        let dirs = &ctx.config.directory;
        stages::external(ctx, "html", &dirs.work, HTML, |file| {
            Some(rebase(file, &dirs.work, &dirs.dist))
        })
    })?;
    r.register("html:minify", Dependencies::None, |ctx| {
        stages::external(ctx, "html:minify", &ctx.config.directory.dist, HTML, |file| {
            Some(file.to_owned())
        })
    })?;

    r.register("copy", Dependencies::None, copy::run)?;
    r.register("images", Dependencies::None, images::run)?;
    r.register("images:sprite", Dependencies::None, images::run_sprite)?;
    r.register("upload", Dependencies::None, upload::run)?;

    r.register("server", Dependencies::None, |ctx| {
        serve(ctx, &ctx.config.directory.work)
    })?;
    r.register("watch", Dependencies::None, watch)?;

    r.register("js:watch", Dependencies::parallel(["js:hint"]), reload)?;
    r.register("html:watch", Dependencies::parallel(["html:hint"]), reload)?;

    r.register("build", Dependencies::sequence(BUILD.iter().copied()), done)?;
    r.register("build:server", Dependencies::parallel(["build"]), |ctx| {
        serve(ctx, &ctx.config.directory.dist)
    })?;
    r.register("default", Dependencies::sequence(DEFAULT.iter().copied()), done)?;

    Ok(r)
}

/// Engine running the pipeline with `config` and `options`.
pub fn engine(config: Config, options: Options) -> Result<Engine, KoboError> {
    Ok(Engine::new(registry()?, Arc::new(config), options))
}

/// Rules installed by the `watch` task.
pub fn watch_rules(config: &Config) -> Vec<WatchRule> {
    let work = |patterns: &[&str]| -> Vec<String> {
        patterns
            .iter()
            .map(|pattern| config.work(pattern).to_string())
            .collect()
    };

    let mut templates = vec![config.data_file.to_string()];
    templates.extend(work(PUG));
    templates.push("bower.json".into());

    vec![
        WatchRule::new(work(SASS), ["sass:lint", "sass:css"]),
        WatchRule::new(work(JS), ["js:watch"]),
        WatchRule::new(templates, ["pug:lint", "pug"]),
        WatchRule::new(work(HTML), ["html:watch"]),
    ]
}

fn done(_: &TaskContext<'_>) -> TaskResult {
    Ok(Completion::Done)
}

fn serve(ctx: &TaskContext<'_>, root: &Utf8Path) -> TaskResult {
    let server = match DevServer::from_config(ctx.config, root) {
        Ok(server) => server,
        Err(err) => return Ok(Completion::Refused(err)),
    };

    let server = match ctx.services().reloader() {
        Ok(reloader) => server.with_live_reload(reloader.port()),
        Err(err) => {
            tracing::warn!("live reload unavailable: {err}");
            server
        }
    };

    ctx.services().spawn("server", server.start()?);
    Ok(Completion::Done)
}

fn watch(ctx: &TaskContext<'_>) -> TaskResult {
    let debounce = Duration::from_millis(ctx.config.watch.debounce_ms);
    let mut watcher = Watcher::new(ctx.engine.clone(), debounce);

    for rule in watch_rules(ctx.config) {
        watcher.watch(rule);
    }

    ctx.services().spawn("watch", watcher.start()?);
    Ok(Completion::Done)
}

fn reload(ctx: &TaskContext<'_>) -> TaskResult {
    if !ctx.services().reload() {
        tracing::debug!("live reload is not running, nothing to refresh");
    }
    Ok(Completion::Done)
}
