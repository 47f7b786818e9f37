//! Template rendering for `pug`, and the `jade:pug` migration of legacy
//! `.jade` templates.
//!
//! Every page template is rendered once, in the locale it belongs to. The
//! locale comes from the template's `views/<lang>/` directory or from the
//! last two characters of its file stem (`index-en.pug`), falling back to
//! the default locale. The renderer receives the locals as a JSON string.

use anyhow::Context;
use camino::Utf8Path;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::engine::{Completion, TaskContext, TaskResult};
use crate::error::ConfigError;
use crate::stages::{Invocation, collect_sources, command_for, run_command};

/// Page templates, relative to `<work>/templates`.
pub const PATTERNS: &[&str] = &["*.pug", "views/**/*.pug"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Locals<'a> {
    pub app_name: &'a str,
    pub languages: &'a [String],
    pub base_url: &'a str,
    pub host: &'a str,
    pub google_analytics: GoogleAnalytics<'a>,
    pub facebook_apps: FacebookApps<'a>,
    pub data: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleAnalytics<'a> {
    pub tracking_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookApps<'a> {
    pub app_id: &'a str,
}

pub fn run(ctx: &TaskContext<'_>) -> TaskResult {
    let config = ctx.config;

    if config.languages.is_empty() {
        return Ok(Completion::Refused(ConfigError::NoLocales(
            config.config_file.clone(),
        )));
    }

    let Some(spec) = command_for(ctx, "pug") else {
        return Ok(Completion::Done);
    };

    let data = load_data(&config.data_file)?;
    let base = config.work("templates");
    let templates = collect_sources(&base, PATTERNS)?;

    for template in &templates {
        let relative = template.strip_prefix(&base).unwrap_or(template);
        let locale = template_locale(relative, &config.languages);
        let locals = serde_json::to_string(&template_locals(config, locale, &data))?;
        let out = config.work(relative.with_extension("html"));

        tracing::debug!(%template, locale, %out, "rendering template");

        run_command(
            spec,
            &Invocation {
                file: Some(template),
                files: &templates,
                out: Some(&out),
                locals: Some(&locals),
                input: None,
            },
        )
        .with_context(|| format!("while rendering {template}"))?;
    }

    tracing::info!("rendered {} templates", templates.len());
    Ok(Completion::Done)
}

/// Locale of a template, given its path relative to the templates
/// directory. `supported` must not be empty.
pub fn template_locale<'a>(relative: &Utf8Path, supported: &'a [String]) -> &'a str {
    let components: Vec<&str> = relative.iter().collect();

    let candidate = match components.iter().position(|c| *c == "views") {
        Some(at) => components.get(at + 1).copied(),
        None => relative.file_stem().and_then(|stem| {
            let split = stem.char_indices().rev().nth(1)?.0;
            Some(&stem[split..])
        }),
    };

    supported
        .iter()
        .find(|code| Some(code.as_str()) == candidate)
        .unwrap_or(&supported[0])
}

/// Locals handed to the renderer for a template in `locale`.
pub fn template_locals<'a>(config: &'a Config, locale: &str, data: &Value) -> Locals<'a> {
    Locals {
        app_name: &config.app_name,
        languages: &config.languages,
        base_url: &config.base_url,
        host: &config.host,
        google_analytics: GoogleAnalytics {
            tracking_id: &config.google_analytics.tracking_id,
        },
        facebook_apps: FacebookApps {
            app_id: &config.facebook_apps.app_id,
        },
        data: data
            .pointer(&format!("/lang/{locale}"))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

pub fn run_jade(ctx: &TaskContext<'_>) -> TaskResult {
    let renamed = rename_jade(&ctx.config.work("templates"))?;
    tracing::info!("renamed {renamed} jade templates to pug");
    Ok(Completion::Done)
}

/// Give every `.jade` template under `templates` the `.pug` extension, in
/// place. An existing `.pug` of the same name is replaced. Returns the number
/// of renamed files.
pub fn rename_jade(templates: &Utf8Path) -> anyhow::Result<usize> {
    let sources = collect_sources(templates, &["**/*.jade"])?;

    for source in &sources {
        let target = source.with_extension("pug");
        std::fs::rename(source, &target)
            .with_context(|| format!("couldn't rename {source} to {target}"))?;
    }

    Ok(sources.len())
}

fn load_data(path: &Utf8Path) -> anyhow::Result<Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("couldn't read data file {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("couldn't parse data file {path}"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8PathBuf;
    use serde_json::json;

    use super::*;

    fn langs() -> Vec<String> {
        vec!["pl".into(), "en".into()]
    }

    #[test]
    fn locale_from_views_directory() {
        let supported = langs();
        assert_eq!(template_locale(Utf8Path::new("views/en/home.pug"), &supported), "en");
        assert_eq!(template_locale(Utf8Path::new("views/en/deep/a.pug"), &supported), "en");
        assert_eq!(template_locale(Utf8Path::new("views/de/home.pug"), &supported), "pl");
    }

    #[test]
    fn locale_from_file_suffix() {
        let supported = langs();
        assert_eq!(template_locale(Utf8Path::new("index-en.pug"), &supported), "en");
        assert_eq!(template_locale(Utf8Path::new("index-pl.pug"), &supported), "pl");
        assert_eq!(template_locale(Utf8Path::new("index.pug"), &supported), "pl");
        assert_eq!(template_locale(Utf8Path::new("a.pug"), &supported), "pl");
    }

    #[test]
    fn locals_carry_project_settings_and_locale_data() {
        let mut config = Config::default();
        config.app_name = "shop".into();
        config.google_analytics.tracking_id = "UA-1".into();
        config.facebook_apps.app_id = "42".into();

        let data = json!({ "lang": { "en": { "title": "Hello" }, "pl": { "title": "Cześć" } } });
        let locals = serde_json::to_value(template_locals(&config, "en", &data)).unwrap();

        assert_eq!(locals["appName"], "shop");
        assert_eq!(locals["languages"], json!(["pl", "en"]));
        assert_eq!(locals["googleAnalytics"]["trackingId"], "UA-1");
        assert_eq!(locals["facebookApps"]["appId"], "42");
        assert_eq!(locals["data"]["title"], "Hello");
    }

    #[test]
    fn missing_locale_data_is_null() {
        let config = Config::default();
        let locals = template_locals(&config, "en", &json!({}));
        assert!(locals.data.is_null());
    }

    #[test]
    fn jade_templates_become_pug() {
        let dir = tempfile::tempdir().unwrap();
        let templates = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(templates.join("views/en")).unwrap();
        fs::write(templates.join("index.jade"), "p index").unwrap();
        fs::write(templates.join("views/en/home.jade"), "p home").unwrap();
        fs::write(templates.join("layout.pug"), "p layout").unwrap();

        assert_eq!(rename_jade(&templates).unwrap(), 2);

        assert!(!templates.join("index.jade").exists());
        assert!(!templates.join("views/en/home.jade").exists());
        assert_eq!(fs::read_to_string(templates.join("index.pug")).unwrap(), "p index");
        assert_eq!(fs::read_to_string(templates.join("views/en/home.pug")).unwrap(), "p home");
        assert_eq!(fs::read_to_string(templates.join("layout.pug")).unwrap(), "p layout");
    }

    #[test]
    fn no_jade_templates_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let templates = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        assert_eq!(rename_jade(&templates).unwrap(), 0);
    }
}
