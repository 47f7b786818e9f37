//! Project configuration.
//!
//! A [`Config`] is built once when the process starts and shared read-only
//! (behind an `Arc`) by the engine, the watcher and the server. Nothing
//! mutates it afterwards.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::server::LocaleConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_name: String,
    /// Supported locales, the first one is the default.
    pub languages: Vec<String>,
    /// Emitted as `<base href>` by the templates when not empty.
    pub base_url: String,
    /// Public host of the site, used for SEO metadata.
    pub host: String,
    /// Name of the file the configuration came from, quoted in refusals.
    pub config_file: String,
    /// JSON file with per-locale template data under `lang.<code>`.
    pub data_file: Utf8PathBuf,
    pub directory: Directories,
    pub server: ServerConfig,
    pub ftp: FtpConfig,
    pub api_keys: ApiKeys,
    pub google_analytics: GoogleAnalytics,
    pub facebook_apps: FacebookApps,
    pub watch: WatchConfig,
    /// External commands backing the stages, keyed by task name.
    pub commands: BTreeMap<String, CommandSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "app".into(),
            languages: vec!["pl".into(), "en".into()],
            base_url: "/".into(),
            host: String::new(),
            config_file: "project.config.json".into(),
            data_file: "project.data.json".into(),
            directory: Directories::default(),
            server: ServerConfig::default(),
            ftp: FtpConfig::default(),
            api_keys: ApiKeys::default(),
            google_analytics: GoogleAnalytics::default(),
            facebook_apps: FacebookApps::default(),
            watch: WatchConfig::default(),
            commands: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Directories {
    pub work: Utf8PathBuf,
    pub dist: Utf8PathBuf,
    pub test: Utf8PathBuf,
}

impl Default for Directories {
    fn default() -> Self {
        Self {
            work: "src".into(),
            dist: "dist".into(),
            test: "test".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Public address the server is announced under.
    pub target: String,
    pub port: u16,
    pub log_prefix: String,
    pub log_connections: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            target: "http://localhost".into(),
            port: 3000,
            log_prefix: "KOBO".into(),
            log_connections: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FtpConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub destination: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: String::new(),
            password: String::new(),
            destination: "/public_html/".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub tinify: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GoogleAnalytics {
    pub tracking_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FacebookApps {
    pub app_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Window in which rapid file events are merged into one.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 250 }
    }
}

/// An external program invoked by a stage. Arguments may contain the
/// placeholders `{file}`, `{files}`, `{out}` and `{locals}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// Validated FTP settings.
#[derive(Debug, Clone)]
pub struct FtpCredentials {
    pub host: String,
    pub user: String,
    pub password: String,
    pub destination: String,
}

impl Config {
    pub fn from_json(path: &Utf8Path, text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        let mut config = Self::from_json(path, &text)?;
        config.config_file = path.to_string();
        Ok(config)
    }

    /// Locale routing settings for a server rooted at `root`.
    pub fn locales(&self, root: impl Into<Utf8PathBuf>) -> Result<LocaleConfig, ConfigError> {
        LocaleConfig::new(self.languages.clone(), root)
            .map_err(|_| ConfigError::NoLocales(self.config_file.clone()))
    }

    pub fn ftp_credentials(&self) -> Result<FtpCredentials, ConfigError> {
        let fields = [
            ("host", &self.ftp.host),
            ("user", &self.ftp.user),
            ("password", &self.ftp.password),
            ("destination", &self.ftp.destination),
        ];

        let missing: Vec<_> = fields
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(ConfigError::MissingFtp {
                file: self.config_file.clone(),
                missing,
            });
        }

        Ok(FtpCredentials {
            host: self.ftp.host.clone(),
            user: self.ftp.user.clone(),
            password: self.ftp.password.clone(),
            destination: self.ftp.destination.clone(),
        })
    }

    pub fn tinify_key(&self) -> Result<&str, ConfigError> {
        match self.api_keys.tinify.trim() {
            "" => Err(ConfigError::MissingApiKey(self.config_file.clone())),
            key => Ok(key),
        }
    }

    pub fn command(&self, task: &str) -> Option<&CommandSpec> {
        self.commands
            .get(task)
            .filter(|spec| !spec.program.trim().is_empty())
    }

    /// Resolve a path relative to the work directory.
    pub fn work(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.directory.work.join(path)
    }

    /// Resolve a path relative to the distribution directory.
    pub fn dist(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.directory.dist.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_project_layout() {
        let config = Config::default();
        assert_eq!(config.languages, ["pl", "en"]);
        assert_eq!(config.directory.work, "src");
        assert_eq!(config.directory.dist, "dist");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.watch.debounce_ms, 250);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let text = r#"{ "languages": ["en"], "server": { "port": 8080 } }"#;
        let config = Config::from_json(Utf8Path::new("test.json"), text).unwrap();

        assert_eq!(config.languages, ["en"]);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.log_prefix, "KOBO");
        assert_eq!(config.ftp.destination, "/public_html/");
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let err = Config::from_json(Utf8Path::new("broken.json"), "{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn ftp_credentials_report_every_missing_field() {
        let mut config = Config::default();
        config.ftp.host = "ftp.example.com".into();

        match config.ftp_credentials() {
            Err(ConfigError::MissingFtp { missing, .. }) => {
                assert_eq!(missing, ["user", "password"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        config.ftp.user = "user".into();
        config.ftp.password = "secret".into();
        assert!(config.ftp_credentials().is_ok());
    }

    #[test]
    fn empty_api_key_is_refused() {
        let mut config = Config::default();
        assert!(matches!(
            config.tinify_key(),
            Err(ConfigError::MissingApiKey(_))
        ));

        config.api_keys.tinify = "key".into();
        assert_eq!(config.tinify_key().unwrap(), "key");
    }

    #[test]
    fn empty_language_list_is_refused() {
        let config = Config {
            languages: vec![],
            ..Config::default()
        };
        assert!(matches!(
            config.locales("src"),
            Err(ConfigError::NoLocales(_))
        ));
    }

    #[test]
    fn blank_command_counts_as_missing() {
        let mut config = Config::default();
        config
            .commands
            .insert("js:hint".into(), CommandSpec::default());
        assert!(config.command("js:hint").is_none());
    }
}
