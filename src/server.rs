//! Development HTTP server with locale routing.
//!
//! Requests go through three steps:
//!
//! 1. a path starting with three or more slashes is answered with
//!    `301 Moved Permanently` to `/`;
//! 2. an existing static file under the root directory is served as-is;
//! 3. anything else gets the localized index document `index-{locale}.html`,
//!    where the locale is the first path segment if it is supported and the
//!    default locale otherwise.
//!
//! Every response carries `Access-Control-Allow-Origin: *`. Failures are
//! rendered as JSON `{message, statusCode}`.

mod reload;

use std::convert::Infallible;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::handler::Handler;
use axum::http::{HeaderValue, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use tower::Service;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::Config;
use crate::error::{ConfigError, RequestError, ServerError};

pub use reload::Reloader;

/// Supported locales and the directory they are served from. The locale
/// list is never empty.
#[derive(Debug, Clone)]
pub struct LocaleConfig {
    supported: Vec<String>,
    root: Utf8PathBuf,
    live_reload: Option<u16>,
}

impl LocaleConfig {
    pub fn new(supported: Vec<String>, root: impl Into<Utf8PathBuf>) -> Result<Self, ConfigError> {
        if supported.is_empty() {
            return Err(ConfigError::NoLocales("the configuration".into()));
        }

        Ok(Self {
            supported,
            root: root.into(),
            live_reload: None,
        })
    }

    /// Inject the live reload client, listening on `port`, into served
    /// index documents.
    pub fn with_live_reload(mut self, port: u16) -> Self {
        self.live_reload = Some(port);
        self
    }

    pub fn supported(&self) -> &[String] {
        &self.supported
    }

    pub fn default_locale(&self) -> &str {
        &self.supported[0]
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn live_reload(&self) -> Option<u16> {
        self.live_reload
    }

    /// Locale for a request path: its first segment, percent-decoded, when
    /// supported, the default locale otherwise.
    pub fn resolve_locale(&self, path: &str) -> &str {
        let segment = path
            .strip_prefix('/')
            .unwrap_or(path)
            .split('/')
            .next()
            .unwrap_or_default();
        let segment = percent_decode_str(segment).decode_utf8_lossy();

        self.supported
            .iter()
            .find(|code| code.as_str() == segment.as_ref())
            .map_or(self.default_locale(), String::as_str)
    }

    pub fn index_path(&self, locale: &str) -> Utf8PathBuf {
        self.root.join(format!("index-{locale}.html"))
    }
}

/// Whether the path must be redirected to `/`.
pub fn is_slash_run(path: &str) -> bool {
    path.starts_with("///")
}

/// Build the request router for `locales`.
pub fn router(locales: LocaleConfig, log_connections: bool) -> Router {
    let locales = Arc::new(locales);

    let static_files = ServeDir::new(locales.root().as_std_path())
        .append_index_html_on_directories(false)
        .fallback(locale_index.with_state(locales));

    let mut router =
        Router::new().fallback(move |request: Request| serve_static(static_files.clone(), request));

    if log_connections {
        router = router.layer(middleware::from_fn(log_request));
    }

    router
        .layer(middleware::from_fn(redirect_slash_run))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
}

async fn redirect_slash_run(request: Request, next: Next) -> Response {
    if is_slash_run(request.uri().path()) {
        return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/")]).into_response();
    }

    next.run(request).await
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let response = next.run(request).await;

    tracing::info!(%method, %uri, status = response.status().as_u16(), "request");
    response
}

/// Serve a static file, or hand over to the fallback. I/O failures other
/// than a missing file go through [`RequestError`] like any other error.
async fn serve_static<F>(mut files: ServeDir<F>, request: Request) -> Response
where
    F: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    F::Future: Send + 'static,
{
    let uri = request.uri().path().to_string();

    match files.try_call(request).await {
        Ok(response) => response.map(Body::new),
        Err(source) => RequestError::Static { uri, source }.into_response(),
    }
}

async fn locale_index(
    State(locales): State<Arc<LocaleConfig>>,
    uri: Uri,
) -> Result<Html<String>, RequestError> {
    let locale = locales.resolve_locale(uri.path());
    let path = locales.index_path(locale);

    tracing::debug!(%uri, locale, "serving index document");

    let html = match tokio::fs::read_to_string(&path).await {
        Ok(html) => html,
        Err(source) if source.kind() == ErrorKind::NotFound => {
            return Err(RequestError::NotFound { path, source });
        }
        Err(source) => return Err(RequestError::Read { path, source }),
    };

    Ok(Html(match locales.live_reload() {
        Some(port) => inject_script(html, &reload::refresh_script(port)),
        None => html,
    }))
}

fn inject_script(mut html: String, script: &str) -> String {
    let tag = format!("<script>{script}</script>");
    match html.rfind("</body>") {
        Some(at) => html.insert_str(at, &tag),
        None => html.push_str(&tag),
    }
    html
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "statusCode")]
    status_code: u16,
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status_code = self.status_code().unwrap_or(500);
        tracing::error!(error = ?self, "{self}");

        let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            message: self.to_string(),
            status_code,
        };

        (status, Json(body)).into_response()
    }
}

/// HTTP server for a directory, running on its own thread.
#[derive(Debug, Clone)]
pub struct DevServer {
    locales: LocaleConfig,
    port: u16,
    log_connections: bool,
    target: String,
    log_prefix: String,
}

impl DevServer {
    pub fn new(locales: LocaleConfig, port: u16) -> Self {
        Self {
            locales,
            port,
            log_connections: false,
            target: "http://localhost".into(),
            log_prefix: String::new(),
        }
    }

    /// Server for `root` with the settings of `config`. Refuses when no
    /// locales are configured.
    pub fn from_config(config: &Config, root: impl Into<Utf8PathBuf>) -> Result<Self, ConfigError> {
        Ok(Self {
            locales: config.locales(root)?,
            port: config.server.port,
            log_connections: config.server.log_connections,
            target: config.server.target.clone(),
            log_prefix: config.server.log_prefix.clone(),
        })
    }

    pub fn with_live_reload(mut self, port: u16) -> Self {
        self.locales = self.locales.with_live_reload(port);
        self
    }

    pub fn locales(&self) -> &LocaleConfig {
        &self.locales
    }

    /// Bind the listener and start serving. The socket is bound before this
    /// returns, so a bind failure is reported to the caller.
    pub fn start(self) -> Result<JoinHandle<anyhow::Result<()>>, ServerError> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let bind_error = |source| ServerError::Bind { addr, source };

        let listener = std::net::TcpListener::bind(addr).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let port = listener.local_addr().map_err(bind_error)?.port();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)?;

        let url = format!("{}:{port}/", self.target);
        tracing::info!(
            url = %style(url).yellow(),
            root = %self.locales.root(),
            "{} starting a HTTP server",
            self.log_prefix,
        );

        let router = router(self.locales, self.log_connections);

        Ok(thread::spawn(move || {
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener)?;
                axum::serve(listener, router).await?;
                Ok(())
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use axum::body::{Body, to_bytes};
    use tower::ServiceExt;

    use super::*;

    fn site() -> (tempfile::TempDir, LocaleConfig) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        fs::write(root.join("index-pl.html"), "<body>pl</body>").unwrap();
        fs::write(root.join("index-en.html"), "<body>en</body>").unwrap();
        fs::create_dir(root.join("css")).unwrap();
        fs::write(root.join("css/main.css"), "body{}").unwrap();

        let locales = LocaleConfig::new(vec!["pl".into(), "en".into()], root).unwrap();
        (dir, locales)
    }

    async fn get(locales: &LocaleConfig, uri: &str) -> (StatusCode, Response) {
        let request = axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router(locales.clone(), false).oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn resolves_supported_locales() {
        let (_dir, locales) = site();
        assert_eq!(locales.resolve_locale("/en/readme"), "en");
        assert_eq!(locales.resolve_locale("/pl"), "pl");
        assert_eq!(locales.resolve_locale("/en"), "en");
        assert_eq!(locales.resolve_locale("/e%6E/readme"), "en");
        assert_eq!(locales.resolve_locale("/%65%6e"), "en");
    }

    #[test]
    fn falls_back_to_default_locale() {
        let (_dir, locales) = site();
        assert_eq!(locales.resolve_locale("/"), "pl");
        assert_eq!(locales.resolve_locale("/xx/readme"), "pl");
        assert_eq!(locales.resolve_locale("/english"), "pl");
        assert_eq!(locales.resolve_locale("//en"), "pl");
    }

    #[test]
    fn empty_locales_are_refused() {
        let err = LocaleConfig::new(vec![], "dist").unwrap_err();
        assert!(matches!(err, ConfigError::NoLocales(_)));
    }

    #[test]
    fn slash_runs() {
        assert!(is_slash_run("///anything"));
        assert!(is_slash_run("////"));
        assert!(!is_slash_run("//en"));
        assert!(!is_slash_run("/en/readme"));
    }

    #[test]
    fn script_goes_before_body_end() {
        let html = inject_script("<body>x</body>".into(), "s()");
        assert_eq!(html, "<body>x<script>s()</script></body>");
        assert_eq!(inject_script("x".into(), "s()"), "x<script>s()</script>");
    }

    #[tokio::test]
    async fn serves_requested_locale() {
        let (_dir, locales) = site();
        let (status, response) = get(&locales, "/en/readme").await;

        assert_eq!(status, StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
        assert_eq!(body(response).await, "<body>en</body>");
    }

    #[tokio::test]
    async fn percent_encoded_locale_is_decoded() {
        let (_dir, locales) = site();
        let (status, response) = get(&locales, "/e%6E/readme").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body(response).await, "<body>en</body>");
    }

    #[tokio::test]
    async fn unknown_locale_serves_default() {
        let (_dir, locales) = site();
        let (status, response) = get(&locales, "/xx/readme").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body(response).await, "<body>pl</body>");
    }

    #[tokio::test]
    async fn root_serves_default_locale() {
        let (_dir, locales) = site();
        let (status, response) = get(&locales, "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body(response).await, "<body>pl</body>");
    }

    #[tokio::test]
    async fn static_files_win_over_locale_fallback() {
        let (_dir, locales) = site();
        let (status, response) = get(&locales, "/css/main.css").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body(response).await, "body{}");
    }

    #[tokio::test]
    async fn slash_run_redirects_home() {
        let (_dir, locales) = site();
        let (status, response) = get(&locales, "///anything").await;

        assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn every_response_allows_any_origin() {
        let (_dir, locales) = site();

        for uri in ["/", "/en", "/css/main.css"] {
            let (_, response) = get(&locales, uri).await;
            assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        }
    }

    #[tokio::test]
    async fn missing_index_is_json_404() {
        let (dir, locales) = site();
        fs::remove_file(dir.path().join("index-en.html")).unwrap();

        let (status, response) = get(&locales, "/en").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let json: serde_json::Value = serde_json::from_str(&body(response).await).unwrap();
        assert_eq!(json["statusCode"], 404);
        assert!(json["message"].as_str().unwrap().contains("index-en.html"));
    }

    #[tokio::test]
    async fn unreadable_index_defaults_to_500() {
        let (dir, locales) = site();
        fs::remove_file(dir.path().join("index-pl.html")).unwrap();
        fs::create_dir(dir.path().join("index-pl.html")).unwrap();

        let (status, response) = get(&locales, "/").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let json: serde_json::Value = serde_json::from_str(&body(response).await).unwrap();
        assert_eq!(json["statusCode"], 500);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn static_file_errors_are_json() {
        let (_dir, locales) = site();
        let long = format!("/{}", "a".repeat(300));
        let (status, response) = get(&locales, &long).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let json: serde_json::Value = serde_json::from_str(&body(response).await).unwrap();
        assert_eq!(json["statusCode"], 500);
        assert!(json["message"].as_str().unwrap().contains("aaaa"));
    }

    #[tokio::test]
    async fn live_reload_client_is_injected() {
        let (_dir, locales) = site();
        let locales = locales.with_live_reload(4242);
        let (_, response) = get(&locales, "/en").await;

        let html = body(response).await;
        assert!(html.contains("ws://localhost:4242"));
        assert!(html.ends_with("</script></body>"));
    }

    #[test]
    fn server_starts_on_free_port() {
        let (_dir, locales) = site();
        let handle = DevServer::new(locales, 0).start().unwrap();
        assert!(!handle.is_finished());
    }

    #[test]
    fn refused_server_binds_nothing() {
        let config = Config {
            languages: vec![],
            ..Config::default()
        };

        let err = DevServer::from_config(&config, "dist").unwrap_err();
        assert!(matches!(err, ConfigError::NoLocales(file) if file == config.config_file));
    }
}
