use crate::present::{
    DisplayResult, content_href, encode_path, present_search, present_suggestions,
};
use crate::{
    Archive, CancelToken, EngineError, Error, PackedEngine, Query, Searcher, SuggestionSearcher,
};
use askama::Template;
use axum::{
    Json, Router,
    extract::{Path, Query as QueryParams, State},
    http::{HeaderValue, StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn};

type SharedState = Arc<AppState>;
const SUGGESTION_LIMIT: usize = 10;
const RESULTS_LIMIT: usize = 50;
const RANDOM_HTML_ATTEMPTS: usize = 100;
const CACHE_CONTROL: &str = "public, max-age=86400";

/// Everything a handler may touch. Built once at startup and shared read-only,
/// apart from the random source.
pub struct AppState {
    archive: Arc<Archive>,
    searcher: Option<Searcher>,
    suggestions: SuggestionSearcher,
    entry_count: u64,
    rng: Mutex<SmallRng>,
    theme: WebTheme,
}

impl AppState {
    pub fn new(archive: Arc<Archive>, theme: WebTheme) -> Result<Self, Error> {
        let searcher = match Searcher::new(&archive) {
            Ok(searcher) => Some(searcher),
            Err(err) => {
                warn!(%err, "full-text search disabled");
                None
            }
        };
        let suggestions = SuggestionSearcher::new(&archive)?;
        let entry_count = archive.entry_count()?;
        Ok(Self {
            archive,
            searcher,
            suggestions,
            entry_count,
            rng: Mutex::new(SmallRng::from_entropy()),
            theme,
        })
    }

    /// Uniform index in `[0, entry_count)`; `None` for an empty archive.
    fn sample_index(&self) -> Option<u64> {
        (self.entry_count > 0).then(|| self.rng.lock().gen_range(0..self.entry_count))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum WebTheme {
    #[default]
    Tailwind,
    Bootstrap,
}

impl fmt::Display for WebTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebTheme::Tailwind => write!(f, "tailwind"),
            WebTheme::Bootstrap => write!(f, "bootstrap"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Chrome {
    use_tailwind: bool,
    use_bootstrap: bool,
    body_class: &'static str,
    header_class: &'static str,
    brand_class: &'static str,
    form_class: &'static str,
    input_class: &'static str,
    list_class: &'static str,
    button_class: &'static str,
    frame_class: &'static str,
    main_class: &'static str,
    headline_class: &'static str,
    lede_class: &'static str,
    result_class: &'static str,
}

impl Chrome {
    fn new(theme: WebTheme) -> Self {
        match theme {
            WebTheme::Tailwind => Self {
                use_tailwind: true,
                use_bootstrap: false,
                body_class: "bg-slate-50 text-slate-900 h-screen flex flex-col",
                header_class: "flex items-center gap-4 px-4 py-2 border-b border-slate-200 bg-white",
                brand_class: "font-extrabold tracking-tight text-lg",
                form_class: "relative flex-1 max-w-xl",
                input_class: "w-full rounded-md border border-slate-300 px-3 py-1",
                list_class: "absolute z-10 w-full bg-white shadow rounded mt-1 divide-y divide-slate-100",
                button_class: "inline-flex items-center rounded-md bg-slate-900 px-4 py-1 text-white font-semibold shadow hover:bg-slate-800 transition-colors",
                frame_class: "flex-1 w-full border-0",
                main_class: "min-h-screen flex flex-col items-center justify-start py-10 px-4",
                headline_class: "text-4xl font-extrabold tracking-tight",
                lede_class: "text-lg text-slate-600",
                result_class: "bg-white shadow rounded p-4 space-y-1",
            },
            WebTheme::Bootstrap => Self {
                use_tailwind: false,
                use_bootstrap: true,
                body_class: "bg-light text-dark vh-100 d-flex flex-column",
                header_class: "navbar navbar-light bg-white border-bottom px-3 gap-3",
                brand_class: "navbar-brand fw-bold",
                form_class: "position-relative flex-grow-1",
                input_class: "form-control",
                list_class: "list-group position-absolute w-100",
                button_class: "btn btn-primary",
                frame_class: "flex-grow-1 w-100 border-0",
                main_class: "container py-5",
                headline_class: "display-5 fw-bold",
                lede_class: "lead mb-4",
                result_class: "card card-body mb-3",
            },
        }
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub theme: WebTheme,
    pub archive: PathBuf,
    pub cache_clusters: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            theme: WebTheme::default(),
            archive: PathBuf::new(),
            cache_clusters: crate::packed::DEFAULT_CACHE_CLUSTERS,
        }
    }
}

#[derive(Debug, ThisError)]
pub enum WebError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Archive(#[from] Error),
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let engine = PackedEngine::with_cache_capacity(config.cache_clusters);
    let archive = Arc::new(Archive::open_with(&engine, &config.archive)?);
    let state = Arc::new(AppState::new(Arc::clone(&archive), config.theme)?);
    info!(
        addr = %config.addr,
        theme = ?config.theme,
        archive = %config.archive.display(),
        entries = state.entry_count,
        fulltext = state.searcher.is_some(),
        "Binding HTTP listener"
    );
    let router = build_router(state);
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    archive.close();
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".to_string(),
        }
    }

    /// Collapses every failure, not-found included, into a 500.
    fn always_internal(self) -> Self {
        if self.status == StatusCode::INTERNAL_SERVER_ERROR {
            self
        } else {
            Self::internal()
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if err.is_not_found() {
            return Self::not_found(err.to_string());
        }
        error!(error = %err, source = ?std::error::Error::source(&err), "request failed");
        Self::internal()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState) -> Router {
    with_layers(
        Router::new()
            .route("/", get(home))
            .route("/content/", get(content_root))
            .route("/content/*path", get(content))
            .route("/random", get(random))
            .route("/api", get(api_unknown))
            .route("/api/random", get(api_random))
            .route("/api/main", get(api_main))
            .route("/api/health", get(health))
            .route("/api/*rest", get(api_unknown))
            .route("/search/suggestions", get(suggestions))
            .route("/search/results", get(search_results))
            .fallback(shell_for_path)
            .with_state(state),
    )
}

fn with_layers(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    error!(panic = %detail, "handler panicked");
    ApiError::internal().into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Runs archive work on the blocking pool. A panicked or cancelled task is a 500.
async fn run_blocking<T, F>(state: &SharedState, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> Result<T, Error> + Send + 'static,
{
    let state = Arc::clone(state);
    match tokio::task::spawn_blocking(move || work(&state)).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(err) => {
            error!(error = %err, "blocking task failed");
            Err(ApiError::internal())
        }
    }
}

async fn home(State(state): State<SharedState>) -> Response {
    render_shell(state.theme, "")
}

/// Any path without a route of its own opens the shell with that path framed.
async fn shell_for_path(State(state): State<SharedState>, uri: Uri) -> Response {
    render_shell(state.theme, uri.path().trim_start_matches('/'))
}

fn render_shell(theme: WebTheme, target: &str) -> Response {
    let target = percent_decode_str(target).decode_utf8_lossy();
    let template = ShellTemplate {
        chrome: Chrome::new(theme),
        src: (!target.is_empty()).then(|| content_href(&target)),
    };
    render_page(template.render())
}

fn render_page(rendered: askama::Result<String>) -> Response {
    match rendered {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            error!(error = %err, "template rendering failed");
            ApiError::internal().into_response()
        }
    }
}

async fn content_root() -> ApiError {
    ApiError::not_found("no path given")
}

struct ContentPayload {
    path: String,
    mimetype: String,
    data: Vec<u8>,
}

async fn content(
    State(state): State<SharedState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let payload = run_blocking(&state, move |state| {
        let entry = state.archive.entry_by_path(&path)?;
        let item = entry.resolve(true)?;
        Ok(ContentPayload {
            path: item.path()?,
            mimetype: item.mimetype()?,
            data: item.data()?,
        })
    })
    .await?;

    let body = if is_html(&payload.mimetype) {
        let mut framed = format!("<base href=\"{}\">", base_href(&payload.path)).into_bytes();
        framed.extend_from_slice(&payload.data);
        framed
    } else {
        payload.data
    };

    let len = body.len();
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    match HeaderValue::from_str(&payload.mimetype) {
        Ok(value) if !payload.mimetype.is_empty() => {
            headers.insert(header::CONTENT_TYPE, value);
        }
        _ => {
            headers.remove(header::CONTENT_TYPE);
        }
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    Ok(response)
}

fn is_html(mimetype: &str) -> bool {
    mimetype.starts_with(mime::TEXT_HTML.as_ref())
}

/// `/content/` plus the directory part of `path`, trailing slash kept.
fn base_href(path: &str) -> String {
    let dir = path.rfind('/').map_or("", |slash| &path[..=slash]);
    format!("/content/{}", encode_path(dir))
}

async fn random(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let path = run_blocking(&state, |state| {
        let index = state
            .sample_index()
            .ok_or_else(|| Error::not_found("any entry"))?;
        state.archive.entry_by_index(index)?.resolve(true)?.path()
    })
    .await
    .map_err(ApiError::always_internal)?;
    Ok((StatusCode::FOUND, [(header::LOCATION, content_href(&path))]).into_response())
}

#[derive(Debug, Serialize, Deserialize)]
struct PathPayload {
    path: String,
}

async fn api_random(State(state): State<SharedState>) -> Result<Json<PathPayload>, ApiError> {
    let path = run_blocking(&state, |state| {
        for _ in 0..RANDOM_HTML_ATTEMPTS {
            let Some(index) = state.sample_index() else {
                break;
            };
            let Ok(item) = state
                .archive
                .entry_by_index(index)
                .and_then(|entry| entry.resolve(true))
            else {
                continue;
            };
            if item.mimetype().is_ok_and(|mimetype| is_html(&mimetype)) {
                if let Ok(path) = item.path() {
                    return Ok(Some(path));
                }
            }
        }
        Ok(None)
    })
    .await?;
    path.map(|path| Json(PathPayload { path }))
        .ok_or_else(|| ApiError::not_found("no HTML page found"))
}

async fn api_main(State(state): State<SharedState>) -> Result<Json<PathPayload>, ApiError> {
    let path = run_blocking(&state, |state| {
        state.archive.main_entry()?.resolve(true)?.path()
    })
    .await?;
    Ok(Json(PathPayload { path }))
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "entries": state.entry_count }))
}

async fn api_unknown() -> ApiError {
    ApiError::not_found("unknown API endpoint")
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SuggestionPayload {
    path: String,
    title: String,
    snippet: String,
}

impl From<DisplayResult> for SuggestionPayload {
    fn from(display: DisplayResult) -> Self {
        Self {
            path: display.path,
            title: display.title,
            snippet: display.snippet,
        }
    }
}

async fn suggestions(
    State(state): State<SharedState>,
    QueryParams(params): QueryParams<SearchParams>,
) -> Result<Json<Vec<SuggestionPayload>>, ApiError> {
    let text = params.q.unwrap_or_default();
    let token = CancelToken::new();
    let cancel_on_drop = token.drop_guard();
    let results = run_blocking(&state, move |state| {
        if text.chars().count() < crate::MIN_SUGGESTION_CHARS {
            return Ok(Vec::new());
        }
        state
            .suggestions
            .suggest(&text)?
            .results_cancellable(0, SUGGESTION_LIMIT, &token)
    })
    .await;
    cancel_on_drop.disarm();
    let payload = present_suggestions(&results?)
        .into_iter()
        .map(SuggestionPayload::from)
        .collect();
    Ok(Json(payload))
}

async fn search_results(
    State(state): State<SharedState>,
    QueryParams(params): QueryParams<SearchParams>,
) -> Result<Response, ApiError> {
    let text = params.q.unwrap_or_default();
    if text.is_empty() {
        return Ok(render_shell(state.theme, ""));
    }
    let token = CancelToken::new();
    let cancel_on_drop = token.drop_guard();
    let query_text = text.clone();
    let results = run_blocking(&state, move |state| {
        let searcher = state
            .searcher
            .as_ref()
            .ok_or(Error::Search(EngineError::NoFulltextIndex))?;
        let query = Query::new(query_text)?;
        searcher
            .search(&query)?
            .results_cancellable(0, RESULTS_LIMIT, &token)
    })
    .await;
    cancel_on_drop.disarm();
    let results = results.map_err(ApiError::always_internal)?;
    let template = ResultsTemplate {
        chrome: Chrome::new(state.theme),
        query: &text,
        results: present_search(&results),
    };
    Ok(render_page(template.render()))
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Folio</title>
    {% if chrome.use_tailwind %}
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
    {% endif %}
    {% if chrome.use_bootstrap %}
    <link href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.8/dist/css/bootstrap.min.css" rel="stylesheet" integrity="sha384-sRIl4kxILFvY47J16cr9ZwB07vP4J8+LH7qKQnuqkuIAvNWLzeN8tE5YBujZqJLB" crossorigin="anonymous">
    {% endif %}
  </head>
  <body class="{{ chrome.body_class }}">
    <header class="{{ chrome.header_class }}">
      <a href="/" class="{{ chrome.brand_class }}">Folio</a>
      <form action="/search/results" method="get" class="{{ chrome.form_class }}">
        <input id="q" name="q" type="search" autocomplete="off" placeholder="Search" class="{{ chrome.input_class }}">
        <ul id="suggestions" class="{{ chrome.list_class }}"></ul>
      </form>
      <a href="/random" target="content" class="{{ chrome.button_class }}">Random</a>
    </header>
    <iframe id="content" name="content" class="{{ chrome.frame_class }}" {% if let Some(src) = src %} src="{{ src|safe }}" data-target="{{ src|safe }}"{% endif %}></iframe>
    <script>
      (function () {
        const frame = document.getElementById('content');
        const box = document.getElementById('q');
        const list = document.getElementById('suggestions');
        const contentUrl = function (path) {
          return '/content/' + path.split('/').map(encodeURIComponent).join('/');
        };
        if (!frame.dataset.target) {
          fetch('/api/main')
            .then(function (res) { return res.ok ? res.json() : null; })
            .then(function (main) { if (main) { frame.src = contentUrl(main.path); } });
        }
        let pending = 0;
        box.addEventListener('input', function () {
          const q = box.value;
          const ticket = ++pending;
          list.innerHTML = '';
          if (q.length < 2) { return; }
          fetch('/search/suggestions?q=' + encodeURIComponent(q))
            .then(function (res) { return res.ok ? res.json() : []; })
            .then(function (hits) {
              if (ticket !== pending) { return; }
              hits.forEach(function (hit) {
                const item = document.createElement('li');
                const link = document.createElement('a');
                link.href = contentUrl(hit.path);
                link.target = 'content';
                link.innerHTML = hit.snippet || hit.title;
                link.addEventListener('click', function () { list.innerHTML = ''; });
                item.appendChild(link);
                list.appendChild(item);
              });
            });
        });
      })();
    </script>
  </body>
</html>"#,
    ext = "html"
)]
struct ShellTemplate {
    chrome: Chrome,
    src: Option<String>,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Folio • Search</title>
    {% if chrome.use_tailwind %}
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
    {% endif %}
    {% if chrome.use_bootstrap %}
    <link href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.8/dist/css/bootstrap.min.css" rel="stylesheet" integrity="sha384-sRIl4kxILFvY47J16cr9ZwB07vP4J8+LH7qKQnuqkuIAvNWLzeN8tE5YBujZqJLB" crossorigin="anonymous">
    {% endif %}
  </head>
  <body>
    <main class="{{ chrome.main_class }}">
      <div class="space-y-4">
        <h1 class="{{ chrome.headline_class }}">Search results for “{{ query }}”</h1>
        <p class="{{ chrome.lede_class }}">{{ results.len() }} matches.</p>
        {% if results.is_empty() %}
          <p>No results found.</p>
        {% else %}
          {% for result in results %}
          <article class="{{ chrome.result_class }}">
            <a href="{{ result.href|safe }}" class="text-blue-700 hover:underline font-semibold">{{ result.title|safe }}</a>
            <p>{{ result.snippet|safe }}</p>
            <p class="text-sm text-slate-500">
              {% if let Some(score) = result.score %}score {{ score }}{% endif %}
              {% if let Some(words) = result.word_count %} • {{ words }} words{% endif %}
            </p>
          </article>
          {% endfor %}
        {% endif %}
      </div>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct ResultsTemplate<'a> {
    chrome: Chrome,
    query: &'a str,
    results: Vec<DisplayResult>,
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use crate::testing::{
        INDEX_HTML, MockEngine, sample_archive, search_archive, unindexed_archive,
    };
    use axum::{body, body::Body, http::Request};
    use tower::ServiceExt;

    fn test_router(archive: std::path::PathBuf) -> Router {
        router_for(Archive::open(archive).unwrap())
    }

    fn router_for(archive: Archive) -> Router {
        let archive = Arc::new(archive);
        let state = Arc::new(AppState::new(archive, WebTheme::Tailwind).unwrap());
        build_router(state)
    }

    async fn fetch(router: &Router, uri: &str) -> Response {
        router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_text(response: Response) -> String {
        String::from_utf8(body_bytes(response).await).unwrap()
    }

    #[test]
    fn base_href_keeps_directory() {
        assert_eq!(base_href("a/b/c.html"), "/content/a/b/");
        assert_eq!(base_href("index.html"), "/content/");
        assert_eq!(base_href("dir with space/x.html"), "/content/dir%20with%20space/");
    }

    #[tokio::test]
    async fn content_prefixes_html_with_base() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(sample_archive(dir.path()));

        let response = fetch(&router, "/content/a/b/c.html").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(response.headers()[header::CACHE_CONTROL], CACHE_CONTROL);
        let html = body_text(response).await;
        assert!(html.starts_with("<base href=\"/content/a/b/\">"));

        let response = fetch(&router, "/content/index.html").await;
        let expected_len = "<base href=\"/content/\">".len() + INDEX_HTML.len();
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            expected_len.to_string().as_str()
        );
        let html = body_text(response).await;
        assert_eq!(html, format!("<base href=\"/content/\">{INDEX_HTML}"));
    }

    #[tokio::test]
    async fn content_serves_binary_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(sample_archive(dir.path()));
        let response = fetch(&router, "/content/img/logo.png").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(body_bytes(response).await, vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn content_follows_redirects() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(sample_archive(dir.path()));
        let response = fetch(&router, "/content/old/home").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.ends_with(INDEX_HTML));
        // Base follows the resolved item, so index.html's relative links still work.
        assert!(html.starts_with("<base href=\"/content/\">"));
    }

    #[tokio::test]
    async fn random_failure_is_500() {
        let engine = MockEngine::with_pages(&[]);
        let router = router_for(Archive::open_with(&engine, "empty.folio").unwrap());
        assert_eq!(
            fetch(&router, "/random").await.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(fetch(&router, "/api/random").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_content_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(sample_archive(dir.path()));
        assert_eq!(
            fetch(&router, "/content/this_path_does_not_exist_123456789.html").await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(fetch(&router, "/content/").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn random_always_lands_on_servable_content() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(sample_archive(dir.path()));
        for _ in 0..25 {
            let response = fetch(&router, "/random").await;
            assert_eq!(response.status(), StatusCode::FOUND);
            let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
            assert!(location.starts_with("/content/"));
            assert_eq!(fetch(&router, &location).await.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn api_random_returns_html_or_404() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(sample_archive(dir.path()));
        let response = fetch(&router, "/api/random").await;
        assert_eq!(response.status(), StatusCode::OK);
        let payload: PathPayload = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(payload.path.ends_with(".html"));

        let router = test_router(unindexed_archive(dir.path()));
        assert_eq!(fetch(&router, "/api/random").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_main_reports_landing_page() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(sample_archive(dir.path()));
        let response = fetch(&router, "/api/main").await;
        assert_eq!(response.status(), StatusCode::OK);
        let payload: PathPayload = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(payload.path, "index.html");

        let router = test_router(unindexed_archive(dir.path()));
        assert_eq!(fetch(&router, "/api/main").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_health_and_unknown_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(sample_archive(dir.path()));
        let response = fetch(&router, "/api/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        let payload: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["entries"], 7);

        let response = fetch(&router, "/api/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let payload: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(payload["error"].is_string());
    }

    #[tokio::test]
    async fn suggestions_short_circuit_and_match() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(search_archive(dir.path()));

        let response = fetch(&router, "/search/suggestions?q=m").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "[]");

        let response = fetch(&router, "/search/suggestions?q=mark").await;
        let hits: Vec<SuggestionPayload> =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(hits[0].path, "index");
        assert_eq!(hits[0].title, "Markdown Documentation");
        assert!(hits.len() <= SUGGESTION_LIMIT);
    }

    #[tokio::test]
    async fn search_results_render_ranked_hits() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(search_archive(dir.path()));
        let response = fetch(&router, "/search/results?q=markdown").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("href=\"/content/index\""));
        assert!(html.contains("Markdown Documentation"));
        assert!(html.contains("<b>Markdown</b>"));

        let response = fetch(&router, "/search/results?q=").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("<iframe"));
    }

    #[tokio::test]
    async fn search_failure_is_generic_500() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(unindexed_archive(dir.path()));
        let response = fetch(&router, "/search/results?q=notes").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let text = body_text(response).await;
        assert!(!text.contains("full-text"));
    }

    #[tokio::test]
    async fn unknown_paths_open_the_shell() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(sample_archive(dir.path()));
        let response = fetch(&router, "/about.html").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("src=\"/content/about.html\""));

        let response = fetch(&router, "/a/b/c.html").await;
        assert!(body_text(response).await.contains("src=\"/content/a/b/c.html\""));

        let response = fetch(&router, "/").await;
        let html = body_text(response).await;
        assert!(html.contains("<iframe"));
        assert!(!html.contains("src=\"/content/"));
    }

    #[tokio::test]
    async fn panics_become_500() {
        async fn exploding() -> &'static str {
            panic!("handler exploded")
        }
        let router = with_layers(Router::new().route("/boom", get(exploding)));
        let response = fetch(&router, "/boom").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body_text(response).await.contains("exploded"));
    }
}
