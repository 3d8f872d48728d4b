use std::{borrow::Cow, net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        body::Bytes,
        extract::{ConnectInfo, State},
        http::{HeaderMap, StatusCode, Uri, header},
        middleware::{from_fn, from_fn_with_state},
        response::{IntoResponse, Response},
        routing::any,
    },
    periweb_config::{ListenAddr, ServerConfig},
    tokio::{net::TcpListener, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tower::ServiceBuilder,
    tracing::{error, info},
};

use crate::{
    api::{DispatchTable, serve_json},
    content::{
        CACHE_CONTROL_NONE, ContentSource, DirContent, EmbeddedContent, FAVICON, INDEX_HTML,
    },
    error::GatewayError,
    middleware::{enforce_xsrf, get_only, local_only, log_request, no_content, post_only},
    state::{DriverState, ServerInfo, StateView},
    xsrf::XsrfAuthority,
};

pub const FAVICON_PATH: &str = "/favicon.ico";
pub const XSRF_TOKEN_PATH: &str = "/xsrf_token";
pub const STATE_API_PATH: &str = "/api/periph/v1/server/state";

/// Paths served by fixed handlers; API endpoints may not take them.
const RESERVED_PATHS: &[&str] = &["/", FAVICON_PATH, XSRF_TOKEN_PATH];

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    xsrf: Arc<XsrfAuthority>,
    content: Arc<dyn ContentSource>,
}

impl AppState {
    fn asset(&self, name: &str) -> Result<Cow<'static, [u8]>, GatewayError> {
        self.content.get(name).ok_or_else(|| {
            error!(asset = name, "content missing");
            GatewayError::Asset {
                name: name.to_string(),
            }
        })
    }
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Collects everything a [`GatewayServer`] needs before it binds.
pub struct GatewayBuilder {
    listen: ListenAddr,
    verbose: bool,
    content: Arc<dyn ContentSource>,
    drivers: DriverState,
    api: DispatchTable,
}

impl GatewayBuilder {
    pub fn new(listen: ListenAddr) -> Self {
        Self {
            listen,
            verbose: false,
            content: Arc::new(EmbeddedContent),
            drivers: DriverState::default(),
            api: DispatchTable::new(),
        }
    }

    /// Builder for the `[server]` config section.
    pub fn from_config(config: &ServerConfig) -> Result<Self, GatewayError> {
        let listen = ListenAddr::parse(&config.http)
            .map_err(|e| GatewayError::InvalidAddress(e.to_string()))?;
        let mut builder = Self::new(listen).verbose(config.verbose);
        if let Some(dir) = &config.assets_dir {
            builder = builder.content(DirContent::new(dir));
        }
        Ok(builder)
    }

    /// Log every request.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn content(mut self, content: impl ContentSource + 'static) -> Self {
        self.content = Arc::new(content);
        self
    }

    /// Driver snapshot served by the state API. Copied when the router is
    /// built; later changes are not seen.
    pub fn drivers(mut self, drivers: DriverState) -> Self {
        self.drivers = drivers;
        self
    }

    /// Additional API endpoints.
    pub fn api(mut self, api: DispatchTable) -> Self {
        self.api = api;
        self
    }

    /// The complete router, without binding anything. Requests must carry
    /// `ConnectInfo<SocketAddr>`.
    pub fn router(self) -> Result<Router, GatewayError> {
        let hostname = resolve_hostname(&self.listen);
        Ok(self.build(hostname)?.0)
    }

    /// Bind the listener and start serving in a background task.
    pub async fn start(self) -> Result<GatewayServer, GatewayError> {
        let listen = self.listen.clone();
        let hostname = resolve_hostname(&listen);
        let (router, paths) = self.build(hostname.clone())?;

        let listener = TcpListener::bind((listen.host.as_str(), listen.port))
            .await
            .map_err(|source| GatewayError::Bind {
                addr: listen.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        // Startup banner.
        let lines = [
            format!("periweb gateway v{}", env!("CARGO_PKG_VERSION")),
            format!("listening on http://{local_addr} ({hostname})"),
            format!("{} API endpoints registered", paths.len()),
            format!(
                "remote peers: {}",
                if listen.is_loopback() {
                    "refused"
                } else {
                    "allowed"
                }
            ),
        ];
        let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) + 4;
        info!("┌{}┐", "─".repeat(width));
        for line in &lines {
            info!("│  {:<w$}│", line, w = width - 2);
        }
        info!("└{}┘", "─".repeat(width));

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(signal.cancelled_owned())
            .await
        });

        Ok(GatewayServer {
            local_addr,
            hostname,
            paths,
            state: ServerState::Serving,
            shutdown,
            task: Some(task),
        })
    }

    fn build(mut self, hostname: String) -> Result<(Router, Vec<String>), GatewayError> {
        if let Some(path) = RESERVED_PATHS.iter().find(|p| self.api.contains(p)) {
            return Err(GatewayError::DuplicatePath((*path).to_string()));
        }
        let info = ServerInfo {
            hostname,
            state: StateView::from(&self.drivers),
        };
        self.api
            .register_nullary(STATE_API_PATH, move || (info.clone(), StatusCode::OK))?;

        let app = AppState {
            xsrf: Arc::new(XsrfAuthority::new()),
            content: self.content,
        };

        // Unknown paths never reach the fixed handlers' body or method
        // checks.
        let mut router = Router::new()
            .route(
                "/",
                any(get_root).layer(
                    ServiceBuilder::new()
                        .layer(from_fn(no_content))
                        .layer(from_fn(get_only)),
                ),
            )
            .route(
                FAVICON_PATH,
                any(get_favicon).layer(
                    ServiceBuilder::new()
                        .layer(from_fn(no_content))
                        .layer(from_fn(get_only)),
                ),
            )
            .route(
                XSRF_TOKEN_PATH,
                any(post_xsrf_token).layer(
                    ServiceBuilder::new()
                        .layer(from_fn(no_content))
                        .layer(from_fn(post_only)),
                ),
            )
            .fallback(not_found);

        for endpoint in self.api.endpoints() {
            let ep = Arc::clone(endpoint);
            let handler = move |uri: Uri, headers: HeaderMap, body: Bytes| async move {
                serve_json(&ep, &uri, &headers, body).await
            };
            router = router.route(
                endpoint.path(),
                any(handler).layer(
                    ServiceBuilder::new()
                        .layer(from_fn(post_only))
                        .layer(from_fn_with_state(Arc::clone(&app.xsrf), enforce_xsrf)),
                ),
            );
        }

        // Each router-wide layer wraps the ones added before it, so the
        // origin check goes last and runs first.
        if self.verbose {
            router = router.layer(from_fn(log_request));
        }
        if self.listen.is_loopback() {
            router = router.layer(from_fn(local_only));
        }

        Ok((router.with_state(app), self.api.paths()))
    }
}

fn resolve_hostname(listen: &ListenAddr) -> String {
    if listen.is_loopback() {
        return "localhost".into();
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into())
}

// ── Server ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Serving,
    Closed,
}

/// A running gateway. Dropping it stops accepting connections too.
pub struct GatewayServer {
    local_addr: SocketAddr,
    hostname: String,
    paths: Vec<String>,
    state: ServerState,
    shutdown: CancellationToken,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl GatewayServer {
    pub fn builder(listen: ListenAddr) -> GatewayBuilder {
        GatewayBuilder::new(listen)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Registered API paths, sorted.
    pub fn api_paths(&self) -> &[String] {
        &self.paths
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Stop accepting connections and wait for in-flight requests.
    /// Closing a closed server does nothing.
    pub async fn close(&mut self) -> Result<(), GatewayError> {
        if self.state == ServerState::Closed {
            return Ok(());
        }
        self.state = ServerState::Closed;
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.await.map_err(std::io::Error::other)??;
        }
        info!(addr = %self.local_addr, "gateway closed");
        Ok(())
    }
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn not_found() -> GatewayError {
    GatewayError::NotFound
}

/// The cookie is minted before the page is looked up, so even a 500 hands
/// the peer a usable token.
async fn get_root(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let (cookie, _) = app.xsrf.cookie_for(&peer);
    let set_cookie = [(header::SET_COOKIE, cookie.to_string())];
    match app.asset(INDEX_HTML) {
        Ok(content) => (
            set_cookie,
            [
                (header::CONTENT_TYPE, "text/html"),
                (header::CACHE_CONTROL, app.content.cache_control()),
            ],
            content,
        )
            .into_response(),
        Err(e) => (set_cookie, e).into_response(),
    }
}

async fn get_favicon(State(app): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    let content = app.asset(FAVICON)?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, app.content.cache_control()),
        ],
        content,
    ))
}

async fn post_xsrf_token(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let (cookie, token) = app.xsrf.cookie_for(&peer);
    (
        [(header::SET_COOKIE, cookie.to_string())],
        [
            (header::CONTENT_TYPE, "text/plain"),
            (header::CACHE_CONTROL, CACHE_CONTROL_NONE),
        ],
        token,
    )
}
