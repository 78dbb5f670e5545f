//! Listener and admission pipeline
//!
//! Runs an axum HTTP server that upgrades connections to WebSocket at the
//! configured path. The admission pipeline runs synchronously before the
//! upgrade completes; its rejection order and HTTP statuses are part of the
//! wire contract (403 for filtered IPs, 503 for capacity, 401 for a missing
//! token). CORS is permissive: browser clients connect cross-origin and
//! security comes from the wallet handshake, not origin checking.

use crate::config::{AuthConfig, AuthMethod, Config};
use crate::connection;
use crate::handshake::HandshakeEngine;
use crate::ipfilter;
use crate::now_ms;
use crate::registry::{AuthSeed, ConnectionId, Registry};
use crate::router::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum::routing::get;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

/// Cadence of the background sweeper
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Grace period before an admitted-but-never-upgraded record is reaped
const ATTACH_GRACE_MS: i64 = 30_000;

/// Shared state for all handlers and drivers
pub struct AppState {
    /// Immutable configuration snapshot
    pub config: Arc<Config>,
    /// The shared connection/room substrate
    pub registry: Arc<Registry>,
    /// Frame router
    pub router: Router,
    /// Handshake engine
    pub handshake: HandshakeEngine,
    /// Signaling-only mode: answer non-WebSocket HTTP with 503
    pub ui_disabled: bool,
}

impl AppState {
    /// Assemble the hub from a validated configuration
    pub fn new(config: Config, ui_disabled: bool) -> Arc<Self> {
        let config = Arc::new(config);
        let registry = Arc::new(Registry::new(Arc::clone(&config)));
        let router = Router::new(Arc::clone(&registry), Arc::clone(&config));
        let handshake = HandshakeEngine::new(&config.auth);
        Arc::new(Self {
            config,
            registry,
            router,
            handshake,
            ui_disabled,
        })
    }
}

/// Create the axum router
///
/// Routes:
/// - `GET <wsPath>` - WebSocket upgrade handler
/// - `GET /health` - Health check (200 OK)
/// - fallback - 503 signaling-only JSON when the UI is disabled, 404
///   otherwise (the admin UI collaborator mounts here in a full deployment)
pub fn app(state: Arc<AppState>) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let ws_path = state.config.server.ws_path.clone();
    axum::Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .fallback(fallback_handler)
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "ok"
}

/// Non-WebSocket HTTP requests
async fn fallback_handler(State(state): State<Arc<AppState>>) -> Response {
    if state.ui_disabled {
        let body = serde_json::json!({
            "status": "signaling-only",
            "message": "UI is disabled. WebSocket signaling available at /ws",
            "wsPath": state.config.server.ws_path,
        });
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// WebSocket upgrade handler: admission pipeline, then attach the driver
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let token = params.get("token").map(String::as_str);
    let (conn, handshake_required) = match admit(&state, addr, token) {
        Ok(admitted) => admitted,
        Err(status) => return status.into_response(),
    };

    if state.config.logging.log_connections {
        info!(%conn, remote = %addr, handshake = handshake_required, "connection admitted");
    }
    ws.on_upgrade(move |socket| connection::drive(socket, state, conn, handshake_required))
}

/// The admission pipeline; the Err status goes on the HTTP response verbatim
fn admit(
    state: &AppState,
    addr: SocketAddr,
    token: Option<&str>,
) -> Result<(ConnectionId, bool), StatusCode> {
    let ip = ipfilter::normalize_ip(addr.ip());

    if !ipfilter::is_allowed(&state.config.ip_filters, ip) {
        warn!(%ip, "upgrade rejected by IP filter");
        return Err(StatusCode::FORBIDDEN);
    }
    if let Err(reason) = state.registry.check_capacity(ip) {
        warn!(%ip, %reason, "upgrade rejected at capacity");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let seed = prescreen(&state.config.auth, token)?;
    let handshake_required = matches!(seed, AuthSeed::Handshake);

    let remote_addr = SocketAddr::new(ip, addr.port()).to_string();
    let conn = state
        .registry
        .register(ip, remote_addr, seed, now_ms())
        .map_err(|reason| {
            // Lost the race between the gate above and the insert
            warn!(%ip, %reason, "upgrade rejected at capacity");
            StatusCode::SERVICE_UNAVAILABLE
        })?;
    Ok((conn, handshake_required))
}

/// Pre-upgrade authentication screening
fn prescreen(auth: &AuthConfig, token: Option<&str>) -> Result<AuthSeed, StatusCode> {
    if !auth.enabled || auth.allow_anonymous {
        return Ok(anonymous_seed(auth));
    }
    match auth.method {
        AuthMethod::None => Ok(anonymous_seed(auth)),
        AuthMethod::Token => match token.filter(|t| !t.is_empty()) {
            // The token itself is not validated; its prefix becomes the
            // user identity
            Some(token) => Ok(AuthSeed::Token {
                user_id: format!("user_{}", token.chars().take(8).collect::<String>()),
            }),
            None => Err(StatusCode::UNAUTHORIZED),
        },
        AuthMethod::EthereumHandshake => Ok(AuthSeed::Handshake),
    }
}

fn anonymous_seed(auth: &AuthConfig) -> AuthSeed {
    let suffix: [u8; 4] = rand::random();
    AuthSeed::Anonymous {
        user_id: format!("{}{}", auth.anonymous_prefix, hex::encode(suffix)),
    }
}

/// Bind the configured address and serve until shutdown
pub async fn serve(state: Arc<AppState>) -> std::io::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, ws_path = %state.config.server.ws_path, "signaling server listening");
    serve_on(listener, state).await
}

/// Serve on an already-bound listener (tests bind port 0 themselves)
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
) -> std::io::Result<()> {
    let sweeper = tokio::spawn(sweep_loop(Arc::clone(&state)));

    let app = app(Arc::clone(&state));
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state))
    .await;

    sweeper.abort();
    result
}

/// Periodic cleanup: expired pending handshakes and upgrade-failure leftovers
async fn sweep_loop(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let expired = state.registry.close_expired_pending(now_ms());
        if expired > 0 {
            debug!(expired, "closed pending connections with expired challenges");
        }
        let reaped = state.registry.reap_unattached(now_ms(), ATTACH_GRACE_MS);
        if reaped > 0 {
            debug!(reaped, "reaped records whose upgrade never completed");
        }
    }
}

/// Drain on ctrl-c: every connection gets a normal close
async fn shutdown_signal(state: Arc<AppState>) {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler; rely on the process being killed outright
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, draining connections");
    state.registry.close_all();
}
