//! Dashboard HTTP/WebSocket server
//!
//! Serves the dashboard page, a WebSocket feed of live events, and the
//! historical run endpoints. When running inside the proxy process the server
//! masks the outbound proxy environment for its own socket so it never routes
//! through the proxy it belongs to, and restores the variables on stop.

use crate::broadcaster::EventBroadcaster;
use crate::history;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const DASHBOARD_HTML: &str = include_str!("../assets/index.html");

struct ServerState {
    broadcaster: EventBroadcaster,
    runs_dir: PathBuf,
}

/// Saved proxy environment, restored when the dashboard stops.
struct ProxyEnvGuard {
    http_proxy: Option<String>,
    https_proxy: Option<String>,
    no_proxy: Option<String>,
}

impl ProxyEnvGuard {
    /// Mask `HTTP_PROXY`/`HTTPS_PROXY` and extend `NO_PROXY` with the
    /// dashboard's own host:port.
    fn mask(host: &str, port: u16) -> Self {
        let saved = Self {
            http_proxy: std::env::var("HTTP_PROXY").ok(),
            https_proxy: std::env::var("HTTPS_PROXY").ok(),
            no_proxy: std::env::var("NO_PROXY").ok(),
        };

        std::env::remove_var("HTTP_PROXY");
        std::env::remove_var("HTTPS_PROXY");

        let mut entries: Vec<String> = saved
            .no_proxy
            .as_deref()
            .map(|raw| raw.split(',').filter(|s| !s.is_empty()).map(str::to_owned).collect())
            .unwrap_or_default();
        entries.extend([
            "127.0.0.1".to_owned(),
            "localhost".to_owned(),
            format!("{host}:{port}"),
        ]);
        std::env::set_var("NO_PROXY", entries.join(","));

        saved
    }

    fn restore(&self) {
        match &self.http_proxy {
            Some(value) => std::env::set_var("HTTP_PROXY", value),
            None => std::env::remove_var("HTTP_PROXY"),
        }
        match &self.https_proxy {
            Some(value) => std::env::set_var("HTTPS_PROXY", value),
            None => std::env::remove_var("HTTPS_PROXY"),
        }
        match &self.no_proxy {
            Some(value) => std::env::set_var("NO_PROXY", value),
            None => std::env::remove_var("NO_PROXY"),
        }
    }
}

/// WebSocket server pushing real-time events to dashboard clients.
pub struct DashboardServer {
    host: String,
    port: u16,
    state: Arc<ServerState>,
    env_guard: ProxyEnvGuard,
    server_handle: Option<JoinHandle<()>>,
}

impl DashboardServer {
    pub fn new(host: impl Into<String>, port: u16, broadcaster: EventBroadcaster, runs_dir: PathBuf) -> Self {
        let host = host.into();
        let env_guard = ProxyEnvGuard::mask(&host, port);
        info!("DashboardServer initialized: {host}:{port} (proxy disabled for dashboard)");
        Self {
            host,
            port,
            state: Arc::new(ServerState {
                broadcaster,
                runs_dir,
            }),
            env_guard,
            server_handle: None,
        }
    }

    pub fn router(&self) -> Router {
        Self::build_router(self.state.clone())
    }

    fn build_router(state: Arc<ServerState>) -> Router {
        Router::new()
            .route("/", get(serve_dashboard))
            .route("/ws", get(ws_handler))
            .route("/api/runs", get(list_runs_handler))
            .route("/api/runs/{run_id}/summary", get(run_summary_handler))
            .route("/api/runs/{run_id}/events", get(run_events_handler))
            .with_state(state)
    }

    /// Bind and start serving in a background task. Returns the bound
    /// address.
    pub async fn start(&mut self) -> std::io::Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind((self.host.as_str(), self.port)).await?;
        let addr = listener.local_addr()?;
        let router = Self::build_router(self.state.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("Dashboard server error: {e}");
            }
        });
        self.server_handle = Some(handle);
        info!("Dashboard server listening on {addr}");
        Ok(addr)
    }

    /// Stop the server and restore the proxy environment.
    pub fn stop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
        self.env_guard.restore();
        info!("Dashboard server stopped");
    }
}

impl Drop for DashboardServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ServerState>) {
    let mut events = state.broadcaster.subscribe();
    debug!("Dashboard client connected ({} total)", state.broadcaster.subscriber_count());

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(payload) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            // Client went away; drop silently.
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("Dashboard client lagged, {missed} events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    debug!("Dashboard client disconnected");
}

async fn list_runs_handler(State(state): State<Arc<ServerState>>) -> Json<serde_json::Value> {
    let runs = history::list_runs(&state.runs_dir);
    Json(serde_json::json!({ "runs": runs }))
}

async fn run_summary_handler(
    State(state): State<Arc<ServerState>>,
    AxumPath(run_id): AxumPath<String>,
) -> Response {
    match history::run_summary(&state.runs_dir, &run_id) {
        Some(summary) => Json(summary).into_response(),
        None => (StatusCode::NOT_FOUND, "Run log not found").into_response(),
    }
}

async fn run_events_handler(
    State(state): State<Arc<ServerState>>,
    AxumPath(run_id): AxumPath<String>,
) -> Response {
    match history::run_events(&state.runs_dir, &run_id) {
        Some(events) => Json(serde_json::json!({ "events": events })).into_response(),
        None => (StatusCode::NOT_FOUND, "Run log not found").into_response(),
    }
}
