//! Proxy server glue
//!
//! Drives one flow through the pipeline: request hook, upstream forward
//! (skipped when the pipeline already produced a response), response hook,
//! and conversion back to an HTTP response. The MITM/TLS termination layer
//! in front of this is a deployment concern; the server accepts both
//! absolute-form proxy requests and Host-based reverse-proxy requests.

use crate::pipeline::ChaosPipeline;
use crate::upstream::UpstreamClient;
use agentchaos_core::{Flow, FlowRequest, FlowResponse};
use agentchaos_dashboard::DashboardServer;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Default port for the in-process dashboard.
const DASHBOARD_PORT: u16 = 8081;

/// The proxy front end: pipeline plus upstream client.
pub struct ChaosProxy {
    pipeline: Arc<ChaosPipeline>,
    upstream: UpstreamClient,
    dashboard: Mutex<Option<DashboardServer>>,
}

impl ChaosProxy {
    pub fn new(pipeline: Arc<ChaosPipeline>) -> Self {
        Self {
            pipeline,
            upstream: UpstreamClient::new(),
            dashboard: Mutex::new(None),
        }
    }

    pub fn pipeline(&self) -> &Arc<ChaosPipeline> {
        &self.pipeline
    }

    /// Start the dashboard inside the proxy process when
    /// `CHAOS_DASHBOARD_AUTOSTART` is set. The dashboard masks the outbound
    /// proxy environment for its own socket so it never routes through us.
    pub async fn start_dashboard_if_configured(&self) {
        if !self.pipeline.settings().dashboard_autostart {
            return;
        }
        let mut server = DashboardServer::new(
            "127.0.0.1",
            DASHBOARD_PORT,
            self.pipeline.events().clone(),
            self.pipeline.settings().runs_dir.clone(),
        );
        match server.start().await {
            Ok(addr) => {
                info!("Dashboard server started in proxy process on {addr}");
                *self.dashboard.lock() = Some(server);
            }
            Err(e) => warn!("Failed to start dashboard server: {e}"),
        }
    }

    /// Stop the in-process dashboard, restoring the proxy environment.
    pub fn stop_dashboard(&self) {
        if let Some(mut server) = self.dashboard.lock().take() {
            server.stop();
        }
    }

    /// Drive one flow end to end. After this returns the flow carries the
    /// response the client should see.
    pub async fn handle_flow(&self, flow: &mut Flow) {
        self.pipeline.request(flow).await;

        // Auth denial and playback answers never reach the network or the
        // response-phase strategies.
        if flow.metadata.aborted || flow.metadata.from_playback {
            return;
        }

        if flow.response.is_none() {
            match self.upstream.send(&flow.request).await {
                Ok(upstream_response) => {
                    // Headers are in; the TTFT clock starts here.
                    self.pipeline.response_headers(flow);
                    match UpstreamClient::read_response(upstream_response).await {
                        Ok(response) => flow.response = Some(response),
                        Err(e) => {
                            error!("Failed reading upstream response: {e}");
                            flow.response = Some(bad_gateway(&e.to_string()));
                        }
                    }
                }
                Err(e) => {
                    error!("Upstream request failed: {e}");
                    flow.response = Some(bad_gateway(&e.to_string()));
                }
            }
        }

        self.pipeline.response(flow).await;
    }

    /// Router handling every method/path through the proxy pipeline.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new().fallback(proxy_handler).with_state(self.clone())
    }

    /// Bind and serve until the task is cancelled.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        self.start_dashboard_if_configured().await;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Chaos proxy listening on {addr} (mode={})", self.pipeline.mode());
        axum::serve(listener, self.router()).await
    }
}

fn bad_gateway(detail: &str) -> FlowResponse {
    FlowResponse::make(
        502,
        serde_json::json!({"error": "Upstream request failed", "detail": detail})
            .to_string()
            .into_bytes(),
        &[("Content-Type", "application/json")],
    )
}

/// Absolute target URL for the flow: absolute-form proxy requests carry it in
/// the request line, reverse-proxy requests derive it from the Host header.
fn resolve_target_url(parts: &http::request::Parts) -> Option<String> {
    let uri = &parts.uri;
    if uri.scheme().is_some() {
        return Some(uri.to_string());
    }
    let host = parts.headers.get(http::header::HOST)?.to_str().ok()?;
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Some(format!("http://{host}{path_and_query}"))
}

async fn proxy_handler(State(proxy): State<Arc<ChaosProxy>>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    let Some(url) = resolve_target_url(&parts) else {
        return plain_response(StatusCode::BAD_REQUEST, "Missing Host header");
    };

    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return plain_response(StatusCode::BAD_REQUEST, &format!("Failed to read request body: {e}"));
        }
    };

    let mut flow_request = FlowRequest::new(parts.method, url);
    flow_request.headers = parts.headers;
    flow_request.body = body_bytes.to_vec();

    let mut flow = Flow::new(flow_request);
    proxy.handle_flow(&mut flow).await;

    let Some(flow_response) = flow.response else {
        return plain_response(StatusCode::BAD_GATEWAY, "No response produced");
    };
    into_axum_response(flow_response)
}

fn into_axum_response(response: FlowResponse) -> Response {
    let mut builder = Response::builder().status(
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );
    for (name, value) in &response.headers {
        // The transport owns framing headers.
        if name == &http::header::CONTENT_LENGTH || name == &http::header::TRANSFER_ENCODING {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Response build failed"))
}

fn plain_response(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(Body::from(message.to_owned()))
        .unwrap_or_default()
}
