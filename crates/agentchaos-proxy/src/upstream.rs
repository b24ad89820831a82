//! Upstream forwarding
//!
//! Sends the (possibly mutated) request to the real destination. The client
//! ignores proxy environment variables (this process is the proxy) and
//! performs no transparent decompression, so `Content-Encoding` survives for
//! tape recording and compression-aware strategies.

use agentchaos_core::{canonical_reason, ChaosError, FlowRequest, FlowResponse};
use http::header::{HeaderMap, CONTENT_LENGTH, HOST};

/// Thin wrapper around a reqwest client configured for proxy duty.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Send the request upstream. The returned response has headers available
    /// immediately; the body has not been read yet (TTFT is measured between
    /// this call and [`UpstreamClient::read_response`]).
    pub async fn send(&self, request: &FlowRequest) -> Result<reqwest::Response, ChaosError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            // Host derives from the URL; Content-Length from the body.
            if name == &HOST || name == &CONTENT_LENGTH {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }

        self.client
            .request(request.method.clone(), &request.url)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| ChaosError::Strategy(format!("Upstream request failed: {e}")))
    }

    /// Drain the upstream response into a flow response.
    pub async fn read_response(response: reqwest::Response) -> Result<FlowResponse, ChaosError> {
        let status_code = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ChaosError::Strategy(format!("Failed to read upstream body: {e}")))?;

        Ok(FlowResponse {
            status_code,
            reason: canonical_reason(status_code).to_owned(),
            headers,
            body: body.to_vec(),
        })
    }

    /// Convenience: send and drain in one step.
    pub async fn forward(&self, request: &FlowRequest) -> Result<FlowResponse, ChaosError> {
        let response = self.send(request).await?;
        Self::read_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_forward_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search_flights"))
            .and(header("x-agent-role", "planner"))
            .and(body_string(r#"{"origin":"JFK"}"#))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"flights":[]}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let mut request =
            FlowRequest::new(Method::POST, format!("{}/search_flights", server.uri()));
        request.set_header("X-Agent-Role", "planner");
        request.set_text(r#"{"origin":"JFK"}"#);

        let response = UpstreamClient::new().forward(&request).await.unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.body, br#"{"flights":[]}"#);
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_errors() {
        let request = FlowRequest::new(Method::GET, "http://127.0.0.1:1/never");
        assert!(UpstreamClient::new().forward(&request).await.is_err());
    }
}
