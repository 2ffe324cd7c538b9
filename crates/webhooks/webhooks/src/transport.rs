//! Outbound HTTP transport.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::WebhookResult;

/// A fully built webhook POST.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub timeout: Duration,
}

impl OutboundRequest {
    /// Looks up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response to a webhook POST, whatever its status.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Sends webhook requests.
///
/// Any response, 2xx or not, is `Ok`; `Err` means the endpoint was never
/// reached (DNS, connect, TLS, timeout).
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, request: &OutboundRequest) -> WebhookResult<TransportResponse>;
}

/// `reqwest`-backed transport.
#[cfg(feature = "http-client")]
pub struct HttpTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http-client")]
impl HttpTransport {
    /// Creates a transport with a fresh connection pool.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Creates a transport sharing an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http-client")]
impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "http-client")]
#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(&self, request: &OutboundRequest) -> WebhookResult<TransportResponse> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout);

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        let response = builder.body(request.body.clone()).send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = body_or_empty(&request.url, response.text().await);

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// Keeps the status of a response whose body could not be read.
#[cfg_attr(not(feature = "http-client"), allow(dead_code))]
fn body_or_empty<E: std::fmt::Display>(url: &str, body: Result<String, E>) -> String {
    body.unwrap_or_else(|e| {
        tracing::debug!(url = %url, "Failed to read response body: {}", e);
        String::new()
    })
}
