//! Reverse proxy from the dispatcher to a function instance.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Response};
use faas_orchestrator::{Error, InstanceHandle, Result};
use std::time::Duration;
use tracing::debug;

pub struct HttpProxy {
    client: reqwest::Client,
}

impl HttpProxy {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(64)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Sends the request to the instance's invoke endpoint and buffers the
    /// full answer, so busy time covers the whole exchange.
    pub async fn forward(
        &self,
        instance: &InstanceHandle,
        method: Method,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<Body>> {
        let url = match query {
            Some(query) => format!("{}?{}", instance.invoke_url(), query),
            None => instance.invoke_url().to_string(),
        };
        debug!(instance = %instance.name(), %url, %method, "Proxying request");

        let mut request = self.client.request(method, &url);
        for (name, value) in headers {
            if !is_hop_by_hop(name.as_str()) && name != "host" {
                request = request.header(name.clone(), value.clone());
            }
        }

        let forward_error = |e: reqwest::Error| Error::Forward {
            instance: instance.name().to_string(),
            message: e.to_string(),
        };
        let upstream = request.body(body).send().await.map_err(forward_error)?;
        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();
        let bytes = upstream.bytes().await.map_err(forward_error)?;

        let mut response = Response::builder().status(status);
        for (name, value) in upstream_headers.iter() {
            if !is_hop_by_hop(name.as_str()) {
                response = response.header(name, value);
            }
        }
        response.body(Body::from(bytes)).map_err(|e| Error::Forward {
            instance: instance.name().to_string(),
            message: e.to_string(),
        })
    }
}

/// Headers scoped to a single connection, never forwarded.
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
