use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeType {
    Http,
    Tcp,
}

/// A single readiness check against an instance's readiness endpoint.
///
/// Implementations answer one question per call and never retry; polling
/// cadence and deadlines belong to the caller.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn probe(&self, target: &str) -> bool;
}

/// Succeeds when `GET target` answers with a 2xx status.
#[derive(Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(request_timeout: Duration) -> Self {
        // Builder only fails on TLS backend init; fall back to the default client.
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn probe(&self, target: &str) -> bool {
        match self.client.get(target).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("HTTP check failed for {}: {}", target, e);
                false
            }
        }
    }
}

/// Succeeds when a TCP connection to `host:port` can be opened.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    async fn probe(&self, target: &str) -> bool {
        use tokio::net::TcpStream;

        let addr = target
            .trim_start_matches("http://")
            .split('/')
            .next()
            .unwrap_or(target);

        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!("TCP check failed for {}: {}", addr, e);
                false
            }
            Err(_) => {
                tracing::debug!("TCP check timed out for {}", addr);
                false
            }
        }
    }
}

/// Builds the probe configured for a dispatcher.
pub fn probe_for(probe_type: ProbeType, per_probe_timeout: Duration) -> std::sync::Arc<dyn ReadinessProbe> {
    match probe_type {
        ProbeType::Http => std::sync::Arc::new(HttpProbe::new(per_probe_timeout)),
        ProbeType::Tcp => std::sync::Arc::new(TcpProbe::new(per_probe_timeout)),
    }
}
