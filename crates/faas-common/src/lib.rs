// Re-export dependencies used in public interfaces of common types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaasError {
    #[error("Provider Error: {0}")]
    Provider(String),

    #[error("Orchestration Error: {0}")]
    Orchestration(String),

    #[error("Gateway Error: {0}")]
    Gateway(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal Error: {0}")]
    Internal(String),
}

// Define the primary Result type for FaaS operations
pub type Result<T> = std::result::Result<T, FaasError>;

fn default_port() -> u16 {
    5000
}

fn default_invoke_path() -> String {
    "/invoke".to_string()
}

fn default_ready_path() -> String {
    "/ready".to_string()
}

/// The launch template registered for a function at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTemplate {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    /// Port the runtime listens on inside the sandbox.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_invoke_path")]
    pub invoke_path: String,
    #[serde(default = "default_ready_path")]
    pub ready_path: String,
}

impl FunctionTemplate {
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command,
            port: default_port(),
            invoke_path: default_invoke_path(),
            ready_path: default_ready_path(),
        }
    }
}

/// What a provider hands back after starting one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchedInstance {
    pub provider_id: String,
    pub invoke_url: String,
    pub ready_url: String,
}

/// Turns a function template into a running, addressable instance.
///
/// `stop` and `remove` may be called for instances that are already gone;
/// callers log their errors and never retry.
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    async fn launch(&self, template: &FunctionTemplate, name: &str) -> Result<LaunchedInstance>;
    async fn stop(&self, provider_id: &str) -> Result<()>;
    async fn remove(&self, provider_id: &str) -> Result<()>;
}

/// Decides whether a caller may invoke a function.
pub trait Authorizer: Send + Sync {
    fn is_allowed(&self, caller: &str, function: &str) -> bool;
}

/// Receives one record per completed invocation.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record_call(
        &self,
        caller: &str,
        function: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    );
}
