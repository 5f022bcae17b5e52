//! Instance pool, autoscaling monitor and admission control for the dispatcher.
//!
//! Request flow through [`Dispatcher::dispatch`]:
//! authorize, resolve an instance (cold-starting one through the monitor when
//! none is ready), wait for readiness, admit, forward, account, release.

use faas_common::FaasError;
use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod dispatch;
pub mod instance;
pub mod limiter;
pub mod monitor;
pub mod pool;
pub mod readiness;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{DispatchConfig, ScalingConfig};
pub use dispatch::Dispatcher;
pub use instance::InstanceHandle;
pub use limiter::{AdmissionLimiter, AdmissionPermit};
pub use monitor::{MonitorHandle, ScaleDecision};
pub use pool::{FunctionLoad, FunctionStats, InstancePool};
pub use readiness::ReadinessProber;

pub use faas_common as common;

// --- Custom Error Type ---
#[derive(Error, Debug)]
pub enum Error {
    #[error("Function not registered: {0}")]
    FunctionNotFound(String),

    #[error("No instance running for function {0}")]
    NoInstance(String),

    #[error("No ready instance for function {0}")]
    NoReadyInstance(String),

    #[error("Failed to launch instance for function {function}: {source}")]
    LaunchFailed {
        function: String,
        #[source]
        source: FaasError,
    },

    #[error("No instance obtained for function {function} after {attempts} attempts: {last_error}")]
    ColdStartExhausted {
        function: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Autoscaling monitor is not running")]
    MonitorUnavailable,

    #[error("Autoscaling monitor is already running")]
    MonitorAlreadyRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Instance pool is shutting down")]
    ShuttingDown,

    #[error("Instance {instance} not ready within {timeout:?}")]
    ReadinessTimeout { instance: String, timeout: Duration },

    #[error("Admission for function {function} timed out after {timeout:?}")]
    AdmissionTimeout { function: String, timeout: Duration },

    #[error("Caller {caller} is not allowed to invoke {function}")]
    Unauthorized { caller: String, function: String },

    #[error("Forwarding to instance {instance} failed: {message}")]
    Forward { instance: String, message: String },
}

impl From<Error> for FaasError {
    fn from(err: Error) -> Self {
        match err {
            Error::FunctionNotFound(function) => FaasError::NotFound(function),
            Error::InvalidConfig(message) => FaasError::Config(message),
            other => FaasError::Orchestration(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
