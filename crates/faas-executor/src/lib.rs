use bollard::errors::Error as BollardError;
use faas_common::FaasError;
use thiserror::Error;

// Re-export dependencies potentially needed by consumers (like the gateway server)
pub use bollard;
pub use faas_common as common;

pub mod docker;
pub mod readiness;
pub mod test_utils;

pub use docker::DockerProvider;
pub use readiness::{HttpProbe, ProbeType, ReadinessProbe, TcpProbe};

// --- Custom Error Type ---
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Container creation failed: {0}")]
    CreationFailed(#[source] BollardError),
    #[error("Container start failed: {0}")]
    StartFailed(#[source] BollardError),
    #[error("Container stop failed: {0}")]
    StopFailed(#[source] BollardError),
    #[error("Container removal failed: {0}")]
    RemovalFailed(#[source] BollardError),
    #[error("No free host port: {0}")]
    PortUnavailable(#[source] std::io::Error),
}

// Implement conversion from ExecutorError to the common FaasError
impl From<ExecutorError> for FaasError {
    fn from(err: ExecutorError) -> Self {
        FaasError::Provider(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
