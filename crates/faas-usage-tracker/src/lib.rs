// FaaS Usage Tracker - per-caller accounting of completed invocations
use thiserror::Error;

mod storage;
mod tracker;
mod types;

pub use storage::{InMemoryStorage, UsageStorage};
pub use tracker::UsageTracker;
pub use types::*;

// Error Types
#[derive(Error, Debug)]
pub enum UsageError {
    #[error("Caller not found: {0}")]
    CallerNotFound(String),
    #[error("Invalid call record: {message}")]
    InvalidRecord { message: String },
}

pub type Result<T> = std::result::Result<T, UsageError>;
