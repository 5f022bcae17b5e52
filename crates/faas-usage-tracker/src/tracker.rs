use crate::{CallRecord, CallerUsage, Result, UsageError, UsageStorage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use faas_common::UsageSink;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct UsageTracker {
    storage: Arc<dyn UsageStorage>,
}

impl UsageTracker {
    pub fn new(storage: Arc<dyn UsageStorage>) -> Self {
        Self { storage }
    }

    pub async fn record(&self, record: CallRecord) -> Result<()> {
        self.storage.record_call(&record).await
    }

    pub async fn caller_usage(&self, caller: &str) -> Result<CallerUsage> {
        self.storage.get_caller(caller).await
    }

    pub async fn all_usage(&self) -> Result<Vec<CallerUsage>> {
        self.storage.list_callers().await
    }

    /// Total time spent serving `caller`; zero for unknown callers.
    pub async fn total_time(&self, caller: &str) -> Result<Duration> {
        match self.storage.get_caller(caller).await {
            Ok(usage) => Ok(usage.total_time()),
            Err(UsageError::CallerNotFound(_)) => Ok(Duration::ZERO),
            Err(e) => Err(e),
        }
    }

    pub async fn call_count(&self, caller: &str) -> Result<u64> {
        match self.storage.get_caller(caller).await {
            Ok(usage) => Ok(usage.call_count),
            Err(UsageError::CallerNotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub async fn history(
        &self,
        caller: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CallRecord>> {
        self.storage.get_call_history(caller, start, end).await
    }
}

#[async_trait]
impl UsageSink for UsageTracker {
    async fn record_call(
        &self,
        caller: &str,
        function: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) {
        let record = CallRecord::new(caller, function, started_at, finished_at);
        debug!(%caller, %function, elapsed = ?record.duration(), "Recording call");
        // Accounting never fails the request it describes.
        if let Err(e) = self.record(record).await {
            warn!(%caller, %function, error = %e, "Failed to record usage");
        }
    }
}
