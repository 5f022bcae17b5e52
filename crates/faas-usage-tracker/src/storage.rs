use crate::{CallRecord, CallerUsage, Result, UsageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait UsageStorage: Send + Sync {
    async fn record_call(&self, record: &CallRecord) -> Result<()>;
    async fn get_caller(&self, caller: &str) -> Result<CallerUsage>;
    async fn list_callers(&self) -> Result<Vec<CallerUsage>>;
    async fn get_call_history(
        &self,
        caller: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CallRecord>>;
}

const DEFAULT_HISTORY_LIMIT: usize = 10_000;

// In-memory storage implementation for development/testing
pub struct InMemoryStorage {
    callers: Arc<RwLock<HashMap<String, CallerUsage>>>,
    history: Arc<RwLock<VecDeque<CallRecord>>>,
    history_limit: usize,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Keeps at most `limit` raw records; aggregates are never dropped.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            callers: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            history_limit: limit,
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageStorage for InMemoryStorage {
    async fn record_call(&self, record: &CallRecord) -> Result<()> {
        if record.finished_at < record.started_at {
            return Err(UsageError::InvalidRecord {
                message: format!(
                    "call by {} to {} finished before it started",
                    record.caller, record.function
                ),
            });
        }

        self.callers
            .write()
            .await
            .entry(record.caller.clone())
            .or_insert_with(|| CallerUsage::new(record.caller.clone()))
            .apply(record);

        if self.history_limit > 0 {
            let mut history = self.history.write().await;
            if history.len() == self.history_limit {
                history.pop_front();
            }
            history.push_back(record.clone());
        }
        Ok(())
    }

    async fn get_caller(&self, caller: &str) -> Result<CallerUsage> {
        self.callers
            .read()
            .await
            .get(caller)
            .cloned()
            .ok_or_else(|| UsageError::CallerNotFound(caller.to_string()))
    }

    async fn list_callers(&self) -> Result<Vec<CallerUsage>> {
        let mut callers: Vec<CallerUsage> = self.callers.read().await.values().cloned().collect();
        callers.sort_by(|a, b| a.caller.cmp(&b.caller));
        Ok(callers)
    }

    async fn get_call_history(
        &self,
        caller: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CallRecord>> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .filter(|r| r.caller == caller && r.started_at >= start && r.started_at < end)
            .cloned()
            .collect())
    }
}
