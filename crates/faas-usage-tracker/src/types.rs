use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One completed invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub caller: String,
    pub function: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CallRecord {
    pub fn new(
        caller: impl Into<String>,
        function: impl Into<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            caller: caller.into(),
            function: function.into(),
            started_at,
            finished_at,
        }
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionUsage {
    pub call_count: u64,
    pub total_time_ms: u64,
}

/// Aggregated usage for one caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerUsage {
    pub caller: String,
    pub call_count: u64,
    pub total_time_ms: u64,
    pub last_call: Option<DateTime<Utc>>,
    pub functions: BTreeMap<String, FunctionUsage>,
}

impl CallerUsage {
    pub fn new(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            call_count: 0,
            total_time_ms: 0,
            last_call: None,
            functions: BTreeMap::new(),
        }
    }

    pub fn total_time(&self) -> Duration {
        Duration::from_millis(self.total_time_ms)
    }

    pub(crate) fn apply(&mut self, record: &CallRecord) {
        let elapsed_ms = record.duration().as_millis() as u64;
        self.call_count += 1;
        self.total_time_ms = self.total_time_ms.saturating_add(elapsed_ms);
        if self.last_call.map_or(true, |last| record.finished_at > last) {
            self.last_call = Some(record.finished_at);
        }

        let function = self.functions.entry(record.function.clone()).or_default();
        function.call_count += 1;
        function.total_time_ms = function.total_time_ms.saturating_add(elapsed_ms);
    }
}
