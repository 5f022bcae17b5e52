//! In-memory collaborators for exercising the dispatcher without a sandbox
//! runtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use faas_common::{
    Authorizer, FaasError, FunctionTemplate, InstanceProvider, LaunchedInstance, Result, UsageSink,
};
use faas_executor::ReadinessProbe;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Templates for the given function names, all pointing at one image.
pub fn templates(functions: &[&str]) -> HashMap<String, FunctionTemplate> {
    functions
        .iter()
        .map(|f| (f.to_string(), FunctionTemplate::new("runtime:latest", vec![])))
        .collect()
}

/// Provider whose instances all answer at `base_url`.
#[derive(Debug, Default)]
pub struct MockProvider {
    base_url: String,
    launch_delay: Duration,
    fail_next: AtomicUsize,
    fail_teardown: AtomicBool,
    launched: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    /// The next `count` launches fail.
    pub fn fail_next_launches(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn fail_teardown(&self, fail: bool) {
        self.fail_teardown.store(fail, Ordering::SeqCst);
    }

    pub fn launch_count(&self) -> usize {
        locked(&self.launched).len()
    }

    pub fn launched_names(&self) -> Vec<String> {
        locked(&self.launched).clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        locked(&self.stopped).clone()
    }

    pub fn removed(&self) -> Vec<String> {
        locked(&self.removed).clone()
    }
}

#[async_trait]
impl InstanceProvider for MockProvider {
    async fn launch(&self, _template: &FunctionTemplate, name: &str) -> Result<LaunchedInstance> {
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FaasError::Provider(format!("launch of {name} refused")));
        }

        locked(&self.launched).push(name.to_string());
        Ok(LaunchedInstance {
            provider_id: format!("mock-{name}"),
            invoke_url: format!("{}/invoke", self.base_url),
            ready_url: format!("{}/ready", self.base_url),
        })
    }

    async fn stop(&self, provider_id: &str) -> Result<()> {
        locked(&self.stopped).push(provider_id.to_string());
        if self.fail_teardown.load(Ordering::SeqCst) {
            return Err(FaasError::Provider(format!("stop of {provider_id} refused")));
        }
        Ok(())
    }

    async fn remove(&self, provider_id: &str) -> Result<()> {
        locked(&self.removed).push(provider_id.to_string());
        if self.fail_teardown.load(Ordering::SeqCst) {
            return Err(FaasError::Provider(format!("remove of {provider_id} refused")));
        }
        Ok(())
    }
}

/// Probe with a switchable answer.
#[derive(Debug, Default)]
pub struct StaticProbe {
    ready: AtomicBool,
    probes: AtomicUsize,
}

impl StaticProbe {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessProbe for StaticProbe {
    async fn probe(&self, _target: &str) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn is_allowed(&self, _caller: &str, _function: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub caller: String,
    pub function: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Usage sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingUsage {
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingUsage {
    pub fn calls(&self) -> Vec<RecordedCall> {
        locked(&self.calls).clone()
    }
}

#[async_trait]
impl UsageSink for RecordingUsage {
    async fn record_call(
        &self,
        caller: &str,
        function: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) {
        locked(&self.calls).push(RecordedCall {
            caller: caller.to_string(),
            function: function.to_string(),
            started_at,
            finished_at,
        });
    }
}
