use crate::config::ScalingConfig;
use crate::instance::{instance_name, InstanceHandle};
use crate::monitor::ColdStartRequest;
use crate::{Error, Result};
use faas_common::{FunctionTemplate, InstanceProvider};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, instrument, warn};

#[derive(Default)]
struct PoolState {
    instances: HashMap<String, Vec<Arc<InstanceHandle>>>,
    name_counters: HashMap<String, u64>,
    closed: bool,
}

/// Aggregate load of one function, input to the scaling decision.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLoad {
    pub function: String,
    pub instances: usize,
    pub unready: usize,
    pub busy: Duration,
    pub ready_time: Duration,
}

impl FunctionLoad {
    /// Busy time over ready time; `None` while no instance has been ready.
    pub fn utilization(&self) -> Option<f64> {
        if self.ready_time.is_zero() {
            None
        } else {
            Some(self.busy.as_secs_f64() / self.ready_time.as_secs_f64())
        }
    }
}

/// Pool state of one function as exposed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionStats {
    pub function: String,
    pub instances: Vec<String>,
    pub ready: usize,
    pub busy_ms: u64,
}

/// Running instances of every registered function.
///
/// All mutations go through one mutex; provider calls happen outside it.
pub struct InstancePool {
    provider: Arc<dyn InstanceProvider>,
    templates: HashMap<String, FunctionTemplate>,
    state: Mutex<PoolState>,
    pub(crate) config: ScalingConfig,
    pub(crate) cold_start: Mutex<Option<mpsc::Sender<ColdStartRequest>>>,
    teardown_failures: Arc<AtomicU64>,
}

impl InstancePool {
    pub fn new(
        provider: Arc<dyn InstanceProvider>,
        templates: HashMap<String, FunctionTemplate>,
        config: ScalingConfig,
    ) -> Self {
        Self {
            provider,
            templates,
            state: Mutex::new(PoolState::default()),
            config,
            cold_start: Mutex::new(None),
            teardown_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_registered(&self, function: &str) -> bool {
        self.templates.contains_key(function)
    }

    pub fn functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    /// Stop or remove calls that failed since startup.
    pub fn teardown_failures(&self) -> u64 {
        self.teardown_failures.load(Ordering::Relaxed)
    }

    /// Starts one new instance of `function`.
    ///
    /// The name is reserved under the pool lock, so concurrent launches never
    /// collide; the provider call itself runs unlocked. A failed launch leaves
    /// the pool unchanged apart from the consumed counter value.
    #[instrument(skip(self), fields(function = %function))]
    pub async fn launch(&self, function: &str) -> Result<Arc<InstanceHandle>> {
        let template = self
            .templates
            .get(function)
            .ok_or_else(|| Error::FunctionNotFound(function.to_string()))?;

        let seq = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(Error::ShuttingDown);
            }
            let counter = state.name_counters.entry(function.to_string()).or_insert(0);
            let seq = *counter;
            *counter += 1;
            seq
        };
        let name = instance_name(function, seq);

        info!(instance = %name, image = %template.image, "Launching instance");
        let launched = self
            .provider
            .launch(template, &name)
            .await
            .map_err(|source| {
                error!(instance = %name, error = %source, "Provider failed to launch instance");
                Error::LaunchFailed {
                    function: function.to_string(),
                    source,
                }
            })?;

        let handle = Arc::new(InstanceHandle::new(function, seq, launched));
        {
            let mut state = self.state.lock().await;
            if !state.closed {
                state
                    .instances
                    .entry(function.to_string())
                    .or_default()
                    .push(handle.clone());
                info!(instance = %name, url = %handle.invoke_url(), "Instance launched");
                return Ok(handle);
            }
        }

        warn!(instance = %name, "Pool closed during launch, tearing instance down");
        teardown(self.provider.clone(), self.teardown_failures.clone(), handle).await;
        Err(Error::ShuttingDown)
    }

    /// Picks uniformly at random among the ready instances of `function`.
    pub async fn pick_ready_instance(&self, function: &str) -> Result<Arc<InstanceHandle>> {
        let state = self.state.lock().await;
        let handles = state
            .instances
            .get(function)
            .filter(|handles| !handles.is_empty())
            .ok_or_else(|| Error::NoInstance(function.to_string()))?;

        let ready: Vec<&Arc<InstanceHandle>> = handles.iter().filter(|h| h.is_ready()).collect();
        if ready.is_empty() {
            return Err(Error::NoReadyInstance(function.to_string()));
        }
        let idx = rand::rng().random_range(0..ready.len());
        Ok(ready[idx].clone())
    }

    /// Most recently launched instance of `function`, ready or not.
    pub async fn newest_instance(&self, function: &str) -> Option<Arc<InstanceHandle>> {
        let state = self.state.lock().await;
        let handles = state.instances.get(function)?;
        youngest_index(handles).map(|idx| handles[idx].clone())
    }

    /// Removes the youngest instance of `function` and tears it down.
    ///
    /// Teardown failures are logged and counted; the handle is gone from the
    /// pool either way.
    #[instrument(skip(self), fields(function = %function))]
    pub async fn evict(&self, function: &str) -> Result<Arc<InstanceHandle>> {
        let victim = {
            let mut state = self.state.lock().await;
            let handles = state
                .instances
                .get_mut(function)
                .filter(|handles| !handles.is_empty())
                .ok_or_else(|| Error::NoInstance(function.to_string()))?;
            let idx = youngest_index(handles).ok_or_else(|| Error::NoInstance(function.to_string()))?;
            handles.swap_remove(idx)
        };

        info!(instance = %victim.name(), "Evicting instance");
        teardown(self.provider.clone(), self.teardown_failures.clone(), victim.clone()).await;
        Ok(victim)
    }

    /// Empties the pool and tears every instance down concurrently. Launches
    /// completing afterwards are torn down immediately.
    pub async fn shutdown_all(&self) {
        let drained: Vec<Arc<InstanceHandle>> = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.instances.drain().flat_map(|(_, handles)| handles).collect()
        };

        info!(count = drained.len(), "Shutting down all instances");
        let tasks = drained.into_iter().map(|handle| {
            tokio::spawn(teardown(
                self.provider.clone(),
                self.teardown_failures.clone(),
                handle,
            ))
        });
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!("Teardown task failed: {}", e);
            }
        }
    }

    pub async fn instance_count(&self, function: &str) -> usize {
        let state = self.state.lock().await;
        state.instances.get(function).map(Vec::len).unwrap_or(0)
    }

    pub async fn instances(&self, function: &str) -> Vec<Arc<InstanceHandle>> {
        let state = self.state.lock().await;
        state.instances.get(function).cloned().unwrap_or_default()
    }

    /// Load per function with at least one instance, taken under one lock.
    pub async fn load_snapshot(&self, now: Instant) -> Vec<FunctionLoad> {
        let state = self.state.lock().await;
        let mut loads: Vec<FunctionLoad> = state
            .instances
            .iter()
            .filter(|(_, handles)| !handles.is_empty())
            .map(|(function, handles)| FunctionLoad {
                function: function.clone(),
                instances: handles.len(),
                unready: handles.iter().filter(|h| !h.is_ready()).count(),
                busy: handles.iter().map(|h| h.busy_time()).sum(),
                ready_time: handles.iter().map(|h| h.ready_duration(now)).sum(),
            })
            .collect();
        loads.sort_by(|a, b| a.function.cmp(&b.function));
        loads
    }

    /// Operator view of every registered function.
    pub async fn snapshot(&self) -> Vec<FunctionStats> {
        let state = self.state.lock().await;
        self.functions()
            .into_iter()
            .map(|function| {
                let handles = state.instances.get(&function).map(Vec::as_slice).unwrap_or(&[]);
                FunctionStats {
                    instances: handles.iter().map(|h| h.name().to_string()).collect(),
                    ready: handles.iter().filter(|h| h.is_ready()).count(),
                    busy_ms: handles.iter().map(|h| h.busy_time().as_millis() as u64).sum(),
                    function,
                }
            })
            .collect()
    }
}

fn youngest_index(handles: &[Arc<InstanceHandle>]) -> Option<usize> {
    handles
        .iter()
        .enumerate()
        .max_by_key(|(_, h)| (h.launched_at(), h.seq()))
        .map(|(idx, _)| idx)
}

async fn teardown(
    provider: Arc<dyn InstanceProvider>,
    failures: Arc<AtomicU64>,
    handle: Arc<InstanceHandle>,
) {
    if let Err(e) = provider.stop(handle.provider_id()).await {
        failures.fetch_add(1, Ordering::Relaxed);
        warn!(instance = %handle.name(), error = %e, "Failed to stop instance");
    }
    if let Err(e) = provider.remove(handle.provider_id()).await {
        failures.fetch_add(1, Ordering::Relaxed);
        warn!(instance = %handle.name(), error = %e, "Failed to remove instance");
    }
}
