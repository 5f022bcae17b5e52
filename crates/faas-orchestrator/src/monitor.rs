//! Autoscaling monitor.
//!
//! A single background task owns every scaling decision. It serves cold-start
//! requests from the dispatch path and, on each tick, compares per-function
//! utilization against the configured bounds. Cold starts and ticks are
//! serialized, so at most one scaling action runs at a time. When both are
//! pending the loop picks between them at random, so neither input starves
//! the other.

use crate::config::ScalingConfig;
use crate::instance::InstanceHandle;
use crate::pool::{FunctionLoad, InstancePool};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub(crate) struct ColdStartRequest {
    function: String,
    reply: oneshot::Sender<Result<Arc<InstanceHandle>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Up,
    Down,
    Hold,
}

/// Decides the action for one function from its aggregate load.
///
/// Functions with an unready instance, too little busy time or no ready time
/// are left alone. Scale-down never removes the last instance.
pub fn decide(load: &FunctionLoad, config: &ScalingConfig) -> ScaleDecision {
    if load.unready > 0 || load.busy < config.min_busy_time {
        return ScaleDecision::Hold;
    }
    let Some(ratio) = load.utilization() else {
        return ScaleDecision::Hold;
    };
    if ratio > config.upper_bound {
        ScaleDecision::Up
    } else if ratio < config.lower_bound && load.instances > 1 {
        ScaleDecision::Down
    } else {
        ScaleDecision::Hold
    }
}

/// Running monitor. Dropping the handle also stops the task.
pub struct MonitorHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signals the loop and waits for it to finish its current step.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            error!("Autoscaling monitor task failed: {}", e);
        }
    }
}

impl InstancePool {
    /// Spawns the monitor. Only one may run per pool.
    pub async fn start_monitor(self: &Arc<Self>) -> Result<MonitorHandle> {
        if self.config.tick_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "tick_interval must be positive".to_string(),
            ));
        }
        let mut sender = self.cold_start.lock().await;
        if sender.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(Error::MonitorAlreadyRunning);
        }

        let (tx, rx) = mpsc::channel(self.config.cold_start_queue.max(1));
        *sender = Some(tx);

        let (stop_tx, stop_rx) = oneshot::channel();
        let pool = Arc::clone(self);
        let task = tokio::spawn(async move { pool.run_monitor(rx, stop_rx).await });
        info!(interval = ?self.config.tick_interval, "Autoscaling monitor started");

        Ok(MonitorHandle { stop: stop_tx, task })
    }

    /// Asks the monitor for an instance of `function` and waits for the answer.
    ///
    /// The answer is an instance that may still be starting; callers wait for
    /// readiness themselves.
    pub async fn request_cold_start(&self, function: &str) -> Result<Arc<InstanceHandle>> {
        let sender = self
            .cold_start
            .lock()
            .await
            .clone()
            .ok_or(Error::MonitorUnavailable)?;

        let (reply, response) = oneshot::channel();
        sender
            .send(ColdStartRequest {
                function: function.to_string(),
                reply,
            })
            .await
            .map_err(|_| Error::MonitorUnavailable)?;

        response.await.map_err(|_| Error::MonitorUnavailable)?
    }

    async fn run_monitor(
        &self,
        mut requests: mpsc::Receiver<ColdStartRequest>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            if !matches!(stop.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                break;
            }
            tokio::select! {
                _ = &mut stop => break,
                Some(request) = requests.recv() => self.serve_cold_start(request).await,
                _ = ticker.tick() => self.rebalance().await,
            }
        }

        requests.close();
        info!("Autoscaling monitor stopped");
    }

    async fn serve_cold_start(&self, request: ColdStartRequest) {
        let ColdStartRequest { function, reply } = request;
        debug!(%function, "Serving cold-start request");

        let result = match self.reusable_instance(&function).await {
            Some(existing) => {
                debug!(instance = %existing.name(), "Reusing starting instance for cold start");
                Ok(existing)
            }
            None => self.launch(&function).await,
        };

        if let Err(e) = &result {
            error!(%function, error = %e, "Cold start failed");
        }
        if reply.send(result).is_err() {
            debug!(%function, "Cold-start requester went away");
        }
    }

    /// Requests queued behind the one that launched an instance get that same
    /// instance, unless it has been starting for longer than the reuse window.
    async fn reusable_instance(&self, function: &str) -> Option<Arc<InstanceHandle>> {
        let newest = self.newest_instance(function).await?;
        if newest.is_ready() || newest.launched_at().elapsed() < self.config.cold_start_reuse_window {
            Some(newest)
        } else {
            None
        }
    }

    async fn rebalance(&self) {
        let loads = self.load_snapshot(Instant::now()).await;
        for load in loads {
            let decision = decide(&load, &self.config);
            debug!(
                function = %load.function,
                instances = load.instances,
                utilization = ?load.utilization(),
                ?decision,
                "Utilization check"
            );
            match decision {
                ScaleDecision::Up => match self.launch(&load.function).await {
                    Ok(handle) => info!(instance = %handle.name(), "Scaled up"),
                    Err(e) => warn!(function = %load.function, error = %e, "Scale-up failed"),
                },
                ScaleDecision::Down => match self.evict(&load.function).await {
                    Ok(handle) => info!(instance = %handle.name(), "Scaled down"),
                    Err(e) => warn!(function = %load.function, error = %e, "Scale-down failed"),
                },
                ScaleDecision::Hold => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn load(instances: usize, unready: usize, busy_ms: u64, ready_ms: u64) -> FunctionLoad {
        FunctionLoad {
            function: "alpha".to_string(),
            instances,
            unready,
            busy: Duration::from_millis(busy_ms),
            ready_time: Duration::from_millis(ready_ms),
        }
    }

    fn config() -> ScalingConfig {
        ScalingConfig {
            min_busy_time: Duration::from_secs(1),
            ..ScalingConfig::default()
        }
    }

    #[test]
    fn test_scale_up_above_upper_bound() {
        assert_eq!(decide(&load(1, 0, 9_000, 10_000), &config()), ScaleDecision::Up);
    }

    #[test]
    fn test_hold_between_bounds() {
        assert_eq!(decide(&load(2, 0, 7_500, 10_000), &config()), ScaleDecision::Hold);
        assert_eq!(decide(&load(2, 0, 8_000, 10_000), &config()), ScaleDecision::Hold);
    }

    #[test]
    fn test_scale_down_keeps_last_instance() {
        assert_eq!(decide(&load(2, 0, 2_000, 10_000), &config()), ScaleDecision::Down);
        assert_eq!(decide(&load(1, 0, 2_000, 10_000), &config()), ScaleDecision::Hold);
    }

    #[test]
    fn test_hold_while_instance_unready() {
        assert_eq!(decide(&load(2, 1, 9_000, 10_000), &config()), ScaleDecision::Hold);
    }

    #[test]
    fn test_hold_below_min_busy_time() {
        assert_eq!(decide(&load(1, 0, 900, 1_000), &config()), ScaleDecision::Hold);
    }

    #[test]
    fn test_hold_without_ready_time() {
        let cfg = ScalingConfig {
            min_busy_time: Duration::ZERO,
            ..ScalingConfig::default()
        };
        assert_eq!(decide(&load(1, 0, 0, 0), &cfg), ScaleDecision::Hold);
    }
}
