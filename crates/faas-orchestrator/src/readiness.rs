use crate::{instance::InstanceHandle, Error, Result};
use faas_executor::ReadinessProbe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info};

/// Polls an instance's readiness endpoint until it answers or a deadline passes.
#[derive(Clone)]
pub struct ReadinessProber {
    probe: Arc<dyn ReadinessProbe>,
    interval: Duration,
}

impl ReadinessProber {
    pub fn new(probe: Arc<dyn ReadinessProbe>, interval: Duration) -> Self {
        Self { probe, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns immediately for an instance already marked ready. Otherwise
    /// probes every `interval` and marks the instance ready on first success.
    /// Other waiters on the same instance observe that mark and stop probing.
    pub async fn wait_until_ready(&self, instance: &InstanceHandle, timeout: Duration) -> Result<()> {
        if instance.is_ready() {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        loop {
            if instance.is_ready() {
                return Ok(());
            }

            match timeout_at(deadline, self.probe.probe(instance.ready_url())).await {
                Ok(true) => {
                    if instance.mark_ready() {
                        info!(
                            instance = %instance.name(),
                            after = ?instance.launched_at().elapsed(),
                            "Instance is ready"
                        );
                    }
                    return Ok(());
                }
                Ok(false) => debug!(instance = %instance.name(), "Instance not ready yet"),
                Err(_) => break,
            }

            let wake = (Instant::now() + self.interval).min(deadline);
            sleep_until(wake).await;
            if wake == deadline {
                if instance.is_ready() {
                    return Ok(());
                }
                break;
            }
        }

        Err(Error::ReadinessTimeout {
            instance: instance.name().to_string(),
            timeout,
        })
    }
}
