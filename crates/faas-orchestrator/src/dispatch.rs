use crate::config::DispatchConfig;
use crate::instance::InstanceHandle;
use crate::limiter::AdmissionLimiter;
use crate::pool::InstancePool;
use crate::readiness::ReadinessProber;
use crate::{Error, Result};
use chrono::Utc;
use faas_common::{Authorizer, UsageSink};
use faas_executor::ReadinessProbe;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Routes one invocation to an instance of the target function.
pub struct Dispatcher {
    pool: Arc<InstancePool>,
    limiter: Arc<AdmissionLimiter>,
    prober: ReadinessProber,
    authorizer: Arc<dyn Authorizer>,
    usage: Arc<dyn UsageSink>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<InstancePool>,
        limiter: Arc<AdmissionLimiter>,
        probe: Arc<dyn ReadinessProbe>,
        authorizer: Arc<dyn Authorizer>,
        usage: Arc<dyn UsageSink>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            pool,
            limiter,
            prober: ReadinessProber::new(probe, config.probe_interval),
            authorizer,
            usage,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<InstancePool> {
        &self.pool
    }

    pub fn limiter(&self) -> &Arc<AdmissionLimiter> {
        &self.limiter
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Runs `forward` against a ready, admitted instance of `function`.
    ///
    /// Busy time and usage are recorded whether or not `forward` succeeds. The
    /// admission is released on every exit path after it was granted.
    #[instrument(skip(self, forward), fields(caller = %caller, function = %function))]
    pub async fn dispatch<F, Fut, T>(&self, caller: &str, function: &str, forward: F) -> Result<T>
    where
        F: FnOnce(Arc<InstanceHandle>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.authorizer.is_allowed(caller, function) {
            return Err(Error::Unauthorized {
                caller: caller.to_string(),
                function: function.to_string(),
            });
        }
        if !self.pool.is_registered(function) {
            return Err(Error::FunctionNotFound(function.to_string()));
        }

        let instance = self.resolve_instance(function).await?;
        self.prober
            .wait_until_ready(&instance, self.config.readiness_timeout)
            .await?;

        let _permit = self
            .limiter
            .admit(function, self.config.admission_timeout)
            .await
            .ok_or_else(|| Error::AdmissionTimeout {
                function: function.to_string(),
                timeout: self.config.admission_timeout,
            })?;

        debug!(instance = %instance.name(), "Forwarding request");
        let started_at = Utc::now();
        let clock = Instant::now();
        let outcome = forward(instance.clone()).await;
        instance.add_busy_time(clock.elapsed());
        self.usage
            .record_call(caller, function, started_at, Utc::now())
            .await;

        if let Err(e) = &outcome {
            warn!(instance = %instance.name(), error = %e, "Forwarded request failed");
        }
        outcome
    }

    async fn resolve_instance(&self, function: &str) -> Result<Arc<InstanceHandle>> {
        match self.pool.pick_ready_instance(function).await {
            Ok(instance) => Ok(instance),
            Err(Error::NoInstance(_)) | Err(Error::NoReadyInstance(_)) => self.cold_start(function).await,
            Err(e) => Err(e),
        }
    }

    /// Bounded retries with doubling backoff. Only launch failures are retried.
    async fn cold_start(&self, function: &str) -> Result<Arc<InstanceHandle>> {
        let attempts = self.config.cold_start_attempts.max(1);
        let mut backoff = self.config.cold_start_backoff;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.pool.request_cold_start(function).await {
                Ok(instance) => return Ok(instance),
                Err(e @ Error::LaunchFailed { .. }) => {
                    warn!(attempt, error = %e, "Cold start attempt failed");
                    last_error = e.to_string();
                }
                Err(e) => return Err(e),
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }

        Err(Error::ColdStartExhausted {
            function: function.to_string(),
            attempts,
            last_error,
        })
    }
}
