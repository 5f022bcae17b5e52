use faas_common::Authorizer;
use faas_orchestrator::testing::{templates, AllowAll, MockProvider, RecordingUsage, StaticProbe};
use faas_orchestrator::{
    AdmissionLimiter, DispatchConfig, Dispatcher, Error, InstancePool, MonitorHandle, ScalingConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct DenyAll;

impl Authorizer for DenyAll {
    fn is_allowed(&self, _caller: &str, _function: &str) -> bool {
        false
    }
}

struct Harness {
    provider: Arc<MockProvider>,
    probe: Arc<StaticProbe>,
    usage: Arc<RecordingUsage>,
    dispatcher: Arc<Dispatcher>,
    monitor: Option<MonitorHandle>,
}

impl Harness {
    async fn new(capacity: usize, config: DispatchConfig) -> Self {
        Self::build(capacity, config, Arc::new(AllowAll), true).await
    }

    async fn build(
        capacity: usize,
        config: DispatchConfig,
        authorizer: Arc<dyn Authorizer>,
        with_monitor: bool,
    ) -> Self {
        let provider = Arc::new(MockProvider::new("http://127.0.0.1:9"));
        let probe = Arc::new(StaticProbe::new(true));
        let usage = Arc::new(RecordingUsage::default());
        let pool = Arc::new(InstancePool::new(
            provider.clone(),
            templates(&["alpha", "beta"]),
            ScalingConfig::default(),
        ));
        let monitor = if with_monitor {
            Some(pool.start_monitor().await.unwrap())
        } else {
            None
        };
        let dispatcher = Arc::new(Dispatcher::new(
            pool,
            Arc::new(AdmissionLimiter::new(capacity)),
            probe.clone(),
            authorizer,
            usage.clone(),
            config,
        ));
        Self {
            provider,
            probe,
            usage,
            dispatcher,
            monitor,
        }
    }

    async fn shutdown(self) {
        if let Some(monitor) = self.monitor {
            monitor.stop().await;
        }
        self.dispatcher.pool().shutdown_all().await;
    }
}

fn quick_config() -> DispatchConfig {
    DispatchConfig {
        readiness_timeout: Duration::from_millis(200),
        probe_interval: Duration::from_millis(10),
        admission_timeout: Duration::from_millis(100),
        cold_start_attempts: 3,
        cold_start_backoff: Duration::from_millis(10),
    }
}

async fn echo_name(instance: Arc<faas_orchestrator::InstanceHandle>) -> faas_orchestrator::Result<String> {
    Ok(instance.name().to_string())
}

#[tokio::test]
async fn test_cold_start_then_reuse() {
    let h = Harness::new(10, quick_config()).await;

    let first = h.dispatcher.dispatch("alice", "alpha", echo_name).await.unwrap();
    let second = h.dispatcher.dispatch("alice", "alpha", echo_name).await.unwrap();

    assert_eq!(first, "alpha-0");
    assert_eq!(second, "alpha-0");
    assert_eq!(h.provider.launch_count(), 1);
    assert_eq!(h.probe.probe_count(), 1);
    assert_eq!(h.dispatcher.limiter().current_count("alpha"), 0);

    let calls = h.usage.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].caller, "alice");
    assert_eq!(calls[0].function, "alpha");
    assert!(calls[0].finished_at >= calls[0].started_at);
    h.shutdown().await;
}

#[tokio::test]
async fn test_busy_time_is_accounted() {
    let h = Harness::new(10, quick_config()).await;

    h.dispatcher
        .dispatch("alice", "alpha", |instance| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            echo_name(instance).await
        })
        .await
        .unwrap();

    let instances = h.dispatcher.pool().instances("alpha").await;
    assert!(instances[0].busy_time() >= Duration::from_millis(30));
    h.shutdown().await;
}

#[tokio::test]
async fn test_unauthorized_caller_is_rejected_before_launch() {
    let h = Harness::build(10, quick_config(), Arc::new(DenyAll), true).await;

    let err = h.dispatcher.dispatch("mallory", "alpha", echo_name).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized { ref caller, .. } if caller == "mallory"));
    assert_eq!(h.provider.launch_count(), 0);
    assert!(h.usage.calls().is_empty());
    h.shutdown().await;
}

#[tokio::test]
async fn test_unknown_function() {
    let h = Harness::new(10, quick_config()).await;

    let err = h.dispatcher.dispatch("alice", "gamma", echo_name).await.unwrap_err();
    assert!(matches!(err, Error::FunctionNotFound(ref f) if f == "gamma"));
    h.shutdown().await;
}

#[tokio::test]
async fn test_cold_start_retries_then_succeeds() {
    let h = Harness::new(10, quick_config()).await;
    h.provider.fail_next_launches(2);

    let name = h.dispatcher.dispatch("alice", "alpha", echo_name).await.unwrap();
    assert_eq!(name, "alpha-2");
    h.shutdown().await;
}

#[tokio::test]
async fn test_cold_start_exhausted() {
    let h = Harness::new(10, quick_config()).await;
    h.provider.fail_next_launches(10);

    let err = h.dispatcher.dispatch("alice", "alpha", echo_name).await.unwrap_err();
    assert!(matches!(err, Error::ColdStartExhausted { attempts: 3, .. }));
    assert_eq!(h.dispatcher.pool().instance_count("alpha").await, 0);
    assert!(h.usage.calls().is_empty());
    h.shutdown().await;
}

#[tokio::test]
async fn test_no_monitor_means_unavailable() {
    let h = Harness::build(10, quick_config(), Arc::new(AllowAll), false).await;

    let err = h.dispatcher.dispatch("alice", "alpha", echo_name).await.unwrap_err();
    assert!(matches!(err, Error::MonitorUnavailable));
    h.shutdown().await;
}

#[tokio::test]
async fn test_readiness_timeout_does_not_admit() {
    let h = Harness::new(10, quick_config()).await;
    h.probe.set_ready(false);

    let err = h.dispatcher.dispatch("alice", "alpha", echo_name).await.unwrap_err();
    assert!(matches!(err, Error::ReadinessTimeout { ref instance, .. } if instance == "alpha-0"));
    assert_eq!(h.dispatcher.limiter().current_count("alpha"), 0);
    assert!(h.usage.calls().is_empty());

    // The starting instance is reused by the next request.
    h.probe.set_ready(true);
    let name = h.dispatcher.dispatch("alice", "alpha", echo_name).await.unwrap();
    assert_eq!(name, "alpha-0");
    assert_eq!(h.provider.launch_count(), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn test_admission_timeout_when_saturated() {
    let h = Harness::new(1, quick_config()).await;
    h.dispatcher.pool().launch("alpha").await.unwrap().mark_ready();

    let holder = {
        let dispatcher = h.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch("alice", "alpha", |instance| async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    echo_name(instance).await
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let err = h.dispatcher.dispatch("bob", "alpha", echo_name).await.unwrap_err();
    assert!(matches!(err, Error::AdmissionTimeout { .. }));

    holder.await.unwrap().unwrap();
    assert_eq!(h.dispatcher.limiter().current_count("alpha"), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn test_in_flight_never_exceeds_capacity() {
    let config = DispatchConfig {
        admission_timeout: Duration::from_secs(5),
        ..quick_config()
    };
    let h = Harness::new(3, config).await;
    h.dispatcher.pool().launch("alpha").await.unwrap().mark_ready();

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let requests: Vec<_> = (0..10)
        .map(|i| {
            let dispatcher = h.dispatcher.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(&format!("caller-{i}"), "alpha", |instance| async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        echo_name(instance).await
                    })
                    .await
            })
        })
        .collect();

    for request in requests {
        request.await.unwrap().unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(h.dispatcher.limiter().current_count("alpha"), 0);
    assert_eq!(h.usage.calls().len(), 10);
    h.shutdown().await;
}

#[tokio::test]
async fn test_forward_failure_still_releases_and_records() {
    let h = Harness::new(1, quick_config()).await;

    let err = h
        .dispatcher
        .dispatch("alice", "alpha", |instance| async move {
            Err::<String, _>(Error::Forward {
                instance: instance.name().to_string(),
                message: "connection reset".to_string(),
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forward { .. }));
    assert_eq!(h.dispatcher.limiter().current_count("alpha"), 0);
    assert_eq!(h.usage.calls().len(), 1);

    let name = h.dispatcher.dispatch("alice", "alpha", echo_name).await.unwrap();
    assert_eq!(name, "alpha-0");
    h.shutdown().await;
}
