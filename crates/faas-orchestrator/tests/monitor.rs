use faas_orchestrator::testing::{templates, MockProvider};
use faas_orchestrator::{Error, InstancePool, ScalingConfig};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> ScalingConfig {
    ScalingConfig {
        tick_interval: Duration::from_millis(20),
        min_busy_time: Duration::ZERO,
        ..ScalingConfig::default()
    }
}

fn pool(provider: Arc<MockProvider>, config: ScalingConfig) -> Arc<InstancePool> {
    Arc::new(InstancePool::new(provider, templates(&["alpha", "beta"]), config))
}

#[tokio::test]
async fn test_scale_up_waits_for_new_instance() {
    let provider = Arc::new(MockProvider::new("http://127.0.0.1:9"));
    let pool = pool(provider.clone(), fast_config());

    let first = pool.launch("alpha").await.unwrap();
    first.mark_ready();
    tokio::time::sleep(Duration::from_millis(5)).await;
    first.add_busy_time(Duration::from_secs(60));

    let monitor = pool.start_monitor().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    monitor.stop().await;

    // The scaled-up instance never becomes ready, so later ticks hold.
    assert_eq!(pool.instance_count("alpha").await, 2);
    assert_eq!(provider.launched_names(), vec!["alpha-0", "alpha-1"]);
}

#[tokio::test]
async fn test_scale_down_keeps_one_instance() {
    let provider = Arc::new(MockProvider::new("http://127.0.0.1:9"));
    let pool = pool(provider.clone(), fast_config());

    for _ in 0..3 {
        pool.launch("alpha").await.unwrap().mark_ready();
    }
    tokio::time::sleep(Duration::from_millis(5)).await;

    let monitor = pool.start_monitor().await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    monitor.stop().await;

    let remaining: Vec<String> = pool
        .instances("alpha")
        .await
        .iter()
        .map(|h| h.name().to_string())
        .collect();
    assert_eq!(remaining, vec!["alpha-0"]);
    assert_eq!(provider.removed(), vec!["mock-alpha-2", "mock-alpha-1"]);
}

#[tokio::test]
async fn test_functions_scale_independently() {
    let provider = Arc::new(MockProvider::new("http://127.0.0.1:9"));
    let pool = pool(provider.clone(), fast_config());

    let hot = pool.launch("alpha").await.unwrap();
    hot.mark_ready();
    for _ in 0..2 {
        pool.launch("beta").await.unwrap().mark_ready();
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
    hot.add_busy_time(Duration::from_secs(60));

    let monitor = pool.start_monitor().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    monitor.stop().await;

    assert_eq!(pool.instance_count("alpha").await, 2);
    assert_eq!(pool.instance_count("beta").await, 1);
}

#[tokio::test]
async fn test_idle_below_min_busy_time_is_left_alone() {
    let provider = Arc::new(MockProvider::new("http://127.0.0.1:9"));
    let config = ScalingConfig {
        tick_interval: Duration::from_millis(20),
        ..ScalingConfig::default()
    };
    let pool = pool(provider, config);

    for _ in 0..2 {
        pool.launch("alpha").await.unwrap().mark_ready();
    }

    let monitor = pool.start_monitor().await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    monitor.stop().await;

    assert_eq!(pool.instance_count("alpha").await, 2);
}

#[tokio::test]
async fn test_cold_start_requests_share_one_launch() {
    let provider = Arc::new(MockProvider::new("http://127.0.0.1:9").with_launch_delay(Duration::from_millis(50)));
    let pool = pool(provider.clone(), ScalingConfig::default());
    let monitor = pool.start_monitor().await.unwrap();

    let requests: Vec<_> = (0..5)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move { pool.request_cold_start("alpha").await })
        })
        .collect();

    for request in requests {
        let handle = request.await.unwrap().unwrap();
        assert_eq!(handle.name(), "alpha-0");
    }
    assert_eq!(provider.launch_count(), 1);
    monitor.stop().await;
}

#[tokio::test]
async fn test_cold_start_reports_launch_failure() {
    let provider = Arc::new(MockProvider::new("http://127.0.0.1:9"));
    provider.fail_next_launches(1);
    let pool = pool(provider, ScalingConfig::default());
    let monitor = pool.start_monitor().await.unwrap();

    let err = pool.request_cold_start("alpha").await.unwrap_err();
    assert!(matches!(err, Error::LaunchFailed { ref function, .. } if function == "alpha"));

    let handle = pool.request_cold_start("alpha").await.unwrap();
    assert_eq!(handle.name(), "alpha-1");
    monitor.stop().await;
}

#[tokio::test]
async fn test_cold_start_without_monitor() {
    let provider = Arc::new(MockProvider::new("http://127.0.0.1:9"));
    let pool = pool(provider.clone(), ScalingConfig::default());

    assert!(matches!(
        pool.request_cold_start("alpha").await,
        Err(Error::MonitorUnavailable)
    ));

    let monitor = pool.start_monitor().await.unwrap();
    monitor.stop().await;
    assert!(matches!(
        pool.request_cold_start("alpha").await,
        Err(Error::MonitorUnavailable)
    ));
    assert_eq!(provider.launch_count(), 0);
}

#[tokio::test]
async fn test_monitor_starts_once() {
    let provider = Arc::new(MockProvider::new("http://127.0.0.1:9"));
    let pool = pool(provider, ScalingConfig::default());

    let monitor = pool.start_monitor().await.unwrap();
    assert!(matches!(
        pool.start_monitor().await,
        Err(Error::MonitorAlreadyRunning)
    ));
    monitor.stop().await;

    let restarted = pool.start_monitor().await.unwrap();
    restarted.stop().await;
}

#[tokio::test]
async fn test_concurrent_launches_get_unique_names() {
    let provider = Arc::new(MockProvider::new("http://127.0.0.1:9").with_launch_delay(Duration::from_millis(10)));
    let pool = pool(provider, ScalingConfig::default());

    let launches: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move { pool.launch("alpha").await })
        })
        .collect();

    let mut names = Vec::new();
    for launch in launches {
        names.push(launch.await.unwrap().unwrap().name().to_string());
    }
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 16);
    assert_eq!(pool.instance_count("alpha").await, 16);
}

#[tokio::test]
async fn test_zero_tick_interval_is_rejected() {
    let provider = Arc::new(MockProvider::new("http://127.0.0.1:9"));
    let config = ScalingConfig {
        tick_interval: Duration::ZERO,
        ..ScalingConfig::default()
    };
    let pool = pool(provider, config);

    assert!(matches!(pool.start_monitor().await, Err(Error::InvalidConfig(_))));
    assert!(matches!(
        pool.request_cold_start("alpha").await,
        Err(Error::MonitorUnavailable)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ticks_run_under_steady_cold_start_traffic() {
    let provider = Arc::new(MockProvider::new("http://127.0.0.1:9"));
    let pool = pool(provider.clone(), fast_config());

    let hot = pool.launch("alpha").await.unwrap();
    hot.mark_ready();
    pool.launch("beta").await.unwrap().mark_ready();
    tokio::time::sleep(Duration::from_millis(5)).await;
    hot.add_busy_time(Duration::from_secs(60));

    let monitor = pool.start_monitor().await.unwrap();

    // Keep the cold-start queue busy; every request reuses the ready beta-0.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    let requesters: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                while tokio::time::Instant::now() < deadline {
                    pool.request_cold_start("beta").await.unwrap();
                }
            })
        })
        .collect();
    for requester in requesters {
        requester.await.unwrap();
    }
    monitor.stop().await;

    assert_eq!(pool.instance_count("alpha").await, 2);
    assert_eq!(pool.instance_count("beta").await, 1);
}
