use faas_common::LaunchedInstance;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Instance names are `{function}-{seq}`, unique per dispatcher lifetime.
pub fn instance_name(function: &str, seq: u64) -> String {
    format!("{function}-{seq}")
}

/// One running instance of a function.
///
/// Shared between the pool, the monitor and in-flight requests. Identity fields
/// never change after launch; readiness flips false to true once; busy time only
/// grows.
#[derive(Debug)]
pub struct InstanceHandle {
    name: String,
    function: String,
    seq: u64,
    provider_id: String,
    invoke_url: String,
    ready_url: String,
    launched_at: Instant,
    ready_at: OnceLock<Instant>,
    busy_nanos: AtomicU64,
}

impl InstanceHandle {
    pub fn new(function: &str, seq: u64, launched: LaunchedInstance) -> Self {
        Self {
            name: instance_name(function, seq),
            function: function.to_string(),
            seq,
            provider_id: launched.provider_id,
            invoke_url: launched.invoke_url,
            ready_url: launched.ready_url,
            launched_at: Instant::now(),
            ready_at: OnceLock::new(),
            busy_nanos: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn invoke_url(&self) -> &str {
        &self.invoke_url
    }

    pub fn ready_url(&self) -> &str {
        &self.ready_url
    }

    pub fn launched_at(&self) -> Instant {
        self.launched_at
    }

    pub fn is_ready(&self) -> bool {
        self.ready_at.get().is_some()
    }

    pub fn ready_at(&self) -> Option<Instant> {
        self.ready_at.get().copied()
    }

    /// Records the readiness transition. Returns `true` only for the caller
    /// that performed it.
    pub fn mark_ready(&self) -> bool {
        let mut transitioned = false;
        self.ready_at.get_or_init(|| {
            transitioned = true;
            Instant::now()
        });
        transitioned
    }

    /// Time spent ready as of `now`, zero while not ready.
    pub fn ready_duration(&self, now: Instant) -> Duration {
        self.ready_at()
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }

    pub fn add_busy_time(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        // Saturate instead of wrapping.
        let _ = self
            .busy_nanos
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_add(nanos))
            });
    }

    pub fn busy_time(&self) -> Duration {
        Duration::from_nanos(self.busy_nanos.load(Ordering::Relaxed))
    }
}
