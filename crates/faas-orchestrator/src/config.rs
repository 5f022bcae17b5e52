use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Autoscaling monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    #[serde(rename = "tick_interval_ms", with = "millis")]
    pub tick_interval: Duration,
    /// Launch one more instance when the utilization ratio exceeds this.
    pub upper_bound: f64,
    /// Evict one instance when the utilization ratio falls below this.
    pub lower_bound: f64,
    /// Functions whose total busy time is below this are not scaled.
    #[serde(rename = "min_busy_time_ms", with = "millis")]
    pub min_busy_time: Duration,
    /// A not-yet-ready instance younger than this is handed to cold-start
    /// requests instead of launching another one.
    #[serde(rename = "cold_start_reuse_window_ms", with = "millis")]
    pub cold_start_reuse_window: Duration,
    pub cold_start_queue: usize,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            upper_bound: 0.8,
            lower_bound: 0.7,
            min_busy_time: Duration::from_secs(10),
            cold_start_reuse_window: Duration::from_secs(30),
            cold_start_queue: 64,
        }
    }
}

/// Per-request timeouts and retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    #[serde(rename = "readiness_timeout_ms", with = "millis")]
    pub readiness_timeout: Duration,
    #[serde(rename = "probe_interval_ms", with = "millis")]
    pub probe_interval: Duration,
    #[serde(rename = "admission_timeout_ms", with = "millis")]
    pub admission_timeout: Duration,
    pub cold_start_attempts: u32,
    /// Delay before the second cold-start attempt; doubles per attempt.
    #[serde(rename = "cold_start_backoff_ms", with = "millis")]
    pub cold_start_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_millis(100),
            admission_timeout: Duration::from_secs(10),
            cold_start_attempts: 3,
            cold_start_backoff: Duration::from_millis(250),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
