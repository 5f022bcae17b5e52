use faas_common::{FaasError, FunctionTemplate, Result};
use faas_executor::ProbeType;
use faas_orchestrator::{DispatchConfig, ScalingConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Paths served by the dispatcher itself; functions may not shadow them.
const RESERVED_NAMES: &[&str] = &["health", "api"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub kind: ProbeType,
    /// Timeout of a single probe request.
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            kind: ProbeType::Http,
            timeout_ms: 100,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub functions: BTreeMap<String, FunctionTemplate>,
    /// Caller to the functions it may invoke.
    pub permissions: BTreeMap<String, Vec<String>>,
    /// Default admission capacity per function.
    pub max_concurrency: usize,
    /// Per-function admission capacity overrides.
    pub capacities: BTreeMap<String, usize>,
    /// Timeout of the proxied call to an instance.
    pub upstream_timeout_ms: u64,
    pub probe: ProbeConfig,
    pub scaling: ScalingConfig,
    pub dispatch: DispatchConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            functions: BTreeMap::new(),
            permissions: BTreeMap::new(),
            max_concurrency: 10,
            capacities: BTreeMap::new(),
            upstream_timeout_ms: 60_000,
            probe: ProbeConfig::default(),
            scaling: ScalingConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| FaasError::Config(format!("Invalid dispatcher config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.functions.is_empty() {
            return Err(FaasError::Config("No functions configured".to_string()));
        }
        for name in self.functions.keys() {
            if name.is_empty() || name.contains('/') || RESERVED_NAMES.contains(&name.as_str()) {
                return Err(FaasError::Config(format!("Invalid function name '{name}'")));
            }
        }
        for (caller, functions) in &self.permissions {
            if let Some(unknown) = functions.iter().find(|f| !self.functions.contains_key(*f)) {
                return Err(FaasError::Config(format!(
                    "Caller '{caller}' is granted unknown function '{unknown}'"
                )));
            }
        }
        if let Some(unknown) = self.capacities.keys().find(|f| !self.functions.contains_key(*f)) {
            return Err(FaasError::Config(format!(
                "Capacity set for unknown function '{unknown}'"
            )));
        }
        if self.max_concurrency == 0 {
            return Err(FaasError::Config("max_concurrency must be positive".to_string()));
        }
        if let Some((function, _)) = self.capacities.iter().find(|(_, limit)| **limit == 0) {
            return Err(FaasError::Config(format!(
                "Capacity for '{function}' must be positive"
            )));
        }
        let scaling = &self.scaling;
        if !(0.0 < scaling.lower_bound && scaling.lower_bound <= scaling.upper_bound) {
            return Err(FaasError::Config(format!(
                "Utilization bounds must satisfy 0 < lower ({}) <= upper ({})",
                scaling.lower_bound, scaling.upper_bound
            )));
        }
        if scaling.tick_interval.is_zero() || self.dispatch.probe_interval.is_zero() {
            return Err(FaasError::Config("Intervals must be positive".to_string()));
        }
        Ok(())
    }
}
