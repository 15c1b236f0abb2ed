use std::time::Duration;

const CIRCUIT_TIMEOUT_ENV: &str = "GSM_CIRCUIT_TIMEOUT_MS";
const CIRCUIT_THRESHOLD_ENV: &str = "GSM_CIRCUIT_ERROR_THRESHOLD_PCT";
const CIRCUIT_RETRY_ENV: &str = "GSM_CIRCUIT_RETRY_TIMEOUT_MS";
const BROADCAST_TIMEOUT_ENV: &str = "GSM_BROADCAST_TIMEOUT_SECS";

#[derive(Clone, Debug, PartialEq)]
pub struct CircuitSettings {
    /// Deadline for a single wrapped call.
    pub timeout: Duration,
    /// Failure ratio, in percent, at or above which the breaker opens.
    pub error_threshold_percentage: f64,
    /// Cool-down spent open before a half-open trial call is allowed.
    pub retry_timeout: Duration,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            error_threshold_percentage: 50.0,
            retry_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitSettings {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(ms) = env_u64(CIRCUIT_TIMEOUT_ENV) {
            cfg.timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(pct) = std::env::var(CIRCUIT_THRESHOLD_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
        {
            cfg.error_threshold_percentage = pct.min(100.0);
        }
        if let Some(ms) = env_u64(CIRCUIT_RETRY_ENV) {
            cfg.retry_timeout = Duration::from_millis(ms);
        }
        cfg
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastConfig {
    pub default_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl BroadcastConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(secs) = env_u64(BROADCAST_TIMEOUT_ENV) {
            cfg.default_timeout = Duration::from_secs(secs.max(1));
        }
        cfg
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
