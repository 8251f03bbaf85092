//! Gateway configuration.
//!
//! Defaults: 3 retries (2s, 4s, 8s), circuit opens after 5 consecutive
//! transient failures and cools down for 60s. All of them are tunable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the resilient gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Retry behaviour for transient failures.
    pub retry: RetryConfig,

    /// Circuit breaker thresholds, applied per endpoint class.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Per-request timeout for the HTTP transport.
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            request_timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first send; a call makes at most `max_retries + 1` sends.
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Delay after the `attempt`-th failed send (1-based): `d * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,

    /// Time an open circuit rejects calls before allowing one probe.
    pub cool_down_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down_secs: 60,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_secs)
    }
}
