//! Retry Policy
//!
//! Wraps one logical remote call with bounded exponential backoff. Only
//! transient failures (rate limiting, server errors, network errors) are
//! retried; everything else is returned to the caller on the first attempt.

use crate::error::RemoteError;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry schedule configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor applied per retry
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound for the computed delay (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Relative jitter; 0.2 scales each delay by a factor in [0.8, 1.2]
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Ceiling for a server `Retry-After` hint (milliseconds)
    #[serde(default = "default_max_retry_after_ms")]
    pub max_retry_after_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_max_retry_after_ms() -> u64 {
    120_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            max_retry_after_ms: default_max_retry_after_ms(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.multiplier < 1.0 {
            return Err(format!("multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(format!("jitter must be in [0.0, 1.0), got {}", self.jitter));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must be >= base_delay_ms".to_string());
        }
        Ok(())
    }

    /// Un-jittered delay before retry `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Suspends the current task between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Bounded exponential backoff for transient remote failures.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { config, sleeper }
    }

    /// Policy sleeping on the tokio timer.
    pub fn with_tokio(config: RetryConfig) -> Self {
        Self::new(config, Arc::new(TokioSleeper))
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry `retry` for a failure, honouring a server hint
    /// up to `max_retry_after_ms`.
    pub fn delay_for(&self, retry: u32, error: &RemoteError) -> Duration {
        if let Some(hint) = error.retry_after {
            let ceiling = Duration::from_millis(self.config.max_retry_after_ms);
            if hint > ceiling {
                warn!(
                    retry_after_ms = hint.as_millis() as u64,
                    ceiling_ms = self.config.max_retry_after_ms,
                    "retry_after_clamped"
                );
                return ceiling;
            }
            return hint;
        }
        let base = self.config.delay_for_retry(retry);
        if self.config.jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.config.jitter..=1.0 + self.config.jitter);
        base.mul_f64(factor)
    }

    /// Run `call`, retrying transient failures. The last error is returned
    /// unchanged once retries are exhausted.
    pub async fn execute<T, F, Fut>(&self, mut call: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut retries = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retries < self.config.max_retries => {
                    retries += 1;
                    let delay = self.delay_for(retries, &err);
                    debug!(
                        retry = retries,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        kind = %err.kind,
                        "retry_scheduled"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!(retries, kind = %err.kind, error = %err.message, "retries_exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}
