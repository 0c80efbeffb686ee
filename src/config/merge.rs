//! Merge rules: built-in defaults applied beneath every other layer.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a Config builder with the built-in defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("confluence.connect_timeout_secs", 10)?
        .set_default("confluence.request_timeout_secs", 60)?
        .set_default("retry.max_retries", 3)?
        .set_default("retry.base_delay_ms", 1000)?
        .set_default("retry.multiplier", 2.0)?
        .set_default("retry.max_delay_ms", 30_000)?
        .set_default("retry.jitter", 0.2)?
        .set_default("execution.batch_size", 100)?
        .set_default("execution.max_items", 100)?
        .set_default("execution.workers", 4)?
        .set_default("execution.confirm_threshold", 50)?
        .set_default("execution.failure_report_limit", 100)?
        .set_default("checkpoint.backend", "file")
}
