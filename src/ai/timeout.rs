//! Timeout Configuration
//!
//! Every external call in a run is bounded: model invocations by the stage
//! timeout, cache reads and writes by the cache I/O timeout.
//!
//! ```ignore
//! let timeouts = TimeoutConfig::from_config(&config.pipeline);
//! let entry = with_timeout(timeouts.cache_io, backend.load(tier, key), "cache load").await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::constants::{network as net_constants, pipeline as pipeline_constants};
use crate::types::{ForgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Bound on a single stage attempt (default: 120 seconds)
    pub model_invocation: Duration,
    /// Bound on a single cache read or write (default: 5 seconds)
    pub cache_io: Duration,
    /// HTTP connect timeout for model providers
    pub connection: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            model_invocation: Duration::from_secs(pipeline_constants::STAGE_TIMEOUT_SECS),
            cache_io: Duration::from_secs(pipeline_constants::CACHE_IO_TIMEOUT_SECS),
            connection: Duration::from_secs(net_constants::CONNECTION_TIMEOUT_SECS),
        }
    }
}

impl TimeoutConfig {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            model_invocation: Duration::from_secs(config.stage_timeout_secs),
            cache_io: Duration::from_secs(config.cache_io_timeout_secs),
            ..Self::default()
        }
    }
}

/// Execute an async operation with a timeout.
///
/// Elapsed operations surface as [`ForgeError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ForgeError::timeout(operation_name, timeout)),
    }
}
