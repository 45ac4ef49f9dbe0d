//! Stage retry policy.
//!
//! A stage gets `max_attempts` tries, each bounded by the stage timeout.
//! Only transient failures (malformed output, timeouts, transient model
//! errors) are retried; everything else fails the stage immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::stage::Stage;
use crate::ai::timeout::{TimeoutConfig, with_timeout};
use crate::config::PipelineConfig;
use crate::types::{ForgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f32,
    /// Bound on each attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: crate::constants::pipeline::BACKOFF_FACTOR,
            attempt_timeout: TimeoutConfig::from_config(config).model_invocation,
        }
    }

    /// Policy with the stage's overrides applied
    pub fn for_stage(config: &PipelineConfig, stage: Stage) -> Self {
        let mut policy = Self::from_config(config);
        if let Some(over) = config.stages.get(stage.as_str()) {
            if let Some(attempts) = over.max_attempts {
                policy.max_attempts = attempts.max(1);
            }
            if let Some(secs) = over.timeout_secs {
                policy.attempt_timeout = Duration::from_secs(secs);
            }
        }
        policy
    }

    /// Delay before attempt `next_attempt` (2 for the first retry)
    pub fn delay_before(&self, next_attempt: u32) -> Duration {
        let mut delay = self.base_delay;
        for _ in 2..next_attempt {
            delay = calculate_backoff(delay, self.backoff_factor, self.max_delay);
        }
        let delay = delay.min(self.max_delay);
        delay + random_jitter(delay)
    }

    /// Run `attempt` until it succeeds, fails permanently, or attempts run out.
    ///
    /// The closure receives the 1-based attempt number. Exhaustion and
    /// permanent failures come back as [`ForgeError::StageExecution`].
    pub async fn run<F, Fut, T>(&self, stage: Stage, mut attempt: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let operation = format!("stage {}", stage);
        let mut n = 1;
        loop {
            let err = match with_timeout(self.attempt_timeout, attempt(n), &operation).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_transient() {
                return Err(into_stage_error(stage, err));
            }
            if n >= self.max_attempts {
                return Err(ForgeError::stage_execution(
                    stage.as_str(),
                    format!("gave up after {} attempt(s): {}", n, err),
                ));
            }

            let delay = self.delay_before(n + 1);
            warn!(
                stage = %stage,
                attempt = n,
                delay_ms = delay.as_millis() as u64,
                "Transient stage failure, retrying with strict output: {}",
                err
            );
            tokio::time::sleep(delay).await;
            n += 1;
        }
    }
}

fn into_stage_error(stage: Stage, err: ForgeError) -> ForgeError {
    match err {
        ForgeError::StageExecution { .. } => err,
        other => ForgeError::stage_execution(stage.as_str(), other.to_string()),
    }
}

/// Up to a quarter of `base` as random jitter
fn random_jitter(base: Duration) -> Duration {
    let max_jitter_ms = (base.as_millis() as u64) / 4;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_jitter_ms))
}

fn calculate_backoff(current: Duration, factor: f32, max: Duration) -> Duration {
    let next = Duration::from_secs_f32(current.as_secs_f32() * factor);
    std::cmp::min(next, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageOverride;
    use crate::types::ModelError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let value = fast()
            .run(Stage::Strategy, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 1 {
                        Err(ForgeError::transient_stage("strategy", "bad json"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_is_stage_execution() {
        let calls = AtomicU32::new(0);
        let err = fast()
            .run(Stage::Polish, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ForgeError::transient_stage("polish", "bad json")) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, ForgeError::StageExecution { ref stage, .. } if stage == "polish"));
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast()
            .run(Stage::Extraction, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), ForgeError>(ModelError::fatal("invalid model").into()) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.stage(), Some("extraction"));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(20),
            ..fast()
        };
        let value = policy
            .run(Stage::RiskScoring, |attempt| async move {
                if attempt == 1 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(attempt)
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            attempt_timeout: Duration::from_secs(1),
        };
        let first = policy.delay_before(2);
        assert!(first >= Duration::from_millis(400) && first < Duration::from_millis(500));
        let later = policy.delay_before(6);
        assert!(later >= Duration::from_millis(1000) && later < Duration::from_millis(1250));
    }

    #[test]
    fn test_stage_override() {
        let mut config = PipelineConfig::default();
        config.stages.insert(
            "strategy".to_string(),
            StageOverride {
                max_attempts: Some(4),
                timeout_secs: Some(600),
            },
        );
        let policy = RetryPolicy::for_stage(&config, Stage::Strategy);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(600));
        assert_eq!(RetryPolicy::for_stage(&config, Stage::Polish).max_attempts, 2);
    }
}
