// Retry policy with fixed or exponential backoff and jitter

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry strategy trait for calculating retry delays
pub trait RetryStrategy: Send + Sync {
    /// Delay before the retry that follows `retry_count` previous retries.
    /// Returns None once the retry budget is spent.
    fn next_delay(&self, retry_count: u32) -> Option<Duration>;

    /// Check if more retries are allowed
    fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries()
    }

    /// Get the maximum number of retries
    fn max_retries(&self) -> u32;
}

/// Per-task retry policy.
/// A task runs at most `max_retries + 1` times per execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_interval_seconds: u64,
    #[serde(default)]
    pub backoff: RetryBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_interval_seconds: 60,
            backoff: RetryBackoff::Fixed,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_interval_seconds: u64) -> Self {
        Self {
            max_retries,
            retry_interval_seconds,
            backoff: RetryBackoff::Fixed,
        }
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// How the delay grows between retries
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryBackoff {
    /// Always wait `retry_interval_seconds`
    #[default]
    Fixed,
    /// `retry_interval_seconds * 2^retry_count`, capped, plus random jitter
    Exponential {
        max_delay_seconds: u64,
        #[serde(default = "default_jitter")]
        jitter_factor: f64,
    },
}

fn default_jitter() -> f64 {
    0.1
}

impl RetryPolicy {
    /// Calculate exponential delay without jitter
    fn exponential_base_secs(&self, retry_count: u32, max_delay_seconds: u64) -> u64 {
        let factor = 2_u64.checked_pow(retry_count).unwrap_or(u64::MAX);
        self.retry_interval_seconds
            .saturating_mul(factor)
            .min(max_delay_seconds.max(self.retry_interval_seconds))
    }

    /// Add random jitter to prevent thundering herd.
    /// Returns delay in milliseconds
    fn add_jitter_ms(base_delay_secs: u64, jitter_factor: f64) -> u64 {
        let base_delay_ms = base_delay_secs.saturating_mul(1000);
        let jitter_factor = jitter_factor.clamp(0.0, 1.0);
        if jitter_factor == 0.0 {
            return base_delay_ms;
        }

        let jitter_range_ms = (base_delay_ms as f64 * jitter_factor) as u64;
        let jitter_ms = if jitter_range_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_range_ms)
        } else {
            0
        };

        base_delay_ms + jitter_ms
    }
}

impl RetryStrategy for RetryPolicy {
    fn next_delay(&self, retry_count: u32) -> Option<Duration> {
        if !self.should_retry(retry_count) {
            return None;
        }

        let delay = match &self.backoff {
            RetryBackoff::Fixed => Duration::from_secs(self.retry_interval_seconds),
            RetryBackoff::Exponential {
                max_delay_seconds,
                jitter_factor,
            } => {
                let base = self.exponential_base_secs(retry_count, *max_delay_seconds);
                Duration::from_millis(Self::add_jitter_ms(base, *jitter_factor))
            }
        };
        Some(delay)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
