//! Retry with configurable backoff for transient generation failures.

use std::time::Duration;

use async_trait::async_trait;
use razor_llm::{Generate, Request, Response};
use razor_types::RazorError;

/// Delay between retry attempts.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    Fixed(Duration),
    /// `base * 2^attempt`, capped at `max`.
    Exponential { base: Duration, max: Duration },
    None,
}

impl BackoffPolicy {
    /// Delay for a 0-indexed attempt.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = (base.as_millis() as u64)
                    .saturating_mul(2u64.saturating_pow(attempt as u32));
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Call `f` up to `max_retries + 1` times.
///
/// Only errors with [`RazorError::is_retryable`] are retried; anything else
/// is returned immediately. A rate-limit hint longer than the policy delay
/// is honoured.
pub async fn execute_with_retry<T, F, Fut>(
    f: F,
    max_retries: usize,
    policy: &BackoffPolicy,
    label: &str,
) -> razor_types::Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = razor_types::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let mut delay = policy.delay_for_attempt(attempt);
                if let RazorError::RateLimited { retry_after_ms, .. } = &e {
                    if !matches!(policy, BackoffPolicy::None) {
                        delay = delay.max(Duration::from_millis(*retry_after_ms));
                    }
                }
                tracing::warn!(
                    call = %label,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Retryable error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Retrying generator
// ---------------------------------------------------------------------------

/// Wraps a generator so every call goes through [`execute_with_retry`].
pub struct Retrying<G> {
    inner: G,
    max_retries: usize,
    policy: BackoffPolicy,
}

impl<G: Generate> Retrying<G> {
    pub fn new(inner: G, max_retries: usize) -> Self {
        Self {
            inner,
            max_retries,
            policy: BackoffPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl<G: Generate> Generate for Retrying<G> {
    async fn complete(&self, request: &Request) -> Result<Response, RazorError> {
        execute_with_retry(
            || self.inner.complete(request),
            self.max_retries,
            &self.policy,
            &request.model,
        )
        .await
    }
}
