//! Timeout, retry and politeness decorators for the crawl boundaries.
//!
//! The resolver only ever talks to these wrappers, so its own logic stays
//! free of transport concerns and its tests can hand in plain mocks.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use threadmark_common::{Config, Cursor, ThreadMessage, ThreadRef, TimeWindow};

use crate::error::{ExpandError, FetchError, Retryable};
use crate::gate::PolitenessGate;
use crate::traits::{ListingPage, ListingSource, ThreadExpander};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before retry `n` (0-based) is `backoff_base * 2^n` plus up to
    /// `backoff_base` of jitter.
    pub backoff_base: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.fetch_max_attempts.max(1),
            backoff_base: config.fetch_backoff_base,
            timeout: config.expand_timeout,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.backoff_base.as_millis() as u64;
        let jitter = if base_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=base_ms)
        };
        self.backoff_base * 2u32.saturating_pow(attempt) + Duration::from_millis(jitter)
    }
}

/// Run `call` through the gate with a timeout per attempt, retrying
/// transient failures with exponential backoff.
async fn run_with_retries<T, E, F, Fut>(
    policy: &RetryPolicy,
    gate: &PolitenessGate,
    operation: &str,
    resource: &str,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + From<FetchError> + Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let outcome = {
            let _permit = gate.admit().await.map_err(E::from)?;
            match tokio::time::timeout(policy.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(E::from(FetchError::Timeout {
                    after_ms: policy.timeout.as_millis() as u64,
                })),
            }
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let backoff = policy.backoff(attempt);
                warn!(
                    operation,
                    resource,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Fetch failed, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`ThreadExpander`] with timeouts, retries and the politeness gate.
/// A failed attempt claims nothing; only a complete expansion is returned.
pub struct ResilientExpander<E> {
    inner: E,
    gate: Arc<PolitenessGate>,
    policy: RetryPolicy,
}

impl<E: ThreadExpander> ResilientExpander<E> {
    pub fn new(inner: E, gate: Arc<PolitenessGate>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            gate,
            policy,
        }
    }
}

#[async_trait]
impl<E: ThreadExpander> ThreadExpander for ResilientExpander<E> {
    async fn expand(&self, thread_ref: &ThreadRef) -> Result<Vec<ThreadMessage>, ExpandError> {
        let mut messages = run_with_retries(
            &self.policy,
            &self.gate,
            "expand",
            thread_ref.as_str(),
            || self.inner.expand(thread_ref),
        )
        .await?;

        if messages.is_empty() {
            return Err(ExpandError::EmptyThread(thread_ref.clone()));
        }
        messages.sort_by_key(|m| m.position);
        Ok(messages)
    }
}

/// [`ListingSource`] with timeouts, retries and the politeness gate.
pub struct ResilientListing<L> {
    inner: L,
    gate: Arc<PolitenessGate>,
    policy: RetryPolicy,
}

impl<L: ListingSource> ResilientListing<L> {
    pub fn new(inner: L, gate: Arc<PolitenessGate>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            gate,
            policy,
        }
    }
}

#[async_trait]
impl<L: ListingSource> ListingSource for ResilientListing<L> {
    async fn next_page(
        &self,
        window: &TimeWindow,
        cursor: Option<&Cursor>,
    ) -> Result<ListingPage, FetchError> {
        let resource = cursor.map(Cursor::as_str).unwrap_or("start");
        run_with_retries(&self.policy, &self.gate, "listing", resource, || {
            self.inner.next_page(window, cursor)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{thread, MockExpander};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(10),
            timeout: Duration::from_millis(200),
        }
    }

    fn wrap(mock: MockExpander) -> ResilientExpander<MockExpander> {
        ResilientExpander::new(mock, Arc::new(PolitenessGate::unlimited()), quick_policy())
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let mock = MockExpander::new()
            .on_thread("m1", thread(&[("m1", "Feature X"), ("m2", "Re: Feature X")]))
            .failing_first("m1", 2);
        let expander = wrap(mock);

        let messages = expander.expand(&ThreadRef::new("m1")).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(expander.inner.calls("m1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_expansion_times_out_after_every_attempt() {
        let expander = wrap(MockExpander::new().hanging("m1"));

        let err = expander.expand(&ThreadRef::new("m1")).await.unwrap_err();
        assert_eq!(err, ExpandError::Fetch(FetchError::Timeout { after_ms: 200 }));
        assert_eq!(expander.inner.calls("m1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_thread_is_not_retried() {
        let expander = wrap(MockExpander::new().on_thread("m1", Vec::new()));

        let err = expander.expand(&ThreadRef::new("m1")).await.unwrap_err();
        assert_eq!(err, ExpandError::EmptyThread(ThreadRef::new("m1")));
        assert_eq!(expander.inner.calls("m1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_come_back_in_position_order() {
        let mut messages = thread(&[
            ("m1", "Feature X"),
            ("m2", "Re: Feature X"),
            ("m3", "Re: Feature X"),
        ]);
        messages.reverse();
        let expander = wrap(MockExpander::new().on_thread("m1", messages));

        let ids: Vec<_> = expander
            .expand(&ThreadRef::new("m1"))
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.message_id.to_string())
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn backoff_grows_exponentially_with_bounded_jitter() {
        let policy = quick_policy();
        for attempt in 0..3 {
            let delay = policy.backoff(attempt);
            let floor = Duration::from_millis(10) * 2u32.pow(attempt);
            assert!(delay >= floor);
            assert!(delay <= floor + Duration::from_millis(10));
        }
    }
}
