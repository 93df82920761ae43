//! Waiting for the optimizer to fill in a suggestion.
//!
//! A freshly created suggestion comes back without values. The job is
//! re-fetched with exponential backoff until it is filled, the overall
//! timeout elapses, or the caller cancels.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tl_remote::{RemoteStore, WireResult};
use tl_types::{ResultId, TlError, TlResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            backoff_factor: 1.5,
            max_delay_ms: 30_000,
            timeout_ms: 600_000,
        }
    }
}

impl PollPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms).min(self.max_delay())
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay after `current`, capped at `max_delay`. Factors below 1 are
    /// treated as 1.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.backoff_factor.max(1.0);
        Duration::from_secs_f64(next.min(self.max_delay().as_secs_f64()))
    }
}

/// Fetch job `id` until its variables are filled in.
///
/// Only an unfilled job is retried; store errors are returned as-is.
pub async fn await_suggestion<S: RemoteStore + ?Sized>(
    store: &S,
    id: ResultId,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> TlResult<WireResult> {
    let started = Instant::now();
    let timeout = policy.timeout();
    let mut delay = policy.initial_delay();
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(TlError::SuggestionCancelled { result_id: id });
        }

        let job = store.get_job(id).await?;
        attempts += 1;
        if job.is_filled() {
            debug!(result_id = id, attempts, "suggestion filled");
            return Ok(job);
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(TlError::SuggestionTimeout {
                result_id: id,
                waited_ms: elapsed.as_millis() as u64,
            });
        }

        let wait = delay.min(timeout - elapsed);
        debug!(
            result_id = id,
            attempts,
            wait_ms = wait.as_millis() as u64,
            "suggestion not filled yet"
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(TlError::SuggestionCancelled { result_id: id });
            }
            _ = tokio::time::sleep(wait) => {}
        }
        delay = policy.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_remote::{MemoryStore, MemoryStoreConfig, WireSetting};
    use tl_types::{OutcomeSpec, ParameterSpec};

    async fn store_with_suggestion(fill_after_polls: u32) -> (MemoryStore, ResultId) {
        let store = MemoryStore::new(MemoryStoreConfig {
            fill_after_polls,
            seed: Some(11),
            ..Default::default()
        });
        let task = store
            .create_experiment(
                "poll",
                "",
                &[
                    WireSetting::from_parameter(&ParameterSpec::float("x", 0.0, 1.0)),
                    WireSetting::from_outcome(&OutcomeSpec::new("y")),
                ],
            )
            .await
            .unwrap();
        let suggestion = store.create_suggestion(task).await.unwrap();
        (store, suggestion.id)
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = PollPolicy::default();
        let mut delay = policy.initial_delay();
        assert_eq!(delay, Duration::from_secs(2));
        delay = policy.next_delay(delay);
        assert_eq!(delay, Duration::from_secs(3));
        for _ in 0..20 {
            delay = policy.next_delay(delay);
        }
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn test_policy_defaults_fill_missing_fields() {
        let policy: PollPolicy = serde_json::from_str(r#"{"timeout_ms": 5000}"#).unwrap();
        assert_eq!(policy.timeout(), Duration::from_secs(5));
        assert_eq!(policy.initial_delay_ms, 2_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_with_backoff_until_filled() {
        let (store, id) = store_with_suggestion(3).await;
        let started = Instant::now();

        let job = await_suggestion(&store, id, &PollPolicy::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(job.is_filled());
        // 2s + 3s + 4.5s between the four fetches
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(9_500), "waited {waited:?}");
        assert!(waited < Duration::from_secs(10), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_never_filled() {
        let (store, id) = store_with_suggestion(u32::MAX).await;
        let policy = PollPolicy {
            timeout_ms: 10_000,
            ..Default::default()
        };

        let err = await_suggestion(&store, id, &policy, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            TlError::SuggestionTimeout { result_id, waited_ms } => {
                assert_eq!(result_id, id);
                assert!((10_000..10_100).contains(&waited_ms), "waited {waited_ms} ms");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let (store, id) = store_with_suggestion(u32::MAX).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let err = await_suggestion(&store, id, &PollPolicy::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TlError::SuggestionCancelled { result_id } if result_id == id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_errors_are_not_retried() {
        let (store, id) = store_with_suggestion(2).await;
        store.fail_next_request("connection reset");

        let err = await_suggestion(&store, id, &PollPolicy::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TlError::Remote(tl_types::RemoteError::Http { .. })));
    }
}
