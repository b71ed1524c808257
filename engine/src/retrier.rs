//! Generic request retrier.
//!
//! Wraps a fallible async operation with exponential backoff and jitter,
//! bounded by a maximum elapsed window. Clients use this instead of
//! hand-rolling retry loops; the policy captures the backoff curve and the
//! window, and an optional predicate decides which errors are retryable.

use std::{
	fmt::Display,
	future::Future,
	time::{Duration, Instant},
};

use core::cmp::min;
use rand::Rng;

const MAX_DELAY_TIME: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub initial_delay: Duration,
	pub max_delay: Duration,
	pub max_elapsed: Duration,
}

impl RetryPolicy {
	pub fn with_max_elapsed(max_elapsed: Duration) -> Self {
		Self { initial_delay: Duration::from_secs(1), max_delay: MAX_DELAY_TIME, max_elapsed }
	}

	pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
		let backoff = min(
			self.max_delay,
			self.initial_delay.saturating_mul(2u32.saturating_pow(attempt)),
		);
		// Always keep at least half of the backoff so retries don't cluster.
		let half = backoff / 2;
		if half.is_zero() {
			return backoff;
		}
		half + rand::thread_rng().gen_range(Duration::default()..half)
	}
}

/// Retries `op` until it succeeds, the policy's elapsed window runs out, or
/// `should_retry` rejects the error. The last error is returned on exhaustion.
pub async fn retry_if<T, E, F, Fut, P>(
	policy: RetryPolicy,
	name: &'static str,
	mut op: F,
	should_retry: P,
) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
	P: Fn(&E) -> bool,
	E: Display,
{
	let started = Instant::now();
	let mut attempt: u32 = 0;
	loop {
		match op().await {
			Ok(value) => return Ok(value),
			Err(error) => {
				if !should_retry(&error) {
					return Err(error);
				}
				let delay = policy.delay_for_attempt(attempt);
				if started.elapsed() + delay >= policy.max_elapsed {
					return Err(error);
				}
				tracing::warn!(
					"{name}: attempt {attempt} failed: {error}. Retrying in {}ms",
					delay.as_millis()
				);
				tokio::time::sleep(delay).await;
				attempt = attempt.saturating_add(1);
			},
		}
	}
}

/// [`retry_if`] with every error considered retryable.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, name: &'static str, op: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
	E: Display,
{
	retry_if(policy, name, op, |_| true).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{
		atomic::{AtomicU32, Ordering},
		Arc,
	};

	fn test_policy() -> RetryPolicy {
		RetryPolicy {
			initial_delay: Duration::from_millis(10),
			max_delay: Duration::from_millis(50),
			max_elapsed: Duration::from_secs(2),
		}
	}

	#[tokio::test]
	async fn succeeds_after_transient_failures() {
		let attempts = Arc::new(AtomicU32::new(0));
		let counter = attempts.clone();

		let result = retry(test_policy(), "test", move || {
			let counter = counter.clone();
			async move {
				if counter.fetch_add(1, Ordering::Relaxed) < 2 {
					Err("transient")
				} else {
					Ok(42u32)
				}
			}
		})
		.await;

		assert_eq!(result, Ok(42));
		assert_eq!(attempts.load(Ordering::Relaxed), 3);
	}

	#[tokio::test]
	async fn gives_up_once_window_is_exhausted() {
		let policy = RetryPolicy {
			initial_delay: Duration::from_millis(20),
			max_delay: Duration::from_millis(20),
			max_elapsed: Duration::from_millis(50),
		};

		let result: Result<(), &str> = retry(policy, "test", || async { Err("always") }).await;

		assert_eq!(result, Err("always"));
	}

	#[tokio::test]
	async fn predicate_stops_retrying_immediately() {
		let attempts = Arc::new(AtomicU32::new(0));
		let counter = attempts.clone();

		let result: Result<(), &str> = retry_if(
			test_policy(),
			"test",
			move || {
				counter.fetch_add(1, Ordering::Relaxed);
				async { Err("fatal") }
			},
			|error| *error != "fatal",
		)
		.await;

		assert_eq!(result, Err("fatal"));
		assert_eq!(attempts.load(Ordering::Relaxed), 1);
	}
}
