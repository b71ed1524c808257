//! Soft rate-limit state owned by the scheduler.
//!
//! Each timestamp is written by exactly one duty. Nothing here survives a
//! restart; a fresh process simply runs every rate-limited duty on its first
//! eligible tick.

#[derive(Debug, Default)]
pub struct AppState {
	pub last_price_updated_timestamp: Option<u64>,
	pub force_exits_updated_timestamp: Option<u64>,
	pub ltv_updated_timestamp: Option<u64>,
}

/// Seconds since the unix epoch. Duties use this for rate-limit arithmetic
/// so they stay comparable with on-chain timestamps.
pub fn unix_now() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.expect("system clock before unix epoch")
		.as_secs()
}

/// Whether a rate-limited duty already ran within its interval.
pub fn within_interval(last_run: Option<u64>, interval: u64, now: u64) -> bool {
	matches!(last_run, Some(last_run) if last_run + interval > now)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn never_ran_is_not_rate_limited() {
		assert!(!within_interval(None, 120, 1_000_000));
	}

	#[test]
	fn second_pass_within_interval_is_a_noop() {
		let now = 1_000_000;
		assert!(within_interval(Some(now - 119), 120, now));
		assert!(!within_interval(Some(now - 120), 120, now));
	}
}
