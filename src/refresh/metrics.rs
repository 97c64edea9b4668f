// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-coordinator refresh counters.
///
/// One cycle counts once however many callers waited on it, so `attempts` equals the number of
/// calls the auth service saw and `attempts - successes - failures` is the number still pending.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
}
impl RefreshMetrics {
	/// Renewals started.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Renewals that installed a new access token.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Renewals that ended in a [`RefreshError`](crate::error::RefreshError).
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Renewals started but not yet settled.
	pub fn pending(&self) -> u64 {
		self.attempts().saturating_sub(self.successes() + self.failures())
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn pending_tracks_unsettled_renewals() {
		let metrics = RefreshMetrics::default();

		metrics.record_attempt();
		metrics.record_attempt();
		metrics.record_failure();

		assert_eq!(metrics.pending(), 1);

		metrics.record_success();

		assert_eq!((metrics.attempts(), metrics.successes(), metrics.failures()), (2, 1, 1));
		assert_eq!(metrics.pending(), 0);
	}
}
