//! Bounded exponential backoff with jitter shared by channel reconnects and telemetry retries.

// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, error::ConfigError};

/// Computes the delay before retry `attempt`, always within `[min, max]`.
///
/// Attempt `0` yields exactly `min` so the first recovery is fast. Later attempts grow as
/// `min * 2^attempt` (saturating, capped at `max`) with jitter over the upper half of that
/// window, then get clamped back into the bounds. A `max` below `min` is treated as `min`.
pub fn compute_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
	let min_us = duration_us(min);
	let max_us = duration_us(max).max(min_us);

	if attempt == 0 {
		return Duration::from_micros(min_us);
	}

	let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
	let ceiling = min_us.saturating_mul(factor).min(max_us);
	let floor = ceiling / 2;
	let jittered = if ceiling > floor { rand::rng().random_range(floor..=ceiling) } else { ceiling };

	Duration::from_micros(jittered.clamp(min_us, max_us))
}

// Microsecond resolution keeps sub-millisecond bounds exact.
fn duration_us(duration: Duration) -> u64 {
	u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Validated `[min, max]` bounds for [`compute_delay`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
	/// Lower bound, also the exact delay of the first retry.
	#[serde(rename = "min_ms", with = "millis")]
	pub min: Duration,
	/// Upper bound no delay ever exceeds.
	#[serde(rename = "max_ms", with = "millis")]
	pub max: Duration,
}
impl BackoffPolicy {
	/// Telemetry redelivery bounds: 1 s to 50 s.
	pub const TELEMETRY: Self =
		Self { min: Duration::from_millis(1_000), max: Duration::from_millis(50_000) };

	/// Builds a policy after checking `0 < min <= max`.
	pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
		let policy = Self { min, max };

		policy.validate()?;

		Ok(policy)
	}

	/// Re-checks bounds, e.g. after deserialization.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.min.is_zero() || self.min > self.max {
			return Err(ConfigError::InvalidBackoff { min: self.min, max: self.max });
		}

		Ok(())
	}

	/// Delay before retry `attempt`.
	pub fn delay(&self, attempt: u32) -> Duration {
		compute_delay(attempt, self.min, self.max)
	}
}
impl Default for BackoffPolicy {
	fn default() -> Self {
		Self { min: Duration::from_millis(1_000), max: Duration::from_millis(30_000) }
	}
}

pub(crate) mod millis {
	//! Serde adapter storing [`Duration`] values as integer milliseconds.

	// self
	use crate::_prelude::*;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}
