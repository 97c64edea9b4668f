//! Ping/pong liveness probing for started connections.

// crates.io
use tokio::time::Instant;
// self
use crate::_prelude::*;

/// Oldest engine version whose event service answers pings.
pub const HEARTBEAT_ENGINE_VERSION: &str = "20.09";

/// Returns `true` when `engine_version` (`YY.MM[.patch]`) is at least
/// [`HEARTBEAT_ENGINE_VERSION`]; unknown or unparseable versions never heartbeat.
pub fn supports_heartbeat(engine_version: Option<&str>) -> bool {
	match (engine_version.and_then(parse_version), parse_version(HEARTBEAT_ENGINE_VERSION)) {
		(Some(version), Some(threshold)) => version >= threshold,
		_ => false,
	}
}

fn parse_version(version: &str) -> Option<(u32, u32)> {
	let mut parts = version.trim().split('.');
	let major = parts.next()?.parse().ok()?;
	let minor = parts.next()?.parse().ok()?;

	Some((major, minor))
}

/// Result of [`Heartbeat::poll`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeartbeatAction {
	/// Send a ping carrying this payload.
	Ping(String),
	/// The outstanding ping was not acknowledged in time.
	TimedOut,
	/// Nothing is due yet.
	Idle,
}

/// Heartbeat timers for one started connection; dropped with the connection.
#[derive(Clone, Debug)]
pub struct Heartbeat {
	interval: Duration,
	timeout: Duration,
	next_ping_at: Option<Instant>,
	last_sent_at: Option<Instant>,
	deadline: Option<Instant>,
	missed_deadline: bool,
	sequence: u64,
}
impl Heartbeat {
	/// Creates a heartbeat whose first ping is due at `now`.
	pub fn start(interval: Duration, timeout: Duration, now: Instant) -> Self {
		Self {
			interval,
			timeout,
			next_ping_at: Some(now),
			last_sent_at: None,
			deadline: None,
			missed_deadline: false,
			sequence: 0,
		}
	}

	/// Instant at which [`poll`](Self::poll) has work to do.
	pub fn next_wakeup(&self) -> Option<Instant> {
		if self.missed_deadline {
			return None;
		}

		self.deadline.or(self.next_ping_at)
	}

	/// Instant the last ping was sent.
	pub fn last_sent_at(&self) -> Option<Instant> {
		self.last_sent_at
	}

	/// Fires the timeout (at most once) or the next ping when due.
	pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
		if self.missed_deadline {
			return HeartbeatAction::Idle;
		}
		if let Some(deadline) = self.deadline {
			if now < deadline {
				return HeartbeatAction::Idle;
			}

			self.deadline = None;
			self.missed_deadline = true;

			return HeartbeatAction::TimedOut;
		}

		match self.next_ping_at {
			Some(due) if now >= due => {
				self.sequence += 1;
				self.next_ping_at = None;
				self.last_sent_at = Some(now);
				self.deadline = Some(now + self.timeout);

				HeartbeatAction::Ping(format!("ping-{}", self.sequence))
			},
			_ => HeartbeatAction::Idle,
		}
	}

	/// Acknowledges a pong; returns `false` when no ping was outstanding.
	pub fn on_pong(&mut self, now: Instant) -> bool {
		if self.deadline.take().is_none() {
			return false;
		}

		self.next_ping_at = Some(now + self.interval);

		true
	}
}
