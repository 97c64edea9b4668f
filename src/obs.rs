//! Spans and counters shared by every client component.
//!
//! Both halves compile to no-ops unless their feature is on:
//!
//! - `tracing`: each operation runs inside a `telephony_client.op` span carrying `op` and `stage`.
//! - `metrics`: `telephony_client_op_total{op, outcome}` goes to whichever global recorder the
//!   host installed.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Which part of the client an observation belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// One executor request, including its refresh-and-retry cycle.
	Request,
	/// One shared token refresh.
	Refresh,
	/// One event channel connection attempt.
	Channel,
	/// One remote telemetry delivery.
	Telemetry,
}
impl OpKind {
	/// Label used for the `op` field.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::Request => "request",
			OpKind::Refresh => "refresh",
			OpKind::Channel => "channel",
			OpKind::Telemetry => "telemetry",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Phase of an operation reported to the `outcome` label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Counted before any I/O happens.
	Attempt,
	/// The operation produced its value.
	Success,
	/// The operation surfaced an error to a caller, a hook, or `on_error`.
	Failure,
}
impl OpOutcome {
	/// Label used for the `outcome` field.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
