// self
use crate::_prelude::*;

/// Telemetry severity, ordered `trace < info = log < warn < error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	/// Verbose diagnostics.
	Trace,
	/// Informational record.
	Info,
	/// Alias of [`LogLevel::Info`].
	Log,
	/// Recoverable problem.
	Warn,
	/// Failure.
	Error,
}
impl LogLevel {
	/// Parses a level name; unknown names yield `None`.
	pub fn parse(name: &str) -> Option<Self> {
		match name.trim().to_ascii_lowercase().as_str() {
			"trace" => Some(Self::Trace),
			"info" => Some(Self::Info),
			"log" => Some(Self::Log),
			"warn" => Some(Self::Warn),
			"error" => Some(Self::Error),
			_ => None,
		}
	}

	/// Stable lowercase name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Trace => "trace",
			Self::Info => "info",
			Self::Log => "log",
			Self::Warn => "warn",
			Self::Error => "error",
		}
	}

	/// Numeric rank; `info` and `log` share one.
	pub const fn rank(self) -> u8 {
		match self {
			Self::Trace => 0,
			Self::Info | Self::Log => 1,
			Self::Warn => 2,
			Self::Error => 3,
		}
	}

	/// Returns `true` when this level reaches `minimum`.
	pub fn reaches(self, minimum: Self) -> bool {
		self.rank() >= minimum.rank()
	}
}
impl Display for LogLevel {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
