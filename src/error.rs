//! Client-level error types shared across the executor, refresh coordinator, and channel.

// self
use crate::_prelude::*;

/// Client-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical client error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Token refresh failed while it was requested explicitly.
	#[error(transparent)]
	Refresh(#[from] RefreshError),

	/// The request did not complete within the configured timeout.
	#[error("Request timed out after {timeout:?}.")]
	Timeout {
		/// Timeout that elapsed.
		timeout: Duration,
	},
	/// Transport-level failure before any response was received (DNS, TCP, TLS).
	#[error("Network is unreachable.")]
	NetworkUnreachable {
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
	/// Backend rejected the request (4xx or parser-detected failure).
	#[error("Bad response ({}): {}.", .0.status, .0.message)]
	BadResponse(ApiFailure),
	/// Backend failed while handling the request (5xx).
	#[error("Server error ({}): {}.", .0.status, .0.message)]
	ServerError(ApiFailure),
	/// The request was rejected again after a successful token refresh.
	#[error("Authentication failed after refreshing the token (status {status}).")]
	AuthenticationFailed {
		/// Status code of the retried response.
		status: u16,
	},
	/// Response body could not be decoded into the requested shape.
	#[error("Response body could not be decoded.")]
	Decode {
		/// Path-aware decoding failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code of the decoded response.
		status: u16,
	},
}
impl Error {
	/// Wraps a transport failure as [`Error::NetworkUnreachable`].
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::NetworkUnreachable { source: Box::new(src) }
	}

	/// Returns the HTTP status attached to the error, when one exists.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::BadResponse(failure) | Self::ServerError(failure) => Some(failure.status),
			Self::AuthenticationFailed { status } | Self::Decode { status, .. } => Some(*status),
			Self::Refresh(RefreshError::RejectedByServer { status, .. }) => Some(*status),
			_ => None,
		}
	}
}

/// Structured failure returned by the backend for 4xx and 5xx responses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiFailure {
	/// HTTP status code.
	pub status: u16,
	/// Human-readable message (the raw body for non-JSON responses).
	pub message: String,
	/// Backend timestamp, if supplied.
	pub timestamp: Option<JsonValue>,
	/// Backend error identifier, if supplied.
	pub error_id: Option<String>,
	/// Additional structured details, if supplied.
	pub details: Option<JsonValue>,
}
impl ApiFailure {
	/// Builds a failure from a JSON error body (`{message, timestamp, error_id, details}`).
	pub fn from_json(status: u16, body: &JsonValue) -> Self {
		let message = match body.get("message") {
			Some(JsonValue::String(message)) => message.clone(),
			Some(other) => other.to_string(),
			None => body.to_string(),
		};

		Self {
			status,
			message,
			timestamp: body.get("timestamp").filter(|value| !value.is_null()).cloned(),
			error_id: body.get("error_id").and_then(JsonValue::as_str).map(str::to_owned),
			details: body.get("details").filter(|value| !value.is_null()).cloned(),
		}
	}

	/// Builds a failure from a raw text body.
	pub fn from_text(status: u16, text: impl Into<String>) -> Self {
		Self { status, message: text.into(), ..Default::default() }
	}

	/// Builds a failure from raw body bytes, parsing JSON when the flag says so.
	pub fn from_body(status: u16, body: &[u8], is_json: bool) -> Self {
		match is_json.then(|| serde_json::from_slice::<JsonValue>(body)) {
			Some(Ok(value)) => Self::from_json(status, &value),
			_ => Self::from_text(status, String::from_utf8_lossy(body)),
		}
	}
}

/// Configuration and validation failures raised by the client.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] http::Error),
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	BodySerialize(#[source] serde_json::Error),
	/// Server host or base URL cannot be parsed.
	#[error("Server URL is invalid.")]
	InvalidServer {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Backoff bounds are not ordered or are zero.
	#[error("Backoff bounds are invalid: min {min:?}, max {max:?}.")]
	InvalidBackoff {
		/// Configured lower bound.
		min: Duration,
		/// Configured upper bound.
		max: Duration,
	},
	/// A timeout or interval was configured as zero.
	#[error("The {field} duration must be positive.")]
	ZeroDuration {
		/// Configuration field name.
		field: &'static str,
	},
	/// Telemetry retry budget must allow at least one delivery.
	#[error("Telemetry max_attempts must be at least 1.")]
	ZeroAttempts,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Token refresh failures, broadcast to every caller that waited on the same refresh.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefreshError {
	/// No refresh token is configured; no network call was made.
	#[error("No refresh token is configured.")]
	NoRefreshToken,
	/// The refresh call failed before the auth service answered.
	#[error("Token refresh failed: {message}.")]
	NetworkFailure {
		/// Human-readable failure summary.
		message: String,
	},
	/// The auth service rejected the refresh token.
	#[error("Token refresh was rejected ({status}): {message}.")]
	RejectedByServer {
		/// HTTP status code returned by the auth service.
		status: u16,
		/// Backend-supplied message.
		message: String,
	},
}
impl RefreshError {
	/// Builds a [`RefreshError::NetworkFailure`] from any displayable failure.
	pub fn network(message: impl Display) -> Self {
		Self::NetworkFailure { message: message.to_string() }
	}

	/// Returns `true` when the failure is caused by a missing refresh token.
	pub fn is_no_refresh_token(&self) -> bool {
		matches!(self, Self::NoRefreshToken)
	}
}

/// Event channel failures, reported through the `on_error` callback.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ChannelError {
	/// Transport-level failure (connect, read, or write).
	#[error("Event channel connection error: {message}.")]
	Connection {
		/// Human-readable failure summary.
		message: String,
	},
	/// No heartbeat acknowledgment arrived before the deadline.
	#[error("Event channel heartbeat timed out.")]
	HeartbeatTimeout,
	/// The server sent a malformed or out-of-order protocol frame.
	#[error("Event channel handshake failed: {reason}.")]
	HandshakeFailed {
		/// Description of the offending frame.
		reason: String,
	},
}
impl ChannelError {
	/// Builds a [`ChannelError::Connection`] from any displayable failure.
	pub fn connection(message: impl Display) -> Self {
		Self::Connection { message: message.to_string() }
	}

	/// Builds a [`ChannelError::HandshakeFailed`] from any displayable reason.
	pub fn handshake(reason: impl Display) -> Self {
		Self::HandshakeFailed { reason: reason.to_string() }
	}
}
