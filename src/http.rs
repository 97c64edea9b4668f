//! Transport primitives for API requests.
//!
//! The module exposes [`HttpTransport`] so downstream crates (and tests) can plug a custom
//! HTTP stack under the executor. Requests and responses use the [`http`] crate's types with
//! fully buffered bodies; timeouts are enforced by the executor, not the transport.

// crates.io
use http::{HeaderMap, header::CONTENT_TYPE};
// self
use crate::{_prelude::*, error::BoxError};

/// Fully buffered outbound request.
pub type HttpRequest = http::Request<Vec<u8>>;
/// Fully buffered inbound response.
pub type HttpResponse = http::Response<Vec<u8>>;
/// Boxed future returned by [`HttpTransport::execute`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of executing API requests.
///
/// Implementations must be `Send + Sync + 'static` because the refresh coordinator and the
/// telemetry deliverer hold them behind `Arc` inside detached tasks.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends one request and buffers the whole response.
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_>;
}
impl<T> HttpTransport for Arc<T>
where
	T: ?Sized + HttpTransport,
{
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
		self.as_ref().execute(request)
	}
}

/// Transport-level failures raised before any response arrives.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// The underlying client gave up waiting.
	#[error("Transport timed out.")]
	Timeout,
	/// DNS, TCP, or TLS failure.
	#[error("Network error occurred while calling the API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	pub(crate) fn into_error(self, timeout: Duration) -> Error {
		match self {
			Self::Timeout => Error::Timeout { timeout },
			Self::Network { source } => Error::NetworkUnreachable { source },
		}
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}

/// Sends one request through `transport`, bounding it by `timeout`.
pub(crate) async fn send_with_timeout<C>(
	transport: &C,
	request: HttpRequest,
	timeout: Duration,
) -> Result<HttpResponse>
where
	C: ?Sized + HttpTransport,
{
	match tokio::time::timeout(timeout, transport.execute(request)).await {
		Ok(Ok(response)) => Ok(response),
		Ok(Err(e)) => Err(e.into_error(timeout)),
		Err(_) => Err(Error::Timeout { timeout }),
	}
}

/// Returns `true` when the `content-type` header announces JSON.
pub fn is_json(headers: &HeaderMap) -> bool {
	headers
		.get(CONTENT_TYPE)
		.and_then(|value| value.to_str().ok())
		.is_some_and(|value| value.contains("application/json"))
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let request = reqwest::Request::try_from(request).map_err(TransportError::network)?;
			let response = self.0.execute(request).await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let body = response.bytes().await?.to_vec();
			let mut response_new = HttpResponse::new(body);

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}
