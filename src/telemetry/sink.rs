//! Remote destinations for telemetry records.

// crates.io
use http::{
	HeaderValue, Method, Request,
	header::{ACCEPT, CONTENT_TYPE},
};
// self
use crate::{
	_prelude::*,
	error::{ApiFailure, ConfigError},
	http::{HttpRequest, HttpTransport, is_json, send_with_timeout},
	telemetry::LogLevel,
};

/// Boxed future returned by [`LogSink::send`].
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a + Send>>;

/// Accepts one telemetry payload per call; failures trigger redelivery with backoff.
pub trait LogSink
where
	Self: 'static + Send + Sync,
{
	/// Delivers `payload` recorded at `level`.
	fn send<'a>(&'a self, level: LogLevel, payload: &'a JsonValue) -> SinkFuture<'a>;
}

/// Posts payloads as JSON to a collector URL.
pub struct HttpLogSink<C>
where
	C: ?Sized + HttpTransport,
{
	transport: Arc<C>,
	url: Url,
	timeout: Duration,
}
impl<C> HttpLogSink<C>
where
	C: ?Sized + HttpTransport,
{
	/// Creates a sink posting to `url` through `transport`.
	pub fn new(transport: Arc<C>, url: Url, timeout: Duration) -> Self {
		Self { transport, url, timeout }
	}

	fn build(&self, payload: &JsonValue) -> Result<HttpRequest, ConfigError> {
		let body = serde_json::to_vec(payload).map_err(ConfigError::BodySerialize)?;
		let mut request =
			Request::builder().method(Method::POST).uri(self.url.as_str()).body(body)?;

		request.headers_mut().insert(ACCEPT, HeaderValue::from_static("application/json"));
		request.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

		Ok(request)
	}
}
impl<C> LogSink for HttpLogSink<C>
where
	C: ?Sized + HttpTransport,
{
	fn send<'a>(&'a self, _level: LogLevel, payload: &'a JsonValue) -> SinkFuture<'a> {
		Box::pin(async move {
			let request = self.build(payload)?;
			let response = send_with_timeout(self.transport.as_ref(), request, self.timeout).await?;
			let status = response.status();

			if status.is_success() {
				return Ok(());
			}

			let failure =
				ApiFailure::from_body(status.as_u16(), response.body(), is_json(response.headers()));

			if status.is_server_error() {
				Err(Error::ServerError(failure))
			} else {
				Err(Error::BadResponse(failure))
			}
		})
	}
}
impl<C> Debug for HttpLogSink<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpLogSink").field("url", &self.url.as_str()).finish()
	}
}
