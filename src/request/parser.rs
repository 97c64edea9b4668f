//! Response parsing strategies plugged into the executor.

// std
use std::marker::PhantomData;
// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{_prelude::*, error::ApiFailure, http::HttpResponse};

/// Turns a classified response into a typed value.
///
/// The executor only calls [`parse`](ResponseParser::parse) for non-5xx, non-401 responses that
/// carry a body worth reading; `204 No Content` and `DELETE`/`HEAD` responses go through
/// [`no_content`](ResponseParser::no_content) instead.
pub trait ResponseParser
where
	Self: Send + Sync,
{
	/// Parsed value type.
	type Output: Send;

	/// Parses a response; `is_json` reports whether the content type announced JSON.
	fn parse(&self, response: &HttpResponse, is_json: bool) -> Result<Self::Output>;

	/// Produces a value when success is signaled by status code alone.
	fn no_content(&self, status: u16) -> Result<Self::Output>;
}

/// Decodes successful JSON bodies into `T`; non-2xx responses become [`Error::BadResponse`].
///
/// Bodyless successes decode from JSON `null`, so `Option<T>`, `()`, and [`JsonValue`] outputs
/// accept them while struct outputs report a decode error.
pub struct JsonParser<T>(PhantomData<fn() -> T>);
impl<T> JsonParser<T> {
	/// Creates a parser for `T`.
	pub fn new() -> Self {
		Self(PhantomData)
	}
}
impl<T> Default for JsonParser<T> {
	fn default() -> Self {
		Self::new()
	}
}
impl<T> Debug for JsonParser<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("JsonParser")
	}
}
impl<T> ResponseParser for JsonParser<T>
where
	T: 'static + DeserializeOwned + Send,
{
	type Output = T;

	fn parse(&self, response: &HttpResponse, is_json: bool) -> Result<T> {
		let status = response.status().as_u16();

		if !response.status().is_success() {
			return Err(Error::BadResponse(ApiFailure::from_body(status, response.body(), is_json)));
		}
		if response.body().iter().all(u8::is_ascii_whitespace) {
			return self.no_content(status);
		}

		let mut de = serde_json::Deserializer::from_slice(response.body());

		serde_path_to_error::deserialize(&mut de).map_err(|source| Error::Decode { source, status })
	}

	fn no_content(&self, status: u16) -> Result<T> {
		serde_path_to_error::deserialize(JsonValue::Null)
			.map_err(|source| Error::Decode { source, status })
	}
}

/// Reports success as `status == 204`, ignoring the body.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusParser;
impl ResponseParser for StatusParser {
	type Output = bool;

	fn parse(&self, response: &HttpResponse, _is_json: bool) -> Result<bool> {
		self.no_content(response.status().as_u16())
	}

	fn no_content(&self, status: u16) -> Result<bool> {
		Ok(status == 204)
	}
}

/// Returns successful bodies as UTF-8 text.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextParser;
impl ResponseParser for TextParser {
	type Output = String;

	fn parse(&self, response: &HttpResponse, is_json: bool) -> Result<String> {
		let status = response.status().as_u16();

		if !response.status().is_success() {
			return Err(Error::BadResponse(ApiFailure::from_body(status, response.body(), is_json)));
		}

		Ok(String::from_utf8_lossy(response.body()).into_owned())
	}

	fn no_content(&self, _status: u16) -> Result<String> {
		Ok(String::new())
	}
}
