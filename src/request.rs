//! Single-use request descriptions and their translation into wire requests.

pub mod parser;

pub use http::Method;
pub use parser::*;

// crates.io
use http::{
	HeaderMap, HeaderValue, Request,
	header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
};
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::AuthScheme,
	error::ConfigError,
	http::HttpRequest,
};

const X_AUTH_TOKEN: &str = "x-auth-token";
const TENANT_HEADER: &str = "wazo-tenant";

/// Query parameters with unique keys; absent and empty values never reach the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query(Vec<(String, Option<String>)>);
impl Query {
	/// Creates an empty query.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets `key` to `value`, replacing any earlier value for the same key.
	pub fn param(self, key: impl Into<String>, value: impl ToString) -> Self {
		self.maybe(key, Some(value))
	}

	/// Sets `key` to an optional value; `None` keeps the key but omits it from the string.
	pub fn maybe(mut self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
		let key = key.into();
		let value = value.map(|value| value.to_string());

		match self.0.iter_mut().find(|(existing, _)| *existing == key) {
			Some(slot) => slot.1 = value,
			None => self.0.push((key, value)),
		}

		self
	}

	/// Returns `true` when no key was set.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Renders `k=v&...`, percent-encoding values and skipping absent or empty ones.
	pub fn to_query_string(&self) -> String {
		self.0
			.iter()
			.filter_map(|(key, value)| match value.as_deref() {
				Some(value) if !value.is_empty() =>
					Some(format!("{key}={}", encode_component(value))),
				_ => None,
			})
			.collect::<Vec<_>>()
			.join("&")
	}
}
impl<K, V> FromIterator<(K, Option<V>)> for Query
where
	K: Into<String>,
	V: ToString,
{
	fn from_iter<I>(iter: I) -> Self
	where
		I: IntoIterator<Item = (K, Option<V>)>,
	{
		iter.into_iter().fold(Self::new(), |query, (key, value)| query.maybe(key, value))
	}
}

/// One API call: method, service path, query, JSON body, and optional header overrides.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingRequest {
	/// HTTP method.
	pub method: Method,
	/// Service path relative to the API root, e.g. `confd/1.1/users/me`.
	pub path: String,
	/// Query parameters, only encoded for `GET`.
	pub query: Query,
	/// JSON body, never sent with `GET`.
	pub body: Option<JsonValue>,
	/// Full header set replacing the default authorization/accept/content-type triple.
	pub headers: Option<HeaderMap>,
}
impl PendingRequest {
	/// Creates a request for `method` on `path`.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self { method, path: path.into(), query: Query::new(), body: None, headers: None }
	}

	/// `GET` request.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::GET, path)
	}

	/// `POST` request.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(Method::POST, path)
	}

	/// `PUT` request.
	pub fn put(path: impl Into<String>) -> Self {
		Self::new(Method::PUT, path)
	}

	/// `DELETE` request.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(Method::DELETE, path)
	}

	/// `HEAD` request.
	pub fn head(path: impl Into<String>) -> Self {
		Self::new(Method::HEAD, path)
	}

	/// Sets the query parameters.
	pub fn query(mut self, query: Query) -> Self {
		self.query = query;

		self
	}

	/// Sets the JSON body.
	pub fn body(mut self, body: JsonValue) -> Self {
		self.body = Some(body);

		self
	}

	/// Serializes any value into the JSON body.
	pub fn json<T>(self, body: &T) -> Result<Self, ConfigError>
	where
		T: ?Sized + Serialize,
	{
		serde_json::to_value(body).map(|value| self.body(value)).map_err(ConfigError::BodySerialize)
	}

	/// Replaces the default header set entirely.
	pub fn headers(mut self, headers: HeaderMap) -> Self {
		self.headers = Some(headers);

		self
	}

	/// Returns `true` when success is signaled by status code alone for this method.
	pub fn is_status_only(&self) -> bool {
		self.method == Method::DELETE || self.method == Method::HEAD
	}

	/// Resolves the target URL against the API root.
	pub fn url(&self, root: &Url) -> String {
		let mut url =
			format!("{}/{}", root.as_str().trim_end_matches('/'), self.path.trim_start_matches('/'));

		if self.method == Method::GET && !self.query.is_empty() {
			let query = self.query.to_query_string();

			if !query.is_empty() {
				url.push(if url.contains('?') { '&' } else { '?' });
				url.push_str(&query);
			}
		}

		url
	}

	/// Builds the wire request.
	///
	/// `refreshed` marks a rebuild after a token refresh: token-bearing override headers are
	/// rewritten with `token`, while first sends keep overrides untouched.
	pub fn build(
		&self,
		root: &Url,
		scheme: AuthScheme,
		token: &TokenSecret,
		refreshed: bool,
	) -> Result<HttpRequest, ConfigError> {
		let body = match &self.body {
			Some(body) if self.method != Method::GET =>
				serde_json::to_vec(body).map_err(ConfigError::BodySerialize)?,
			_ => Vec::new(),
		};
		let headers = match &self.headers {
			Some(overrides) => {
				let mut headers = overrides.clone();

				if refreshed {
					rewrite_token_headers(&mut headers, token)?;
				}

				headers
			},
			None => default_headers(scheme, token)?,
		};
		let mut request =
			Request::builder().method(self.method.clone()).uri(self.url(root)).body(body)?;

		*request.headers_mut() = headers;

		Ok(request)
	}
}

/// Sets the tenant header unless the request already carries one.
pub(crate) fn insert_tenant(
	headers: &mut HeaderMap,
	tenant: Option<&str>,
) -> Result<(), ConfigError> {
	match tenant {
		Some(tenant) if !headers.contains_key(TENANT_HEADER) => {
			headers.insert(TENANT_HEADER, header_value(tenant)?);
		},
		_ => (),
	}

	Ok(())
}

// Spaces become `%20`; a literal `+` is already escaped as `%2B` by the form serializer.
fn encode_component(value: &str) -> String {
	form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>().replace('+', "%20")
}

fn header_value(value: &str) -> Result<HeaderValue, ConfigError> {
	HeaderValue::from_str(value).map_err(|e| ConfigError::HttpRequest(e.into()))
}

fn default_headers(scheme: AuthScheme, token: &TokenSecret) -> Result<HeaderMap, ConfigError> {
	let mut headers = HeaderMap::new();
	let value = header_value(&scheme.header_value(token.expose()))?;

	match scheme {
		AuthScheme::Bearer => headers.insert(AUTHORIZATION, value),
		AuthScheme::XAuthToken => headers.insert(X_AUTH_TOKEN, value),
	};

	headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
	headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

	Ok(headers)
}

fn rewrite_token_headers(headers: &mut HeaderMap, token: &TokenSecret) -> Result<(), ConfigError> {
	let bearer = headers
		.get(AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.is_some_and(|value| value.starts_with("Bearer "));

	if bearer {
		headers.insert(AUTHORIZATION, header_value(&AuthScheme::Bearer.header_value(token.expose()))?);
	}
	if headers.contains_key(X_AUTH_TOKEN) {
		headers.insert(X_AUTH_TOKEN, header_value(token.expose())?);
	}

	Ok(())
}

/// Renders a reproducible curl command for `request`.
pub fn curl_command(request: &HttpRequest) -> String {
	let mut line = String::from("curl");

	if request.method() != Method::GET {
		line.push_str(&format!(" -X {}", request.method()));
	}
	for (name, value) in request.headers() {
		line.push_str(&format!(" -H '{name}: {}'", String::from_utf8_lossy(value.as_bytes())));
	}

	line.push_str(&format!(" {}", request.uri()));

	if !request.body().is_empty() {
		line.push_str(&format!(" -d '{}'", String::from_utf8_lossy(request.body())));
	}

	line
}

/// Renders the debug trace line for `request`, prefixed by the response status.
pub fn curl_trace(request: &HttpRequest, status: u16) -> String {
	format!("{status} - {}", curl_command(request))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn root() -> Url {
		Url::parse("https://pbx.example.com/api").expect("Test root should parse.")
	}

	#[test]
	fn query_string_omits_empty_and_absent_values() {
		let query = Query::new().param("a", "1").param("b", "").maybe("c", None::<String>);

		assert_eq!(query.to_query_string(), "a=1");
	}

	#[test]
	fn query_keys_stay_unique_and_values_are_encoded() {
		let query = Query::new().param("term", "old").param("term", "jean luc&co");

		assert_eq!(query.to_query_string(), "term=jean%20luc%26co");
	}

	#[test]
	fn spaces_and_plus_signs_stay_distinct() {
		let query = Query::new().param("term", "jean luc").param("phone", "+33 1");

		assert_eq!(query.to_query_string(), "term=jean%20luc&phone=%2B33%201");
	}

	#[test]
	fn tenant_header_never_overrides_an_explicit_one() {
		let mut headers = HeaderMap::new();

		insert_tenant(&mut headers, None).expect("No tenant is a no-op.");
		assert!(headers.is_empty());

		insert_tenant(&mut headers, Some("tenant-1")).expect("Ascii tenant should encode.");
		insert_tenant(&mut headers, Some("tenant-2")).expect("Ascii tenant should encode.");

		assert_eq!(headers["wazo-tenant"], "tenant-1");
	}

	#[test]
	fn get_appends_query_and_other_methods_do_not() {
		let query = Query::new().param("limit", 5);

		assert_eq!(
			PendingRequest::get("call-logd/1.0/users/me/cdr").query(query.clone()).url(&root()),
			"https://pbx.example.com/api/call-logd/1.0/users/me/cdr?limit=5"
		);
		assert_eq!(
			PendingRequest::post("call-logd/1.0/users/me/cdr").query(query).url(&root()),
			"https://pbx.example.com/api/call-logd/1.0/users/me/cdr"
		);
	}

	#[test]
	fn all_falsy_query_leaves_url_untouched() {
		let request = PendingRequest::get("confd/1.1/users").query(Query::new().param("q", ""));

		assert_eq!(request.url(&root()), "https://pbx.example.com/api/confd/1.1/users");
	}

	#[test]
	fn default_headers_use_configured_scheme() {
		let token = TokenSecret::new("tok");
		let bearer = PendingRequest::get("x")
			.build(&root(), AuthScheme::Bearer, &token, false)
			.expect("Request should build.");
		let legacy = PendingRequest::get("x")
			.build(&root(), AuthScheme::XAuthToken, &token, false)
			.expect("Request should build.");

		assert_eq!(bearer.headers()[AUTHORIZATION], "Bearer tok");
		assert_eq!(bearer.headers()[ACCEPT], "application/json");
		assert_eq!(legacy.headers()["x-auth-token"], "tok");
		assert!(!legacy.headers().contains_key(AUTHORIZATION));
	}

	#[test]
	fn overrides_replace_defaults_and_refresh_rewrites_tokens() {
		let mut overrides = HeaderMap::new();

		overrides.insert(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));

		let request = PendingRequest::put("x").headers(overrides);
		let first = request
			.build(&root(), AuthScheme::Bearer, &TokenSecret::new("fresh"), false)
			.expect("Request should build.");
		let retried = request
			.build(&root(), AuthScheme::Bearer, &TokenSecret::new("fresh"), true)
			.expect("Request should build.");

		assert_eq!(first.headers()[AUTHORIZATION], "Bearer stale");
		assert!(!first.headers().contains_key(CONTENT_TYPE));
		assert_eq!(retried.headers()[AUTHORIZATION], "Bearer fresh");
	}

	#[test]
	fn get_never_sends_a_body() {
		let token = TokenSecret::new("tok");
		let body = serde_json::json!({ "a": 1 });
		let get = PendingRequest::get("x")
			.body(body.clone())
			.build(&root(), AuthScheme::Bearer, &token, false)
			.expect("Request should build.");
		let post = PendingRequest::post("x")
			.body(body)
			.build(&root(), AuthScheme::Bearer, &token, false)
			.expect("Request should build.");

		assert!(get.body().is_empty());
		assert_eq!(post.body(), br#"{"a":1}"#);
	}

	#[test]
	fn curl_trace_is_reproducible() {
		let mut headers = HeaderMap::new();

		headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

		let request = PendingRequest::post("chatd/1.0/users/me/rooms")
			.headers(headers)
			.body(serde_json::json!({ "name": "ops" }))
			.build(&root(), AuthScheme::Bearer, &TokenSecret::new("t"), false)
			.expect("Request should build.");

		assert_eq!(
			curl_trace(&request, 201),
			"201 - curl -X POST -H 'accept: application/json' https://pbx.example.com/api/chatd/1.0/users/me/rooms -d '{\"name\":\"ops\"}'"
		);
	}
}
