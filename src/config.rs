//! Client configuration: server addressing, timeouts, auth header scheme, and debug tracing.
//!
//! Every struct deserializes with serde defaults so settings can come from any file format
//! the host application already uses, and every struct is validated before use.

// self
use crate::{_prelude::*, backoff::millis, error::ConfigError};

/// Header scheme used to attach the access token to requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
	/// `Authorization: Bearer <token>`.
	#[default]
	Bearer,
	/// `X-Auth-Token: <token>`, accepted by legacy backends.
	XAuthToken,
}
impl AuthScheme {
	/// Header name carrying the token.
	pub const fn header_name(self) -> &'static str {
		match self {
			Self::Bearer => "Authorization",
			Self::XAuthToken => "X-Auth-Token",
		}
	}

	/// Header value for the provided token.
	pub fn header_value(self, token: &str) -> String {
		match self {
			Self::Bearer => format!("Bearer {token}"),
			Self::XAuthToken => token.to_owned(),
		}
	}
}

/// Settings for [`RequestExecutor`](crate::executor::RequestExecutor) and
/// [`ApiClient`](crate::client::ApiClient).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
	/// Server host (optionally with port); requests go to `https://<server>/api`.
	pub server: String,
	/// Full API root overriding the one derived from `server`.
	#[serde(default)]
	pub base_url: Option<Url>,
	/// Per-request timeout.
	#[serde(default = "ClientConfig::default_request_timeout", rename = "request_timeout_ms", with = "millis")]
	pub request_timeout: Duration,
	/// Emits a curl-equivalent trace line for every request.
	#[serde(default)]
	pub debug: bool,
	/// Header scheme for the default authorization header.
	#[serde(default)]
	pub auth_scheme: AuthScheme,
	/// Tenant sent as `Wazo-Tenant` on API requests.
	#[serde(default)]
	pub tenant: Option<String>,
}
impl ClientConfig {
	const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

	fn default_request_timeout() -> Duration {
		Self::DEFAULT_REQUEST_TIMEOUT
	}

	/// Creates a configuration for the provided server host.
	pub fn new(server: impl Into<String>) -> Self {
		Self {
			server: server.into(),
			base_url: None,
			request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
			debug: false,
			auth_scheme: AuthScheme::default(),
			tenant: None,
		}
	}

	/// Overrides the API root (useful for plain-HTTP test servers).
	pub fn with_base_url(mut self, base_url: Url) -> Self {
		self.base_url = Some(base_url);

		self
	}

	/// Overrides the per-request timeout.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Enables or disables curl-equivalent request tracing.
	pub fn with_debug(mut self, debug: bool) -> Self {
		self.debug = debug;

		self
	}

	/// Selects the default authorization header scheme.
	pub fn with_auth_scheme(mut self, scheme: AuthScheme) -> Self {
		self.auth_scheme = scheme;

		self
	}

	/// Scopes API requests to a tenant.
	pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
		self.tenant = Some(tenant.into());

		self
	}

	/// Resolves the API root, e.g. `https://pbx.example.com/api`.
	pub fn api_root(&self) -> Result<Url, ConfigError> {
		match &self.base_url {
			Some(url) => Ok(url.clone()),
			None => Url::parse(&format!("https://{}/api", self.server.trim_end_matches('/')))
				.map_err(|source| ConfigError::InvalidServer { source }),
		}
	}

	/// Validates the configuration.
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.api_root()?;

		if self.request_timeout.is_zero() {
			return Err(ConfigError::ZeroDuration { field: "request_timeout" });
		}

		Ok(())
	}

	/// Returns `true` when tracing is requested by config or by `DEBUG=1|true`.
	pub fn debug_enabled(&self) -> bool {
		self.debug || debug_env_enabled(std::env::var("DEBUG").ok().as_deref())
	}
}

/// Interprets a `DEBUG` environment value; only `1` and `true` enable tracing.
pub fn debug_env_enabled(value: Option<&str>) -> bool {
	matches!(value.map(str::trim), Some("1" | "true"))
}
