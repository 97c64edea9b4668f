//! Outer client composition: versioned service paths, credential setters, login, and channels.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
use http::{
	HeaderMap, HeaderValue,
	header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialStore, Session, TokenSecret},
	channel::{ChannelConfig, ChannelTransport, EventChannel},
	config::ClientConfig,
	error::{ApiFailure, ConfigError, RefreshError},
	executor::RequestExecutor,
	http::{HttpTransport, is_json, send_with_timeout},
	refresh::DEFAULT_BACKEND,
	request::{PendingRequest, Query, insert_tenant},
	telemetry::TelemetryDeliverer,
};
#[cfg(feature = "websocket")] use crate::channel::TungsteniteTransport;
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;

/// Platform services and the API versions this client speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Service {
	/// Authentication service.
	Auth,
	/// Application call control, hosted by calld.
	Application,
	/// Configuration service.
	Confd,
	/// Legacy call control service.
	CtidNg,
	/// Directory service.
	Dird,
	/// Call log service.
	CallLogd,
	/// Chat service.
	Chatd,
	/// Call control service.
	Calld,
	/// Agent service.
	Agentd,
	/// Webhook service.
	Webhookd,
	/// Asterisk manager proxy.
	Amid,
}
impl Service {
	/// Every known service.
	pub const ALL: [Self; 11] = [
		Self::Auth,
		Self::Application,
		Self::Confd,
		Self::CtidNg,
		Self::Dird,
		Self::CallLogd,
		Self::Chatd,
		Self::Calld,
		Self::Agentd,
		Self::Webhookd,
		Self::Amid,
	];

	/// Versioned path prefix relative to the API root.
	pub const fn prefix(self) -> &'static str {
		match self {
			Self::Auth => "auth/0.1",
			Self::Application => "calld/1.0/applications",
			Self::Confd => "confd/1.1",
			Self::CtidNg => "ctid-ng/1.0",
			Self::Dird => "dird/0.1",
			Self::CallLogd => "call-logd/1.0",
			Self::Chatd => "chatd/1.0",
			Self::Calld => "calld/1.0",
			Self::Agentd => "agentd/1.0",
			Self::Webhookd => "webhookd/1.0",
			Self::Amid => "amid/1.0",
		}
	}

	/// Joins `path` onto the service prefix.
	pub fn path(self, path: &str) -> String {
		let path = path.trim_start_matches('/');

		if path.is_empty() {
			self.prefix().to_owned()
		} else {
			format!("{}/{path}", self.prefix())
		}
	}
}
impl Display for Service {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.prefix())
	}
}

/// Shorthand for [`Service::path`].
pub fn service_path(service: Service, path: &str) -> String {
	service.path(path)
}

/// Client bound to one server and one credential.
pub struct ApiClient<C>
where
	C: ?Sized + HttpTransport,
{
	executor: RequestExecutor<C>,
	telemetry: Option<TelemetryDeliverer>,
}
impl<C> ApiClient<C>
where
	C: HttpTransport,
{
	/// Creates a client without tokens; call [`ApiClient::log_in`] or [`ApiClient::set_token`].
	pub fn with_transport(config: ClientConfig, transport: C) -> Result<Self, ConfigError> {
		Self::with_credential(config, Credential::default(), transport)
	}

	/// Creates a client holding an existing credential.
	pub fn with_credential(
		config: ClientConfig,
		credential: Credential,
		transport: C,
	) -> Result<Self, ConfigError> {
		Ok(Self::from_executor(RequestExecutor::with_transport(config, credential, transport)?))
	}
}
impl<C> ApiClient<C>
where
	C: ?Sized + HttpTransport,
{
	/// Wraps an existing executor.
	pub fn from_executor(executor: RequestExecutor<C>) -> Self {
		Self { executor, telemetry: None }
	}

	/// Reports refresh cycles under the `api` category and channel failures under `websocket`.
	pub fn with_telemetry(mut self, telemetry: TelemetryDeliverer) -> Self {
		self.executor.coordinator().set_logger(telemetry.logger_for(API_CATEGORY));
		self.telemetry = Some(telemetry);

		self
	}

	/// Telemetry attached with [`ApiClient::with_telemetry`].
	pub fn telemetry(&self) -> Option<&TelemetryDeliverer> {
		self.telemetry.as_ref()
	}

	/// Underlying request executor.
	pub fn executor(&self) -> &RequestExecutor<C> {
		&self.executor
	}

	/// Active configuration.
	pub fn config(&self) -> &ClientConfig {
		self.executor.config()
	}

	/// Credential store shared with every channel this client creates.
	pub fn credentials(&self) -> &CredentialStore {
		self.executor.credentials()
	}

	/// Replaces the access token.
	pub fn set_token(&self, token: impl Into<TokenSecret>) {
		self.credentials().set_access_token(token);
	}

	/// Replaces (or clears) the refresh token.
	pub fn set_refresh_token(&self, token: Option<TokenSecret>) {
		self.credentials().update(|credential| credential.refresh_token = token);
	}

	/// Sets the backend sent with refresh calls.
	pub fn set_refresh_backend(&self, backend: Option<String>) {
		self.credentials().update(|credential| credential.backend = backend);
	}

	/// Sets the token lifetime requested by refresh calls.
	pub fn set_refresh_expiration(&self, seconds: Option<u32>) {
		self.credentials().update(|credential| credential.expiration_seconds = seconds);
	}

	/// Sets the tenant selector sent with refresh calls.
	pub fn set_refresh_tenant_id(&self, tenant_id: Option<String>) {
		self.credentials().update(|credential| credential.tenant_id = tenant_id);
	}

	/// Sets the domain selector sent with refresh calls.
	pub fn set_refresh_domain_name(&self, domain_name: Option<String>) {
		self.credentials().update(|credential| credential.domain_name = domain_name);
	}

	/// Sets the client identifier sent with refresh calls.
	pub fn set_client_id(&self, client_id: Option<String>) {
		self.credentials().update(|credential| credential.client_id = client_id);
	}

	/// Requests offline access on refresh, as mobile clients need.
	pub fn set_is_mobile(&self, is_mobile: bool) {
		self.credentials().update(|credential| credential.is_mobile = is_mobile);
	}

	/// Scopes subsequent API requests to `tenant` through the `Wazo-Tenant` header.
	pub fn set_tenant(&mut self, tenant: Option<String>) {
		self.executor.set_tenant(tenant);
	}

	/// Overrides the timeout applied to subsequent API requests.
	///
	/// Refresh calls keep the timeout the client was built with.
	pub fn set_request_timeout(&mut self, timeout: Duration) -> Result<(), ConfigError> {
		self.executor.set_request_timeout(timeout)
	}

	/// Fires once per successful refresh cycle.
	pub fn on_refresh_token<F>(&self, hook: F)
	where
		F: 'static + Fn(&TokenSecret, &Session) + Send + Sync,
	{
		self.executor.coordinator().set_on_refresh(hook);
	}

	/// Fires once per failed refresh cycle.
	pub fn on_refresh_token_error<F>(&self, hook: F)
	where
		F: 'static + Fn(&RefreshError) + Send + Sync,
	{
		self.executor.coordinator().set_on_refresh_error(hook);
	}

	/// Refreshes the access token now, joining any refresh already in flight.
	pub async fn force_refresh_token(&self) -> Result<TokenSecret, RefreshError> {
		#[cfg(feature = "tracing")]
		tracing::info!("Forcing an access token refresh.");

		self.executor.coordinator().refresh().await
	}

	/// Exchanges username and password for a session and installs its tokens.
	///
	/// `backend` defaults to `wazo_user` and `expiration` to one hour. Both are remembered as
	/// refresh selectors.
	pub async fn log_in(
		&self,
		username: &str,
		password: &str,
		backend: Option<&str>,
		expiration: Option<u32>,
	) -> Result<Session> {
		let backend = backend.unwrap_or(DEFAULT_BACKEND).to_owned();
		let expiration = expiration.unwrap_or(DEFAULT_LOGIN_EXPIRATION);
		let mut request = PendingRequest::post(Service::Auth.path("token"))
			.body(login_body(&backend, expiration))
			.headers(basic_headers(username, password)?)
			.build(
				self.executor.api_root(),
				self.config().auth_scheme,
				&TokenSecret::default(),
				false,
			)?;

		insert_tenant(request.headers_mut(), self.config().tenant.as_deref())?;

		let response = send_with_timeout(
			self.executor.transport().as_ref(),
			request,
			self.config().request_timeout,
		)
		.await?;
		let status = response.status();

		if !status.is_success() {
			let failure =
				ApiFailure::from_body(status.as_u16(), response.body(), is_json(response.headers()));

			return Err(if status.is_server_error() {
				Error::ServerError(failure)
			} else {
				Error::BadResponse(failure)
			});
		}

		let session = Session::from_slice(response.body(), status.as_u16())?;

		self.credentials().update(|credential| {
			credential.backend = Some(backend);
			credential.expiration_seconds = Some(expiration);
		});
		self.credentials().install(session.token.clone(), session.refresh_token.clone());

		#[cfg(feature = "tracing")]
		tracing::info!(user_uuid = ?session.user_uuid, "Logged in.");

		Ok(session)
	}

	/// `GET` on a service path, decoding the body into `T`.
	pub async fn get<T>(&self, service: Service, path: &str, query: Query) -> Result<T>
	where
		T: 'static + DeserializeOwned + Send,
	{
		self.executor.get(service.path(path), query).await
	}

	/// `POST` on a service path, decoding the body into `T`.
	pub async fn post<T>(&self, service: Service, path: &str, body: Option<JsonValue>) -> Result<T>
	where
		T: 'static + DeserializeOwned + Send,
	{
		self.executor.post(service.path(path), body).await
	}

	/// `PUT` on a service path, decoding the body into `T`.
	pub async fn put<T>(&self, service: Service, path: &str, body: Option<JsonValue>) -> Result<T>
	where
		T: 'static + DeserializeOwned + Send,
	{
		self.executor.put(service.path(path), body).await
	}

	/// `DELETE` on a service path, reporting `true` on `204`.
	pub async fn delete(&self, service: Service, path: &str) -> Result<bool> {
		self.executor.delete(service.path(path)).await
	}

	/// Creates an event channel reading its token from this client's credential store.
	pub fn event_channel_with_transport(
		&self,
		config: ChannelConfig,
		transport: Arc<dyn ChannelTransport>,
	) -> Result<EventChannel, ConfigError> {
		let channel = EventChannel::new(config, self.credentials().clone(), transport)?;

		if let Some(telemetry) = &self.telemetry {
			channel.set_logger(telemetry.logger_for(CHANNEL_CATEGORY));
		}

		Ok(channel)
	}

	/// Creates a WebSocket event channel reading its token from this client's credential store.
	#[cfg(feature = "websocket")]
	pub fn event_channel(&self, config: ChannelConfig) -> Result<EventChannel, ConfigError> {
		self.event_channel_with_transport(config, Arc::new(TungsteniteTransport))
	}
}
#[cfg(feature = "reqwest")]
impl ApiClient<ReqwestTransport> {
	/// Creates a client backed by a default reqwest client.
	pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
		Ok(Self::from_executor(RequestExecutor::new(config, Credential::default())?))
	}
}
impl<C> Clone for ApiClient<C>
where
	C: ?Sized + HttpTransport,
{
	fn clone(&self) -> Self {
		Self { executor: self.executor.clone(), telemetry: self.telemetry.clone() }
	}
}
impl<C> Debug for ApiClient<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ApiClient")
			.field("executor", &self.executor)
			.field("telemetry", &self.telemetry)
			.finish()
	}
}

const DEFAULT_LOGIN_EXPIRATION: u32 = 3_600;
const API_CATEGORY: &str = "api";
const CHANNEL_CATEGORY: &str = "websocket";

fn login_body(backend: &str, expiration: u32) -> JsonValue {
	serde_json::json!({ "backend": backend, "expiration": expiration })
}

fn basic_headers(username: &str, password: &str) -> Result<HeaderMap, ConfigError> {
	let encoded = STANDARD.encode(format!("{username}:{password}"));
	let authorization = HeaderValue::from_str(&format!("Basic {encoded}"))
		.map_err(|e| ConfigError::HttpRequest(e.into()))?;
	let mut headers = HeaderMap::new();

	headers.insert(AUTHORIZATION, authorization);
	headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
	headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

	Ok(headers)
}
