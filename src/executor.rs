//! Request execution with response classification and the shared 401 refresh cycle.
//!
//! [`RequestExecutor`] turns a [`PendingRequest`] into a wire request, sends it through an
//! [`HttpTransport`] under the configured timeout, and classifies the response:
//!
//! - `5xx` becomes [`Error::ServerError`] without consulting the parser.
//! - `401` triggers one refresh through the [`RefreshCoordinator`] and one retry with the token
//!   that refresh produced; a second `401` becomes [`Error::AuthenticationFailed`].
//! - `204`, `DELETE`, and `HEAD` are judged by status code alone.
//! - Anything else is handed to the request's [`ResponseParser`].

// crates.io
use http::StatusCode;
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialStore, TokenSecret},
	config::ClientConfig,
	error::{ApiFailure, ConfigError},
	http::{HttpResponse, HttpTransport, is_json, send_with_timeout},
	obs::{self, OpKind, OpOutcome, OpSpan},
	refresh::{AuthServiceRenewer, RefreshCoordinator, TokenRenewer},
	request::{
		JsonParser, PendingRequest, Query, ResponseParser, StatusParser, curl_command, insert_tenant,
	},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;

/// Sends API requests on behalf of one credential owner.
pub struct RequestExecutor<C>
where
	C: ?Sized + HttpTransport,
{
	transport: Arc<C>,
	config: ClientConfig,
	api_root: Url,
	coordinator: RefreshCoordinator,
}
impl<C> RequestExecutor<C>
where
	C: HttpTransport,
{
	/// Creates an executor that owns `transport` and renews tokens through the auth service.
	pub fn with_transport(
		config: ClientConfig,
		credential: Credential,
		transport: C,
	) -> Result<Self, ConfigError> {
		Self::from_parts(config, CredentialStore::new(credential), Arc::new(transport))
	}
}
impl<C> RequestExecutor<C>
where
	C: ?Sized + HttpTransport,
{
	/// Creates an executor over a shared transport and credential store.
	pub fn from_parts(
		config: ClientConfig,
		credentials: CredentialStore,
		transport: Arc<C>,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		let renewer = Arc::new(AuthServiceRenewer::new(
			transport.clone(),
			config.api_root()?,
			config.request_timeout,
		));

		Self::with_renewer(config, credentials, transport, renewer)
	}

	/// Creates an executor with a custom [`TokenRenewer`].
	pub fn with_renewer(
		config: ClientConfig,
		credentials: CredentialStore,
		transport: Arc<C>,
		renewer: Arc<dyn TokenRenewer>,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		let api_root = config.api_root()?;
		let coordinator = RefreshCoordinator::new(credentials, renewer);

		Ok(Self { transport, config, api_root, coordinator })
	}

	/// Active configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Resolved API root, e.g. `https://pbx.example.com/api`.
	pub fn api_root(&self) -> &Url {
		&self.api_root
	}

	/// Shared credential store.
	pub fn credentials(&self) -> &CredentialStore {
		self.coordinator.credentials()
	}

	/// Refresh coordinator guarding this executor's credential.
	pub fn coordinator(&self) -> &RefreshCoordinator {
		&self.coordinator
	}

	/// Underlying transport.
	pub fn transport(&self) -> &Arc<C> {
		&self.transport
	}

	/// Overrides the timeout applied to subsequent requests.
	pub fn set_request_timeout(&mut self, timeout: Duration) -> Result<(), ConfigError> {
		if timeout.is_zero() {
			return Err(ConfigError::ZeroDuration { field: "request_timeout" });
		}

		self.config.request_timeout = timeout;

		Ok(())
	}

	/// Scopes subsequent requests to `tenant`, or stops sending the tenant header.
	pub fn set_tenant(&mut self, tenant: Option<String>) {
		self.config.tenant = tenant;
	}

	/// Executes `request` and hands the classified response to `parser`.
	pub async fn execute<P>(&self, request: PendingRequest, parser: P) -> Result<P::Output>
	where
		P: ResponseParser,
	{
		const KIND: OpKind = OpKind::Request;

		let span = OpSpan::new(KIND, "execute");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.execute_inner(&request, &parser)).await;

		match &result {
			Ok(_) => obs::record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => obs::record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	/// `GET` with query parameters, decoding the body into `T`.
	pub async fn get<T>(&self, path: impl Into<String>, query: Query) -> Result<T>
	where
		T: 'static + DeserializeOwned + Send,
	{
		self.execute(PendingRequest::get(path).query(query), JsonParser::new()).await
	}

	/// `POST` with an optional JSON body, decoding the response into `T`.
	pub async fn post<T>(&self, path: impl Into<String>, body: Option<JsonValue>) -> Result<T>
	where
		T: 'static + DeserializeOwned + Send,
	{
		self.execute(with_body(PendingRequest::post(path), body), JsonParser::new()).await
	}

	/// `PUT` with an optional JSON body, decoding the response into `T`.
	pub async fn put<T>(&self, path: impl Into<String>, body: Option<JsonValue>) -> Result<T>
	where
		T: 'static + DeserializeOwned + Send,
	{
		self.execute(with_body(PendingRequest::put(path), body), JsonParser::new()).await
	}

	/// `DELETE` reporting `true` when the server answered `204`.
	pub async fn delete(&self, path: impl Into<String>) -> Result<bool> {
		self.execute(PendingRequest::delete(path), StatusParser).await
	}

	/// `HEAD` reporting `true` when the server answered `204`.
	pub async fn head(&self, path: impl Into<String>) -> Result<bool> {
		self.execute(PendingRequest::head(path), StatusParser).await
	}

	async fn execute_inner<P>(&self, request: &PendingRequest, parser: &P) -> Result<P::Output>
	where
		P: ResponseParser,
	{
		let sent = self.credentials().current();
		let response = self.send(request, &sent.token, false).await?;

		if response.status() != StatusCode::UNAUTHORIZED {
			return self.classify(request, response, parser);
		}

		match self.coordinator.refresh_after(sent.generation).await {
			Ok(stamped) => {
				let retried = self.send(request, &stamped.token, true).await?;

				if retried.status() == StatusCode::UNAUTHORIZED {
					return Err(Error::AuthenticationFailed { status: retried.status().as_u16() });
				}

				self.classify(request, retried, parser)
			},
			Err(_e) => {
				#[cfg(feature = "tracing")]
				tracing::debug!(error = %_e, path = %request.path, "Refresh unavailable after 401.");

				self.classify(request, response, parser)
			},
		}
	}

	async fn send(
		&self,
		request: &PendingRequest,
		token: &TokenSecret,
		refreshed: bool,
	) -> Result<HttpResponse> {
		let mut wire = request.build(&self.api_root, self.config.auth_scheme, token, refreshed)?;

		insert_tenant(wire.headers_mut(), self.config.tenant.as_deref())?;

		let command = self.config.debug_enabled().then(|| curl_command(&wire));
		let response =
			send_with_timeout(self.transport.as_ref(), wire, self.config.request_timeout).await?;

		if let Some(_command) = command {
			#[cfg(feature = "tracing")]
			tracing::info!(target: "telephony_client::curl", "{} - {_command}", response.status().as_u16());
		}

		Ok(response)
	}

	fn classify<P>(
		&self,
		request: &PendingRequest,
		response: HttpResponse,
		parser: &P,
	) -> Result<P::Output>
	where
		P: ResponseParser,
	{
		let status = response.status();
		let json = is_json(response.headers());

		if status.is_server_error() {
			return Err(Error::ServerError(ApiFailure::from_body(
				status.as_u16(),
				response.body(),
				json,
			)));
		}
		if status == StatusCode::NO_CONTENT || request.is_status_only() {
			return parser.no_content(status.as_u16());
		}

		parser.parse(&response, json)
	}
}
fn with_body(request: PendingRequest, body: Option<JsonValue>) -> PendingRequest {
	match body {
		Some(body) => request.body(body),
		None => request,
	}
}

#[cfg(feature = "reqwest")]
impl RequestExecutor<ReqwestTransport> {
	/// Creates an executor backed by a default reqwest client.
	pub fn new(config: ClientConfig, credential: Credential) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().build()?;

		Self::with_transport(config, credential, ReqwestTransport::with_client(client))
	}
}
impl<C> Clone for RequestExecutor<C>
where
	C: ?Sized + HttpTransport,
{
	fn clone(&self) -> Self {
		Self {
			transport: self.transport.clone(),
			config: self.config.clone(),
			api_root: self.api_root.clone(),
			coordinator: self.coordinator.clone(),
		}
	}
}
impl<C> Debug for RequestExecutor<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestExecutor")
			.field("api_root", &self.api_root.as_str())
			.field("config", &self.config)
			.field("coordinator", &self.coordinator)
			.finish()
	}
}
