//! Network call that exchanges a refresh token for a new session.

// crates.io
use http::{
	HeaderMap, HeaderValue,
	header::{ACCEPT, CONTENT_TYPE},
};
// self
use crate::{
	_prelude::*,
	auth::{Credential, Session, TokenSecret},
	client::Service,
	config::AuthScheme,
	error::{ApiFailure, RefreshError},
	http::{HttpTransport, is_json, send_with_timeout},
	request::PendingRequest,
};

/// Boxed future returned by [`TokenRenewer::renew`].
pub type RenewFuture<'a> = Pin<Box<dyn Future<Output = Result<Session, RefreshError>> + 'a + Send>>;

/// Performs the refresh network call on behalf of the coordinator.
///
/// The coordinator guarantees at most one outstanding `renew` per credential store and runs it on
/// a detached task, so implementations never observe caller cancellation.
pub trait TokenRenewer
where
	Self: 'static + Send + Sync,
{
	/// Exchanges the credential's refresh token for a new session.
	fn renew<'a>(&'a self, credential: &'a Credential) -> RenewFuture<'a>;
}

/// Default renewer posting to the auth service's `token` endpoint.
pub struct AuthServiceRenewer<C>
where
	C: ?Sized + HttpTransport,
{
	transport: Arc<C>,
	api_root: Url,
	timeout: Duration,
}
impl<C> AuthServiceRenewer<C>
where
	C: ?Sized + HttpTransport,
{
	/// Creates a renewer sharing the executor's transport and API root.
	pub fn new(transport: Arc<C>, api_root: Url, timeout: Duration) -> Self {
		Self { transport, api_root, timeout }
	}

	async fn renew_inner(&self, credential: &Credential) -> Result<Session, RefreshError> {
		let refresh_token = credential
			.refresh_token
			.as_ref()
			.filter(|token| !token.is_empty())
			.ok_or(RefreshError::NoRefreshToken)?;
		let request = PendingRequest::post(Service::Auth.path("token"))
			.body(refresh_body(credential, refresh_token))
			.headers(json_headers())
			.build(&self.api_root, AuthScheme::Bearer, &TokenSecret::default(), false)
			.map_err(|e| RefreshError::network(e.to_string()))?;
		let response = send_with_timeout(self.transport.as_ref(), request, self.timeout)
			.await
			.map_err(|e| RefreshError::network(e.to_string()))?;
		let status = response.status().as_u16();

		if !response.status().is_success() {
			let failure =
				ApiFailure::from_body(status, response.body(), is_json(response.headers()));

			return Err(RefreshError::RejectedByServer { status, message: failure.message });
		}

		Session::from_slice(response.body(), status)
			.map_err(|e| RefreshError::network(format!("Malformed token response: {e}")))
	}
}
impl<C> TokenRenewer for AuthServiceRenewer<C>
where
	C: ?Sized + HttpTransport,
{
	fn renew<'a>(&'a self, credential: &'a Credential) -> RenewFuture<'a> {
		Box::pin(self.renew_inner(credential))
	}
}
impl<C> Debug for AuthServiceRenewer<C>
where
	C: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthServiceRenewer")
			.field("api_root", &self.api_root.as_str())
			.field("timeout", &self.timeout)
			.finish()
	}
}

/// JSON body of a refresh call.
pub(crate) fn refresh_body(credential: &Credential, refresh_token: &TokenSecret) -> JsonValue {
	let mut body = JsonMap::new();

	body.insert(
		"backend".into(),
		JsonValue::String(credential.backend.clone().unwrap_or_else(|| DEFAULT_BACKEND.into())),
	);
	body.insert("refresh_token".into(), JsonValue::String(refresh_token.expose().into()));

	if let Some(expiration) = credential.expiration_seconds {
		body.insert("expiration".into(), JsonValue::from(expiration));
	}

	for (key, value) in [
		("client_id", &credential.client_id),
		("tenant_id", &credential.tenant_id),
		("domain_name", &credential.domain_name),
	] {
		if let Some(value) = value {
			body.insert(key.into(), JsonValue::String(value.clone()));
		}
	}

	if credential.is_mobile {
		body.insert("access_type".into(), JsonValue::String("offline".into()));
	}

	JsonValue::Object(body)
}

/// Accept/Content-Type pair without any token header.
fn json_headers() -> HeaderMap {
	let mut headers = HeaderMap::new();

	headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
	headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

	headers
}

/// Backend used when the credential does not name one.
pub(crate) const DEFAULT_BACKEND: &str = "wazo_user";
