//! Shared credential store with generation stamps for stale-401 detection.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Tokens plus the selectors the auth service needs to renew them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Short-lived bearer token attached to every request.
	pub access_token: TokenSecret,
	/// Long-lived token used only to obtain a new access token.
	pub refresh_token: Option<TokenSecret>,
	/// Requested lifetime of renewed access tokens, in seconds.
	pub expiration_seconds: Option<u32>,
	/// Authentication backend the refresh token belongs to.
	pub backend: Option<String>,
	/// Tenant selector sent with refresh calls.
	pub tenant_id: Option<String>,
	/// Domain selector sent with refresh calls.
	pub domain_name: Option<String>,
	/// Client identifier the refresh token was issued to.
	pub client_id: Option<String>,
	/// Requests offline access on refresh, as mobile clients need.
	#[serde(default)]
	pub is_mobile: bool,
}
impl Credential {
	/// Creates a credential holding only an access token.
	pub fn new(access_token: impl Into<TokenSecret>) -> Self {
		Self { access_token: access_token.into(), ..Default::default() }
	}

	/// Attaches a refresh token.
	pub fn with_refresh_token(mut self, token: impl Into<TokenSecret>) -> Self {
		self.refresh_token = Some(token.into());

		self
	}

	/// Sets the refresh backend selector.
	pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
		self.backend = Some(backend.into());

		self
	}

	/// Sets the requested token lifetime.
	pub fn with_expiration_seconds(mut self, seconds: u32) -> Self {
		self.expiration_seconds = Some(seconds);

		self
	}

	/// Sets the tenant selector.
	pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
		self.tenant_id = Some(tenant_id.into());

		self
	}

	/// Sets the domain selector.
	pub fn with_domain_name(mut self, domain_name: impl Into<String>) -> Self {
		self.domain_name = Some(domain_name.into());

		self
	}

	/// Sets the client identifier.
	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());

		self
	}

	/// Marks the credential as belonging to a mobile client.
	pub fn with_mobile(mut self, is_mobile: bool) -> Self {
		self.is_mobile = is_mobile;

		self
	}

	/// Returns `true` when a non-empty refresh token is configured.
	pub fn can_refresh(&self) -> bool {
		self.refresh_token.as_ref().is_some_and(|token| !token.is_empty())
	}
}

/// Access token paired with the generation it was read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StampedToken {
	/// Access token value.
	pub token: TokenSecret,
	/// Store generation observed while reading the token.
	pub generation: u64,
}

#[derive(Debug, Default)]
struct Versioned {
	credential: Credential,
	generation: u64,
}

/// Cloneable handle to the credential shared by the executor, coordinator, and channels.
///
/// Every access-token replacement bumps the generation under the same write lock, so readers
/// never observe a token without its matching stamp.
#[derive(Clone, Debug, Default)]
pub struct CredentialStore(Arc<RwLock<Versioned>>);
impl CredentialStore {
	/// Wraps an initial credential at generation zero.
	pub fn new(credential: Credential) -> Self {
		Self(Arc::new(RwLock::new(Versioned { credential, generation: 0 })))
	}

	/// Returns a copy of the whole credential.
	pub fn credential(&self) -> Credential {
		self.0.read().credential.clone()
	}

	/// Returns the current access token with its generation stamp.
	pub fn current(&self) -> StampedToken {
		let inner = self.0.read();

		StampedToken { token: inner.credential.access_token.clone(), generation: inner.generation }
	}

	/// Returns the current access token.
	pub fn access_token(&self) -> TokenSecret {
		self.0.read().credential.access_token.clone()
	}

	/// Returns the current generation.
	pub fn generation(&self) -> u64 {
		self.0.read().generation
	}

	/// Installs renewed tokens in one step and returns the new stamp.
	///
	/// The refresh token is only replaced when the auth service issued a new one.
	pub fn install(
		&self,
		access_token: TokenSecret,
		refresh_token: Option<TokenSecret>,
	) -> StampedToken {
		let mut inner = self.0.write();

		inner.credential.access_token = access_token.clone();

		if let Some(refresh) = refresh_token {
			inner.credential.refresh_token = Some(refresh);
		}

		inner.generation += 1;

		StampedToken { token: access_token, generation: inner.generation }
	}

	/// Replaces the access token (e.g. after an external login) and bumps the generation.
	pub fn set_access_token(&self, token: impl Into<TokenSecret>) -> StampedToken {
		self.install(token.into(), None)
	}

	/// Mutates refresh selectors without touching the access token generation.
	pub fn update(&self, f: impl FnOnce(&mut Credential)) {
		let mut inner = self.0.write();
		let access_before = inner.credential.access_token.clone();

		f(&mut inner.credential);

		if inner.credential.access_token != access_before {
			inner.generation += 1;
		}
	}
}
