//! Session returned by the auth service's token endpoint.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Authenticated session issued by a login or refresh call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
	/// Access token issued for the session.
	pub token: TokenSecret,
	/// Refresh token, when the auth service issued (or rotated) one.
	pub refresh_token: Option<TokenSecret>,
	/// Authenticated user identifier.
	pub user_uuid: Option<String>,
	/// Tenant the session belongs to.
	pub tenant_uuid: Option<String>,
	/// Server-side session identifier.
	pub session_uuid: Option<String>,
	/// Expiry instant reported by the auth service.
	pub expires_at: Option<OffsetDateTime>,
}
impl Session {
	/// Decodes a token endpoint body (`{"data": {...}}`).
	pub fn from_slice(body: &[u8], status: u16) -> Result<Self> {
		let mut de = serde_json::Deserializer::from_slice(body);
		let envelope: TokenEnvelope = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| Error::Decode { source, status })?;

		Ok(envelope.data.into())
	}

	/// Returns `true` when the session reports an expiry at or before `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expires_at| expires_at <= instant)
	}
}

#[derive(Deserialize)]
struct TokenEnvelope {
	data: TokenData,
}

#[derive(Deserialize)]
struct TokenData {
	token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	xivo_user_uuid: Option<String>,
	#[serde(default)]
	session_uuid: Option<String>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	utc_expires_at: Option<OffsetDateTime>,
	#[serde(default)]
	metadata: Option<TokenMetadata>,
}

#[derive(Deserialize)]
struct TokenMetadata {
	#[serde(default)]
	uuid: Option<String>,
	#[serde(default)]
	tenant_uuid: Option<String>,
}

impl From<TokenData> for Session {
	fn from(data: TokenData) -> Self {
		let (metadata_uuid, tenant_uuid) = data
			.metadata
			.map(|metadata| (metadata.uuid, metadata.tenant_uuid))
			.unwrap_or_default();

		Self {
			token: TokenSecret::new(data.token),
			refresh_token: data.refresh_token.filter(|token| !token.is_empty()).map(TokenSecret::new),
			user_uuid: data.xivo_user_uuid.or(metadata_uuid),
			tenant_uuid,
			session_uuid: data.session_uuid,
			expires_at: data.utc_expires_at,
		}
	}
}
