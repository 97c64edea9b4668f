//! Resilient client transport for telephony platform APIs: single-flight token refresh,
//! handshake-aware event channels, and backoff-driven telemetry in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod backoff;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod obs;
pub mod refresh;
pub mod request;
pub mod telemetry;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::Credential,
		client::ApiClient,
		config::ClientConfig,
		executor::RequestExecutor,
		http::ReqwestTransport,
	};

	/// Executor type alias used by reqwest-backed integration tests.
	pub type ReqwestTestExecutor = RequestExecutor<ReqwestTransport>;

	/// Builds a reqwest transport that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_transport() -> ReqwestTransport {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestTransport::with_client(client)
	}

	/// Builds a client configuration pointing at a mock server's `/api` root.
	pub fn test_config(mock_base_url: &str) -> ClientConfig {
		let base = Url::parse(&format!("{}/api", mock_base_url.trim_end_matches('/')))
			.expect("Mock server base URL should parse successfully.");

		ClientConfig::new("mock.invalid").with_base_url(base)
	}

	/// Constructs a [`RequestExecutor`] bound to the mock server with the given tokens.
	pub fn build_reqwest_test_executor(
		mock_base_url: &str,
		access_token: &str,
		refresh_token: Option<&str>,
	) -> ReqwestTestExecutor {
		let mut credential = Credential::new(access_token);

		if let Some(refresh) = refresh_token {
			credential = credential.with_refresh_token(refresh);
		}

		RequestExecutor::with_transport(
			test_config(mock_base_url),
			credential,
			test_reqwest_transport(),
		)
		.expect("Test executor should build successfully.")
	}

	/// Constructs an [`ApiClient`] bound to the mock server.
	pub fn build_reqwest_test_client(mock_base_url: &str) -> ApiClient<ReqwestTransport> {
		ApiClient::with_transport(test_config(mock_base_url), test_reqwest_transport())
			.expect("Test client should build successfully.")
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::{Map as JsonMap, Value as JsonValue};
	pub use thiserror::Error as ThisError;
	pub use time::OffsetDateTime;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
