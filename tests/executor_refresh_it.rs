#![cfg(feature = "reqwest")]

// std
use std::sync::atomic::{AtomicUsize, Ordering};
// crates.io
use httpmock::prelude::*;
// self
use telephony_client::{_preludet::*, request::Query};

const USER_PATH: &str = "/api/confd/1.1/users/me";
const TOKEN_PATH: &str = "/api/auth/0.1/token";

fn token_body(token: &str) -> String {
	format!(r#"{{"data":{{"token":"{token}","refresh_token":"refresh-rotated"}}}}"#)
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() {
	let server = MockServer::start_async().await;
	let stale = server
		.mock_async(|when, then| {
			when.method(GET).path(USER_PATH).header("authorization", "Bearer access-old");
			then.status(401)
				.header("content-type", "application/json")
				.body(r#"{"message":"Unauthorized"}"#);
		})
		.await;
	let fresh = server
		.mock_async(|when, then| {
			when.method(GET).path(USER_PATH).header("authorization", "Bearer access-new");
			then.status(200).header("content-type", "application/json").body(r#"{"uuid":"user-1"}"#);
		})
		.await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.delay(Duration::from_millis(200))
				.body(token_body("access-new"));
		})
		.await;
	let executor =
		build_reqwest_test_executor(&server.base_url(), "access-old", Some("refresh-1"));
	let refreshed = Arc::new(AtomicUsize::new(0));
	let refreshed_hook = refreshed.clone();

	executor.coordinator().set_on_refresh(move |token, _| {
		assert_eq!(token.expose(), "access-new");

		refreshed_hook.fetch_add(1, Ordering::SeqCst);
	});

	let (first, second, third) = tokio::join!(
		executor.get::<JsonValue>("confd/1.1/users/me", Query::new()),
		executor.get::<JsonValue>("confd/1.1/users/me", Query::new()),
		executor.get::<JsonValue>("confd/1.1/users/me", Query::new()),
	);

	for result in [first, second, third] {
		let body = result.expect("Every caller should succeed after the shared refresh.");

		assert_eq!(body["uuid"], "user-1");
	}

	token.assert_calls_async(1).await;
	stale.assert_calls_async(3).await;
	fresh.assert_calls_async(3).await;

	assert_eq!(refreshed.load(Ordering::SeqCst), 1);
	assert_eq!(executor.credentials().access_token().expose(), "access-new");
	assert_eq!(
		executor.credentials().credential().refresh_token.as_ref().map(|secret| secret.expose()),
		Some("refresh-rotated")
	);
}

#[tokio::test]
async fn stale_unauthorized_after_settled_refresh_skips_network() {
	let server = MockServer::start_async().await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(200).header("content-type", "application/json").body(token_body("access-new"));
		})
		.await;
	let _fresh = server
		.mock_async(|when, then| {
			when.method(GET).path(USER_PATH).header("authorization", "Bearer access-new");
			then.status(200).header("content-type", "application/json").body(r#"{"uuid":"user-1"}"#);
		})
		.await;
	let executor =
		build_reqwest_test_executor(&server.base_url(), "access-old", Some("refresh-1"));

	executor.coordinator().refresh().await.expect("Explicit refresh should succeed.");

	let body: JsonValue = executor
		.get("confd/1.1/users/me", Query::new())
		.await
		.expect("Request should use the refreshed token.");

	assert_eq!(body["uuid"], "user-1");

	token.assert_calls_async(1).await;
}

#[tokio::test]
async fn second_unauthorized_after_refresh_fails_authentication() {
	let server = MockServer::start_async().await;
	let users = server
		.mock_async(|when, then| {
			when.method(GET).path(USER_PATH);
			then.status(401)
				.header("content-type", "application/json")
				.body(r#"{"message":"Unauthorized"}"#);
		})
		.await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(200).header("content-type", "application/json").body(token_body("access-new"));
		})
		.await;
	let executor =
		build_reqwest_test_executor(&server.base_url(), "access-old", Some("refresh-1"));
	let err = executor
		.get::<JsonValue>("confd/1.1/users/me", Query::new())
		.await
		.expect_err("A retried 401 should fail.");

	assert!(matches!(err, Error::AuthenticationFailed { status: 401 }));

	users.assert_calls_async(2).await;
	token.assert_calls_async(1).await;
}

#[tokio::test]
async fn missing_refresh_token_surfaces_original_unauthorized() {
	let server = MockServer::start_async().await;
	let users = server
		.mock_async(|when, then| {
			when.method(GET).path(USER_PATH);
			then.status(401)
				.header("content-type", "application/json")
				.body(r#"{"message":"Unauthorized","error_id":"invalid-token"}"#);
		})
		.await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(200).header("content-type", "application/json").body(token_body("unused"));
		})
		.await;
	let executor = build_reqwest_test_executor(&server.base_url(), "access-old", None);
	let err = executor
		.get::<JsonValue>("confd/1.1/users/me", Query::new())
		.await
		.expect_err("Unauthorized without a refresh token should fail.");

	match err {
		Error::BadResponse(failure) => {
			assert_eq!(failure.status, 401);
			assert_eq!(failure.message, "Unauthorized");
			assert_eq!(failure.error_id.as_deref(), Some("invalid-token"));
		},
		other => panic!("Unexpected error: {other:?}."),
	}

	users.assert_calls_async(1).await;
	token.assert_calls_async(0).await;
}

#[tokio::test]
async fn rejected_refresh_fires_error_hook_and_keeps_original_status() {
	let server = MockServer::start_async().await;
	let _users = server
		.mock_async(|when, then| {
			when.method(GET).path(USER_PATH);
			then.status(401)
				.header("content-type", "application/json")
				.body(r#"{"message":"Unauthorized"}"#);
		})
		.await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(401)
				.header("content-type", "application/json")
				.body(r#"{"message":"Refresh token revoked"}"#);
		})
		.await;
	let executor =
		build_reqwest_test_executor(&server.base_url(), "access-old", Some("refresh-1"));
	let failures = Arc::new(Mutex::new(Vec::new()));
	let failures_hook = failures.clone();

	executor.coordinator().set_on_refresh_error(move |error| {
		failures_hook.lock().push(error.clone());
	});

	let err = executor
		.get::<JsonValue>("confd/1.1/users/me", Query::new())
		.await
		.expect_err("Rejected refresh should fail the request.");

	assert_eq!(err.status(), Some(401));
	assert!(matches!(err, Error::BadResponse(_)));

	token.assert_calls_async(1).await;

	let failures = failures.lock();

	assert_eq!(failures.len(), 1);
	assert!(matches!(
		&failures[0],
		telephony_client::error::RefreshError::RejectedByServer { status: 401, message }
			if message == "Refresh token revoked"
	));
}
