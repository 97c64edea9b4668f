#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use telephony_client::{
	_preludet::*,
	auth::Credential,
	config::{AuthScheme, ClientConfig},
	executor::RequestExecutor,
	request::{PendingRequest, Query, TextParser},
};

fn executor_with(config: ClientConfig) -> ReqwestTestExecutor {
	RequestExecutor::with_transport(config, Credential::new("access"), test_reqwest_transport())
		.expect("Executor should build.")
}

#[tokio::test]
async fn server_errors_carry_text_bodies() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/dird/0.1/personal");
			then.status(502).header("content-type", "text/plain").body("Bad gateway");
		})
		.await;
	let executor = build_reqwest_test_executor(&server.base_url(), "access", None);
	let err = executor
		.get::<JsonValue>("dird/0.1/personal", Query::new())
		.await
		.expect_err("5xx should fail.");

	match err {
		Error::ServerError(failure) => {
			assert_eq!(failure.status, 502);
			assert_eq!(failure.message, "Bad gateway");
		},
		other => panic!("Unexpected error: {other:?}."),
	}

	mock.assert_async().await;
}

#[tokio::test]
async fn client_errors_become_bad_response() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/chatd/1.0/users/me/rooms");
			then.status(400).header("content-type", "application/json").body(
				r#"{"message":"Invalid room","error_id":"invalid-data","details":{"name":"missing"}}"#,
			);
		})
		.await;
	let executor = build_reqwest_test_executor(&server.base_url(), "access", None);
	let err = executor
		.post::<JsonValue>("chatd/1.0/users/me/rooms", Some(serde_json::json!({})))
		.await
		.expect_err("4xx should fail.");

	match err {
		Error::BadResponse(failure) => {
			assert_eq!(failure.status, 400);
			assert_eq!(failure.message, "Invalid room");
			assert_eq!(failure.error_id.as_deref(), Some("invalid-data"));
			assert_eq!(failure.details, Some(serde_json::json!({ "name": "missing" })));
		},
		other => panic!("Unexpected error: {other:?}."),
	}
}

#[tokio::test]
async fn slow_responses_time_out() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/confd/1.1/users/me");
			then.status(200)
				.header("content-type", "application/json")
				.delay(Duration::from_secs(2))
				.body("{}");
		})
		.await;
	let executor = executor_with(
		test_config(&server.base_url()).with_request_timeout(Duration::from_millis(100)),
	);
	let err = executor
		.get::<JsonValue>("confd/1.1/users/me", Query::new())
		.await
		.expect_err("Delayed response should time out.");

	assert!(matches!(err, Error::Timeout { timeout } if timeout == Duration::from_millis(100)));
}

#[tokio::test]
async fn unreachable_hosts_surface_network_errors() {
	let base = Url::parse("http://127.0.0.1:1/api").expect("Static URL should parse.");
	let executor = executor_with(ClientConfig::new("unused.invalid").with_base_url(base));
	let err = executor
		.get::<JsonValue>("confd/1.1/users/me", Query::new())
		.await
		.expect_err("Closed port should fail.");

	assert!(matches!(err, Error::NetworkUnreachable { .. }));
}

#[tokio::test]
async fn get_encodes_query_and_auth_scheme() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/api/call-logd/1.0/users/me/cdr")
				.query_param("search", "alice")
				.query_param("limit", "5")
				.header("x-auth-token", "access")
				.header("accept", "application/json");
			then.status(200).header("content-type", "application/json").body(r#"{"items":[]}"#);
		})
		.await;
	let executor = executor_with(
		test_config(&server.base_url()).with_auth_scheme(AuthScheme::XAuthToken),
	);
	let query = Query::new().param("search", "alice").param("limit", 5).maybe("offset", None::<u32>);
	let body: JsonValue = executor
		.get("call-logd/1.0/users/me/cdr", query)
		.await
		.expect("Query request should succeed.");

	assert_eq!(body["items"], serde_json::json!([]));

	mock.assert_async().await;
}

#[tokio::test]
async fn delete_and_head_are_judged_by_status() {
	let server = MockServer::start_async().await;
	let _deleted = server
		.mock_async(|when, then| {
			when.method(DELETE).path("/api/dird/0.1/personal/1");
			then.status(204);
		})
		.await;
	let _accepted = server
		.mock_async(|when, then| {
			when.method(DELETE).path("/api/dird/0.1/personal/2");
			then.status(200).header("content-type", "application/json").body("not json");
		})
		.await;
	let _head = server
		.mock_async(|when, then| {
			when.method("HEAD").path("/api/auth/0.1/token/access");
			then.status(204);
		})
		.await;
	let executor = build_reqwest_test_executor(&server.base_url(), "access", None);

	assert!(executor.delete("dird/0.1/personal/1").await.expect("DELETE should succeed."));
	assert!(!executor.delete("dird/0.1/personal/2").await.expect("DELETE should succeed."));
	assert!(executor.head("auth/0.1/token/access").await.expect("HEAD should succeed."));
}

#[tokio::test]
async fn header_overrides_replace_defaults() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/amid/1.0/action/Ping").header("x-custom", "1");
			then.status(200).header("content-type", "text/plain").body("pong");
		})
		.await;
	let executor = build_reqwest_test_executor(&server.base_url(), "access", None);
	let mut headers = http::HeaderMap::new();

	headers.insert("x-custom", http::HeaderValue::from_static("1"));

	let text = executor
		.execute(PendingRequest::get("amid/1.0/action/Ping").headers(headers), TextParser)
		.await
		.expect("Override request should succeed.");

	assert_eq!(text, "pong");

	mock.assert_async().await;
}
