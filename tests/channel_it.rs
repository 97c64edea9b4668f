// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
// self
use telephony_client::{
	auth::{Credential, CredentialStore},
	backoff::BackoffPolicy,
	channel::{
		ChannelConfig, ChannelConnection, ChannelEvent, ChannelTransport, CloseInfo, EventChannel,
		HandshakeState,
		transport::{ConnectFuture, RecvFuture, SendFuture},
	},
	error::ChannelError,
	telemetry::{LogLevel, LogSink, SinkFuture, TelemetryConfig, TelemetryDeliverer},
	url::Url,
};

/// Server half of one in-memory connection.
struct ServerSide {
	url: Url,
	to_client: UnboundedSender<String>,
	from_client: UnboundedReceiver<String>,
}
impl ServerSide {
	fn push(&self, frame: &str) {
		self.to_client.send(frame.to_owned()).expect("Client half should be alive.");
	}

	async fn next_frame(&mut self) -> JsonValue {
		let text = self.from_client.recv().await.expect("Client should send a frame.");

		serde_json::from_str(&text).expect("Client frames are JSON.")
	}

	async fn complete_handshake(&mut self, topics: usize) {
		self.push(r#"{"op":"init"}"#);

		for _ in 0..topics {
			assert_eq!(self.next_frame().await["op"], "subscribe");
		}

		assert_eq!(self.next_frame().await, serde_json::json!({ "op": "start" }));

		self.push(r#"{"op":"start"}"#);
	}
}

struct MemoryConnection {
	inbound: UnboundedReceiver<String>,
	outbound: UnboundedSender<String>,
	ignores_close: bool,
}
impl ChannelConnection for MemoryConnection {
	fn send(&mut self, text: String) -> SendFuture<'_> {
		let sent = self.outbound.send(text).map_err(ChannelError::connection);

		Box::pin(async move { sent })
	}

	fn recv(&mut self) -> RecvFuture<'_> {
		Box::pin(async move { self.inbound.recv().await.map(Ok) })
	}

	fn close(&mut self) -> SendFuture<'_> {
		if self.ignores_close {
			return Box::pin(std::future::pending());
		}

		self.inbound.close();

		Box::pin(async { Ok(()) })
	}
}

/// Hands the server half of every successful connection to the test.
struct MemoryTransport {
	fail_next: AtomicUsize,
	connects: AtomicUsize,
	ignore_close: AtomicBool,
	sessions: UnboundedSender<ServerSide>,
}
impl MemoryTransport {
	fn new(fail_next: usize) -> (Arc<Self>, UnboundedReceiver<ServerSide>) {
		let (sessions, receiver) = mpsc::unbounded_channel();

		(
			Arc::new(Self {
				fail_next: AtomicUsize::new(fail_next),
				connects: AtomicUsize::new(0),
				ignore_close: AtomicBool::new(false),
				sessions,
			}),
			receiver,
		)
	}
}
impl ChannelTransport for MemoryTransport {
	fn connect<'a>(&'a self, url: &'a Url) -> ConnectFuture<'a> {
		Box::pin(async move {
			self.connects.fetch_add(1, Ordering::SeqCst);

			let refused = self
				.fail_next
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
				.is_ok();

			if refused {
				return Err(ChannelError::connection("Connection refused"));
			}

			let (to_client, inbound) = mpsc::unbounded_channel();
			let (outbound, from_client) = mpsc::unbounded_channel();

			self.sessions
				.send(ServerSide { url: url.clone(), to_client, from_client })
				.map_err(ChannelError::connection)?;

			let ignores_close = self.ignore_close.load(Ordering::SeqCst);

			Ok(Box::new(MemoryConnection { inbound, outbound, ignores_close })
				as Box<dyn ChannelConnection>)
		})
	}
}

#[derive(Default)]
struct CollectingSink(Mutex<Vec<JsonValue>>);
impl LogSink for CollectingSink {
	fn send<'a>(&'a self, _level: LogLevel, payload: &'a JsonValue) -> SinkFuture<'a> {
		self.0.lock().push(payload.clone());

		Box::pin(async { Ok(()) })
	}
}

fn token_of(url: &Url) -> String {
	url.query_pairs()
		.find(|(key, _)| key == "token")
		.map(|(_, value)| value.into_owned())
		.unwrap_or_default()
}

fn fast_reconnect() -> BackoffPolicy {
	BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1))
		.expect("Backoff bounds should be valid.")
}

fn channel(
	config: ChannelConfig,
	transport: Arc<MemoryTransport>,
) -> (EventChannel, CredentialStore) {
	let credentials = CredentialStore::new(Credential::new("access-1"));
	let channel = EventChannel::new(config, credentials.clone(), transport)
		.expect("Channel config should be valid.");

	(channel, credentials)
}

#[tokio::test(start_paused = true)]
async fn handshake_gates_dispatch_and_falls_back_to_wildcard() {
	let (transport, mut sessions) = MemoryTransport::new(0);
	let config = ChannelConfig::new("pbx.example.com")
		.with_topics(["call_created", "chat_message"])
		.with_reconnect(fast_reconnect());
	let (channel, _) = channel(config, transport);
	let (events_tx, mut events) = mpsc::unbounded_channel::<String>();
	let (errors_tx, mut errors) = mpsc::unbounded_channel::<ChannelError>();
	let named_tx = events_tx.clone();

	channel.on("call_created", move |event: &ChannelEvent| {
		let _ = named_tx.send(format!("named:{}", event.name));
	});
	channel.on_any(move |event: &ChannelEvent| {
		let _ = events_tx.send(format!("wildcard:{}", event.name));
	});
	channel.on_error(move |error| {
		let _ = errors_tx.send(error.clone());
	});
	channel.connect().await;
	channel.connect().await;

	let mut server = sessions.recv().await.expect("Channel should connect.");

	assert_eq!(token_of(&server.url), "access-1");
	assert!(server.url.query_pairs().any(|(key, value)| key == "version" && value == "2"));

	server.push(r#"{"name":"call_created","data":{}}"#);

	assert!(matches!(errors.recv().await, Some(ChannelError::HandshakeFailed { .. })));

	server.push(r#"{"op":"init"}"#);

	assert_eq!(
		server.next_frame().await,
		serde_json::json!({ "op": "subscribe", "data": { "event_name": "call_created" } })
	);
	assert_eq!(
		server.next_frame().await,
		serde_json::json!({ "op": "subscribe", "data": { "event_name": "chat_message" } })
	);
	assert_eq!(server.next_frame().await, serde_json::json!({ "op": "start" }));
	assert_eq!(channel.state(), HandshakeState::Subscribing);

	server.push(r#"{"op":"subscribe"}"#);
	server.push(r#"{"op":"start"}"#);
	server.push(r#"{"name":"call_created","origin_uuid":"pbx-1","data":{"call_id":"1"}}"#);
	server.push(r#"{"name":"user_status_update","data":{}}"#);

	assert_eq!(events.recv().await.as_deref(), Some("named:call_created"));
	assert_eq!(events.recv().await.as_deref(), Some("wildcard:user_status_update"));
	assert!(channel.is_started());

	channel.close().await;

	assert_eq!(channel.state(), HandshakeState::Closed);
	assert!(errors.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn unanswered_heartbeat_times_out_once_and_reconnects() {
	let (transport, mut sessions) = MemoryTransport::new(0);
	let config = ChannelConfig::new("pbx.example.com")
		.with_engine_version("21.01")
		.with_heartbeat(Duration::from_secs(5), Duration::from_secs(2))
		.with_reconnect(fast_reconnect());
	let (channel, _) = channel(config, transport);
	let timeouts = Arc::new(AtomicUsize::new(0));
	let timeouts_hook = timeouts.clone();
	let (beats_tx, mut beats) = mpsc::unbounded_channel::<()>();
	let reconnects = Arc::new(Mutex::new(Vec::new()));
	let reconnects_hook = reconnects.clone();

	channel.on_heartbeat(move || {
		let _ = beats_tx.send(());
	});
	channel.on_heartbeat_timeout(move || {
		timeouts_hook.fetch_add(1, Ordering::SeqCst);
	});
	channel.on_reconnect(move |attempt, delay| reconnects_hook.lock().push((attempt, delay)));
	channel.connect().await;

	let mut server = sessions.recv().await.expect("Channel should connect.");

	server.complete_handshake(0).await;

	assert_eq!(
		server.next_frame().await,
		serde_json::json!({ "op": "ping", "data": { "payload": "ping-1" } })
	);

	server.push(r#"{"op":"pong","data":{"payload":"ping-1"}}"#);
	beats.recv().await.expect("Pong should be acknowledged.");

	assert_eq!(server.next_frame().await["data"]["payload"], "ping-2");

	let mut next = sessions.recv().await.expect("Channel should reconnect after the timeout.");

	assert_eq!(timeouts.load(Ordering::SeqCst), 1);
	assert_eq!(*reconnects.lock(), vec![(0, Duration::from_millis(100))]);

	next.complete_handshake(0).await;

	assert_eq!(next.next_frame().await["data"]["payload"], "ping-1");

	channel.close().await;

	assert_eq!(timeouts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_attempts_reset_after_handshake_and_reread_token() {
	let (transport, mut sessions) = MemoryTransport::new(3);
	let config = ChannelConfig::new("pbx.example.com").with_reconnect(fast_reconnect());
	let (channel, credentials) = channel(config, transport.clone());
	let attempts = Arc::new(Mutex::new(Vec::new()));
	let attempts_hook = attempts.clone();
	let closes = Arc::new(Mutex::new(Vec::new()));
	let closes_hook = closes.clone();

	channel.on_reconnect(move |attempt, _| attempts_hook.lock().push(attempt));
	channel.on_close(move |info| closes_hook.lock().push(info));
	channel.connect().await;

	let mut server = sessions.recv().await.expect("Fourth attempt should connect.");

	assert_eq!(*attempts.lock(), vec![0, 1, 2]);
	assert_eq!(channel.reconnect_attempt(), 3);

	server.complete_handshake(0).await;

	while !channel.is_started() {
		tokio::task::yield_now().await;
	}

	assert_eq!(channel.reconnect_attempt(), 0);

	credentials.set_access_token("access-2");
	drop(server);

	let server = sessions.recv().await.expect("Channel should reconnect after a peer close.");

	assert_eq!(token_of(&server.url), "access-2");
	assert_eq!(*attempts.lock(), vec![0, 1, 2, 0]);
	assert_eq!(*closes.lock(), vec![CloseInfo { by_caller: false, will_reconnect: true }]);
	assert_eq!(transport.connects.load(Ordering::SeqCst), 5);

	channel.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_suppresses_reconnect_and_is_idempotent() {
	let (transport, mut sessions) = MemoryTransport::new(0);
	let config = ChannelConfig::new("pbx.example.com").with_reconnect(fast_reconnect());
	let (channel, _) = channel(config, transport.clone());
	let closes = Arc::new(Mutex::new(Vec::new()));
	let closes_hook = closes.clone();
	let reconnects = Arc::new(AtomicUsize::new(0));
	let reconnects_hook = reconnects.clone();

	channel.on_close(move |info| closes_hook.lock().push(info));
	channel.on_reconnect(move |_, _| {
		reconnects_hook.fetch_add(1, Ordering::SeqCst);
	});
	channel.connect().await;

	let mut server = sessions.recv().await.expect("Channel should connect.");

	server.complete_handshake(0).await;
	channel.close().await;
	channel.close().await;
	tokio::time::sleep(Duration::from_secs(60)).await;

	assert_eq!(*closes.lock(), vec![CloseInfo { by_caller: true, will_reconnect: false }]);
	assert_eq!(reconnects.load(Ordering::SeqCst), 0);
	assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
	assert_eq!(channel.state(), HandshakeState::Closed);
}

#[tokio::test(start_paused = true)]
async fn close_gives_up_on_unacknowledged_close() {
	let (transport, mut sessions) = MemoryTransport::new(0);

	transport.ignore_close.store(true, Ordering::SeqCst);

	let config = ChannelConfig::new("pbx.example.com").with_reconnect(fast_reconnect());
	let (channel, _) = channel(config, transport);

	channel.connect().await;

	let mut server = sessions.recv().await.expect("Channel should connect.");

	server.complete_handshake(0).await;

	while !channel.is_started() {
		tokio::task::yield_now().await;
	}

	tokio::time::timeout(Duration::from_secs(60), channel.close())
		.await
		.expect("Close should not wait on the peer forever.");

	assert_eq!(channel.state(), HandshakeState::Closed);
}

#[tokio::test(start_paused = true)]
async fn channel_failures_reach_telemetry() {
	let (transport, mut sessions) = MemoryTransport::new(1);
	let config = ChannelConfig::new("pbx.example.com").with_reconnect(fast_reconnect());
	let (channel, _) = channel(config, transport);
	let sink = Arc::new(CollectingSink::default());
	let telemetry = TelemetryDeliverer::new(
		TelemetryConfig::default().with_min_level("error"),
		Some(sink.clone() as Arc<dyn LogSink>),
	)
	.expect("Telemetry config should be valid.");

	channel.set_logger(telemetry.logger_for("websocket"));
	channel.connect().await;

	let _server = sessions.recv().await.expect("Second attempt should connect.");

	tokio::time::sleep(Duration::from_secs(1)).await;

	let received = sink.0.lock().clone();

	assert_eq!(received.len(), 1);
	assert_eq!(received[0]["category"], "websocket");
	assert_eq!(received[0]["message"], "Event channel error.");
	assert_eq!(received[0]["errorType"], "ChannelError");

	channel.close().await;
}
