//! Event channel over a duplex connection to the event service.
//!
//! An [`EventChannel`] owns one driver task per `connect()`. The driver walks each connection
//! through the handshake (`init` → `subscribe`* → `start`), dispatches events to registered
//! handlers once started, probes liveness with heartbeats on engines that support them, and
//! reconnects with backoff after any closure the caller did not request.

pub mod handlers;
pub mod handshake;
pub mod heartbeat;
pub mod protocol;
pub mod transport;

pub use handlers::{CloseInfo, EventHandler, EventKey, HandlerRegistry};
pub use handshake::{Handshake, HandshakeState, Step};
pub use heartbeat::{HEARTBEAT_ENGINE_VERSION, Heartbeat, HeartbeatAction, supports_heartbeat};
pub use protocol::{ChannelEvent, ControlOp, InboundFrame, OutboundFrame};
#[cfg(feature = "websocket")] pub use transport::TungsteniteTransport;
pub use transport::{ChannelConnection, ChannelTransport};

// std
use std::sync::atomic::{AtomicU32, Ordering};
// crates.io
use tokio::{sync::watch, task::JoinHandle, time::Instant};
// self
use crate::{
	_prelude::*,
	auth::CredentialStore,
	backoff::{BackoffPolicy, millis},
	channel::handlers::Lifecycle,
	error::{ChannelError, ConfigError},
	obs::{self, OpKind, OpOutcome, OpSpan},
	telemetry::CategoryLogger,
};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Settings for one [`EventChannel`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
	/// Server host (optionally with port); the channel connects to
	/// `wss://<host>/api/websocketd/`.
	pub host: String,
	/// Full endpoint overriding the one derived from `host`.
	#[serde(default)]
	pub url: Option<Url>,
	/// Event names subscribed during the handshake, in order.
	#[serde(default)]
	pub topics: Vec<String>,
	/// Protocol version sent as the `version` query parameter.
	#[serde(default = "ChannelConfig::default_protocol_version")]
	pub protocol_version: u8,
	/// Engine version of the server (`YY.MM`); decides whether heartbeats run.
	#[serde(default)]
	pub engine_version: Option<String>,
	/// Delay between a pong and the next ping.
	#[serde(
		default = "ChannelConfig::default_heartbeat_interval",
		rename = "heartbeat_interval_ms",
		with = "millis"
	)]
	pub heartbeat_interval: Duration,
	/// Time allowed for a pong to arrive.
	#[serde(
		default = "ChannelConfig::default_heartbeat_timeout",
		rename = "heartbeat_timeout_ms",
		with = "millis"
	)]
	pub heartbeat_timeout: Duration,
	/// Reconnect delay bounds.
	#[serde(default)]
	pub reconnect: BackoffPolicy,
}
impl ChannelConfig {
	const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
	const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);
	const DEFAULT_PROTOCOL_VERSION: u8 = 2;

	fn default_protocol_version() -> u8 {
		Self::DEFAULT_PROTOCOL_VERSION
	}

	fn default_heartbeat_interval() -> Duration {
		Self::DEFAULT_HEARTBEAT_INTERVAL
	}

	fn default_heartbeat_timeout() -> Duration {
		Self::DEFAULT_HEARTBEAT_TIMEOUT
	}

	/// Creates a configuration for the provided server host.
	pub fn new(host: impl Into<String>) -> Self {
		Self {
			host: host.into(),
			url: None,
			topics: Vec::new(),
			protocol_version: Self::DEFAULT_PROTOCOL_VERSION,
			engine_version: None,
			heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
			heartbeat_timeout: Self::DEFAULT_HEARTBEAT_TIMEOUT,
			reconnect: BackoffPolicy::default(),
		}
	}

	/// Overrides the endpoint (useful for plain `ws://` test servers).
	pub fn with_url(mut self, url: Url) -> Self {
		self.url = Some(url);

		self
	}

	/// Replaces the subscribed topics.
	pub fn with_topics<I, S>(mut self, topics: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.topics = topics.into_iter().map(Into::into).collect();

		self
	}

	/// Records the server engine version.
	pub fn with_engine_version(mut self, version: impl Into<String>) -> Self {
		self.engine_version = Some(version.into());

		self
	}

	/// Overrides heartbeat interval and timeout.
	pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
		self.heartbeat_interval = interval;
		self.heartbeat_timeout = timeout;

		self
	}

	/// Overrides reconnect backoff bounds.
	pub fn with_reconnect(mut self, policy: BackoffPolicy) -> Self {
		self.reconnect = policy;

		self
	}

	/// Returns `true` when the configured engine version supports heartbeats.
	pub fn heartbeat_enabled(&self) -> bool {
		supports_heartbeat(self.engine_version.as_deref())
	}

	/// Builds the connection URL carrying `token` and the protocol version.
	pub fn endpoint(&self, token: &str) -> Result<Url, ConfigError> {
		let mut url = match &self.url {
			Some(url) => url.clone(),
			None => Url::parse(&format!("wss://{}/api/websocketd/", self.host.trim_end_matches('/')))
				.map_err(|source| ConfigError::InvalidServer { source })?,
		};

		url.query_pairs_mut()
			.append_pair("token", token)
			.append_pair("version", &self.protocol_version.to_string());

		Ok(url)
	}

	/// Validates the configuration.
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.endpoint("")?;
		self.reconnect.validate()?;

		if self.heartbeat_interval.is_zero() {
			return Err(ConfigError::ZeroDuration { field: "heartbeat_interval" });
		}
		if self.heartbeat_timeout.is_zero() {
			return Err(ConfigError::ZeroDuration { field: "heartbeat_timeout" });
		}

		Ok(())
	}
}

#[derive(Default)]
struct Callbacks {
	events: HandlerRegistry,
	lifecycle: Lifecycle,
}

struct Shared {
	config: ChannelConfig,
	credentials: CredentialStore,
	transport: Arc<dyn ChannelTransport>,
	callbacks: RwLock<Callbacks>,
	state: Mutex<HandshakeState>,
	reconnect_attempt: AtomicU32,
	shutdown: watch::Sender<bool>,
	logger: RwLock<Option<CategoryLogger>>,
}
impl Shared {
	fn lifecycle(&self) -> Lifecycle {
		self.callbacks.read().lifecycle.clone()
	}

	fn set_state(&self, state: HandshakeState) {
		*self.state.lock() = state;
	}

	fn emit_error(&self, error: ChannelError) {
		#[cfg(feature = "tracing")]
		tracing::warn!(error = %error, "Event channel error.");

		if let Some(logger) = self.logger.read().clone() {
			logger.error_with("Event channel error.", &error);
		}
		if let Some(callback) = self.lifecycle().on_error {
			callback(&error);
		}
	}

	fn emit_signal(&self, pick: impl FnOnce(Lifecycle) -> Option<handlers::SignalHandler>) {
		if let Some(callback) = pick(self.lifecycle()) {
			callback();
		}
	}

	fn dispatch(&self, event: &ChannelEvent) {
		let handler = self.callbacks.read().events.resolve(&event.name);

		if let Some(handler) = handler {
			handler(event);
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionEnd {
	ClosedByCaller,
	Lost,
}

enum Wake {
	Frame(Option<Result<String, ChannelError>>),
	Timer,
	Shutdown,
}

/// Cloneable handle to one event channel.
#[derive(Clone)]
pub struct EventChannel {
	shared: Arc<Shared>,
	driver: Arc<AsyncMutex<Option<JoinHandle<()>>>>,
}
impl EventChannel {
	/// Creates a channel that reads its token from `credentials` on every connection attempt.
	pub fn new(
		config: ChannelConfig,
		credentials: CredentialStore,
		transport: Arc<dyn ChannelTransport>,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		let (shutdown, _) = watch::channel(false);

		Ok(Self {
			shared: Arc::new(Shared {
				config,
				credentials,
				transport,
				callbacks: RwLock::new(Callbacks::default()),
				state: Mutex::new(HandshakeState::Closed),
				reconnect_attempt: AtomicU32::new(0),
				shutdown,
				logger: RwLock::new(None),
			}),
			driver: Arc::new(AsyncMutex::new(None)),
		})
	}

	/// Creates a channel over `tokio-tungstenite`.
	#[cfg(feature = "websocket")]
	pub fn with_websocket(
		config: ChannelConfig,
		credentials: CredentialStore,
	) -> Result<Self, ConfigError> {
		Self::new(config, credentials, Arc::new(TungsteniteTransport))
	}

	/// Active configuration.
	pub fn config(&self) -> &ChannelConfig {
		&self.shared.config
	}

	/// Handshake state of the current connection ([`HandshakeState::Closed`] when idle).
	pub fn state(&self) -> HandshakeState {
		*self.shared.state.lock()
	}

	/// Returns `true` once the current connection completed its handshake.
	pub fn is_started(&self) -> bool {
		self.state() == HandshakeState::Started
	}

	/// Current reconnect attempt counter; reset to zero on every completed handshake.
	pub fn reconnect_attempt(&self) -> u32 {
		self.shared.reconnect_attempt.load(Ordering::SeqCst)
	}

	/// Registers `handler` for events named `name` (`"*"` registers the wildcard handler).
	pub fn on<F>(&self, name: impl Into<String>, handler: F)
	where
		F: 'static + Fn(&ChannelEvent) + Send + Sync,
	{
		let name: String = name.into();

		self.shared.callbacks.write().events.insert(EventKey::from(name), Arc::new(handler));
	}

	/// Registers the wildcard handler, used for events without a named handler.
	pub fn on_any<F>(&self, handler: F)
	where
		F: 'static + Fn(&ChannelEvent) + Send + Sync,
	{
		self.shared.callbacks.write().events.insert(EventKey::Wildcard, Arc::new(handler));
	}

	/// Removes the handler registered for `name`.
	pub fn off(&self, name: impl Into<String>) -> bool {
		let name: String = name.into();

		self.shared.callbacks.write().events.remove(&EventKey::from(name))
	}

	/// Fires when a connection opens.
	pub fn on_open<F>(&self, callback: F)
	where
		F: 'static + Fn() + Send + Sync,
	{
		self.shared.callbacks.write().lifecycle.on_open = Some(Arc::new(callback));
	}

	/// Fires when a connection closes.
	pub fn on_close<F>(&self, callback: F)
	where
		F: 'static + Fn(CloseInfo) + Send + Sync,
	{
		self.shared.callbacks.write().lifecycle.on_close = Some(Arc::new(callback));
	}

	/// Fires for connection, heartbeat, and protocol failures.
	pub fn on_error<F>(&self, callback: F)
	where
		F: 'static + Fn(&ChannelError) + Send + Sync,
	{
		self.shared.callbacks.write().lifecycle.on_error = Some(Arc::new(callback));
	}

	/// Fires for every acknowledged heartbeat.
	pub fn on_heartbeat<F>(&self, callback: F)
	where
		F: 'static + Fn() + Send + Sync,
	{
		self.shared.callbacks.write().lifecycle.on_heartbeat = Some(Arc::new(callback));
	}

	/// Fires once when a heartbeat goes unanswered.
	pub fn on_heartbeat_timeout<F>(&self, callback: F)
	where
		F: 'static + Fn() + Send + Sync,
	{
		self.shared.callbacks.write().lifecycle.on_heartbeat_timeout = Some(Arc::new(callback));
	}

	/// Fires when a reconnect is scheduled, with the attempt number and the delay before it.
	pub fn on_reconnect<F>(&self, callback: F)
	where
		F: 'static + Fn(u32, Duration) + Send + Sync,
	{
		self.shared.callbacks.write().lifecycle.on_reconnect = Some(Arc::new(callback));
	}

	/// Reports channel failures through `logger` in addition to `on_error`.
	pub fn set_logger(&self, logger: CategoryLogger) {
		*self.shared.logger.write() = Some(logger);
	}

	/// Starts the driver task; a no-op while a driver is already running.
	pub async fn connect(&self) {
		let mut driver = self.driver.lock().await;

		if driver.as_ref().is_some_and(|handle| !handle.is_finished()) {
			return;
		}

		self.shared.shutdown.send_replace(false);
		self.shared.reconnect_attempt.store(0, Ordering::SeqCst);
		self.shared.set_state(HandshakeState::Connecting);

		let shutdown = self.shared.shutdown.subscribe();

		*driver = Some(tokio::spawn(drive(self.shared.clone(), shutdown)));
	}

	/// Closes the connection, cancels timers, and suppresses reconnects; idempotent.
	pub async fn close(&self) {
		let mut driver = self.driver.lock().await;

		self.shared.shutdown.send_replace(true);

		if let Some(handle) = driver.take() {
			let _ = handle.await;
		}

		self.shared.set_state(HandshakeState::Closed);
	}
}
impl Debug for EventChannel {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EventChannel")
			.field("config", &self.shared.config)
			.field("state", &self.state())
			.finish()
	}
}

async fn drive(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
	loop {
		match run_connection(&shared, &mut shutdown).await {
			ConnectionEnd::ClosedByCaller => break,
			ConnectionEnd::Lost => {
				let attempt = shared.reconnect_attempt.fetch_add(1, Ordering::SeqCst);
				let delay = shared.config.reconnect.delay(attempt);

				#[cfg(feature = "tracing")]
				tracing::debug!(attempt, ?delay, "Event channel reconnect scheduled.");

				if let Some(callback) = shared.lifecycle().on_reconnect {
					callback(attempt, delay);
				}

				tokio::select! {
					_ = tokio::time::sleep(delay) => {},
					_ = stopped(&mut shutdown) => break,
				}
			},
		}
	}

	shared.set_state(HandshakeState::Closed);
}

async fn run_connection(shared: &Shared, shutdown: &mut watch::Receiver<bool>) -> ConnectionEnd {
	const KIND: OpKind = OpKind::Channel;

	let stop = *shutdown.borrow_and_update();

	if stop {
		return ConnectionEnd::ClosedByCaller;
	}

	let span = OpSpan::new(KIND, "connect");

	obs::record_op_outcome(KIND, OpOutcome::Attempt);
	shared.set_state(HandshakeState::Connecting);

	let url = match shared.config.endpoint(shared.credentials.access_token().expose()) {
		Ok(url) => url,
		Err(e) => {
			obs::record_op_outcome(KIND, OpOutcome::Failure);
			shared.emit_error(ChannelError::connection(e));

			return ConnectionEnd::Lost;
		},
	};
	let connected = tokio::select! {
		connected = span.instrument(shared.transport.connect(&url)) => connected,
		_ = stopped(shutdown) => return ConnectionEnd::ClosedByCaller,
	};
	let mut connection = match connected {
		Ok(connection) => connection,
		Err(e) => {
			obs::record_op_outcome(KIND, OpOutcome::Failure);
			shared.emit_error(e);

			return ConnectionEnd::Lost;
		},
	};

	obs::record_op_outcome(KIND, OpOutcome::Success);

	let mut handshake = Handshake::new(shared.config.topics.clone());

	handshake.opened();
	shared.set_state(handshake.state());
	shared.emit_signal(|lifecycle| lifecycle.on_open);

	let mut heartbeat: Option<Heartbeat> = None;
	let end = loop {
		let wakeup = heartbeat.as_ref().and_then(Heartbeat::next_wakeup);
		let wake = tokio::select! {
			frame = connection.recv() => Wake::Frame(frame),
			_ = sleep_until(wakeup) => Wake::Timer,
			_ = stopped(shutdown) => Wake::Shutdown,
		};

		match wake {
			Wake::Shutdown => {
				close_quietly(&mut *connection).await;

				break ConnectionEnd::ClosedByCaller;
			},
			Wake::Frame(None) => {
				shared.emit_error(ChannelError::connection("Connection closed by peer"));

				break ConnectionEnd::Lost;
			},
			Wake::Frame(Some(Err(e))) => {
				shared.emit_error(e);

				break ConnectionEnd::Lost;
			},
			Wake::Frame(Some(Ok(text))) => {
				if let Err(e) =
					handle_text(shared, &text, &mut handshake, &mut heartbeat, &mut *connection)
						.await
				{
					shared.emit_error(e);

					break ConnectionEnd::Lost;
				}
			},
			Wake::Timer => {
				let Some(beat) = heartbeat.as_mut() else { continue };

				match beat.poll(Instant::now()) {
					HeartbeatAction::Ping(payload) => {
						if let Err(e) =
							connection.send(OutboundFrame::Ping { payload }.to_text()).await
						{
							shared.emit_error(e);

							break ConnectionEnd::Lost;
						}
					},
					HeartbeatAction::TimedOut => {
						shared.emit_signal(|lifecycle| lifecycle.on_heartbeat_timeout);
						shared.emit_error(ChannelError::HeartbeatTimeout);
						close_quietly(&mut *connection).await;

						break ConnectionEnd::Lost;
					},
					HeartbeatAction::Idle => {},
				}
			},
		}
	};

	handshake.closed();
	shared.set_state(handshake.state());

	if let Some(callback) = shared.lifecycle().on_close {
		callback(CloseInfo {
			by_caller: end == ConnectionEnd::ClosedByCaller,
			will_reconnect: end == ConnectionEnd::Lost,
		});
	}

	end
}

/// Closes `connection`, giving up on peers that never acknowledge the close.
async fn close_quietly(connection: &mut dyn ChannelConnection) {
	if tokio::time::timeout(CLOSE_TIMEOUT, connection.close()).await.is_err() {
		#[cfg(feature = "tracing")]
		tracing::debug!(timeout = ?CLOSE_TIMEOUT, "Event channel close was not acknowledged.");
	}
}

async fn handle_text(
	shared: &Shared,
	text: &str,
	handshake: &mut Handshake,
	heartbeat: &mut Option<Heartbeat>,
	connection: &mut dyn ChannelConnection,
) -> Result<(), ChannelError> {
	let frame = match InboundFrame::parse(text) {
		Ok(frame) => frame,
		Err(reason) => {
			shared.emit_error(ChannelError::handshake(reason));

			return Ok(());
		},
	};

	let step = handshake.on_frame(frame);

	shared.set_state(handshake.state());

	match step {
		Step::Send(frames) =>
			for frame in frames {
				connection.send(frame.to_text()).await?;
			},
		Step::Started => {
			shared.reconnect_attempt.store(0, Ordering::SeqCst);

			if shared.config.heartbeat_enabled() {
				*heartbeat = Some(Heartbeat::start(
					shared.config.heartbeat_interval,
					shared.config.heartbeat_timeout,
					Instant::now(),
				));
			}
		},
		Step::Dispatch(event) => shared.dispatch(&event),
		Step::Pong =>
			if heartbeat.as_mut().is_some_and(|beat| beat.on_pong(Instant::now())) {
				shared.emit_signal(|lifecycle| lifecycle.on_heartbeat);
			},
		Step::Ignore => {},
		Step::Reject(reason) => shared.emit_error(ChannelError::handshake(reason)),
	}

	Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
	loop {
		let stop = *shutdown.borrow_and_update();

		if stop || shutdown.changed().await.is_err() {
			return;
		}
	}
}
