//! Leveled, categorized telemetry with fire-and-forget remote delivery.
//!
//! Every record is written locally through `tracing` (when enabled). Records at or above the
//! configured minimum level are also shipped to a [`LogSink`] on a detached task; failed
//! deliveries are retried with [`BackoffPolicy`] delays and the `_retry` counter written into the
//! payload, then abandoned after `max_attempts` failures. Nothing here ever returns an error to
//! the caller.

mod level;
mod sink;

pub use level::LogLevel;
pub use sink::{HttpLogSink, LogSink, SinkFuture};

// self
use crate::{
	_prelude::*,
	backoff::BackoffPolicy,
	error::ConfigError,
	http::HttpTransport,
	obs::{self, OpKind, OpOutcome, OpSpan},
};

const CATEGORY_PREFIX: &str = "logger-category=";

/// Settings for a [`TelemetryDeliverer`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
	/// Minimum level shipped remotely; unknown names disable remote delivery.
	#[serde(default = "TelemetryConfig::default_min_level")]
	pub min_level: String,
	/// Failed deliveries tolerated before a record is abandoned.
	#[serde(default = "TelemetryConfig::default_max_attempts")]
	pub max_attempts: u32,
	/// Collector endpoint used by [`TelemetryDeliverer::with_http`].
	#[serde(default)]
	pub remote_url: Option<Url>,
	/// Redelivery delay bounds.
	#[serde(default = "TelemetryConfig::default_retry")]
	pub retry: BackoffPolicy,
}
impl TelemetryConfig {
	const DEFAULT_MAX_ATTEMPTS: u32 = 5;

	fn default_min_level() -> String {
		LogLevel::Info.as_str().into()
	}

	fn default_max_attempts() -> u32 {
		Self::DEFAULT_MAX_ATTEMPTS
	}

	fn default_retry() -> BackoffPolicy {
		BackoffPolicy::TELEMETRY
	}

	/// Overrides the minimum remote level.
	pub fn with_min_level(mut self, level: impl Into<String>) -> Self {
		self.min_level = level.into();

		self
	}

	/// Overrides the failure budget per record.
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts;

		self
	}

	/// Sets the collector endpoint.
	pub fn with_remote_url(mut self, url: Url) -> Self {
		self.remote_url = Some(url);

		self
	}

	/// Overrides redelivery delay bounds.
	pub fn with_retry(mut self, retry: BackoffPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Validates the configuration.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_attempts == 0 {
			return Err(ConfigError::ZeroAttempts);
		}

		self.retry.validate()
	}
}
impl Default for TelemetryConfig {
	fn default() -> Self {
		Self {
			min_level: Self::default_min_level(),
			max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
			remote_url: None,
			retry: BackoffPolicy::TELEMETRY,
		}
	}
}

/// Payload awaiting redelivery, annotated with its retry number.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryRecord {
	/// Failed deliveries so far.
	pub attempt: u32,
	/// Payload sent on the next delivery.
	pub payload: JsonValue,
}
impl RetryRecord {
	/// Wraps a fresh payload.
	pub fn new(payload: JsonValue) -> Self {
		Self { attempt: 0, payload }
	}

	/// Records one more failure and writes `_retry` into object payloads.
	pub fn record_failure(&mut self) {
		self.attempt += 1;

		if let Some(object) = self.payload.as_object_mut() {
			object.insert("_retry".into(), JsonValue::from(self.attempt));
		}
	}
}

struct Inner {
	config: TelemetryConfig,
	min_level: Option<LogLevel>,
	sink: Option<Arc<dyn LogSink>>,
}

/// Cloneable telemetry front end.
#[derive(Clone)]
pub struct TelemetryDeliverer {
	inner: Arc<Inner>,
}
impl TelemetryDeliverer {
	/// Creates a deliverer shipping to `sink` (local-only when `None`).
	pub fn new(config: TelemetryConfig, sink: Option<Arc<dyn LogSink>>) -> Result<Self, ConfigError> {
		config.validate()?;

		let min_level = LogLevel::parse(&config.min_level);

		Ok(Self { inner: Arc::new(Inner { config, min_level, sink }) })
	}

	/// Creates a deliverer posting to `config.remote_url` through `transport`.
	pub fn with_http<C>(
		config: TelemetryConfig,
		transport: Arc<C>,
		timeout: Duration,
	) -> Result<Self, ConfigError>
	where
		C: ?Sized + HttpTransport,
	{
		let sink = config.remote_url.clone().map(|url| {
			Arc::new(HttpLogSink::new(transport, url, timeout)) as Arc<dyn LogSink>
		});

		Self::new(config, sink)
	}

	/// Local-only deliverer.
	pub fn local() -> Self {
		Self {
			inner: Arc::new(Inner {
				config: TelemetryConfig::default(),
				min_level: Some(LogLevel::Info),
				sink: None,
			}),
		}
	}

	/// Active configuration.
	pub fn config(&self) -> &TelemetryConfig {
		&self.inner.config
	}

	/// Returns `true` when records at `level` are shipped remotely.
	pub fn should_deliver(&self, level: LogLevel) -> bool {
		self.inner.sink.is_some() && self.inner.min_level.is_some_and(|minimum| level.reaches(minimum))
	}

	/// Records a message with optional structured fields.
	pub fn log(
		&self,
		level: LogLevel,
		category: &str,
		message: impl Into<String>,
		extra: Option<JsonMap<String, JsonValue>>,
	) {
		let category = normalize_category(category);
		let message = message.into();

		record_locally(level, category, &message);

		if !self.should_deliver(level) {
			return;
		}

		let payload = build_payload(level, category, &message, extra.unwrap_or_default());

		self.spawn_delivery(level, payload);
	}

	/// Records a message whose level arrives as text; unknown levels are only recorded locally.
	pub fn log_named(
		&self,
		level: &str,
		category: &str,
		message: impl Into<String>,
		extra: Option<JsonMap<String, JsonValue>>,
	) {
		match LogLevel::parse(level) {
			Some(level) => self.log(level, category, message, extra),
			None => {
				let _message = message.into();

				#[cfg(feature = "tracing")]
				tracing::info!(
					requested_level = level,
					category = normalize_category(category),
					"{_message}"
				);
			},
		}
	}

	/// Records an error-level message describing `error`.
	pub fn log_error<E>(&self, category: &str, message: impl Into<String>, error: &E)
	where
		E: StdError,
	{
		self.log(LogLevel::Error, category, message, Some(error_fields(error)));
	}

	/// Returns a logger bound to `category`.
	pub fn logger_for(&self, category: impl Into<String>) -> CategoryLogger {
		CategoryLogger { deliverer: self.clone(), category: category.into() }
	}

	fn spawn_delivery(&self, level: LogLevel, payload: JsonValue) {
		let Some(sink) = self.inner.sink.clone() else { return };
		let Ok(runtime) = tokio::runtime::Handle::try_current() else {
			#[cfg(feature = "tracing")]
			tracing::debug!("No async runtime available; skipping remote telemetry delivery.");

			return;
		};

		runtime.spawn(deliver(
			sink,
			level,
			RetryRecord::new(payload),
			self.inner.config.retry,
			self.inner.config.max_attempts,
		));
	}
}
impl Debug for TelemetryDeliverer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TelemetryDeliverer")
			.field("config", &self.inner.config)
			.field("remote", &self.inner.sink.is_some())
			.finish()
	}
}

/// Per-category helper returned by [`TelemetryDeliverer::logger_for`].
#[derive(Clone, Debug)]
pub struct CategoryLogger {
	deliverer: TelemetryDeliverer,
	category: String,
}
impl CategoryLogger {
	/// Bound category.
	pub fn category(&self) -> &str {
		&self.category
	}

	/// Records at `level` with optional structured fields.
	pub fn log_with(
		&self,
		level: LogLevel,
		message: impl Into<String>,
		extra: Option<JsonMap<String, JsonValue>>,
	) {
		self.deliverer.log(level, &self.category, message, extra);
	}

	/// Records a trace message.
	pub fn trace(&self, message: impl Into<String>) {
		self.log_with(LogLevel::Trace, message, None);
	}

	/// Records an info message.
	pub fn info(&self, message: impl Into<String>) {
		self.log_with(LogLevel::Info, message, None);
	}

	/// Records a log message (same rank as info).
	pub fn log(&self, message: impl Into<String>) {
		self.log_with(LogLevel::Log, message, None);
	}

	/// Records a warning.
	pub fn warn(&self, message: impl Into<String>) {
		self.log_with(LogLevel::Warn, message, None);
	}

	/// Records an error message.
	pub fn error(&self, message: impl Into<String>) {
		self.log_with(LogLevel::Error, message, None);
	}

	/// Records an error-level message describing `error`.
	pub fn error_with<E>(&self, message: impl Into<String>, error: &E)
	where
		E: StdError,
	{
		self.deliverer.log_error(&self.category, message, error);
	}
}

async fn deliver(
	sink: Arc<dyn LogSink>,
	level: LogLevel,
	mut record: RetryRecord,
	retry: BackoffPolicy,
	max_attempts: u32,
) {
	const KIND: OpKind = OpKind::Telemetry;

	let span = OpSpan::new(KIND, "deliver");

	loop {
		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		match span.instrument(sink.send(level, &record.payload)).await {
			Ok(()) => {
				obs::record_op_outcome(KIND, OpOutcome::Success);

				return;
			},
			Err(_e) => {
				obs::record_op_outcome(KIND, OpOutcome::Failure);

				let delay = retry.delay(record.attempt);

				record.record_failure();

				if record.attempt >= max_attempts {
					#[cfg(feature = "tracing")]
					tracing::warn!(
						attempts = record.attempt,
						error = %_e,
						"DeliveryAbandoned: telemetry record dropped after repeated failures."
					);

					return;
				}

				tokio::time::sleep(delay).await;
			},
		}
	}
}

fn normalize_category(category: &str) -> &str {
	category.strip_prefix(CATEGORY_PREFIX).unwrap_or(category)
}

fn record_locally(level: LogLevel, category: &str, message: &str) {
	#[cfg(feature = "tracing")]
	match level {
		LogLevel::Trace => tracing::trace!(category, "{message}"),
		LogLevel::Info | LogLevel::Log => tracing::info!(category, "{message}"),
		LogLevel::Warn => tracing::warn!(category, "{message}"),
		LogLevel::Error => tracing::error!(category, "{message}"),
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (level, category, message);
	}
}

fn build_payload(
	level: LogLevel,
	category: &str,
	message: &str,
	extra: JsonMap<String, JsonValue>,
) -> JsonValue {
	let date = OffsetDateTime::now_utc()
		.format(&time::format_description::well_known::Rfc3339)
		.unwrap_or_default();
	let mut payload = JsonMap::new();

	payload.insert("date".into(), JsonValue::String(date));
	payload.insert("level".into(), JsonValue::String(level.as_str().into()));
	payload.insert("category".into(), JsonValue::String(category.into()));
	payload.insert("message".into(), JsonValue::String(message.into()));
	payload.extend(extra);

	JsonValue::Object(payload)
}

fn error_fields<E>(error: &E) -> JsonMap<String, JsonValue>
where
	E: StdError,
{
	let type_name = std::any::type_name::<E>();
	let short_name = type_name.rsplit("::").next().unwrap_or(type_name);
	let mut chain = Vec::new();
	let mut source = error.source();

	while let Some(cause) = source {
		chain.push(cause.to_string());
		source = cause.source();
	}

	let mut fields = JsonMap::new();

	fields.insert("errorMessage".into(), JsonValue::String(error.to_string()));
	fields.insert("errorType".into(), JsonValue::String(short_name.into()));

	if !chain.is_empty() {
		fields.insert("errorStack".into(), JsonValue::String(chain.join("\n")));
	}

	fields
}
