//! Event handler registry and lifecycle callbacks.

// self
use crate::{_prelude::*, channel::protocol::ChannelEvent, error::ChannelError};

/// Handler invoked for a dispatched event.
pub type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;
/// Callback without arguments (`on_open`, `on_heartbeat`, `on_heartbeat_timeout`).
pub type SignalHandler = Arc<dyn Fn() + Send + Sync>;
/// Callback receiving close details.
pub type CloseHandler = Arc<dyn Fn(CloseInfo) + Send + Sync>;
/// Callback receiving channel failures.
pub type ErrorHandler = Arc<dyn Fn(&ChannelError) + Send + Sync>;
/// Callback receiving the reconnect attempt number and the delay before it.
pub type ReconnectHandler = Arc<dyn Fn(u32, Duration) + Send + Sync>;

/// Key selecting which events a handler receives.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKey {
	/// Events with exactly this name.
	Named(String),
	/// Events with no named handler.
	Wildcard,
}
impl From<&str> for EventKey {
	fn from(name: &str) -> Self {
		match name {
			"*" => Self::Wildcard,
			name => Self::Named(name.to_owned()),
		}
	}
}
impl From<String> for EventKey {
	fn from(name: String) -> Self {
		if name == "*" { Self::Wildcard } else { Self::Named(name) }
	}
}

/// Details reported by `on_close`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseInfo {
	/// The caller requested the close.
	pub by_caller: bool,
	/// A reconnect will be scheduled.
	pub will_reconnect: bool,
}

/// One handler per key; registering again replaces the previous handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
	handlers: HashMap<EventKey, EventHandler>,
}
impl HandlerRegistry {
	/// Registers `handler` under `key`.
	pub fn insert(&mut self, key: EventKey, handler: EventHandler) {
		self.handlers.insert(key, handler);
	}

	/// Removes the handler registered under `key`.
	pub fn remove(&mut self, key: &EventKey) -> bool {
		self.handlers.remove(key).is_some()
	}

	/// Picks the named handler for `name`, falling back to the wildcard handler.
	pub fn resolve(&self, name: &str) -> Option<EventHandler> {
		self.handlers
			.get(&EventKey::Named(name.to_owned()))
			.or_else(|| self.handlers.get(&EventKey::Wildcard))
			.cloned()
	}

	/// Number of registered handlers.
	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	/// Returns `true` when no handler is registered.
	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}
}
impl Debug for HandlerRegistry {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_set().entries(self.handlers.keys()).finish()
	}
}

#[derive(Clone, Default)]
pub(crate) struct Lifecycle {
	pub(crate) on_open: Option<SignalHandler>,
	pub(crate) on_close: Option<CloseHandler>,
	pub(crate) on_error: Option<ErrorHandler>,
	pub(crate) on_heartbeat: Option<SignalHandler>,
	pub(crate) on_heartbeat_timeout: Option<SignalHandler>,
	pub(crate) on_reconnect: Option<ReconnectHandler>,
}
