//! Per-connection handshake state machine.
//!
//! The machine is pure: it consumes decoded frames and tells the driver what to do, so every
//! ordering rule can be tested without a socket.

// self
use crate::channel::protocol::{ChannelEvent, ControlOp, InboundFrame, OutboundFrame};

/// Progress of one connection through the subscribe/start handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HandshakeState {
	/// Transport connection is being established.
	#[default]
	Connecting,
	/// Connected; waiting for the server's `init`.
	AwaitingInit,
	/// Subscriptions and `start` sent; waiting for the `start` acknowledgment.
	Subscribing,
	/// Events flow to handlers.
	Started,
	/// Connection is gone.
	Closed,
}

/// What the driver must do after feeding a frame to [`Handshake::on_frame`].
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
	/// Send these frames in order.
	Send(Vec<OutboundFrame>),
	/// The handshake completed.
	Started,
	/// Deliver an event to handlers.
	Dispatch(ChannelEvent),
	/// A heartbeat acknowledgment arrived.
	Pong,
	/// Nothing to do.
	Ignore,
	/// The frame violates the protocol and was dropped.
	Reject(String),
}

/// Handshake bookkeeping for a single connection.
#[derive(Clone, Debug)]
pub struct Handshake {
	state: HandshakeState,
	topics: Vec<String>,
}
impl Handshake {
	/// Creates a machine in [`HandshakeState::Connecting`] for the given topics.
	pub fn new(topics: Vec<String>) -> Self {
		Self { state: HandshakeState::Connecting, topics }
	}

	/// Current state.
	pub fn state(&self) -> HandshakeState {
		self.state
	}

	/// Records that the transport connection opened.
	pub fn opened(&mut self) {
		if self.state == HandshakeState::Connecting {
			self.state = HandshakeState::AwaitingInit;
		}
	}

	/// Records that the connection is gone; terminal.
	pub fn closed(&mut self) {
		self.state = HandshakeState::Closed;
	}

	/// Advances the machine with one inbound frame.
	pub fn on_frame(&mut self, frame: InboundFrame) -> Step {
		use HandshakeState::*;

		match (self.state, frame) {
			(Connecting | Closed, _) => Step::Ignore,
			(AwaitingInit, InboundFrame::Control { op: ControlOp::Init, .. }) => {
				let mut frames = self
					.topics
					.iter()
					.map(|topic| OutboundFrame::Subscribe { event_name: topic.clone() })
					.collect::<Vec<_>>();

				frames.push(OutboundFrame::Start);

				self.state = Subscribing;

				Step::Send(frames)
			},
			(Subscribing | Started, InboundFrame::Control { op: ControlOp::Subscribe, .. }) =>
				Step::Ignore,
			(Subscribing, InboundFrame::Control { op: ControlOp::Start, .. }) => {
				self.state = Started;

				Step::Started
			},
			(Started, InboundFrame::Event(event)) => Step::Dispatch(event),
			(Started, InboundFrame::Control { op: ControlOp::Pong, .. }) => Step::Pong,
			(state, InboundFrame::Event(event)) =>
				Step::Reject(format!("Event `{}` arrived while {state:?}", event.name)),
			(state, InboundFrame::Control { op, .. }) =>
				Step::Reject(format!("Operation {op:?} arrived while {state:?}")),
		}
	}
}
