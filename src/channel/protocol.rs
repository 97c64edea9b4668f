//! Wire frames exchanged with the event service.

// self
use crate::_prelude::*;

/// Control operations recognized in inbound `{"op": ...}` frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlOp {
	/// Server greeting; the client answers with its subscriptions.
	Init,
	/// Acknowledgment of one subscription.
	Subscribe,
	/// Acknowledgment of the client's `start`.
	Start,
	/// Heartbeat acknowledgment.
	Pong,
	/// Any other operation name.
	Unknown(String),
}
impl ControlOp {
	fn from_name(name: &str) -> Self {
		match name {
			"init" => Self::Init,
			"subscribe" => Self::Subscribe,
			"start" => Self::Start,
			"pong" => Self::Pong,
			other => Self::Unknown(other.to_owned()),
		}
	}
}

/// Event delivered to registered handlers once the channel has started.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelEvent {
	/// Event name, e.g. `call_created`.
	pub name: String,
	/// Server that emitted the event, when reported.
	pub origin_uuid: Option<String>,
	/// Event payload (`null` when absent).
	pub data: JsonValue,
}

/// Decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
	/// `{"op": ..., "data": ...}` protocol frame.
	Control {
		/// Operation name.
		op: ControlOp,
		/// Operation payload (`null` when absent).
		data: JsonValue,
	},
	/// `{"name": ..., "data": ...}` event frame.
	Event(ChannelEvent),
}
impl InboundFrame {
	/// Decodes one text frame; the error describes why the frame was rejected.
	pub fn parse(text: &str) -> Result<Self, String> {
		let raw: RawFrame =
			serde_json::from_str(text).map_err(|e| format!("Frame is not a JSON object: {e}"))?;

		match (raw.op, raw.name) {
			(Some(op), _) => Ok(Self::Control { op: ControlOp::from_name(&op), data: raw.data }),
			(None, Some(name)) =>
				Ok(Self::Event(ChannelEvent { name, origin_uuid: raw.origin_uuid, data: raw.data })),
			(None, None) => Err("Frame has neither `op` nor `name`".into()),
		}
	}
}

#[derive(Deserialize)]
struct RawFrame {
	#[serde(default)]
	op: Option<String>,
	#[serde(default)]
	name: Option<String>,
	#[serde(default)]
	origin_uuid: Option<String>,
	#[serde(default)]
	data: JsonValue,
}

/// Frames sent by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
	/// Subscribes to one event name.
	Subscribe {
		/// Event name (or `*`).
		event_name: String,
	},
	/// Ends the subscription phase.
	Start,
	/// Heartbeat probe.
	Ping {
		/// Opaque payload echoed back by the server.
		payload: String,
	},
}
impl OutboundFrame {
	/// Renders the frame as JSON text.
	pub fn to_text(&self) -> String {
		let value = match self {
			Self::Subscribe { event_name } =>
				serde_json::json!({ "op": "subscribe", "data": { "event_name": event_name } }),
			Self::Start => serde_json::json!({ "op": "start" }),
			Self::Ping { payload } => serde_json::json!({ "op": "ping", "data": { "payload": payload } }),
		};

		value.to_string()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn parses_control_and_event_frames() {
		assert_eq!(
			InboundFrame::parse(r#"{"op":"init","code":0}"#),
			Ok(InboundFrame::Control { op: ControlOp::Init, data: JsonValue::Null })
		);
		assert_eq!(
			InboundFrame::parse(r#"{"name":"call_created","origin_uuid":"srv","data":{"id":1}}"#),
			Ok(InboundFrame::Event(ChannelEvent {
				name: "call_created".into(),
				origin_uuid: Some("srv".into()),
				data: serde_json::json!({ "id": 1 }),
			}))
		);
	}

	#[test]
	fn rejects_malformed_frames() {
		assert!(InboundFrame::parse("not json").is_err());
		assert!(InboundFrame::parse(r#"{"data":{}}"#).is_err());
		assert!(InboundFrame::parse("[1,2]").is_err());
	}

	#[test]
	fn outbound_frames_render_protocol_json() {
		let subscribe: JsonValue = serde_json::from_str(
			&OutboundFrame::Subscribe { event_name: "chat_message".into() }.to_text(),
		)
		.expect("Subscribe frame should be JSON.");

		assert_eq!(
			subscribe,
			serde_json::json!({ "op": "subscribe", "data": { "event_name": "chat_message" } })
		);
		assert_eq!(OutboundFrame::Start.to_text(), r#"{"op":"start"}"#);
	}
}
