//! Duplex text-frame transport under the event channel.
//!
//! The driver only needs to open a connection, send text, receive text, and close. Enable the
//! `websocket` feature for the `tokio-tungstenite` implementation; tests plug in-memory pairs.

// self
use crate::{_prelude::*, error::ChannelError};

/// Boxed future returned by [`ChannelTransport::connect`].
pub type ConnectFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Box<dyn ChannelConnection>, ChannelError>> + 'a + Send>>;
/// Boxed future returned by [`ChannelConnection::send`] and [`ChannelConnection::close`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ChannelError>> + 'a + Send>>;
/// Boxed future returned by [`ChannelConnection::recv`].
pub type RecvFuture<'a> =
	Pin<Box<dyn Future<Output = Option<Result<String, ChannelError>>> + 'a + Send>>;

/// Opens connections to the event service.
pub trait ChannelTransport
where
	Self: 'static + Send + Sync,
{
	/// Connects to `url`, resolving once the connection is open.
	fn connect<'a>(&'a self, url: &'a Url) -> ConnectFuture<'a>;
}

/// One open duplex connection.
pub trait ChannelConnection
where
	Self: Send,
{
	/// Sends one text frame.
	fn send(&mut self, text: String) -> SendFuture<'_>;

	/// Receives the next text frame; `None` once the peer closed the connection.
	///
	/// The returned future must be cancel-safe: the driver polls it inside `select!`.
	fn recv(&mut self) -> RecvFuture<'_>;

	/// Closes the connection.
	fn close(&mut self) -> SendFuture<'_>;
}

#[cfg(feature = "websocket")]
pub use tungstenite::TungsteniteTransport;

#[cfg(feature = "websocket")]
mod tungstenite {
	// crates.io
	use futures_util::{SinkExt, StreamExt};
	use tokio::net::TcpStream;
	use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
	// self
	use super::*;

	/// [`ChannelTransport`] backed by `tokio-tungstenite` (rustls with webpki roots).
	#[derive(Clone, Copy, Debug, Default)]
	pub struct TungsteniteTransport;
	impl ChannelTransport for TungsteniteTransport {
		fn connect<'a>(&'a self, url: &'a Url) -> ConnectFuture<'a> {
			Box::pin(async move {
				let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
					.await
					.map_err(ChannelError::connection)?;

				Ok(Box::new(TungsteniteConnection { stream }) as Box<dyn ChannelConnection>)
			})
		}
	}

	struct TungsteniteConnection {
		stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
	}
	impl ChannelConnection for TungsteniteConnection {
		fn send(&mut self, text: String) -> SendFuture<'_> {
			Box::pin(async move {
				self.stream.send(Message::text(text)).await.map_err(ChannelError::connection)
			})
		}

		fn recv(&mut self) -> RecvFuture<'_> {
			Box::pin(async move {
				loop {
					match self.stream.next().await? {
						Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
						Ok(Message::Close(_)) => return None,
						Ok(_) => continue,
						Err(e) => return Some(Err(ChannelError::connection(e))),
					}
				}
			})
		}

		fn close(&mut self) -> SendFuture<'_> {
			Box::pin(async move { self.stream.close(None).await.map_err(ChannelError::connection) })
		}
	}
}
