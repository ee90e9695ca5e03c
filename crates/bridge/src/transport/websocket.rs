//! WebSocket transport to the relay.
//!
//! Dials the relay with `tokio-tungstenite` and splits the stream into a
//! [`FrameSource`] and a [`FrameSink`]. Ping/pong is answered by tungstenite
//! itself; only data frames reach the session.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

use super::{Connection, Dialer, FrameSink, FrameSource, TransportError, TransportFuture};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials relay URLs over WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketDialer;

impl WebSocketDialer {
    pub fn new() -> Self {
        Self
    }
}

impl Dialer for WebSocketDialer {
    fn dial<'a>(&'a self, url: &'a Url) -> TransportFuture<'a, Connection> {
        Box::pin(async move {
            tracing::debug!(url = %url, "Dialing relay");

            let (ws_stream, response) = connect_async(url.as_str()).await?;

            tracing::debug!(
                url = %url,
                status = %response.status(),
                "Relay connection established"
            );

            let (sink, stream) = ws_stream.split();
            Ok(Connection {
                source: Box::new(WebSocketSource::new(stream)),
                sink: Box::new(WebSocketSink::new(sink)),
            })
        })
    }
}

/// Receiving half of a relay WebSocket.
pub struct WebSocketSource<S = WsStream> {
    stream: SplitStream<S>,
}

impl<S> WebSocketSource<S> {
    pub fn new(stream: SplitStream<S>) -> Self {
        Self { stream }
    }
}

impl<S> FrameSource for WebSocketSource<S>
where
    S: futures_util::Stream<Item = Result<WsMessage, WsError>> + Send + Unpin,
{
    fn recv(&mut self) -> TransportFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => return Ok(Some(text.into_bytes())),
                    Some(Ok(WsMessage::Binary(data))) => return Ok(Some(data)),
                    Some(Ok(WsMessage::Close(frame))) => {
                        tracing::debug!(frame = ?frame, "Relay sent close frame");
                        return Ok(None);
                    }
                    // Ping, pong and raw frames carry no terminal data
                    Some(Ok(_)) => continue,
                    Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                        return Ok(None)
                    }
                    Some(Err(e)) => return Err(TransportError::WebSocket(e)),
                    None => return Ok(None),
                }
            }
        })
    }
}

/// Sending half of a relay WebSocket.
pub struct WebSocketSink<S = WsStream> {
    sink: SplitSink<S, WsMessage>,
    closed: bool,
}

impl<S> WebSocketSink<S> {
    pub fn new(sink: SplitSink<S, WsMessage>) -> Self {
        Self {
            sink,
            closed: false,
        }
    }
}

impl<S> FrameSink for WebSocketSink<S>
where
    S: futures_util::Sink<WsMessage, Error = WsError> + Send + Unpin,
{
    fn send_text(&mut self, text: String) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return Err(TransportError::Closed);
            }
            self.sink.send(WsMessage::Text(text)).await?;
            Ok(())
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            match self.sink.close().await {
                Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
                Err(e) => Err(TransportError::WebSocket(e)),
            }
        })
    }
}
