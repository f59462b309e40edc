//! WebSocket transport over tokio-tungstenite

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{BoxedSink, BoxedStream, Connector, Frame, FrameSink, FrameStream, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Code reported when the peer closes without a status
const NO_STATUS_RECEIVED: u16 = 1005;

/// Connects over `ws://` / `wss://`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<(BoxedSink, BoxedStream), TransportError> {
        let (socket, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(url = %url, status = %response.status(), "WebSocket connected");

        let (sink, stream) = socket.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsFrames { stream })))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
            Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
                code: WsCloseCode::from(code),
                reason: reason.into(),
            })),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

struct WsFrames {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsFrames {
    async fn receive_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            };

            let frame = match message {
                Message::Text(text) => Frame::Text(text),
                Message::Binary(bytes) => Frame::Binary(bytes),
                Message::Close(Some(close)) => Frame::Close {
                    code: close.code.into(),
                    reason: close.reason.into_owned(),
                },
                Message::Close(None) => Frame::close(NO_STATUS_RECEIVED, ""),
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }
}
