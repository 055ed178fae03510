//! Frame-level socket capability and its transport adapters.
//!
//! The client side is an axum WebSocket, the runtime side a tokio-tungstenite
//! client over a unix socket or TCP. Both are reduced to the same two halves:
//! a [`FrameStream`] to read from and a [`FrameSink`] to write to.

use async_trait::async_trait;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, client_async, connect_async};

use crate::endpoint::AttachTarget;

use super::error::{AttachError, AttachResult};

/// One payload frame. Control frames never surface here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read half of a socket.
#[async_trait]
pub trait FrameStream: Send {
    /// Next payload frame, or `None` once the peer closed or the stream ended.
    async fn receive(&mut self) -> AttachResult<Option<Frame>>;

    /// False after a close frame, end of stream or transport error was observed.
    fn is_connected(&self) -> bool;
}

/// Write half of a socket.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> AttachResult<()>;

    /// Close the socket. Closing twice is a no-op.
    async fn close(&mut self) -> AttachResult<()>;
}

/// A socket that can be split into independently owned halves.
pub trait FrameSocket: Send {
    fn split(self) -> (Box<dyn FrameSink>, Box<dyn FrameStream>);
}

// ============================================================================
// Client side (axum)
// ============================================================================

/// The client's upgraded connection.
pub struct ClientSocket {
    inner: WebSocket,
}

impl ClientSocket {
    pub fn new(inner: WebSocket) -> Self {
        Self { inner }
    }
}

impl FrameSocket for ClientSocket {
    fn split(self) -> (Box<dyn FrameSink>, Box<dyn FrameStream>) {
        let (tx, rx) = self.inner.split();
        (
            Box::new(ClientSink {
                inner: tx,
                closed: false,
            }),
            Box::new(ClientStream {
                inner: rx,
                connected: true,
            }),
        )
    }
}

struct ClientStream {
    inner: SplitStream<WebSocket>,
    connected: bool,
}

#[async_trait]
impl FrameStream for ClientStream {
    async fn receive(&mut self) -> AttachResult<Option<Frame>> {
        loop {
            match self.inner.next().await {
                Some(Ok(AxumMessage::Text(text))) => {
                    return Ok(Some(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(AxumMessage::Binary(data))) => return Ok(Some(Frame::Binary(data))),
                Some(Ok(AxumMessage::Ping(_) | AxumMessage::Pong(_))) => continue,
                Some(Ok(AxumMessage::Close(frame))) => {
                    debug!("Client sent close: {:?}", frame);
                    self.connected = false;
                    return Ok(None);
                }
                Some(Err(err)) => {
                    self.connected = false;
                    return Err(err.into());
                }
                None => {
                    self.connected = false;
                    return Ok(None);
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

struct ClientSink {
    inner: SplitSink<WebSocket, AxumMessage>,
    closed: bool,
}

#[async_trait]
impl FrameSink for ClientSink {
    async fn send(&mut self, frame: Frame) -> AttachResult<()> {
        let msg = match frame {
            Frame::Text(text) => AxumMessage::Text(text.into()),
            Frame::Binary(data) => AxumMessage::Binary(data),
        };
        self.inner.send(msg).await?;
        Ok(())
    }

    async fn close(&mut self) -> AttachResult<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.inner.close().await?;
        Ok(())
    }
}

// ============================================================================
// Runtime side (tokio-tungstenite)
// ============================================================================

/// Connection to a runtime attach route, over a unix socket or TCP.
pub enum RuntimeSocket {
    Unix(WebSocketStream<UnixStream>),
    Tcp(WebSocketStream<MaybeTlsStream<TcpStream>>),
}

impl RuntimeSocket {
    /// Open the attach connection described by `target`.
    pub async fn connect(target: &AttachTarget) -> AttachResult<Self> {
        match &target.socket_path {
            Some(path) => {
                let stream = UnixStream::connect(path)
                    .await
                    .map_err(|e| AttachError::Transport(format!("{}: {e}", path.display())))?;
                let request = target.url.as_str().into_client_request()?;
                let (socket, _response) = client_async(request, stream).await?;
                debug!("Connected to runtime attach via unix socket {:?}", path);
                Ok(RuntimeSocket::Unix(socket))
            }
            None => {
                let (socket, _response) = connect_async(target.url.as_str()).await?;
                debug!("Connected to runtime attach at {}", target.url);
                Ok(RuntimeSocket::Tcp(socket))
            }
        }
    }
}

impl FrameSocket for RuntimeSocket {
    fn split(self) -> (Box<dyn FrameSink>, Box<dyn FrameStream>) {
        match self {
            RuntimeSocket::Unix(ws) => split_runtime(ws),
            RuntimeSocket::Tcp(ws) => split_runtime(ws),
        }
    }
}

fn split_runtime<S>(ws: WebSocketStream<S>) -> (Box<dyn FrameSink>, Box<dyn FrameStream>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = ws.split();
    (
        Box::new(RuntimeSink {
            inner: tx,
            closed: false,
        }),
        Box::new(RuntimeStream {
            inner: rx,
            connected: true,
        }),
    )
}

struct RuntimeStream<S> {
    inner: SplitStream<WebSocketStream<S>>,
    connected: bool,
}

#[async_trait]
impl<S> FrameStream for RuntimeStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn receive(&mut self) -> AttachResult<Option<Frame>> {
        loop {
            match self.inner.next().await {
                Some(Ok(TungsteniteMessage::Text(text))) => {
                    return Ok(Some(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(TungsteniteMessage::Binary(data))) => {
                    return Ok(Some(Frame::Binary(data)));
                }
                Some(Ok(TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_))) => continue,
                Some(Ok(TungsteniteMessage::Close(frame))) => {
                    debug!("Runtime sent close: {:?}", frame);
                    self.connected = false;
                    return Ok(None);
                }
                Some(Ok(TungsteniteMessage::Frame(frame))) => {
                    return Err(AttachError::ProtocolViolation(format!(
                        "raw {:?} frame from runtime",
                        frame.header().opcode
                    )));
                }
                Some(Err(err)) => {
                    self.connected = false;
                    return Err(err.into());
                }
                None => {
                    self.connected = false;
                    return Ok(None);
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

struct RuntimeSink<S> {
    inner: SplitSink<WebSocketStream<S>, TungsteniteMessage>,
    closed: bool,
}

#[async_trait]
impl<S> FrameSink for RuntimeSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Frame) -> AttachResult<()> {
        let msg = match frame {
            Frame::Text(text) => TungsteniteMessage::Text(text.into()),
            Frame::Binary(data) => TungsteniteMessage::Binary(data),
        };
        self.inner.send(msg).await?;
        Ok(())
    }

    async fn close(&mut self) -> AttachResult<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_kind_and_len() {
        let text = Frame::Text("héllo".to_string());
        assert_eq!(text.kind(), "text");
        assert_eq!(text.len(), 6);

        let binary = Frame::Binary(Bytes::from_static(&[0x1b, 0x5b, 0x41]));
        assert_eq!(binary.kind(), "binary");
        assert_eq!(binary.len(), 3);
        assert!(Frame::Binary(Bytes::new()).is_empty());
    }

    #[tokio::test]
    async fn connect_to_missing_socket_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = AttachTarget {
            url: "ws://localhost/v1.40/containers/abc123abc123/attach/ws".to_string(),
            socket_path: Some(dir.path().join("absent.sock")),
        };

        let result = RuntimeSocket::connect(&target).await;
        assert!(matches!(result, Err(AttachError::Transport(_))));
    }

    #[tokio::test]
    async fn connect_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let target = AttachTarget {
            url: format!("ws://{addr}/v1.40/containers/abc123abc123/attach/ws"),
            socket_path: None,
        };
        let result = RuntimeSocket::connect(&target).await;
        assert!(matches!(result, Err(AttachError::Transport(_))));
    }
}
