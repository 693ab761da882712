//! Socket transport seam and the websocket implementation.
//!
//! DESIGN
//! ======
//! The facade talks to the socket through the [`Transport`] trait and opens
//! it through [`Connector`], so tests can swap in channel-backed stubs. The
//! production pair is [`WsConnector`]/[`WsTransport`] over tokio-tungstenite,
//! with the sink and stream halves split so reads never contend with writes.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// ERRORS
// =============================================================================

/// Failures at the socket boundary, passed through to the caller wrapped in
/// the read/write variants of [`ClientError`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket failure: {0}")]
    Ws(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("socket closed by peer")]
    Closed,
    #[error("outbound frame is not valid UTF-8")]
    NonUtf8,
}

// =============================================================================
// SEAMS
// =============================================================================

/// A connected duplex socket carrying whole frames.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one frame.
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;
    /// Perform one physical read. May return any number of logical frames'
    /// worth of bytes, including a partial frame.
    async fn receive(&self) -> Result<Vec<u8>, TransportError>;
    /// Close the socket.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens a [`Transport`] to a socket URL, attaching the bearer credential
/// when present.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<std::sync::Arc<dyn Transport>, ClientError>;
}

// =============================================================================
// SOCKET URL
// =============================================================================

/// Derive the websocket target from the negotiated connection id: force the
/// scheme to `ws`/`wss` and merge `id=<connection_id>` onto any existing
/// query string.
///
/// # Errors
///
/// [`ClientError::InvalidBaseUrl`] when the scheme is not http(s) or ws(s).
pub fn socket_url(base_url: &str, connection_id: &str) -> Result<String, ClientError> {
    let target = if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if base_url.starts_with("ws://") || base_url.starts_with("wss://") {
        base_url.to_owned()
    } else {
        return Err(ClientError::InvalidBaseUrl(base_url.to_owned()));
    };

    let joiner = if target.contains('?') { '&' } else { '?' };
    Ok(format!("{target}{joiner}id={connection_id}"))
}

// =============================================================================
// WEBSOCKET IMPLEMENTATION
// =============================================================================

/// Production connector: dials the URL with tokio-tungstenite.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<std::sync::Arc<dyn Transport>, ClientError> {
        let mut upgrade = url
            .into_client_request()
            .map_err(|error| ClientError::ConnectionEstablishment(Box::new(error).into()))?;
        if let Some(token) = bearer {
            upgrade
                .headers_mut()
                .insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
        }

        let (stream, _) = connect_async(upgrade)
            .await
            .map_err(|error| ClientError::ConnectionEstablishment(Box::new(error).into()))?;
        tracing::debug!(%url, "websocket open");

        Ok(std::sync::Arc::new(WsTransport::new(stream)))
    }
}

/// Websocket transport. Frames travel as text messages (the wire format is
/// UTF-8 JSON plus the record separator, which is itself valid UTF-8).
pub struct WsTransport {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<SplitStream<WsStream>>,
}

impl WsTransport {
    #[must_use]
    pub fn new(stream: WsStream) -> Self {
        let (writer, reader) = stream.split();
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let text = String::from_utf8(frame).map_err(|_| TransportError::NonUtf8)?;
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| Box::new(error).into())
    }

    async fn receive(&self) -> Result<Vec<u8>, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            let Some(message) = reader.next().await else {
                return Err(TransportError::Closed);
            };
            match message.map_err(Box::new)? {
                Message::Text(text) => return Ok(text.as_str().as_bytes().to_vec()),
                Message::Binary(bytes) => return Ok(bytes.to_vec()),
                Message::Close(_) => return Err(TransportError::Closed),
                // Ping/pong are handled by tungstenite itself.
                _ => {}
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.close().await.map_err(|error| Box::new(error).into())
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
