//! Client error taxonomy.
//!
//! DESIGN
//! ======
//! One flat enum for the whole crate. Every operation returns its error
//! synchronously to the caller; nothing is retried internally. Reconnection,
//! backoff, and retry policy live above this crate.

use crate::client::ConnectionPhase;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The negotiate HTTP request failed at the transport level
    /// (DNS, TCP, TLS, timeout).
    #[error("negotiation request failed: {0}")]
    NegotiationTransport(#[source] reqwest::Error),

    /// The negotiate response body could not be deserialized.
    #[error("negotiation returned an unreadable body: {0}")]
    NegotiationProtocol(#[source] reqwest::Error),

    /// The negotiate response deserialized cleanly but carried a non-empty
    /// `error` field. Raised by [`crate::client::HubConnection::start`], not
    /// by the negotiator itself.
    #[error("server rejected negotiation: {0}")]
    NegotiationRejected(String),

    /// The base URL does not use a scheme the socket target can be derived
    /// from (`http`, `https`, `ws`, `wss`).
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// The bearer credential cannot be encoded as an HTTP header value.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),

    /// Opening the websocket failed. No handshake was attempted.
    #[error("websocket connect failed: {0}")]
    ConnectionEstablishment(#[source] TransportError),

    /// The server answered the protocol handshake with a non-empty error.
    #[error("handshake rejected by server: {0}")]
    HandshakeFailed(String),

    /// A frame did not end with the 0x1E record separator.
    #[error("frame missing record separator")]
    Framing,

    /// A frame payload was not well-formed JSON (distinct from a well-formed
    /// payload with an unknown `type` discriminant, which is non-fatal).
    #[error("malformed message payload: {0}")]
    MessageDecode(#[from] serde_json::Error),

    /// The operation is not legal in the connection's current phase.
    #[error("{op} is not legal while {phase:?}")]
    InvalidState {
        op: &'static str,
        phase: ConnectionPhase,
    },

    /// A physical read on the socket failed.
    #[error("transport read failed: {0}")]
    TransportRead(#[source] TransportError),

    /// A physical write on the socket failed.
    #[error("transport write failed: {0}")]
    TransportWrite(#[source] TransportError),

    /// The invocation callback concurrency bound is saturated. Backpressure
    /// policy is reject: the frame was decoded but the callback was not run.
    #[error("invocation callback limit reached ({limit} in flight)")]
    InvocationQueueFull { limit: usize },

    /// Configuration could not be read from the environment.
    #[error("invalid configuration: {0}")]
    Config(String),
}
