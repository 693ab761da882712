//! hublink — client for a real-time duplex hub messaging protocol.
//!
//! ARCHITECTURE
//! ============
//! A [`HubConnection`] negotiates a session over HTTP, opens a websocket to
//! the negotiated target, performs the `{protocol:"json", version:1}`
//! handshake, and then exchanges record-separator-framed JSON envelopes.
//! Inbound messages are routed by their `type` discriminant: invocations to
//! an application callback, completions to the pending-invocation table,
//! everything else back to the caller.
//!
//! The socket and the negotiation exchange sit behind traits
//! ([`Transport`]/[`Connector`]/[`Negotiate`]), so callers can layer their
//! own transports and tests can run without a network.
//!
//! Reconnection, backoff, and heartbeat discipline are deliberately not here;
//! they belong to the caller, above this crate.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod negotiate;
pub mod protocol;
pub mod transport;

pub use client::{ConnectionPhase, HubConnection};
pub use config::ClientConfig;
pub use dispatch::{CompletionOutcome, Dispatched, InvocationHandler, PendingInvocations};
pub use error::ClientError;
pub use negotiate::{
    AvailableTransport, HttpNegotiator, Negotiate, NegotiationRequest, NegotiationResponse,
};
pub use protocol::{Envelope, HandshakeRequest, HandshakeResponse, MessageKind};
pub use transport::{Connector, Transport, TransportError, WsConnector};
