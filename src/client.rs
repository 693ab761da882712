//! Connection facade.
//!
//! ARCHITECTURE
//! ============
//! [`HubConnection`] is an explicit handle callers construct and own — one
//! handle per logical connection, as many handles as you like. It is the sole
//! owner of the connection's lifecycle state and the only component that
//! touches the socket after establishment.
//!
//! LIFECYCLE
//! =========
//! `Disconnected → Negotiating → Connecting → HandshakeSent → Ready →
//! Closing → Closed`, with terminal `Failed` reachable from any non-terminal
//! phase. `start` returns at `HandshakeSent`; the first `read` observes the
//! handshake acknowledgement and moves to `Ready` (or `Failed`). No message
//! is sent or dispatched as normal traffic before that acknowledgement.
//!
//! LOCKING
//! =======
//! Three locks with distinct jobs: an async lifecycle mutex held across
//! negotiate + connect + handshake-send so `start`/`stop` never interleave;
//! an async write gate so concurrent `send` calls cannot interleave frames;
//! and the read-side frame buffer's own mutex, which makes `read` the single
//! logical reader. Phase checks go through a short-lived std mutex.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::dispatch::{CompletionOutcome, Dispatched, Dispatcher, InvocationHandler};
use crate::error::ClientError;
use crate::framing::{self, FrameBuffer};
use crate::negotiate::{HttpNegotiator, Negotiate, NegotiationRequest, NegotiationResponse};
use crate::protocol::{Envelope, HandshakeRequest, HandshakeResponse, MessageKind};
use crate::transport::{Connector, Transport, WsConnector, socket_url};

// =============================================================================
// PHASE
// =============================================================================

/// Lifecycle phase of a logical connection. Transitions are monotonic;
/// `Closed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Negotiating,
    Connecting,
    HandshakeSent,
    Ready,
    Closing,
    Closed,
    Failed,
}

impl ConnectionPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Phases in which `send` and `read` are legal. The handshake request has
    /// been written but nothing else is guaranteed yet in `HandshakeSent`.
    fn allows_traffic(self) -> bool {
        matches!(self, Self::HandshakeSent | Self::Ready)
    }
}

/// Mutable connection record: phase, socket handle, last negotiation result.
/// Created per `start`, torn down together on `stop` or failure.
struct ConnectionState {
    phase: ConnectionPhase,
    transport: Option<Arc<dyn Transport>>,
    negotiated: Option<NegotiationResponse>,
}

// =============================================================================
// FACADE
// =============================================================================

/// A client connection to one hub endpoint.
pub struct HubConnection {
    config: ClientConfig,
    negotiator: Box<dyn Negotiate>,
    connector: Box<dyn Connector>,
    dispatcher: Dispatcher,
    state: StdMutex<ConnectionState>,
    lifecycle: Mutex<()>,
    write_gate: Mutex<()>,
    read_buffer: Mutex<FrameBuffer>,
}

impl HubConnection {
    /// Handle with the production negotiator and websocket connector.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_parts(Box::new(HttpNegotiator::new()), Box::new(WsConnector), config)
    }

    /// Handle with explicit negotiation and connection seams. Used by tests
    /// and by callers layering their own transport.
    #[must_use]
    pub fn with_parts(
        negotiator: Box<dyn Negotiate>,
        connector: Box<dyn Connector>,
        config: ClientConfig,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(config.max_inflight_invocations),
            config,
            negotiator,
            connector,
            state: StdMutex::new(ConnectionState {
                phase: ConnectionPhase::Disconnected,
                transport: None,
                negotiated: None,
            }),
            lifecycle: Mutex::new(()),
            write_gate: Mutex::new(()),
            read_buffer: Mutex::new(FrameBuffer::new()),
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.lock_state().phase
    }

    /// The last negotiation result, while the connection is live.
    #[must_use]
    pub fn negotiated(&self) -> Option<NegotiationResponse> {
        self.lock_state().negotiated.clone()
    }

    /// Negotiate, connect, and send the protocol handshake, in that order.
    /// Returns with the phase at `HandshakeSent`; the acknowledgement is
    /// observed by the first [`HubConnection::read`].
    ///
    /// Any step's failure leaves the phase `Failed` with no socket retained.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the phase is `Disconnected`; otherwise the
    /// failing step's error (`NegotiationTransport`, `NegotiationProtocol`,
    /// `NegotiationRejected`, `InvalidBaseUrl`, `ConnectionEstablishment`,
    /// `TransportWrite`).
    pub async fn start(&self) -> Result<(), ClientError> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut state = self.lock_state();
            if state.phase != ConnectionPhase::Disconnected {
                return Err(ClientError::InvalidState { op: "start", phase: state.phase });
            }
            state.phase = ConnectionPhase::Negotiating;
        }

        match self.start_inner().await {
            Ok(()) => {
                tracing::info!(url = %self.config.url, "connection started, handshake sent");
                Ok(())
            }
            Err(error) => {
                let mut state = self.lock_state();
                state.phase = ConnectionPhase::Failed;
                // Dropping the handle closes the socket; nothing half-open survives.
                state.transport = None;
                state.negotiated = None;
                Err(error)
            }
        }
    }

    async fn start_inner(&self) -> Result<(), ClientError> {
        let request = NegotiationRequest {
            url: self.config.url.clone(),
            access_token: self.config.access_token.clone(),
        };

        let negotiated = self.negotiator.negotiate(&request).await?;
        // Caller obligation from the negotiation contract: a well-formed
        // response may still refuse the session via its error field.
        if let Some(error) = negotiated.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(ClientError::NegotiationRejected(error.to_owned()));
        }

        self.set_phase(ConnectionPhase::Connecting);
        let target = socket_url(&request.url, &negotiated.connection_id)?;
        let transport = self.connector.connect(&target, request.access_token.as_deref()).await?;

        let handshake = serde_json::to_vec(&HandshakeRequest::json_v1())?;
        transport
            .send(framing::encode(&handshake))
            .await
            .map_err(ClientError::TransportWrite)?;

        let mut state = self.lock_state();
        state.transport = Some(transport);
        state.negotiated = Some(negotiated);
        state.phase = ConnectionPhase::HandshakeSent;
        Ok(())
    }

    /// Frame `payload` and write it to the socket.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside `HandshakeSent`/`Ready` (no bytes are written);
    /// `TransportWrite` when the socket write fails.
    pub async fn send(&self, payload: &[u8]) -> Result<(), ClientError> {
        let transport = self.traffic_transport("send")?;
        let frame = framing::encode(payload);

        let _write = self.write_gate.lock().await;
        transport.send(frame).await.map_err(ClientError::TransportWrite)
    }

    /// Deliver one inbound message: pop the next buffered frame, performing
    /// physical reads only while no complete frame is buffered, then dispatch
    /// it. Call in a loop to drain the connection.
    ///
    /// While the phase is `HandshakeSent` the frame is interpreted as the
    /// handshake acknowledgement: an object without an `error` field moves
    /// the phase to `Ready`; anything else fails the connection.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside `HandshakeSent`/`Ready`; `TransportRead` when
    /// the physical read fails (the connection is failed — stop reading);
    /// `HandshakeFailed`, `MessageDecode`, or `InvocationQueueFull` from the
    /// frame itself.
    pub async fn read(&self, on_invocation: &InvocationHandler) -> Result<Dispatched, ClientError> {
        {
            let phase = self.phase();
            if !phase.allows_traffic() {
                return Err(ClientError::InvalidState { op: "read", phase });
            }
        }

        let mut buffer = self.read_buffer.lock().await;
        let payload = loop {
            if let Some(frame) = buffer.next_frame() {
                break frame;
            }
            let transport = self.traffic_transport("read")?;
            let bytes = transport.receive().await.map_err(|error| {
                self.fail();
                ClientError::TransportRead(error)
            })?;
            buffer.extend(&bytes);
        };
        drop(buffer);

        if self.phase() == ConnectionPhase::HandshakeSent {
            return self.observe_handshake(&payload);
        }
        self.dispatcher.dispatch(&payload, on_invocation)
    }

    /// Send an invocation expecting a completion. The returned receiver
    /// resolves when a matching completion is dispatched by the read loop,
    /// or errors if the connection is stopped first.
    ///
    /// # Errors
    ///
    /// Same as [`HubConnection::send`]; on failure nothing stays registered.
    pub async fn invoke(
        &self,
        target: &str,
        arguments: Vec<Value>,
    ) -> Result<oneshot::Receiver<CompletionOutcome>, ClientError> {
        let invocation_id = Uuid::new_v4().to_string();
        let receiver = self.dispatcher.pending().register(invocation_id.clone());

        let envelope = Envelope::invocation(invocation_id.clone(), target, arguments);
        let payload = serde_json::to_vec(&envelope)?;
        if let Err(error) = self.send(&payload).await {
            self.dispatcher.pending().discard(&invocation_id);
            return Err(error);
        }
        Ok(receiver)
    }

    /// Close the socket and move to `Closed`. Idempotent; in-flight
    /// invocation callbacks are neither awaited nor cancelled, and waiters
    /// on pending completions are woken with a closed-channel error.
    ///
    /// # Errors
    ///
    /// None currently; socket close failures are logged, not returned.
    pub async fn stop(&self) -> Result<(), ClientError> {
        let _lifecycle = self.lifecycle.lock().await;

        let transport = {
            let mut state = self.lock_state();
            if state.phase.is_terminal() {
                return Ok(());
            }
            state.phase = ConnectionPhase::Closing;
            state.negotiated = None;
            state.transport.take()
        };

        if let Some(transport) = transport {
            if let Err(error) = transport.close().await {
                tracing::warn!(%error, "socket close reported an error");
            }
        }
        self.dispatcher.pending().clear();

        self.lock_state().phase = ConnectionPhase::Closed;
        tracing::info!("connection closed");
        Ok(())
    }

    // -------------------------------------------------------------------------

    fn observe_handshake(&self, payload: &[u8]) -> Result<Dispatched, ClientError> {
        let value: Value = serde_json::from_slice(payload)?;
        let ack: HandshakeResponse = serde_json::from_value(value.clone())?;

        if let Some(error) = ack.error.filter(|e| !e.is_empty()) {
            self.fail();
            tracing::warn!(%error, "handshake rejected");
            return Err(ClientError::HandshakeFailed(error));
        }

        self.set_phase(ConnectionPhase::Ready);
        tracing::debug!("handshake acknowledged");
        Ok(Dispatched { kind: MessageKind::HandshakeResponse, payload: value })
    }

    /// Snapshot the transport for traffic, enforcing the phase rule.
    fn traffic_transport(&self, op: &'static str) -> Result<Arc<dyn Transport>, ClientError> {
        let state = self.lock_state();
        match &state.transport {
            Some(transport) if state.phase.allows_traffic() => Ok(Arc::clone(transport)),
            _ => Err(ClientError::InvalidState { op, phase: state.phase }),
        }
    }

    fn fail(&self) {
        let mut state = self.lock_state();
        state.phase = ConnectionPhase::Failed;
        state.transport = None;
        state.negotiated = None;
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.lock_state().phase = phase;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
