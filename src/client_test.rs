use super::*;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

// =============================================================================
// STUB SEAMS
// =============================================================================

struct StubNegotiator {
    response: NegotiationResponse,
}

#[async_trait::async_trait]
impl Negotiate for StubNegotiator {
    async fn negotiate(&self, _request: &NegotiationRequest) -> Result<NegotiationResponse, ClientError> {
        Ok(self.response.clone())
    }
}

/// Channel-backed transport: outbound frames are captured, inbound bytes are
/// fed by the test through an unbounded sender.
struct StubTransport {
    outbound: StdMutex<Vec<Vec<u8>>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: AtomicBool,
}

impl StubTransport {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            outbound: StdMutex::new(Vec::new()),
            inbound: Mutex::new(rx),
            closed: AtomicBool::new(false),
        });
        (transport, tx)
    }

    fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.outbound.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for StubTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), crate::transport::TransportError> {
        self.outbound.lock().unwrap().push(frame);
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>, crate::transport::TransportError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or(crate::transport::TransportError::Closed)
    }

    async fn close(&self) -> Result<(), crate::transport::TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct StubConnector {
    transport: StdMutex<Option<Arc<StubTransport>>>,
    connects: Arc<StdMutex<Vec<(String, Option<String>)>>>,
}

#[async_trait::async_trait]
impl Connector for StubConnector {
    async fn connect(&self, url: &str, bearer: Option<&str>) -> Result<Arc<dyn Transport>, ClientError> {
        self.connects
            .lock()
            .unwrap()
            .push((url.to_owned(), bearer.map(ToOwned::to_owned)));
        let transport = self
            .transport
            .lock()
            .unwrap()
            .clone()
            .expect("stub transport should be configured");
        Ok(transport)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn ok_negotiation() -> NegotiationResponse {
    NegotiationResponse {
        connection_id: "conn-1".into(),
        ..NegotiationResponse::default()
    }
}

struct Harness {
    connection: HubConnection,
    transport: Arc<StubTransport>,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    connects: Arc<StdMutex<Vec<(String, Option<String>)>>>,
}

fn harness_with(negotiated: NegotiationResponse) -> Harness {
    let (transport, inbound) = StubTransport::new();
    let connects = Arc::new(StdMutex::new(Vec::new()));
    let connector = StubConnector {
        transport: StdMutex::new(Some(Arc::clone(&transport))),
        connects: Arc::clone(&connects),
    };
    let config = ClientConfig::new("https://host/hub").with_access_token("tok");
    let connection = HubConnection::with_parts(
        Box::new(StubNegotiator { response: negotiated }),
        Box::new(connector),
        config,
    );
    Harness { connection, transport, inbound, connects }
}

fn noop_handler() -> InvocationHandler {
    Arc::new(|_| {})
}

fn capturing_handler() -> (InvocationHandler, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: InvocationHandler = Arc::new(move |envelope| {
        tx.send(envelope).expect("capture channel should stay open");
    });
    (handler, rx)
}

async fn read_one(connection: &HubConnection, handler: &InvocationHandler) -> Result<Dispatched, ClientError> {
    timeout(Duration::from_millis(500), connection.read(handler))
        .await
        .expect("read should not block with a frame available")
}

async fn started() -> Harness {
    let harness = harness_with(ok_negotiation());
    harness.connection.start().await.unwrap();
    harness
}

async fn ready() -> Harness {
    let harness = started().await;
    harness.inbound.send(b"{}\x1e".to_vec()).unwrap();
    let ack = read_one(&harness.connection, &noop_handler()).await.unwrap();
    assert_eq!(ack.kind, MessageKind::HandshakeResponse);
    harness
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
async fn start_sends_framed_handshake_and_enters_handshake_sent() {
    let harness = started().await;

    assert_eq!(harness.connection.phase(), ConnectionPhase::HandshakeSent);

    let frames = harness.transport.sent_frames();
    assert_eq!(frames, vec![b"{\"protocol\":\"json\",\"version\":1}\x1e".to_vec()]);

    let connects = harness.connects.lock().unwrap().clone();
    assert_eq!(connects, vec![("wss://host/hub?id=conn-1".to_owned(), Some("tok".to_owned()))]);

    let negotiated = harness.connection.negotiated().expect("negotiation result retained");
    assert_eq!(negotiated.connection_id, "conn-1");
}

#[tokio::test]
async fn handshake_ack_moves_to_ready() {
    let harness = ready().await;
    assert_eq!(harness.connection.phase(), ConnectionPhase::Ready);
}

#[tokio::test]
async fn handshake_error_fails_connection_and_blocks_send() {
    let harness = started().await;
    harness.inbound.send(b"{\"error\":\"nope\"}\x1e".to_vec()).unwrap();

    let result = read_one(&harness.connection, &noop_handler()).await;
    assert!(matches!(result, Err(ClientError::HandshakeFailed(error)) if error == "nope"));
    assert_eq!(harness.connection.phase(), ConnectionPhase::Failed);

    let result = harness.connection.send(b"{\"type\":6}").await;
    assert!(matches!(result, Err(ClientError::InvalidState { op: "send", .. })));
    // Only the handshake request ever hit the socket.
    assert_eq!(harness.transport.sent_frames().len(), 1);
}

#[tokio::test]
async fn negotiation_error_blocks_connect() {
    let harness = harness_with(NegotiationResponse {
        error: Some("x".into()),
        ..NegotiationResponse::default()
    });

    let result = harness.connection.start().await;

    assert!(matches!(result, Err(ClientError::NegotiationRejected(error)) if error == "x"));
    assert_eq!(harness.connection.phase(), ConnectionPhase::Failed);
    assert!(harness.connects.lock().unwrap().is_empty(), "no socket may be opened");
}

#[tokio::test]
async fn start_twice_is_invalid_state() {
    let harness = started().await;

    let result = harness.connection.start().await;
    assert!(matches!(result, Err(ClientError::InvalidState { op: "start", .. })));
}

#[tokio::test]
async fn stop_closes_socket_and_is_idempotent() {
    let harness = ready().await;

    harness.connection.stop().await.unwrap();
    assert_eq!(harness.connection.phase(), ConnectionPhase::Closed);
    assert!(harness.transport.closed.load(Ordering::SeqCst));

    harness.connection.stop().await.unwrap();
    assert_eq!(harness.connection.phase(), ConnectionPhase::Closed);

    let result = harness.connection.send(b"{\"type\":6}").await;
    assert!(matches!(result, Err(ClientError::InvalidState { op: "send", .. })));
}

#[tokio::test]
async fn failed_physical_read_fails_connection() {
    let harness = ready().await;
    drop(harness.inbound);

    let result = timeout(Duration::from_millis(500), harness.connection.read(&noop_handler()))
        .await
        .expect("read should return once the transport closes");

    assert!(matches!(result, Err(ClientError::TransportRead(_))));
    assert_eq!(harness.connection.phase(), ConnectionPhase::Failed);
}

// =============================================================================
// TRAFFIC
// =============================================================================

#[tokio::test]
async fn send_while_disconnected_is_invalid_state() {
    let harness = harness_with(ok_negotiation());

    let result = harness.connection.send(b"{\"type\":6}").await;

    assert!(matches!(
        result,
        Err(ClientError::InvalidState { op: "send", phase: ConnectionPhase::Disconnected })
    ));
    assert!(harness.transport.sent_frames().is_empty());
}

#[tokio::test]
async fn send_is_legal_while_handshake_sent() {
    let harness = started().await;

    harness.connection.send(b"{\"type\":6}").await.unwrap();

    let frames = harness.transport.sent_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1], b"{\"type\":6}\x1e".to_vec());
}

#[tokio::test]
async fn one_physical_read_feeds_multiple_read_calls() {
    let harness = ready().await;
    harness
        .inbound
        .send(b"{\"type\":6}\x1e{\"type\":7}\x1e".to_vec())
        .unwrap();

    let first = read_one(&harness.connection, &noop_handler()).await.unwrap();
    let second = read_one(&harness.connection, &noop_handler()).await.unwrap();

    assert_eq!(first.kind, MessageKind::Ping);
    assert_eq!(second.kind, MessageKind::Close);
}

#[tokio::test]
async fn partial_frame_waits_for_the_rest() {
    let harness = ready().await;
    harness.inbound.send(b"{\"ty".to_vec()).unwrap();
    harness.inbound.send(b"pe\":6}\x1e".to_vec()).unwrap();

    let dispatched = read_one(&harness.connection, &noop_handler()).await.unwrap();
    assert_eq!(dispatched.kind, MessageKind::Ping);
}

#[tokio::test]
async fn invocation_routes_to_callback() {
    let harness = ready().await;
    let (handler, mut captured) = capturing_handler();
    harness
        .inbound
        .send(b"{\"type\":1,\"target\":\"Foo\",\"arguments\":[\"a\"]}\x1e".to_vec())
        .unwrap();

    let dispatched = read_one(&harness.connection, &handler).await.unwrap();
    assert_eq!(dispatched.kind, MessageKind::Invocation);

    let envelope = timeout(Duration::from_millis(500), captured.recv())
        .await
        .expect("callback should run")
        .expect("capture channel closed unexpectedly");
    assert_eq!(envelope.target.as_deref(), Some("Foo"));
    assert_eq!(envelope.arguments, Some(vec![json!("a")]));
}

#[tokio::test]
async fn invoke_and_completion_round_trip() {
    let harness = ready().await;

    let receiver = harness.connection.invoke("Add", vec![json!(2), json!(3)]).await.unwrap();

    let frames = harness.transport.sent_frames();
    let wire = frames.last().expect("invocation frame written");
    let envelope: Envelope = serde_json::from_slice(&wire[..wire.len() - 1]).unwrap();
    assert_eq!(envelope.message_kind(), MessageKind::Invocation);
    assert_eq!(envelope.target.as_deref(), Some("Add"));
    let invocation_id = envelope.invocation_id.expect("invoke assigns an id");

    let completion = format!("{{\"type\":3,\"invocationId\":\"{invocation_id}\",\"result\":\"5\"}}\x1e");
    harness.inbound.send(completion.into_bytes()).unwrap();

    let dispatched = read_one(&harness.connection, &noop_handler()).await.unwrap();
    assert_eq!(dispatched.kind, MessageKind::Completion);

    let outcome = timeout(Duration::from_millis(500), receiver)
        .await
        .expect("completion should resolve")
        .expect("pending entry should not be dropped");
    assert_eq!(outcome, Ok(Some("5".to_owned())));
}

#[tokio::test]
async fn stop_wakes_pending_invokers() {
    let harness = ready().await;
    let receiver = harness.connection.invoke("Slow", vec![]).await.unwrap();

    harness.connection.stop().await.unwrap();

    assert!(receiver.await.is_err());
}
