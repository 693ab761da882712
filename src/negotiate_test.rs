use super::*;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;

const CANNED_RESPONSE: &str = r#"{
    "connectionId": "conn-1",
    "availableTransports": [
        {"transport": "WebSockets", "transferFormats": ["Text", "Binary"]}
    ]
}"#;

#[derive(Clone, Default)]
struct Captured {
    headers: Arc<Mutex<Option<HeaderMap>>>,
}

async fn capture_negotiate(State(captured): State<Captured>, headers: HeaderMap) -> String {
    *captured.headers.lock().unwrap() = Some(headers);
    CANNED_RESPONSE.to_owned()
}

/// Bind a loopback server and return its base URL.
async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn negotiate_posts_with_bearer_and_content_type() {
    let captured = Captured::default();
    let router = Router::new()
        .route("/hub/negotiate", post(capture_negotiate))
        .with_state(captured.clone());
    let base = spawn_server(router).await;

    let request = NegotiationRequest {
        url: format!("{base}/hub"),
        access_token: Some("tok".to_owned()),
    };
    let negotiated = HttpNegotiator::new().negotiate(&request).await.unwrap();

    assert_eq!(negotiated.connection_id, "conn-1");
    assert_eq!(negotiated.available_transports.len(), 1);
    assert_eq!(negotiated.available_transports[0].transport, "WebSockets");
    assert!(negotiated.error.is_none());

    let headers = captured.headers.lock().unwrap().take().expect("handler should run");
    assert_eq!(headers.get("authorization").unwrap(), "Bearer tok");
    assert_eq!(headers.get("content-type").unwrap(), "application/json");
}

#[tokio::test]
async fn negotiate_without_token_sends_no_authorization() {
    let captured = Captured::default();
    let router = Router::new()
        .route("/hub/negotiate", post(capture_negotiate))
        .with_state(captured.clone());
    let base = spawn_server(router).await;

    let request = NegotiationRequest {
        url: format!("{base}/hub"),
        access_token: None,
    };
    HttpNegotiator::new().negotiate(&request).await.unwrap();

    let headers = captured.headers.lock().unwrap().take().expect("handler should run");
    assert!(headers.get("authorization").is_none());
}

#[tokio::test]
async fn negotiate_trims_trailing_slash() {
    let captured = Captured::default();
    let router = Router::new()
        .route("/hub/negotiate", post(capture_negotiate))
        .with_state(captured);
    let base = spawn_server(router).await;

    let request = NegotiationRequest {
        url: format!("{base}/hub/"),
        access_token: None,
    };
    let negotiated = HttpNegotiator::new().negotiate(&request).await.unwrap();
    assert_eq!(negotiated.connection_id, "conn-1");
}

#[tokio::test]
async fn negotiate_surfaces_server_error_field_without_failing() {
    let router = Router::new().route(
        "/hub/negotiate",
        post(|| async { r#"{"error":"hub unavailable"}"#.to_owned() }),
    );
    let base = spawn_server(router).await;

    let request = NegotiationRequest {
        url: format!("{base}/hub"),
        access_token: None,
    };
    let negotiated = HttpNegotiator::new().negotiate(&request).await.unwrap();

    assert_eq!(negotiated.error.as_deref(), Some("hub unavailable"));
    assert!(negotiated.connection_id.is_empty());
}

#[tokio::test]
async fn undeserializable_body_is_a_protocol_error() {
    let router = Router::new().route("/hub/negotiate", post(|| async { "not json" }));
    let base = spawn_server(router).await;

    let request = NegotiationRequest {
        url: format!("{base}/hub"),
        access_token: None,
    };
    let result = HttpNegotiator::new().negotiate(&request).await;

    assert!(matches!(result, Err(ClientError::NegotiationProtocol(_))));
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    let request = NegotiationRequest {
        url: "http://127.0.0.1:1/hub".to_owned(),
        access_token: None,
    };
    let result = HttpNegotiator::new().negotiate(&request).await;

    assert!(matches!(result, Err(ClientError::NegotiationTransport(_))));
}
