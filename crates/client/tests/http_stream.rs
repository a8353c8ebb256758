//! End-to-end tests against an in-process event stream server.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use url::Url;

use casefeed_client::{
    ConnectionState, EventSourcePort, FeedConfig, HttpEventSource, RealtimeFeed, RetryConfig,
    SessionCredential, Topic, TransportError,
};

#[derive(Clone, Default)]
struct ServerState {
    tokens: Arc<Mutex<Vec<String>>>,
    refusals_left: Arc<AtomicU32>,
}

#[derive(serde::Deserialize)]
struct StreamQuery {
    token: Option<String>,
}

async fn stream_handler(
    State(state): State<ServerState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    if let Some(token) = query.token {
        state.tokens.lock().expect("tokens lock").push(token);
    }

    let refuse = state
        .refusals_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if refuse {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let frames = vec![
        SseEvent::default().event("connected").data(""),
        SseEvent::default().event("heartbeat").data(""),
        SseEvent::default().event("foo.bar").data("{}"),
        SseEvent::default()
            .event("document.uploaded")
            .data(r#"{"document_id":"d-42","matter_id":"m-7"}"#),
    ];
    let events = stream::iter(frames.into_iter().map(Ok::<_, Infallible>)).chain(stream::pending());
    Sse::new(events).into_response()
}

async fn spawn_server(state: ServerState) -> SocketAddr {
    let app = Router::new()
        .route("/api/events/stream", get(stream_handler))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn config_for(addr: SocketAddr) -> FeedConfig {
    let endpoint = Url::parse(&format!("http://{addr}/api/events/stream")).expect("endpoint");
    FeedConfig::new(endpoint).with_retry(RetryConfig {
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
    })
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}

#[tokio::test]
async fn test_stream_delivers_events_to_subscribers() {
    let state = ServerState::default();
    let addr = spawn_server(state.clone()).await;

    let feed = RealtimeFeed::new(config_for(addr), Arc::new(SessionCredential::new("s3cret")));
    let received = Arc::new(Mutex::new(Vec::<Value>::new()));
    let received_clone = Arc::clone(&received);
    let _sub = feed.on(Topic::DocumentUploaded, move |payload| {
        received_clone
            .lock()
            .expect("received lock")
            .push(payload.clone());
        Ok(())
    });

    feed.connect();

    assert!(wait_for(|| !received.lock().expect("received lock").is_empty()).await);
    assert!(feed.is_connected());
    assert_eq!(
        received.lock().expect("received lock")[0]["document_id"],
        "d-42"
    );
    assert_eq!(
        *state.tokens.lock().expect("tokens lock"),
        vec!["s3cret".to_string()]
    );

    feed.dispose();
    assert_eq!(feed.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_refused_streams_are_retried_until_accepted() {
    let state = ServerState::default();
    state.refusals_left.store(2, Ordering::SeqCst);
    let addr = spawn_server(state.clone()).await;

    let feed = RealtimeFeed::new(config_for(addr), Arc::new(SessionCredential::new("abc")));
    feed.connect();

    assert!(wait_for(|| feed.last_event().is_some()).await);
    assert!(feed.is_connected());
    assert_eq!(state.tokens.lock().expect("tokens lock").len(), 3);
    assert_eq!(
        feed.last_event().map(|event| event.topic),
        Some(Topic::DocumentUploaded)
    );

    feed.disconnect();
    assert!(!feed.is_connected());
}

/// Accepts connections and never writes a byte.
async fn spawn_silent_server() -> (SocketAddr, Arc<AtomicU32>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind silent listener");
    let addr = listener.local_addr().expect("local addr");
    let accepts = Arc::new(AtomicU32::new(0));
    let accepts_clone = Arc::clone(&accepts);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            accepts_clone.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });
    (addr, accepts)
}

#[tokio::test]
async fn test_open_gives_up_when_headers_never_arrive() {
    let (addr, _accepts) = spawn_silent_server().await;
    let url = Url::parse(&format!("http://{addr}/api/events/stream")).expect("url");
    let source = HttpEventSource::with_timeout(Duration::from_millis(100));

    let result = source.open(&url).await;

    assert!(matches!(result, Err(TransportError::Timeout(_))));
}

#[tokio::test]
async fn test_silent_server_is_retried_with_backoff() {
    let (addr, accepts) = spawn_silent_server().await;
    let mut config = config_for(addr);
    config.handshake_timeout = Duration::from_millis(150);

    let feed = RealtimeFeed::new(config, Arc::new(SessionCredential::new("abc")));
    feed.connect();

    assert!(wait_for(|| accepts.load(Ordering::SeqCst) >= 3).await);
    assert!(!feed.is_connected());

    feed.dispose();
    assert_eq!(feed.state(), ConnectionState::Idle);
}
