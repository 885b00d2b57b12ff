use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use session_readiness::{
    probe, HttpReachabilityProbe, Probe, ProbeStrategy, ProbeTarget, TcpHandshakeProbe,
    WebSocketProbe,
};
use tokio::net::TcpListener;

const SHORT: Duration = Duration::from_millis(300);

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("local addr")
}

fn target(addr: SocketAddr) -> ProbeTarget {
    ProbeTarget::new(addr.ip().to_string(), addr.port())
}

async fn websocket_route(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket| async move { while let Some(Ok(_)) = socket.recv().await {} })
}

#[test_timeout::tokio_timeout_test]
async fn tcp_probe_sees_a_listening_port() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    assert!(probe(&TcpHandshakeProbe, &target(addr), SHORT).await);

    drop(listener);
    assert!(!probe(&TcpHandshakeProbe, &target(addr), SHORT).await);
}

#[test_timeout::tokio_timeout_test]
async fn http_probe_accepts_error_statuses() {
    let router = Router::new().route(
        "/",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "display starting") }),
    );
    let addr = serve(router).await;
    assert!(probe(&HttpReachabilityProbe::new(), &target(addr), SHORT).await);

    let closed = closed_port().await;
    assert!(!probe(&HttpReachabilityProbe::new(), &target(closed), SHORT).await);
}

#[test_timeout::tokio_timeout_test]
async fn websocket_probe_requires_the_upgrade() {
    let router = Router::new()
        .route("/websockify", get(websocket_route))
        .route("/", get(|| async { "plain page" }));
    let addr = serve(router).await;

    let upgrade = target(addr).with_path("/websockify");
    assert!(probe(&WebSocketProbe, &upgrade, SHORT).await);
    assert!(!probe(&WebSocketProbe, &target(addr), SHORT).await);
}

#[test_timeout::tokio_timeout_test]
async fn silent_listener_passes_tcp_but_not_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    assert!(probe(&TcpHandshakeProbe, &target(addr), SHORT).await);
    let started = tokio::time::Instant::now();
    assert!(!probe(&WebSocketProbe, &target(addr), SHORT).await);
    assert!(started.elapsed() >= SHORT);
    drop(listener);
}

#[test_timeout::tokio_timeout_test]
async fn strategies_build_matching_probes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let tcp = ProbeStrategy::Tcp.build();
    assert_eq!(tcp.name(), "tcp");
    assert!(probe(tcp.as_ref(), &target(addr), SHORT).await);
    assert_eq!(ProbeStrategy::WebSocket.build().name(), "websocket");
    assert_eq!(ProbeStrategy::Http.build().name(), "http");
}
