#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use consoley::app;
use consoley::backend::{CommandBackend, CommandSet};
use consoley::cli::SessionArgs;
use consoley::config::{AppConfig, FileConfig};
use consoley::ingress::{self, IngressState};
use readiness_bus::{EventBus, LocalEventBus};
use session_readiness::{SessionController, SessionStatus};
use tokio::net::TcpListener;
use tower::util::ServiceExt;

fn commands(start: &str) -> CommandSet {
    CommandSet {
        start: start.to_string(),
        stop: "true".to_string(),
        restart: "true".to_string(),
        logs: "echo quiet".to_string(),
    }
}

fn config_for(port: u16, start: &str) -> AppConfig {
    let args = SessionArgs {
        probe_host: Some("127.0.0.1".into()),
        probe_port: Some(port),
        probe_timeout_ms: Some(200),
        retry_interval_ms: Some(50),
        max_retries: Some(3),
        recheck_interval_ms: Some(0),
        ..SessionArgs::default()
    };
    let mut config = AppConfig::resolve(FileConfig::default(), &args).expect("config");
    config.commands = commands(start);
    config
}

fn controller(config: &AppConfig) -> Arc<SessionController> {
    let backend = Arc::new(CommandBackend::new(config.commands.clone()));
    Arc::new(
        SessionController::new(backend, config.strategy.build(), config.controller.clone())
            .expect("controller"),
    )
}

#[test_timeout::tokio_timeout_test]
async fn command_backed_session_reaches_running() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let config = config_for(port, "echo worker-1");
    let controller = controller(&config);

    let snapshot = app::watch_session(
        &controller,
        &config.display,
        true,
        std::future::pending::<()>(),
    )
    .await
    .expect("session ready");
    assert_eq!(snapshot.status, SessionStatus::Running);
    assert_eq!(snapshot.retry_count, 0);
    assert!(app::probe_once(&config).await);
}

#[test_timeout::tokio_timeout_test]
async fn failing_start_command_ends_in_error() {
    let config = config_for(1, "echo 'image missing' >&2; exit 1");
    let controller = controller(&config);

    let err = app::watch_session(
        &controller,
        &config.display,
        true,
        std::future::pending::<()>(),
    )
    .await
    .expect_err("provisioning fails");
    assert!(err.to_string().contains("image missing"), "{err}");
    assert_eq!(controller.snapshot().status, SessionStatus::Error);
    assert_eq!(controller.snapshot().retry_count, 0);
}

#[test_timeout::tokio_timeout_test]
async fn unreachable_display_exhausts_the_budget() {
    let closed = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = closed.local_addr().expect("addr").port();
    drop(closed);
    let config = config_for(port, "echo worker-2");
    let controller = controller(&config);

    let err = app::watch_session(
        &controller,
        &config.display,
        true,
        std::future::pending::<()>(),
    )
    .await
    .expect_err("never ready");
    assert!(err.to_string().contains("never became ready"), "{err}");
    assert_eq!(controller.snapshot().retry_count, 3);
    assert!(!app::probe_once(&config).await);
}

#[test_timeout::tokio_timeout_test]
async fn shutdown_future_interrupts_the_wait() {
    let closed = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = closed.local_addr().expect("addr").port();
    drop(closed);
    let mut config = config_for(port, "echo worker-3");
    config.controller.max_retries = 1_000;
    let controller = controller(&config);

    let snapshot = app::watch_session(
        &controller,
        &config.display,
        true,
        tokio::time::sleep(Duration::from_millis(300)),
    )
    .await
    .expect("interrupted cleanly");
    assert_ne!(snapshot.status, SessionStatus::Running);
    controller.stop();
    assert!(!controller.is_polling());
}

#[test_timeout::tokio_timeout_test]
async fn ingress_event_short_circuits_the_poller() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let mut config = config_for(port, "echo worker-4");
    config.controller.initial_delay = Duration::from_secs(30);
    let controller = controller(&config);

    let bus = Arc::new(LocalEventBus::new());
    controller.subscribe_events(bus.as_ref());
    let app = ingress::router(IngressState {
        bus: bus.clone(),
        status: controller.status(),
        metrics: None,
    });

    let mut status = controller.status();
    let start = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.start_session().await })
    };
    status
        .wait_for(|snapshot| snapshot.status == SessionStatus::Starting)
        .await
        .expect("starting");

    let response = app
        .oneshot(
            Request::post("/events/vnc-ready")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let ready = tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|snapshot| snapshot.status == SessionStatus::Running),
    )
    .await
    .expect("event path well ahead of the 30s poller")
    .expect("running");
    assert_eq!(ready.retry_count, 0);
    start.await.expect("join").expect("started");

    controller.shutdown();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(bus.publish("vnc-ready").is_err());
}
