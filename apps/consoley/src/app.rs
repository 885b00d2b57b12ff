use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use readiness_bus::LocalEventBus;
use serde_json::{json, Value};
use session_readiness::{
    probe, Backend, Epoch, SessionController, SessionStatus, StatusSnapshot,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::config::{AppConfig, DisplayConfig};
use crate::ingress::{self, IngressState};
use crate::render;
use crate::telemetry;

/// The `run` subcommand: provision, wait, and keep reporting until told to
/// stop.
pub async fn run(config: &AppConfig, backend: Arc<dyn Backend>, args: &RunArgs) -> Result<()> {
    let bus = Arc::new(LocalEventBus::new());
    let controller = Arc::new(
        SessionController::new(
            Arc::clone(&backend),
            config.strategy.build(),
            config.controller.clone(),
        )
        .context("failed to build session controller")?,
    );
    controller.subscribe_events(bus.as_ref());

    let mut ingress_task = None;
    if let Some(addr) = config.listen {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind event ingress on {addr}"))?;
        let state = IngressState {
            bus: bus.clone(),
            status: controller.status(),
            metrics: Some(telemetry::metrics::install()?),
        };
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(ingress::serve(listener, state, async move {
            let _ = stop_rx.await;
        }));
        ingress_task = Some((stop_tx, handle));
    }

    let interrupted = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "consoley.app", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let outcome = watch_session(&controller, &config.display, args.exit_when_ready, interrupted).await;

    controller.shutdown();
    if let Some((stop_tx, handle)) = ingress_task {
        let _ = stop_tx.send(());
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(target = "consoley.app", error = %err, "event ingress failed"),
            Err(err) => warn!(target = "consoley.app", error = %err, "event ingress task panicked"),
        }
    }
    if args.stop_on_exit {
        match backend.stop_container().await {
            Ok(()) => println!("worker stopped"),
            Err(err) => warn!(target = "consoley.app", error = %err, "failed to stop worker on exit"),
        }
    }

    outcome.map(|_| ())
}

/// Starts one attempt and prints each distinct status line. Returns the last
/// snapshot once the attempt is ready (with `exit_when_ready`), is cancelled,
/// or `shutdown` resolves; an `Error` outcome becomes an error.
pub async fn watch_session<S>(
    controller: &Arc<SessionController>,
    display: &DisplayConfig,
    exit_when_ready: bool,
    shutdown: S,
) -> Result<StatusSnapshot>
where
    S: Future<Output = ()>,
{
    let mut status = controller.status();
    let starter = {
        let controller = Arc::clone(controller);
        tokio::spawn(async move { controller.start_session().await })
    };
    tokio::pin!(shutdown);

    let mut last_line: Option<String> = None;
    let mut announced = false;
    let outcome = loop {
        let snapshot = status.snapshot();
        let idle = snapshot.status == SessionStatus::Stopped && !snapshot.provisioning;
        let untouched = idle && snapshot.epoch == Epoch::default();
        if !untouched {
            let line = render::status_line(&snapshot);
            if last_line.as_deref() != Some(line.as_str()) {
                println!("{line}");
                last_line = Some(line);
            }
        }

        match snapshot.status {
            SessionStatus::Running => {
                if !announced {
                    println!("display: {}", render::display_url(display, render::now_millis()));
                    announced = true;
                }
                if exit_when_ready {
                    break Ok(snapshot);
                }
            }
            SessionStatus::Error => {
                let reason = snapshot
                    .failure
                    .map(|failure| failure.to_string())
                    .unwrap_or_else(|| "session failed".to_string());
                break Err(anyhow::anyhow!(reason));
            }
            SessionStatus::Stopped if idle && !untouched => {
                info!(target = "consoley.app", epoch = %snapshot.epoch, "attempt cancelled");
                break Ok(snapshot);
            }
            _ => {}
        }

        let changed = tokio::select! {
            changed = status.changed() => changed,
            _ = &mut shutdown => {
                info!(target = "consoley.app", "interrupted; shutting down");
                false
            }
        };
        if !changed {
            break Ok(status.current());
        }
    };

    starter.abort();
    outcome
}

/// Probes the configured endpoint once.
pub async fn probe_once(config: &AppConfig) -> bool {
    let strategy = config.strategy.build();
    probe(
        strategy.as_ref(),
        &config.controller.target,
        config.controller.probe_timeout,
    )
    .await
}

/// Name, version and current display status, as printed by `info`.
pub async fn info(config: &AppConfig) -> Value {
    let ready = probe_once(config).await;
    let status = if ready {
        SessionStatus::Running
    } else {
        SessionStatus::Stopped
    };
    json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": status,
        "probe": {
            "target": config.controller.target.to_string(),
            "strategy": config.strategy,
        },
        "display_url": ready.then(|| render::display_url(&config.display, render::now_millis())),
    })
}

/// Turns a probe result into the `probe` subcommand's exit status.
pub fn ensure_ready(ready: bool, config: &AppConfig) -> Result<()> {
    if ready {
        println!("{} is ready", config.controller.target);
        Ok(())
    } else {
        bail!("{} is not reachable", config.controller.target)
    }
}
