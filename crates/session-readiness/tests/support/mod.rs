#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use session_readiness::{
    Backend, BackendError, ControllerConfig, Probe, ProbeError, ProbeTarget, SessionController,
    SessionStatus, StatusSnapshot,
};
use tokio::task::JoinHandle;

pub const PROBE_LATENCY: Duration = Duration::from_millis(10);

/// Probe whose answers are scripted up front. Once the script runs out it
/// keeps returning `fallback`.
pub struct ScriptedProbe {
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: false,
            latency: PROBE_LATENCY,
            calls: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn always(ready: bool) -> Self {
        Self::new([]).fallback(ready)
    }

    pub fn fallback(mut self, ready: bool) -> Self {
        self.fallback = ready;
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, ready: bool) {
        self.script.lock().unwrap().push_back(ready);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn check(&self, _target: &ProbeTarget) -> Result<(), ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));

        let ready = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        tokio::time::sleep(self.latency).await;
        if ready {
            Ok(())
        } else {
            Err(ProbeError::Connect(io::Error::from(io::ErrorKind::ConnectionRefused)))
        }
    }
}

pub struct ScriptedBackend {
    failure: Option<String>,
    delay: Duration,
    starts: AtomicUsize,
}

impl ScriptedBackend {
    pub fn ok() -> Self {
        Self {
            failure: None,
            delay: PROBE_LATENCY,
            starts: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::ok()
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn start_container(&self) -> Result<String, BackendError> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        match &self.failure {
            Some(message) => Err(BackendError::Rejected(message.clone())),
            None => Ok(format!("worker-{n}")),
        }
    }

    async fn stop_container(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn restart_container(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn container_logs(&self) -> Result<String, BackendError> {
        Ok(String::new())
    }
}

/// Test defaults: observed constants, no liveness recheck.
pub fn config() -> ControllerConfig {
    ControllerConfig {
        target: ProbeTarget::new("127.0.0.1", 5800),
        recheck_interval: None,
        ..ControllerConfig::default()
    }
}

pub fn controller(
    backend: &Arc<ScriptedBackend>,
    probe: &Arc<ScriptedProbe>,
    config: ControllerConfig,
) -> SessionController {
    SessionController::new(backend.clone(), probe.clone(), config).expect("controller")
}

pub type Trail = Arc<Mutex<Vec<StatusSnapshot>>>;

/// Records every snapshot the controller publishes.
pub fn record(controller: &SessionController) -> (Trail, JoinHandle<()>) {
    let mut reader = controller.status();
    let trail: Trail = Arc::new(Mutex::new(vec![reader.snapshot()]));
    let sink = Arc::clone(&trail);
    let handle = tokio::spawn(async move {
        while reader.changed().await {
            sink.lock().unwrap().push(reader.snapshot());
        }
    });
    (trail, handle)
}

/// `(status, retry_count)` pairs outside of the provisioning window, with
/// repeats collapsed.
pub fn status_trail(trail: &Trail) -> Vec<(SessionStatus, u32)> {
    let mut out: Vec<(SessionStatus, u32)> = Vec::new();
    for snapshot in trail.lock().unwrap().iter() {
        if snapshot.provisioning {
            continue;
        }
        let entry = (snapshot.status, snapshot.retry_count);
        if out.last() != Some(&entry) {
            out.push(entry);
        }
    }
    out
}

/// Lets woken tasks (recorders, aborted listeners) run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn wait_terminal(controller: &SessionController) -> StatusSnapshot {
    controller
        .status()
        .wait_for(|snapshot| snapshot.is_terminal())
        .await
        .expect("controller alive")
}
