use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use readiness_bus::{EventBus, VNC_READY};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::ControllerError;
use crate::listener::EventListener;
use crate::poller::{PollSettings, ProbeContext, ReadinessPoller};
use crate::probe::{Probe, ProbeTarget, DEFAULT_PROBE_TIMEOUT};
use crate::status::{Epoch, StatusModel, StatusReader, StatusSnapshot};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_RETRIES: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub target: ProbeTarget,
    pub probe_timeout: Duration,
    pub retry_interval: Duration,
    pub initial_delay: Duration,
    pub max_retries: u32,
    pub recheck_interval: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            target: ProbeTarget::default(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            initial_delay: Duration::ZERO,
            max_retries: DEFAULT_MAX_RETRIES,
            recheck_interval: Some(DEFAULT_RECHECK_INTERVAL),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.max_retries == 0 {
            return Err(ControllerError::InvalidConfig(
                "max_retries must be at least 1".into(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "probe_timeout must be greater than zero".into(),
            ));
        }
        if self.recheck_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(ControllerError::InvalidConfig(
                "recheck_interval must be greater than zero when set".into(),
            ));
        }
        if self.target.host().is_empty() || self.target.port() == 0 {
            return Err(ControllerError::InvalidConfig(format!(
                "probe target {} needs a host and a non-zero port",
                self.target
            )));
        }
        Ok(())
    }

    fn poll_settings(&self) -> PollSettings {
        PollSettings {
            probe_timeout: self.probe_timeout,
            retry_interval: self.retry_interval,
            initial_delay: self.initial_delay,
            recheck_interval: self.recheck_interval,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The worker was provisioned and the poller is armed.
    Started { epoch: Epoch, worker_id: String },
    /// An attempt is already provisioning, starting or running.
    AlreadyActive,
    /// The attempt was stopped while the backend call was outstanding.
    Superseded,
}

/// Drives one remote display session from provisioning to `Running` or
/// `Error`. Status is only ever written through the shared model; callers
/// observe it via [`SessionController::status`].
pub struct SessionController {
    backend: Arc<dyn Backend>,
    ctx: Arc<ProbeContext>,
    poller: ReadinessPoller,
    listener: Mutex<Option<EventListener>>,
}

impl SessionController {
    pub fn new(
        backend: Arc<dyn Backend>,
        probe: Arc<dyn Probe>,
        config: ControllerConfig,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let ctx = Arc::new(ProbeContext {
            probe,
            model: StatusModel::new(config.max_retries),
            settings: config.poll_settings(),
            target: config.target,
        });
        Ok(Self {
            backend,
            poller: ReadinessPoller::new(Arc::clone(&ctx)),
            ctx,
            listener: Mutex::new(None),
        })
    }

    /// Listens for `vnc-ready` on `bus` until [`SessionController::shutdown`].
    /// Subscribing again replaces the previous subscription.
    pub fn subscribe_events(&self, bus: &dyn EventBus) {
        let subscription = bus.subscribe(VNC_READY);
        let listener = EventListener::spawn(subscription, Arc::clone(&self.ctx));
        if self.listener.lock().replace(listener).is_some() {
            debug!(target = "readiness.controller", "replaced backend event subscription");
        }
    }

    pub fn status(&self) -> StatusReader {
        self.ctx.model.reader()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.ctx.model.snapshot()
    }

    pub fn target(&self) -> &ProbeTarget {
        &self.ctx.target
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_polling()
    }

    /// Provisions the worker and arms the poller. Calls made while an attempt
    /// is already provisioning, starting or running are no-ops. A backend
    /// failure ends the attempt in `Error` without touching the retry budget.
    pub async fn start_session(&self) -> Result<StartOutcome, ControllerError> {
        let Some(epoch) = self.ctx.model.begin_provisioning() else {
            debug!(
                target = "readiness.controller",
                "session attempt already active; ignoring start"
            );
            return Ok(StartOutcome::AlreadyActive);
        };
        let mut guard = ProvisioningGuard {
            model: &self.ctx.model,
            epoch,
            armed: true,
        };

        info!(target = "readiness.controller", %epoch, "provisioning worker");
        let result = self.backend.start_container().await;
        guard.armed = false;

        match result {
            Ok(worker_id) => {
                if !self.ctx.model.provisioning_succeeded(epoch) {
                    info!(
                        target = "readiness.controller",
                        %epoch,
                        worker_id,
                        "attempt stopped while provisioning; discarding result"
                    );
                    return Ok(StartOutcome::Superseded);
                }
                info!(
                    target = "readiness.controller",
                    %epoch,
                    worker_id,
                    endpoint = %self.ctx.target,
                    "worker provisioned; waiting for display service"
                );
                self.poller.start(epoch);
                Ok(StartOutcome::Started { epoch, worker_id })
            }
            Err(err) => {
                if !self.ctx.model.provisioning_failed(epoch, err.to_string()) {
                    debug!(
                        target = "readiness.controller",
                        %epoch,
                        error = %err,
                        "provisioning failed after attempt was stopped"
                    );
                    return Ok(StartOutcome::Superseded);
                }
                counter!("readiness_transitions_total", 1, "to" => "error", "via" => "provisioning");
                warn!(
                    target = "readiness.controller",
                    %epoch,
                    error = %err,
                    "worker provisioning failed"
                );
                Err(ControllerError::Provisioning(err))
            }
        }
    }

    /// Cancels the current attempt, if any. Results still in flight are
    /// discarded. Idempotent.
    pub fn stop(&self) {
        let was_active = self.ctx.model.stop();
        self.poller.stop();
        if was_active {
            info!(target = "readiness.controller", "session attempt stopped");
        }
    }

    /// Stops the attempt and drops the backend event subscription.
    pub fn shutdown(&self) {
        self.stop();
        if self.listener.lock().take().is_some() {
            debug!(target = "readiness.controller", "backend event subscription dropped");
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Rolls the model back if `start_session` is dropped mid-provisioning, so a
/// cancelled caller cannot wedge the session in the provisioning state.
struct ProvisioningGuard<'a> {
    model: &'a StatusModel,
    epoch: Epoch,
    armed: bool,
}

impl Drop for ProvisioningGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.model.abandon_provisioning(self.epoch) {
            debug!(
                target = "readiness.controller",
                epoch = %self.epoch,
                "start cancelled while provisioning"
            );
        }
    }
}
