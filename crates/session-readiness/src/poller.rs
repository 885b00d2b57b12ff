use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::probe::{probe, Probe, ProbeTarget};
use crate::status::{Epoch, RetryBooking, SessionStatus, StatusModel, StatusReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub probe_timeout: Duration,
    pub retry_interval: Duration,
    /// Delay between arming the poller and its first probe.
    pub initial_delay: Duration,
    /// Liveness cadence once running; `None` ends polling at `Running`.
    pub recheck_interval: Option<Duration>,
}

/// What both the poller and the event listener need to run a probe and
/// report its result.
pub(crate) struct ProbeContext {
    pub(crate) probe: Arc<dyn Probe>,
    pub(crate) target: ProbeTarget,
    pub(crate) model: StatusModel,
    pub(crate) settings: PollSettings,
}

impl ProbeContext {
    pub(crate) async fn check_once(&self) -> bool {
        probe(self.probe.as_ref(), &self.target, self.settings.probe_timeout).await
    }

    /// Sleeps for `duration` unless the attempt leaves `status` first.
    /// Returns whether the attempt is still in `status` afterwards.
    async fn hold(
        &self,
        reader: &mut StatusReader,
        epoch: Epoch,
        status: SessionStatus,
        duration: Duration,
    ) -> bool {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            let snapshot = reader.snapshot();
            if snapshot.epoch != epoch || snapshot.status != status {
                return false;
            }
            tokio::select! {
                _ = &mut sleep => return self.model.is_current(epoch, status),
                changed = reader.changed() => {
                    if !changed {
                        return false;
                    }
                }
            }
        }
    }

    async fn run(self: Arc<Self>, epoch: Epoch) {
        let mut reader = self.model.reader();
        let max_retries = self.model.snapshot().max_retries;

        let mut probing = self
            .hold(
                &mut reader,
                epoch,
                SessionStatus::Starting,
                self.settings.initial_delay,
            )
            .await;
        while probing {
            let attempt = self.model.snapshot().retry_count + 1;
            debug!(
                target = "readiness.poller",
                %epoch,
                attempt,
                max_retries,
                endpoint = %self.target,
                "checking display service"
            );

            if self.check_once().await {
                if self.model.mark_running(epoch) {
                    counter!("readiness_transitions_total", 1, "to" => "running", "via" => "poller");
                    info!(
                        target = "readiness.poller",
                        %epoch,
                        attempt,
                        "display service is ready"
                    );
                }
                break;
            }

            match self.model.record_failed_probe(epoch) {
                RetryBooking::Retry(retry_count) => {
                    debug!(
                        target = "readiness.poller",
                        %epoch,
                        retry_count,
                        max_retries,
                        retry_in_ms = self.settings.retry_interval.as_millis() as u64,
                        "display service not ready yet"
                    );
                    probing = self
                        .hold(
                            &mut reader,
                            epoch,
                            SessionStatus::Starting,
                            self.settings.retry_interval,
                        )
                        .await;
                }
                RetryBooking::Exhausted => {
                    counter!("readiness_transitions_total", 1, "to" => "error", "via" => "retry_budget");
                    warn!(
                        target = "readiness.poller",
                        %epoch,
                        max_retries,
                        "display service never became ready; giving up"
                    );
                    return;
                }
                RetryBooking::Stale => break,
            }
        }

        if !self.model.is_current(epoch, SessionStatus::Running) {
            debug!(target = "readiness.poller", %epoch, "attempt superseded; poller exiting");
            return;
        }
        if let Some(interval) = self.settings.recheck_interval {
            self.monitor(&mut reader, epoch, interval).await;
        }
    }

    /// Keeps probing a running session at a slower cadence. Failures only
    /// flip the `reachable` flag; the session stays `Running`.
    async fn monitor(&self, reader: &mut StatusReader, epoch: Epoch, interval: Duration) {
        while self
            .hold(reader, epoch, SessionStatus::Running, interval)
            .await
        {
            let reachable = self.check_once().await;
            if self.model.record_recheck(epoch, reachable) {
                if reachable {
                    info!(target = "readiness.poller", %epoch, "display service reachable again");
                } else {
                    warn!(
                        target = "readiness.poller",
                        %epoch,
                        endpoint = %self.target,
                        "display service stopped answering"
                    );
                }
            }
        }
    }
}

struct ActivePoll {
    epoch: Epoch,
    handle: JoinHandle<()>,
}

/// Owns the single scheduled polling task for the session.
pub(crate) struct ReadinessPoller {
    ctx: Arc<ProbeContext>,
    active: Mutex<Option<ActivePoll>>,
}

impl ReadinessPoller {
    pub(crate) fn new(ctx: Arc<ProbeContext>) -> Self {
        Self {
            ctx,
            active: Mutex::new(None),
        }
    }

    /// Arms polling for `epoch`. A live loop for the same epoch is left alone;
    /// a loop left over from an older epoch is cancelled first.
    pub(crate) fn start(&self, epoch: Epoch) -> bool {
        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            if current.epoch == epoch && !current.handle.is_finished() {
                return false;
            }
        }
        if let Some(previous) = active.take() {
            previous.handle.abort();
        }

        let ctx = Arc::clone(&self.ctx);
        let handle = tokio::spawn(ctx.run(epoch));
        *active = Some(ActivePoll { epoch, handle });
        true
    }

    /// Cancels the loop if it belongs to an attempt the model has already
    /// moved past. Called after the model is invalidated; a loop armed for a
    /// newer attempt in between is left running.
    pub(crate) fn stop(&self) {
        let mut active = self.active.lock();
        let current = self.ctx.model.epoch();
        if active.as_ref().is_some_and(|poll| poll.epoch < current) {
            if let Some(poll) = active.take() {
                poll.handle.abort();
                debug!(target = "readiness.poller", epoch = %poll.epoch, "poller cancelled");
            }
        }
    }

    pub(crate) fn is_polling(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .map(|active| !active.handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for ReadinessPoller {
    fn drop(&mut self) {
        if let Some(poll) = self.active.get_mut().take() {
            poll.handle.abort();
        }
    }
}
