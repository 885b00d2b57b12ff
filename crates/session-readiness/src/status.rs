use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Stopped => "stopped",
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one session attempt. Results tagged with an older epoch are
/// discarded by the status model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Epoch(u64);

impl Epoch {
    pub fn get(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Epoch(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    Provisioning(String),
    RetryBudgetExhausted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Provisioning(message) => write!(f, "provisioning failed: {message}"),
            FailureReason::RetryBudgetExhausted => f.write_str("display service never became ready"),
        }
    }
}

/// Everything the presentation layer needs to pick between the loading
/// indicator, the embedded display and the error state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub status: SessionStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub epoch: Epoch,
    /// The backend start call is still outstanding. Status stays `Stopped`
    /// during this window.
    pub provisioning: bool,
    /// Result of the latest liveness recheck while `Running`.
    pub reachable: Option<bool>,
    pub failure: Option<FailureReason>,
}

impl StatusSnapshot {
    fn initial(max_retries: u32) -> Self {
        Self {
            status: SessionStatus::Stopped,
            retry_count: 0,
            max_retries,
            epoch: Epoch::default(),
            provisioning: false,
            reachable: None,
            failure: None,
        }
    }

    /// True while an attempt is in flight and the UI should show progress.
    pub fn is_loading(&self) -> bool {
        self.provisioning || self.status == SessionStatus::Starting
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SessionStatus::Running | SessionStatus::Error)
    }

    /// `"3/30"` style progress once at least one probe has failed.
    pub fn progress(&self) -> Option<String> {
        (self.status == SessionStatus::Starting && self.retry_count > 0)
            .then(|| format!("{}/{}", self.retry_count, self.max_retries))
    }
}

/// Outcome of booking a failed poller probe against the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryBooking {
    Retry(u32),
    Exhausted,
    Stale,
}

/// Single writer for session status. Every mutation is an epoch-checked
/// closure run under the watch channel's lock, so concurrent writers are
/// serialized and results from superseded attempts fall through untouched.
#[derive(Clone)]
pub(crate) struct StatusModel {
    tx: Arc<watch::Sender<StatusSnapshot>>,
}

impl StatusModel {
    pub(crate) fn new(max_retries: u32) -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::initial(max_retries));
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn reader(&self) -> StatusReader {
        StatusReader {
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    pub(crate) fn epoch(&self) -> Epoch {
        self.tx.borrow().epoch
    }

    pub(crate) fn is_current(&self, epoch: Epoch, status: SessionStatus) -> bool {
        let current = self.tx.borrow();
        current.epoch == epoch && current.status == status
    }

    /// Opens a new attempt unless one is already provisioning, starting or
    /// running.
    pub(crate) fn begin_provisioning(&self) -> Option<Epoch> {
        let mut opened = None;
        self.tx.send_if_modified(|snapshot| {
            if snapshot.provisioning
                || matches!(
                    snapshot.status,
                    SessionStatus::Starting | SessionStatus::Running
                )
            {
                return false;
            }
            let epoch = snapshot.epoch.next();
            *snapshot = StatusSnapshot {
                epoch,
                provisioning: true,
                ..StatusSnapshot::initial(snapshot.max_retries)
            };
            opened = Some(epoch);
            true
        });
        opened
    }

    pub(crate) fn provisioning_succeeded(&self, epoch: Epoch) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.epoch != epoch || !snapshot.provisioning {
                return false;
            }
            snapshot.provisioning = false;
            snapshot.status = SessionStatus::Starting;
            true
        })
    }

    pub(crate) fn provisioning_failed(&self, epoch: Epoch, message: String) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.epoch != epoch || !snapshot.provisioning {
                return false;
            }
            snapshot.provisioning = false;
            snapshot.status = SessionStatus::Error;
            snapshot.failure = Some(FailureReason::Provisioning(message));
            true
        })
    }

    pub(crate) fn abandon_provisioning(&self, epoch: Epoch) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.epoch != epoch || !snapshot.provisioning {
                return false;
            }
            *snapshot = StatusSnapshot {
                epoch: epoch.next(),
                ..StatusSnapshot::initial(snapshot.max_retries)
            };
            true
        })
    }

    pub(crate) fn record_failed_probe(&self, epoch: Epoch) -> RetryBooking {
        let mut booking = RetryBooking::Stale;
        self.tx.send_if_modified(|snapshot| {
            if snapshot.epoch != epoch || snapshot.status != SessionStatus::Starting {
                return false;
            }
            snapshot.retry_count = snapshot
                .retry_count
                .saturating_add(1)
                .min(snapshot.max_retries);
            if snapshot.retry_count >= snapshot.max_retries {
                snapshot.status = SessionStatus::Error;
                snapshot.failure = Some(FailureReason::RetryBudgetExhausted);
                booking = RetryBooking::Exhausted;
            } else {
                booking = RetryBooking::Retry(snapshot.retry_count);
            }
            true
        });
        booking
    }

    /// First success for the epoch wins; later ones return `false`.
    pub(crate) fn mark_running(&self, epoch: Epoch) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.epoch != epoch || snapshot.status != SessionStatus::Starting {
                return false;
            }
            snapshot.status = SessionStatus::Running;
            snapshot.reachable = Some(true);
            true
        })
    }

    pub(crate) fn record_recheck(&self, epoch: Epoch, reachable: bool) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.epoch != epoch
                || snapshot.status != SessionStatus::Running
                || snapshot.reachable == Some(reachable)
            {
                return false;
            }
            snapshot.reachable = Some(reachable);
            true
        })
    }

    /// Invalidates the current attempt. Returns `false` when nothing was
    /// active or pending.
    pub(crate) fn stop(&self) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.status == SessionStatus::Stopped && !snapshot.provisioning {
                return false;
            }
            let epoch = snapshot.epoch.next();
            *snapshot = StatusSnapshot {
                epoch,
                ..StatusSnapshot::initial(snapshot.max_retries)
            };
            true
        })
    }
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct StatusReader {
    rx: watch::Receiver<StatusSnapshot>,
}

impl StatusReader {
    pub fn current(&self) -> StatusSnapshot {
        self.rx.borrow().clone()
    }

    /// Returns the latest snapshot and marks it as seen.
    pub fn snapshot(&mut self) -> StatusSnapshot {
        self.rx.borrow_and_update().clone()
    }

    /// Waits until the snapshot changes. Returns `false` once the controller
    /// has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Waits until `predicate` holds, returning the matching snapshot, or
    /// `None` if the controller is dropped first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<StatusSnapshot>
    where
        F: FnMut(&StatusSnapshot) -> bool,
    {
        loop {
            let snapshot = self.snapshot();
            if predicate(&snapshot) {
                return Some(snapshot);
            }
            if !self.changed().await {
                return None;
            }
        }
    }
}
