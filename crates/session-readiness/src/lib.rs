//! Readiness control for an embedded remote desktop session.
//!
//! [`SessionController`] asks the [`Backend`] to start the worker once, then
//! probes the worker's display endpoint on a fixed schedule until it answers
//! or the retry budget runs out. Backend `vnc-ready` events short-circuit the
//! wait with an immediate probe. The presentation layer only reads
//! [`StatusSnapshot`]s through a [`StatusReader`].

pub mod backend;
pub mod controller;
pub mod error;
mod listener;
pub mod poller;
pub mod probe;
pub mod status;

pub use backend::{Backend, BackendError};
pub use controller::{
    ControllerConfig, SessionController, StartOutcome, DEFAULT_MAX_RETRIES,
    DEFAULT_RECHECK_INTERVAL, DEFAULT_RETRY_INTERVAL,
};
pub use error::ControllerError;
pub use poller::PollSettings;
pub use probe::{
    probe, HttpReachabilityProbe, Probe, ProbeError, ProbeStrategy, ProbeTarget,
    TcpHandshakeProbe, WebSocketProbe, DEFAULT_PROBE_TIMEOUT,
};
pub use status::{Epoch, FailureReason, SessionStatus, StatusReader, StatusSnapshot};
