use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend rejected request: {0}")]
    Rejected(String),
    #[error("backend io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} is not configured for this backend")]
    Unsupported(&'static str),
}

/// Commands the desktop shell can issue against the worker host. The
/// controller only depends on the outcome of [`Backend::start_container`];
/// the rest back the shell's own stop/restart/logs actions.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Starts (or reuses) the worker and returns its identifier.
    async fn start_container(&self) -> Result<String, BackendError>;

    async fn stop_container(&self) -> Result<(), BackendError>;

    async fn restart_container(&self) -> Result<(), BackendError>;

    async fn container_logs(&self) -> Result<String, BackendError>;
}
