use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid controller configuration: {0}")]
    InvalidConfig(String),
    #[error("worker provisioning failed: {0}")]
    Provisioning(#[source] BackendError),
}
