//! Errors of the client entry points.

use nst_core::{ConfigError, NstError};
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Nst(#[from] NstError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<ConfigError> for ClientError {
    fn from(e: ConfigError) -> Self {
        ClientError::Nst(e.into())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
