//! Error types

use sc_queue::PoolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture is already running")]
    AlreadyRunning,

    #[error("capture is not running")]
    NotRunning,

    #[error("capture session lost its producer after a backend failure")]
    Faulted,

    #[error("{backend} backend: {message}")]
    Backend { backend: String, message: String },

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl CaptureError {
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        CaptureError::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }
}
