//! Error types for the capture relay

use std::path::PathBuf;

use thiserror::Error;

use crate::types::PixelFormat;

/// Main error type for capture session operations
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The session was closed; every public operation fails afterwards
    #[error("Object closed")]
    ObjectClosed,

    /// A device-level call (copy, resize, present, recreate) failed
    #[error("Device operation `{operation}` failed: {source}")]
    Device {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Mapped surface data does not match its reported layout
    #[error("Invalid surface layout: {0}")]
    InvalidSurface(String),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Error type for the persistence sidecar. Never surfaces past the sidecar.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// File creation or write failed
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Still-image encoding failed
    #[error("Snapshot encoding failed: {0}")]
    Encoding(String),

    /// The sink cannot store this pixel format
    #[error("Unsupported pixel format for snapshots: {0}")]
    UnsupportedFormat(PixelFormat),

    /// Reading the surface back from the device failed
    #[error("Staging failed: {0}")]
    Staging(String),
}

/// Combined result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Combined result type for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

impl CaptureError {
    /// Wrap a failing device call
    pub fn device(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        CaptureError::Device {
            operation,
            source: source.into(),
        }
    }

    /// Check if the caller can recover from the error without restarting capture
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::ObjectClosed)
    }

    /// Device errors are fatal to the current delivery
    pub fn is_device_error(&self) -> bool {
        matches!(self, CaptureError::Device { .. })
    }
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<CaptureError> for PersistenceError {
    fn from(err: CaptureError) -> Self {
        PersistenceError::Staging(err.to_string())
    }
}
