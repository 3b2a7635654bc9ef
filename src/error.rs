use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Camera failures, recoverable by retrying the capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open camera {device}: {message}")]
    DeviceOpen { device: String, message: String },

    #[error("failed to read frame: {0}")]
    FrameRead(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("user {username} is already enrolled")]
    Duplicate { username: String },

    #[error("credential database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to prepare credential store at {path}: {source}")]
    Prepare {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to derive credential hash: {0}")]
    Hashing(String),
}

/// Notification delivery failures. None of these affect a match decision.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to bind notification endpoint {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("no consumer connected to {addr} within {timeout:?}")]
    Timeout { addr: SocketAddr, timeout: Duration },

    #[error("notification I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Rejection reasons of the enrollment pipeline, one per stage.
#[derive(Debug, Error)]
pub enum EnrollError {
    #[error("invalid {field}: {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    #[error("user {username} is already enrolled")]
    DuplicateUser { username: String },

    #[error("capture failed: {0}")]
    CaptureFailed(#[source] CaptureError),

    #[error("captured frame is not usable for enrollment")]
    LowQuality,

    #[error("no face detected in captured frame")]
    NoFaceDetected,

    #[error("failed to store credential: {0}")]
    StorageFailed(#[source] StorageError),
}

impl EnrollError {
    /// Message shown to the person enrolling. Carries no internal detail.
    pub fn human_message(&self) -> String {
        match self {
            EnrollError::InvalidInput { field, message } => {
                format!("Invalid {field}: {message}.")
            }
            EnrollError::DuplicateUser { username } => {
                format!("Username '{username}' is already taken.")
            }
            EnrollError::CaptureFailed(_) => {
                "Could not capture an image. Check that the camera is connected and try again."
                    .to_string()
            }
            EnrollError::LowQuality => {
                concat!(
                    "The captured image is not good enough. ",
                    "Face the camera in good light and try again."
                )
                .to_string()
            }
            EnrollError::NoFaceDetected => {
                "No face was detected. Face the camera and try again.".to_string()
            }
            EnrollError::StorageFailed(_) => {
                "Enrollment could not be saved. Please try again later.".to_string()
            }
        }
    }
}
