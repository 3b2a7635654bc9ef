use std::thread;
use std::time::Duration;

use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use zeroize::Zeroizing;

use crate::camera::{CameraDevice, Frame, FrameStream};
use crate::config::EnrollConfig;
use crate::credential::CredentialHashes;
use crate::embedding::{EmbeddingProvider, QualityGate};
use crate::error::{EnrollError, StorageError};
use crate::storage::CredentialStore;

/// Shortest password accepted, whatever the configuration asks for.
pub const MIN_PASSWORD_LEN: usize = 8;

static USERNAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").unwrap());

pub struct EnrollmentRequest {
    pub username: String,
    pub password: Zeroizing<String>,
}

impl EnrollmentRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentReceipt {
    pub username: String,
    pub embedding_dimension: usize,
}

#[derive(Debug, Clone)]
pub struct EnrollSettings {
    pub settle_delay: Duration,
    pub min_password_len: usize,
}

impl Default for EnrollSettings {
    fn default() -> Self {
        Self::from(&EnrollConfig::default())
    }
}

impl From<&EnrollConfig> for EnrollSettings {
    fn from(cfg: &EnrollConfig) -> Self {
        Self {
            settle_delay: cfg.settle_delay(),
            min_password_len: cfg.min_password_len,
        }
    }
}

/// Registers a new user: validate, check uniqueness, capture, gate, embed,
/// persist. Stops at the first failing stage.
pub struct EnrollmentPipeline<S, C, Q, P> {
    store: S,
    camera: C,
    gate: Q,
    provider: P,
    settings: EnrollSettings,
}

impl<S, C, Q, P> EnrollmentPipeline<S, C, Q, P>
where
    S: CredentialStore,
    C: CameraDevice,
    Q: QualityGate,
    P: EmbeddingProvider,
{
    pub fn new(store: S, camera: C, gate: Q, provider: P, settings: EnrollSettings) -> Self {
        Self {
            store,
            camera,
            gate,
            provider,
            settings,
        }
    }

    pub fn enroll(
        &mut self,
        request: &EnrollmentRequest,
    ) -> Result<EnrollmentReceipt, EnrollError> {
        let username = request.username.as_str();

        validate_request(request, self.settings.min_password_len)?;

        match self.store.username_exists(username) {
            Ok(false) => {}
            Ok(true) => {
                info!("rejecting enrollment of existing user {}", username);
                return Err(EnrollError::DuplicateUser {
                    username: username.to_string(),
                });
            }
            Err(e) => {
                // unknown counts as taken
                warn!("could not check whether {} exists: {}", username, e);
                return Err(EnrollError::StorageFailed(e));
            }
        }

        let frame = self.capture().map_err(EnrollError::CaptureFailed)?;

        if !self.gate.is_usable(&frame) {
            info!("enrollment frame for {} failed the quality gate", username);
            return Err(EnrollError::LowQuality);
        }

        let samples = match self.provider.detect_and_embed(&frame) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("embedding provider failed during enrollment: {:#}", e);
                return Err(EnrollError::NoFaceDetected);
            }
        };
        let Some(sample) = samples.into_iter().next() else {
            return Err(EnrollError::NoFaceDetected);
        };
        let embedding_dimension = sample.embedding.dimension();

        let hashes = CredentialHashes::derive(&request.password, &sample.embedding)
            .map_err(EnrollError::StorageFailed)?;
        drop(sample);

        match self
            .store
            .add_user(username, &hashes.password_hash, &hashes.embedding_hash)
        {
            Ok(()) => {}
            Err(StorageError::Duplicate { username }) => {
                return Err(EnrollError::DuplicateUser { username });
            }
            Err(e) => {
                warn!("storing credential for {} failed: {}", username, e);
                return Err(EnrollError::StorageFailed(e));
            }
        }

        info!("enrolled user {}", username);
        Ok(EnrollmentReceipt {
            username: username.to_string(),
            embedding_dimension,
        })
    }

    /// Opens the camera, lets it settle and grabs one frame. The device is
    /// released before returning.
    fn capture(&mut self) -> Result<Frame, crate::error::CaptureError> {
        info!("opening camera {}", self.camera.name());
        let mut stream = self.camera.open()?;
        if !self.settings.settle_delay.is_zero() {
            thread::sleep(self.settings.settle_delay);
        }
        stream.next_frame()
    }
}

/// Input checks run before any collaborator is touched.
pub fn validate_request(
    request: &EnrollmentRequest,
    min_password_len: usize,
) -> Result<(), EnrollError> {
    validate_username(&request.username)?;
    validate_password(&request.password, min_password_len)
}

pub fn validate_username(username: &str) -> Result<(), EnrollError> {
    if username.is_empty() {
        return Err(EnrollError::InvalidInput {
            field: "username",
            message: "username cannot be empty".into(),
        });
    }
    if !USERNAME_PATTERN.is_match(username) {
        return Err(EnrollError::InvalidInput {
            field: "username",
            message: "use letters, digits or '_' only".into(),
        });
    }
    Ok(())
}

pub fn validate_password(password: &str, min_len: usize) -> Result<(), EnrollError> {
    let min_len = min_len.max(MIN_PASSWORD_LEN);
    if password.chars().count() < min_len {
        return Err(EnrollError::InvalidInput {
            field: "password",
            message: format!("must be at least {min_len} characters"),
        });
    }
    Ok(())
}
