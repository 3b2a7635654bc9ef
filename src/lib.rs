pub mod camera;
pub mod config;
pub mod credential;
pub mod embedding;
pub mod enroll;
pub mod error;
pub mod matcher;
pub mod notify;
pub mod scheduler;
pub mod storage;

// Concrete camera and model adapters
#[cfg(feature = "vision")]
pub mod vision;

pub use camera::{CameraDevice, Frame, FrameStream};
pub use embedding::{Embedding, EmbeddingProvider, FaceRegion, FaceSample, QualityGate};
pub use enroll::{EnrollmentPipeline, EnrollmentRequest};
pub use matcher::{MatchEngine, MatchReason, MatchResult};
pub use notify::{Notifier, OneShotNotifier};
pub use scheduler::{CaptureScheduler, VerifyOutcome};
pub use storage::{CredentialStore, SqliteCredentialStore};
