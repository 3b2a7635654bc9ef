use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};

pub const RECOGNITION_MODEL_FILE: &str = "face_recognition_sface_2021dec.onnx";
pub const DETECTOR_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";

/// Locations of the ONNX models on disk.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            recognizer: dir.join(RECOGNITION_MODEL_FILE),
        }
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load(path: &Path, kind: &str) -> Result<Session> {
    if !path.exists() {
        anyhow::bail!("{} model not found at {}", kind, path.display());
    }
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model {}", kind, path.display()))
}

pub fn recog_session(path: &Path) -> Result<Session> {
    load(path, "recognition")
}

pub fn detector_session(path: &Path) -> Result<Session> {
    load(path, "detector")
}
