//! Adapters binding the ONNX/V4L2 implementations in `facegate-vision` to
//! the collaborator traits of this crate.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Context;
use facegate_vision::{Camera, Detection, ModelPaths, Pipeline, EMBEDDING_DIM};
use image::DynamicImage;
use log::{debug, warn};

use crate::camera::{CameraDevice, Frame, FrameStream};
use crate::embedding::{Embedding, EmbeddingProvider, FaceRegion, FaceSample, QualityGate};
use crate::error::CaptureError;

/// V4L2 device addressed by path, opened on demand.
#[derive(Debug, Clone)]
pub struct V4lCamera {
    device: String,
}

impl V4lCamera {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl CameraDevice for V4lCamera {
    type Stream = Camera;

    fn open(&self) -> Result<Camera, CaptureError> {
        Camera::open(&self.device).map_err(|e| CaptureError::DeviceOpen {
            device: self.device.clone(),
            message: format!("{e:#}"),
        })
    }

    fn name(&self) -> &str {
        &self.device
    }
}

impl FrameStream for Camera {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        self.frame()
            .map_err(|e| CaptureError::FrameRead(format!("{e:#}")))
    }
}

fn region(detection: &Detection) -> FaceRegion {
    let [x, y, width, height] = detection.bbox;
    FaceRegion {
        x,
        y,
        width,
        height,
    }
}

/// YuNet + SFace embedding provider.
///
/// The model sessions are shared with any [`DetectorQualityGate`] built from
/// this provider.
pub struct OnnxEmbeddingProvider {
    pipeline: Rc<RefCell<Pipeline>>,
}

impl OnnxEmbeddingProvider {
    pub fn load(paths: &ModelPaths) -> anyhow::Result<Self> {
        let pipeline = Pipeline::new(paths).context("initializing face recognition pipeline")?;
        Ok(Self {
            pipeline: Rc::new(RefCell::new(pipeline)),
        })
    }

    /// Quality gate running on this provider's detector session.
    pub fn quality_gate(&self, min_score: f32, min_face_ratio: f32) -> DetectorQualityGate {
        DetectorQualityGate {
            pipeline: Rc::clone(&self.pipeline),
            min_score,
            min_face_ratio,
        }
    }

    /// Embedding of the most confident face in the image at `path`, if any.
    pub fn embed_file(&mut self, path: &std::path::Path) -> anyhow::Result<Option<Embedding>> {
        let img = image::open(path).with_context(|| format!("reading {}", path.display()))?;
        let samples = self.detect_and_embed(&img.to_rgb8())?;
        Ok(samples.into_iter().next().map(|s| s.embedding))
    }
}

impl EmbeddingProvider for OnnxEmbeddingProvider {
    fn detect_and_embed(&mut self, image: &Frame) -> anyhow::Result<Vec<FaceSample>> {
        let img = DynamicImage::ImageRgb8(image.clone());
        let faces = self.pipeline.borrow_mut().detect_and_embed(&img)?;
        Ok(faces
            .into_iter()
            .map(|(detection, vector)| FaceSample {
                region: region(&detection),
                embedding: Embedding::new(vector),
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Accepts a frame when the detector is confident about a face that is not
/// lost in the background.
pub struct DetectorQualityGate {
    pipeline: Rc<RefCell<Pipeline>>,
    min_score: f32,
    min_face_ratio: f32,
}

impl QualityGate for DetectorQualityGate {
    fn is_usable(&mut self, image: &Frame) -> bool {
        let img = DynamicImage::ImageRgb8(image.clone());
        let detected = self.pipeline.borrow_mut().detector.detect(&img);
        let detections = match detected {
            Ok(detections) => detections,
            Err(e) => {
                warn!("quality gate could not run the detector: {:#}", e);
                return false;
            }
        };

        let width = image.width().max(1) as f32;
        let usable = detections
            .first()
            .is_some_and(|d| d.score >= self.min_score && d.bbox[2] / width > self.min_face_ratio);
        debug!(
            "quality gate: {} face(s), best score {:?}, usable={}",
            detections.len(),
            detections.first().map(|d| d.score),
            usable
        );
        usable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn quality_gate_shares_provider_sessions() {
        let dir = std::env::var("FACEGATE_MODEL_DIR").unwrap_or_else(|_| "models".to_string());
        let paths = ModelPaths::in_dir(Path::new(&dir));
        if !paths.detector.exists() || !paths.recognizer.exists() {
            eprintln!("Skipping: models not found in {}", dir);
            return;
        }

        let provider = OnnxEmbeddingProvider::load(&paths).unwrap();
        let gate = provider.quality_gate(0.8, 0.05);
        assert!(Rc::ptr_eq(&provider.pipeline, &gate.pipeline));
        assert_eq!(Rc::strong_count(&provider.pipeline), 2);
    }
}
