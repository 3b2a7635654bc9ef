use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::Session;

use crate::face::{self, Detection};
use crate::model::{self, ModelPaths};

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.6;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.3;

/// YuNet face detector on its own, for callers that only need boxes.
pub struct Detector {
    pub session: Session,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Detector {
    pub fn new(paths: &ModelPaths) -> Result<Self> {
        Ok(Self {
            session: model::detector_session(&paths.detector)?,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        })
    }

    /// Faces in `img`, highest score first.
    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let mut detections = face::detect_faces(
            &mut self.session,
            img,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")?;
        detections.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(detections)
    }
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Detector,
    pub encoder: Session,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths) -> Result<Self> {
        Ok(Self {
            detector: Detector::new(paths)?,
            encoder: model::recog_session(&paths.recognizer)?,
        })
    }

    /// Every face in the image with its embedding, highest score first.
    ///
    /// Faces whose landmarks cannot be aligned are skipped.
    pub fn detect_and_embed(
        &mut self,
        img: &DynamicImage,
    ) -> Result<Vec<(Detection, Vec<f32>)>> {
        let detections = self.detector.detect(img)?;
        log::debug!(
            "{} face(s) detected in {:?} frame",
            detections.len(),
            img.dimensions()
        );

        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections {
            let aligned = match face::align_face(img, &detection, face::ENCODER_INPUT) {
                Ok(aligned) => aligned,
                Err(e) => {
                    log::warn!("skipping face with score {:.3}: {}", detection.score, e);
                    continue;
                }
            };
            let embedding =
                face::encode_face(&mut self.encoder, &aligned).context("encoding face")?;
            faces.push((detection, embedding));
        }
        Ok(faces)
    }
}
