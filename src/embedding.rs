use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::camera::Frame;

/// Face embedding produced by an [`EmbeddingProvider`].
///
/// The vector is opaque to the rest of the crate. `Debug` only reveals the
/// dimension and the buffer is wiped when dropped.
#[derive(Clone, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// All-zero vector. Its cosine similarity to anything is undefined, so it
    /// never produces a match.
    pub fn zeros(dimension: usize) -> Self {
        Self {
            values: vec![0.0; dimension],
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Embedding(dim={})", self.values.len())
    }
}

/// Axis-aligned face region in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceRegion {
    pub fn size(&self) -> (f32, f32) {
        (self.width.max(0.0), self.height.max(0.0))
    }
}

/// One detected face and its embedding.
#[derive(Debug, Clone)]
pub struct FaceSample {
    pub region: FaceRegion,
    pub embedding: Embedding,
}

/// Maps an image to the faces it contains, most confident first.
pub trait EmbeddingProvider {
    /// Returns an empty list when no face is found.
    fn detect_and_embed(&mut self, image: &Frame) -> anyhow::Result<Vec<FaceSample>>;

    /// Length of every embedding this provider produces.
    fn dimension(&self) -> usize;
}

/// Decides whether a frame is good enough to enroll from.
pub trait QualityGate {
    fn is_usable(&mut self, image: &Frame) -> bool;
}

impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for &mut T {
    fn detect_and_embed(&mut self, image: &Frame) -> anyhow::Result<Vec<FaceSample>> {
        (**self).detect_and_embed(image)
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }
}

impl<T: QualityGate + ?Sized> QualityGate for &mut T {
    fn is_usable(&mut self, image: &Frame) -> bool {
        (**self).is_usable(image)
    }
}
