use crate::embedding::Embedding;

pub const DEFAULT_THRESHOLD: f32 = 0.4;
pub const DEFAULT_MIN_FACE_RATIO: f32 = 0.05;

/// Why a comparison did or did not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    Matched,
    BelowThreshold,
    InsufficientFaceArea,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub is_match: bool,
    /// Cosine distance between the two embeddings.
    pub score: f32,
    pub reason: MatchReason,
}

/// Renders match decisions from cosine distance plus a face-area guard.
#[derive(Debug, Clone, Copy)]
pub struct MatchEngine {
    threshold: f32,
    min_face_ratio: f32,
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_MIN_FACE_RATIO)
    }
}

impl MatchEngine {
    pub fn new(threshold: f32, min_face_ratio: f32) -> Self {
        Self {
            threshold,
            min_face_ratio,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Compares a candidate against the reference.
    ///
    /// `face_size` is the detected face in the candidate image and
    /// `image_size` the full candidate frame, both `(width, height)`. A face
    /// whose width is not strictly above `min_face_ratio` of the frame width
    /// never matches, however close the embeddings are. A distance equal to
    /// the threshold matches.
    pub fn compare(
        &self,
        reference: &Embedding,
        candidate: &Embedding,
        face_size: (f32, f32),
        image_size: (f32, f32),
    ) -> MatchResult {
        let distance = cosine_distance(reference, candidate);
        let close_enough = distance <= self.threshold;
        let large_enough = image_size.0 > 0.0 && face_size.0 / image_size.0 > self.min_face_ratio;

        let reason = if !close_enough {
            MatchReason::BelowThreshold
        } else if !large_enough {
            MatchReason::InsufficientFaceArea
        } else {
            MatchReason::Matched
        };

        MatchResult {
            is_match: reason == MatchReason::Matched,
            score: distance,
            reason,
        }
    }
}

/// `1 - cosine similarity`.
///
/// Similarity is taken as 0 (distance 1) when it is undefined: mismatched
/// dimensions or a zero-norm vector.
pub fn cosine_distance(a: &Embedding, b: &Embedding) -> f32 {
    (1.0 - cosine_similarity(a.as_slice(), b.as_slice())) as f32
}

pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> f64 {
    if lhs.len() != rhs.len() || lhs.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_lhs = 0.0f64;
    let mut norm_rhs = 0.0f64;
    for (&l, &r) in lhs.iter().zip(rhs) {
        let (l, r) = (l as f64, r as f64);
        dot += l * r;
        norm_lhs += l * l;
        norm_rhs += r * r;
    }

    let denom = norm_lhs.sqrt() * norm_rhs.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0)
}
