//! YuNet detector post-processing.
//!
//! YuNet is anchor-free. For each stride (8, 16, 32) it emits a class score,
//! an objectness score, four box deltas and ten landmark deltas per grid
//! cell. A cell `(i, j)` decodes as
//!
//! ```text
//! cx = (j + dx) * stride    cy = (i + dy) * stride
//! w  = dw * stride          h  = dh * stride
//! ```
//!
//! normalized by the input size.

use anyhow::Result;
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5 (normalized [0,1])
}

/// Per-stride tensors, each with one row per grid cell.
#[derive(Debug, Clone)]
pub struct YunetHeads {
    pub scores: Vec<Array2<f32>>,
    pub boxes: Vec<Array2<f32>>,
    pub landmarks: Vec<Array2<f32>>,
}

/// Decode grid predictions into detections with `score >= score_threshold`.
pub fn decode_detections(
    heads: &YunetHeads,
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    let mut detections = Vec::new();
    let norm = input_size as f32;

    for (scale, &stride) in STRIDES.iter().enumerate() {
        let (Some(scores), Some(boxes), Some(landmarks)) = (
            heads.scores.get(scale),
            heads.boxes.get(scale),
            heads.landmarks.get(scale),
        ) else {
            anyhow::bail!("missing YuNet head for stride {}", stride);
        };

        let side = input_size / stride;
        let cells = scores.nrows();
        if cells != side * side {
            anyhow::bail!(
                "expected {} cells for stride {} ({}x{} grid), got {}",
                side * side,
                stride,
                side,
                side,
                cells
            );
        }

        let step = stride as f32;
        for idx in 0..cells {
            let score = scores[[idx, 0]];
            if score < score_threshold {
                continue;
            }
            let (row, col) = ((idx / side) as f32, (idx % side) as f32);

            let cx = (col + boxes[[idx, 0]]) * step / norm;
            let cy = (row + boxes[[idx, 1]]) * step / norm;
            let w = boxes[[idx, 2]] * step / norm;
            let h = boxes[[idx, 3]] * step / norm;

            let mut points = [0.0f32; 10];
            for k in 0..5 {
                points[k * 2] = (col + landmarks[[idx, k * 2]]) * step / norm;
                points[k * 2 + 1] = (row + landmarks[[idx, k * 2 + 1]]) * step / norm;
            }

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks: points,
            });
        }
    }

    Ok(detections)
}

/// Read one `[1, cells, width]` output into a `(cells, width)` array.
fn take_head(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    cells: usize,
    width: usize,
    name: &str,
) -> Result<Array2<f32>> {
    let Some((shape, data)) = outputs.get(index) else {
        anyhow::bail!("missing {} output at index {}", name, index);
    };
    if shape.len() != 3 || shape[0] != 1 || shape[1] as usize != cells || shape[2] as usize != width
    {
        anyhow::bail!(
            "unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
            name,
            index,
            shape,
            cells,
            width
        );
    }
    Ok(Array2::from_shape_vec((cells, width), data.to_vec())?)
}

/// Split the twelve YuNet outputs into per-stride heads.
///
/// Output order is cls, obj, bbox, kps, each for strides 8, 16, 32. Class
/// and objectness are multiplied into a single score map.
pub fn parse_yunet_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<YunetHeads> {
    let mut heads = YunetHeads {
        scores: Vec::with_capacity(3),
        boxes: Vec::with_capacity(3),
        landmarks: Vec::with_capacity(3),
    };

    for (scale, &stride) in STRIDES.iter().enumerate() {
        let cells = (input_size / stride) * (input_size / stride);
        let cls = take_head(outputs, scale, cells, 1, "cls")?;
        let obj = take_head(outputs, scale + 3, cells, 1, "obj")?;
        heads.scores.push(cls * obj);
        heads.boxes.push(take_head(outputs, scale + 6, cells, 4, "bbox")?);
        heads
            .landmarks
            .push(take_head(outputs, scale + 9, cells, 10, "kps")?);
    }

    Ok(heads)
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn apply_sigmoid_to_scores(heads: &mut YunetHeads) {
    for score_map in &mut heads.scores {
        score_map.mapv_inplace(sigmoid);
    }
}
