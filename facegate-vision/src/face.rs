use crate::yunet;
use anyhow::Result;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

/// Square input side of the YuNet detector.
pub const DETECTOR_INPUT: u32 = 640;
/// Square input side of the SFace encoder.
pub const ENCODER_INPUT: u32 = 112;
/// SFace embedding length.
pub const EMBEDDING_DIM: usize = 128;

// ArcFace reference eye positions for a 112x112 crop
const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

/// Detection result from YuNet, in source image pixels.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// A square canvas holding the aspect-preserving resize of a source image.
struct Letterbox {
    canvas: RgbImage,
    scale: f32,
    offset: (f32, f32),
}

impl Letterbox {
    fn new(img: &DynamicImage, side: u32) -> Self {
        let (width, height) = img.dimensions();
        let scale = side as f32 / width.max(height).max(1) as f32;
        let new_width = ((width as f32 * scale) as u32).clamp(1, side);
        let new_height = ((height as f32 * scale) as u32).clamp(1, side);
        let resized =
            img.resize_exact(new_width, new_height, image::imageops::FilterType::Triangle);

        let mut canvas = DynamicImage::new_rgb8(side, side);
        let offset_x = (side - new_width) / 2;
        let offset_y = (side - new_height) / 2;
        image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

        Self {
            canvas: canvas.to_rgb8(),
            scale,
            offset: (offset_x as f32, offset_y as f32),
        }
    }

    /// Map a canvas-normalized x/y pair back to source pixels.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        let side = self.canvas.width() as f32;
        (
            (x * side - self.offset.0) / self.scale,
            (y * side - self.offset.1) / self.scale,
        )
    }
}

/// Planar BGR `[1, 3, H, W]` tensor with raw `[0, 255]` values, the layout
/// both YuNet and SFace expect.
pub fn bgr_planes(img: &RgbImage) -> Result<Array4<f32>> {
    let (width, height) = img.dimensions();
    let pixel_count = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * pixel_count];
    let (b, rest) = data.split_at_mut(pixel_count);
    let (g, r) = rest.split_at_mut(pixel_count);

    for (i, px) in img.as_raw().chunks_exact(3).enumerate() {
        r[i] = px[0] as f32;
        g[i] = px[1] as f32;
        b[i] = px[2] as f32;
    }

    Ok(Array4::from_shape_vec(
        (1, 3, height as usize, width as usize),
        data,
    )?)
}

/// Detect faces in an image using YuNet detector
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let letterbox = Letterbox::new(img, DETECTOR_INPUT);
    let input_tensor = Value::from_array(bgr_planes(&letterbox.canvas)?)?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        output_data.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let output_refs: Vec<(&[i64], &[f32])> = output_data
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let mut heads = yunet::parse_yunet_outputs(&output_refs, DETECTOR_INPUT as usize)?;
    yunet::apply_sigmoid_to_scores(&mut heads);
    let raw = yunet::decode_detections(&heads, score_threshold, DETECTOR_INPUT as usize)?;

    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let (x, y) = letterbox.unmap(d.bbox[0], d.bbox[1]);
            let side = DETECTOR_INPUT as f32;
            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                let (lx, ly) = letterbox.unmap(d.landmarks[k * 2], d.landmarks[k * 2 + 1]);
                landmarks[k * 2] = lx;
                landmarks[k * 2 + 1] = ly;
            }
            Detection {
                bbox: [
                    x,
                    y,
                    d.bbox[2] * side / letterbox.scale,
                    d.bbox[3] * side / letterbox.scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        return Ok(nms(&detections, nms_threshold));
    }
    Ok(detections)
}

/// Greedy non-maximum suppression, highest score first.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Rotate, scale and crop the face so the eyes land on the ArcFace
/// reference positions of a `size`x`size` crop.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<RgbImage> {
    let left_eye = (detection.landmarks[0], detection.landmarks[1]);
    let right_eye = (detection.landmarks[2], detection.landmarks[3]);
    let (dx, dy) = (right_eye.0 - left_eye.0, right_eye.1 - left_eye.1);
    let eye_dist = dx.hypot(dy);
    if eye_dist <= f32::EPSILON {
        anyhow::bail!("degenerate landmarks: eyes coincide");
    }

    let unit = size as f32 / ENCODER_INPUT as f32;
    let ref_dist = (REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).hypot(REF_RIGHT_EYE.1 - REF_LEFT_EYE.1);
    let scale = unit * ref_dist / eye_dist;
    let angle = dy.atan2(dx);

    // forward map: out = M * src + t, with M = scale * rot(-angle)
    let (a, b) = (scale * angle.cos(), scale * angle.sin());
    let (c, d) = (-b, a);
    let eye_center = ((left_eye.0 + right_eye.0) / 2.0, (left_eye.1 + right_eye.1) / 2.0);
    let ref_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * unit,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * unit,
    );
    let tx = ref_center.0 - (a * eye_center.0 + b * eye_center.1);
    let ty = ref_center.1 - (c * eye_center.0 + d * eye_center.1);
    let det = a * d - b * c;

    let src = img.to_rgb8();
    let (w, h) = src.dimensions();
    let mut output = RgbImage::new(size, size);

    for (out_x, out_y, pixel) in output.enumerate_pixels_mut() {
        let (px, py) = (out_x as f32 - tx, out_y as f32 - ty);
        let in_x = (d * px - b * py) / det;
        let in_y = (-c * px + a * py) / det;
        if in_x < 0.0 || in_y < 0.0 || in_x >= w as f32 || in_y >= h as f32 {
            continue;
        }
        *pixel = bilinear(&src, in_x, in_y);
    }

    Ok(output)
}

fn bilinear(src: &RgbImage, x: f32, y: f32) -> image::Rgb<u8> {
    let (w, h) = src.dimensions();
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let weights = [
        ((x0, y0), (1.0 - fx) * (1.0 - fy)),
        ((x1, y0), fx * (1.0 - fy)),
        ((x0, y1), (1.0 - fx) * fy),
        ((x1, y1), fx * fy),
    ];
    let mut acc = [0.0f32; 3];
    for ((px, py), weight) in weights {
        let p = src.get_pixel(px, py);
        for ch in 0..3 {
            acc[ch] += p[ch] as f32 * weight;
        }
    }
    image::Rgb(acc.map(|v| v.clamp(0.0, 255.0) as u8))
}

/// Encode an aligned face crop into an L2-normalized SFace embedding.
pub fn encode_face(session: &mut Session, face: &RgbImage) -> Result<Vec<f32>> {
    let face = if face.dimensions() == (ENCODER_INPUT, ENCODER_INPUT) {
        face.clone()
    } else {
        image::imageops::resize(
            face,
            ENCODER_INPUT,
            ENCODER_INPUT,
            image::imageops::FilterType::Triangle,
        )
    };

    let input_tensor = Value::from_array(bgr_planes(&face)?)?;
    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let len = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    let mut embedding: Vec<f32> = data[..len].to_vec();
    l2_normalize(&mut embedding);
    Ok(embedding)
}

pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);

        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms() {
        let detections = vec![
            det([10.0, 10.0, 20.0, 20.0], 0.8),
            det([12.0, 12.0, 20.0, 20.0], 0.9),
            det([100.0, 100.0, 20.0, 20.0], 0.85),
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2);
        assert!((result[0].score - 0.9).abs() < 1e-6);
        assert!((result[1].score - 0.85).abs() < 1e-6);
    }

    #[test]
    fn bgr_planes_swaps_channels() {
        let img = RgbImage::from_pixel(2, 1, image::Rgb([10, 20, 30]));
        let tensor = bgr_planes(&img).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
        assert_eq!(tensor[[0, 0, 0, 1]], 30.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 20.0);
        assert_eq!(tensor[[0, 2, 0, 0]], 10.0);
    }

    #[test]
    fn letterbox_round_trips_coordinates() {
        let img = DynamicImage::new_rgb8(1280, 720);
        let lb = Letterbox::new(&img, DETECTOR_INPUT);
        // centre of the canvas is the centre of the source
        let (x, y) = lb.unmap(0.5, 0.5);
        assert!((x - 640.0).abs() < 1.0);
        assert!((y - 360.0).abs() < 1.0);
    }

    #[test]
    fn aligned_eyes_land_on_reference_points() {
        let mut img = RgbImage::new(200, 200);
        img.put_pixel(60, 80, image::Rgb([255, 255, 255]));
        let mut landmarks = [0.0f32; 10];
        landmarks[..4].copy_from_slice(&[60.0, 80.0, 140.0, 80.0]);
        let detection = Detection {
            bbox: [40.0, 40.0, 120.0, 140.0],
            score: 0.9,
            landmarks,
        };

        let crop = align_face(&DynamicImage::ImageRgb8(img), &detection, 112).unwrap();
        assert_eq!(crop.dimensions(), (112, 112));
        // the bright left-eye pixel is sampled near (38, 51)
        let lit: Vec<(u32, u32)> = crop
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] > 0)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!lit.is_empty());
        assert!(lit
            .iter()
            .all(|(x, y)| (36..=41).contains(x) && (49..=54).contains(y)));
    }

    #[test]
    fn coincident_eyes_are_rejected() {
        let img = DynamicImage::new_rgb8(10, 10);
        let detection = det([0.0, 0.0, 5.0, 5.0], 0.9);
        assert!(align_face(&img, &detection, 112).is_err());
    }

    #[test]
    fn normalizes_to_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
