//! YOLO pre- and post-processing.
//!
//! Models exported in the ultralytics layout take a square `1x3xSxS` RGB
//! tensor in [0, 1] and emit `1 x (4 + classes) x anchors`, where the first
//! four rows are `cx, cy, w, h` in input-pixel space and the remaining rows
//! are per-class scores.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::frame::RawImage;

use super::result::{BoundingBox, DetectParams, Detection};

/// Padding colour used around letterboxed frames.
const PAD_VALUE: u8 = 114;

/// Geometry of a letterbox transform, used to map boxes back to the frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub size: u32,
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source_width: u32,
    pub source_height: u32,
}

impl Letterbox {
    /// Map a box from model-input space back to source-frame pixels.
    pub fn unmap(&self, bbox: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            (bbox.x1 - self.pad_x) / self.scale,
            (bbox.y1 - self.pad_y) / self.scale,
            (bbox.x2 - self.pad_x) / self.scale,
            (bbox.y2 - self.pad_y) / self.scale,
        )
        .clamp_to(self.source_width, self.source_height)
    }
}

/// Resize preserving aspect ratio and pad to a `size x size` square.
pub fn letterbox(image: &RawImage, size: u32) -> Result<(RgbImage, Letterbox)> {
    if size == 0 {
        return Err(anyhow!("model input size must be non-zero"));
    }
    let (width, height) = (image.width(), image.height());
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);

    let resized = imageops::resize(&image.to_rgb_image()?, new_w, new_h, FilterType::Triangle);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    Ok((
        canvas,
        Letterbox {
            size,
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            source_width: width,
            source_height: height,
        },
    ))
}

/// Planar `3 x H x W` float tensor data normalized to [0, 1].
pub fn to_nchw(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut out = vec![0f32; plane * 3];
    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for channel in 0..3 {
            out[channel * plane + idx] = pixel[channel] as f32 / 255.0;
        }
    }
    out
}

/// Decode a `(4 + classes) x anchors` output into frame-space detections.
///
/// Applies the confidence filter, class-wise NMS and the detection cap.
pub fn decode_output(
    output: &[f32],
    anchors: usize,
    letterbox: &Letterbox,
    params: &DetectParams,
    class_names: &[String],
) -> Result<Vec<Detection>> {
    if anchors == 0 {
        return Ok(Vec::new());
    }
    if output.len() % anchors != 0 || output.len() / anchors < 5 {
        return Err(anyhow!(
            "unexpected model output: {} values for {} anchors",
            output.len(),
            anchors
        ));
    }
    let rows = output.len() / anchors;
    let classes = rows - 4;
    let at = |row: usize, anchor: usize| output[row * anchors + anchor];

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (0..classes)
            .map(|c| (c, at(4 + c, anchor)))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score < params.confidence {
            continue;
        }
        let bbox = BoundingBox::from_center(
            at(0, anchor),
            at(1, anchor),
            at(2, anchor),
            at(3, anchor),
        );
        let label = class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id));
        candidates.push(
            Detection::new(label, class_id, score.clamp(0.0, 1.0))
                .with_bbox(letterbox.unmap(&bbox)),
        );
    }

    let mut kept = non_max_suppression(candidates, params.iou);
    kept.truncate(params.max_detections);
    Ok(kept)
}

/// Class-wise greedy NMS. Output is sorted by descending confidence.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id
                && match (&k.bbox, &candidate.bbox) {
                    (Some(a), Some(b)) => a.iou(b) > iou,
                    _ => false,
                }
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backend::default_class_names;

    fn identity_letterbox(size: u32) -> Letterbox {
        Letterbox {
            size,
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            source_width: size,
            source_height: size,
        }
    }

    /// Build a `(4 + classes) x anchors` buffer from per-anchor rows.
    fn output_from(anchors: &[[f32; 7]]) -> Vec<f32> {
        let n = anchors.len();
        let mut out = vec![0f32; 7 * n];
        for (i, values) in anchors.iter().enumerate() {
            for (row, value) in values.iter().enumerate() {
                out[row * n + i] = *value;
            }
        }
        out
    }

    #[test]
    fn letterbox_pads_wide_image_vertically() -> Result<()> {
        let image = RawImage::filled(200, 100, [255, 0, 0])?;
        let (canvas, lb) = letterbox(&image, 100)?;

        assert_eq!(canvas.dimensions(), (100, 100));
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 25.0);
        assert_eq!(canvas.get_pixel(50, 5).0, [PAD_VALUE; 3]);
        assert_eq!(canvas.get_pixel(50, 50).0, [255, 0, 0]);
        Ok(())
    }

    #[test]
    fn unmap_reverses_letterbox() -> Result<()> {
        let image = RawImage::filled(200, 100, [0, 0, 0])?;
        let (_, lb) = letterbox(&image, 100)?;
        let mapped = lb.unmap(&BoundingBox::new(10.0, 35.0, 20.0, 45.0));
        assert_eq!(mapped, BoundingBox::new(20.0, 20.0, 40.0, 40.0));
        Ok(())
    }

    #[test]
    fn nchw_layout_is_planar() -> Result<()> {
        let mut image = RawImage::filled(2, 1, [0, 0, 0])?;
        image.put_pixel(1, 0, [255, 0, 51]);
        let data = to_nchw(&image.to_rgb_image()?);
        assert_eq!(data.len(), 6);
        assert_eq!(data[1], 1.0); // R plane, x=1
        assert_eq!(data[3], 0.0); // G plane, x=1
        assert!((data[5] - 0.2).abs() < 1e-6); // B plane, x=1
        Ok(())
    }

    #[test]
    fn decode_filters_suppresses_and_labels() -> Result<()> {
        let output = output_from(&[
            // cx, cy, w, h, crack, porosity, lack_of_fusion
            [50.0, 50.0, 20.0, 20.0, 0.9, 0.1, 0.0],
            [51.0, 50.0, 20.0, 20.0, 0.8, 0.1, 0.0], // overlaps first, same class
            [51.0, 50.0, 20.0, 20.0, 0.0, 0.7, 0.0], // overlaps, other class
            [10.0, 10.0, 4.0, 4.0, 0.0, 0.0, 0.1],   // below threshold
        ]);
        let params = DetectParams::new(0.25, 100);

        let detections = decode_output(
            &output,
            4,
            &identity_letterbox(100),
            &params,
            &default_class_names(),
        )?;

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "crack");
        assert!((detections[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(detections[1].label, "porosity");
        let bbox = detections[0].bbox.expect("bbox");
        assert_eq!(bbox, BoundingBox::new(40.0, 40.0, 60.0, 60.0));
        Ok(())
    }

    #[test]
    fn decode_respects_max_detections() -> Result<()> {
        let output = output_from(&[
            [10.0, 10.0, 5.0, 5.0, 0.9, 0.0, 0.0],
            [50.0, 50.0, 5.0, 5.0, 0.8, 0.0, 0.0],
            [90.0, 90.0, 5.0, 5.0, 0.7, 0.0, 0.0],
        ]);
        let params = DetectParams::new(0.25, 2);

        let detections = decode_output(
            &output,
            3,
            &identity_letterbox(100),
            &params,
            &default_class_names(),
        )?;

        assert_eq!(detections.len(), 2);
        assert!(detections[0].confidence >= detections[1].confidence);
        Ok(())
    }

    #[test]
    fn decode_rejects_malformed_output() {
        let params = DetectParams::default();
        let result = decode_output(
            &[0.0; 9],
            2,
            &identity_letterbox(10),
            &params,
            &default_class_names(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_class_ids_get_synthetic_labels() -> Result<()> {
        let output = output_from(&[[5.0, 5.0, 2.0, 2.0, 0.0, 0.0, 0.9]]);
        let detections = decode_output(
            &output,
            1,
            &identity_letterbox(10),
            &DetectParams::default(),
            &["crack".to_string()],
        )?;
        assert_eq!(detections[0].label, "class_2");
        Ok(())
    }
}
