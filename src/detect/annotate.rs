//! Box overlay for annotated frames.

use crate::frame::RawImage;

use super::result::{BoundingBox, Detection};

/// Border thickness in pixels.
pub const BOX_THICKNESS: u32 = 2;

const PALETTE: &[[u8; 3]] = &[
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [146, 204, 23],
    [61, 219, 134],
    [26, 147, 52],
    [0, 212, 187],
];

/// Colour used for a class id; stable across frames.
pub fn class_color(class_id: usize) -> [u8; 3] {
    PALETTE[class_id % PALETTE.len()]
}

/// Copy `image` and draw a rectangle for every detection that has a box.
pub fn draw_detections(image: &RawImage, detections: &[Detection]) -> RawImage {
    let mut out = image.clone();
    for detection in detections {
        if let Some(bbox) = detection.bbox {
            draw_box(&mut out, &bbox, class_color(detection.class_id));
        }
    }
    out
}

fn draw_box(image: &mut RawImage, bbox: &BoundingBox, color: [u8; 3]) {
    let clamped = bbox.clamp_to(image.width(), image.height());
    let max_x = image.width().saturating_sub(1);
    let max_y = image.height().saturating_sub(1);
    let x1 = (clamped.x1.round() as u32).min(max_x);
    let y1 = (clamped.y1.round() as u32).min(max_y);
    let x2 = (clamped.x2.round() as u32).min(max_x);
    let y2 = (clamped.y2.round() as u32).min(max_y);
    if x2 < x1 || y2 < y1 {
        return;
    }

    for t in 0..BOX_THICKNESS {
        let top = y1.saturating_add(t).min(y2);
        let bottom = y2.saturating_sub(t).max(y1);
        for x in x1..=x2 {
            image.put_pixel(x, top, color);
            image.put_pixel(x, bottom, color);
        }
        let left = x1.saturating_add(t).min(x2);
        let right = x2.saturating_sub(t).max(x1);
        for y in y1..=y2 {
            image.put_pixel(left, y, color);
            image.put_pixel(right, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn draws_border_but_leaves_interior() -> Result<()> {
        let image = RawImage::filled(20, 20, [0, 0, 0])?;
        let detections = vec![
            Detection::new("crack", 0, 0.9).with_bbox(BoundingBox::new(2.0, 2.0, 17.0, 17.0))
        ];

        let out = draw_detections(&image, &detections);

        assert_eq!(out.pixel(2, 2), Some(class_color(0)));
        assert_eq!(out.pixel(17, 10), Some(class_color(0)));
        assert_eq!(out.pixel(3, 10), Some(class_color(0)));
        assert_eq!(out.pixel(10, 10), Some([0, 0, 0]));
        // input untouched
        assert_eq!(image.pixel(2, 2), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn boxes_outside_frame_are_clipped() -> Result<()> {
        let image = RawImage::filled(10, 10, [0, 0, 0])?;
        let detections = vec![
            Detection::new("porosity", 1, 0.5).with_bbox(BoundingBox::new(-5.0, -5.0, 50.0, 50.0))
        ];

        let out = draw_detections(&image, &detections);

        assert_eq!(out.width(), 10);
        assert_eq!(out.pixel(0, 0), Some(class_color(1)));
        assert_eq!(out.pixel(9, 9), Some(class_color(1)));
        Ok(())
    }

    #[test]
    fn detections_without_boxes_leave_image_unchanged() -> Result<()> {
        let image = RawImage::filled(4, 4, [7, 7, 7])?;
        let out = draw_detections(&image, &[Detection::new("crack", 0, 0.3)]);
        assert_eq!(out, image);
        Ok(())
    }
}
