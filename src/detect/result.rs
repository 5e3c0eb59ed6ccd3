use anyhow::{anyhow, Result};

use crate::frame::RawImage;

pub const DEFAULT_CONFIDENCE: f32 = 0.25;
pub const DEFAULT_MAX_DETECTIONS: usize = 1000;
pub const DEFAULT_IOU: f32 = 0.7;

/// Axis-aligned box in image pixel coordinates (top-left / bottom-right).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from a centre point and size, the layout YOLO heads emit.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union; 0.0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if inter <= 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter + f32::EPSILON)
    }

    /// Clip to `[0, width] x [0, height]`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }
}

/// One labelled, confidence-scored detection.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    pub class_id: usize,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

impl Detection {
    pub fn new(label: impl Into<String>, class_id: usize, confidence: f32) -> Self {
        Self {
            label: label.into(),
            class_id,
            confidence,
            bbox: None,
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }
}

/// Result of running detection on one frame.
///
/// Detections carry no ordering guarantee.
#[derive(Clone, Debug)]
pub struct DetectionBatch {
    /// Input frame with detections drawn on it; same dimensions as the input.
    pub annotated: RawImage,
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    /// Highest-confidence detection, or `None` when nothing was detected.
    pub fn best(&self) -> Option<&Detection> {
        self.detections
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Per-call detection parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectParams {
    /// Minimum confidence kept, in [0, 1].
    pub confidence: f32,
    /// Upper bound on detections returned per frame (>= 1).
    pub max_detections: usize,
    /// IoU threshold used for non-maximum suppression.
    pub iou: f32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            max_detections: DEFAULT_MAX_DETECTIONS,
            iou: DEFAULT_IOU,
        }
    }
}

impl DetectParams {
    pub fn new(confidence: f32, max_detections: usize) -> Self {
        Self {
            confidence,
            max_detections,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                self.confidence
            ));
        }
        if self.max_detections == 0 {
            return Err(anyhow!("max detections must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.iou) {
            return Err(anyhow!("iou threshold must be within [0, 1], got {}", self.iou));
        }
        Ok(())
    }
}
