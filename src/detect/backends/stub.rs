use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::detect::annotate::draw_detections;
use crate::detect::backend::{default_class_names, Detector};
use crate::detect::result::{BoundingBox, DetectParams, Detection, DetectionBatch};
use crate::frame::RawImage;

/// Stub backend for testing and demos.
///
/// Returns the same scripted detections for every frame, so repeated calls
/// on the same input are deterministic. Boxes are given in normalized 0..1
/// coordinates and scaled to each frame.
pub struct StubDetector {
    class_names: Vec<String>,
    script: Vec<ScriptedDetection>,
    fail_on_calls: HashSet<u64>,
    calls: AtomicU64,
}

#[derive(Clone, Debug)]
struct ScriptedDetection {
    class_id: usize,
    confidence: f32,
    bbox: Option<BoundingBox>,
}

impl StubDetector {
    /// Stub that never detects anything.
    pub fn new() -> Self {
        Self {
            class_names: default_class_names(),
            script: Vec::new(),
            fail_on_calls: HashSet::new(),
            calls: AtomicU64::new(0),
        }
    }

    /// Stub that reports one crack in the middle of every frame.
    pub fn with_single_defect() -> Self {
        Self::new().with_detection(
            0,
            0.9,
            Some(BoundingBox::new(0.25, 0.375, 0.75, 0.625)),
        )
    }

    /// Add a scripted detection; `bbox` is normalized to the frame size.
    pub fn with_detection(
        mut self,
        class_id: usize,
        confidence: f32,
        bbox: Option<BoundingBox>,
    ) -> Self {
        self.script.push(ScriptedDetection {
            class_id,
            confidence,
            bbox,
        });
        self
    }

    /// Make the given 1-based call numbers return an error.
    pub fn failing_on(mut self, calls: impl IntoIterator<Item = u64>) -> Self {
        self.fail_on_calls.extend(calls);
        self
    }

    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = class_names;
        self
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn label_for(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &str {
        "stub"
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn detect(&self, image: &RawImage, params: &DetectParams) -> Result<DetectionBatch> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_calls.contains(&call) {
            return Err(anyhow!("stub inference failure on call {}", call));
        }

        let width = image.width() as f32;
        let height = image.height() as f32;
        let detections: Vec<Detection> = self
            .script
            .iter()
            .filter(|s| s.confidence >= params.confidence)
            .take(params.max_detections)
            .map(|s| {
                let detection =
                    Detection::new(self.label_for(s.class_id), s.class_id, s.confidence);
                match s.bbox {
                    Some(b) => detection.with_bbox(BoundingBox::new(
                        b.x1 * width,
                        b.y1 * height,
                        b.x2 * width,
                        b.y2 * height,
                    )),
                    None => detection,
                }
            })
            .collect();

        Ok(DetectionBatch {
            annotated: draw_detections(image, &detections),
            detections,
        })
    }
}
