use anyhow::{anyhow, Result};

use crate::frame::RawImage;

use super::result::{DetectParams, DetectionBatch};

/// Weld-defect classes of the stock inspection model, indexed by class id.
pub const DEFAULT_CLASS_NAMES: &[&str] = &["crack", "porosity", "lack_of_fusion"];

pub fn default_class_names() -> Vec<String> {
    DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect()
}

/// Detector capability.
///
/// A loaded model is read-only during inference, so one detector can be
/// shared by several sessions through `Arc<dyn Detector>`. Backends that
/// need mutable scratch state keep it behind their own lock.
pub trait Detector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Class labels indexed by class id.
    fn class_names(&self) -> &[String];

    /// Run detection on one image.
    ///
    /// The returned annotated image has the same dimensions as `image`.
    /// Detections are filtered by `params.confidence` and capped at
    /// `params.max_detections`, in no guaranteed order.
    fn detect(&self, image: &RawImage, params: &DetectParams) -> Result<DetectionBatch>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Single-shot detection on a still image.
///
/// Same per-frame logic as one session iteration. A missing detector is an
/// error here because the caller asked for a result synchronously.
pub fn detect_single(
    detector: Option<&dyn Detector>,
    image: &RawImage,
    params: &DetectParams,
) -> Result<DetectionBatch> {
    let detector = detector.ok_or_else(|| anyhow!("no detection model loaded"))?;
    params.validate()?;
    if image.is_empty() {
        return Err(anyhow!("cannot run detection on an empty image"));
    }
    let batch = detector.detect(image, params)?;
    log::debug!(
        "{}: {} detection(s) on {}x{} image",
        detector.name(),
        batch.detections.len(),
        image.width(),
        image.height()
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubDetector;

    #[test]
    fn detect_single_requires_detector() -> Result<()> {
        let image = RawImage::filled(4, 4, [0, 0, 0])?;
        let err = detect_single(None, &image, &DetectParams::default()).unwrap_err();
        assert!(err.to_string().contains("no detection model"));
        Ok(())
    }

    #[test]
    fn detect_single_validates_params() -> Result<()> {
        let detector = StubDetector::with_single_defect();
        let image = RawImage::filled(4, 4, [0, 0, 0])?;
        let params = DetectParams::new(0.5, 0);
        assert!(detect_single(Some(&detector), &image, &params).is_err());
        assert_eq!(detector.calls(), 0);
        Ok(())
    }

    #[test]
    fn detect_single_is_deterministic_for_fixed_detector() -> Result<()> {
        let detector = StubDetector::with_single_defect().with_detection(1, 0.4, None);
        let image = RawImage::filled(16, 16, [30, 30, 30])?;
        let params = DetectParams::new(0.25, 1000);

        let first = detect_single(Some(&detector), &image, &params)?;
        let second = detect_single(Some(&detector), &image, &params)?;

        assert_eq!(first.len(), 2);
        assert_eq!(first.len(), second.len());
        assert_eq!(first.detections, second.detections);
        assert_eq!(first.annotated, second.annotated);
        Ok(())
    }
}
