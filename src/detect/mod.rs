pub mod annotate;
mod backend;
mod backends;
mod registry;
mod result;
pub mod yolo;

pub use backend::{default_class_names, detect_single, Detector, DEFAULT_CLASS_NAMES};
pub use backends::StubDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use registry::{load_detector, DetectorRegistry};
pub use result::{
    BoundingBox, DetectParams, Detection, DetectionBatch, DEFAULT_CONFIDENCE, DEFAULT_IOU,
    DEFAULT_MAX_DETECTIONS,
};
