use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::Detector;
use super::backends::StubDetector;

/// Registry of loaded detectors, shared by name.
///
/// Detectors are held as `Arc<dyn Detector>`; sessions clone the handle and
/// never mutate the model.
pub struct DetectorRegistry {
    detectors: HashMap<String, Arc<dyn Detector>>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a detector. The first registered detector becomes the default.
    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        let name = detector.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.detectors.insert(name, detector);
    }

    /// Set default detector by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.detectors.contains_key(name) {
            return Err(anyhow!("detector '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Detector>> {
        self.detectors.get(name).cloned()
    }

    pub fn default_detector(&self) -> Option<Arc<dyn Detector>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.detectors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Load a backend and register it. On failure the registry is unchanged
    /// and the error is returned for the caller to report.
    pub fn load(
        &mut self,
        backend: &str,
        model_path: &Path,
        input_size: u32,
        class_names: Vec<String>,
    ) -> Result<Arc<dyn Detector>> {
        let detector = load_detector(backend, model_path, input_size, class_names)?;
        self.register(detector.clone());
        Ok(detector)
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Construct a detector backend by name (`stub` or `tract`).
pub fn load_detector(
    backend: &str,
    model_path: &Path,
    input_size: u32,
    class_names: Vec<String>,
) -> Result<Arc<dyn Detector>> {
    match backend {
        "stub" => {
            log::info!("using stub detector (no model loaded)");
            Ok(Arc::new(
                StubDetector::with_single_defect().with_class_names(class_names),
            ))
        }
        "tract" => load_tract(model_path, input_size, class_names),
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}

#[cfg(feature = "backend-tract")]
fn load_tract(
    model_path: &Path,
    input_size: u32,
    class_names: Vec<String>,
) -> Result<Arc<dyn Detector>> {
    let detector = super::backends::TractDetector::load(model_path, input_size, class_names)?;
    Ok(Arc::new(detector))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(
    model_path: &Path,
    _input_size: u32,
    _class_names: Vec<String>,
) -> Result<Arc<dyn Detector>> {
    Err(anyhow!(
        "cannot load {}: the tract backend requires the backend-tract feature",
        model_path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backend::default_class_names;

    #[test]
    fn first_registered_is_default() {
        let mut registry = DetectorRegistry::new();
        assert!(registry.default_detector().is_none());

        registry.register(Arc::new(StubDetector::new()));
        let default = registry.default_detector().expect("default");
        assert_eq!(default.name(), "stub");
        assert_eq!(registry.list(), vec!["stub".to_string()]);
    }

    #[test]
    fn set_default_rejects_unknown_names() {
        let mut registry = DetectorRegistry::new();
        registry.register(Arc::new(StubDetector::new()));
        assert!(registry.set_default("tract").is_err());
        assert!(registry.set_default("stub").is_ok());
    }

    #[test]
    fn load_unknown_backend_fails_and_leaves_registry_empty() {
        let mut registry = DetectorRegistry::new();
        let result = registry.load("yolo-gpu", Path::new("x.onnx"), 640, default_class_names());
        assert!(result.is_err());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn load_stub_backend() -> Result<()> {
        let mut registry = DetectorRegistry::new();
        let detector = registry.load(
            "stub",
            Path::new("unused.onnx"),
            640,
            default_class_names(),
        )?;
        assert_eq!(detector.class_names().len(), 3);
        assert!(registry.get("stub").is_some());
        Ok(())
    }

    #[test]
    fn tract_backend_with_missing_model_fails() {
        let result = load_detector(
            "tract",
            Path::new("/nonexistent/model.onnx"),
            640,
            default_class_names(),
        );
        assert!(result.is_err());
    }
}
