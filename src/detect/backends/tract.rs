#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use tract_onnx::prelude::*;

use crate::detect::annotate::draw_detections;
use crate::detect::backend::Detector;
use crate::detect::result::{DetectParams, DetectionBatch};
use crate::detect::yolo::{decode_output, letterbox, to_nchw};
use crate::frame::RawImage;

/// Tract-based backend for YOLO ONNX models.
///
/// Loads a local model file once; inference runs on a shared, read-only plan.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    input_size: u32,
    class_names: Vec<String>,
    model_digest: String,
}

impl TractDetector {
    /// Load an ONNX model exported with a square `input_size` input.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let bytes = std::fs::read(model_path)
            .with_context(|| format!("failed to read ONNX model {}", model_path.display()))?;
        let model_digest = hex::encode(Sha256::digest(&bytes));

        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_read(&mut bytes.as_slice())
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractDetector: loaded {} (sha256={}, input={}x{}, classes={})",
            model_path.display(),
            model_digest,
            input_size,
            input_size,
            class_names.len()
        );

        Ok(Self {
            model,
            input_size,
            class_names,
            model_digest,
        })
    }

    /// Hex SHA-256 of the model file.
    pub fn model_digest(&self) -> &str {
        &self.model_digest
    }

    fn run(&self, image: &RawImage, params: &DetectParams) -> Result<DetectionBatch> {
        let (input, geometry) = letterbox(image, self.input_size)?;
        let size = self.input_size as usize;
        let tensor = Tensor::from_shape(&[1, 3, size, size], &to_nchw(&input))
            .context("failed to build input tensor")?;

        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let anchors = match shape.as_slice() {
            [1, _, anchors] => *anchors,
            other => return Err(anyhow!("unexpected model output shape {:?}", other)),
        };
        let data: Vec<f32> = view.iter().copied().collect();

        let detections = decode_output(&data, anchors, &geometry, params, &self.class_names)?;
        Ok(DetectionBatch {
            annotated: draw_detections(image, &detections),
            detections,
        })
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &str {
        "tract"
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn detect(&self, image: &RawImage, params: &DetectParams) -> Result<DetectionBatch> {
        self.run(image, params)
    }

    fn warm_up(&self) -> Result<()> {
        let blank = RawImage::filled(self.input_size, self.input_size, [0, 0, 0])?;
        self.run(&blank, &DetectParams::default()).map(|_| ())
    }
}
