use super::preprocess::{Preprocessor, TensorLayout};
use super::{HandDetector, LandmarkSet, LANDMARK_COUNT};
use anyhow::{bail, Context, Result};
use image::RgbImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;
use std::path::Path;

/// MediaPipe-style hand landmark model exported to ONNX
///
/// Expected outputs:
/// - 0: 21 x (x, y, z) keypoints in model input pixels, flattened to 63 values
/// - 1: hand presence score (probability or logit)
pub struct OnnxHandLandmarker {
    session: Session,
    preprocessor: Preprocessor,
    detection_confidence: f32,
}

impl OnnxHandLandmarker {
    /// Create a new landmarker from an ONNX file
    ///
    /// # Default Configuration
    /// - Input size: 224x224, NHWC
    pub fn new<P: AsRef<Path>>(model_path: P, detection_confidence: f32) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading hand landmark model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("Hand landmark model loaded successfully");

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(224, 224, TensorLayout::Nhwc),
            detection_confidence: detection_confidence.clamp(0.0, 1.0),
        })
    }

    /// Use a different input size or channel layout
    pub fn with_input(mut self, width: u32, height: u32, layout: TensorLayout) -> Self {
        self.preprocessor = Preprocessor::new(width, height, layout);
        self
    }
}

fn presence_probability(raw: f32) -> f32 {
    if (0.0..=1.0).contains(&raw) {
        raw
    } else {
        1.0 / (1.0 + (-raw).exp())
    }
}

impl HandDetector for OnnxHandLandmarker {
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>> {
        let _span = tracing::debug_span!("landmarks").entered();

        let input = self.preprocessor.preprocess(frame);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])
            .context("Failed to run inference")?;

        let (_, presence) = outputs[1].try_extract_tensor::<f32>()?;
        let score = presence.first().copied().map(presence_probability).unwrap_or(0.0);
        if score < self.detection_confidence {
            tracing::debug!("No hand (presence {:.2})", score);
            return Ok(None);
        }

        let (_, coords) = outputs[0].try_extract_tensor::<f32>()?;
        if coords.len() < LANDMARK_COUNT * 3 {
            bail!(
                "Landmark output has {} values, expected {}",
                coords.len(),
                LANDMARK_COUNT * 3
            );
        }

        let normalized: Vec<f32> = coords[..LANDMARK_COUNT * 3]
            .chunks_exact(3)
            .flat_map(|c| {
                let (x, y, z) = self.preprocessor.normalize_point(c[0], c[1], c[2]);
                [x, y, z]
            })
            .collect();

        Ok(Some(LandmarkSet::from_flat(&normalized)))
    }
}
