//! # Inference Engine
//!
//! Load-once handle around the classifier, shared read-only across all
//! concurrent requests.
//!
//! The forward pass is CPU-bound and does not yield, so the engine runs it
//! on the blocking thread pool and awaits the result from the async handler.
//! The classifier's weights are immutable after load; concurrent predicts
//! need no per-handle serialization.

use crate::audio::FixedAudioBuffer;
use crate::error::{PredictError, PredictResult};
use crate::inference::classifier::HiraganaClassifier;
use candle_core::Device;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Engine state: either a loaded classifier or the degraded "no model" mode.
pub struct InferenceEngine {
    classifier: Option<Arc<HiraganaClassifier>>,
}

impl InferenceEngine {
    /// Load the classifier container at `path` and wrap it for serving.
    pub fn load(path: &Path) -> PredictResult<Self> {
        let started = Instant::now();
        let classifier = HiraganaClassifier::load(path, &Device::Cpu)?;

        info!(
            "Classifier loaded from {} in {:.2}s ({} input samples, {} classes)",
            path.display(),
            started.elapsed().as_secs_f64(),
            classifier.input_len(),
            classifier.num_classes(),
        );

        Ok(Self {
            classifier: Some(Arc::new(classifier)),
        })
    }

    /// An engine with no model: every predict fails fast with `NotLoaded`.
    pub fn unloaded() -> Self {
        Self { classifier: None }
    }

    #[cfg(test)]
    pub fn with_classifier(classifier: HiraganaClassifier) -> Self {
        Self {
            classifier: Some(Arc::new(classifier)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    /// Run one normalized buffer through the model and return softmax
    /// probabilities over the class vector.
    ///
    /// Fails fast with [`PredictError::NotLoaded`] before a successful load.
    /// The forward runs via `spawn_blocking` so a slow inference never
    /// stalls the async executor.
    pub async fn predict(&self, buffer: FixedAudioBuffer) -> PredictResult<Vec<f32>> {
        let classifier = self.classifier.clone().ok_or(PredictError::NotLoaded)?;

        let started = Instant::now();
        let probs = tokio::task::spawn_blocking(move || classifier.predict(buffer.samples()))
            .await
            .map_err(|e| PredictError::Inference(format!("inference task failed: {}", e)))??;

        debug!(
            "Inference completed in {:.1}ms",
            started.elapsed().as_secs_f64() * 1000.0
        );

        Ok(probs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::classifier::{INPUT_SAMPLES, NUM_CLASSES};
    use candle_core::DType;
    use candle_nn::{VarBuilder, VarMap};

    fn loaded_engine() -> InferenceEngine {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        InferenceEngine::with_classifier(HiraganaClassifier::new(vb, Device::Cpu).unwrap())
    }

    #[tokio::test]
    async fn test_unloaded_engine_fails_fast() {
        let engine = InferenceEngine::unloaded();
        assert!(!engine.is_loaded());

        let buffer = FixedAudioBuffer::from_samples(vec![0.0; INPUT_SAMPLES], 16000);
        let err = engine.predict(buffer).await.unwrap_err();
        assert_eq!(err.kind(), "model_not_loaded");
    }

    #[tokio::test]
    async fn test_predict_returns_class_distribution() {
        let engine = loaded_engine();
        assert!(engine.is_loaded());

        let buffer = FixedAudioBuffer::from_samples(vec![0.0; INPUT_SAMPLES], 16000);
        let probs = engine.predict(buffer).await.unwrap();

        assert_eq!(probs.len(), NUM_CLASSES);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[tokio::test]
    async fn test_predict_rejects_mismatched_buffer() {
        let engine = loaded_engine();

        // An 8 kHz window holds 16000 samples, half of what the model wants
        let buffer = FixedAudioBuffer::from_samples(vec![0.1; 16000], 8000);
        let err = engine.predict(buffer).await.unwrap_err();
        assert_eq!(err.kind(), "shape_mismatch");
    }
}
