//! # Hiragana Classifier
//!
//! The candle model graph for the pre-trained hiragana phoneme classifier: a
//! 1-D convolutional stack over the raw two-second waveform followed by a
//! small fully-connected head.
//!
//! ## Architecture (as exported):
//! - Conv1d 1->32, kernel 80, stride 16, relu + batch norm + max-pool 4
//! - Conv1d 32->64, kernel 40, stride 2, relu + batch norm + max-pool 4
//! - Conv1d 64->128, kernel 20, stride 2, relu + batch norm
//! - Global average pool over time
//! - Linear 128->256 relu, Linear 256->128 relu, Linear 128->102 (logits)
//!
//! Weights load once from a safetensors container. All state is immutable
//! after load, so a single instance can serve concurrent forwards without
//! locking.

use crate::error::{PredictError, PredictResult};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{
    batch_norm, conv1d, linear, BatchNorm, Conv1d, Conv1dConfig, Linear, Module, ModuleT,
    VarBuilder,
};
use std::path::Path;

/// Samples in one input window (2 s at 16 kHz).
pub const INPUT_SAMPLES: usize = 32_000;

/// Width of the output logit vector.
pub const NUM_CLASSES: usize = 102;

/// Batch-norm epsilon the model was exported with.
const BN_EPS: f64 = 1e-3;

/// A loaded hiragana classifier ready for inference.
#[derive(Debug)]
pub struct HiraganaClassifier {
    conv1: Conv1d,
    bn1: BatchNorm,
    conv2: Conv1d,
    bn2: BatchNorm,
    conv3: Conv1d,
    bn3: BatchNorm,
    fc1: Linear,
    fc2: Linear,
    head: Linear,
    device: Device,
}

impl HiraganaClassifier {
    /// Build the graph from a variable source.
    pub fn new(vb: VarBuilder, device: Device) -> candle_core::Result<Self> {
        let conv1 = conv1d(
            1,
            32,
            80,
            Conv1dConfig { stride: 16, ..Default::default() },
            vb.pp("conv1"),
        )?;
        let bn1 = batch_norm(32, BN_EPS, vb.pp("bn1"))?;
        let conv2 = conv1d(
            32,
            64,
            40,
            Conv1dConfig { stride: 2, ..Default::default() },
            vb.pp("conv2"),
        )?;
        let bn2 = batch_norm(64, BN_EPS, vb.pp("bn2"))?;
        let conv3 = conv1d(
            64,
            128,
            20,
            Conv1dConfig { stride: 2, ..Default::default() },
            vb.pp("conv3"),
        )?;
        let bn3 = batch_norm(128, BN_EPS, vb.pp("bn3"))?;
        let fc1 = linear(128, 256, vb.pp("fc1"))?;
        let fc2 = linear(256, 128, vb.pp("fc2"))?;
        let head = linear(128, NUM_CLASSES, vb.pp("head"))?;

        Ok(Self {
            conv1,
            bn1,
            conv2,
            bn2,
            conv3,
            bn3,
            fc1,
            fc2,
            head,
            device,
        })
    }

    /// Load the classifier from a safetensors container on disk.
    ///
    /// Fails with [`PredictError::ModelLoad`] when the file is absent,
    /// unreadable, or does not hold the expected tensors.
    pub fn load(path: &Path, device: &Device) -> PredictResult<Self> {
        if !path.exists() {
            return Err(PredictError::ModelLoad(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device) }
            .map_err(|e| {
                PredictError::ModelLoad(format!("invalid model container {}: {}", path.display(), e))
            })?;

        Self::new(vb, device.clone()).map_err(|e| {
            PredictError::ModelLoad(format!(
                "model container {} is missing tensors: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn input_len(&self) -> usize {
        INPUT_SAMPLES
    }

    pub fn num_classes(&self) -> usize {
        NUM_CLASSES
    }

    /// Forward pass over a `(batch, INPUT_SAMPLES)` waveform tensor,
    /// producing `(batch, NUM_CLASSES)` logits.
    pub fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, len) = xs.dims2()?;
        let xs = xs.reshape((batch, 1, len))?;

        let xs = self.bn1.forward_t(&self.conv1.forward(&xs)?.relu()?, false)?;
        let xs = max_pool1d(&xs, 4)?;
        let xs = self.bn2.forward_t(&self.conv2.forward(&xs)?.relu()?, false)?;
        let xs = max_pool1d(&xs, 4)?;
        let xs = self.bn3.forward_t(&self.conv3.forward(&xs)?.relu()?, false)?;

        // Global average pool over the time axis
        let xs = xs.mean(D::Minus1)?;

        let xs = self.fc1.forward(&xs)?.relu()?;
        let xs = self.fc2.forward(&xs)?.relu()?;
        self.head.forward(&xs)
    }

    /// Run a single waveform through the model and return softmax
    /// probabilities over the class vector.
    ///
    /// The sample count must match the model's declared input length
    /// exactly; anything else fails with [`PredictError::ShapeMismatch`].
    pub fn predict(&self, samples: &[f32]) -> PredictResult<Vec<f32>> {
        if samples.len() != INPUT_SAMPLES {
            return Err(PredictError::ShapeMismatch {
                expected: INPUT_SAMPLES,
                actual: samples.len(),
            });
        }

        let input = Tensor::from_vec(samples.to_vec(), (1, INPUT_SAMPLES), &self.device)?;
        let logits = self.forward(&input)?;
        let probs = candle_nn::ops::softmax_last_dim(&logits)?;
        Ok(probs.squeeze(0)?.to_vec1::<f32>()?)
    }
}

/// Max-pool along the last axis of a `(batch, channels, len)` tensor.
fn max_pool1d(xs: &Tensor, kernel: usize) -> candle_core::Result<Tensor> {
    xs.unsqueeze(2)?.max_pool2d((1, kernel))?.squeeze(2)
}
