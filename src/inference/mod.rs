//! # Inference Module
//!
//! Wraps the pre-trained hiragana classifier and turns its raw output into
//! ranked, labeled predictions.
//!
//! ## Key components:
//! - **Classifier**: the candle model graph, loaded once from a safetensors
//!   container
//! - **Engine**: load-once/predict-many handle shared read-only across
//!   requests; forwards run on the blocking thread pool
//! - **Ranker**: top-K selection against the label table

pub mod classifier;
pub mod engine;
pub mod ranker;

pub use classifier::HiraganaClassifier;
pub use engine::InferenceEngine;
pub use ranker::{rank, Prediction};
