//! # Error Handling
//!
//! Defines the prediction pipeline's error taxonomy and how each member is
//! surfaced over HTTP.
//!
//! ## Surfacing rules:
//! - `Unauthorized` is a transport-level rejection (HTTP 401) raised before
//!   any audio processing starts.
//! - Every other member is normally reported inside the prediction envelope
//!   (`success=false` with an `error` string, HTTP 200). The `ResponseError`
//!   impl below is only reached when a handler fails outside the envelope
//!   path, which happens for the file-upload variant's top-level failures.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Everything that can go wrong between receiving a prediction request and
/// producing a ranked result.
#[derive(Debug)]
pub enum PredictError {
    /// An API key is configured and the request presented no or a mismatched
    /// bearer credential
    Unauthorized,

    /// Malformed base64 payload or an audio byte stream that could not be
    /// parsed by any known decoder
    Decode(String),

    /// The model container was absent, unreadable, or structurally invalid
    ModelLoad(String),

    /// Predict was invoked before a model load ever succeeded
    NotLoaded,

    /// The normalized buffer does not match the model's declared input length
    ShapeMismatch { expected: usize, actual: usize },

    /// Catch-all for failures inside the inference call itself
    Inference(String),
}

impl PredictError {
    /// Machine-readable tag used in error payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::Unauthorized => "unauthorized",
            PredictError::Decode(_) => "decode_error",
            PredictError::ModelLoad(_) => "model_load_error",
            PredictError::NotLoaded => "model_not_loaded",
            PredictError::ShapeMismatch { .. } => "shape_mismatch",
            PredictError::Inference(_) => "inference_error",
        }
    }
}

impl fmt::Display for PredictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictError::Unauthorized => write!(f, "Unauthorized"),
            PredictError::Decode(msg) => write!(f, "Audio decode failed: {}", msg),
            PredictError::ModelLoad(msg) => write!(f, "Model load failed: {}", msg),
            PredictError::NotLoaded => write!(f, "Model not loaded"),
            PredictError::ShapeMismatch { expected, actual } => write!(
                f,
                "Input shape mismatch: model expects {} samples, got {}",
                expected, actual
            ),
            PredictError::Inference(msg) => write!(f, "Inference failed: {}", msg),
        }
    }
}

impl std::error::Error for PredictError {}

impl ResponseError for PredictError {
    fn error_response(&self) -> HttpResponse {
        let status = match self {
            PredictError::Unauthorized => actix_web::http::StatusCode::UNAUTHORIZED,
            _ => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<candle_core::Error> for PredictError {
    fn from(err: candle_core::Error) -> Self {
        PredictError::Inference(err.to_string())
    }
}

impl From<base64::DecodeError> for PredictError {
    fn from(err: base64::DecodeError) -> Self {
        PredictError::Decode(format!("invalid base64 payload: {}", err))
    }
}

/// Shorthand for pipeline results.
pub type PredictResult<T> = Result<T, PredictError>;
