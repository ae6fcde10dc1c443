//! # Prediction Pipeline Handlers
//!
//! The request pipeline behind `POST /predict` and `POST /predict_file`:
//! authorize -> base64-decode -> normalize -> infer -> rank -> respond.
//!
//! ## Failure mapping:
//! - Missing/mismatched bearer credential (with a key configured): HTTP 401
//!   before any audio work
//! - Any pipeline failure after auth: a normal envelope with
//!   `success=false` and a readable `error` string, HTTP 200
//! - `/predict_file` top-level failures (multipart read problems, empty
//!   upload): transport errors
//!
//! `/predict_file` re-encodes the upload to base64 and reuses the same
//! pipeline, so both endpoints produce identical envelopes for identical
//! audio bytes.

use crate::audio;
use crate::error::{PredictError, PredictResult};
use crate::inference::ranker::{self, Prediction};
use crate::labels::CLASS_LABELS;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Ranked predictions returned per request.
const TOP_K: usize = 5;

fn default_sample_rate() -> u32 {
    16000
}

/// Request body for `POST /predict`.
#[derive(Debug, Deserialize)]
pub struct AudioRequest {
    /// Base64-encoded audio file (any common container format)
    pub audio_base64: String,

    /// Sample rate the waveform is normalized to before inference
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

/// Response envelope shared by both prediction endpoints.
#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub predictions: Vec<Prediction>,
    pub processing_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /predict`: classify a base64-encoded audio clip.
pub async fn predict(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<AudioRequest>,
) -> Result<HttpResponse, PredictError> {
    let started = Instant::now();

    authorize(&state, &req)?;

    let envelope = run_pipeline(&state, &payload, started).await;
    Ok(HttpResponse::Ok().json(envelope))
}

/// `POST /predict_file`: classify an uploaded audio file.
///
/// The upload is re-encoded to base64 and fed through the same pipeline as
/// `/predict`, so responses for identical content match.
pub async fn predict_file(
    req: HttpRequest,
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, actix_web::Error> {
    let started = Instant::now();

    authorize(&state, &req)?;

    let mut file_bytes: Vec<u8> = Vec::new();
    if let Some(mut field) = payload.try_next().await? {
        while let Some(chunk) = field.try_next().await? {
            file_bytes.extend_from_slice(&chunk);
        }
    }

    if file_bytes.is_empty() {
        return Err(PredictError::Decode("empty file upload".to_string()).into());
    }

    let request = AudioRequest {
        audio_base64: BASE64.encode(&file_bytes),
        sample_rate: default_sample_rate(),
    };

    let envelope = run_pipeline(&state, &request, started).await;
    Ok(HttpResponse::Ok().json(envelope))
}

/// Bearer-token gate, checked before any audio work so unauthenticated calls
/// cost nothing.
fn authorize(state: &AppState, req: &HttpRequest) -> PredictResult<()> {
    let config = state.get_config();
    let Some(expected) = config.auth.api_key else {
        return Ok(());
    };

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if presented == Some(format!("Bearer {}", expected).as_str()) {
        Ok(())
    } else {
        warn!("Rejected prediction request with missing or invalid credential");
        Err(PredictError::Unauthorized)
    }
}

/// Run the post-auth pipeline and fold any failure into the envelope.
async fn run_pipeline(
    state: &AppState,
    request: &AudioRequest,
    started: Instant,
) -> PredictionResponse {
    match process(state, request).await {
        Ok(predictions) => {
            let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
            if let Some(top) = predictions.first() {
                info!(
                    "Prediction completed in {:.1}ms, top candidate '{}' ({:.3})",
                    processing_time_ms, top.character, top.confidence
                );
            }
            PredictionResponse {
                success: true,
                predictions,
                processing_time_ms,
                error: None,
            }
        }
        Err(err) => {
            warn!("Prediction failed ({}): {}", err.kind(), err);
            PredictionResponse {
                success: false,
                predictions: Vec::new(),
                processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                error: Some(err.to_string()),
            }
        }
    }
}

/// decode -> normalize -> infer -> rank
async fn process(state: &AppState, request: &AudioRequest) -> PredictResult<Vec<Prediction>> {
    let audio_bytes = BASE64.decode(&request.audio_base64)?;
    let buffer = audio::normalize(&audio_bytes, request.sample_rate)?;
    let probs = state.engine.predict(buffer).await?;
    Ok(ranker::rank(&probs, CLASS_LABELS, TOP_K))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::health;
    use crate::inference::{HiraganaClassifier, InferenceEngine};
    use actix_web::{test, App};
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use std::io::Cursor;

    fn test_state(loaded: bool, api_key: Option<&str>) -> AppState {
        let mut config = AppConfig::default();
        config.auth.api_key = api_key.map(|s| s.to_string());

        let engine = if loaded {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            InferenceEngine::with_classifier(HiraganaClassifier::new(vb, Device::Cpu).unwrap())
        } else {
            InferenceEngine::unloaded()
        };

        AppState::new(config, engine)
    }

    macro_rules! test_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .route("/health", web::get().to(health::health_check))
                    .route("/predict", web::post().to(predict))
                    .route("/predict_file", web::post().to(predict_file)),
            )
            .await
        };
    }

    /// Two seconds of silence at 16 kHz, as WAV bytes.
    fn silent_wav() -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..32000 {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn multipart_body(file_bytes: &[u8], boundary: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; \
                 filename=\"clip.wav\"\r\nContent-Type: audio/wav\r\n\r\n",
                boundary
            )
            .as_bytes(),
        );
        body.extend_from_slice(file_bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        body
    }

    #[actix_web::test]
    async fn test_health_always_ok_and_reports_load_state() {
        let app = test_app!(test_state(false, None));

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_loaded"], false);
        assert!(body["timestamp"].is_string());
    }

    #[actix_web::test]
    async fn test_predict_without_credential_is_rejected() {
        let app = test_app!(test_state(true, Some("secret-key")));

        let req = test::TestRequest::post()
            .uri("/predict")
            .set_json(serde_json::json!({
                "audio_base64": BASE64.encode(silent_wav()),
                "sample_rate": 16000
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn test_predict_with_wrong_credential_is_rejected() {
        let app = test_app!(test_state(true, Some("secret-key")));

        let req = test::TestRequest::post()
            .uri("/predict")
            .insert_header((header::AUTHORIZATION, "Bearer wrong-key"))
            .set_json(serde_json::json!({
                "audio_base64": BASE64.encode(silent_wav())
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn test_predict_returns_five_ranked_predictions() {
        let app = test_app!(test_state(true, Some("secret-key")));

        let req = test::TestRequest::post()
            .uri("/predict")
            .insert_header((header::AUTHORIZATION, "Bearer secret-key"))
            .set_json(serde_json::json!({
                "audio_base64": BASE64.encode(silent_wav()),
                "sample_rate": 16000
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);

        let predictions = body["predictions"].as_array().unwrap();
        assert_eq!(predictions.len(), 5);
        let mut previous = f64::INFINITY;
        for prediction in predictions {
            let confidence = prediction["confidence"].as_f64().unwrap();
            assert!(confidence.is_finite());
            assert!(confidence <= previous);
            previous = confidence;
            assert!(!prediction["character"].as_str().unwrap().is_empty());
        }
        assert!(body["processing_time_ms"].as_f64().unwrap() >= 0.0);
    }

    #[actix_web::test]
    async fn test_predict_without_model_reports_envelope_error() {
        let app = test_app!(test_state(false, None));

        let req = test::TestRequest::post()
            .uri("/predict")
            .set_json(serde_json::json!({
                "audio_base64": BASE64.encode(silent_wav())
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        // Pipeline failures are envelope errors, not transport errors
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["predictions"].as_array().unwrap().is_empty());
        assert!(body["error"].as_str().unwrap().contains("not loaded"));
    }

    #[actix_web::test]
    async fn test_predict_with_malformed_base64_reports_envelope_error() {
        let app = test_app!(test_state(true, None));

        let req = test::TestRequest::post()
            .uri("/predict")
            .set_json(serde_json::json!({ "audio_base64": "!!not-base64!!" }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("base64"));
    }

    #[actix_web::test]
    async fn test_predict_file_matches_predict_for_same_content() {
        let state = test_state(true, None);
        let app = test_app!(state);
        let wav = silent_wav();

        let req = test::TestRequest::post()
            .uri("/predict")
            .set_json(serde_json::json!({ "audio_base64": BASE64.encode(&wav) }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let json_body: serde_json::Value = test::read_body_json(resp).await;

        let boundary = "test-boundary-7MA4YWxkTrZu0gW";
        let req = test::TestRequest::post()
            .uri("/predict_file")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            ))
            .set_payload(multipart_body(&wav, boundary))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let file_body: serde_json::Value = test::read_body_json(resp).await;

        assert_eq!(json_body["success"], file_body["success"]);
        assert_eq!(json_body["predictions"], file_body["predictions"]);
    }
}
