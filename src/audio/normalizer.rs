//! # Audio Normalization
//!
//! Decodes an arbitrary encoded audio byte stream into a mono waveform at the
//! declared sample rate and fits it to the classifier's fixed two-second
//! window.
//!
//! ## Key steps:
//! - **Decode**: symphonia probes the container format from content (WAV,
//!   MP3, FLAC, AAC, Vorbis, ...) and yields interleaved f32 samples
//! - **Downmix**: multi-channel input is averaged per frame to mono
//! - **Resample**: rubato converts the source rate to the declared rate
//! - **Fit**: shorter clips are right-padded with zeros, longer clips keep
//!   only their first two seconds
//! - **Peak-normalize**: samples are scaled so the maximum absolute value is
//!   1.0; silent input is left all-zero
//!
//! The whole path is a pure transformation with no shared state.

use crate::error::{PredictError, PredictResult};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Fixed clip duration every buffer is normalized to.
pub const CLIP_SECONDS: usize = 2;

/// A mono waveform of exactly `sample_rate * CLIP_SECONDS` samples with peak
/// amplitude 1.0 (or all-zero for silent input).
#[derive(Debug, Clone, PartialEq)]
pub struct FixedAudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl FixedAudioBuffer {
    /// Sample count a buffer at `sample_rate` is normalized to.
    pub fn target_len(sample_rate: u32) -> usize {
        sample_rate as usize * CLIP_SECONDS
    }

    /// Fit a decoded waveform to the fixed window and peak-normalize it.
    ///
    /// Truncation keeps the first `target_len` samples; padding appends
    /// zeros. The peak is measured after fitting, so a loud tail that gets
    /// truncated away does not influence the scale.
    pub fn from_samples(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        samples.resize(Self::target_len(sample_rate), 0.0);

        let peak = samples.iter().fold(0.0f32, |max, s| max.max(s.abs()));
        if peak > 0.0 {
            for sample in &mut samples {
                *sample /= peak;
            }
        }

        Self { samples, sample_rate }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Decode `raw_bytes` as an audio file and normalize it to the fixed window
/// at `sample_rate`.
///
/// Fails with [`PredictError::Decode`] when the bytes cannot be parsed as
/// audio or the declared rate is unusable.
pub fn normalize(raw_bytes: &[u8], sample_rate: u32) -> PredictResult<FixedAudioBuffer> {
    if sample_rate == 0 {
        return Err(PredictError::Decode(
            "declared sample rate must be positive".to_string(),
        ));
    }

    let (interleaved, source_rate, channels) = decode_bytes(raw_bytes)?;
    let mono = downmix_mono(&interleaved, channels);
    let resampled = resample(mono, source_rate, sample_rate)?;

    Ok(FixedAudioBuffer::from_samples(resampled, sample_rate))
}

/// Decode an encoded byte stream into interleaved f32 samples.
///
/// Returns the samples together with the source sample rate and channel
/// count. The container format is probed from content, no filename hint is
/// available for in-memory payloads.
fn decode_bytes(raw_bytes: &[u8]) -> PredictResult<(Vec<f32>, u32, usize)> {
    let mss = MediaSourceStream::new(
        Box::new(Cursor::new(raw_bytes.to_vec())),
        Default::default(),
    );

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PredictError::Decode(format!("unrecognized audio format: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PredictError::Decode("no audio track found".to_string()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| PredictError::Decode("source sample rate not declared".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| PredictError::Decode(format!("unsupported codec: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(1);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                warn!("Stopping decode early: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    channels = spec.channels.count();
                    sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = &mut sample_buf {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                // Recoverable per-packet corruption, skip the packet
                warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => {
                warn!("Stopping decode early: {}", e);
                break;
            }
        }
    }

    debug!(
        "Decoded {} samples ({} Hz, {} channels)",
        samples.len(),
        source_rate,
        channels
    );

    Ok((samples, source_rate, channels))
}

/// Average interleaved frames down to a single channel.
fn downmix_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample a mono waveform from `input_rate` to `output_rate`.
///
/// Matching rates (and empty input) pass through untouched. Clips are short
/// enough to process as a single fixed chunk.
fn resample(mono: Vec<f32>, input_rate: u32, output_rate: u32) -> PredictResult<Vec<f32>> {
    if input_rate == output_rate || mono.is_empty() {
        return Ok(mono);
    }

    debug!("Resampling from {} Hz to {} Hz", input_rate, output_rate);

    let mut resampler = FastFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        mono.len(),
        1,
    )
    .map_err(|e| PredictError::Decode(format!("failed to create resampler: {}", e)))?;

    let mut output = resampler
        .process(&[mono], None)
        .map_err(|e| PredictError::Decode(format!("resampling failed: {}", e)))?;

    Ok(output.remove(0))
}
