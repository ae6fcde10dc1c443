//! # Audio Module
//!
//! Turns client-supplied encoded audio into the fixed-length buffer the
//! classifier consumes.
//!
//! ## Pipeline:
//! decode (format probed from content) -> downmix to mono -> resample to the
//! declared rate -> pad/truncate to exactly two seconds -> peak-normalize.

pub mod normalizer;

pub use normalizer::{normalize, FixedAudioBuffer, CLIP_SECONDS};
