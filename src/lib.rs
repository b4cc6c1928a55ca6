//! Echo-free stereo call recording pipeline.
//!
//! Ingests microphone and system-loopback audio as two independent streams,
//! aligns them into synchronized 10ms frame pairs, coordinates an acoustic
//! echo canceller against the aligned reference, watches for leakage that
//! AEC can't fix, applies per-channel dynamics, and writes a durable
//! stereo RIFF/WAVE file with segment recovery on I/O failure.
//!
//! # Architecture
//!
//! - [`audio::aligner`]: frame alignment and pacing between the two streams
//! - [`audio::leakage`]: sidetone/monitoring-path leakage detection
//! - [`audio::aec`]: the AEC port (native FDAF, adaptive NLMS, or identity)
//! - [`audio::dsp`]: per-channel gain, AGC, low-pass, and limiting
//! - [`audio::quantize`]: dithered 16-bit quantization
//! - [`writer`]: the durable background-thread WAV writer
//! - [`diagnostics`]: ERLE/correlation accumulation and the tone-test verdict
//! - [`finalize`]: segment merge and optional offline normalization
//! - [`pipeline::session`]: the coordinator tying C1–C9 together

pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod finalize;
pub mod pipeline;
pub mod wav;
pub mod writer;

pub use audio::format::SampleFormat;
pub use config::RecorderConfig;
pub use error::{RecorderError, Result};
pub use pipeline::messages::FinalizeResult;
pub use pipeline::session::{create_session, Session};
