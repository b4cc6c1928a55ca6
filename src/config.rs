//! Configuration types for the call recording pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RecorderError, Result};

/// Top-level configuration for a recording session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Output sink location and format.
    pub recording: RecordingConfig,
    /// Framing and gain-staging settings.
    pub dsp: DspConfig,
    /// Post-LPF settings.
    pub filter: FilterConfig,
    /// Lookahead limiter settings.
    pub limiter: LimiterConfig,
    /// Quantization dither settings.
    pub dither: DitherConfig,
    /// Echo cancellation settings.
    pub aec: AecSettings,
    /// Diagnostic accumulation and dump settings.
    pub diagnostics: DiagnosticsConfig,
    /// Finalize-time behavior.
    pub finalize: FinalizeConfig,
}

impl RecorderConfig {
    /// Load configuration from an optional TOML file, falling back to
    /// defaults for any missing section or key.
    ///
    /// A missing file is not an error — it simply yields [`RecorderConfig::default`].
    /// A present-but-malformed file is.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| RecorderError::Config(format!("{}: {e}", path.display())))
    }

    /// Normalize out-of-range values to safe defaults, logging once per
    /// coerced field. Configuration errors never fail session creation.
    pub fn coerced(mut self) -> Self {
        let r = &mut self.recording;
        let original_rate = r.sample_rate;
        r.sample_rate = match r.sample_rate {
            48_000 | 44_100 => r.sample_rate,
            other => {
                tracing::info!(requested_hz = other, "coercing sample rate to 48000 Hz");
                48_000
            }
        };
        debug_assert!(r.sample_rate == original_rate || r.sample_rate == 48_000);

        if self.dsp.frame_ms == 0 {
            tracing::info!("coercing frame_ms from 0 to 1");
            self.dsp.frame_ms = 1;
        }
        self
    }
}

/// Output sample width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitsPerSample {
    /// 16-bit signed PCM with optional dither.
    #[default]
    Sixteen,
    /// 32-bit IEEE float, written verbatim.
    Float32,
}

/// Output sink location and format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Root directory under which `Calls/YYYY/MM/DD/...` segments are created.
    pub output_dir: PathBuf,
    /// Pipeline sample rate in Hz (48 000 preferred, 44 100 accepted).
    pub sample_rate: u32,
    /// Output sample width.
    pub bits_per_sample: BitsPerSample,
    /// Seconds of pre-buffer retained before the session officially starts.
    ///
    /// Reserved for a future ring-buffer pre-roll; the core pipeline itself
    /// has no pre-buffer of its own to flush.
    pub pre_buffer_s: f32,
    /// Milliseconds to discard from the head of each side at session start.
    pub discard_initial_ms: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            sample_rate: 48_000,
            bits_per_sample: BitsPerSample::Sixteen,
            pre_buffer_s: 0.0,
            discard_initial_ms: 0,
        }
    }
}

/// Framing and gain-staging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DspConfig {
    /// Frame duration in milliseconds.
    pub frame_ms: u32,
    /// Static near-channel gain in dB.
    pub near_gain_db: f32,
    /// Static far-channel gain in dB.
    pub far_gain_db: f32,
    /// Whether dynamic RMS normalization is enabled.
    pub normalize: bool,
    /// Target RMS level in dBFS for dynamic normalization.
    pub target_rms_dbfs: f32,
    /// Maximum dynamic gain in dB.
    pub max_gain_db: f32,
    /// Attack time constant in ms (gain increasing).
    pub attack_ms: f32,
    /// Release time constant in ms (gain decreasing).
    pub release_ms: f32,
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            frame_ms: 10,
            near_gain_db: 0.0,
            far_gain_db: 0.0,
            normalize: false,
            target_rms_dbfs: -20.0,
            max_gain_db: 18.0,
            attack_ms: 50.0,
            release_ms: 300.0,
        }
    }
}

/// Post-LPF settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Whether the post low-pass filter is enabled.
    pub low_pass: bool,
    /// Cutoff frequency in Hz, clamped to `[2000, R/2 - 100]` at use time.
    pub low_pass_hz: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            low_pass: false,
            low_pass_hz: 9_000.0,
        }
    }
}

/// Lookahead limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Whether the lookahead limiter is enabled.
    pub enable_limiter: bool,
    /// Ceiling in dBFS; samples above this are never allowed through.
    pub limiter_ceiling_dbfs: f32,
    /// Lookahead window in milliseconds.
    pub limiter_lookahead_ms: f32,
    /// Gain-reduction release time in milliseconds.
    pub limiter_release_ms: f32,
    /// Whether to use an exponential soft-knee instead of a hard knee.
    pub soft_knee_limiter: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enable_limiter: true,
            limiter_ceiling_dbfs: -1.0,
            limiter_lookahead_ms: 4.0,
            limiter_release_ms: 60.0,
            soft_knee_limiter: false,
        }
    }
}

/// Quantization dither type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DitherType {
    /// Triangular probability-density-function dither (two summed uniforms).
    #[default]
    TriangularPdf,
    /// Rectangular (single uniform) dither.
    RectangularPdf,
}

/// Quantization dither settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DitherConfig {
    /// Whether dithering is applied before 16-bit quantization.
    pub enable_dithering: bool,
    /// Dither probability density shape.
    pub dither_type: DitherType,
    /// Dither amplitude in dB relative to full scale.
    pub dither_amount_db: f32,
}

impl Default for DitherConfig {
    fn default() -> Self {
        Self {
            enable_dithering: true,
            dither_type: DitherType::TriangularPdf,
            dither_amount_db: -96.0,
        }
    }
}

/// AEC suppression aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SuppressionLevel {
    /// Minimal residual-echo suppression beyond the adaptive filter itself.
    Low,
    /// Default suppression.
    #[default]
    Moderate,
    /// Aggressive suppression; more likely to clip quiet near-end speech.
    High,
    /// Enables the energy-gated spectral-subtraction residual suppressor.
    VeryHigh,
}

/// Echo cancellation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AecSettings {
    /// Whether echo cancellation is enabled at all.
    pub echo_cancellation: bool,
    /// Suppression aggressiveness.
    pub suppression_level: SuppressionLevel,
    /// Initial stream delay estimate in ms, before any pairs have been observed.
    pub initial_delay_ms: u32,
    /// Whether a post-cancellation high-pass filter is applied (adaptive arm only).
    pub high_pass: bool,
    /// High-pass cutoff in Hz.
    pub high_pass_hz: f32,
}

impl Default for AecSettings {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            suppression_level: SuppressionLevel::Moderate,
            initial_delay_ms: 0,
            high_pass: true,
            high_pass_hz: 80.0,
        }
    }
}

/// Diagnostic accumulation and dump settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Whether per-stream mono WAV dumps are written alongside the main output.
    pub diag_enable_mono_dumps: bool,
    /// Whether the test-tone pass/fail verdict is computed at finalize.
    pub diag_test_tone_check: bool,
}

/// Finalize-time behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeConfig {
    /// Whether to run the two-pass offline normalization after merge.
    pub post_normalize: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_48khz_and_stable() {
        let cfg = RecorderConfig::default();
        assert_eq!(cfg.recording.sample_rate, 48_000);
        assert_eq!(cfg.dsp.frame_ms, 10);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = RecorderConfig::load(Some(Path::new("/nonexistent/path.toml"))).unwrap();
        assert_eq!(cfg.recording.sample_rate, 48_000);
    }

    #[test]
    fn coerces_unsupported_rate() {
        let mut cfg = RecorderConfig::default();
        cfg.recording.sample_rate = 32_000;
        let cfg = cfg.coerced();
        assert_eq!(cfg.recording.sample_rate, 48_000);
    }

    #[test]
    fn accepts_44100() {
        let mut cfg = RecorderConfig::default();
        cfg.recording.sample_rate = 44_100;
        let cfg = cfg.coerced();
        assert_eq!(cfg.recording.sample_rate, 44_100);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = RecorderConfig::default();
        let text = toml::to_string(&cfg).expect("serialize");
        let parsed: RecorderConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.recording.sample_rate, cfg.recording.sample_rate);
    }
}
