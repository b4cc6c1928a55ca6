//! AEC Port (C3): a tagged-enum abstraction over three echo-cancellation arms.
//!
//! ```text
//! far frame --> feed_far --\
//!                           +--> [AecPort] --> process_near --> cancelled near frame
//! near frame -------------/
//! ```
//!
//! Selection happens once at session start: [`AecArm::Native`] (a real
//! frequency-domain adaptive filter) is tried first, falling back to
//! [`AecArm::Adaptive`] (the normalized-LMS filter specified below) if
//! construction fails, or to [`AecArm::Identity`] if echo cancellation is
//! disabled entirely. A tagged enum rather than a trait object, deliberately:
//! there are exactly three arms and they never grow a hierarchy.

use std::collections::VecDeque;

use crate::audio::biquad::Biquad;
use crate::config::{AecSettings, SuppressionLevel};

/// Stream delay is always clamped to this range before being handed to an arm.
pub const MAX_STREAM_DELAY_MS: u32 = 200;

/// Echo cancellation port.
pub struct AecPort {
    arm: AecArm,
    frame_size: usize,
    stream_delay_ms: u32,
}

enum AecArm {
    Native(NativeAec),
    Adaptive(AdaptiveAec),
    Identity,
}

impl AecPort {
    /// Construct the port for a session, selecting the best available arm.
    pub fn configure(cfg: &AecSettings, rate_hz: u32, frame_ms: u32) -> Self {
        let frame_size = ((rate_hz as u64 * frame_ms as u64) / 1000) as usize;

        let arm = if !cfg.echo_cancellation {
            AecArm::Identity
        } else {
            match NativeAec::new() {
                Ok(native) => AecArm::Native(native),
                Err(_) => AecArm::Adaptive(AdaptiveAec::new(cfg, rate_hz)),
            }
        };

        Self {
            arm,
            frame_size: frame_size.max(1),
            stream_delay_ms: cfg.initial_delay_ms.min(MAX_STREAM_DELAY_MS),
        }
    }

    /// Force the adaptive (NLMS) arm regardless of native availability. Used
    /// by callers (and tests) that need the normative fallback behavior.
    pub fn configure_adaptive(cfg: &AecSettings, rate_hz: u32, frame_ms: u32) -> Self {
        let frame_size = ((rate_hz as u64 * frame_ms as u64) / 1000) as usize;
        Self {
            arm: AecArm::Adaptive(AdaptiveAec::new(cfg, rate_hz)),
            frame_size: frame_size.max(1),
            stream_delay_ms: cfg.initial_delay_ms.min(MAX_STREAM_DELAY_MS),
        }
    }

    /// Feed a far-end reference frame. Must be called before the matching
    /// `process_near` for the same logical frame index.
    pub fn feed_far(&mut self, far: &[f32]) {
        match &mut self.arm {
            AecArm::Native(n) => n.feed_far(far),
            AecArm::Adaptive(a) => a.feed_far(far),
            AecArm::Identity => {}
        }
    }

    /// Cancel echo from a near-end frame. `out` is filled with exactly
    /// `near.len()` samples.
    pub fn process_near(&mut self, near: &[f32], out: &mut [f32]) {
        debug_assert_eq!(near.len(), out.len());
        match &mut self.arm {
            AecArm::Native(n) => n.process_near(near, out),
            AecArm::Adaptive(a) => a.process_near(near, out),
            AecArm::Identity => out.copy_from_slice(near),
        }
    }

    /// Update the stream delay estimate, clamped to `[0, 200]` ms.
    pub fn set_stream_delay_ms(&mut self, ms: i64) {
        self.stream_delay_ms = ms.clamp(0, MAX_STREAM_DELAY_MS as i64) as u32;
    }

    /// Current clamped stream delay estimate.
    pub fn stream_delay_ms(&self) -> u32 {
        self.stream_delay_ms
    }

    /// Frame size this port was configured for.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Human-readable arm name, for diagnostics/logging.
    pub fn arm_name(&self) -> &'static str {
        match &self.arm {
            AecArm::Native(_) => "native",
            AecArm::Adaptive(_) => "adaptive",
            AecArm::Identity => "identity",
        }
    }
}

/// Native arm: wraps [`fdaf_aec::FdafAec`], buffering the far reference
/// internally so `feed_far`/`process_near` stay decoupled. Sub-frame
/// remainders (when the session frame size is not a multiple of the
/// filter's internal chunk size) pass through unprocessed.
struct NativeAec {
    filter: fdaf_aec::FdafAec,
    pending_far: VecDeque<f32>,
    sub_frame_size: usize,
}

impl NativeAec {
    fn new() -> Result<Self, ()> {
        let fft_size = 1024usize;
        let filter = fdaf_aec::FdafAec::new(fft_size, 0.1);
        Ok(Self {
            filter,
            pending_far: VecDeque::new(),
            sub_frame_size: fft_size / 2,
        })
    }

    fn feed_far(&mut self, far: &[f32]) {
        self.pending_far.extend(far.iter().copied());
    }

    fn process_near(&mut self, near: &[f32], out: &mut [f32]) {
        let sub = self.sub_frame_size;
        let mut offset = 0;
        while offset + sub <= near.len() {
            let mic_frame = &near[offset..offset + sub];
            let mut ref_frame = Vec::with_capacity(sub);
            for _ in 0..sub {
                ref_frame.push(self.pending_far.pop_front().unwrap_or(0.0));
            }
            let cleaned = self.filter.process(&ref_frame, mic_frame);
            let n = sub.min(cleaned.len());
            out[offset..offset + n].copy_from_slice(&cleaned[..n]);
            offset += sub;
        }
        if offset < near.len() {
            out[offset..].copy_from_slice(&near[offset..]);
        }
    }
}

/// Adaptive fallback arm: a normalized-LMS echo canceller — tap length
/// covering ~45 ms of reference history, double-talk-gated step size,
/// weight/gradient clipping, an optional post-cancellation high-pass, and an
/// optional energy-gated residual suppressor at the highest suppression
/// level.
struct AdaptiveAec {
    weights: Vec<f32>,
    tapline: VecDeque<f32>,
    pending_far: VecDeque<f32>,
    tap_energy: f32,
    mu: f32,
    eps: f32,
    smoothed_error_pow: f32,
    smoothed_ref_pow: f32,
    high_pass: Option<Biquad>,
    residual_suppression: bool,
}

const WEIGHT_CLIP: f32 = 2.0;
const GRADIENT_CLIP: f32 = 0.5;
/// Error/reference power ratio above which we assume near-end speech is
/// present on top of the echo and freeze adaptation. An unconverged filter
/// on pure echo already shows a ratio near 1.0 (the error is the
/// uncancelled echo itself), so the threshold sits above that rather than
/// at the naive midpoint.
const DOUBLE_TALK_RATIO_THRESHOLD: f32 = 1.5;

impl AdaptiveAec {
    fn new(cfg: &AecSettings, rate_hz: u32) -> Self {
        let taps = ((0.045 * rate_hz as f32) as usize).max(64);
        Self {
            weights: vec![0.0; taps],
            tapline: VecDeque::with_capacity(taps),
            pending_far: VecDeque::new(),
            tap_energy: 0.0,
            mu: 0.25,
            eps: 1e-8,
            smoothed_error_pow: 0.0,
            smoothed_ref_pow: 0.0,
            high_pass: cfg.high_pass.then(|| Biquad::high_pass(cfg.high_pass_hz, rate_hz)),
            residual_suppression: cfg.suppression_level == SuppressionLevel::VeryHigh,
        }
    }

    fn feed_far(&mut self, far: &[f32]) {
        self.pending_far.extend(far.iter().copied());
    }

    fn process_near(&mut self, near: &[f32], out: &mut [f32]) {
        let m = self.weights.len();
        let alpha = 0.05; // one-pole smoothing for the double-talk power ratio

        for (i, &n) in near.iter().enumerate() {
            let x_new = self.pending_far.pop_front().unwrap_or(0.0);

            self.tapline.push_front(x_new);
            self.tap_energy += x_new * x_new;
            if self.tapline.len() > m
                && let Some(old) = self.tapline.pop_back() {
                    self.tap_energy -= old * old;
                }

            let y: f32 = self
                .tapline
                .iter()
                .zip(self.weights.iter())
                .map(|(x, w)| x * w)
                .sum();
            let e = n - y;

            self.smoothed_error_pow = (1.0 - alpha) * self.smoothed_error_pow + alpha * e * e;
            self.smoothed_ref_pow = (1.0 - alpha) * self.smoothed_ref_pow + alpha * x_new * x_new;
            let ratio = self.smoothed_error_pow / (self.smoothed_ref_pow + self.eps);

            // Double talk (both parties active) shows up as a high
            // error/reference power ratio; freeze adaptation rather than let
            // the filter chase the near-end voice.
            if ratio <= DOUBLE_TALK_RATIO_THRESHOLD {
                let step = if ratio < 0.1 { self.mu * 2.0 } else { self.mu };
                let norm = self.tap_energy.max(0.0) + self.eps;
                let g = (step * e / norm).clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
                for (w, x) in self.weights.iter_mut().zip(self.tapline.iter()) {
                    *w = (*w + g * x).clamp(-WEIGHT_CLIP, WEIGHT_CLIP);
                }
            }

            out[i] = e;
        }

        if let Some(hp) = self.high_pass.as_mut() {
            hp.process_frame(out);
        }

        if self.residual_suppression {
            apply_energy_gated_suppression(out, near);
        }
    }
}

/// Energy-gated residual-echo suppression: when the post-cancellation
/// residual still carries most of the pre-cancellation energy, scale it
/// down proportionally. A frame-level stand-in for per-bin spectral
/// subtraction, applied only at [`SuppressionLevel::VeryHigh`].
fn apply_energy_gated_suppression(out: &mut [f32], near: &[f32]) {
    if out.is_empty() {
        return;
    }
    let residual_energy: f32 = out.iter().map(|s| s * s).sum::<f32>() / out.len() as f32;
    let near_energy: f32 = near.iter().map(|s| s * s).sum::<f32>() / near.len() as f32;
    if near_energy <= 1e-12 {
        return;
    }
    let leak_ratio = residual_energy / near_energy;
    let gate = (1.0 - leak_ratio).clamp(0.2, 1.0);
    for s in out.iter_mut() {
        *s *= gate;
    }
}
