//! Post-Processor (C5): per-channel gain, dynamic normalization, low-pass
//! filtering, lookahead limiting, and a hard ceiling clamp.
//!
//! Applied independently to the near and far frames after AEC, in the fixed
//! order: static gain → dynamic normalization → low-pass → lookahead limiter
//! → hard ceiling clamp. All state (smoothed gain, filter history, lookahead
//! delay line) is per-channel and per-session; nothing module-level.

use std::collections::VecDeque;

use crate::audio::biquad::Biquad;
use crate::config::{DspConfig, FilterConfig, LimiterConfig};

/// One channel's worth of post-processing state (near or far get their own).
pub struct ChannelProcessor {
    static_gain_linear: f32,
    normalize: bool,
    target_rms_dbfs: f32,
    max_gain_db: f32,
    attack_coeff: f32,
    release_coeff: f32,
    smoothed_gain_db: f32,

    low_pass: Option<Biquad>,

    limiter: Option<Limiter>,

    ceiling_linear: f32,
    /// Count of samples at or above 99.9% of the ceiling.
    pub clip_hits: u64,
}

impl ChannelProcessor {
    /// Build a processor for one channel from the session's DSP/filter/limiter config.
    pub fn new(
        static_gain_db: f32,
        dsp: &DspConfig,
        filter: &FilterConfig,
        limiter: &LimiterConfig,
        rate_hz: u32,
    ) -> Self {
        let frame_ms = dsp.frame_ms.max(1) as f32;
        let attack_coeff = (-frame_ms / dsp.attack_ms.max(1.0)).exp();
        let release_coeff = (-frame_ms / dsp.release_ms.max(1.0)).exp();

        let low_pass = filter.low_pass.then(|| {
            let cutoff = filter
                .low_pass_hz
                .clamp(2_000.0, (rate_hz as f32 / 2.0) - 100.0);
            Biquad::low_pass(cutoff, rate_hz)
        });

        let limiter_state = limiter.enable_limiter.then(|| {
            Limiter::new(
                limiter.limiter_ceiling_dbfs,
                limiter.limiter_lookahead_ms,
                limiter.limiter_release_ms,
                limiter.soft_knee_limiter,
                rate_hz,
            )
        });

        Self {
            static_gain_linear: db_to_linear(static_gain_db),
            normalize: dsp.normalize,
            target_rms_dbfs: dsp.target_rms_dbfs,
            max_gain_db: dsp.max_gain_db,
            attack_coeff,
            release_coeff,
            smoothed_gain_db: 0.0,
            low_pass,
            limiter: limiter_state,
            ceiling_linear: db_to_linear(limiter.limiter_ceiling_dbfs),
            clip_hits: 0,
        }
    }

    /// Process one frame in place.
    pub fn process(&mut self, frame: &mut [f32]) {
        for s in frame.iter_mut() {
            *s *= self.static_gain_linear;
        }

        if self.normalize {
            let current_db = dbfs(rms(frame));
            let needed_db = (self.target_rms_dbfs - current_db).clamp(0.0, self.max_gain_db);
            let coeff = if needed_db > self.smoothed_gain_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.smoothed_gain_db = coeff * self.smoothed_gain_db + (1.0 - coeff) * needed_db;
            let gain_linear = db_to_linear(self.smoothed_gain_db);
            for s in frame.iter_mut() {
                *s *= gain_linear;
            }
        }

        if let Some(lp) = self.low_pass.as_mut() {
            lp.process_frame(frame);
        }

        if let Some(lim) = self.limiter.as_mut() {
            lim.process(frame);
        }

        for s in frame.iter_mut() {
            if s.abs() >= 0.999 * self.ceiling_linear {
                self.clip_hits += 1;
            }
            *s = s.clamp(-self.ceiling_linear, self.ceiling_linear);
        }
    }
}

/// Lookahead peak limiter: a delay line equal to the lookahead window, with
/// smoothed gain reduction computed from the peak of the lookahead buffer so
/// gain reduction precedes the peak it is taming.
struct Limiter {
    ceiling_linear: f32,
    delay: VecDeque<f32>,
    lookahead_buf: VecDeque<f32>,
    release_coeff: f32,
    soft_knee: bool,
    current_gain: f32,
}

impl Limiter {
    fn new(ceiling_dbfs: f32, lookahead_ms: f32, release_ms: f32, soft_knee: bool, rate_hz: u32) -> Self {
        let lookahead_samples = ((lookahead_ms / 1000.0) * rate_hz as f32).round().max(1.0) as usize;
        Self {
            ceiling_linear: db_to_linear(ceiling_dbfs),
            delay: VecDeque::from(vec![0.0; lookahead_samples]),
            lookahead_buf: VecDeque::with_capacity(lookahead_samples),
            release_coeff: (-1.0 / release_ms.max(1.0)).exp(),
            soft_knee,
            current_gain: 1.0,
        }
    }

    fn process(&mut self, frame: &mut [f32]) {
        for sample in frame.iter_mut() {
            let x = *sample;

            self.lookahead_buf.push_back(x);
            if self.lookahead_buf.len() > self.delay.len() {
                self.lookahead_buf.pop_front();
            }
            let peak = self
                .lookahead_buf
                .iter()
                .fold(0.0f32, |acc, s| acc.max(s.abs()));

            let target_gain = if peak > self.ceiling_linear {
                let raw = self.ceiling_linear / peak;
                if self.soft_knee {
                    let ratio = peak / self.ceiling_linear;
                    raw.powf(1.0 / ratio.max(1.0))
                } else {
                    raw
                }
            } else {
                1.0
            };

            self.current_gain = if target_gain < self.current_gain {
                target_gain
            } else {
                self.release_coeff * self.current_gain + (1.0 - self.release_coeff) * target_gain
            };

            self.delay.push_back(x);
            let delayed = self.delay.pop_front().unwrap_or(0.0);
            *sample = delayed * self.current_gain;
        }
    }
}

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

fn dbfs(rms: f32) -> f32 {
    if rms <= 1e-12 {
        -120.0
    } else {
        20.0 * rms.log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(n: usize, amp: f32, freq: f32, rate: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin())
            .collect()
    }

    #[test]
    fn static_gain_scales_samples() {
        let dsp = DspConfig::default();
        let filter = FilterConfig::default();
        let limiter = LimiterConfig {
            enable_limiter: false,
            ..LimiterConfig::default()
        };
        let mut proc = ChannelProcessor::new(6.0, &dsp, &filter, &limiter, 48_000);
        let mut frame = vec![0.1, -0.1];
        proc.process(&mut frame);
        assert!((frame[0] - 0.1 * db_to_linear(6.0)).abs() < 1e-5);
    }

    #[test]
    fn normalization_boosts_quiet_signal_toward_target() {
        let dsp = DspConfig {
            normalize: true,
            attack_ms: 1.0,
            release_ms: 1.0,
            ..DspConfig::default()
        };
        let filter = FilterConfig::default();
        let limiter = LimiterConfig {
            enable_limiter: false,
            ..LimiterConfig::default()
        };
        let mut proc = ChannelProcessor::new(0.0, &dsp, &filter, &limiter, 48_000);
        let mut last_rms = 0.0;
        for _ in 0..200 {
            let mut frame = tone(480, 0.01, 300.0, 48_000.0);
            proc.process(&mut frame);
            last_rms = rms(&frame);
        }
        assert!(last_rms > 0.01, "expected normalization to raise level, got {last_rms}");
    }

    #[test]
    fn low_pass_reduces_high_frequency_energy() {
        let dsp = DspConfig::default();
        let filter = FilterConfig {
            low_pass: true,
            low_pass_hz: 1_000.0,
        };
        let limiter = LimiterConfig {
            enable_limiter: false,
            ..LimiterConfig::default()
        };
        let mut proc = ChannelProcessor::new(0.0, &dsp, &filter, &limiter, 48_000);
        let mut frame = tone(4800, 0.8, 15_000.0, 48_000.0);
        let input_rms = rms(&frame);
        proc.process(&mut frame);
        assert!(rms(&frame) < input_rms * 0.5);
    }

    #[test]
    fn limiter_keeps_peaks_under_ceiling() {
        let dsp = DspConfig::default();
        let filter = FilterConfig::default();
        let limiter_cfg = LimiterConfig {
            enable_limiter: true,
            limiter_ceiling_dbfs: -1.0,
            limiter_lookahead_ms: 4.0,
            limiter_release_ms: 60.0,
            soft_knee_limiter: false,
        };
        let mut proc = ChannelProcessor::new(0.0, &dsp, &filter, &limiter_cfg, 48_000);
        let ceiling = db_to_linear(-1.0);
        for _ in 0..20 {
            let mut frame = tone(480, 1.2, 300.0, 48_000.0);
            proc.process(&mut frame);
            for s in &frame {
                assert!(s.abs() <= ceiling + 1e-4, "sample {s} exceeded ceiling {ceiling}");
            }
        }
    }

    #[test]
    fn hard_ceiling_clamps_and_counts_clip_hits() {
        let dsp = DspConfig::default();
        let filter = FilterConfig::default();
        let limiter = LimiterConfig {
            enable_limiter: false,
            limiter_ceiling_dbfs: -3.0,
            ..LimiterConfig::default()
        };
        let mut proc = ChannelProcessor::new(0.0, &dsp, &filter, &limiter, 48_000);
        let mut frame = vec![1.5, -1.5, 0.0];
        proc.process(&mut frame);
        let ceiling = db_to_linear(-3.0);
        assert!((frame[0] - ceiling).abs() < 1e-5);
        assert!((frame[1] + ceiling).abs() < 1e-5);
        assert_eq!(proc.clip_hits, 2);
    }
}
