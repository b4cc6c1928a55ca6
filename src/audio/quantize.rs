//! Dither + Quantizer (C6): dithered 16-bit PCM (or verbatim float32) output.
//!
//! The dither RNG is per-session, seeded once at session creation — never a
//! process-wide generator — so repeated sessions within one process never
//! share hidden state.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::DitherType;

/// Per-session quantizer state: owns the dither RNG.
pub struct Quantizer {
    dither_type: DitherType,
    amplitude: f32,
    enabled: bool,
    rng: StdRng,
}

impl Quantizer {
    /// `dither_amount_db` is typically `-96.0`; `enabled` gates dithering
    /// without disabling quantization itself.
    pub fn new(enabled: bool, dither_type: DitherType, dither_amount_db: f32, seed: u64) -> Self {
        Self {
            dither_type,
            amplitude: 10f32.powf(dither_amount_db / 20.0),
            enabled,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Quantize one float32 frame to interleaved little-endian 16-bit PCM bytes.
    pub fn quantize_i16(&mut self, samples: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            let dithered = if self.enabled {
                s + self.dither_sample()
            } else {
                s
            };
            let clamped = dithered.clamp(-1.0, 1.0);
            let scaled = clamped * 32_767.0;
            let rounded = round_half_away_from_zero(scaled);
            let quantized = rounded.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            out.extend_from_slice(&quantized.to_le_bytes());
        }
        out
    }

    fn dither_sample(&mut self) -> f32 {
        match self.dither_type {
            DitherType::TriangularPdf => {
                let u1: f32 = self.rng.gen_range(0.0..1.0);
                let u2: f32 = self.rng.gen_range(0.0..1.0);
                (u1 - u2) * self.amplitude
            }
            DitherType::RectangularPdf => {
                let u: f32 = self.rng.gen_range(0.0..1.0);
                (u - 0.5) * 2.0 * self.amplitude
            }
        }
    }
}

/// Float32 output is written verbatim — no dithering, no quantization.
pub fn write_f32_verbatim(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

fn round_half_away_from_zero(x: f32) -> f32 {
    if x >= 0.0 {
        (x + 0.5).floor()
    } else {
        (x - 0.5).ceil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_quantizes_near_zero_with_dither_bounded() {
        let mut q = Quantizer::new(true, DitherType::TriangularPdf, -96.0, 1);
        let bytes = q.quantize_i16(&[0.0; 100]);
        for chunk in bytes.chunks_exact(2) {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            assert!(v.abs() <= 1, "dither amplitude should stay within +-1 LSB at -96dB, got {v}");
        }
    }

    #[test]
    fn full_scale_positive_clamps_to_i16_max() {
        let mut q = Quantizer::new(false, DitherType::TriangularPdf, -96.0, 1);
        let bytes = q.quantize_i16(&[1.0]);
        let v = i16::from_le_bytes([bytes[0], bytes[1]]);
        assert_eq!(v, i16::MAX);
    }

    #[test]
    fn full_scale_negative_clamps_to_i16_min_plus_one() {
        let mut q = Quantizer::new(false, DitherType::TriangularPdf, -96.0, 1);
        let bytes = q.quantize_i16(&[-1.0]);
        let v = i16::from_le_bytes([bytes[0], bytes[1]]);
        assert_eq!(v, -32_767);
    }

    #[test]
    fn disabled_dither_is_deterministic() {
        let mut a = Quantizer::new(false, DitherType::TriangularPdf, -96.0, 42);
        let mut b = Quantizer::new(false, DitherType::TriangularPdf, -96.0, 99);
        let samples = [0.25, -0.5, 0.75];
        assert_eq!(a.quantize_i16(&samples), b.quantize_i16(&samples));
    }

    #[test]
    fn round_half_away_from_zero_rounds_correctly() {
        assert_eq!(round_half_away_from_zero(0.5), 1.0);
        assert_eq!(round_half_away_from_zero(-0.5), -1.0);
        assert_eq!(round_half_away_from_zero(0.4), 0.0);
        assert_eq!(round_half_away_from_zero(-0.4), 0.0);
    }

    #[test]
    fn float32_verbatim_round_trips() {
        let samples = [0.1f32, -0.9, 1.5]; // out-of-range values pass through untouched
        let bytes = write_f32_verbatim(&samples);
        assert_eq!(bytes.len(), 12);
        let back: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(back, samples);
    }
}
