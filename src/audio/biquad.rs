//! Second-order (biquad) IIR filter, RBJ cookbook coefficients.
//!
//! Shared by the post-processor's low-pass stage (C5) and the adaptive AEC
//! fallback's optional post-cancellation high-pass (C3).

/// A direct-form-I biquad with persistent state across calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    /// Butterworth low-pass (Q = 1/√2).
    pub fn low_pass(cutoff_hz: f32, sample_rate: u32) -> Self {
        Self::from_rbj(cutoff_hz, sample_rate, Kind::LowPass)
    }

    /// Butterworth high-pass (Q = 1/√2).
    pub fn high_pass(cutoff_hz: f32, sample_rate: u32) -> Self {
        Self::from_rbj(cutoff_hz, sample_rate, Kind::HighPass)
    }

    fn from_rbj(cutoff_hz: f32, sample_rate: u32, kind: Kind) -> Self {
        let sr = sample_rate.max(1) as f32;
        let fc = cutoff_hz.clamp(1.0, sr / 2.0 - 1.0);
        let omega = 2.0 * std::f32::consts::PI * fc / sr;
        let (sin_w, cos_w) = omega.sin_cos();
        let q = std::f32::consts::FRAC_1_SQRT_2;
        let alpha = sin_w / (2.0 * q);

        let (b0, b1, b2, a0, a1, a2) = match kind {
            Kind::LowPass => {
                let b1 = 1.0 - cos_w;
                let b0 = b1 / 2.0;
                let b2 = b0;
                (b0, b1, b2, 1.0 + alpha, -2.0 * cos_w, 1.0 - alpha)
            }
            Kind::HighPass => {
                let b1 = -(1.0 + cos_w);
                let b0 = -b1 / 2.0;
                let b2 = b0;
                (b0, b1, b2, 1.0 + alpha, -2.0 * cos_w, 1.0 - alpha)
            }
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Process one sample, updating internal history.
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    /// Process a whole frame in place.
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        for sample in frame.iter_mut() {
            *sample = self.process(*sample);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    LowPass,
    HighPass,
}
