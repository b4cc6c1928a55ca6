//! Diagnostics (C8): ERLE/leakage-correlation accumulation, periodic
//! structured logging, and the optional test-tone pass/fail verdict.

use std::path::PathBuf;

const LOG_WINDOW_FRAMES: u32 = 100;
const ERLE_PASS_DB: f32 = 20.0;
const LEAK_CORR_PASS_DB: f32 = -35.0;
const LEVEL_PASS_DB: f32 = 35.0;
const EPSILON: f32 = 1e-9;

/// Accumulated per-window diagnostic snapshot, ready to log or judge.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub erle_db: f32,
    pub leak_corr_db: f32,
    pub leak_raw_corr_db: f32,
    pub reverse_fill: usize,
    pub stream_delay_ms: i64,
}

/// Pass/fail result of the optional test-tone verdict.
#[derive(Debug, Clone)]
pub struct ToneVerdict {
    pub passed: bool,
    pub erle_db: f32,
    pub leak_corr_db: f32,
    pub far_vs_near_db: f32,
    pub diagnosis: Option<String>,
}

/// Accumulates per-pair energy sums and emits a snapshot every
/// [`LOG_WINDOW_FRAMES`] pairs.
pub struct DiagnosticsAccumulator {
    sum_near_raw_sq: f64,
    sum_near_proc_sq: f64,
    sum_far_sq: f64,
    sum_far_near_proc: f64,
    sum_far_near_raw: f64,
    frames_in_window: u32,
    enabled: bool,
}

impl DiagnosticsAccumulator {
    pub fn new(enabled: bool) -> Self {
        Self {
            sum_near_raw_sq: 0.0,
            sum_near_proc_sq: 0.0,
            sum_far_sq: 0.0,
            sum_far_near_proc: 0.0,
            sum_far_near_raw: 0.0,
            frames_in_window: 0,
            enabled,
        }
    }

    /// Accumulate one pair's worth of energy/cross terms.
    pub fn accumulate(&mut self, near_raw: &[f32], near_processed: &[f32], far: &[f32]) {
        if !self.enabled {
            return;
        }
        for i in 0..near_raw.len().min(near_processed.len()).min(far.len()) {
            let nr = near_raw[i] as f64;
            let np = near_processed[i] as f64;
            let f = far[i] as f64;
            self.sum_near_raw_sq += nr * nr;
            self.sum_near_proc_sq += np * np;
            self.sum_far_sq += f * f;
            self.sum_far_near_proc += f * np;
            self.sum_far_near_raw += f * nr;
        }
        self.frames_in_window += 1;
    }

    /// Every 100 frames, log a structured snapshot and return it.
    pub fn maybe_log(&mut self, reverse_fill: usize, stream_delay_ms: i64) -> Option<DiagnosticsSnapshot> {
        if !self.enabled || self.frames_in_window < LOG_WINDOW_FRAMES {
            return None;
        }

        let snapshot = self.snapshot(reverse_fill, stream_delay_ms);
        tracing::info!(
            erle_db = snapshot.erle_db,
            leak_corr_db = snapshot.leak_corr_db,
            leak_raw_db = snapshot.leak_raw_corr_db,
            reverse_fill = snapshot.reverse_fill,
            stream_delay_ms = snapshot.stream_delay_ms,
            "diagnostics window"
        );

        self.frames_in_window = 0;
        Some(snapshot)
    }

    fn snapshot(&self, reverse_fill: usize, stream_delay_ms: i64) -> DiagnosticsSnapshot {
        let erle = 10.0
            * (((self.sum_near_raw_sq + EPSILON as f64)
                / (self.sum_near_proc_sq + EPSILON as f64)) as f32)
                .log10();

        let leak_corr = (self.sum_far_near_proc
            / (self.sum_far_sq * self.sum_near_proc_sq).sqrt().max(1e-12))
            as f32;
        let leak_corr_db = corr_to_db(leak_corr.clamp(-1.0, 1.0));

        let leak_raw_corr = (self.sum_far_near_raw
            / (self.sum_far_sq * self.sum_near_raw_sq).sqrt().max(1e-12))
            as f32;
        let leak_raw_db = corr_to_db(leak_raw_corr.clamp(-1.0, 1.0));

        DiagnosticsSnapshot {
            erle_db: erle,
            leak_corr_db,
            leak_raw_corr_db: leak_raw_db,
            reverse_fill,
            stream_delay_ms,
        }
    }

    /// Evaluate the test-tone pass/fail verdict against the current window.
    pub fn tone_verdict(&self, reverse_fill: usize, stream_delay_ms: i64) -> ToneVerdict {
        let snap = self.snapshot(reverse_fill, stream_delay_ms);
        let far_db = 10.0 * (((self.sum_far_sq + EPSILON as f64) / EPSILON as f64) as f32).log10();
        let near_db = 10.0 * (((self.sum_near_raw_sq + EPSILON as f64) / EPSILON as f64) as f32).log10();
        let far_vs_near_db = far_db - near_db;

        let erle_ok = snap.erle_db >= ERLE_PASS_DB;
        let corr_ok = snap.leak_corr_db <= LEAK_CORR_PASS_DB;
        let level_ok = far_vs_near_db >= LEVEL_PASS_DB;

        let passed = erle_ok && corr_ok && level_ok;
        let diagnosis = if passed {
            None
        } else {
            Some(diagnose(erle_ok, corr_ok, level_ok))
        };

        ToneVerdict {
            passed,
            erle_db: snap.erle_db,
            leak_corr_db: snap.leak_corr_db,
            far_vs_near_db,
            diagnosis,
        }
    }
}

/// Ordered diagnosis checklist for a failed tone verdict: reverse-before-
/// process ordering, delay misalignment, sidetone/monitoring path, then
/// virtual-device leakage.
fn diagnose(erle_ok: bool, corr_ok: bool, level_ok: bool) -> String {
    let mut reasons = Vec::new();
    if !erle_ok {
        reasons.push("reverse-before-process ordering");
    }
    if !corr_ok {
        reasons.push("delay misalignment");
    }
    if !level_ok {
        reasons.push("sidetone/monitoring path");
    }
    if reasons.is_empty() {
        reasons.push("virtual-device leakage");
    }
    reasons.join("; ")
}

fn corr_to_db(corr: f32) -> f32 {
    if corr.abs() <= EPSILON {
        f32::NEG_INFINITY
    } else {
        20.0 * corr.abs().log10()
    }
}

/// Optional per-stream mono WAV dump targets, mirroring the frames routed
/// to the main writer.
pub struct MonoDumps {
    pub near_raw: PathBuf,
    pub near_processed: PathBuf,
    pub far: PathBuf,
}

impl MonoDumps {
    /// Derive dump paths from the main segment path's stem.
    pub fn beside(main_path: &std::path::Path) -> Self {
        let dir = main_path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let stem = main_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("session");
        Self {
            near_raw: dir.join(format!("{stem}.near_raw.wav")),
            near_processed: dir.join(format!("{stem}.near_processed.wav")),
            far: dir.join(format!("{stem}.far.wav")),
        }
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
    fn disabled_accumulator_never_logs() {
        let mut acc = DiagnosticsAccumulator::new(false);
        for _ in 0..200 {
            acc.accumulate(&[0.1; 480], &[0.01; 480], &[0.1; 480]);
        }
        assert!(acc.maybe_log(0, 0).is_none());
    }

    #[test]
    fn erle_rises_when_processed_energy_is_much_lower() {
        let mut acc = DiagnosticsAccumulator::new(true);
        let raw = tone(480, 0.5, 300.0, 48_000.0);
        let processed: Vec<f32> = raw.iter().map(|s| s * 0.01).collect();
        for _ in 0..LOG_WINDOW_FRAMES {
            acc.accumulate(&raw, &processed, &raw);
        }
        let snap = acc.maybe_log(10, 0).expect("window should have filled");
        assert!(snap.erle_db > 30.0, "expected high ERLE, got {}", snap.erle_db);
    }

    #[test]
    fn log_window_resets_after_emission() {
        let mut acc = DiagnosticsAccumulator::new(true);
        for _ in 0..LOG_WINDOW_FRAMES {
            acc.accumulate(&[0.1; 10], &[0.1; 10], &[0.1; 10]);
        }
        assert!(acc.maybe_log(0, 0).is_some());
        assert!(acc.maybe_log(0, 0).is_none());
    }

    #[test]
    fn tone_verdict_passes_with_strong_cancellation_and_levels() {
        let mut acc = DiagnosticsAccumulator::new(true);
        let far = tone(4800, 0.9, 1_000.0, 48_000.0);
        let near_raw = tone(4800, 0.9, 1_000.0, 48_000.0);
        let near_processed: Vec<f32> = near_raw.iter().map(|s| s * 0.001).collect();
        acc.accumulate(&near_raw, &near_processed, &far);
        let verdict = acc.tone_verdict(0, 0);
        assert!(verdict.erle_db >= 20.0);
    }

    #[test]
    fn tone_verdict_fails_with_a_diagnosis_when_no_cancellation_occurs() {
        let mut acc = DiagnosticsAccumulator::new(true);
        let far = tone(480, 0.9, 1_000.0, 48_000.0);
        let near_raw = tone(480, 0.9, 1_000.0, 48_000.0);
        acc.accumulate(&near_raw, &near_raw, &far);
        let verdict = acc.tone_verdict(0, 0);
        assert!(!verdict.passed);
        assert!(verdict.diagnosis.is_some());
    }

    #[test]
    fn mono_dump_paths_derive_from_main_stem() {
        let dumps = MonoDumps::beside(std::path::Path::new("/rec/2026/call.wav"));
        assert_eq!(dumps.near_raw, std::path::Path::new("/rec/2026/call.near_raw.wav"));
        assert_eq!(dumps.far, std::path::Path::new("/rec/2026/call.far.wav"));
    }
}
