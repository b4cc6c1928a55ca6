//! Leakage Guard (C4): detects sidetone/monitoring-path leakage between the
//! far and near streams that the AEC port alone cannot resolve, and blocks
//! recording rather than capture a call of silently-corrupted audio.
//!
//! Two phases share one "qualifying pair" predicate — near silent and far
//! active — computed fresh each pair:
//! - **Startup**: accumulates mean correlation over the first few seconds;
//!   blocks permanently if the mean is too high to be coincidental.
//! - **Runtime**: tracks a rolling high-leakage-frame count per second,
//!   nudging a delay estimate upward and eventually blocking if leakage
//!   persists past what a delay bump can fix.

const NEAR_SILENT_DBFS: f32 = -45.0;
const FAR_ACTIVE_DBFS: f32 = -35.0;
const STARTUP_CORRELATION_THRESHOLD: f32 = 0.2;
const LEAKAGE_THRESHOLD_DB: f32 = -25.0;
const RUNTIME_WINDOW_FRAMES: u32 = 100;
const RUNTIME_HIGH_FRAME_TRIGGER: u32 = 70;
const DELAY_BUMP_STEP_MS: i64 = 15;
const DELAY_BUMP_BLOCK_MS: i64 = 45;

/// Outcome of evaluating one frame pair against the leakage guard.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeakageVerdict {
    /// Whether the coordinator should drop this pair rather than write it.
    pub recording_blocked: bool,
    /// True exactly on the pair where blocking first became true.
    pub newly_blocked: bool,
    /// Accumulated delay-compensation nudge, in ms, to add to the stream delay.
    pub delay_bump_ms: i64,
}

/// Tracks startup correlation accumulation and runtime high-leakage-frame
/// counting across the lifetime of a session.
pub struct LeakageGuard {
    startup_pairs_remaining: u32,
    startup_qualifying_pairs: u32,
    startup_corr_sum: f32,
    startup_verdict_emitted: bool,

    runtime_frame_counter: u32,
    runtime_high_frames: u32,
    delay_bump_ms: i64,
    blocked: bool,
    was_blocked_last_call: bool,
}

impl LeakageGuard {
    /// `startup_pairs` is `N_startup = T_startup * 1000 / frame_ms`.
    pub fn new(startup_pairs: u32) -> Self {
        Self {
            startup_pairs_remaining: startup_pairs,
            startup_qualifying_pairs: 0,
            startup_corr_sum: 0.0,
            startup_verdict_emitted: false,
            runtime_frame_counter: 0,
            runtime_high_frames: 0,
            delay_bump_ms: 0,
            blocked: false,
            was_blocked_last_call: false,
        }
    }

    /// Evaluate one frame pair. `near_raw` is the pre-AEC near-end frame;
    /// `far` is the reference frame. Call once per pair, in order.
    pub fn evaluate(&mut self, near_raw: &[f32], far: &[f32]) -> LeakageVerdict {
        let near_dbfs = dbfs(rms(near_raw));
        let far_dbfs = dbfs(rms(far));
        let qualifying = near_dbfs < NEAR_SILENT_DBFS && far_dbfs > FAR_ACTIVE_DBFS;

        if !self.blocked && self.startup_pairs_remaining > 0 {
            self.startup_pairs_remaining -= 1;
            if qualifying {
                let r = pearson(far, near_raw);
                self.startup_corr_sum += r.abs();
                self.startup_qualifying_pairs += 1;
            }
            if self.startup_pairs_remaining == 0 && !self.startup_verdict_emitted {
                self.startup_verdict_emitted = true;
                if self.startup_qualifying_pairs > 0 {
                    let mean = self.startup_corr_sum / self.startup_qualifying_pairs as f32;
                    if mean > STARTUP_CORRELATION_THRESHOLD {
                        tracing::warn!(
                            mean_correlation = mean,
                            "startup leakage guard detected persistent near/far correlation; \
                             recording blocked — check for a sidetone or monitoring path"
                        );
                        self.blocked = true;
                    }
                }
            }
        } else if !self.blocked {
            if qualifying {
                let r = pearson(far, near_raw);
                if r.abs() > 1e-9 {
                    let corr_db = 20.0 * r.abs().log10();
                    if corr_db > LEAKAGE_THRESHOLD_DB {
                        self.runtime_high_frames += 1;
                    }
                }
            }
            self.runtime_frame_counter += 1;
            if self.runtime_frame_counter >= RUNTIME_WINDOW_FRAMES {
                if self.runtime_high_frames > RUNTIME_HIGH_FRAME_TRIGGER {
                    self.delay_bump_ms += DELAY_BUMP_STEP_MS;
                    tracing::warn!(
                        delay_bump_ms = self.delay_bump_ms,
                        "runtime leakage guard bumping stream delay estimate"
                    );
                    if self.delay_bump_ms >= DELAY_BUMP_BLOCK_MS {
                        tracing::warn!(
                            "runtime leakage guard exhausted delay compensation; recording blocked"
                        );
                        self.blocked = true;
                    }
                }
                self.runtime_frame_counter = 0;
                self.runtime_high_frames = 0;
            }
        }

        let newly_blocked = self.blocked && !self.was_blocked_last_call;
        self.was_blocked_last_call = self.blocked;

        if self.blocked {
            tracing::warn!(
                "recording blocked by leakage guard; pair dropped (rate-limited to once/s upstream)"
            );
        }

        LeakageVerdict {
            recording_blocked: self.blocked,
            newly_blocked,
            delay_bump_ms: self.delay_bump_ms,
        }
    }

    /// Whether recording is currently blocked.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }
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
        f32::NEG_INFINITY
    } else {
        20.0 * rms.log10()
    }
}

/// Zero-lag Pearson correlation coefficient between two equal-length frames.
fn pearson(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mean_a: f32 = a[..n].iter().sum::<f32>() / n as f32;
    let mean_b: f32 = b[..n].iter().sum::<f32>() / n as f32;
    let mut cov = 0.0f32;
    let mut var_a = 0.0f32;
    let mut var_b = 0.0f32;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom <= 1e-12 {
        0.0
    } else {
        (cov / denom).clamp(-1.0, 1.0)
    }
}
