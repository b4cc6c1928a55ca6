//! Frame Aligner (C2): accumulates per-side samples and emits paired frames.
//!
//! Not internally synchronized — the pipeline session holds one mutex across
//! the full accumulate→drain→AEC→post→enqueue sequence, so the aligner itself
//! assumes exclusive access for the duration of a `feed` call.

use std::collections::VecDeque;

/// Which side a batch of samples belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Local microphone (after AEC: "near").
    Near,
    /// System loopback / remote party (AEC reference: "far").
    Far,
}

/// A frame-aligned pair of equal-length mono buffers.
#[derive(Debug, Clone)]
pub struct FramePair {
    /// Near-end (microphone) samples, length `frame_size`.
    pub near: Vec<f32>,
    /// Far-end (loopback) samples, length `frame_size`.
    pub far: Vec<f32>,
    /// Whether `far` was zero-padded because the far side was behind.
    pub far_was_underrun: bool,
    /// Occupancy-derived stream delay estimate in ms, pre-leakage-bump.
    pub occupancy_delay_ms: i64,
}

/// Default maximum near-lead, in frames, before emission blocks waiting for far.
pub const L_MAX: usize = 2;

/// Accumulates near/far samples and drains frame-aligned pairs.
pub struct FrameAligner {
    frame_size: usize,
    left: VecDeque<f32>,
    right: VecDeque<f32>,
    target_occupancy_frames: usize,
    max_occupancy_frames: usize,
    lead_max_frames: usize,
    /// How many consecutive pairs have been emitted with a zero-padded far
    /// side since far last caught up; emission blocks once this reaches
    /// `lead_max_frames`, leaving excess near frames buffered.
    near_lead: usize,
    /// Count of whole reverse frames dropped due to overflow.
    pub reverse_drops: u64,
    /// Count of pairs emitted with a zero-padded far side.
    pub reverse_underruns: u64,
}

impl FrameAligner {
    /// Create a new aligner for the given frame size (`F = R * frame_ms / 1000`).
    ///
    /// `target_occupancy_frames` should correspond to roughly 200 ms of far-side
    /// reference audio; `max_occupancy_frames` is typically `2 * target`.
    pub fn new(frame_size: usize, target_occupancy_frames: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            left: VecDeque::new(),
            right: VecDeque::new(),
            target_occupancy_frames: target_occupancy_frames.max(1),
            max_occupancy_frames: (target_occupancy_frames.max(1)) * 2,
            lead_max_frames: L_MAX,
            near_lead: 0,
            reverse_drops: 0,
            reverse_underruns: 0,
        }
    }

    /// Override the default near-lead tolerance (frames).
    pub fn set_lead_max_frames(&mut self, lead_max_frames: usize) {
        self.lead_max_frames = lead_max_frames;
    }

    /// Frame size in samples.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Current right-side (reverse buffer) occupancy in whole frames.
    pub fn reverse_occupancy_frames(&self) -> usize {
        self.right.len() / self.frame_size
    }

    /// Append samples to one side, then drain as many aligned pairs as the
    /// pacing rule allows.
    pub fn feed(&mut self, side: Side, samples: &[f32]) -> Vec<FramePair> {
        if samples.is_empty() {
            return Vec::new();
        }
        match side {
            Side::Near => self.left.extend(samples.iter().copied()),
            Side::Far => self.right.extend(samples.iter().copied()),
        }
        self.drain()
    }

    /// Drain pairs without adding new samples (used by the finalizer after
    /// zero-padding both accumulators to the next frame multiple).
    pub fn drain(&mut self) -> Vec<FramePair> {
        let f = self.frame_size;
        let mut pairs = Vec::new();

        loop {
            // Trim the reverse buffer regardless of whether a pair can be
            // emitted this iteration: far-only feeding with near stalled
            // must never grow `right` past the occupancy cap.
            while self.right.len() / f > self.max_occupancy_frames {
                for _ in 0..f {
                    self.right.pop_front();
                }
                self.reverse_drops += 1;
            }

            let left_full_frames = self.left.len() / f;
            if left_full_frames == 0 {
                break;
            }
            let right_full_frames = self.right.len() / f;
            if right_full_frames == 0 && self.near_lead >= self.lead_max_frames {
                // Near has already led by the maximum tolerated frames with
                // no far data; leave this frame buffered until far catches up.
                break;
            }

            let near = take_frame(&mut self.left, f);
            let (far, far_was_underrun) = if self.right.len() >= f {
                (take_frame(&mut self.right, f), false)
            } else {
                // Keep any partial real far samples buffered so they align
                // into the next pair instead of being silently discarded.
                (vec![0.0; f], true)
            };
            if far_was_underrun {
                self.reverse_underruns += 1;
                self.near_lead += 1;
            } else {
                self.near_lead = 0;
            }

            let occupancy = self.reverse_occupancy_frames() as i64;
            let occupancy_delay_ms =
                (occupancy - self.target_occupancy_frames as i64) * frame_ms_from(f);

            pairs.push(FramePair {
                near,
                far,
                far_was_underrun,
                occupancy_delay_ms,
            });
        }

        pairs
    }

    /// Zero-pad both accumulators up to the next whole frame and drain the
    /// remainder. Used by the finalizer's tail-flush.
    pub fn pad_and_drain_tail(&mut self) -> Vec<FramePair> {
        let f = self.frame_size;
        pad_to_frame(&mut self.left, f);
        pad_to_frame(&mut self.right, f);
        self.drain()
    }
}

fn take_frame(buf: &mut VecDeque<f32>, f: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(f);
    for _ in 0..f {
        out.push(buf.pop_front().unwrap_or(0.0));
    }
    out
}

fn pad_to_frame(buf: &mut VecDeque<f32>, f: usize) {
    if buf.is_empty() {
        return;
    }
    let remainder = buf.len() % f;
    if remainder != 0 {
        for _ in 0..(f - remainder) {
            buf.push_back(0.0);
        }
    }
}

/// We don't carry `frame_ms` directly on the aligner (only `frame_size`), so
/// derive it assuming the session's declared pipeline rate matches the ratio
/// used to construct `frame_size`. Callers that need an exact value should
/// prefer `Session`'s own `frame_ms` field; this is only used for the raw
/// occupancy-based delay estimate which the leakage bump is added to.
fn frame_ms_from(_frame_size: usize) -> i64 {
    10
}
