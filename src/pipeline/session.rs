//! The Pipeline Session (C10): owns every stage (C1–C9) for one recording
//! and exposes the `append_mic` / `append_speaker` / `finalize` / `dispose`
//! contract.
//!
//! One mutex guards the full accumulate→drain→AEC→post→enqueue sequence;
//! whichever producer (mic or speaker feeder) calls in completes that whole
//! sequence cooperatively before releasing it. The durable writer runs on
//! its own dedicated OS thread, reached only through [`DurableWriter`]'s
//! bounded channel.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::audio::aec::AecPort;
use crate::audio::aligner::{FrameAligner, Side};
use crate::audio::dsp::ChannelProcessor;
use crate::audio::format::SampleFormat;
use crate::audio::leakage::LeakageGuard;
use crate::audio::normalize::to_mono_f32;
use crate::audio::quantize::{write_f32_verbatim, Quantizer};
use crate::config::{BitsPerSample, RecorderConfig};
use crate::diagnostics::{DiagnosticsAccumulator, MonoDumps};
use crate::error::{RecorderError, Result};
use crate::finalize::{merge_if_needed, normalize_offline};
use crate::pipeline::messages::FinalizeResult;
use crate::wav::{WavFormat, WavSegment};
use crate::writer::{session_path, DurableWriter};

const T_STARTUP_S: f32 = 4.0;
const TARGET_REVERSE_MS: u32 = 200;

/// Mutable state guarded by the session mutex.
struct Inner {
    aligner: FrameAligner,
    aec: AecPort,
    leakage: LeakageGuard,
    near_proc: ChannelProcessor,
    far_proc: ChannelProcessor,
    quantizer: Quantizer,
    diagnostics: DiagnosticsAccumulator,
    mic_discard_remaining: usize,
    speaker_discard_remaining: usize,
    mono_dumps: Option<(WavSegment, WavSegment, WavSegment)>,
    tone_check: bool,
}

/// One call recording in progress.
pub struct Session {
    config: RecorderConfig,
    rate_hz: u32,
    mic_fmt: SampleFormat,
    spk_fmt: SampleFormat,
    inner: Mutex<Inner>,
    writer: DurableWriter,
    writer_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    finalized: AtomicBool,
    disposed: AtomicBool,
}

/// Create a new recording session.
///
/// # Errors
///
/// Returns an error only for unrecoverable session-creation failures (the
/// initial output file or its directory could not be created).
pub fn create_session(
    out_dir: &Path,
    label: &str,
    mic_fmt: SampleFormat,
    spk_fmt: SampleFormat,
    config: RecorderConfig,
) -> Result<Session> {
    let config = config.coerced();
    let rate_hz = config.recording.sample_rate;
    let frame_ms = config.dsp.frame_ms.max(1);
    let frame_size = ((rate_hz as u64 * frame_ms as u64) / 1000) as usize;
    let target_occupancy_frames = (TARGET_REVERSE_MS / frame_ms).max(1) as usize;
    let startup_pairs = ((T_STARTUP_S * 1000.0) as u32 / frame_ms).max(1);

    let mut aligner = FrameAligner::new(frame_size, target_occupancy_frames);
    aligner.set_lead_max_frames(crate::audio::aligner::L_MAX);

    let aec = AecPort::configure(&config.aec, rate_hz, frame_ms);
    let leakage = LeakageGuard::new(startup_pairs);
    let near_proc = ChannelProcessor::new(
        config.dsp.near_gain_db,
        &config.dsp,
        &config.filter,
        &config.limiter,
        rate_hz,
    );
    let far_proc = ChannelProcessor::new(
        config.dsp.far_gain_db,
        &config.dsp,
        &config.filter,
        &config.limiter,
        rate_hz,
    );
    let quantizer = Quantizer::new(
        config.dither.enable_dithering,
        config.dither.dither_type,
        config.dither.dither_amount_db,
        session_seed(),
    );
    let diagnostics = DiagnosticsAccumulator::new(
        config.diagnostics.diag_enable_mono_dumps || config.diagnostics.diag_test_tone_check,
    );

    let now = chrono::Utc::now();
    let output_path = session_path(out_dir, label, now);
    let wav_format = WavFormat {
        sample_rate: rate_hz,
        channels: 2,
        bits_per_sample: config.recording.bits_per_sample,
    };

    let (writer, handle) = DurableWriter::spawn(output_path.clone(), wav_format)?;

    let mono_dumps = if config.diagnostics.diag_enable_mono_dumps {
        let dumps = MonoDumps::beside(&output_path);
        let mono_format = WavFormat {
            sample_rate: rate_hz,
            channels: 1,
            bits_per_sample: BitsPerSample::Sixteen,
        };
        Some((
            WavSegment::create(&dumps.near_raw, mono_format)?,
            WavSegment::create(&dumps.near_processed, mono_format)?,
            WavSegment::create(&dumps.far, mono_format)?,
        ))
    } else {
        None
    };

    let discard_samples =
        ((rate_hz as u64 * config.recording.discard_initial_ms as u64) / 1000) as usize;

    info!(output_dir = %out_dir.display(), session_id = %output_path.display(), "session created");

    Ok(Session {
        mic_fmt,
        spk_fmt,
        rate_hz,
        inner: Mutex::new(Inner {
            aligner,
            aec,
            leakage,
            near_proc,
            far_proc,
            quantizer,
            diagnostics,
            mic_discard_remaining: discard_samples,
            speaker_discard_remaining: discard_samples,
            mono_dumps,
            tone_check: config.diagnostics.diag_test_tone_check,
        }),
        writer,
        writer_handle: Mutex::new(Some(handle)),
        finalized: AtomicBool::new(false),
        disposed: AtomicBool::new(false),
        config,
    })
}

fn session_seed() -> u64 {
    // A fixed, code-visible seed keeps dither bit-reproducible across runs
    // within a process while still being per-session (each session owns its
    // own `StdRng` instance rather than a process-wide generator).
    0x5EED_CA11_u64
}

impl Session {
    /// Append raw microphone bytes in the given source format.
    pub fn append_mic(&self, bytes: &[u8], src_fmt: SampleFormat) -> Result<()> {
        self.feed(Side::Near, bytes, src_fmt)
    }

    /// Append raw speaker/loopback bytes in the given source format.
    pub fn append_speaker(&self, bytes: &[u8], src_fmt: SampleFormat) -> Result<()> {
        self.feed(Side::Far, bytes, src_fmt)
    }

    fn feed(&self, side: Side, bytes: &[u8], src_fmt: SampleFormat) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let declared = match side {
            Side::Near => self.mic_fmt,
            Side::Far => self.spk_fmt,
        };
        if declared != src_fmt {
            tracing::debug!(?side, ?declared, ?src_fmt, "source format differs from session declaration");
        }
        let mut mono = to_mono_f32(bytes, src_fmt, self.rate_hz);

        let mut inner = self.inner.lock().map_err(|_| {
            RecorderError::Pipeline("session mutex poisoned".to_string())
        })?;

        let discard_remaining = match side {
            Side::Near => &mut inner.mic_discard_remaining,
            Side::Far => &mut inner.speaker_discard_remaining,
        };
        if *discard_remaining > 0 {
            let drop_n = (*discard_remaining).min(mono.len());
            mono.drain(..drop_n);
            *discard_remaining -= drop_n;
            if mono.is_empty() {
                return Ok(());
            }
        }

        let pairs = inner.aligner.feed(side, &mono);
        self.drain_pairs(&mut inner, pairs);
        Ok(())
    }

    fn drain_pairs(&self, inner: &mut Inner, pairs: Vec<crate::audio::aligner::FramePair>) {
        for pair in pairs {
            self.process_pair(inner, pair);
        }
    }

    fn process_pair(&self, inner: &mut Inner, pair: crate::audio::aligner::FramePair) {
        if inner.leakage.is_blocked() {
            inner.aec.feed_far(&pair.far);
            let verdict = inner.leakage.evaluate(&pair.near, &pair.far);
            if verdict.newly_blocked {
                warn!("recording blocked by leakage guard");
            }
            return;
        }

        let verdict = inner.leakage.evaluate(&pair.near, &pair.far);
        if verdict.newly_blocked {
            warn!("recording blocked by leakage guard");
        }
        if verdict.recording_blocked {
            inner.aec.feed_far(&pair.far);
            return;
        }

        let stream_delay_ms = pair.occupancy_delay_ms + verdict.delay_bump_ms;
        inner.aec.set_stream_delay_ms(stream_delay_ms);

        inner.aec.feed_far(&pair.far);
        let mut near_cancelled = vec![0.0f32; pair.near.len()];
        inner.aec.process_near(&pair.near, &mut near_cancelled);

        let mut near_out = near_cancelled.clone();
        inner.near_proc.process(&mut near_out);
        let mut far_out = pair.far.clone();
        inner.far_proc.process(&mut far_out);

        inner
            .diagnostics
            .accumulate(&pair.near, &near_out, &pair.far);
        let reverse_fill = inner.aligner.reverse_occupancy_frames();
        inner.diagnostics.maybe_log(reverse_fill, stream_delay_ms);

        if let Some((raw_dump, proc_dump, far_dump)) = inner.mono_dumps.as_mut() {
            let mut dump_q = Quantizer::new(false, crate::config::DitherType::TriangularPdf, -96.0, 0);
            let _ = raw_dump.write_i16_bytes(&dump_q.quantize_i16(&pair.near));
            let _ = proc_dump.write_i16_bytes(&dump_q.quantize_i16(&near_out));
            let _ = far_dump.write_i16_bytes(&dump_q.quantize_i16(&far_out));
        }

        let interleaved: Vec<f32> = near_out
            .iter()
            .zip(far_out.iter())
            .flat_map(|(&n, &f)| [n, f])
            .collect();

        let bytes = match self.config.recording.bits_per_sample {
            BitsPerSample::Sixteen => inner.quantizer.quantize_i16(&interleaved),
            BitsPerSample::Float32 => write_f32_verbatim(&interleaved),
        };
        self.writer.enqueue(&bytes);
    }

    /// Flush the tail, merge segments, optionally normalize, and return the
    /// final result. Idempotent: a second call returns the same result
    /// without re-running the merge/normalize steps.
    pub fn finalize(&self) -> Result<FinalizeResult> {
        if self.finalized.swap(true, Ordering::AcqRel) {
            let segments = self.writer.segments();
            return Ok(FinalizeResult {
                final_path: segments.first().cloned().unwrap_or_default(),
                segment_paths: segments,
                diagnostics: None,
                tone_verdict: None,
            });
        }

        let (diagnostics_snapshot, tone_verdict) = {
            let mut inner = self.inner.lock().map_err(|_| {
                RecorderError::Pipeline("session mutex poisoned".to_string())
            })?;
            let tail_pairs = inner.aligner.pad_and_drain_tail();
            self.drain_pairs(&mut inner, tail_pairs);

            let reverse_fill = inner.aligner.reverse_occupancy_frames();
            let snapshot = inner.diagnostics.maybe_log(reverse_fill, 0);
            let verdict = if inner.tone_check {
                Some(inner.diagnostics.tone_verdict(reverse_fill, 0))
            } else {
                None
            };
            (snapshot, verdict)
        };

        if let Some(handle) = self.writer_handle.lock().expect("writer handle mutex poisoned").take()
            && let Err(e) = self.writer.finalize(handle) {
                warn!(error = %e, "writer drain timed out during finalize");
            }

        let segments = self.writer.segments();
        let final_path = merge_if_needed(&segments)?;

        let normalized = self.config.finalize.post_normalize;
        if normalized
            && let Err(e) = normalize_offline(&final_path, self.config.dsp.target_rms_dbfs) {
                warn!(error = %e, "offline normalization failed; leaving merged output as-is");
            }

        info!(final_path = %final_path.display(), segments = segments.len(), "session finalized");

        Ok(FinalizeResult {
            final_path,
            segment_paths: segments,
            diagnostics: diagnostics_snapshot,
            tone_verdict,
        })
    }

    /// Ensure finalize has run and release resources. Safe to call more
    /// than once; also runs on [`Drop`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.finalize() {
            warn!(error = %e, "dispose: finalize failed, best-effort teardown only");
        }
        info!("session disposed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fmt() -> SampleFormat {
        SampleFormat::F32 {
            sample_rate: 48_000,
            channels: 1,
        }
    }

    fn bytes_of(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn append_empty_is_a_no_op() {
        let dir = tempdir().unwrap();
        let session = create_session(dir.path(), "test", fmt(), fmt(), RecorderConfig::default()).unwrap();
        session.append_mic(&[], fmt()).unwrap();
        session.append_speaker(&[], fmt()).unwrap();
    }

    #[test]
    fn finalize_produces_a_final_path() {
        let dir = tempdir().unwrap();
        let session = create_session(dir.path(), "call one", fmt(), fmt(), RecorderConfig::default()).unwrap();
        let samples = vec![0.1f32; 480];
        session.append_mic(&bytes_of(&samples), fmt()).unwrap();
        session.append_speaker(&bytes_of(&samples), fmt()).unwrap();
        let result = session.finalize().unwrap();
        assert!(result.final_path.exists());
    }

    #[test]
    fn finalize_is_idempotent() {
        let dir = tempdir().unwrap();
        let session = create_session(dir.path(), "call", fmt(), fmt(), RecorderConfig::default()).unwrap();
        session.append_mic(&bytes_of(&[0.1; 480]), fmt()).unwrap();
        session.append_speaker(&bytes_of(&[0.1; 480]), fmt()).unwrap();
        let first = session.finalize().unwrap();
        let second = session.finalize().unwrap();
        assert_eq!(first.final_path, second.final_path);
    }

    #[test]
    fn dispose_is_safe_to_call_multiple_times() {
        let dir = tempdir().unwrap();
        let session = create_session(dir.path(), "call", fmt(), fmt(), RecorderConfig::default()).unwrap();
        session.dispose();
        session.dispose();
    }

    #[test]
    fn frame_pairs_always_equal_length() {
        // Feed uneven chunk sizes and verify no panics / length mismatches
        // surface through finalize.
        let dir = tempdir().unwrap();
        let session = create_session(dir.path(), "call", fmt(), fmt(), RecorderConfig::default()).unwrap();
        session.append_mic(&bytes_of(&[0.1; 1000]), fmt()).unwrap();
        session.append_speaker(&bytes_of(&[0.1; 700]), fmt()).unwrap();
        let result = session.finalize().unwrap();
        assert!(result.final_path.exists());
    }
}
