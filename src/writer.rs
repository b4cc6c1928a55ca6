//! Durable Writer (C7): a dedicated background thread draining a bounded
//! channel of interleaved stereo frames, with segment rotation on I/O
//! failure so a single write error never aborts the whole recording.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};

use crate::config::BitsPerSample;
use crate::error::{RecorderError, Result};
use crate::wav::{WavFormat, WavSegment};

const QUEUE_CAPACITY: usize = 512;
const FLUSH_EVERY_FRAMES: u64 = 10;
const FINALIZE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const RECOVERY_RETRY_DELAY: Duration = Duration::from_millis(50);

enum WriterMsg {
    Frame(Vec<u8>),
    Stop,
}

/// Enqueue-only handle to the durable writer; cheap to clone.
#[derive(Clone)]
pub struct DurableWriter {
    tx: Sender<WriterMsg>,
    segments: Arc<Mutex<Vec<PathBuf>>>,
    stopped: Arc<AtomicBool>,
}

impl DurableWriter {
    /// Spawn the background writer thread for a new segment at `first_path`.
    pub fn spawn(first_path: PathBuf, format: WavFormat) -> Result<(Self, std::thread::JoinHandle<()>)> {
        let (tx, rx) = bounded::<WriterMsg>(QUEUE_CAPACITY);
        let segments = Arc::new(Mutex::new(vec![first_path.clone()]));
        let stopped = Arc::new(AtomicBool::new(false));

        let segments_for_thread = Arc::clone(&segments);
        let segment = WavSegment::create(&first_path, format)
            .map_err(|e| RecorderError::Writer(format!("opening initial segment: {e}")))?;

        let handle = std::thread::spawn(move || {
            run_writer_loop(rx, segment, format, segments_for_thread);
        });

        Ok((
            Self {
                tx,
                segments,
                stopped,
            },
            handle,
        ))
    }

    /// Non-blocking enqueue of one interleaved stereo frame, already
    /// dithered/quantized (or float32-verbatim) by the caller.
    pub fn enqueue(&self, frame_bytes: &[u8]) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        // A full queue means the writer thread has fallen behind; drop
        // rather than block the capture-side mutex.
        let _ = self.tx.try_send(WriterMsg::Frame(frame_bytes.to_vec()));
    }

    /// Segment paths written so far, in creation order.
    pub fn segments(&self) -> Vec<PathBuf> {
        self.segments.lock().expect("segments mutex poisoned").clone()
    }

    /// Stop accepting new enqueues and signal the writer thread to flush
    /// and close. Does not itself wait for the thread to exit — callers
    /// join the handle returned by [`DurableWriter::spawn`] with their own
    /// bounded timeout.
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let _ = self.tx.send(WriterMsg::Stop);
    }

    /// Finalize-time drain: request stop, then wait up to 5 s for the
    /// writer thread to exit.
    pub fn finalize(&self, handle: std::thread::JoinHandle<()>) -> Result<()> {
        self.request_stop();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = handle.join();
            let _ = done_tx.send(());
        });
        match done_rx.recv_timeout(FINALIZE_DRAIN_TIMEOUT) {
            Ok(()) => Ok(()),
            Err(_) => Err(RecorderError::Writer(
                "writer thread did not drain within the finalize window".to_string(),
            )),
        }
    }
}

fn run_writer_loop(
    rx: crossbeam_channel::Receiver<WriterMsg>,
    mut segment: WavSegment,
    format: WavFormat,
    segments: Arc<Mutex<Vec<PathBuf>>>,
) {
    let mut since_flush: u64 = 0;
    let mut recovery_index: u64 = 0;

    for msg in rx.iter() {
        match msg {
            WriterMsg::Stop => break,
            WriterMsg::Frame(bytes) => {
                let write_result = match format.bits_per_sample {
                    BitsPerSample::Sixteen => segment.write_i16_bytes(&bytes),
                    BitsPerSample::Float32 => segment.write_f32_bytes(&bytes),
                };

                if let Err(e) = write_result {
                    tracing::warn!(error = %e, "writer segment failed; attempting recovery");
                    recovery_index += 1;
                    match recover_segment(&segment, format, recovery_index) {
                        Ok(new_segment) => {
                            segment = new_segment;
                            if let Ok(mut segs) = segments.lock() {
                                segs.push(segment.path().to_path_buf());
                            }
                        }
                        Err(recovery_err) => {
                            tracing::error!(
                                error = %recovery_err,
                                "segment recovery failed; frame dropped and retrying after delay"
                            );
                            std::thread::sleep(RECOVERY_RETRY_DELAY);
                        }
                    }
                    continue;
                }

                since_flush += 1;
                if since_flush >= FLUSH_EVERY_FRAMES {
                    since_flush = 0;
                    if let Err(e) = segment.flush() {
                        tracing::warn!(error = %e, "periodic flush failed");
                    }
                }
            }
        }
    }

    if let Err(e) = segment.finalize() {
        tracing::warn!(error = %e, "final segment close failed");
    }
}

fn recover_segment(current: &WavSegment, format: WavFormat, index: u64) -> Result<WavSegment> {
    let base = current.path();
    let recovery_path = recovery_path_for(base, index);
    WavSegment::create(&recovery_path, format)
}

fn recovery_path_for(base: &Path, index: u64) -> PathBuf {
    let ext = base.extension().and_then(|e| e.to_str()).unwrap_or("wav");
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("segment");
    let dir = base.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!("{stem}-recovery{index}.{ext}"))
}

/// Compute the session's canonical output path:
/// `{root}/Calls/YYYY/MM/DD/{ts}_{label}.wav` where `ts = yyyymmdd_HHMMSS` UTC.
pub fn session_path(root: &Path, label: &str, now: chrono::DateTime<chrono::Utc>) -> PathBuf {
    let slug = sanitize_label(label);
    let ts = now.format("%Y%m%d_%H%M%S");
    root.join("Calls")
        .join(now.format("%Y").to_string())
        .join(now.format("%m").to_string())
        .join(now.format("%d").to_string())
        .join(format!("{ts}_{slug}.wav"))
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(40)
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn format_16() -> WavFormat {
        WavFormat {
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: BitsPerSample::Sixteen,
        }
    }

    #[test]
    fn writes_frames_in_order_and_finalizes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let (writer, handle) = DurableWriter::spawn(path.clone(), format_16()).unwrap();
        for i in 0..20 {
            let left = ((i as f32 / 100.0) * 32_767.0) as i16;
            let right = ((-(i as f32) / 100.0) * 32_767.0) as i16;
            let mut bytes = Vec::with_capacity(4);
            bytes.extend_from_slice(&left.to_le_bytes());
            bytes.extend_from_slice(&right.to_le_bytes());
            writer.enqueue(&bytes);
        }
        writer.finalize(handle).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 40);
    }

    #[test]
    fn session_path_uses_expected_layout() {
        use chrono::TimeZone;
        let now = chrono::Utc.with_ymd_and_hms(2026, 3, 5, 14, 30, 0).unwrap();
        let path = session_path(Path::new("/rec"), "Alice Call!", now);
        assert_eq!(
            path,
            Path::new("/rec/Calls/2026/03/05/20260305_143000_alice-call.wav")
        );
    }

    #[test]
    fn sanitize_label_defaults_to_unknown() {
        assert_eq!(sanitize_label(""), "unknown");
        assert_eq!(sanitize_label("???"), "unknown");
    }

    #[test]
    fn sanitize_label_truncates_to_40_chars() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_label(&long).len(), 40);
    }

    #[test]
    fn recovery_path_follows_naming_convention() {
        let base = Path::new("/rec/Calls/2026/03/05/20260305_143000_call.wav");
        let recovery = recovery_path_for(base, 2);
        assert_eq!(
            recovery,
            Path::new("/rec/Calls/2026/03/05/20260305_143000_call-recovery2.wav")
        );
    }

    #[test]
    fn segments_list_starts_with_the_initial_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let (writer, handle) = DurableWriter::spawn(path.clone(), format_16()).unwrap();
        assert_eq!(writer.segments(), vec![path]);
        writer.finalize(handle).unwrap();
    }
}
