//! Demo wiring harness: opens the default input and output-monitor devices,
//! feeds their bytes into a recording session, and finalizes on Ctrl-C.
//!
//! This binary contains no DSP logic of its own. Device enumeration and
//! loopback plumbing are out of scope for the library; this is a thin
//! end-to-end exercise of the public `append_mic`/`append_speaker`/
//! `finalize` contract, not part of the pipeline's test surface.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use recorder::audio::capture::CpalCapture;
use recorder::config::RecorderConfig;
use recorder::create_session;

fn main() -> recorder::Result<()> {
    tracing_subscriber::fmt::init();

    let mic = CpalCapture::default_input()?;
    let speaker = match CpalCapture::default_output_monitor() {
        Ok(capture) => Some(capture),
        Err(e) => {
            tracing::warn!(error = %e, "no loopback/output-monitor device; recording mic only");
            None
        }
    };

    let out_dir = PathBuf::from(std::env::var("RECORDER_OUT_DIR").unwrap_or_else(|_| ".".into()));
    let config = RecorderConfig::load(None).unwrap_or_default();
    let speaker_format = speaker.as_ref().map_or(mic.format(), CpalCapture::format);
    let session = create_session(&out_dir, "demo-call", mic.format(), speaker_format, config)?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .map_err(|e| recorder::RecorderError::Pipeline(format!("installing Ctrl-C handler: {e}")))?;

    while running.load(Ordering::SeqCst) {
        if let Some(bytes) = mic.try_recv() {
            session.append_mic(&bytes, mic.format())?;
        }
        if let Some(bytes) = speaker.as_ref().and_then(CpalCapture::try_recv) {
            session.append_speaker(&bytes, speaker_format)?;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    let result = session.finalize()?;
    tracing::info!(final_path = %result.final_path.display(), "recording finalized");
    Ok(())
}
