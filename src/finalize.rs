//! Finalizer (C9): tail flush, segment merge, and optional two-pass offline
//! normalization.

use std::path::{Path, PathBuf};

use hound::SampleFormat as HoundSampleFormat;

use crate::error::{RecorderError, Result};
use crate::wav::merge_segments;

/// Merge `segments` into `segments[0]`'s path if more than one exists,
/// otherwise leave the single segment untouched.
pub fn merge_if_needed(segments: &[PathBuf]) -> Result<PathBuf> {
    if segments.is_empty() {
        return Err(RecorderError::Writer("finalize called with no segments".to_string()));
    }
    let dest = segments[0].clone();
    if segments.len() > 1 {
        merge_segments(segments, &dest)?;
    }
    Ok(dest)
}

const HEADROOM_CEILING_DBFS: f32 = -1.0;

/// Two-pass offline normalization: pass 1 measures integrated per-channel
/// RMS and peak, pass 2 applies gain bounded by headroom to the ceiling,
/// a hard clamp, and a `tanh` soft clip. Writes to a temp file and replaces
/// the original atomically.
pub fn normalize_offline(path: &Path, target_rms_dbfs: f32) -> Result<()> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| RecorderError::Writer(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        HoundSampleFormat::Int => reader
            .into_samples::<i32>()
            .map(|s| s.unwrap_or(0) as f32 / 32_768.0)
            .collect(),
        HoundSampleFormat::Float => reader.into_samples::<f32>().map(|s| s.unwrap_or(0.0)).collect(),
    };

    let mut sum_sq = vec![0.0f64; channels];
    let mut peak = vec![0.0f32; channels];
    let mut count = vec![0u64; channels];
    for (i, &s) in samples.iter().enumerate() {
        let ch = i % channels;
        sum_sq[ch] += (s as f64) * (s as f64);
        peak[ch] = peak[ch].max(s.abs());
        count[ch] += 1;
    }

    let ceiling = db_to_linear(HEADROOM_CEILING_DBFS);
    let mut gain = vec![1.0f32; channels];
    for ch in 0..channels {
        if count[ch] == 0 {
            continue;
        }
        let rms = ((sum_sq[ch] / count[ch] as f64).sqrt()) as f32;
        if rms <= 1e-9 {
            continue;
        }
        let current_db = 20.0 * rms.log10();
        let needed_db = target_rms_dbfs - current_db;
        let needed_linear = db_to_linear(needed_db);
        let headroom_linear = if peak[ch] > 1e-9 {
            ceiling / peak[ch]
        } else {
            needed_linear
        };
        gain[ch] = needed_linear.min(headroom_linear).max(0.0);
    }

    let normalized: Vec<f32> = samples
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let g = gain[i % channels];
            let scaled = (s * g).clamp(-ceiling, ceiling);
            ceiling * soft_clip(scaled / ceiling)
        })
        .collect();

    let tmp_path = path.with_extension("normalize.tmp");
    {
        let mut writer = hound::WavWriter::create(&tmp_path, spec)
            .map_err(|e| RecorderError::Writer(e.to_string()))?;
        match spec.sample_format {
            HoundSampleFormat::Int => {
                for &s in &normalized {
                    let v = (s * 32_767.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                    writer
                        .write_sample(v)
                        .map_err(|e| RecorderError::Writer(e.to_string()))?;
                }
            }
            HoundSampleFormat::Float => {
                for &s in &normalized {
                    writer
                        .write_sample(s)
                        .map_err(|e| RecorderError::Writer(e.to_string()))?;
                }
            }
        }
        writer.finalize().map_err(|e| RecorderError::Writer(e.to_string()))?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

const SOFT_CLIP_K: f32 = 1.5;

fn soft_clip(x: f32) -> f32 {
    (SOFT_CLIP_K * x).tanh() / SOFT_CLIP_K.tanh()
}

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}
