//! Format Normalizer (C1): raw device bytes → mono float32 at the pipeline rate.

use super::format::SampleFormat;

/// Convert a raw byte span to mono float32 samples at `pipeline_rate`.
///
/// Unknown or malformed input never errors: unsupported encodings are
/// treated as float32 with a best-effort downmix, and a byte length that is
/// not a multiple of the frame width truncates the trailing partial frame.
pub fn to_mono_f32(bytes: &[u8], src_fmt: SampleFormat, pipeline_rate: u32) -> Vec<f32> {
    if bytes.is_empty() {
        return Vec::new();
    }

    let mono = match src_fmt {
        SampleFormat::F32 { channels, .. } => decode_f32(bytes, channels),
        SampleFormat::I16 { channels, .. } => decode_i16(bytes, channels),
    };

    let src_rate = src_fmt.sample_rate();
    if src_rate == pipeline_rate || src_rate == 0 {
        mono
    } else {
        resample_linear(&mono, src_rate, pipeline_rate)
    }
}

fn decode_f32(bytes: &[u8], channels: u16) -> Vec<f32> {
    let ch = channels.max(1) as usize;
    let frame_bytes = ch * 4;
    let n_frames = bytes.len() / frame_bytes;
    let mut out = Vec::with_capacity(n_frames);
    for frame in bytes[..n_frames * frame_bytes].chunks_exact(frame_bytes) {
        let mut sum = 0.0f32;
        for sample in frame.chunks_exact(4) {
            let arr: [u8; 4] = sample.try_into().unwrap_or([0; 4]);
            sum += f32::from_le_bytes(arr);
        }
        out.push(sum / ch as f32);
    }
    out
}

fn decode_i16(bytes: &[u8], channels: u16) -> Vec<f32> {
    let ch = channels.max(1) as usize;
    let frame_bytes = ch * 2;
    let n_frames = bytes.len() / frame_bytes;
    let mut out = Vec::with_capacity(n_frames);
    for frame in bytes[..n_frames * frame_bytes].chunks_exact(frame_bytes) {
        let mut sum = 0.0f32;
        for sample in frame.chunks_exact(2) {
            let arr: [u8; 2] = sample.try_into().unwrap_or([0; 2]);
            sum += i16::from_le_bytes(arr) as f32 / 32_768.0;
        }
        out.push(sum / ch as f32);
    }
    out
}

/// Linear-interpolation resampler. No anti-aliasing filter is applied beyond
/// the later post-LPF stage; acceptable because the pipeline rate is always
/// at or above typical device rates.
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if samples.is_empty() || src_rate == dst_rate || src_rate == 0 {
        return samples.to_vec();
    }

    let out_len = ((samples.len() as u64) * (dst_rate as u64) / (src_rate as u64)) as usize;
    let ratio = src_rate as f64 / dst_rate as f64;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;
        let a = samples[idx.min(samples.len() - 1)] as f64;
        let b = samples[(idx + 1).min(samples.len() - 1)] as f64;
        out.push((a * (1.0 - frac) + b * frac) as f32);
    }
    out
}

/// Coerce a source rate to the pipeline rate policy: 48 000 and 44 100 pass
/// through untouched, anything else maps to 48 000.
pub fn coerce_pipeline_rate(src_rate: u32) -> u32 {
    match src_rate {
        48_000 | 44_100 => src_rate,
        _ => 48_000,
    }
}
