//! Canonical RIFF/WAVE container I/O: a 44-byte header followed by
//! interleaved samples, with length fields patched on close.
//!
//! Built directly on [`hound`] rather than hand-rolling chunk parsing —
//! `hound` already understands both PCM and IEEE-float format codes, which
//! is exactly the pair this pipeline needs (16-bit dithered PCM, or
//! verbatim float32).

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::config::BitsPerSample;
use crate::error::{RecorderError, Result};

/// Channel count and bit depth describing a segment's on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: BitsPerSample,
}

impl WavFormat {
    fn spec(self) -> WavSpec {
        match self.bits_per_sample {
            BitsPerSample::Sixteen => WavSpec {
                channels: self.channels,
                sample_rate: self.sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
            BitsPerSample::Float32 => WavSpec {
                channels: self.channels,
                sample_rate: self.sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        }
    }
}

/// A single open WAV segment, accepting pre-quantized interleaved bytes.
pub struct WavSegment {
    path: PathBuf,
    format: WavFormat,
    writer: WavWriter<std::io::BufWriter<std::fs::File>>,
}

impl WavSegment {
    /// Create a new segment at `path`, truncating any existing file.
    pub fn create(path: &Path, format: WavFormat) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = WavWriter::create(path, format.spec())
            .map_err(|e| RecorderError::Writer(format!("{}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            format,
            writer,
        })
    }

    /// Path of this segment on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format this segment was opened with.
    pub fn format(&self) -> WavFormat {
        self.format
    }

    /// Append pre-quantized interleaved 16-bit PCM bytes.
    pub fn write_i16_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for chunk in bytes.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            self.writer
                .write_sample(sample)
                .map_err(|e| RecorderError::Writer(e.to_string()))?;
        }
        Ok(())
    }

    /// Append verbatim interleaved float32 bytes.
    pub fn write_f32_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for chunk in bytes.chunks_exact(4) {
            let sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.writer
                .write_sample(sample)
                .map_err(|e| RecorderError::Writer(e.to_string()))?;
        }
        Ok(())
    }

    /// Flush buffered samples to disk without closing the file.
    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| RecorderError::Writer(e.to_string()))
    }

    /// Finalize the segment, patching the RIFF length fields.
    pub fn finalize(self) -> Result<()> {
        self.writer
            .finalize()
            .map_err(|e| RecorderError::Writer(e.to_string()))
    }
}

/// Concatenate sample data from `segments` (in order) into a single WAV at
/// `dest`, verifying that every segment shares an identical format.
///
/// Writes to `{dest}.merge.tmp` first and atomically renames over `dest`
/// only once every segment has been read successfully.
pub fn merge_segments(segments: &[PathBuf], dest: &Path) -> Result<()> {
    if segments.is_empty() {
        return Ok(());
    }

    let mut first_spec: Option<hound::WavSpec> = None;
    let tmp_path = dest.with_extension("merge.tmp");
    {
        let mut tmp_writer: Option<WavWriter<std::io::BufWriter<std::fs::File>>> = None;

        for seg_path in segments {
            let reader = hound::WavReader::open(seg_path)
                .map_err(|e| RecorderError::Writer(format!("{}: {e}", seg_path.display())))?;
            let spec = reader.spec();
            match &first_spec {
                None => first_spec = Some(spec),
                Some(expected) if *expected != spec => {
                    return Err(RecorderError::Writer(format!(
                        "segment {} format {:?} does not match first segment format {:?}",
                        seg_path.display(),
                        spec,
                        expected
                    )));
                }
                Some(_) => {}
            }

            if tmp_writer.is_none() {
                tmp_writer = Some(
                    WavWriter::create(&tmp_path, spec)
                        .map_err(|e| RecorderError::Writer(e.to_string()))?,
                );
            }
            let writer = tmp_writer.as_mut().expect("initialized above");

            match spec.sample_format {
                SampleFormat::Int => {
                    for sample in reader.into_samples::<i32>() {
                        let s = sample.map_err(|e| RecorderError::Writer(e.to_string()))?;
                        writer
                            .write_sample(s as i16)
                            .map_err(|e| RecorderError::Writer(e.to_string()))?;
                    }
                }
                SampleFormat::Float => {
                    for sample in reader.into_samples::<f32>() {
                        let s = sample.map_err(|e| RecorderError::Writer(e.to_string()))?;
                        writer
                            .write_sample(s)
                            .map_err(|e| RecorderError::Writer(e.to_string()))?;
                    }
                }
            }
        }

        if let Some(writer) = tmp_writer {
            writer
                .finalize()
                .map_err(|e| RecorderError::Writer(e.to_string()))?;
        }
    }

    std::fs::rename(&tmp_path, dest)?;
    for seg_path in segments.iter().skip(1) {
        let _ = std::fs::remove_file(seg_path);
    }
    if segments[0] != *dest {
        let _ = std::fs::remove_file(&segments[0]);
    }
    Ok(())
}
