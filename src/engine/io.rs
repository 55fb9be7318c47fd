//! Audio file I/O for Soundscape
//!
//! Decodes WAV bytes supplied by an asset source into an `AudioBuffer` at the
//! context rate, and writes rendered mixes back out as WAV.
//!
//! Sample rate conversion uses linear interpolation.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::{AudioBuffer, ChannelLayout};
use crate::error::{Result, SoundscapeError};

/// Export format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    /// Target sample rate
    pub sample_rate: u32,
    /// Bit depth: 16, 24, or 32 (float)
    pub bit_depth: u16,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat {
            sample_rate: 48000,
            bit_depth: 24,
        }
    }
}

impl ExportFormat {
    /// Create a new export format with the given sample rate and bit depth
    pub fn new(sample_rate: u32, bit_depth: u16) -> Self {
        ExportFormat {
            sample_rate,
            bit_depth,
        }
    }
}

/// Decode WAV bytes into a buffer resampled to `target_rate`
///
/// # Errors
/// * `InvalidAudio` - the bytes are not a readable WAV stream, or hold no samples
/// * `UnsupportedFormat` - more than two channels or an unsupported bit depth
pub fn decode_wav_bytes(bytes: &[u8], target_rate: u32) -> Result<AudioBuffer> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(|e| SoundscapeError::InvalidAudio {
        reason: format!("Failed to parse WAV data: {}", e),
        source: Some(Box::new(e)),
    })?;

    let spec = reader.spec();
    let layout = ChannelLayout::from_count(spec.channels as usize).ok_or_else(|| {
        SoundscapeError::UnsupportedFormat {
            format: format!("{}-channel audio (only mono/stereo supported)", spec.channels),
        }
    })?;
    let channels = layout.num_channels();

    let samples = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    if samples.len() < channels {
        return Err(SoundscapeError::InvalidAudio {
            reason: "WAV data contains no samples".to_string(),
            source: None,
        });
    }

    // A truncated stream may end mid-frame
    let whole_frames = samples.len() - samples.len() % channels;
    let decoded =
        AudioBuffer::from_interleaved(&samples[..whole_frames], layout, spec.sample_rate)?;
    let mut buffer = resample(&decoded, target_rate);
    buffer.sample_rate = target_rate;
    // Float WAVs may carry overs or NaN
    buffer.clamp_to_unit();
    Ok(buffer)
}

/// Decode a WAV file from disk
pub fn import_wav(path: &Path, target_rate: u32) -> Result<AudioBuffer> {
    let bytes = std::fs::read(path)?;
    decode_wav_bytes(&bytes, target_rate)
}

/// Encode a buffer as WAV bytes
pub fn encode_wav_bytes(buffer: &AudioBuffer, format: ExportFormat) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    write_wav(buffer, &mut cursor, format)?;
    Ok(cursor.into_inner())
}

/// Export an AudioBuffer to a WAV file
///
/// Resamples if the target sample rate differs from the buffer's rate.
pub fn export_wav(buffer: &AudioBuffer, path: &Path, format: ExportFormat) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    write_wav(buffer, &mut writer, format)
}

/// Resample a buffer to `target_rate` (linear interpolation)
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> AudioBuffer {
    if buffer.sample_rate == target_rate || buffer.sample_rate == 0 || target_rate == 0 {
        return buffer.clone();
    }
    AudioBuffer {
        samples: resample_channels(&buffer.samples, buffer.sample_rate, target_rate),
        sample_rate: target_rate,
    }
}

fn write_wav<W: std::io::Write + std::io::Seek>(
    buffer: &AudioBuffer,
    sink: W,
    format: ExportFormat,
) -> Result<()> {
    let layout = buffer
        .channel_layout()
        .ok_or_else(|| SoundscapeError::UnsupportedFormat {
            format: format!("{}-channel buffer", buffer.num_channels()),
        })?;

    let export_data = if format.sample_rate != buffer.sample_rate {
        resample_channels(&buffer.samples, buffer.sample_rate, format.sample_rate)
    } else {
        buffer.samples.clone()
    };
    let interleaved = interleave(&export_data);

    let spec = WavSpec {
        channels: layout.num_channels() as u16,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bit_depth,
        sample_format: if format.bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let mut writer = WavWriter::new(sink, spec)?;
    match format.bit_depth {
        16 => {
            for sample in interleaved {
                let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer.write_sample(scaled)?;
            }
        }
        24 => {
            for sample in interleaved {
                // 24-bit stored as i32 in hound
                let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                writer.write_sample(scaled)?;
            }
        }
        32 => {
            for sample in interleaved {
                writer.write_sample(sample)?;
            }
        }
        _ => {
            return Err(SoundscapeError::UnsupportedFormat {
                format: format!("{}-bit audio (only 16, 24, 32 supported)", format.bit_depth),
            });
        }
    }
    writer.finalize()?;

    Ok(())
}

// ============================================================================
// Internal helper functions
// ============================================================================

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let invalid = |e: hound::Error| SoundscapeError::InvalidAudio {
        reason: format!("Failed to read {}-bit samples: {}", bits_per_sample, e),
        source: Some(Box::new(e)),
    };

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 => 128.0,
                16 => 32768.0,
                24 => 8388608.0,
                32 => 2147483648.0,
                _ => {
                    return Err(SoundscapeError::UnsupportedFormat {
                        format: format!("{}-bit integer audio", bits_per_sample),
                    })
                }
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(invalid)
        }
    }
}

/// Interleave channels from [[L,L,...], [R,R,...]] to [L,R,L,R,...]
fn interleave(channels: &[Vec<f32>]) -> Vec<f32> {
    if channels.is_empty() {
        return Vec::new();
    }

    let frames = channels[0].len();
    let mut result = Vec::with_capacity(frames * channels.len());
    for frame in 0..frames {
        for channel in channels {
            result.push(channel[frame]);
        }
    }

    result
}

/// Resample audio channels to a different sample rate
fn resample_channels(channels: &[Vec<f32>], source_rate: u32, target_rate: u32) -> Vec<Vec<f32>> {
    let ratio = target_rate as f64 / source_rate as f64;

    channels
        .iter()
        .map(|channel| resample_linear(channel, ratio))
        .collect()
}

/// Linear interpolation resampling
fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let source_len = samples.len();
    let target_len = ((source_len as f64) * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(target_len);

    for i in 0..target_len {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < source_len {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else if src_idx < source_len {
            samples[src_idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ============================================================================
// Tests
// ============================================================================
