//! WAV file I/O for segment and session artifacts.
//!
//! All files are RIFF/WAVE, PCM format code 1, mono, 16-bit little-endian at
//! the configured sample rate. Writes go to a temp file in the same
//! directory followed by a rename, so readers never observe a torn header.

use crate::error::{LivecapError, Result};
use std::path::Path;

/// Writes `samples` as a mono 16-bit WAV via write-to-temp + rename.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let tmp_path = path.with_extension("wav.tmp");
    {
        let mut writer =
            hound::WavWriter::create(&tmp_path, spec).map_err(|e| LivecapError::Persistence {
                path: tmp_path.display().to_string(),
                message: format!("Failed to create WAV writer: {}", e),
            })?;

        let mut int_writer = writer.get_i16_writer(samples.len() as u32);
        for &sample in samples {
            int_writer.write_sample(sample);
        }
        int_writer.flush().map_err(|e| LivecapError::Persistence {
            path: tmp_path.display().to_string(),
            message: format!("Failed to write WAV samples: {}", e),
        })?;

        writer.finalize().map_err(|e| LivecapError::Persistence {
            path: tmp_path.display().to_string(),
            message: format!("Failed to finalize WAV: {}", e),
        })?;
    }

    std::fs::rename(&tmp_path, path).map_err(|e| LivecapError::Persistence {
        path: path.display().to_string(),
        message: format!("Failed to rename temp WAV into place: {}", e),
    })?;

    Ok(())
}

/// Reads all samples from a mono 16-bit WAV file.
pub fn read_wav(path: &Path) -> Result<Vec<i16>> {
    let mut reader = hound::WavReader::open(path).map_err(|e| LivecapError::AudioCapture {
        message: format!("Failed to parse WAV file {}: {}", path.display(), e),
    })?;

    let spec = reader.spec();
    if spec.channels != 1 || spec.bits_per_sample != 16 {
        return Err(LivecapError::AudioCapture {
            message: format!(
                "Unexpected WAV format in {}: {} channels, {} bits",
                path.display(),
                spec.channels,
                spec.bits_per_sample
            ),
        });
    }

    reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LivecapError::AudioCapture {
            message: format!("Failed to read WAV samples from {}: {}", path.display(), e),
        })
}

/// Concatenates the given WAV files, in order, into one output WAV.
///
/// Returns the total sample count. Sample-for-sample, the output equals the
/// ordered concatenation of the inputs.
pub fn combine_wavs(inputs: &[std::path::PathBuf], output: &Path, sample_rate: u32) -> Result<u64> {
    let mut combined: Vec<i16> = Vec::new();
    for input in inputs {
        combined.extend(read_wav(input)?);
    }
    let total = combined.len() as u64;
    write_wav(output, &combined, sample_rate)?;
    Ok(total)
}

/// Rate conversion by linear interpolation between neighbouring samples.
pub fn resample(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let step = f64::from(from_rate) / f64::from(to_rate);
    let output_len = (input.len() as f64 / step).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    let mut cursor = 0.0f64;
    for _ in 0..output_len {
        let base = cursor as usize;
        let sample = match input.get(base + 1) {
            Some(&next) => {
                let weight = cursor - base as f64;
                let here = f64::from(input[base]);
                (here + (f64::from(next) - here) * weight) as i16
            }
            // Past the final pair: hold the last sample.
            None => input[base.min(input.len() - 1)],
        };
        output.push(sample);
        cursor += step;
    }
    output
}
