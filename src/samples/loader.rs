// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! WAV loading for user-supplied samples.
//!
//! Files are read fully into memory, mixed down to mono and converted to the output sample rate
//! so that playback never touches the disk.

use std::path::Path;

use hound::{SampleFormat, WavReader};
use rubato::{
    SincFixedIn, SincInterpolationParameters, SincInterpolationType, VecResampler, WindowFunction,
};
use tracing::info;

use super::{SampleBuffer, SampleError};

/// Loads a WAV file as a mono buffer at `target_rate`.
pub fn load_wav(path: &Path, target_rate: u32) -> Result<SampleBuffer, SampleError> {
    let wav_error = |source: hound::Error| SampleError::Wav {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = WavReader::open(path).map_err(wav_error)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(wav_error)?,
        (SampleFormat::Int, bits @ 1..=32) => {
            let max = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|x| x as f32 / max))
                .collect::<Result<Vec<_>, _>>()
                .map_err(wav_error)?
        }
        (format, bits) => {
            return Err(SampleError::UnsupportedFormat {
                path: path.to_path_buf(),
                bits,
                format,
            })
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let mono: Vec<f32> = samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    if mono.is_empty() {
        return Err(SampleError::Empty(path.to_path_buf()));
    }

    let data = if spec.sample_rate != target_rate {
        info!(
            path = ?path,
            source_rate = spec.sample_rate,
            target_rate,
            "Transcoding sample"
        );
        transcode(path, &mono, spec.sample_rate, target_rate)?
    } else {
        mono
    };

    let buffer = SampleBuffer::new(data, target_rate);
    info!(
        path = ?path,
        channels = spec.channels,
        duration_ms = (buffer.duration() * 1000.0) as u64,
        "Sample loaded"
    );
    Ok(buffer)
}

/// Input block size for the sinc resampler.
const INPUT_BLOCK_SIZE: usize = 1024;

/// Converts mono samples between rates with a sinc resampler. The output is aligned with the
/// input and trimmed to the converted duration.
fn transcode(
    path: &Path,
    samples: &[f32],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, SampleError> {
    let resample_error = |_| SampleError::Resample {
        path: path.to_path_buf(),
        source_rate,
        target_rate,
    };

    let ratio = f64::from(target_rate) / f64::from(source_rate);
    let expected = (samples.len() as f64 * ratio).ceil() as usize;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, INPUT_BLOCK_SIZE, 1)
        .map_err(|_e| SampleError::Resample {
            path: path.to_path_buf(),
            source_rate,
            target_rate,
        })?;
    let delay = resampler.output_delay();
    let mut scratch = resampler.output_buffer_allocate(true);
    let mut output = Vec::with_capacity(expected + delay);

    let mut remaining = samples;
    while remaining.len() >= resampler.input_frames_next() {
        let block = vec![remaining[..resampler.input_frames_next()].to_vec()];
        let (used, produced) = resampler
            .process_into_buffer(&block, &mut scratch, None)
            .map_err(resample_error)?;
        output.extend_from_slice(&scratch[0][..produced]);
        remaining = &remaining[used..];
    }

    let tail = vec![remaining.to_vec()];
    let mut wave_in = Some(&tail[..]);
    // Zero padding pushes the last input frames through the filter.
    while output.len() < expected + delay {
        let (_, produced) = resampler
            .process_partial_into_buffer(wave_in.take(), &mut scratch, None)
            .map_err(resample_error)?;
        if produced == 0 {
            break;
        }
        output.extend_from_slice(&scratch[0][..produced]);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use hound::{WavSpec, WavWriter};

    use super::*;

    fn write_wav(path: &Path, channels: u16, rate: u32, frames: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for sample in frames {
            writer.write_sample(*sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_stereo_mixes_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clap.wav");
        write_wav(&path, 2, 8000, &[16384, 0, 16384, 0, -16384, -16384]);

        let buffer = load_wav(&path, 8000).unwrap();
        assert_eq!(buffer.len(), 3);
        assert!((buffer.sample_at(0.0) - 0.25).abs() < 1e-6);
        assert!((buffer.sample_at(2.5 / 8000.0) + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_load_transcodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let frames: Vec<i16> = (0..4410).map(|i| (i % 100) as i16 * 100).collect();
        write_wav(&path, 1, 44100, &frames);

        let buffer = load_wav(&path, 48000).unwrap();
        assert_eq!(buffer.sample_rate(), 48000);
        assert_eq!(buffer.len(), (4410.0_f64 * (48000.0 / 44100.0)).ceil() as usize);

        // The sawtooth's average level survives resampling.
        let mean = (0..4800)
            .map(|i| buffer.sample_at(i as f64 / 48000.0))
            .skip(500)
            .take(3800)
            .sum::<f32>()
            / 3800.0;
        assert!((mean - 4950.0 / 32768.0).abs() < 0.01, "mean {}", mean);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_wav(&dir.path().join("missing.wav"), 44100);
        assert!(matches!(result, Err(SampleError::Wav { .. })));
    }

    #[test]
    fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        write_wav(&path, 1, 44100, &[]);
        assert!(matches!(load_wav(&path, 44100), Err(SampleError::Empty(_))));
    }

    #[test]
    fn test_transcode_keeps_level_and_timing() {
        // Silence, then a constant level halfway through.
        let mut samples = vec![0.0; 2205];
        samples.extend(vec![0.5; 2205]);

        let result = transcode(Path::new("step.wav"), &samples, 44100, 48000).unwrap();
        assert_eq!(result.len(), (4410.0_f64 * (48000.0 / 44100.0)).ceil() as usize);

        // The step lands where it was in the source, not shifted by the filter delay.
        assert!(result[1000..2350].iter().all(|s| s.abs() < 0.05));
        assert!(result[2450..4500].iter().all(|s| (s - 0.5).abs() < 0.05));
    }
}
