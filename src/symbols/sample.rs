//! Decoded sample data — what a resolved sound identifier points at.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Errors from loading or decoding a sample.
#[derive(Debug)]
pub enum SampleError {
    /// WAV decoding or I/O error.
    Wav(hound::Error),
    /// The file contains no frames.
    Empty,
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleError::Wav(e) => write!(f, "WAV error: {e}"),
            SampleError::Empty => write!(f, "sample contains no audio"),
        }
    }
}

impl std::error::Error for SampleError {}

impl From<hound::Error> for SampleError {
    fn from(e: hound::Error) -> Self {
        SampleError::Wav(e)
    }
}

/// A mono audio buffer at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleData {
    frames: Vec<f32>,
    sample_rate: u32,
}

impl SampleData {
    pub fn from_mono(frames: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
        }
    }

    /// Decode a WAV stream, mixing multi-channel sources down to mono.
    /// Supports integer and 32-bit float formats.
    pub fn from_wav<R: Read + Seek>(reader: R) -> Result<Self, SampleError> {
        let wav = hound::WavReader::new(reader)?;
        let spec = wav.spec();
        let channels = spec.channels as usize;

        let raw: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max_val = (1u32 << (spec.bits_per_sample - 1)) as f32;
                wav.into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_val))
                    .collect::<Result<_, _>>()?
            }
            hound::SampleFormat::Float => {
                wav.into_samples::<f32>().collect::<Result<_, _>>()?
            }
        };

        if raw.is_empty() {
            return Err(SampleError::Empty);
        }

        let frames: Vec<f32> = raw
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        Ok(Self {
            frames,
            sample_rate: spec.sample_rate,
        })
    }

    pub fn from_wav_file(path: &Path) -> Result<Self, SampleError> {
        let file = File::open(path).map_err(|e| SampleError::Wav(hound::Error::IoError(e)))?;
        Self::from_wav(BufReader::new(file))
    }

    pub fn frames(&self) -> &[f32] {
        &self.frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames.len() as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav_f32(frames: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut buf, spec).unwrap();
        for &s in frames {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        buf.into_inner()
    }

    #[test]
    fn decode_mono_f32() {
        let data = wav_f32(&[0.0, 0.5, -0.5], 44100, 1);
        let sample = SampleData::from_wav(Cursor::new(data)).unwrap();
        assert_eq!(sample.frames().len(), 3);
        assert!((sample.frames()[1] - 0.5).abs() < 1e-6);
        assert_eq!(sample.sample_rate(), 44100);
    }

    #[test]
    fn stereo_mixes_down() {
        // L=0.8 R=0.2 -> 0.5
        let data = wav_f32(&[0.8, 0.2], 48000, 2);
        let sample = SampleData::from_wav(Cursor::new(data)).unwrap();
        assert_eq!(sample.frames().len(), 1);
        assert!((sample.frames()[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_wav_is_an_error() {
        let data = wav_f32(&[], 44100, 1);
        assert!(matches!(
            SampleData::from_wav(Cursor::new(data)),
            Err(SampleError::Empty)
        ));
    }

    #[test]
    fn duration() {
        let sample = SampleData::from_mono(vec![0.0; 22050], 44100);
        assert!((sample.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn decode_int_16bit() {
        let mut buf = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut buf, spec).unwrap();
        writer.write_sample(16384i16).unwrap();
        writer.finalize().unwrap();
        let sample = SampleData::from_wav(Cursor::new(buf.into_inner())).unwrap();
        assert!((sample.frames()[0] - 0.5).abs() < 1e-3);
    }
}
