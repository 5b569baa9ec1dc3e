//! Null (silent) decoder implementation
//!
//! Provides a decoder that produces silence for a specified duration.
//! Used as a stand-in when an audio file is missing but timing must be kept.

use super::decoder::{DecodeResult, SoundDecoder};
use super::formats::AudioFormat;

/// Null decoder that produces silence
pub struct NullDecoder {
    /// Sample frequency in Hz
    frequency: u32,
    /// Output format
    format: AudioFormat,
    /// Total length in frames
    length: u64,
    /// Current frame
    position: u64,
}

impl NullDecoder {
    /// Create a null decoder of `frames` frames of mono silence at 11025 Hz
    pub fn new(frames: u64) -> Self {
        Self {
            frequency: 11025,
            format: AudioFormat::Mono16,
            length: frames,
            position: 0,
        }
    }

    /// Create a null decoder lasting `duration_seconds`
    pub fn with_duration(duration_seconds: f32) -> Self {
        let mut decoder = Self::new(0);
        decoder.length = (duration_seconds.max(0.0) * decoder.frequency as f32) as u64;
        decoder
    }
}

impl SoundDecoder for NullDecoder {
    fn name(&self) -> &'static str {
        "Null"
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, frame: u64) -> DecodeResult<u64> {
        self.position = frame.min(self.length);
        Ok(self.position)
    }

    fn decode(&mut self, buf: &mut [i16]) -> DecodeResult<usize> {
        let channels = self.format.channels() as usize;
        let frames = ((buf.len() / channels) as u64).min(self.length - self.position) as usize;
        buf[..frames * channels].fill(0);
        self.position += frames as u64;
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_decoder_produces_silence() {
        let mut decoder = NullDecoder::new(10);
        let mut buf = [5i16; 8];
        assert_eq!(decoder.decode(&mut buf).unwrap(), 8);
        assert!(buf.iter().all(|&s| s == 0));
        assert_eq!(decoder.decode(&mut buf).unwrap(), 2);
        assert_eq!(decoder.decode(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_null_decoder_with_duration() {
        let decoder = NullDecoder::with_duration(2.0);
        assert_eq!(decoder.name(), "Null");
        assert_eq!(decoder.frequency(), 11025);
        assert_eq!(decoder.length(), 22050);
        assert_eq!(decoder.format(), AudioFormat::Mono16);
    }

    #[test]
    fn test_null_decoder_seek_clamps() {
        let mut decoder = NullDecoder::new(100);
        assert_eq!(decoder.seek(40).unwrap(), 40);
        assert_eq!(decoder.position(), 40);
        assert_eq!(decoder.seek(1000).unwrap(), 100);
    }
}
