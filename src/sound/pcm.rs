//! In-memory PCM decoder
//!
//! Serves interleaved 16-bit samples that are already in memory, e.g.
//! synthesized effects or audio produced by another subsystem. Loop tags
//! can be attached the same way a container would carry them.

use super::decoder::{DecodeError, DecodeResult, LoopInfo, SoundDecoder};
use super::formats::AudioFormat;

/// Decoder over a block of interleaved samples
#[derive(Debug, Clone)]
pub struct PcmDecoder {
    samples: Vec<i16>,
    format: AudioFormat,
    frequency: u32,
    position: u64,
    loop_info: LoopInfo,
}

impl PcmDecoder {
    /// Wrap interleaved `samples`; a trailing partial frame is rejected
    pub fn new(samples: Vec<i16>, format: AudioFormat, frequency: u32) -> DecodeResult<Self> {
        if samples.len() % format.channels() as usize != 0 {
            return Err(DecodeError::InvalidData(format!(
                "{} samples do not form whole {:?} frames",
                samples.len(),
                format
            )));
        }
        if frequency == 0 {
            return Err(DecodeError::InvalidData("zero sample rate".to_string()));
        }
        Ok(Self {
            samples,
            format,
            frequency,
            position: 0,
            loop_info: LoopInfo::default(),
        })
    }

    /// Attach loop tags, as if read from a container
    pub fn with_loop(mut self, start: u64, end: u64) -> Self {
        self.loop_info = LoopInfo {
            enabled: true,
            start: Some(start),
            end: Some(end),
        };
        self
    }
}

impl SoundDecoder for PcmDecoder {
    fn name(&self) -> &'static str {
        "PCM"
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn length(&self) -> u64 {
        (self.samples.len() / self.format.channels() as usize) as u64
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, frame: u64) -> DecodeResult<u64> {
        self.position = frame.min(self.length());
        Ok(self.position)
    }

    fn decode(&mut self, buf: &mut [i16]) -> DecodeResult<usize> {
        let channels = self.format.channels() as usize;
        let frames = ((buf.len() / channels) as u64).min(self.length() - self.position) as usize;
        let from = self.position as usize * channels;
        buf[..frames * channels].copy_from_slice(&self.samples[from..from + frames * channels]);
        self.position += frames as u64;
        Ok(frames)
    }

    fn loop_info(&self) -> LoopInfo {
        self.loop_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_decoder_reads_in_order() {
        let mut decoder = PcmDecoder::new((0..6).collect(), AudioFormat::Stereo16, 8000).unwrap();
        assert_eq!(decoder.length(), 3);

        let mut buf = [0i16; 4];
        assert_eq!(decoder.decode(&mut buf).unwrap(), 2);
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), 1);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_pcm_decoder_rejects_partial_frames() {
        let result = PcmDecoder::new(vec![0; 3], AudioFormat::Stereo16, 8000);
        assert!(matches!(result, Err(DecodeError::InvalidData(_))));
    }

    #[test]
    fn test_pcm_decoder_loop_tags() {
        let decoder = PcmDecoder::new(vec![0; 100], AudioFormat::Mono16, 8000)
            .unwrap()
            .with_loop(10, 90);
        assert_eq!(
            decoder.loop_info(),
            LoopInfo {
                enabled: true,
                start: Some(10),
                end: Some(90)
            }
        );
    }
}
