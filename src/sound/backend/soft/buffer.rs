// buffer.rs - Software device buffers

//! Buffers of the software device hold a private copy of uploaded PCM.

use crate::sound::formats::AudioFormat;

/// Audio buffer containing PCM data
#[derive(Debug, Clone, Default)]
pub struct SoftBuffer {
    /// Layout of `samples`
    pub format: AudioFormat,
    /// Sample rate in Hz, 0 until data is uploaded
    pub frequency: u32,
    /// Interleaved samples
    pub samples: Vec<i16>,
}

impl SoftBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the buffer contents
    pub fn fill(&mut self, format: AudioFormat, samples: &[i16], frequency: u32) {
        self.format = format;
        self.frequency = frequency;
        self.samples.clear();
        self.samples.extend_from_slice(samples);
    }

    /// Length in frames
    pub fn frames(&self) -> u64 {
        (self.samples.len() / self.format.channels() as usize) as u64
    }

    /// Size of the data in bytes
    pub fn size(&self) -> usize {
        self.samples.len() * std::mem::size_of::<i16>()
    }

    /// Playback rate in frames per second of wall time at unit pitch
    pub fn rate(&self) -> f64 {
        f64::from(self.frequency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_new() {
        let buf = SoftBuffer::new();
        assert_eq!(buf.frames(), 0);
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.frequency, 0);
    }

    #[test]
    fn test_buffer_fill() {
        let mut buf = SoftBuffer::new();
        buf.fill(AudioFormat::Stereo16, &[0; 200], 22050);
        assert_eq!(buf.frames(), 100);
        assert_eq!(buf.size(), 400);
        assert_eq!(buf.rate(), 22050.0);

        buf.fill(AudioFormat::Mono16, &[1; 10], 8000);
        assert_eq!(buf.frames(), 10);
        assert_eq!(buf.samples, vec![1; 10]);
    }
}
