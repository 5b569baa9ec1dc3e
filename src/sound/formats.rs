//! Audio format definitions shared by decoders and backends
//!
//! Everything inside the crate moves interleaved signed 16-bit PCM, so a
//! format is fully described by its channel count.

/// Sample layout of decoded audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    /// 16-bit mono (2 bytes per frame)
    Mono16,
    /// 16-bit stereo (4 bytes per frame)
    Stereo16,
}

impl AudioFormat {
    /// Returns the format for a channel count, if supported
    pub fn from_channels(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(AudioFormat::Mono16),
            2 => Some(AudioFormat::Stereo16),
            _ => None,
        }
    }

    /// Returns the number of channels
    pub fn channels(&self) -> u16 {
        match self {
            AudioFormat::Mono16 => 1,
            AudioFormat::Stereo16 => 2,
        }
    }

    /// Returns the number of bytes in one frame (one sample per channel)
    pub fn bytes_per_frame(&self) -> usize {
        self.channels() as usize * std::mem::size_of::<i16>()
    }

    /// Returns true if this is a stereo format
    pub fn is_stereo(&self) -> bool {
        matches!(self, AudioFormat::Stereo16)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::Stereo16
    }
}
