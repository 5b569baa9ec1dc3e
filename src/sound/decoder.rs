//! Sound decoder trait definition
//!
//! Defines the `SoundDecoder` trait every file decoder implements and the
//! `open_decoder` entry point that picks a decoder from a file extension.
//! Positions, lengths and loop points are counted in frames (one sample per
//! channel).

use std::path::Path;

use super::formats::AudioFormat;
use super::ogg::OggDecoder;
use super::wav::WavDecoder;

/// Error type for decoder operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),
    /// Invalid or corrupted audio data
    #[error("Invalid audio data: {0}")]
    InvalidData(String),
    /// Unsupported audio format or file extension
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
    /// Seek failed
    #[error("Seek failed: {0}")]
    SeekFailed(String),
    /// Generic decoder error
    #[error("Decoder error: {0}")]
    DecoderError(String),
}

/// Result type for decoder operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Loop metadata embedded in a container
///
/// `start`/`end` are frame positions; `None` means the tag was absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopInfo {
    /// Whether the file asks to be looped
    pub enabled: bool,
    /// First frame of the loop region
    pub start: Option<u64>,
    /// One past the last frame of the loop region
    pub end: Option<u64>,
}

/// Sound decoder trait
///
/// A pull-based decoder producing interleaved 16-bit PCM on demand.
pub trait SoundDecoder: Send {
    /// Returns the decoder name (e.g., "Ogg Vorbis", "WAV")
    fn name(&self) -> &'static str;

    /// Returns the output format
    fn format(&self) -> AudioFormat;

    /// Returns the sample frequency in Hz
    fn frequency(&self) -> u32;

    /// Returns the total length in frames
    fn length(&self) -> u64;

    /// Returns the frame the next `decode` call starts at
    fn position(&self) -> u64;

    /// Seek to a specific frame
    ///
    /// # Returns
    /// Actual position after seeking (clamped to the length)
    fn seek(&mut self, frame: u64) -> DecodeResult<u64>;

    /// Decode audio data into the provided buffer
    ///
    /// `buf` holds interleaved samples; only whole frames are written.
    ///
    /// # Returns
    /// Number of frames decoded, 0 at end of data
    fn decode(&mut self, buf: &mut [i16]) -> DecodeResult<usize>;

    /// Returns loop tags found in the container
    fn loop_info(&self) -> LoopInfo {
        LoopInfo::default()
    }
}

/// Open a decoder for `path`, chosen by file extension
pub fn open_decoder(path: &Path) -> DecodeResult<Box<dyn SoundDecoder>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "ogg" | "oga" => Ok(Box::new(OggDecoder::open(path)?)),
        "wav" | "wave" => Ok(Box::new(WavDecoder::open(path)?)),
        _ => Err(DecodeError::UnsupportedFormat(format!(
            "{}: no decoder for extension '{}'",
            path.display(),
            ext
        ))),
    }
}
