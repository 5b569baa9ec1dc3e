//! Sound decoding and device backends
//!
//! # Architecture
//!
//! - `SoundDecoder` trait defines the pull-based decoder interface
//! - `AudioFormat` describes the interleaved 16-bit output
//! - Decoder implementations: Ogg Vorbis, WAV, in-memory PCM, silence
//! - `backend` holds the OpenAL-like device abstraction and its
//!   implementations

pub mod backend;
pub mod decoder;
pub mod formats;
pub mod null;
pub mod ogg;
pub mod pcm;
pub mod wav;

pub use decoder::{open_decoder, DecodeError, DecodeResult, LoopInfo, SoundDecoder};
pub use formats::AudioFormat;
pub use null::NullDecoder;
pub use ogg::OggDecoder;
pub use pcm::PcmDecoder;
pub use wav::WavDecoder;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let decoder = NullDecoder::new(100);
        assert_eq!(decoder.format(), AudioFormat::Mono16);
        assert_eq!(decoder.length(), 100);
    }
}
