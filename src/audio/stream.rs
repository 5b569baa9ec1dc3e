//! Audio streams: pull-based decoding with loop points
//!
//! An `AudioStream` wraps a decoder and owns the loop region. Loop points are
//! frame positions kept within `0 <= loop_start < loop_end <= length`; the loop
//! end defaults to the full length and is resolved when first needed.

use std::path::Path;

use crate::sound::decoder::{open_decoder, DecodeResult, SoundDecoder};
use crate::sound::formats::AudioFormat;

/// A decoder plus looping state
pub struct AudioStream {
    decoder: Box<dyn SoundDecoder>,
    looping: bool,
    loop_start: u64,
    loop_end: Option<u64>,
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("decoder", &self.decoder.name())
            .field("position", &self.decoder.position())
            .field("looping", &self.looping)
            .field("loop_start", &self.loop_start)
            .field("loop_end", &self.loop_end)
            .finish()
    }
}

impl AudioStream {
    /// Wrap a decoder, adopting any loop tags it carries
    pub fn new(decoder: Box<dyn SoundDecoder>) -> Self {
        let info = decoder.loop_info();
        let mut stream = Self {
            decoder,
            looping: false,
            loop_start: 0,
            loop_end: None,
        };
        if let Some(end) = info.end {
            stream.clamp_loop_end(end);
        }
        if let Some(start) = info.start {
            stream.clamp_loop_start(start);
        }
        stream.looping = info.enabled;
        stream
    }

    /// Open a file with the decoder matching its extension
    pub fn open(path: &Path) -> DecodeResult<Self> {
        Ok(Self::new(open_decoder(path)?))
    }

    pub fn decoder_name(&self) -> &'static str {
        self.decoder.name()
    }

    pub fn format(&self) -> AudioFormat {
        self.decoder.format()
    }

    pub fn channels(&self) -> u16 {
        self.decoder.format().channels()
    }

    pub fn frequency(&self) -> u32 {
        self.decoder.frequency()
    }

    /// Total length in frames
    pub fn length(&self) -> u64 {
        self.decoder.length()
    }

    /// Frame the next read starts at
    pub fn position(&self) -> u64 {
        self.decoder.position()
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn loop_start(&self) -> u64 {
        self.loop_start
    }

    /// End of the loop region (exclusive), defaulting to the full length
    pub fn loop_end(&self) -> u64 {
        let length = self.length();
        self.loop_end.unwrap_or(length).min(length)
    }

    pub fn set_looping(&mut self, looping: bool) -> DecodeResult<()> {
        self.looping = looping;
        self.wrap_if_past_end()
    }

    /// Set the loop start, clamped below the loop end
    pub fn set_loop_start(&mut self, frame: u64) -> DecodeResult<()> {
        self.clamp_loop_start(frame);
        self.wrap_if_past_end()
    }

    /// Set the loop end, clamped to `(loop_start, length]`
    pub fn set_loop_end(&mut self, frame: u64) -> DecodeResult<()> {
        self.clamp_loop_end(frame);
        self.wrap_if_past_end()
    }

    fn clamp_loop_start(&mut self, frame: u64) {
        self.loop_start = frame.min(self.loop_end().saturating_sub(1));
    }

    fn clamp_loop_end(&mut self, frame: u64) {
        let end = frame.max(self.loop_start + 1).min(self.length());
        self.loop_end = Some(end);
        if self.loop_start >= end {
            self.loop_start = end.saturating_sub(1);
        }
    }

    fn wrap_if_past_end(&mut self) -> DecodeResult<()> {
        if self.looping && self.position() >= self.loop_end() {
            self.decoder.seek(self.loop_start)?;
        }
        Ok(())
    }

    /// Seek to a frame (clamped to the length)
    pub fn seek(&mut self, frame: u64) -> DecodeResult<u64> {
        self.decoder.seek(frame)
    }

    /// Return to where playback begins: the loop start when looping, else 0
    pub fn rewind(&mut self) -> DecodeResult<u64> {
        let start = if self.looping { self.loop_start } else { 0 };
        self.decoder.seek(start)
    }

    /// Whether a non-looping stream has nothing left to read
    pub fn at_end(&self) -> bool {
        !self.looping && self.position() >= self.length()
    }

    /// Read interleaved frames into `buf`.
    ///
    /// While looping, a read never crosses the loop end: it stops short at
    /// `loop_end` and the next read continues from `loop_start`. Only whole
    /// frames are read.
    ///
    /// # Returns
    /// Number of frames read; 0 only at the end of a non-looping stream
    pub fn read(&mut self, buf: &mut [i16]) -> DecodeResult<usize> {
        self.read_chunk(buf).map(|(_, frames)| frames)
    }

    /// Like [`read`](Self::read), also returning the stream frame the chunk
    /// starts at
    pub fn read_chunk(&mut self, buf: &mut [i16]) -> DecodeResult<(u64, usize)> {
        let channels = self.channels() as usize;
        let max_frames = buf.len() / channels;
        if max_frames == 0 {
            return Ok((self.position(), 0));
        }
        if !self.looping {
            let origin = self.position();
            let frames = self.decoder.decode(&mut buf[..max_frames * channels])?;
            return Ok((origin, frames));
        }

        let (origin, frames) = self.read_looped(buf, max_frames)?;
        if frames == 0 {
            // The decoder ran dry before the loop end it reported; wrap early.
            self.decoder.seek(self.loop_start)?;
            return self.read_looped(buf, max_frames);
        }
        Ok((origin, frames))
    }

    fn read_looped(&mut self, buf: &mut [i16], max_frames: usize) -> DecodeResult<(u64, usize)> {
        let channels = self.channels() as usize;
        let end = self.loop_end();
        if self.position() >= end {
            self.decoder.seek(self.loop_start)?;
        }
        let origin = self.position();
        let room = end.saturating_sub(origin).min(max_frames as u64) as usize;
        let frames = self.decoder.decode(&mut buf[..room * channels])?;
        if self.position() >= end {
            self.decoder.seek(self.loop_start)?;
        }
        Ok((origin, frames))
    }
}
