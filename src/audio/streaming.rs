//! Streaming ring buffer
//!
//! A `StreamRing` feeds one backend voice from an [`AudioStream`] through a
//! fixed set of buffers. Each slot remembers the stream frame it was filled
//! from, so the reported playback offset follows what is audible rather than
//! the decoder cursor, which runs ahead by up to a full ring.

use std::collections::VecDeque;

use super::error::{generate, AudioResult};
use super::stream::AudioStream;
use crate::sound::backend::{AudioBackend, Checked, ObjectId, SourceInt, SourceState};

/// Number of buffers cycled per streaming voice
pub const RING_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy)]
struct Slot {
    buffer: ObjectId,
    /// Stream frame the slot's data starts at
    origin: u64,
    frames: u64,
}

/// Buffers cycling through a voice's queue, plus the stream they come from
#[derive(Debug)]
pub struct StreamRing {
    stream: AudioStream,
    slots: Vec<Slot>,
    /// Slots queued on the voice, oldest first
    queued: VecDeque<usize>,
    free: VecDeque<usize>,
    chunk_frames: usize,
    scratch: Vec<i16>,
    /// Whether the application wants the stream audible
    intent: bool,
}

fn voice_state(backend: &mut dyn AudioBackend, voice: ObjectId) -> AudioResult<SourceState> {
    let raw = backend.checked("get_source_i", |b| b.get_source_i(voice, SourceInt::State))?;
    Ok(SourceState::from_i32(raw).unwrap_or_default())
}

impl StreamRing {
    /// Allocate the ring's buffers for `stream`
    pub fn new(
        backend: &mut dyn AudioBackend,
        stream: AudioStream,
        chunk_frames: usize,
    ) -> AudioResult<Self> {
        let chunk_frames = chunk_frames.max(1);
        let mut slots = Vec::with_capacity(RING_SLOTS);
        for _ in 0..RING_SLOTS {
            match generate(backend, "gen_buffer", |b| b.gen_buffer()) {
                Ok(buffer) => slots.push(Slot {
                    buffer,
                    origin: 0,
                    frames: 0,
                }),
                Err(err) => {
                    for slot in &slots {
                        backend.delete_buffer(slot.buffer);
                    }
                    let _ = backend.get_error();
                    return Err(err);
                }
            }
        }
        let scratch = vec![0; chunk_frames * stream.channels() as usize];
        Ok(Self {
            stream,
            slots,
            queued: VecDeque::with_capacity(RING_SLOTS),
            free: (0..RING_SLOTS).collect(),
            chunk_frames,
            scratch,
            intent: false,
        })
    }

    pub fn stream(&self) -> &AudioStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut AudioStream {
        &mut self.stream
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// Whether playback was requested and has not yet run out
    pub fn is_active(&self) -> bool {
        self.intent
    }

    /// Number of slots currently queued on the voice
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Backend buffer ids of the ring
    pub fn buffers(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.slots.iter().map(|slot| slot.buffer)
    }

    /// Decode the next chunk into `index`; false once the stream is drained
    fn fill_slot(&mut self, backend: &mut dyn AudioBackend, index: usize) -> AudioResult<bool> {
        let (origin, frames) = self.stream.read_chunk(&mut self.scratch)?;
        if frames == 0 {
            return Ok(false);
        }
        let format = self.stream.format();
        let frequency = self.stream.frequency();
        let samples = &self.scratch[..frames * format.channels() as usize];
        let slot = &mut self.slots[index];
        backend.checked("buffer_data", |b| {
            b.buffer_data(slot.buffer, format, samples, frequency)
        })?;
        slot.origin = origin;
        slot.frames = frames as u64;
        Ok(true)
    }

    /// Fill every free slot the stream has data for and queue it, in order
    fn prime(&mut self, backend: &mut dyn AudioBackend, voice: ObjectId) -> AudioResult<()> {
        while let Some(index) = self.free.pop_front() {
            if !self.fill_slot(backend, index)? {
                self.free.push_front(index);
                break;
            }
            let buffer = self.slots[index].buffer;
            backend.checked("source_queue_buffers", |b| {
                b.source_queue_buffers(voice, &[buffer])
            })?;
            self.queued.push_back(index);
        }
        Ok(())
    }

    /// Take back the slots the voice has finished playing
    fn reclaim(&mut self, backend: &mut dyn AudioBackend, voice: ObjectId) -> AudioResult<()> {
        let processed = backend.checked("get_source_i", |b| {
            b.get_source_i(voice, SourceInt::BuffersProcessed)
        })?;
        let processed = usize::try_from(processed).unwrap_or(0);
        if processed == 0 {
            return Ok(());
        }
        let returned = backend.checked("source_unqueue_buffers", |b| {
            b.source_unqueue_buffers(voice, processed)
        })?;
        for _ in &returned {
            if let Some(index) = self.queued.pop_front() {
                self.free.push_back(index);
            }
        }
        Ok(())
    }

    /// Stop the voice and return every slot to the free list
    fn drain(&mut self, backend: &mut dyn AudioBackend, voice: ObjectId) -> AudioResult<()> {
        backend.checked("source_stop", |b| b.source_stop(voice))?;
        self.reclaim(backend, voice)?;
        debug_assert!(self.queued.is_empty(), "stopped voice kept queued buffers");
        self.free.extend(self.queued.drain(..));
        Ok(())
    }

    /// Maintenance step: recycle processed slots and keep the voice fed.
    ///
    /// A voice that starved while data remains is restarted. Once the stream
    /// is drained and the voice has played everything, playback is over.
    pub fn refill(&mut self, backend: &mut dyn AudioBackend, voice: ObjectId) -> AudioResult<()> {
        self.reclaim(backend, voice)?;
        if !self.intent {
            return Ok(());
        }
        self.prime(backend, voice)?;

        if voice_state(backend, voice)? == SourceState::Stopped {
            if self.queued.is_empty() {
                log::debug!("stream on voice {} reached its end", voice);
                self.intent = false;
            } else {
                log::debug!("stream on voice {} starved; restarting", voice);
                backend.checked("source_play", |b| b.source_play(voice))?;
            }
        }
        Ok(())
    }

    /// Start or resume playback
    pub fn play(&mut self, backend: &mut dyn AudioBackend, voice: ObjectId) -> AudioResult<()> {
        match voice_state(backend, voice)? {
            SourceState::Playing => return Ok(()),
            SourceState::Paused => {
                self.intent = true;
                backend.checked("source_play", |b| b.source_play(voice))?;
                return Ok(());
            }
            SourceState::Initial | SourceState::Stopped => {}
        }

        self.drain(backend, voice)?;
        if self.stream.at_end() {
            self.stream.rewind()?;
        }
        self.prime(backend, voice)?;
        if self.queued.is_empty() {
            self.intent = false;
            return Ok(());
        }
        self.intent = true;
        backend.checked("source_play", |b| b.source_play(voice))?;
        Ok(())
    }

    pub fn pause(&mut self, backend: &mut dyn AudioBackend, voice: ObjectId) -> AudioResult<()> {
        backend.checked("source_pause", |b| b.source_pause(voice))?;
        Ok(())
    }

    /// Stop playback and rewind the stream to where playback begins
    pub fn stop(&mut self, backend: &mut dyn AudioBackend, voice: ObjectId) -> AudioResult<()> {
        self.intent = false;
        self.drain(backend, voice)?;
        self.stream.rewind()?;
        Ok(())
    }

    /// Audible position as a stream frame
    pub fn frame_offset(&self, backend: &mut dyn AudioBackend, voice: ObjectId) -> AudioResult<u64> {
        let Some(&last) = self.queued.back() else {
            return Ok(self.stream.position());
        };
        let played = backend.checked("get_source_i", |b| {
            b.get_source_i(voice, SourceInt::SampleOffset)
        })?;
        let mut left = u64::try_from(played).unwrap_or(0);
        for &index in &self.queued {
            let slot = self.slots[index];
            if left < slot.frames {
                return Ok(slot.origin + left);
            }
            left -= slot.frames;
        }
        Ok(self.slots[last].origin + self.slots[last].frames)
    }

    /// Move playback to stream frame `frame`; a playing voice continues from
    /// there
    pub fn set_frame_offset(
        &mut self,
        backend: &mut dyn AudioBackend,
        voice: ObjectId,
        frame: u64,
    ) -> AudioResult<()> {
        let state = voice_state(backend, voice)?;
        self.drain(backend, voice)?;
        self.stream.seek(frame)?;
        if !self.intent {
            return Ok(());
        }
        self.prime(backend, voice)?;
        if self.queued.is_empty() {
            self.intent = false;
            return Ok(());
        }
        backend.checked("source_play", |b| b.source_play(voice))?;
        if state == SourceState::Paused {
            backend.checked("source_pause", |b| b.source_pause(voice))?;
        }
        Ok(())
    }

    /// Detach from the voice and delete the ring's buffers
    pub fn release(&mut self, backend: &mut dyn AudioBackend, voice: ObjectId) -> AudioResult<()> {
        self.intent = false;
        backend.checked("source_stop", |b| b.source_stop(voice))?;
        backend.checked("source_i", |b| b.source_i(voice, SourceInt::Buffer, 0))?;
        self.queued.clear();
        self.free.clear();
        for slot in self.slots.drain(..) {
            backend.checked("delete_buffer", |b| b.delete_buffer(slot.buffer))?;
        }
        Ok(())
    }
}
