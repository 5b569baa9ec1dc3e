// source.rs - Software device voices

//! Voice state of the software device.
//!
//! A voice plays either one static buffer or a queue of streaming buffers.
//! Nothing is mixed; playback progress is derived from elapsed time, pitch
//! and each buffer's sample rate, which is all the manager observes.

use std::collections::{HashMap, VecDeque};

use glam::Vec3;

use super::buffer::SoftBuffer;
use crate::sound::backend::{BackendError, ObjectId, SourceState, NO_OBJECT};

/// How buffers are attached to a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    #[default]
    Undetermined,
    Static,
    Streaming,
}

/// A single voice
#[derive(Debug, Clone)]
pub struct SoftSource {
    pub state: SourceState,
    pub kind: SourceKind,
    pub looping: bool,
    pub relative: bool,
    pub pitch: f32,
    pub gain: f32,
    pub max_distance: f32,
    pub rolloff_factor: f32,
    pub reference_distance: f32,
    pub cone_outer_gain: f32,
    pub cone_inner_angle: f32,
    pub cone_outer_angle: f32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub direction: Vec3,
    /// Attached buffers, oldest first
    pub queue: VecDeque<ObjectId>,
    /// Number of buffers at the front of `queue` that finished playing
    pub processed: usize,
    /// Frame position inside `queue[processed]`
    pub cursor: f64,
    /// Offset requested while stopped, applied by the next play
    pub pending_offset: Option<u64>,
}

impl Default for SoftSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftSource {
    /// Create a voice with OpenAL default parameters
    pub fn new() -> Self {
        Self {
            state: SourceState::Initial,
            kind: SourceKind::Undetermined,
            looping: false,
            relative: false,
            pitch: 1.0,
            gain: 1.0,
            max_distance: f32::MAX,
            rolloff_factor: 1.0,
            reference_distance: 1.0,
            cone_outer_gain: 0.0,
            cone_inner_angle: 360.0,
            cone_outer_angle: 360.0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            direction: Vec3::ZERO,
            queue: VecDeque::new(),
            processed: 0,
            cursor: 0.0,
            pending_offset: None,
        }
    }

    /// Whether `buffer` is attached to this voice
    pub fn uses(&self, buffer: ObjectId) -> bool {
        self.queue.contains(&buffer)
    }

    /// Buffer reported through the `Buffer` property
    pub fn current_buffer(&self) -> ObjectId {
        match self.kind {
            SourceKind::Undetermined => NO_OBJECT,
            SourceKind::Static => self.queue.front().copied().unwrap_or(NO_OBJECT),
            SourceKind::Streaming => {
                let index = self.processed.min(self.queue.len().saturating_sub(1));
                self.queue.get(index).copied().unwrap_or(NO_OBJECT)
            }
        }
    }

    /// Bind a static buffer, or detach everything with `NO_OBJECT`
    pub fn set_buffer(&mut self, buffer: ObjectId) -> Result<(), BackendError> {
        if matches!(self.state, SourceState::Playing | SourceState::Paused) {
            return Err(BackendError::InvalidOperation);
        }
        self.queue.clear();
        self.processed = 0;
        self.cursor = 0.0;
        if buffer == NO_OBJECT {
            self.kind = SourceKind::Undetermined;
        } else {
            self.kind = SourceKind::Static;
            self.queue.push_back(buffer);
        }
        Ok(())
    }

    /// Append streaming buffers
    pub fn queue_buffers(&mut self, buffers: &[ObjectId]) -> Result<(), BackendError> {
        if self.kind == SourceKind::Static {
            return Err(BackendError::InvalidOperation);
        }
        self.kind = SourceKind::Streaming;
        self.queue.extend(buffers.iter().copied());
        Ok(())
    }

    /// Detach `count` processed buffers from the front of the queue
    pub fn unqueue_buffers(&mut self, count: usize) -> Result<Vec<ObjectId>, BackendError> {
        if self.kind == SourceKind::Static || count > self.processed {
            return Err(BackendError::InvalidValue);
        }
        let removed: Vec<ObjectId> = self.queue.drain(..count).collect();
        self.processed -= count;
        if self.queue.is_empty() {
            self.kind = SourceKind::Undetermined;
            self.cursor = 0.0;
        }
        Ok(removed)
    }

    pub fn play(&mut self, buffers: &HashMap<ObjectId, SoftBuffer>) {
        if self.queue.is_empty() {
            self.state = SourceState::Stopped;
            self.pending_offset = None;
            return;
        }
        if self.state == SourceState::Paused {
            self.state = SourceState::Playing;
            return;
        }
        self.processed = 0;
        self.cursor = 0.0;
        self.state = SourceState::Playing;
        if let Some(offset) = self.pending_offset.take() {
            // Out-of-range offsets were rejected when they were set.
            let _ = self.seek(offset, buffers);
        }
    }

    pub fn pause(&mut self) {
        if self.state == SourceState::Playing {
            self.state = SourceState::Paused;
        }
    }

    pub fn stop(&mut self) {
        self.state = SourceState::Stopped;
        self.processed = self.queue.len();
        self.cursor = 0.0;
        self.pending_offset = None;
    }

    pub fn rewind(&mut self) {
        self.state = SourceState::Initial;
        self.processed = 0;
        self.cursor = 0.0;
        self.pending_offset = None;
    }

    /// Frames and sample rate of a queued buffer
    fn extent(buffers: &HashMap<ObjectId, SoftBuffer>, id: ObjectId) -> (u64, f64) {
        buffers
            .get(&id)
            .map(|b| (b.frames(), b.rate()))
            .unwrap_or((0, 0.0))
    }

    fn total_frames(&self, buffers: &HashMap<ObjectId, SoftBuffer>) -> u64 {
        self.queue.iter().map(|&id| Self::extent(buffers, id).0).sum()
    }

    /// Wall time needed to play the whole queue once at unit pitch
    fn total_seconds(&self, buffers: &HashMap<ObjectId, SoftBuffer>) -> f64 {
        self.queue
            .iter()
            .map(|&id| match Self::extent(buffers, id) {
                (frames, rate) if rate > 0.0 => frames as f64 / rate,
                _ => 0.0,
            })
            .sum()
    }

    /// Advance playback by `seconds` of wall time
    pub fn advance(&mut self, seconds: f64, buffers: &HashMap<ObjectId, SoftBuffer>) {
        if self.state != SourceState::Playing {
            return;
        }

        let mut remaining = seconds * f64::from(self.pitch);
        while remaining > 0.0 {
            if self.processed >= self.queue.len() {
                let period = self.total_seconds(buffers);
                if self.looping && period > 0.0 {
                    self.processed = 0;
                    self.cursor = 0.0;
                    remaining %= period;
                    continue;
                }
                self.finish();
                return;
            }

            let (frames, rate) = Self::extent(buffers, self.queue[self.processed]);
            let left = frames as f64 - self.cursor;
            if rate <= 0.0 || left <= 0.0 {
                self.processed += 1;
                self.cursor = 0.0;
                continue;
            }

            let needed = left / rate;
            if remaining < needed {
                self.cursor += remaining * rate;
                return;
            }
            remaining -= needed;
            self.processed += 1;
            self.cursor = 0.0;
        }

        if self.processed >= self.queue.len() && !self.looping {
            self.finish();
        }
    }

    /// Natural end of playback
    fn finish(&mut self) {
        self.state = SourceState::Stopped;
        self.processed = self.queue.len();
        self.cursor = 0.0;
    }

    /// Playback position in frames from the start of the queue
    pub fn sample_offset(&self, buffers: &HashMap<ObjectId, SoftBuffer>) -> u64 {
        if !matches!(self.state, SourceState::Playing | SourceState::Paused) {
            return 0;
        }
        let played: u64 = self
            .queue
            .iter()
            .take(self.processed)
            .map(|&id| Self::extent(buffers, id).0)
            .sum();
        played + self.cursor as u64
    }

    /// Playback position in seconds
    pub fn sec_offset(&self, buffers: &HashMap<ObjectId, SoftBuffer>) -> f32 {
        let rate = self
            .queue
            .front()
            .map(|&id| Self::extent(buffers, id).1)
            .unwrap_or(0.0);
        if rate <= 0.0 {
            return 0.0;
        }
        (self.sample_offset(buffers) as f64 / rate) as f32
    }

    /// Move playback to `frame` frames from the start of the queue
    pub fn seek(
        &mut self,
        frame: u64,
        buffers: &HashMap<ObjectId, SoftBuffer>,
    ) -> Result<(), BackendError> {
        if frame >= self.total_frames(buffers) && frame != 0 {
            return Err(BackendError::InvalidValue);
        }
        if !matches!(self.state, SourceState::Playing | SourceState::Paused) {
            self.pending_offset = Some(frame);
            return Ok(());
        }

        let mut left = frame;
        for (index, &id) in self.queue.iter().enumerate() {
            let (frames, _) = Self::extent(buffers, id);
            if left < frames {
                self.processed = index;
                self.cursor = left as f64;
                return Ok(());
            }
            left -= frames;
        }
        self.processed = 0;
        self.cursor = 0.0;
        Ok(())
    }

    /// Convert seconds to frames using the first buffer's rate
    pub fn seconds_to_frames(&self, seconds: f32, buffers: &HashMap<ObjectId, SoftBuffer>) -> u64 {
        let rate = self
            .queue
            .front()
            .map(|&id| Self::extent(buffers, id).1)
            .unwrap_or(0.0);
        (f64::from(seconds.max(0.0)) * rate) as u64
    }
}
