// mod.rs - Software audio device

//! Clock-driven software device.
//!
//! `SoftBackend` implements the full object model of [`AudioBackend`]
//! (buffers, voices, queues, listener, polled errors) without producing any
//! output. Playback position advances with the injected [`Clock`], so a
//! `ManualClock` gives fully deterministic playback for tests and headless
//! runs.

pub mod buffer;
pub mod source;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;

use self::buffer::SoftBuffer;
use self::source::{SoftSource, SourceKind};
use super::{
    AudioBackend, BackendError, BufferProp, ListenerVector, ObjectId, Orientation, SourceFloat,
    SourceInt, SourceState, SourceVector, NO_OBJECT,
};
use crate::sound::formats::AudioFormat;
use crate::time::Clock;

/// Name of the only device the software backend offers
pub const DEVICE_NAME: &str = "Software";

/// Default voice limit
pub const DEFAULT_MAX_SOURCES: usize = 128;

fn check_range(value: f32, min: f32, max: f32) -> Result<f32, BackendError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(value)
    } else {
        Err(BackendError::InvalidValue)
    }
}

/// Software device state
pub struct SoftBackend {
    clock: Arc<dyn Clock>,
    voice_limit: usize,
    buffer_capacity: Option<usize>,
    open: bool,
    last_error: Option<BackendError>,
    last_sync: Duration,
    next_id: ObjectId,
    buffers: HashMap<ObjectId, SoftBuffer>,
    sources: HashMap<ObjectId, SoftSource>,
    listener_gain: f32,
    listener_position: Vec3,
    listener_velocity: Vec3,
    orientation: Orientation,
}

impl SoftBackend {
    /// Create a closed device with the default voice limit
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            voice_limit: DEFAULT_MAX_SOURCES,
            buffer_capacity: None,
            open: false,
            last_error: None,
            last_sync: Duration::ZERO,
            next_id: 1,
            buffers: HashMap::new(),
            sources: HashMap::new(),
            listener_gain: 1.0,
            listener_position: Vec3::ZERO,
            listener_velocity: Vec3::ZERO,
            orientation: Orientation::default(),
        }
    }

    /// Set the hardware voice limit
    pub fn with_max_sources(mut self, limit: usize) -> Self {
        self.voice_limit = limit;
        self
    }

    /// Limit the number of live buffers; generation beyond it runs out of memory
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    /// Number of live buffers
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of live voices
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Whether an error is waiting to be polled
    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }

    /// Audio a voice has yet to play, from its current position onwards.
    ///
    /// Each entry is one queued buffer as `(format, frequency, samples)`;
    /// the first is trimmed to the current frame.
    pub fn remaining_audio(&mut self, id: ObjectId) -> Vec<(AudioFormat, u32, Vec<i16>)> {
        self.sync();
        let Some(source) = self.sources.get(&id) else {
            return Vec::new();
        };
        source
            .queue
            .iter()
            .enumerate()
            .skip(source.processed)
            .filter_map(|(index, buffer_id)| {
                let buffer = self.buffers.get(buffer_id)?;
                let skip = if index == source.processed {
                    source.cursor as usize * buffer.format.channels() as usize
                } else {
                    0
                };
                let skip = skip.min(buffer.samples.len());
                Some((buffer.format, buffer.frequency, buffer.samples[skip..].to_vec()))
            })
            .collect()
    }

    fn record(&mut self, err: BackendError) {
        // The first error sticks until it is polled.
        self.last_error.get_or_insert(err);
    }

    fn alloc_id(&mut self) -> ObjectId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// Bring every playing voice up to the clock
    fn sync(&mut self) {
        let now = self.clock.now();
        let elapsed = now.saturating_sub(self.last_sync);
        self.last_sync = now;
        if elapsed.is_zero() {
            return;
        }
        let seconds = elapsed.as_secs_f64();
        for source in self.sources.values_mut() {
            source.advance(seconds, &self.buffers);
        }
    }

    fn with_source<T: Default>(
        &mut self,
        id: ObjectId,
        f: impl FnOnce(&mut SoftSource, &HashMap<ObjectId, SoftBuffer>) -> Result<T, BackendError>,
    ) -> T {
        if !self.open {
            self.record(BackendError::InvalidOperation);
            return T::default();
        }
        self.sync();
        let result = match self.sources.get_mut(&id) {
            Some(source) => f(source, &self.buffers),
            None => Err(BackendError::InvalidName),
        };
        result.unwrap_or_else(|err| {
            self.record(err);
            T::default()
        })
    }

    fn with_buffer<T: Default>(
        &mut self,
        id: ObjectId,
        f: impl FnOnce(&mut SoftBuffer) -> Result<T, BackendError>,
    ) -> T {
        if !self.open {
            self.record(BackendError::InvalidOperation);
            return T::default();
        }
        let result = match self.buffers.get_mut(&id) {
            Some(buffer) => f(buffer),
            None => Err(BackendError::InvalidName),
        };
        result.unwrap_or_else(|err| {
            self.record(err);
            T::default()
        })
    }

    fn buffer_in_use(&self, id: ObjectId) -> bool {
        self.sources.values().any(|s| s.uses(id))
    }

    fn with_listener(&mut self, f: impl FnOnce(&mut Self) -> Result<(), BackendError>) {
        if !self.open {
            self.record(BackendError::InvalidOperation);
            return;
        }
        if let Err(err) = f(self) {
            self.record(err);
        }
    }
}

impl AudioBackend for SoftBackend {
    fn name(&self) -> &'static str {
        "soft"
    }

    fn open_device(&mut self, device: Option<&str>) -> Result<(), BackendError> {
        if self.open {
            return Err(BackendError::InvalidOperation);
        }
        match device {
            None => {}
            Some(name) if name == DEVICE_NAME => {}
            Some(_) => return Err(BackendError::InvalidValue),
        }
        self.open = true;
        self.last_error = None;
        self.last_sync = self.clock.now();
        Ok(())
    }

    fn close_device(&mut self) {
        self.open = false;
        self.sources.clear();
        self.buffers.clear();
        self.last_error = None;
    }

    fn max_sources(&self) -> usize {
        self.voice_limit
    }

    fn get_error(&mut self) -> Option<BackendError> {
        self.last_error.take()
    }

    fn gen_buffer(&mut self) -> ObjectId {
        if !self.open {
            self.record(BackendError::InvalidOperation);
            return NO_OBJECT;
        }
        if self
            .buffer_capacity
            .is_some_and(|cap| self.buffers.len() >= cap)
        {
            self.record(BackendError::OutOfMemory);
            return NO_OBJECT;
        }
        let id = self.alloc_id();
        self.buffers.insert(id, SoftBuffer::new());
        id
    }

    fn delete_buffer(&mut self, buffer: ObjectId) {
        if !self.open {
            self.record(BackendError::InvalidOperation);
        } else if !self.buffers.contains_key(&buffer) {
            self.record(BackendError::InvalidName);
        } else if self.buffer_in_use(buffer) {
            self.record(BackendError::InvalidOperation);
        } else {
            self.buffers.remove(&buffer);
        }
    }

    fn buffer_data(
        &mut self,
        buffer: ObjectId,
        format: AudioFormat,
        samples: &[i16],
        frequency: u32,
    ) {
        if self.open && self.buffer_in_use(buffer) {
            self.record(BackendError::InvalidOperation);
            return;
        }
        self.with_buffer(buffer, |b| {
            if frequency == 0 || samples.len() % format.channels() as usize != 0 {
                return Err(BackendError::InvalidValue);
            }
            b.fill(format, samples, frequency);
            Ok(())
        })
    }

    fn get_buffer_i(&mut self, buffer: ObjectId, prop: BufferProp) -> i32 {
        self.with_buffer(buffer, |b| {
            Ok(match prop {
                BufferProp::Frequency => b.frequency as i32,
                BufferProp::Bits => 16,
                BufferProp::Channels => i32::from(b.format.channels()),
                BufferProp::Size => b.size() as i32,
            })
        })
    }

    fn gen_source(&mut self) -> ObjectId {
        if !self.open {
            self.record(BackendError::InvalidOperation);
            return NO_OBJECT;
        }
        if self.sources.len() >= self.voice_limit {
            self.record(BackendError::OutOfMemory);
            return NO_OBJECT;
        }
        self.sync();
        let id = self.alloc_id();
        self.sources.insert(id, SoftSource::new());
        id
    }

    fn delete_source(&mut self, source: ObjectId) {
        if !self.open {
            self.record(BackendError::InvalidOperation);
        } else if self.sources.remove(&source).is_none() {
            self.record(BackendError::InvalidName);
        }
    }

    fn source_f(&mut self, source: ObjectId, prop: SourceFloat, value: f32) {
        self.with_source(source, |s, buffers| {
            match prop {
                SourceFloat::Pitch => s.pitch = check_range(value, 0.0, f32::MAX)?,
                SourceFloat::Gain => s.gain = check_range(value, 0.0, f32::MAX)?,
                SourceFloat::MaxDistance => s.max_distance = check_range(value, 0.0, f32::MAX)?,
                SourceFloat::RolloffFactor => {
                    s.rolloff_factor = check_range(value, 0.0, f32::MAX)?
                }
                SourceFloat::ReferenceDistance => {
                    s.reference_distance = check_range(value, 0.0, f32::MAX)?
                }
                SourceFloat::ConeOuterGain => s.cone_outer_gain = check_range(value, 0.0, 1.0)?,
                SourceFloat::ConeInnerAngle => {
                    s.cone_inner_angle = check_range(value, 0.0, 360.0)?
                }
                SourceFloat::ConeOuterAngle => {
                    s.cone_outer_angle = check_range(value, 0.0, 360.0)?
                }
                SourceFloat::SecOffset => {
                    let seconds = check_range(value, 0.0, f32::MAX)?;
                    let frame = s.seconds_to_frames(seconds, buffers);
                    s.seek(frame, buffers)?;
                }
            }
            Ok(())
        })
    }

    fn get_source_f(&mut self, source: ObjectId, prop: SourceFloat) -> f32 {
        self.with_source(source, |s, buffers| {
            Ok(match prop {
                SourceFloat::Pitch => s.pitch,
                SourceFloat::Gain => s.gain,
                SourceFloat::MaxDistance => s.max_distance,
                SourceFloat::RolloffFactor => s.rolloff_factor,
                SourceFloat::ReferenceDistance => s.reference_distance,
                SourceFloat::ConeOuterGain => s.cone_outer_gain,
                SourceFloat::ConeInnerAngle => s.cone_inner_angle,
                SourceFloat::ConeOuterAngle => s.cone_outer_angle,
                SourceFloat::SecOffset => s.sec_offset(buffers),
            })
        })
    }

    fn source_3f(&mut self, source: ObjectId, prop: SourceVector, value: Vec3) {
        self.with_source(source, |s, _| {
            if !value.is_finite() {
                return Err(BackendError::InvalidValue);
            }
            match prop {
                SourceVector::Position => s.position = value,
                SourceVector::Velocity => s.velocity = value,
                SourceVector::Direction => s.direction = value,
            }
            Ok(())
        })
    }

    fn get_source_3f(&mut self, source: ObjectId, prop: SourceVector) -> Vec3 {
        self.with_source(source, |s, _| {
            Ok(match prop {
                SourceVector::Position => s.position,
                SourceVector::Velocity => s.velocity,
                SourceVector::Direction => s.direction,
            })
        })
    }

    fn source_i(&mut self, source: ObjectId, prop: SourceInt, value: i32) {
        self.with_source(source, |s, buffers| match prop {
            SourceInt::Looping => {
                s.looping = value != 0;
                Ok(())
            }
            SourceInt::Relative => {
                s.relative = value != 0;
                Ok(())
            }
            SourceInt::Buffer => {
                let id = value as ObjectId;
                if id != NO_OBJECT && !buffers.contains_key(&id) {
                    return Err(BackendError::InvalidName);
                }
                s.set_buffer(id)
            }
            SourceInt::SampleOffset => {
                let frame = u64::try_from(value).map_err(|_| BackendError::InvalidValue)?;
                s.seek(frame, buffers)
            }
            SourceInt::State | SourceInt::BuffersQueued | SourceInt::BuffersProcessed => {
                Err(BackendError::InvalidOperation)
            }
        })
    }

    fn get_source_i(&mut self, source: ObjectId, prop: SourceInt) -> i32 {
        self.with_source(source, |s, buffers| {
            Ok(match prop {
                SourceInt::Looping => s.looping as i32,
                SourceInt::Relative => s.relative as i32,
                SourceInt::Buffer => s.current_buffer() as i32,
                SourceInt::State => s.state as i32,
                SourceInt::BuffersQueued => s.queue.len() as i32,
                SourceInt::BuffersProcessed => match s.kind {
                    SourceKind::Streaming => s.processed as i32,
                    _ => 0,
                },
                SourceInt::SampleOffset => s.sample_offset(buffers) as i32,
            })
        })
    }

    fn source_play(&mut self, source: ObjectId) {
        self.with_source(source, |s, buffers| {
            s.play(buffers);
            Ok(())
        })
    }

    fn source_pause(&mut self, source: ObjectId) {
        self.with_source(source, |s, _| {
            s.pause();
            Ok(())
        })
    }

    fn source_stop(&mut self, source: ObjectId) {
        self.with_source(source, |s, _| {
            s.stop();
            Ok(())
        })
    }

    fn source_rewind(&mut self, source: ObjectId) {
        self.with_source(source, |s, _| {
            s.rewind();
            Ok(())
        })
    }

    fn source_queue_buffers(&mut self, source: ObjectId, ids: &[ObjectId]) {
        self.with_source(source, |s, buffers| {
            if ids.iter().any(|id| !buffers.contains_key(id)) {
                return Err(BackendError::InvalidName);
            }
            s.queue_buffers(ids)
        })
    }

    fn source_unqueue_buffers(&mut self, source: ObjectId, count: usize) -> Vec<ObjectId> {
        self.with_source(source, |s, _| s.unqueue_buffers(count))
    }

    fn listener_gain(&mut self, gain: f32) {
        self.with_listener(|b| {
            b.listener_gain = check_range(gain, 0.0, f32::MAX)?;
            Ok(())
        })
    }

    fn get_listener_gain(&mut self) -> f32 {
        self.listener_gain
    }

    fn listener_3f(&mut self, prop: ListenerVector, value: Vec3) {
        self.with_listener(|b| {
            if !value.is_finite() {
                return Err(BackendError::InvalidValue);
            }
            match prop {
                ListenerVector::Position => b.listener_position = value,
                ListenerVector::Velocity => b.listener_velocity = value,
            }
            Ok(())
        })
    }

    fn get_listener_3f(&mut self, prop: ListenerVector) -> Vec3 {
        match prop {
            ListenerVector::Position => self.listener_position,
            ListenerVector::Velocity => self.listener_velocity,
        }
    }

    fn listener_orientation(&mut self, orientation: Orientation) {
        self.with_listener(|b| {
            if !orientation.at.is_finite() || !orientation.up.is_finite() {
                return Err(BackendError::InvalidValue);
            }
            b.orientation = orientation;
            Ok(())
        })
    }

    fn get_listener_orientation(&mut self) -> Orientation {
        self.orientation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    fn open() -> (Arc<ManualClock>, SoftBackend) {
        let clock = Arc::new(ManualClock::new());
        let mut backend = SoftBackend::new(clock.clone());
        backend.open_device(None).unwrap();
        (clock, backend)
    }

    fn filled_buffer(backend: &mut SoftBackend, frames: usize, rate: u32) -> ObjectId {
        let id = backend.gen_buffer();
        backend.buffer_data(id, AudioFormat::Mono16, &vec![0; frames], rate);
        assert_eq!(backend.get_error(), None);
        id
    }

    #[test]
    fn test_open_named_device() {
        let mut backend = SoftBackend::new(Arc::new(ManualClock::new()));
        assert_eq!(
            backend.open_device(Some("Nonexistent")),
            Err(BackendError::InvalidValue)
        );
        backend.open_device(Some(DEVICE_NAME)).unwrap();
        assert_eq!(
            backend.open_device(None),
            Err(BackendError::InvalidOperation)
        );
    }

    #[test]
    fn test_calls_on_closed_device_fail() {
        let mut backend = SoftBackend::new(Arc::new(ManualClock::new()));
        assert_eq!(backend.gen_source(), NO_OBJECT);
        assert_eq!(backend.get_error(), Some(BackendError::InvalidOperation));
        assert_eq!(backend.get_error(), None);
    }

    #[test]
    fn test_voice_limit() {
        let (_, backend) = open();
        let mut backend = backend.with_max_sources(2);
        assert_ne!(backend.gen_source(), NO_OBJECT);
        assert_ne!(backend.gen_source(), NO_OBJECT);
        assert_eq!(backend.gen_source(), NO_OBJECT);
        assert_eq!(backend.get_error(), Some(BackendError::OutOfMemory));
    }

    #[test]
    fn test_buffer_capacity() {
        let (_, backend) = open();
        let mut backend = backend.with_buffer_capacity(1);
        assert_ne!(backend.gen_buffer(), NO_OBJECT);
        assert_eq!(backend.gen_buffer(), NO_OBJECT);
        assert_eq!(backend.get_error(), Some(BackendError::OutOfMemory));
    }

    #[test]
    fn test_buffer_properties() {
        let (_, mut backend) = open();
        let id = backend.gen_buffer();
        backend.buffer_data(id, AudioFormat::Stereo16, &[0; 88200], 44100);
        assert_eq!(backend.get_buffer_i(id, BufferProp::Frequency), 44100);
        assert_eq!(backend.get_buffer_i(id, BufferProp::Channels), 2);
        assert_eq!(backend.get_buffer_i(id, BufferProp::Bits), 16);
        assert_eq!(backend.get_buffer_i(id, BufferProp::Size), 176400);
        assert_eq!(backend.get_error(), None);
    }

    #[test]
    fn test_playback_follows_clock() {
        let (clock, mut backend) = open();
        let buffer = filled_buffer(&mut backend, 1000, 1000);
        let source = backend.gen_source();
        backend.source_i(source, SourceInt::Buffer, buffer as i32);
        backend.source_play(source);

        clock.advance_ms(250);
        assert_eq!(backend.get_source_i(source, SourceInt::SampleOffset), 250);
        assert_eq!(
            backend.get_source_i(source, SourceInt::State),
            SourceState::Playing as i32
        );

        clock.advance_ms(800);
        assert_eq!(
            backend.get_source_i(source, SourceInt::State),
            SourceState::Stopped as i32
        );
        assert_eq!(backend.get_source_i(source, SourceInt::Buffer), buffer as i32);
        assert_eq!(backend.get_error(), None);
    }

    #[test]
    fn test_delete_buffer_in_use_fails() {
        let (_, mut backend) = open();
        let buffer = filled_buffer(&mut backend, 10, 1000);
        let source = backend.gen_source();
        backend.source_i(source, SourceInt::Buffer, buffer as i32);

        backend.delete_buffer(buffer);
        assert_eq!(backend.get_error(), Some(BackendError::InvalidOperation));

        backend.delete_source(source);
        backend.delete_buffer(buffer);
        assert_eq!(backend.get_error(), None);
        assert_eq!(backend.buffer_count(), 0);
    }

    #[test]
    fn test_streaming_queue_cycle() {
        let (clock, mut backend) = open();
        let a = filled_buffer(&mut backend, 100, 1000);
        let b = filled_buffer(&mut backend, 100, 1000);
        let source = backend.gen_source();
        backend.source_queue_buffers(source, &[a, b]);
        backend.source_play(source);

        clock.advance_ms(150);
        assert_eq!(backend.get_source_i(source, SourceInt::BuffersProcessed), 1);
        assert_eq!(backend.source_unqueue_buffers(source, 1), vec![a]);
        backend.buffer_data(a, AudioFormat::Mono16, &[1; 100], 1000);
        backend.source_queue_buffers(source, &[a]);
        assert_eq!(backend.get_source_i(source, SourceInt::BuffersQueued), 2);
        assert_eq!(backend.get_error(), None);

        clock.advance_ms(500);
        assert_eq!(
            backend.get_source_i(source, SourceInt::State),
            SourceState::Stopped as i32
        );
        assert_eq!(backend.get_source_i(source, SourceInt::BuffersProcessed), 2);
    }

    #[test]
    fn test_refill_of_queued_buffer_fails() {
        let (_, mut backend) = open();
        let a = filled_buffer(&mut backend, 100, 1000);
        let source = backend.gen_source();
        backend.source_queue_buffers(source, &[a]);
        backend.buffer_data(a, AudioFormat::Mono16, &[0; 10], 1000);
        assert_eq!(backend.get_error(), Some(BackendError::InvalidOperation));
    }

    #[test]
    fn test_source_property_validation() {
        let (_, mut backend) = open();
        let source = backend.gen_source();
        backend.source_f(source, SourceFloat::Gain, -1.0);
        assert_eq!(backend.get_error(), Some(BackendError::InvalidValue));
        backend.source_f(source, SourceFloat::ConeOuterGain, 0.25);
        assert_eq!(backend.get_source_f(source, SourceFloat::ConeOuterGain), 0.25);
        backend.source_3f(source, SourceVector::Velocity, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(
            backend.get_source_3f(source, SourceVector::Velocity),
            Vec3::new(1.0, 2.0, 3.0)
        );
        assert_eq!(backend.get_error(), None);
    }

    #[test]
    fn test_sec_offset() {
        let (clock, mut backend) = open();
        let buffer = filled_buffer(&mut backend, 2000, 1000);
        let source = backend.gen_source();
        backend.source_i(source, SourceInt::Buffer, buffer as i32);
        backend.source_play(source);
        backend.source_f(source, SourceFloat::SecOffset, 1.5);
        assert_eq!(backend.get_source_i(source, SourceInt::SampleOffset), 1500);

        clock.advance_ms(100);
        let seconds = backend.get_source_f(source, SourceFloat::SecOffset);
        assert!((seconds - 1.6).abs() < 1e-4);
    }

    #[test]
    fn test_listener() {
        let (_, mut backend) = open();
        backend.listener_gain(0.5);
        backend.listener_3f(ListenerVector::Position, Vec3::X);
        let orientation = Orientation {
            at: Vec3::Z,
            up: Vec3::Y,
        };
        backend.listener_orientation(orientation);
        assert_eq!(backend.get_listener_gain(), 0.5);
        assert_eq!(backend.get_listener_3f(ListenerVector::Position), Vec3::X);
        assert_eq!(backend.get_listener_orientation(), orientation);
        assert_eq!(backend.get_error(), None);
    }

    #[test]
    fn test_remaining_audio_starts_at_cursor() {
        let (clock, mut backend) = open();
        let a = backend.gen_buffer();
        backend.buffer_data(a, AudioFormat::Mono16, &[1, 2, 3, 4], 4);
        let b = backend.gen_buffer();
        backend.buffer_data(b, AudioFormat::Mono16, &[5, 6], 4);
        let source = backend.gen_source();
        backend.source_queue_buffers(source, &[a, b]);
        backend.source_play(source);
        clock.advance_ms(500);

        let remaining = backend.remaining_audio(source);
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].2, vec![3, 4]);
        assert_eq!(remaining[1].2, vec![5, 6]);
        assert!(!backend.has_error());
    }

    #[test]
    fn test_close_device_releases_everything() {
        let (_, mut backend) = open();
        backend.gen_source();
        backend.gen_buffer();
        backend.close_device();
        assert_eq!(backend.source_count(), 0);
        assert_eq!(backend.buffer_count(), 0);
    }
}
