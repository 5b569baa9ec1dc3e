//! Sources: pooled voices and the application's handle to them
//!
//! The pool owns a [`Voice`] per backend source. The application holds
//! [`Source`] handles; a voice is considered externally referenced while any
//! handle to it is alive. Handles never own backend objects, so dropping the
//! last one only makes the voice eligible for eviction by the maintenance
//! sweep.

use std::sync::Arc;
use std::time::Duration;

use glam::{Vec2, Vec3};

use super::buffer::Buffer;
use super::command::{Command, ParamKind, ParamValue, SourceKey};
use super::error::{AudioError, AudioResult};
use super::manager::{class_factor, AudioLock, Shared};
use super::stream::AudioStream;
use super::streaming::StreamRing;
use crate::config::CLASS_COUNT;
use crate::sound::backend::{
    AudioBackend, BackendError, Checked, ObjectId, SourceFloat, SourceInt, SourceState,
    SourceVector, NO_OBJECT,
};

/// What a voice plays
#[derive(Debug, Default)]
pub(crate) enum Binding {
    #[default]
    None,
    Buffer,
    Stream(StreamRing),
}

/// Pool-side state of one backend source
#[derive(Debug)]
pub(crate) struct Voice {
    pub key: SourceKey,
    pub id: ObjectId,
    pub priority: i32,
    pub classes: u32,
    /// Gain before class multipliers
    pub base_gain: f32,
    pub binding: Binding,
}

/// Backend property behind a scalar parameter other than gain
fn float_prop(kind: ParamKind) -> Option<SourceFloat> {
    match kind {
        ParamKind::Pitch => Some(SourceFloat::Pitch),
        ParamKind::MaxDistance => Some(SourceFloat::MaxDistance),
        ParamKind::RolloffFactor => Some(SourceFloat::RolloffFactor),
        ParamKind::ReferenceDistance => Some(SourceFloat::ReferenceDistance),
        ParamKind::ConeOuterGain => Some(SourceFloat::ConeOuterGain),
        _ => None,
    }
}

fn vector_prop(kind: ParamKind) -> Option<SourceVector> {
    match kind {
        ParamKind::Position => Some(SourceVector::Position),
        ParamKind::Velocity => Some(SourceVector::Velocity),
        ParamKind::Direction => Some(SourceVector::Direction),
        _ => None,
    }
}

fn backend_state(backend: &mut dyn AudioBackend, id: ObjectId) -> AudioResult<SourceState> {
    let raw = backend.checked("get_source_i", |b| b.get_source_i(id, SourceInt::State))?;
    Ok(SourceState::from_i32(raw).unwrap_or_default())
}

impl Voice {
    pub fn new(key: SourceKey, id: ObjectId, priority: i32) -> Self {
        Self {
            key,
            id,
            priority,
            classes: 0,
            base_gain: 1.0,
            binding: Binding::None,
        }
    }

    /// Playback state as the application sees it.
    ///
    /// A stream that starved between refills is still playing.
    pub fn state(&self, backend: &mut dyn AudioBackend) -> AudioResult<SourceState> {
        let state = backend_state(backend, self.id)?;
        match &self.binding {
            Binding::Stream(ring) if ring.is_active() && state == SourceState::Stopped => {
                Ok(SourceState::Playing)
            }
            _ => Ok(state),
        }
    }

    pub fn is_playing(&self, backend: &mut dyn AudioBackend) -> AudioResult<bool> {
        Ok(self.state(backend)? == SourceState::Playing)
    }

    /// Buffer the backend reports as bound
    pub fn reported_buffer(&self, backend: &mut dyn AudioBackend) -> AudioResult<ObjectId> {
        let raw = backend.checked("get_source_i", |b| b.get_source_i(self.id, SourceInt::Buffer))?;
        Ok(raw as ObjectId)
    }

    pub fn apply_gain(&self, backend: &mut dyn AudioBackend, factor: f32) -> AudioResult<()> {
        let gain = self.base_gain * factor;
        backend.checked("source_f", |b| b.source_f(self.id, SourceFloat::Gain, gain))?;
        Ok(())
    }

    /// Set a parameter immediately; `factor` is the voice's class multiplier
    pub fn set_param(
        &mut self,
        backend: &mut dyn AudioBackend,
        kind: ParamKind,
        value: ParamValue,
        factor: f32,
    ) -> AudioResult<()> {
        let id = self.id;
        match (value, float_prop(kind), vector_prop(kind)) {
            (ParamValue::Scalar(gain), _, _) if kind == ParamKind::Gain => {
                self.base_gain = gain;
                self.apply_gain(backend, factor)
            }
            (ParamValue::Scalar(v), Some(prop), _) => {
                backend.checked("source_f", |b| b.source_f(id, prop, v))?;
                Ok(())
            }
            (ParamValue::Pair(angles), _, _) if kind == ParamKind::ConeAngles => {
                backend.checked("source_f", |b| {
                    b.source_f(id, SourceFloat::ConeInnerAngle, angles.x)
                })?;
                backend.checked("source_f", |b| {
                    b.source_f(id, SourceFloat::ConeOuterAngle, angles.y)
                })?;
                Ok(())
            }
            (ParamValue::Vector(v), _, Some(prop)) => {
                backend.checked("source_3f", |b| b.source_3f(id, prop, v))?;
                Ok(())
            }
            _ => Err(AudioError::ValueShape(kind)),
        }
    }

    /// Current value of a parameter; gain reads back the base gain
    pub fn param(&self, backend: &mut dyn AudioBackend, kind: ParamKind) -> AudioResult<ParamValue> {
        let id = self.id;
        if kind == ParamKind::Gain {
            return Ok(ParamValue::Scalar(self.base_gain));
        }
        if let Some(prop) = float_prop(kind) {
            return Ok(backend.checked("get_source_f", |b| b.get_source_f(id, prop))?.into());
        }
        if let Some(prop) = vector_prop(kind) {
            return Ok(backend.checked("get_source_3f", |b| b.get_source_3f(id, prop))?.into());
        }
        let inner = backend.checked("get_source_f", |b| {
            b.get_source_f(id, SourceFloat::ConeInnerAngle)
        })?;
        let outer = backend.checked("get_source_f", |b| {
            b.get_source_f(id, SourceFloat::ConeOuterAngle)
        })?;
        Ok(Vec2::new(inner, outer).into())
    }

    /// Detach whatever is bound, stopping playback
    pub fn unbind(&mut self, backend: &mut dyn AudioBackend) -> AudioResult<()> {
        let id = self.id;
        match std::mem::take(&mut self.binding) {
            Binding::None => {}
            Binding::Buffer => {
                backend.checked("source_stop", |b| b.source_stop(id))?;
                backend.checked("source_i", |b| b.source_i(id, SourceInt::Buffer, 0))?;
            }
            Binding::Stream(mut ring) => ring.release(backend, id)?,
        }
        Ok(())
    }

    pub fn bind_buffer(&mut self, backend: &mut dyn AudioBackend, buffer: ObjectId) -> AudioResult<()> {
        self.unbind(backend)?;
        let id = self.id;
        backend.checked("source_i", |b| {
            b.source_i(id, SourceInt::Buffer, buffer as i32)
        })?;
        self.binding = Binding::Buffer;
        Ok(())
    }

    pub fn bind_stream(
        &mut self,
        backend: &mut dyn AudioBackend,
        stream: AudioStream,
        chunk_frames: usize,
    ) -> AudioResult<()> {
        self.unbind(backend)?;
        let id = self.id;
        // Streams loop by themselves; the voice must not.
        backend.checked("source_i", |b| b.source_i(id, SourceInt::Looping, 0))?;
        self.binding = Binding::Stream(StreamRing::new(backend, stream, chunk_frames)?);
        Ok(())
    }

    pub fn play(&mut self, backend: &mut dyn AudioBackend) -> AudioResult<()> {
        let id = self.id;
        match &mut self.binding {
            Binding::Stream(ring) => ring.play(backend, id),
            _ => Ok(backend.checked("source_play", |b| b.source_play(id))?),
        }
    }

    pub fn pause(&mut self, backend: &mut dyn AudioBackend) -> AudioResult<()> {
        let id = self.id;
        match &mut self.binding {
            Binding::Stream(ring) => ring.pause(backend, id),
            _ => Ok(backend.checked("source_pause", |b| b.source_pause(id))?),
        }
    }

    pub fn stop(&mut self, backend: &mut dyn AudioBackend) -> AudioResult<()> {
        let id = self.id;
        match &mut self.binding {
            Binding::Stream(ring) => ring.stop(backend, id),
            _ => Ok(backend.checked("source_stop", |b| b.source_stop(id))?),
        }
    }

    pub fn rewind(&mut self, backend: &mut dyn AudioBackend) -> AudioResult<()> {
        let id = self.id;
        if let Binding::Stream(ring) = &mut self.binding {
            ring.stop(backend, id)?;
        }
        backend.checked("source_rewind", |b| b.source_rewind(id))?;
        Ok(())
    }

    pub fn looping(&self, backend: &mut dyn AudioBackend) -> AudioResult<bool> {
        match &self.binding {
            Binding::Stream(ring) => Ok(ring.stream().looping()),
            _ => {
                let id = self.id;
                let raw = backend.checked("get_source_i", |b| b.get_source_i(id, SourceInt::Looping))?;
                Ok(raw != 0)
            }
        }
    }

    pub fn set_looping(&mut self, backend: &mut dyn AudioBackend, looping: bool) -> AudioResult<()> {
        let id = self.id;
        match &mut self.binding {
            Binding::Stream(ring) => Ok(ring.stream_mut().set_looping(looping)?),
            _ => Ok(backend.checked("source_i", |b| {
                b.source_i(id, SourceInt::Looping, looping as i32)
            })?),
        }
    }

    /// Playback position in frames
    pub fn sample_offset(&self, backend: &mut dyn AudioBackend) -> AudioResult<u64> {
        let id = self.id;
        match &self.binding {
            Binding::Stream(ring) => ring.frame_offset(backend, id),
            _ => {
                let raw = backend.checked("get_source_i", |b| b.get_source_i(id, SourceInt::SampleOffset))?;
                Ok(u64::try_from(raw).unwrap_or(0))
            }
        }
    }

    /// Playback position in seconds
    pub fn offset(&self, backend: &mut dyn AudioBackend) -> AudioResult<f32> {
        let id = self.id;
        match &self.binding {
            Binding::Stream(ring) => {
                let frame = ring.frame_offset(backend, id)?;
                Ok((frame as f64 / f64::from(ring.stream().frequency())) as f32)
            }
            _ => Ok(backend.checked("get_source_f", |b| b.get_source_f(id, SourceFloat::SecOffset))?),
        }
    }

    pub fn set_offset(&mut self, backend: &mut dyn AudioBackend, seconds: f32) -> AudioResult<()> {
        let id = self.id;
        match &mut self.binding {
            Binding::Stream(ring) => {
                let frame = (f64::from(seconds.max(0.0)) * f64::from(ring.stream().frequency())) as u64;
                ring.set_frame_offset(backend, id, frame)
            }
            _ => Ok(backend.checked("source_f", |b| b.source_f(id, SourceFloat::SecOffset, seconds))?),
        }
    }

    /// Stop, unbind and delete the backend source
    pub fn release(&mut self, backend: &mut dyn AudioBackend) -> AudioResult<()> {
        self.unbind(backend)?;
        let id = self.id;
        backend.checked("delete_source", |b| b.delete_source(id))?;
        self.id = NO_OBJECT;
        Ok(())
    }
}

/// Marker shared by a pool entry and every handle to it
#[derive(Debug)]
pub(crate) struct SourceToken {
    pub key: SourceKey,
}

/// Shared handle to a pooled voice
///
/// Clones refer to the same voice. Calls made while the manager is not
/// active, or that the backend rejects, are logged and otherwise ignored
/// (backend rejections also trip a debug assertion); getters then return a
/// default value.
#[derive(Clone)]
pub struct Source {
    shared: Arc<Shared>,
    token: Arc<SourceToken>,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source").field("key", &self.token.key).finish()
    }
}

impl Source {
    pub(crate) fn new(shared: Arc<Shared>, token: Arc<SourceToken>) -> Self {
        Self { shared, token }
    }

    /// Pool-unique key of the voice
    pub fn key(&self) -> SourceKey {
        self.token.key
    }

    fn with_voice<T>(
        &self,
        op: &str,
        f: impl FnOnce(&mut Voice, &mut dyn AudioBackend, f32) -> AudioResult<T>,
    ) -> Option<T> {
        let key = self.token.key;
        self.shared
            .perform(op, |state| state.with_voice(key, |voice, backend, gains| {
                let factor = class_factor(gains, voice.classes);
                f(voice, backend, factor)
            }))
    }

    /// Hold the manager lock across several calls
    pub fn lock(&self) -> AudioLock<'_> {
        self.shared.lock()
    }

    pub fn priority(&self) -> i32 {
        self.with_voice("Source::priority", |v, _, _| Ok(v.priority))
            .unwrap_or_default()
    }

    pub fn play(&self) {
        self.with_voice("Source::play", |v, b, _| v.play(b));
    }

    pub fn pause(&self) {
        self.with_voice("Source::pause", |v, b, _| v.pause(b));
    }

    /// Stop playback; a stream rewinds to its loop start (or its start)
    pub fn stop(&self) {
        self.with_voice("Source::stop", |v, b, _| v.stop(b));
    }

    pub fn rewind(&self) {
        self.with_voice("Source::rewind", |v, b, _| v.rewind(b));
    }

    pub fn state(&self) -> SourceState {
        self.with_voice("Source::state", |v, b, _| v.state(b))
            .unwrap_or_default()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == SourceState::Playing
    }

    /// Bind a buffer that already holds data, replacing any stream
    pub fn set_buffer(&self, buffer: &Buffer) {
        let id = buffer.id();
        self.with_voice("Source::set_buffer", |v, b, _| {
            let id = id.ok_or(BackendError::InvalidName)?;
            v.bind_buffer(b, id)
        });
    }

    /// Bind a stream, replacing any buffer or previous stream
    pub fn set_stream(&self, stream: AudioStream) {
        let chunk_frames = self.shared.chunk_frames();
        self.with_voice("Source::set_stream", |v, b, _| {
            v.bind_stream(b, stream, chunk_frames)
        });
    }

    /// Stop and unbind everything
    pub fn clear(&self) {
        let _lock = self.lock();
        self.stop();
        self.with_voice("Source::clear", |v, b, _| v.unbind(b));
    }

    pub fn has_buffer(&self) -> bool {
        self.with_voice("Source::has_buffer", |v, _, _| {
            Ok(matches!(v.binding, Binding::Buffer))
        })
        .unwrap_or(false)
    }

    pub fn has_stream(&self) -> bool {
        self.with_voice("Source::has_stream", |v, _, _| {
            Ok(matches!(v.binding, Binding::Stream(_)))
        })
        .unwrap_or(false)
    }

    /// Run `f` on the bound stream, if any.
    ///
    /// `f` runs under the manager lock and must not call back into the
    /// manager or any handle.
    pub fn with_stream<T>(&self, f: impl FnOnce(&mut AudioStream) -> T) -> Option<T> {
        self.with_voice("Source::with_stream", |v, _, _| match &mut v.binding {
            Binding::Stream(ring) => Ok(Some(f(ring.stream_mut()))),
            _ => Ok(None),
        })
        .flatten()
    }

    pub fn looping(&self) -> bool {
        self.with_voice("Source::looping", |v, b, _| v.looping(b))
            .unwrap_or(false)
    }

    pub fn set_looping(&self, looping: bool) {
        self.with_voice("Source::set_looping", |v, b, _| v.set_looping(b, looping));
    }

    /// Audible position in seconds
    pub fn offset(&self) -> f32 {
        self.with_voice("Source::offset", |v, b, _| v.offset(b))
            .unwrap_or(0.0)
    }

    pub fn set_offset(&self, seconds: f32) {
        self.with_voice("Source::set_offset", |v, b, _| v.set_offset(b, seconds));
    }

    /// Audible position in frames
    pub fn sample_offset(&self) -> u64 {
        self.with_voice("Source::sample_offset", |v, b, _| v.sample_offset(b))
            .unwrap_or(0)
    }

    pub fn relative(&self) -> bool {
        self.with_voice("Source::relative", |v, b, _| {
            let id = v.id;
            Ok(b.checked("get_source_i", |b| b.get_source_i(id, SourceInt::Relative))? != 0)
        })
        .unwrap_or(false)
    }

    /// Position relative to the listener instead of the world
    pub fn set_relative(&self, relative: bool) {
        self.with_voice("Source::set_relative", |v, b, _| {
            let id = v.id;
            Ok(b.checked("source_i", |b| {
                b.source_i(id, SourceInt::Relative, relative as i32)
            })?)
        });
    }

    /// Classification bitmask
    pub fn classes(&self) -> u32 {
        self.with_voice("Source::classes", |v, _, _| Ok(v.classes))
            .unwrap_or(0)
    }

    /// Replace the classification bitmask and re-apply the effective gain
    pub fn set_classes(&self, classes: u32) {
        let key = self.token.key;
        self.shared.perform("Source::set_classes", |state| {
            state.with_voice(key, |voice, backend, gains| {
                voice.classes = classes;
                voice.apply_gain(backend, class_factor(gains, classes))
            })
        });
    }

    pub fn add_class(&self, class: usize) {
        debug_assert!(class < CLASS_COUNT, "class {} out of range", class);
        if class < CLASS_COUNT {
            let _lock = self.lock();
            self.set_classes(self.classes() | 1 << class);
        }
    }

    pub fn remove_class(&self, class: usize) {
        debug_assert!(class < CLASS_COUNT, "class {} out of range", class);
        if class < CLASS_COUNT {
            let _lock = self.lock();
            self.set_classes(self.classes() & !(1 << class));
        }
    }

    /// Set a parameter immediately
    pub fn set_param(&self, kind: ParamKind, value: impl Into<ParamValue>) {
        let value = value.into();
        self.with_voice("Source::set_param", |v, b, factor| {
            v.set_param(b, kind, value, factor)
        });
    }

    /// Current value of a parameter
    pub fn param(&self, kind: ParamKind) -> Option<ParamValue> {
        self.with_voice("Source::param", |v, b, _| v.param(b, kind))
    }

    fn scalar(&self, kind: ParamKind) -> f32 {
        self.param(kind)
            .and_then(|v| v.as_scalar())
            .unwrap_or_default()
    }

    fn vector(&self, kind: ParamKind) -> Vec3 {
        self.param(kind)
            .and_then(|v| v.as_vector())
            .unwrap_or_default()
    }

    /// Gain before class multipliers
    pub fn gain(&self) -> f32 {
        self.scalar(ParamKind::Gain)
    }

    pub fn set_gain(&self, gain: f32) {
        self.set_param(ParamKind::Gain, gain);
    }

    pub fn pitch(&self) -> f32 {
        self.scalar(ParamKind::Pitch)
    }

    pub fn set_pitch(&self, pitch: f32) {
        self.set_param(ParamKind::Pitch, pitch);
    }

    pub fn max_distance(&self) -> f32 {
        self.scalar(ParamKind::MaxDistance)
    }

    pub fn set_max_distance(&self, distance: f32) {
        self.set_param(ParamKind::MaxDistance, distance);
    }

    pub fn rolloff_factor(&self) -> f32 {
        self.scalar(ParamKind::RolloffFactor)
    }

    pub fn set_rolloff_factor(&self, factor: f32) {
        self.set_param(ParamKind::RolloffFactor, factor);
    }

    pub fn reference_distance(&self) -> f32 {
        self.scalar(ParamKind::ReferenceDistance)
    }

    pub fn set_reference_distance(&self, distance: f32) {
        self.set_param(ParamKind::ReferenceDistance, distance);
    }

    pub fn cone_outer_gain(&self) -> f32 {
        self.scalar(ParamKind::ConeOuterGain)
    }

    pub fn set_cone_outer_gain(&self, gain: f32) {
        self.set_param(ParamKind::ConeOuterGain, gain);
    }

    /// Inner and outer cone angles in degrees
    pub fn cone_angles(&self) -> Vec2 {
        self.param(ParamKind::ConeAngles)
            .and_then(|v| v.as_pair())
            .unwrap_or_default()
    }

    pub fn set_cone_angles(&self, inner: f32, outer: f32) {
        self.set_param(ParamKind::ConeAngles, Vec2::new(inner, outer));
    }

    pub fn position(&self) -> Vec3 {
        self.vector(ParamKind::Position)
    }

    pub fn set_position(&self, position: Vec3) {
        self.set_param(ParamKind::Position, position);
    }

    pub fn velocity(&self) -> Vec3 {
        self.vector(ParamKind::Velocity)
    }

    pub fn set_velocity(&self, velocity: Vec3) {
        self.set_param(ParamKind::Velocity, velocity);
    }

    pub fn direction(&self) -> Vec3 {
        self.vector(ParamKind::Direction)
    }

    pub fn set_direction(&self, direction: Vec3) {
        self.set_param(ParamKind::Direction, direction);
    }

    /// Interpolate a parameter from `start` to `end` over `duration`.
    ///
    /// Values outside the parameter's range are refused here rather than
    /// left for the sweep to trip over.
    pub fn transition_from(
        &self,
        kind: ParamKind,
        start: impl Into<ParamValue>,
        end: impl Into<ParamValue>,
        duration: Duration,
    ) {
        let (start, end) = (start.into(), end.into());
        let key = self.token.key;
        let now = self.shared.now();
        self.shared.perform("Source::transition", |state| {
            let command = Command::new(key, kind, start, end, duration, now)
                .ok_or(AudioError::ValueShape(kind))?;
            if !kind.accepts(start) || !kind.accepts(end) {
                return Err(BackendError::InvalidValue.into());
            }
            state.submit(command)
        });
    }

    /// Interpolate a parameter from its current value to `end` over `duration`
    pub fn transition(&self, kind: ParamKind, end: impl Into<ParamValue>, duration: Duration) {
        let end = end.into();
        let _lock = self.lock();
        if let Some(start) = self.param(kind) {
            self.transition_from(kind, start, end, duration);
        }
    }

    pub fn fade_gain(&self, gain: f32, duration: Duration) {
        self.transition(ParamKind::Gain, gain, duration);
    }

    pub fn glide_pitch(&self, pitch: f32, duration: Duration) {
        self.transition(ParamKind::Pitch, pitch, duration);
    }

    pub fn move_to(&self, position: Vec3, duration: Duration) {
        self.transition(ParamKind::Position, position, duration);
    }

    /// Number of queued commands targeting this source
    pub fn pending_commands(&self) -> usize {
        let key = self.token.key;
        self.shared
            .perform("Source::pending_commands", |state| {
                Ok(state.commands.count_for(key))
            })
            .unwrap_or(0)
    }
}
