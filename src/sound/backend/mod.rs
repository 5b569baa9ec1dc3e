// mod.rs - Native audio backend abstraction

//! OpenAL-like audio backend interface.
//!
//! The manager talks to the device exclusively through [`AudioBackend`].
//! Like OpenAL, the backend reports failures through a polled error slot
//! instead of return values; call sites go through [`Checked::checked`],
//! which polls and clears that slot right after the call.
//!
//! # Architecture
//!
//! - `checked` - validating adapter over the polled error state
//! - `soft` - clock-driven software device (no output, exact timing)
//! - `rodio` - system output through rodio (feature `rodio`)

pub mod checked;
#[cfg(feature = "rodio")]
pub mod rodio;
pub mod soft;

use glam::Vec3;

use super::formats::AudioFormat;

pub use checked::Checked;
#[cfg(feature = "rodio")]
pub use self::rodio::RodioBackend;
pub use soft::SoftBackend;

/// Identifier of a backend buffer or source; 0 is never a valid object
pub type ObjectId = u32;

/// Reserved "no object" identifier
pub const NO_OBJECT: ObjectId = 0;

/// Backend error codes (compatible with OpenAL error codes)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum BackendError {
    #[error("invalid name")]
    InvalidName = 0xA001,
    #[error("invalid enum")]
    InvalidEnum = 0xA002,
    #[error("invalid value")]
    InvalidValue = 0xA003,
    #[error("invalid operation")]
    InvalidOperation = 0xA004,
    #[error("out of memory")]
    OutOfMemory = 0xA005,
    #[error("driver failure")]
    DriverFailure = 0xA101,
}

impl BackendError {
    /// Convert from a raw error code; 0 means no error
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => None,
            0xA001 => Some(BackendError::InvalidName),
            0xA002 => Some(BackendError::InvalidEnum),
            0xA003 => Some(BackendError::InvalidValue),
            0xA004 => Some(BackendError::InvalidOperation),
            0xA005 => Some(BackendError::OutOfMemory),
            _ => Some(BackendError::DriverFailure),
        }
    }

    /// Convert to the raw error code
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Source playback state
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SourceState {
    #[default]
    Initial = 0x1011,
    Playing = 0x1012,
    Paused = 0x1013,
    Stopped = 0x1014,
}

impl SourceState {
    /// Convert from the raw value reported through `SourceInt::State`
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0x1011 => Some(SourceState::Initial),
            0x1012 => Some(SourceState::Playing),
            0x1013 => Some(SourceState::Paused),
            0x1014 => Some(SourceState::Stopped),
            _ => None,
        }
    }
}

/// Scalar source properties
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFloat {
    ConeInnerAngle = 0x1001,
    ConeOuterAngle = 0x1002,
    Pitch = 0x1003,
    Gain = 0x100A,
    ReferenceDistance = 0x1020,
    RolloffFactor = 0x1021,
    ConeOuterGain = 0x1022,
    MaxDistance = 0x1023,
    SecOffset = 0x1024,
}

/// Vector source properties
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceVector {
    Position = 0x1004,
    Direction = 0x1005,
    Velocity = 0x1006,
}

/// Integer source properties
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceInt {
    Relative = 0x0202,
    Looping = 0x1007,
    Buffer = 0x1009,
    State = 0x1010,
    BuffersQueued = 0x1015,
    BuffersProcessed = 0x1016,
    SampleOffset = 0x1025,
}

/// Buffer properties
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferProp {
    Frequency = 0x2001,
    Bits = 0x2002,
    Channels = 0x2003,
    Size = 0x2004,
}

/// Vector listener properties
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerVector {
    Position = 0x1004,
    Velocity = 0x1006,
}

/// Listener orientation as an "at" and an "up" vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub at: Vec3,
    pub up: Vec3,
}

impl Default for Orientation {
    fn default() -> Self {
        Self {
            at: Vec3::NEG_Z,
            up: Vec3::Y,
        }
    }
}

/// Native audio device
///
/// Calls never return errors directly (except `open_device`); a failing call
/// records an error code that the next `get_error` returns and clears. Getters
/// on a failing call return a zero value.
pub trait AudioBackend: Send {
    /// Short backend name for diagnostics
    fn name(&self) -> &'static str;

    /// Open the named device (`None` for the default) and create a context
    fn open_device(&mut self, device: Option<&str>) -> Result<(), BackendError>;

    /// Close the device, releasing every object still alive
    fn close_device(&mut self);

    /// Hardware voice limit
    fn max_sources(&self) -> usize;

    /// Return and clear the pending error
    fn get_error(&mut self) -> Option<BackendError>;

    fn gen_buffer(&mut self) -> ObjectId;
    fn delete_buffer(&mut self, buffer: ObjectId);
    fn buffer_data(
        &mut self,
        buffer: ObjectId,
        format: AudioFormat,
        samples: &[i16],
        frequency: u32,
    );
    fn get_buffer_i(&mut self, buffer: ObjectId, prop: BufferProp) -> i32;

    fn gen_source(&mut self) -> ObjectId;
    fn delete_source(&mut self, source: ObjectId);

    fn source_f(&mut self, source: ObjectId, prop: SourceFloat, value: f32);
    fn get_source_f(&mut self, source: ObjectId, prop: SourceFloat) -> f32;
    fn source_3f(&mut self, source: ObjectId, prop: SourceVector, value: Vec3);
    fn get_source_3f(&mut self, source: ObjectId, prop: SourceVector) -> Vec3;
    fn source_i(&mut self, source: ObjectId, prop: SourceInt, value: i32);
    fn get_source_i(&mut self, source: ObjectId, prop: SourceInt) -> i32;

    fn source_play(&mut self, source: ObjectId);
    fn source_pause(&mut self, source: ObjectId);
    fn source_stop(&mut self, source: ObjectId);
    fn source_rewind(&mut self, source: ObjectId);

    /// Append buffers to a streaming source's queue
    fn source_queue_buffers(&mut self, source: ObjectId, buffers: &[ObjectId]);

    /// Remove `count` processed buffers from the front of the queue
    fn source_unqueue_buffers(&mut self, source: ObjectId, count: usize) -> Vec<ObjectId>;

    fn listener_gain(&mut self, gain: f32);
    fn get_listener_gain(&mut self) -> f32;
    fn listener_3f(&mut self, prop: ListenerVector, value: Vec3);
    fn get_listener_3f(&mut self, prop: ListenerVector) -> Vec3;
    fn listener_orientation(&mut self, orientation: Orientation);
    fn get_listener_orientation(&mut self) -> Orientation;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(BackendError::InvalidName.code(), 0xA001);
        assert_eq!(BackendError::DriverFailure.code(), 0xA101);
        assert_eq!(BackendError::from_code(0), None);
        assert_eq!(
            BackendError::from_code(0xA005),
            Some(BackendError::OutOfMemory)
        );
        assert_eq!(
            BackendError::from_code(0xBEEF),
            Some(BackendError::DriverFailure)
        );
    }

    #[test]
    fn test_source_state_round_trip() {
        for state in [
            SourceState::Initial,
            SourceState::Playing,
            SourceState::Paused,
            SourceState::Stopped,
        ] {
            assert_eq!(SourceState::from_i32(state as i32), Some(state));
        }
        assert_eq!(SourceState::from_i32(0), None);
    }

    #[test]
    fn test_default_orientation() {
        let orientation = Orientation::default();
        assert_eq!(orientation.at, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(orientation.up, Vec3::new(0.0, 1.0, 0.0));
    }
}
