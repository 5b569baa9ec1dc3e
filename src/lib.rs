//! soundmgr: audio resource manager over an OpenAL-like backend
//!
//! Owns device lifecycle, a bounded priority pool of voices, deferred
//! reclamation of decoded buffers, timed parameter transitions and
//! streaming playback with loop points. See [`audio`] for the manager
//! itself and [`sound`] for decoders and backends.

pub mod audio;
pub mod config;
pub mod logging;
pub mod sound;
pub mod threading;
pub mod time;

pub use audio::{AudioError, AudioManager, AudioResult, AudioStream, Buffer, Source};
pub use config::AudioConfig;
pub use logging::LogLevel;
