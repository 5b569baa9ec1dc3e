//! Audio resource management
//!
//! Sits between the game and an OpenAL-like backend and owns everything the
//! backend allocates.
//!
//! # Architecture
//!
//! - `manager` - device lifecycle, voice pool, listener and class gains
//! - `buffer` - shared handles to decoded audio, culled once unbound
//! - `source` - handles to pooled voices and their parameters
//! - `stream` / `streaming` - decoder cursor with loop points and the
//!   four-slot refill ring that feeds it to a voice
//! - `command` - timed parameter transitions applied by the sweep
//! - `maintenance` - background thread running the sweep
//!
//! # Example
//!
//! ```
//! use soundmgr::audio::AudioManager;
//! use soundmgr::config::AudioConfig;
//! use soundmgr::sound::AudioFormat;
//!
//! let manager = AudioManager::soft(AudioConfig::manual());
//! manager.initialize().unwrap();
//!
//! let buffer = manager.create_buffer();
//! buffer.set(&[0; 2205], AudioFormat::Mono16, 22050);
//!
//! if let Some(source) = manager.try_allocate(10) {
//!     source.set_buffer(&buffer);
//!     source.play();
//! }
//! drop(buffer);
//! manager.run_maintenance().unwrap();
//! ```

mod buffer;
pub mod command;
mod error;
mod maintenance;
mod manager;
mod source;
mod stream;
mod streaming;

pub use buffer::Buffer;
pub use command::{Command, CommandQueue, ParamKind, ParamValue, SourceKey, ValueShape};
pub use error::{AudioError, AudioResult};
pub use manager::{AudioLock, AudioManager};
pub use source::Source;
pub use stream::AudioStream;
pub use streaming::{StreamRing, RING_SLOTS};
