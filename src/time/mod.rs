//! Time sources for the audio subsystem

pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};
