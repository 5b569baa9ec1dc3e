//! Threading helpers for the audio subsystem
//!
//! Provides a named thread handle with typed join errors and a cooperative
//! stop signal for periodic background workers.
//!
//! # Design Notes
//!
//! - `Thread` wraps `std::thread` spawning so failures surface as `ThreadError`
//!   instead of panics.
//! - `StopSignal`/`StopListener` carry a one-shot stop request over a crossbeam
//!   channel; the listener doubles as the worker's sleep between passes, so a
//!   stop request wakes it immediately instead of after the current interval.


use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

/// Error type for threading operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThreadError {
    /// Thread spawn failed
    #[error("Thread spawn failed: {0}")]
    SpawnFailed(String),
    /// Thread join failed
    #[error("Thread join failed: {0}")]
    JoinFailed(String),
}

pub type Result<T> = std::result::Result<T, ThreadError>;

// ============================================================================
// Thread Handle
// ============================================================================

/// Handle to a spawned thread
pub struct Thread<T> {
    handle: Option<JoinHandle<T>>,
    name: Option<String>,
}

impl<T> Thread<T> {
    /// Spawn a new thread that executes the given function
    ///
    /// # Arguments
    /// * `name` - Optional thread name (shows up in debuggers and panics)
    /// * `f` - Function to execute in the new thread
    ///
    /// # Errors
    /// Returns `ThreadError::SpawnFailed` if thread creation fails
    pub fn spawn<F>(name: Option<&str>, f: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut builder = thread::Builder::new();
        if let Some(n) = name {
            builder = builder.name(n.to_string());
        }

        let handle = builder
            .spawn(f)
            .map_err(|e| ThreadError::SpawnFailed(format!("Failed to spawn thread: {}", e)))?;

        Ok(Self {
            handle: Some(handle),
            name: name.map(String::from),
        })
    }

    /// Thread name given at spawn
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Wait for the thread to finish and return its result
    ///
    /// # Errors
    /// Returns `ThreadError::JoinFailed` if the thread panicked
    pub fn join(mut self) -> Result<T> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ThreadError::JoinFailed("Thread panicked".to_string())),
            None => Err(ThreadError::JoinFailed("Thread already joined".to_string())),
        }
    }

    /// Check if the thread is still running
    pub fn is_running(&self) -> bool {
        match &self.handle {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }
}

// ============================================================================
// Stop Signal
// ============================================================================

/// Requesting side of a stop signal
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Sender<()>,
}

/// Worker side of a stop signal
#[derive(Debug)]
pub struct StopListener {
    rx: Receiver<()>,
}

/// Create a connected stop signal pair
pub fn stop_signal() -> (StopSignal, StopListener) {
    let (tx, rx) = channel::bounded(1);
    (StopSignal { tx }, StopListener { rx })
}

impl StopSignal {
    /// Ask the worker to stop; repeated requests are harmless
    pub fn stop(&self) {
        let _ = self.tx.try_send(());
    }
}

impl StopListener {
    /// Check for a stop request without blocking
    pub fn should_stop(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(channel::TryRecvError::Empty) => false,
            // Every signal handle dropped: nobody can ask any more, so stop.
            Err(channel::TryRecvError::Disconnected) => true,
        }
    }

    /// Sleep up to `timeout`, returning early with `true` on a stop request
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}
