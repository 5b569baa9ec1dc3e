//! Background maintenance thread
//!
//! Runs the manager sweep (buffer culling, idle voice eviction, stream
//! refills, command execution) at a fixed interval. A failed or panicking
//! sweep ends the thread; the manager keeps working without it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::AudioResult;
use super::manager::Shared;
use crate::threading::{stop_signal, StopListener, StopSignal, Thread};

const THREAD_NAME: &str = "audio-maintenance";

pub(crate) struct Maintenance {
    signal: StopSignal,
    thread: Thread<()>,
}

impl Maintenance {
    pub fn start(shared: Arc<Shared>, interval: Duration) -> AudioResult<Self> {
        let (signal, listener) = stop_signal();
        let thread = Thread::spawn(Some(THREAD_NAME), move || {
            run(&shared, interval, &listener)
        })?;
        Ok(Self { signal, thread })
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_running()
    }

    /// Request a stop and wait for the current pass to finish
    pub fn stop(self) -> AudioResult<()> {
        self.signal.stop();
        self.thread.join()?;
        Ok(())
    }
}

fn run(shared: &Shared, interval: Duration, listener: &StopListener) {
    log::debug!("audio maintenance started, interval {:?}", interval);
    while !listener.should_stop() {
        let started = Instant::now();
        match panic::catch_unwind(AssertUnwindSafe(|| shared.sweep())) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::error!("audio maintenance failed, stopping: {}", err);
                return;
            }
            Err(_) => {
                log::error!("audio maintenance panicked, stopping");
                return;
            }
        }
        if listener.wait(interval.saturating_sub(started.elapsed())) {
            break;
        }
    }
    log::debug!("audio maintenance stopped");
}
