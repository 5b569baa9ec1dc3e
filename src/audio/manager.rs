//! The audio manager
//!
//! `AudioManager` owns the backend device and every piece of mutable audio
//! state: the buffer registry, the voice pool, the command queue and the
//! class gain table. All of it lives in one [`State`] behind a single
//! reentrant lock shared with the [`Buffer`] and [`Source`] handles and the
//! maintenance thread.
//!
//! # Locking
//!
//! The lock is a `parking_lot::ReentrantMutex` around a `RefCell`. Each
//! operation locks, borrows the state for its own duration and releases it,
//! so a thread already holding the lock (see [`AudioManager::lock`]) can
//! call any handle method without deadlocking.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use super::buffer::{Buffer, BufferRegistry};
use super::command::{Command, CommandQueue, SourceKey};
use super::error::{generate, report, AudioError, AudioResult};
use super::maintenance::Maintenance;
use super::source::{Binding, Source, SourceToken, Voice};
use crate::config::{AudioConfig, CLASS_COUNT};
use crate::logging::apply_log_level;
use crate::sound::backend::{
    AudioBackend, BackendError, Checked, ListenerVector, ObjectId, Orientation, SoftBackend,
};
use crate::time::{Clock, SystemClock};

/// Product of the gains of every class set in `classes`
pub(crate) fn class_factor(gains: &[f32; CLASS_COUNT], classes: u32) -> f32 {
    gains
        .iter()
        .enumerate()
        .filter(|&(class, _)| classes & (1 << class) != 0)
        .map(|(_, &gain)| gain)
        .product()
}

/// A pooled voice and the token its handles share
#[derive(Debug)]
pub(crate) struct PoolEntry {
    token: Arc<SourceToken>,
    pub voice: Voice,
}

impl PoolEntry {
    /// Whether any application handle still refers to the voice
    fn is_referenced(&self) -> bool {
        Arc::strong_count(&self.token) > 1
    }
}

/// Everything guarded by the manager lock
pub(crate) struct State {
    pub backend: Box<dyn AudioBackend>,
    pub active: bool,
    pub config: AudioConfig,
    pub buffers: BufferRegistry,
    /// Ordered by descending priority; equal priorities keep insertion order
    pub pool: Vec<PoolEntry>,
    pub commands: CommandQueue,
    pub class_gains: [f32; CLASS_COUNT],
    next_key: SourceKey,
}

impl State {
    fn new(config: AudioConfig, backend: Box<dyn AudioBackend>) -> Self {
        Self {
            backend,
            active: false,
            class_gains: config.class_gains,
            config,
            buffers: BufferRegistry::default(),
            pool: Vec::new(),
            commands: CommandQueue::new(),
            next_key: 1,
        }
    }

    /// Run `f` on the voice behind `key`
    pub fn with_voice<T>(
        &mut self,
        key: SourceKey,
        f: impl FnOnce(&mut Voice, &mut dyn AudioBackend, &[f32; CLASS_COUNT]) -> AudioResult<T>,
    ) -> AudioResult<T> {
        let State {
            backend,
            pool,
            class_gains,
            ..
        } = self;
        let entry = pool
            .iter_mut()
            .find(|entry| entry.voice.key == key)
            .ok_or(BackendError::InvalidName)?;
        f(&mut entry.voice, backend.as_mut(), class_gains)
    }

    pub fn submit(&mut self, command: Command) -> AudioResult<()> {
        self.commands.submit(command);
        Ok(())
    }

    /// Voices the pool may hold at once
    fn voice_limit(&self) -> usize {
        let hardware = self.backend.max_sources();
        self.config
            .max_sources
            .map_or(hardware, |cap| cap.min(hardware))
    }

    /// Admit a new voice at `priority`, evicting an unreferenced voice of
    /// equal or lower priority when the pool is full
    fn allocate(&mut self, priority: i32) -> AudioResult<Option<Arc<SourceToken>>> {
        if self.pool.len() >= self.voice_limit() {
            let victim = self
                .pool
                .iter()
                .rposition(|entry| !entry.is_referenced() && entry.voice.priority <= priority);
            match victim {
                Some(index) => self.evict(index)?,
                None => {
                    log::debug!(
                        "no voice for priority {}: all {} voices are held or outrank it",
                        priority,
                        self.pool.len()
                    );
                    return Ok(None);
                }
            }
        }

        let id = generate(self.backend.as_mut(), "gen_source", |b| b.gen_source())?;
        let key = self.next_key;
        self.next_key += 1;
        let token = Arc::new(SourceToken { key });
        let at = self
            .pool
            .iter()
            .position(|entry| entry.voice.priority < priority)
            .unwrap_or(self.pool.len());
        self.pool.insert(
            at,
            PoolEntry {
                token: token.clone(),
                voice: Voice::new(key, id, priority),
            },
        );
        Ok(Some(token))
    }

    /// Remove a voice from the pool and delete it, dropping its commands first
    fn evict(&mut self, index: usize) -> AudioResult<()> {
        let mut entry = self.pool.remove(index);
        let dropped = self.commands.remove_for(entry.voice.key);
        log::debug!(
            "evicting voice {} (priority {}, {} commands dropped)",
            entry.voice.id,
            entry.voice.priority,
            dropped
        );
        entry.voice.release(self.backend.as_mut())
    }

    /// Sources still held by the application
    fn held_sources(&self) -> usize {
        self.pool.iter().filter(|entry| entry.is_referenced()).count()
    }

    /// One maintenance pass
    pub fn sweep(&mut self, now: Duration) -> AudioResult<()> {
        self.cull_buffers()?;
        self.evict_idle()?;
        self.refill_streams()?;
        self.execute_commands(now)
    }

    fn cull_buffers(&mut self) -> AudioResult<()> {
        let backend = self.backend.as_mut();
        let mut bound = HashSet::new();
        for entry in &self.pool {
            bound.insert(entry.voice.reported_buffer(backend)?);
        }
        self.buffers.cull(backend, &bound)?;
        Ok(())
    }

    fn evict_idle(&mut self) -> AudioResult<()> {
        let mut index = 0;
        while index < self.pool.len() {
            let entry = &self.pool[index];
            if entry.is_referenced() || entry.voice.is_playing(self.backend.as_mut())? {
                index += 1;
            } else {
                self.evict(index)?;
            }
        }
        Ok(())
    }

    fn refill_streams(&mut self) -> AudioResult<()> {
        let backend = self.backend.as_mut();
        for entry in &mut self.pool {
            let voice = &mut entry.voice;
            if let Binding::Stream(ring) = &mut voice.binding {
                ring.refill(backend, voice.id)?;
            }
        }
        Ok(())
    }

    fn execute_commands(&mut self, now: Duration) -> AudioResult<()> {
        let State {
            backend,
            pool,
            commands,
            class_gains,
            ..
        } = self;
        let rejected = commands.execute(now, |key, kind, value| {
            match pool.iter_mut().find(|entry| entry.voice.key == key) {
                Some(entry) => {
                    let factor = class_factor(class_gains, entry.voice.classes);
                    entry.voice.set_param(backend.as_mut(), kind, value, factor)
                }
                None => Ok(()),
            }
        });
        for (command, err) in rejected {
            log::error!(
                "dropping {:?} command on source {}: {}",
                command.kind,
                command.source,
                err
            );
        }
        Ok(())
    }

    fn set_class_gain(&mut self, class: usize, gain: f32) -> AudioResult<()> {
        if class >= CLASS_COUNT || !gain.is_finite() || gain < 0.0 {
            return Err(BackendError::InvalidValue.into());
        }
        self.class_gains[class] = gain;
        let backend = self.backend.as_mut();
        for entry in &self.pool {
            if entry.voice.classes & (1 << class) != 0 {
                let factor = class_factor(&self.class_gains, entry.voice.classes);
                entry.voice.apply_gain(backend, factor)?;
            }
        }
        Ok(())
    }

    /// Release every voice and buffer and close the device
    fn teardown(&mut self) {
        self.commands.clear();
        for mut entry in self.pool.drain(..) {
            let id = entry.voice.id;
            if let Err(err) = entry.voice.release(self.backend.as_mut()) {
                log::warn!("failed to release voice {}: {}", id, err);
            }
        }
        self.buffers.release_all(self.backend.as_mut());
        self.backend.close_device();
        self.active = false;
    }
}

/// State shared between the manager, its handles and the maintenance thread
pub(crate) struct Shared {
    state: ReentrantMutex<RefCell<State>>,
    clock: Arc<dyn Clock>,
    /// Live `Buffer` handles (allocated or not)
    live_buffers: AtomicUsize,
}

impl Shared {
    /// Lock and borrow the state for the duration of `f`
    pub fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Run an application-facing operation on an active manager and settle
    /// its result
    pub fn perform<T>(
        &self,
        op: &str,
        f: impl FnOnce(&mut State) -> AudioResult<T>,
    ) -> Option<T> {
        let result = self.with_state(|state| {
            if !state.active {
                return Err(AudioError::NotInitialized);
            }
            f(state)
        });
        report(op, result)
    }

    pub fn lock(&self) -> AudioLock<'_> {
        AudioLock {
            _guard: self.state.lock(),
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn chunk_frames(&self) -> usize {
        self.with_state(|state| state.config.stream_chunk_frames)
    }

    pub fn buffer_created(&self) {
        self.live_buffers.fetch_add(1, Ordering::SeqCst);
    }

    /// Last handle to a buffer dropped
    pub fn release_buffer(&self, id: Option<ObjectId>) {
        self.live_buffers.fetch_sub(1, Ordering::SeqCst);
        if let Some(id) = id {
            self.with_state(|state| state.buffers.mark_cullable(id));
        }
    }

    /// One maintenance pass at the current clock time
    pub fn sweep(&self) -> AudioResult<()> {
        let now = self.clock.now();
        self.with_state(|state| {
            if !state.active {
                return Err(AudioError::NotInitialized);
            }
            state.sweep(now)
        })
    }
}

/// Exclusive hold on the manager state.
///
/// While alive, other threads (the maintenance sweep included) wait; the
/// holding thread may keep calling into the manager and its handles.
pub struct AudioLock<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<State>>,
}

/// Audio resource manager
pub struct AudioManager {
    shared: Arc<Shared>,
    maintenance: Mutex<Option<Maintenance>>,
}

impl AudioManager {
    /// Create an inactive manager over `backend`
    pub fn new(config: AudioConfig, backend: Box<dyn AudioBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: ReentrantMutex::new(RefCell::new(State::new(config, backend))),
                clock,
                live_buffers: AtomicUsize::new(0),
            }),
            maintenance: Mutex::new(None),
        }
    }

    /// Manager over the software device, driven by the wall clock
    pub fn soft(config: AudioConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let backend = SoftBackend::new(clock.clone());
        Self::new(config, Box::new(backend), clock)
    }

    /// Open the device and start the maintenance thread
    pub fn initialize(&self) -> AudioResult<()> {
        let mut maintenance = self.maintenance.lock();
        let (spawn, interval) = self.shared.with_state(|state| {
            if state.active {
                return Err(AudioError::AlreadyInitialized);
            }
            if let Some(level) = state.config.log_level {
                apply_log_level(level);
            }
            let device = state.config.device.clone();
            state.backend.open_device(device.as_deref()).map_err(|err| {
                log::error!(
                    "failed to open audio device {}: {}",
                    device.as_deref().unwrap_or("(default)"),
                    err
                );
                AudioError::DeviceInit(err)
            })?;
            state.active = true;
            state.class_gains = state.config.class_gains;
            log::info!(
                "audio initialized on {} backend ({} voices)",
                state.backend.name(),
                state.voice_limit()
            );
            Ok((
                state.config.maintenance_thread,
                state.config.maintenance_interval,
            ))
        })?;

        if spawn {
            match Maintenance::start(self.shared.clone(), interval) {
                Ok(thread) => *maintenance = Some(thread),
                Err(err) => {
                    log::error!("failed to start audio maintenance: {}", err);
                    self.shared.with_state(|state| state.teardown());
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Whether the device is open
    pub fn active(&self) -> bool {
        self.shared.with_state(|state| state.active)
    }

    /// Stop the maintenance thread, release everything and close the device.
    ///
    /// Every `Buffer` and `Source` handle must have been dropped first;
    /// otherwise nothing is torn down and `HandlesOutstanding` is returned.
    pub fn shut_down(&self) -> AudioResult<()> {
        let mut maintenance = self.maintenance.lock();
        let live_buffers = self.shared.live_buffers.load(Ordering::SeqCst);
        self.shared.with_state(|state| {
            if !state.active {
                return Err(AudioError::NotInitialized);
            }
            let sources = state.held_sources();
            if live_buffers > 0 || sources > 0 {
                let err = AudioError::HandlesOutstanding {
                    buffers: live_buffers,
                    sources,
                };
                log::error!("cannot shut down audio: {}", err);
                return Err(err);
            }
            Ok(())
        })?;

        // Join outside the lock; the sweep needs it to finish.
        if let Some(thread) = maintenance.take() {
            if let Err(err) = thread.stop() {
                log::warn!("audio maintenance thread ended abnormally: {}", err);
            }
        }
        self.shared.with_state(|state| state.teardown());
        log::info!("audio shut down");
        Ok(())
    }

    /// Run one maintenance pass on the calling thread
    pub fn run_maintenance(&self) -> AudioResult<()> {
        self.shared.sweep()
    }

    /// Whether the background maintenance thread is alive
    pub fn maintenance_running(&self) -> bool {
        self.maintenance
            .lock()
            .as_ref()
            .is_some_and(|thread| thread.is_running())
    }

    /// Hold the manager lock across several calls
    pub fn lock(&self) -> AudioLock<'_> {
        self.shared.lock()
    }

    /// Allocate a voice at `priority`.
    ///
    /// Returns `None` when the pool is full and every voice is either held by
    /// the application or outranks the request; the sound should be dropped.
    pub fn try_allocate(&self, priority: i32) -> Option<Source> {
        self.shared
            .perform("try_allocate", |state| state.allocate(priority))
            .flatten()
            .map(|token| Source::new(self.shared.clone(), token))
    }

    /// Create an empty buffer handle; backend storage is allocated on upload
    pub fn create_buffer(&self) -> Buffer {
        Buffer::new(self.shared.clone())
    }

    pub fn config(&self) -> AudioConfig {
        self.shared.with_state(|state| state.config.clone())
    }

    /// Voices in the pool
    pub fn source_count(&self) -> usize {
        self.shared.with_state(|state| state.pool.len())
    }

    /// Backend buffers in the registry, cullable ones included
    pub fn buffer_count(&self) -> usize {
        self.shared.with_state(|state| state.buffers.len())
    }

    /// Commands waiting to run or finish
    pub fn pending_commands(&self) -> usize {
        self.shared.with_state(|state| state.commands.len())
    }

    /// Set the multiplier of one class and re-apply it to member voices
    pub fn set_class_gain(&self, class: usize, gain: f32) {
        self.shared
            .perform("set_class_gain", |state| state.set_class_gain(class, gain));
    }

    pub fn class_gain(&self, class: usize) -> f32 {
        self.shared
            .with_state(|state| state.class_gains.get(class).copied())
            .unwrap_or(0.0)
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.shared.perform("set_master_gain", |state| {
            Ok(state
                .backend
                .checked("listener_gain", |b| b.listener_gain(gain))?)
        });
    }

    pub fn master_gain(&self) -> f32 {
        self.shared
            .perform("master_gain", |state| {
                Ok(state
                    .backend
                    .checked("get_listener_gain", |b| b.get_listener_gain())?)
            })
            .unwrap_or(0.0)
    }

    fn set_listener_vector(&self, op: &str, prop: ListenerVector, value: Vec3) {
        self.shared.perform(op, |state| {
            Ok(state
                .backend
                .checked("listener_3f", |b| b.listener_3f(prop, value))?)
        });
    }

    fn listener_vector(&self, op: &str, prop: ListenerVector) -> Vec3 {
        self.shared
            .perform(op, |state| {
                Ok(state
                    .backend
                    .checked("get_listener_3f", |b| b.get_listener_3f(prop))?)
            })
            .unwrap_or_default()
    }

    pub fn set_listener_position(&self, position: Vec3) {
        self.set_listener_vector("set_listener_position", ListenerVector::Position, position);
    }

    pub fn listener_position(&self) -> Vec3 {
        self.listener_vector("listener_position", ListenerVector::Position)
    }

    pub fn set_listener_velocity(&self, velocity: Vec3) {
        self.set_listener_vector("set_listener_velocity", ListenerVector::Velocity, velocity);
    }

    pub fn listener_velocity(&self) -> Vec3 {
        self.listener_vector("listener_velocity", ListenerVector::Velocity)
    }

    /// Point the listener along `at` with `up` as its up vector
    pub fn set_listener_orientation(&self, at: Vec3, up: Vec3) {
        self.shared.perform("set_listener_orientation", |state| {
            Ok(state.backend.checked("listener_orientation", |b| {
                b.listener_orientation(Orientation { at, up })
            })?)
        });
    }

    pub fn listener_orientation(&self) -> Orientation {
        self.shared
            .perform("listener_orientation", |state| {
                Ok(state
                    .backend
                    .checked("get_listener_orientation", |b| b.get_listener_orientation())?)
            })
            .unwrap_or_default()
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        if let Some(thread) = self.maintenance.get_mut().take() {
            if let Err(err) = thread.stop() {
                log::warn!("audio maintenance thread ended abnormally: {}", err);
            }
        }
        if self.active() {
            if let Err(err) = self.shut_down() {
                log::warn!("audio manager dropped without shutting down: {}", err);
            }
        }
    }
}
