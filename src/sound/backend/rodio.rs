//! Rodio output backend
//!
//! Object bookkeeping (buffers, voices, queues, offsets, errors) is kept by a
//! wall-clock [`SoftBackend`], which estimates playback progress from elapsed
//! time. Every change to a voice's playback is mirrored onto a rodio `Sink`
//! owned by a dedicated output thread, since rodio's output stream cannot
//! leave the thread that opened it.
//!
//! Gain, pitch (as playback speed) and looping are rendered; 3D parameters
//! are stored and reported but not spatialised.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use ::rodio::buffer::SamplesBuffer;
use ::rodio::{OutputStream, Sink, Source};
use crossbeam::channel::{self, Receiver, Sender};
use glam::Vec3;

use super::soft::SoftBackend;
use super::{
    AudioBackend, BackendError, BufferProp, ListenerVector, ObjectId, Orientation, SourceFloat,
    SourceInt, SourceState, SourceVector,
};
use crate::sound::formats::AudioFormat;
use crate::time::SystemClock;

/// Interleaved PCM handed to the output thread
struct Chunk {
    channels: u16,
    rate: u32,
    samples: Vec<i16>,
}

impl Chunk {
    fn from_parts((format, rate, samples): (AudioFormat, u32, Vec<i16>)) -> Self {
        Self {
            channels: format.channels(),
            rate,
            samples,
        }
    }

    fn into_source(self) -> SamplesBuffer<i16> {
        SamplesBuffer::new(self.channels, self.rate, self.samples)
    }
}

/// Command sent to the output thread
enum OutputCmd {
    Start {
        voice: ObjectId,
        chunks: Vec<Chunk>,
        volume: f32,
        speed: f32,
        looping: bool,
    },
    Append(ObjectId, Chunk),
    Pause(ObjectId),
    Resume(ObjectId),
    Stop(ObjectId),
    Volume(ObjectId, f32),
    Speed(ObjectId, f32),
    Shutdown,
}

fn output_thread_main(rx: Receiver<OutputCmd>, ready: Sender<Result<(), String>>) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    log::debug!("rodio: output thread ready");

    let mut sinks: HashMap<ObjectId, Sink> = HashMap::new();

    for cmd in rx.iter() {
        match cmd {
            OutputCmd::Start {
                voice,
                chunks,
                volume,
                speed,
                looping,
            } => {
                if let Some(old) = sinks.remove(&voice) {
                    old.stop();
                }
                let sink = match Sink::try_new(&handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        log::warn!("rodio: cannot create sink for voice {}: {}", voice, e);
                        continue;
                    }
                };
                sink.set_volume(volume);
                sink.set_speed(speed);
                for chunk in chunks {
                    if looping {
                        sink.append(chunk.into_source().repeat_infinite());
                    } else {
                        sink.append(chunk.into_source());
                    }
                }
                sinks.insert(voice, sink);
            }
            OutputCmd::Append(voice, chunk) => {
                if let Some(sink) = sinks.get(&voice) {
                    sink.append(chunk.into_source());
                }
            }
            OutputCmd::Pause(voice) => {
                if let Some(sink) = sinks.get(&voice) {
                    sink.pause();
                }
            }
            OutputCmd::Resume(voice) => {
                if let Some(sink) = sinks.get(&voice) {
                    sink.play();
                }
            }
            OutputCmd::Stop(voice) => {
                if let Some(sink) = sinks.remove(&voice) {
                    sink.stop();
                }
            }
            OutputCmd::Volume(voice, volume) => {
                if let Some(sink) = sinks.get(&voice) {
                    sink.set_volume(volume);
                }
            }
            OutputCmd::Speed(voice, speed) => {
                if let Some(sink) = sinks.get(&voice) {
                    sink.set_speed(speed);
                }
            }
            OutputCmd::Shutdown => break,
        }
    }

    for (_, sink) in sinks.drain() {
        sink.stop();
    }
    log::debug!("rodio: output thread exited");
}

/// Backend playing through the system's default output device
pub struct RodioBackend {
    model: SoftBackend,
    tx: Option<Sender<OutputCmd>>,
    thread: Option<JoinHandle<()>>,
}

impl RodioBackend {
    pub fn new() -> Self {
        Self {
            model: SoftBackend::new(Arc::new(SystemClock::new())),
            tx: None,
            thread: None,
        }
    }

    fn send(&self, cmd: OutputCmd) {
        if let Some(tx) = &self.tx {
            if tx.send(cmd).is_err() {
                log::warn!("rodio: output thread is gone");
            }
        }
    }

    fn state(&mut self, voice: ObjectId) -> Option<SourceState> {
        SourceState::from_i32(self.model.get_source_i(voice, SourceInt::State))
    }

    fn volume(&mut self, voice: ObjectId) -> f32 {
        self.model.get_source_f(voice, SourceFloat::Gain) * self.model.get_listener_gain()
    }

    /// Restart the sink of `voice` from the model's current position
    fn restart(&mut self, voice: ObjectId) {
        if self.state(voice) != Some(SourceState::Playing) {
            return;
        }
        let chunks = self
            .model
            .remaining_audio(voice)
            .into_iter()
            .map(Chunk::from_parts)
            .collect();
        let cmd = OutputCmd::Start {
            voice,
            chunks,
            volume: self.volume(voice),
            speed: self.model.get_source_f(voice, SourceFloat::Pitch),
            looping: self.model.get_source_i(voice, SourceInt::Looping) != 0,
        };
        self.send(cmd);
    }
}

impl Default for RodioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        self.close_device();
    }
}

impl AudioBackend for RodioBackend {
    fn name(&self) -> &'static str {
        "rodio"
    }

    fn open_device(&mut self, device: Option<&str>) -> Result<(), BackendError> {
        if device.is_some() {
            // Only the default output is addressable.
            return Err(BackendError::InvalidValue);
        }
        if self.tx.is_some() {
            return Err(BackendError::InvalidOperation);
        }

        let (tx, rx) = channel::unbounded();
        let (ready_tx, ready_rx) = channel::bounded(1);
        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || output_thread_main(rx, ready_tx))
            .map_err(|e| {
                log::error!("rodio: cannot spawn output thread: {}", e);
                BackendError::DriverFailure
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                log::error!("rodio: cannot open output device: {}", reason);
                let _ = thread.join();
                return Err(BackendError::DriverFailure);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(BackendError::DriverFailure);
            }
        }

        self.model.open_device(None)?;
        self.tx = Some(tx);
        self.thread = Some(thread);
        Ok(())
    }

    fn close_device(&mut self) {
        self.send(OutputCmd::Shutdown);
        self.tx = None;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.model.close_device();
    }

    fn max_sources(&self) -> usize {
        self.model.max_sources()
    }

    fn get_error(&mut self) -> Option<BackendError> {
        self.model.get_error()
    }

    fn gen_buffer(&mut self) -> ObjectId {
        self.model.gen_buffer()
    }

    fn delete_buffer(&mut self, buffer: ObjectId) {
        self.model.delete_buffer(buffer)
    }

    fn buffer_data(
        &mut self,
        buffer: ObjectId,
        format: AudioFormat,
        samples: &[i16],
        frequency: u32,
    ) {
        self.model.buffer_data(buffer, format, samples, frequency)
    }

    fn get_buffer_i(&mut self, buffer: ObjectId, prop: BufferProp) -> i32 {
        self.model.get_buffer_i(buffer, prop)
    }

    fn gen_source(&mut self) -> ObjectId {
        self.model.gen_source()
    }

    fn delete_source(&mut self, source: ObjectId) {
        self.model.delete_source(source);
        if !self.model.has_error() {
            self.send(OutputCmd::Stop(source));
        }
    }

    fn source_f(&mut self, source: ObjectId, prop: SourceFloat, value: f32) {
        self.model.source_f(source, prop, value);
        if self.model.has_error() {
            return;
        }
        match prop {
            SourceFloat::Gain => {
                let volume = self.volume(source);
                self.send(OutputCmd::Volume(source, volume));
            }
            SourceFloat::Pitch => self.send(OutputCmd::Speed(source, value)),
            SourceFloat::SecOffset => self.restart(source),
            _ => {}
        }
    }

    fn get_source_f(&mut self, source: ObjectId, prop: SourceFloat) -> f32 {
        self.model.get_source_f(source, prop)
    }

    fn source_3f(&mut self, source: ObjectId, prop: SourceVector, value: Vec3) {
        self.model.source_3f(source, prop, value)
    }

    fn get_source_3f(&mut self, source: ObjectId, prop: SourceVector) -> Vec3 {
        self.model.get_source_3f(source, prop)
    }

    fn source_i(&mut self, source: ObjectId, prop: SourceInt, value: i32) {
        self.model.source_i(source, prop, value);
        if self.model.has_error() {
            return;
        }
        if matches!(prop, SourceInt::Looping | SourceInt::SampleOffset) {
            self.restart(source);
        }
    }

    fn get_source_i(&mut self, source: ObjectId, prop: SourceInt) -> i32 {
        self.model.get_source_i(source, prop)
    }

    fn source_play(&mut self, source: ObjectId) {
        let before = self.state(source);
        self.model.source_play(source);
        if self.model.has_error() {
            return;
        }
        if before == Some(SourceState::Paused) {
            self.send(OutputCmd::Resume(source));
        } else {
            self.restart(source);
        }
    }

    fn source_pause(&mut self, source: ObjectId) {
        self.model.source_pause(source);
        if !self.model.has_error() {
            self.send(OutputCmd::Pause(source));
        }
    }

    fn source_stop(&mut self, source: ObjectId) {
        self.model.source_stop(source);
        if !self.model.has_error() {
            self.send(OutputCmd::Stop(source));
        }
    }

    fn source_rewind(&mut self, source: ObjectId) {
        self.model.source_rewind(source);
        if !self.model.has_error() {
            self.send(OutputCmd::Stop(source));
        }
    }

    fn source_queue_buffers(&mut self, source: ObjectId, buffers: &[ObjectId]) {
        let playing = self.state(source) == Some(SourceState::Playing);
        self.model.source_queue_buffers(source, buffers);
        if self.model.has_error() || !playing {
            return;
        }
        // The new buffers are the tail of what is left to play.
        let remaining = self.model.remaining_audio(source);
        let skip = remaining.len().saturating_sub(buffers.len());
        for part in remaining.into_iter().skip(skip) {
            self.send(OutputCmd::Append(source, Chunk::from_parts(part)));
        }
    }

    fn source_unqueue_buffers(&mut self, source: ObjectId, count: usize) -> Vec<ObjectId> {
        self.model.source_unqueue_buffers(source, count)
    }

    fn listener_gain(&mut self, gain: f32) {
        self.model.listener_gain(gain)
    }

    fn get_listener_gain(&mut self) -> f32 {
        self.model.get_listener_gain()
    }

    fn listener_3f(&mut self, prop: ListenerVector, value: Vec3) {
        self.model.listener_3f(prop, value)
    }

    fn get_listener_3f(&mut self, prop: ListenerVector) -> Vec3 {
        self.model.get_listener_3f(prop)
    }

    fn listener_orientation(&mut self, orientation: Orientation) {
        self.model.listener_orientation(orientation)
    }

    fn get_listener_orientation(&mut self) -> Orientation {
        self.model.get_listener_orientation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rodio_backend_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<RodioBackend>();
    }

    #[test]
    fn test_named_device_rejected() {
        let mut backend = RodioBackend::new();
        assert_eq!(
            backend.open_device(Some("Speakers")),
            Err(BackendError::InvalidValue)
        );
    }

    #[test]
    fn test_calls_before_open_fail() {
        let mut backend = RodioBackend::new();
        backend.gen_source();
        assert_eq!(backend.get_error(), Some(BackendError::InvalidOperation));
    }
}
