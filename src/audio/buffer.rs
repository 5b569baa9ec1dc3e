//! Decoded audio buffers
//!
//! [`Buffer`] is the application's handle to a block of decoded audio held by
//! the backend. Handles are cheap to clone; the backend buffer is created the
//! first time data is uploaded and outlives the last handle until no voice
//! reports it as bound. Reclamation happens in the maintenance sweep, never on
//! the thread that dropped the handle.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::error::{generate, AudioError, AudioResult};
use super::manager::{Shared, State};
use crate::sound::backend::{AudioBackend, BufferProp, Checked, ObjectId};
use crate::sound::decoder::{open_decoder, SoundDecoder};
use crate::sound::formats::AudioFormat;

/// Frames decoded per read when loading a whole file
const LOAD_CHUNK_FRAMES: usize = 16384;

/// Registry of every buffer the manager owns, with its cullable flag
#[derive(Debug, Default)]
pub(crate) struct BufferRegistry {
    entries: HashMap<ObjectId, bool>,
}

impl BufferRegistry {
    /// Create a backend buffer and register it as held
    pub fn allocate(&mut self, backend: &mut dyn AudioBackend) -> AudioResult<ObjectId> {
        let id = generate(backend, "gen_buffer", |b| b.gen_buffer())?;
        self.entries.insert(id, false);
        Ok(id)
    }

    /// Flag a buffer for deletion once nothing plays it
    pub fn mark_cullable(&mut self, id: ObjectId) {
        if let Some(cullable) = self.entries.get_mut(&id) {
            *cullable = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_cullable(&self, id: ObjectId) -> Option<bool> {
        self.entries.get(&id).copied()
    }

    /// Delete every cullable buffer not in `bound`
    ///
    /// # Returns
    /// Number of buffers deleted
    pub fn cull(
        &mut self,
        backend: &mut dyn AudioBackend,
        bound: &HashSet<ObjectId>,
    ) -> AudioResult<usize> {
        let doomed: Vec<ObjectId> = self
            .entries
            .iter()
            .filter(|&(id, &cullable)| cullable && !bound.contains(id))
            .map(|(&id, _)| id)
            .collect();
        for &id in &doomed {
            backend.checked("delete_buffer", |b| b.delete_buffer(id))?;
            self.entries.remove(&id);
            log::debug!("culled buffer {}", id);
        }
        Ok(doomed.len())
    }

    /// Delete everything; used at shutdown once no voice remains
    pub fn release_all(&mut self, backend: &mut dyn AudioBackend) {
        for (id, _) in self.entries.drain() {
            if let Err(err) = backend.checked("delete_buffer", |b| b.delete_buffer(id)) {
                log::warn!("failed to delete buffer {} at shutdown: {}", id, err);
            }
        }
    }
}

struct BufferInner {
    shared: Arc<Shared>,
    id: OnceLock<ObjectId>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        self.shared.release_buffer(self.id.get().copied());
    }
}

/// Shared handle to a decoded audio buffer
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer").field("id", &self.id()).finish()
    }
}

impl Buffer {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        shared.buffer_created();
        Self {
            inner: Arc::new(BufferInner {
                shared,
                id: OnceLock::new(),
            }),
        }
    }

    /// Backend id, once data has been uploaded
    pub fn id(&self) -> Option<ObjectId> {
        self.inner.id.get().copied()
    }

    /// Upload interleaved samples, replacing any previous contents
    pub fn set(&self, samples: &[i16], format: AudioFormat, frequency: u32) {
        self.inner.shared.perform("Buffer::set", |state| {
            self.upload(state, samples, format, frequency)
        });
    }

    fn upload(
        &self,
        state: &mut State,
        samples: &[i16],
        format: AudioFormat,
        frequency: u32,
    ) -> AudioResult<()> {
        let id = match self.inner.id.get() {
            Some(&id) => id,
            None => {
                let id = state.buffers.allocate(state.backend.as_mut())?;
                let _ = self.inner.id.set(id);
                id
            }
        };
        state.backend.checked("buffer_data", |b| {
            b.buffer_data(id, format, samples, frequency)
        })?;
        Ok(())
    }

    /// Decode a whole file into the buffer.
    ///
    /// Unlike [`Buffer::set`], a rejected upload is returned to the caller.
    pub fn load(&self, path: &Path) -> AudioResult<()> {
        let mut decoder = open_decoder(path)?;
        let samples = decode_all(decoder.as_mut())?;
        self.inner.shared.with_state(|state| {
            if !state.active {
                return Err(AudioError::NotInitialized);
            }
            self.upload(state, &samples, decoder.format(), decoder.frequency())
        })?;
        log::debug!(
            "loaded {} ({} frames, {})",
            path.display(),
            samples.len() / decoder.format().channels() as usize,
            decoder.name()
        );
        Ok(())
    }

    fn property(&self, op: &str, prop: BufferProp) -> i32 {
        let Some(id) = self.id() else {
            return 0;
        };
        self.inner
            .shared
            .perform(op, |state| {
                Ok(state
                    .backend
                    .checked("get_buffer_i", |b| b.get_buffer_i(id, prop))?)
            })
            .unwrap_or(0)
    }

    /// Size of the data in bytes
    pub fn size(&self) -> usize {
        usize::try_from(self.property("Buffer::size", BufferProp::Size)).unwrap_or(0)
    }

    /// Sample rate in Hz
    pub fn frequency(&self) -> u32 {
        u32::try_from(self.property("Buffer::frequency", BufferProp::Frequency)).unwrap_or(0)
    }

    pub fn channels(&self) -> u16 {
        u16::try_from(self.property("Buffer::channels", BufferProp::Channels)).unwrap_or(0)
    }

    /// Length in frames, derived from the size and channel count
    pub fn sample_length(&self) -> u64 {
        let frame_bytes = self.channels() as usize * std::mem::size_of::<i16>();
        if frame_bytes == 0 {
            return 0;
        }
        (self.size() / frame_bytes) as u64
    }

    pub fn duration(&self) -> Duration {
        match self.frequency() {
            0 => Duration::ZERO,
            rate => Duration::from_secs_f64(self.sample_length() as f64 / f64::from(rate)),
        }
    }
}

fn decode_all(decoder: &mut dyn SoundDecoder) -> AudioResult<Vec<i16>> {
    let channels = decoder.format().channels() as usize;
    let mut samples = Vec::with_capacity(decoder.length() as usize * channels);
    let mut chunk = vec![0i16; LOAD_CHUNK_FRAMES * channels];
    loop {
        let frames = decoder.decode(&mut chunk)?;
        if frames == 0 {
            break;
        }
        samples.extend_from_slice(&chunk[..frames * channels]);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::manager::AudioManager;
    use crate::config::AudioConfig;
    use crate::sound::backend::{BackendError, SoftBackend, SourceInt};
    use crate::time::ManualClock;

    fn backend() -> SoftBackend {
        let mut backend = SoftBackend::new(Arc::new(ManualClock::new()));
        backend.open_device(None).unwrap();
        backend
    }

    fn manager() -> AudioManager {
        let clock = Arc::new(ManualClock::new());
        let manager = AudioManager::new(
            AudioConfig::manual(),
            Box::new(SoftBackend::new(clock.clone())),
            clock,
        );
        manager.initialize().unwrap();
        manager
    }

    fn manager_with_clock() -> (Arc<ManualClock>, AudioManager) {
        let clock = Arc::new(ManualClock::new());
        let manager = AudioManager::new(
            AudioConfig::manual(),
            Box::new(SoftBackend::new(clock.clone())),
            clock.clone(),
        );
        manager.initialize().unwrap();
        (clock, manager)
    }

    /// Minimal mono 16-bit WAV file
    fn wav_bytes(samples: &[i16], rate: u32) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for sample in samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_registry_allocate_and_mark() {
        let mut backend = backend();
        let mut registry = BufferRegistry::default();
        let id = registry.allocate(&mut backend).unwrap();
        assert_eq!(registry.is_cullable(id), Some(false));
        registry.mark_cullable(id);
        assert_eq!(registry.is_cullable(id), Some(true));
        // Unknown ids are ignored.
        registry.mark_cullable(id + 100);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cull_spares_bound_buffers() {
        let mut backend = backend();
        let mut registry = BufferRegistry::default();
        let kept = registry.allocate(&mut backend).unwrap();
        let held = registry.allocate(&mut backend).unwrap();
        let gone = registry.allocate(&mut backend).unwrap();
        backend.buffer_data(kept, AudioFormat::Mono16, &[0; 8], 8000);
        let voice = backend.gen_source();
        backend.source_i(voice, SourceInt::Buffer, kept as i32);

        registry.mark_cullable(kept);
        registry.mark_cullable(gone);
        let bound = HashSet::from([kept]);
        assert_eq!(registry.cull(&mut backend, &bound).unwrap(), 1);
        assert_eq!(registry.is_cullable(gone), None);
        assert_eq!(registry.is_cullable(kept), Some(true));
        assert_eq!(registry.is_cullable(held), Some(false));
        assert_eq!(backend.buffer_count(), 2);
    }

    #[test]
    fn test_release_all() {
        let mut backend = backend();
        let mut registry = BufferRegistry::default();
        registry.allocate(&mut backend).unwrap();
        registry.allocate(&mut backend).unwrap();
        registry.release_all(&mut backend);
        assert_eq!(registry.len(), 0);
        assert_eq!(backend.buffer_count(), 0);
    }

    #[test]
    fn test_backend_buffer_is_lazy() {
        let manager = manager();
        let buffer = manager.create_buffer();
        assert_eq!(buffer.id(), None);
        assert_eq!(manager.buffer_count(), 0);
        assert_eq!(buffer.size(), 0);

        buffer.set(&[0; 200], AudioFormat::Stereo16, 22050);
        assert!(buffer.id().is_some());
        assert_eq!(manager.buffer_count(), 1);
    }

    #[test]
    fn test_buffer_queries() {
        let manager = manager();
        let buffer = manager.create_buffer();
        buffer.set(&vec![0; 44100], AudioFormat::Stereo16, 22050);
        assert_eq!(buffer.size(), 88200);
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.frequency(), 22050);
        assert_eq!(buffer.sample_length(), 22050);
        assert_eq!(buffer.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_set_replaces_data() {
        let manager = manager();
        let buffer = manager.create_buffer();
        buffer.set(&[0; 100], AudioFormat::Mono16, 8000);
        let id = buffer.id();
        buffer.set(&[0; 10], AudioFormat::Mono16, 11025);
        assert_eq!(buffer.id(), id);
        assert_eq!(buffer.sample_length(), 10);
        assert_eq!(buffer.frequency(), 11025);
    }

    #[test]
    fn test_drop_defers_deletion_to_sweep() {
        let manager = manager();
        let buffer = manager.create_buffer();
        buffer.set(&[0; 16], AudioFormat::Mono16, 8000);
        let clone = buffer.clone();
        drop(buffer);
        manager.run_maintenance().unwrap();
        assert_eq!(manager.buffer_count(), 1);

        drop(clone);
        assert_eq!(manager.buffer_count(), 1);
        manager.run_maintenance().unwrap();
        assert_eq!(manager.buffer_count(), 0);
    }

    #[test]
    fn test_load_missing_file() {
        let manager = manager();
        let buffer = manager.create_buffer();
        let result = buffer.load(Path::new("/nonexistent/boom.wav"));
        assert!(matches!(
            result,
            Err(crate::audio::AudioError::Decode(_))
        ));
        assert_eq!(buffer.id(), None);
    }

    #[test]
    fn test_load_reports_rejected_upload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("short.wav");
        std::fs::write(&path, wav_bytes(&[3; 20], 1000)).unwrap();

        let (clock, manager) = manager_with_clock();
        let buffer = manager.create_buffer();
        buffer.set(&[0; 1000], AudioFormat::Mono16, 1000);
        let source = manager.try_allocate(0).unwrap();
        source.set_buffer(&buffer);
        source.play();
        clock.advance_ms(100);

        // Data of a buffer in use cannot be replaced.
        assert_eq!(
            buffer.load(&path),
            Err(AudioError::Backend(BackendError::InvalidOperation))
        );
        assert_eq!(buffer.sample_length(), 1000);

        source.clear();
        buffer.load(&path).unwrap();
        assert_eq!(buffer.sample_length(), 20);
    }

    #[test]
    fn test_load_on_inactive_manager() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("blip.wav");
        std::fs::write(&path, wav_bytes(&[1; 8], 8000)).unwrap();

        let (_, manager) = manager_with_clock();
        manager.shut_down().unwrap();
        let late = manager.create_buffer();
        assert_eq!(late.load(&path), Err(AudioError::NotInitialized));
        assert_eq!(late.id(), None);
    }

    #[test]
    fn test_decode_all() {
        use crate::sound::pcm::PcmDecoder;
        let samples: Vec<i16> = (0..40_000).map(|i| (i % 1000) as i16).collect();
        let mut decoder = PcmDecoder::new(samples.clone(), AudioFormat::Stereo16, 8000).unwrap();
        assert_eq!(decode_all(&mut decoder).unwrap(), samples);
    }
}
