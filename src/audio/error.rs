//! Audio manager error taxonomy

use super::command::ParamKind;
use crate::sound::backend::{AudioBackend, BackendError, Checked, ObjectId};
use crate::sound::decoder::DecodeError;
use crate::threading::ThreadError;

/// Error type for audio manager operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AudioError {
    /// Opening the device or creating the context failed
    #[error("audio device initialization failed: {0}")]
    DeviceInit(#[source] BackendError),
    /// A backend call failed after initialization
    #[error("audio backend error: {0}")]
    Backend(#[from] BackendError),
    /// A file could not be opened or decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The maintenance thread could not be started or joined
    #[error(transparent)]
    Thread(#[from] ThreadError),
    /// A value does not have the shape its parameter takes
    #[error("value shape does not match parameter {0:?}")]
    ValueShape(ParamKind),
    #[error("audio manager is not initialized")]
    NotInitialized,
    #[error("audio manager is already initialized")]
    AlreadyInitialized,
    /// `shut_down` was called while façades were still held
    #[error("{buffers} buffer(s) and {sources} source(s) are still held by the application")]
    HandlesOutstanding { buffers: usize, sources: usize },
}

pub type AudioResult<T> = Result<T, AudioError>;

/// Abort on backend resource exhaustion.
///
/// Partially created audio state cannot be unwound mid-frame, so running out
/// of backend memory ends the process with the failing operation named.
pub(crate) fn exhausted(op: &str) -> ! {
    log::error!("audio backend out of memory during {}", op);
    panic!("audio backend out of memory during {}", op);
}

/// Create a backend object, treating out-of-memory as fatal
pub(crate) fn generate(
    backend: &mut dyn AudioBackend,
    op: &'static str,
    gen: fn(&mut dyn AudioBackend) -> ObjectId,
) -> AudioResult<ObjectId> {
    match backend.checked(op, |b| gen(b)) {
        Ok(id) => Ok(id),
        Err(BackendError::OutOfMemory) => exhausted(op),
        Err(err) => Err(err.into()),
    }
}

/// Settle the result of an application-facing operation.
///
/// Backend failures and mismatched values are contract violations: logged,
/// asserted in debug builds, ignored in release. Anything else is a runtime condition and is
/// only logged.
pub(crate) fn report<T>(op: &str, result: AudioResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err @ (AudioError::Backend(_) | AudioError::ValueShape(_))) => {
            log::error!("{}: {}", op, err);
            debug_assert!(false, "{}: {}", op, err);
            None
        }
        Err(err) => {
            log::error!("{}: {}", op, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::backend::SoftBackend;
    use crate::time::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_error_display() {
        let err = AudioError::HandlesOutstanding {
            buffers: 2,
            sources: 1,
        };
        assert_eq!(
            err.to_string(),
            "2 buffer(s) and 1 source(s) are still held by the application"
        );
        assert_eq!(
            AudioError::DeviceInit(BackendError::InvalidValue).to_string(),
            "audio device initialization failed: invalid value"
        );
    }

    #[test]
    fn test_conversions() {
        let err: AudioError = DecodeError::NotFound("a.ogg".into()).into();
        assert!(matches!(err, AudioError::Decode(_)));
        let err: AudioError = BackendError::InvalidName.into();
        assert_eq!(err, AudioError::Backend(BackendError::InvalidName));
    }

    #[test]
    fn test_generate_passes_other_errors() {
        // Closed device: generation fails with a recoverable error.
        let mut backend = SoftBackend::new(Arc::new(ManualClock::new()));
        let result = generate(&mut backend, "gen_source", |b| b.gen_source());
        assert_eq!(
            result,
            Err(AudioError::Backend(BackendError::InvalidOperation))
        );
    }

    #[test]
    #[should_panic(expected = "out of memory during gen_buffer")]
    fn test_generate_exhaustion_is_fatal() {
        let mut backend = SoftBackend::new(Arc::new(ManualClock::new())).with_buffer_capacity(0);
        backend.open_device(None).unwrap();
        let _ = generate(&mut backend, "gen_buffer", |b| b.gen_buffer());
    }

    #[test]
    fn test_report_runtime_error() {
        let result: AudioResult<()> = Err(AudioError::NotInitialized);
        assert_eq!(report("op", result), None);
        assert_eq!(report("op", Ok(5)), Some(5));
    }
}
