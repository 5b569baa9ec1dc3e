//! Validating adapter over the backend's polled error state

use super::{AudioBackend, BackendError};

/// Run a backend call and turn the error slot into a `Result`
pub trait Checked {
    /// Perform `call`, then poll and clear the error channel.
    ///
    /// `op` names the call in diagnostics.
    fn checked<T, F>(&mut self, op: &'static str, call: F) -> Result<T, BackendError>
    where
        F: FnOnce(&mut Self) -> T;
}

impl<B: AudioBackend + ?Sized> Checked for B {
    fn checked<T, F>(&mut self, op: &'static str, call: F) -> Result<T, BackendError>
    where
        F: FnOnce(&mut Self) -> T,
    {
        let value = call(self);
        match self.get_error() {
            None => Ok(value),
            Some(err) => {
                log::trace!("{}: {} failed: {}", self.name(), op, err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::backend::{SoftBackend, SourceFloat, NO_OBJECT};
    use crate::time::ManualClock;
    use std::sync::Arc;

    fn backend() -> SoftBackend {
        let mut backend = SoftBackend::new(Arc::new(ManualClock::new()));
        backend.open_device(None).unwrap();
        backend
    }

    #[test]
    fn test_checked_passes_value_through() {
        let mut backend = backend();
        let source = backend.checked("gen_source", |b| b.gen_source()).unwrap();
        assert_ne!(source, NO_OBJECT);
    }

    #[test]
    fn test_checked_reports_and_clears_error() {
        let mut backend = backend();
        let result = backend.checked("source_f", |b| b.source_f(42, SourceFloat::Gain, 1.0));
        assert_eq!(result, Err(BackendError::InvalidName));
        assert_eq!(backend.get_error(), None);
    }

    #[test]
    fn test_checked_through_trait_object() {
        let mut boxed: Box<dyn AudioBackend> = Box::new(backend());
        let result = boxed.checked("get_source_f", |b| b.get_source_f(7, SourceFloat::Pitch));
        assert_eq!(result, Err(BackendError::InvalidName));
    }
}
