//! Locked copy of the latest full history.

use std::sync::{Mutex, PoisonError, TryLockError};

pub struct SnapshotCell {
    samples: Mutex<Vec<f64>>,
}

impl SnapshotCell {
    pub fn new(len: usize) -> Self {
        Self {
            samples: Mutex::new(vec![0.0; len]),
        }
    }

    /// Overwrite the snapshot if the lock is free. Returns false when the
    /// fitter currently holds it; the caller retries on its next block.
    pub fn try_publish(&self, src: &[f64]) -> bool {
        let mut guard = match self.samples.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        let n = guard.len().min(src.len());
        guard[..n].copy_from_slice(&src[..n]);
        true
    }

    /// Copy the snapshot out, waiting for the lock.
    pub fn copy_to(&self, dst: &mut [f64]) -> usize {
        let guard = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let n = guard.len().min(dst.len());
        dst[..n].copy_from_slice(&guard[..n]);
        n
    }

    /// Hold the lock from a test to simulate a fitter mid-copy.
    #[cfg(test)]
    pub(crate) fn hold(&self) -> std::sync::MutexGuard<'_, Vec<f64>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
