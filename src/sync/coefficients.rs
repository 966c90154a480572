//! Lock-free double buffer for AR coefficients.
//!
//! Single writer (the fitter). The sequence number selects the current slot;
//! the writer fills the other slot and then bumps the sequence. Readers
//! retry if the sequence moved while they copied.

use std::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};

const MAX_READ_ATTEMPTS: usize = 4;

pub struct CoefficientCell {
    slots: [Box<[AtomicU64]>; 2],
    sequence: AtomicUsize,
}

impl CoefficientCell {
    pub fn new(len: usize) -> Self {
        let slot = || -> Box<[AtomicU64]> {
            (0..len).map(|_| AtomicU64::new(0.0f64.to_bits())).collect()
        };
        Self {
            slots: [slot(), slot()],
            sequence: AtomicUsize::new(0),
        }
    }

    /// Publish a complete coefficient set. Must only be called from one thread.
    pub fn publish(&self, coefficients: &[f64]) {
        let next = self.sequence.load(Ordering::Relaxed).wrapping_add(1);
        // Readers that see any of the slot writes below also see the
        // previous sequence bump.
        fence(Ordering::Release);
        for (cell, &c) in self.slots[next & 1].iter().zip(coefficients) {
            cell.store(c.to_bits(), Ordering::Relaxed);
        }
        self.sequence.store(next, Ordering::Release);
    }

    /// Copy the current set into `out`. Returns false if every attempt raced
    /// a publish, in which case `out` holds no consistent set.
    pub fn load_into(&self, out: &mut [f64]) -> bool {
        for _ in 0..MAX_READ_ATTEMPTS {
            let seq = self.sequence.load(Ordering::Acquire);
            for (dst, cell) in out.iter_mut().zip(self.slots[seq & 1].iter()) {
                *dst = f64::from_bits(cell.load(Ordering::Relaxed));
            }
            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == seq {
                return true;
            }
        }
        false
    }

    /// Number of sets published so far.
    pub fn publish_count(&self) -> u64 {
        self.sequence.load(Ordering::Acquire) as u64
    }
}
