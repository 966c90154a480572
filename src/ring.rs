//! Fixed-capacity history of filtered samples.
//!
//! Storage has one spare slot so a full ring never has `read == write`.

pub struct HistoryRing {
    storage: Vec<f64>,
    capacity: usize,
    write: usize,
    len: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0.0; capacity + 1],
            capacity,
            write: 0,
            len: 0,
        }
    }

    /// Append samples, evicting the oldest once full.
    ///
    /// Returns how many leading samples of `samples` were dropped because the
    /// chunk alone exceeds the capacity.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let discarded = samples.len().saturating_sub(self.capacity);
        let fresh = &samples[discarded..];
        let slots = self.storage.len();

        let mut written = 0;
        while written < fresh.len() {
            let run = (slots - self.write).min(fresh.len() - written);
            for (dst, &src) in self.storage[self.write..self.write + run]
                .iter_mut()
                .zip(&fresh[written..written + run])
            {
                *dst = src as f64;
            }
            self.write = (self.write + run) % slots;
            written += run;
        }

        self.len = (self.len + fresh.len()).min(self.capacity);
        discarded
    }

    /// Copy the logical contents oldest-first into `out`, returning the count.
    pub fn copy_into(&self, out: &mut [f64]) -> usize {
        let n = self.len.min(out.len());
        let slots = self.storage.len();
        // Skip the oldest entries if `out` is short.
        let start = (self.write + slots - n) % slots;

        let first = (slots - start).min(n);
        out[..first].copy_from_slice(&self.storage[start..start + first]);
        out[first..n].copy_from_slice(&self.storage[..n - first]);
        n
    }

    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn clear(&mut self) {
        self.write = 0;
        self.len = 0;
    }
}
