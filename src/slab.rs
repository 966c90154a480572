//! Handle table for engines owned by the host.
//!
//! A handle packs a slot index (low 32 bits) with the slot's generation
//! (high 32 bits). Freeing a slot bumps its generation, so a stale handle
//! misses instead of reaching the next engine stored there. Each slot has
//! its own lock so blocks for different engines can run concurrently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::engine::PhaseEngine;

const SLOT_BITS: u32 = 32;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;

#[derive(Default)]
struct Slot {
    generation: u32,
    engine: Option<PhaseEngine>,
}

pub struct EngineSlab {
    slots: Vec<Mutex<Slot>>,
    free: Mutex<Vec<usize>>,
    live: AtomicUsize,
}

fn pack(slot: usize, generation: u32) -> u64 {
    (u64::from(generation) << SLOT_BITS) | slot as u64
}

fn unpack(handle: u64) -> (usize, u32) {
    ((handle & SLOT_MASK) as usize, (handle >> SLOT_BITS) as u32)
}

impl EngineSlab {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Mutex::new(Slot::default())).collect(),
            free: Mutex::new((0..capacity).rev().collect()),
            live: AtomicUsize::new(0),
        }
    }

    /// Store an engine and return its handle, or `None` when every slot is taken.
    pub fn insert(&self, engine: PhaseEngine) -> Option<u64> {
        let slot = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()?;

        // Free slots hold no engine, so a poisoned lock has nothing to protect.
        let mut guard = self.slots[slot]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.engine = Some(engine);
        let handle = pack(slot, guard.generation);
        drop(guard);
        self.slots[slot].clear_poison();

        self.live.fetch_add(1, Ordering::Relaxed);
        Some(handle)
    }

    fn lock_live(&self, handle: u64) -> Option<MutexGuard<'_, Slot>> {
        let (slot, generation) = unpack(handle);
        let guard = self.slots.get(slot)?.lock().ok()?;
        (guard.generation == generation && guard.engine.is_some()).then_some(guard)
    }

    /// Run `f` on the engine, holding only that engine's slot lock.
    ///
    /// An engine whose slot was poisoned by a panic is unreachable until
    /// removed.
    pub fn with_mut<F, R>(&self, handle: u64, f: F) -> Option<R>
    where
        F: FnOnce(&mut PhaseEngine) -> R,
    {
        let mut guard = self.lock_live(handle)?;
        guard.engine.as_mut().map(f)
    }

    /// Take the engine out and stop it, joining its fitter thread.
    ///
    /// The slot is free again once this returns, under a new generation.
    pub fn remove(&self, handle: u64) -> Option<PhaseEngine> {
        let (slot, generation) = unpack(handle);
        let cell = self.slots.get(slot)?;

        let mut guard = cell.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.generation != generation {
            return None;
        }
        let mut engine = guard.engine.take()?;
        guard.generation = guard.generation.wrapping_add(1);
        drop(guard);

        if engine.is_running() {
            log::info!("stopping engine {} on removal", handle);
            engine.stop();
        }

        self.live.fetch_sub(1, Ordering::Relaxed);
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(slot);
        Some(engine)
    }

    pub fn count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}
