//! Atomic per-channel lifecycle state.

use std::sync::atomic::{AtomicU8, Ordering};

/// Where a channel is in its warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// History not yet full; output is zero.
    NotFull = 0,
    /// Snapshot available, waiting for the first fit; output is zero.
    PendingModel = 1,
    /// Coefficients available; output is phase.
    ModelReady = 2,
}

impl ChannelState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ChannelState::PendingModel,
            2 => ChannelState::ModelReady,
            _ => ChannelState::NotFull,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::NotFull => "not_full",
            ChannelState::PendingModel => "pending_model",
            ChannelState::ModelReady => "model_ready",
        }
    }
}

pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ChannelState::NotFull as u8))
    }

    pub fn load(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ChannelState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// `PendingModel -> ModelReady`. Fails if a reset got there first.
    pub fn promote(&self) -> bool {
        self.0
            .compare_exchange(
                ChannelState::PendingModel as u8,
                ChannelState::ModelReady as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
