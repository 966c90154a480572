//! Error types for engine construction and control.
//!
//! The block path never returns these; it degrades to zero output instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("{operation} is only allowed while the engine is stopped")]
    EngineRunning { operation: &'static str },

    #[error("channel {channel} out of range (engine has {count} channels)")]
    ChannelOutOfRange { channel: usize, count: usize },

    #[error("invalid sample rate {rate} on channel {channel}")]
    InvalidSampleRate { channel: usize, rate: f64 },

    #[error("engine needs at least one channel")]
    NoChannels,

    #[error("failed to spawn model fitter thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    #[error("transform failed: {0}")]
    Transform(#[from] realfft::FftError),
}

impl PhaseError {
    /// Short snake_case tag used when the error crosses into the host.
    pub fn tag(&self) -> &'static str {
        match self {
            PhaseError::EngineRunning { .. } => "engine_running",
            PhaseError::ChannelOutOfRange { .. } => "channel_out_of_range",
            PhaseError::InvalidSampleRate { .. } => "invalid_sample_rate",
            PhaseError::NoChannels => "no_channels",
            PhaseError::ThreadSpawn(_) => "thread_spawn_failed",
            PhaseError::Transform(_) => "transform_failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, PhaseError>;
