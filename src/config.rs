//! Engine configuration and clamping rules.
//!
//! Every setter on the engine funnels user input through the helpers here,
//! so invalid values are clamped or ignored rather than rejected.

use rustler::NifStruct;

/// Fixed AR model order.
pub const MODEL_ORDER: usize = 20;

pub const MIN_WINDOW_POW: u32 = 9;
pub const MAX_WINDOW_POW: u32 = 16;
pub const DEFAULT_WINDOW_POW: u32 = 13;
pub const DEFAULT_PREDICTED_POW: u32 = 10;

pub const MIN_WINDOW_LENGTH: usize = 1 << MIN_WINDOW_POW;
pub const MAX_WINDOW_LENGTH: usize = 1 << MAX_WINDOW_POW;

pub const DEFAULT_REFIT_INTERVAL_MS: u32 = 50;
pub const MIN_REFIT_INTERVAL_MS: u32 = 1;
pub const MAX_REFIT_INTERVAL_MS: u32 = 600_000;

pub const DEFAULT_GLITCH_LIMIT: usize = 200;
pub const MAX_GLITCH_LIMIT: usize = 1 << 20;

pub const DEFAULT_LOW_CUT_HZ: f64 = 4.0;
pub const DEFAULT_HIGH_CUT_HZ: f64 = 8.0;
pub const MIN_CUT_HZ: f64 = 0.01;
pub const MAX_CUT_HZ: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Total transform length (history + predicted)
    pub window_length: usize,
    /// Samples extrapolated by the AR model each block
    pub predicted_length: usize,
    pub refit_interval_ms: u32,
    /// Max run length eligible for unwrap/smooth; 0 disables both
    pub glitch_limit: usize,
    pub process_auxiliary: bool,
    pub low_cut_hz: f64,
    pub high_cut_hz: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_length: 1 << DEFAULT_WINDOW_POW,
            predicted_length: 1 << DEFAULT_PREDICTED_POW,
            refit_interval_ms: DEFAULT_REFIT_INTERVAL_MS,
            glitch_limit: DEFAULT_GLITCH_LIMIT,
            process_auxiliary: false,
            low_cut_hz: DEFAULT_LOW_CUT_HZ,
            high_cut_hz: DEFAULT_HIGH_CUT_HZ,
        }
    }
}

impl EngineConfig {
    /// Samples of real data in each transform window.
    pub fn history_length(&self) -> usize {
        self.window_length - self.predicted_length
    }

    /// Fraction of the window that is extrapolated.
    pub fn predicted_ratio(&self) -> f64 {
        self.predicted_length as f64 / self.window_length as f64
    }

    /// Returns a copy with every field forced into its valid range.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let window_length = clamp_window_length(self.window_length);
        Self {
            window_length,
            predicted_length: clamp_predicted_length(self.predicted_length, window_length),
            refit_interval_ms: clamp_refit_interval(self.refit_interval_ms),
            glitch_limit: clamp_glitch_limit(self.glitch_limit),
            process_auxiliary: self.process_auxiliary,
            low_cut_hz: clamp_cutoff(self.low_cut_hz).unwrap_or(defaults.low_cut_hz),
            high_cut_hz: clamp_cutoff(self.high_cut_hz).unwrap_or(defaults.high_cut_hz),
        }
    }
}

/// Engine parameters from Elixir
#[derive(NifStruct, Debug, Clone)]
#[module = "PhaseCalculator.Native.EngineParams"]
pub struct EngineParams {
    pub sample_rate: f64,
    pub num_channels: u32,
    pub window_length: u32,
    pub predicted_length: u32,
    pub refit_interval_ms: u32,
    pub glitch_limit: u32,
    pub low_cut_hz: f64,
    pub high_cut_hz: f64,
    pub process_auxiliary: bool,
}

impl From<&EngineParams> for EngineConfig {
    fn from(params: &EngineParams) -> Self {
        EngineConfig {
            window_length: params.window_length as usize,
            predicted_length: params.predicted_length as usize,
            refit_interval_ms: params.refit_interval_ms,
            glitch_limit: params.glitch_limit as usize,
            process_auxiliary: params.process_auxiliary,
            low_cut_hz: params.low_cut_hz,
            high_cut_hz: params.high_cut_hz,
        }
        .sanitized()
    }
}

/// Clamp to the supported range and round up to a power of two.
pub fn clamp_window_length(len: usize) -> usize {
    len.clamp(MIN_WINDOW_LENGTH, MAX_WINDOW_LENGTH).next_power_of_two()
}

/// Predicted samples must leave at least `MODEL_ORDER` samples of history.
pub fn clamp_predicted_length(predicted: usize, window_length: usize) -> usize {
    predicted.min(window_length - MODEL_ORDER)
}

pub fn clamp_refit_interval(ms: u32) -> u32 {
    ms.clamp(MIN_REFIT_INTERVAL_MS, MAX_REFIT_INTERVAL_MS)
}

pub fn clamp_glitch_limit(limit: usize) -> usize {
    limit.min(MAX_GLITCH_LIMIT)
}

/// `None` for non-finite input, so the caller keeps its previous value.
pub fn clamp_cutoff(hz: f64) -> Option<f64> {
    if hz.is_finite() {
        Some(hz.clamp(MIN_CUT_HZ, MAX_CUT_HZ))
    } else {
        None
    }
}

/// Predicted length for a new window that keeps the previous fraction.
pub fn rescale_predicted(ratio: f64, new_window: usize) -> usize {
    let scaled = (ratio * new_window as f64).round().max(0.0) as usize;
    clamp_predicted_length(scaled, new_window)
}
