//! Per-channel pipeline: filter, history, extrapolation, phase.
//!
//! A channel is split in two halves. `ChannelShared` is what the model
//! fitter may touch; `ChannelWorker` is owned by the block path alone.

use crate::analytic::{phase_degrees, AnalyticTransform};
use crate::config::{EngineConfig, MODEL_ORDER};
use crate::filter::BandPassFilter;
use crate::model::extrapolate;
use crate::ring::HistoryRing;
use crate::sync::{ChannelState, CoefficientCell, SnapshotCell, StateCell};
use crate::unwrap::{smooth_block_start, unwrap_glitches};

/// Host-assigned channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelKind {
    #[default]
    Primary,
    Auxiliary,
}

/// State visible to both the block path and the fitter thread.
pub struct ChannelShared {
    pub state: StateCell,
    pub snapshot: SnapshotCell,
    pub coefficients: CoefficientCell,
}

impl ChannelShared {
    pub fn new(history_length: usize) -> Self {
        Self {
            state: StateCell::new(),
            snapshot: SnapshotCell::new(history_length),
            coefficients: CoefficientCell::new(MODEL_ORDER),
        }
    }
}

/// Block-path half of a channel.
pub struct ChannelWorker {
    filter: BandPassFilter,
    ring: HistoryRing,
    transform: AnalyticTransform,
    coefficients: Vec<f64>,
    staging: Vec<f64>,
    history_length: usize,
    last_output: f32,
}

impl ChannelWorker {
    pub fn new(sample_rate: f64, config: &EngineConfig) -> Self {
        let history_length = config.history_length();
        Self {
            filter: BandPassFilter::new(sample_rate, config.low_cut_hz, config.high_cut_hz),
            ring: HistoryRing::new(history_length),
            transform: AnalyticTransform::new(config.window_length),
            coefficients: vec![0.0; MODEL_ORDER],
            staging: vec![0.0; MODEL_ORDER],
            history_length,
            last_output: 0.0,
        }
    }

    pub fn set_band(&mut self, sample_rate: f64, low_cut_hz: f64, high_cut_hz: f64) {
        self.filter.set_band(sample_rate, low_cut_hz, high_cut_hz);
    }

    /// Replace `block` with phase in degrees (or zeros while warming up).
    ///
    /// Returns how many leading samples were zeroed because the block is
    /// longer than the history.
    pub fn process(
        &mut self,
        shared: &ChannelShared,
        block: &mut [f32],
        glitch_limit: usize,
    ) -> usize {
        let n = block.len();
        if n == 0 {
            return 0;
        }

        self.filter.process(block);

        let h = self.history_length;
        let start = n.saturating_sub(h);
        block[..start].fill(0.0);
        self.ring.push(&block[start..]);

        let state = shared.state.load();
        if state != ChannelState::NotFull || self.ring.is_full() {
            let window = self.transform.window_mut();
            self.ring.copy_into(&mut window[..h]);
            let published = shared.snapshot.try_publish(&window[..h]);
            if state == ChannelState::NotFull && published {
                shared.state.store(ChannelState::PendingModel);
            }
        }

        let fresh = &mut block[start..];
        if shared.state.load() == ChannelState::ModelReady {
            self.emit_phase(shared, fresh, glitch_limit);
        } else {
            fresh.fill(0.0);
        }

        self.last_output = block[n - 1];
        start
    }

    fn emit_phase(&mut self, shared: &ChannelShared, fresh: &mut [f32], glitch_limit: usize) {
        if shared.coefficients.load_into(&mut self.staging) {
            std::mem::swap(&mut self.coefficients, &mut self.staging);
        }

        let h = self.history_length;
        extrapolate(&self.coefficients, self.transform.window_mut(), h);

        if let Err(e) = self.transform.run() {
            log::error!("analytic transform failed: {}", e);
            fresh.fill(0.0);
            return;
        }

        let analytic = &self.transform.analytic()[h - fresh.len()..h];
        for (out, &c) in fresh.iter_mut().zip(analytic) {
            *out = phase_degrees(c);
        }

        unwrap_glitches(fresh, self.last_output, glitch_limit);
        smooth_block_start(fresh, self.last_output, glitch_limit);
    }

    /// Back to `NotFull` with an empty history.
    pub fn reset(&mut self, shared: &ChannelShared) {
        self.ring.clear();
        self.last_output = 0.0;
        shared.state.store(ChannelState::NotFull);
    }

    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    #[cfg(test)]
    pub(crate) fn last_output(&self) -> f32 {
        self.last_output
    }
}
