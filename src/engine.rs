//! Multi-channel phase engine.
//!
//! Owns the per-channel workers, the shared cells and the fitter thread.
//! Size-changing configuration is only accepted while stopped.

use rustler::NifStruct;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::{ChannelKind, ChannelShared, ChannelWorker};
use crate::config::{self, EngineConfig};
use crate::error::{PhaseError, Result};
use crate::fitter::ModelFitter;
use crate::sync::ChannelState;

/// Channels below this index get buffer markers when marking is on.
pub const MARKED_CHANNELS: usize = 8;

/// Block longer than the history; reported once per run.
#[derive(NifStruct, Debug, Clone, Copy, PartialEq, Eq)]
#[module = "PhaseCalculator.Native.OverloadWarning"]
pub struct OverloadWarning {
    pub channel: u32,
    pub discarded: u64,
}

/// Debug marker at a sample offset within a processed block.
#[derive(NifStruct, Debug, Clone, Copy, PartialEq, Eq)]
#[module = "PhaseCalculator.Native.BufferMarker"]
pub struct BufferMarker {
    pub channel: u32,
    pub offset: u64,
    pub rising: bool,
}

/// Out-of-band results of one `process_block` call.
#[derive(NifStruct, Debug, Default, Clone, PartialEq, Eq)]
#[module = "PhaseCalculator.Native.BlockReport"]
pub struct BlockReport {
    pub overload: Option<OverloadWarning>,
    pub markers: Vec<BufferMarker>,
}

/// Engine state for telemetry
#[derive(NifStruct, Debug, Clone)]
#[module = "PhaseCalculator.Native.EngineStatus"]
pub struct EngineStatus {
    pub running: bool,
    pub window_length: u64,
    pub predicted_length: u64,
    pub history_length: u64,
    pub refit_interval_ms: u32,
    pub glitch_limit: u64,
    pub low_cut_hz: f64,
    pub high_cut_hz: f64,
    pub process_auxiliary: bool,
    pub mark_buffers: bool,
    pub sample_rates: Vec<f64>,
    pub channels_enabled: Vec<bool>,
    pub channel_states: Vec<String>,
    pub model_fits: Vec<u64>,
    pub buffered_samples: Vec<u64>,
}

pub struct PhaseEngine {
    config: EngineConfig,
    sample_rates: Vec<f64>,
    enabled: Vec<bool>,
    shared: Arc<[ChannelShared]>,
    workers: Vec<ChannelWorker>,
    fitter: Option<ModelFitter>,
    overload_reported: bool,
    mismatch_reported: bool,
    mark_buffers: bool,
}

impl PhaseEngine {
    pub fn new(config: EngineConfig, sample_rates: Vec<f64>) -> Result<Self> {
        validate_rates(&sample_rates)?;
        let mut engine = Self {
            config: config.sanitized(),
            enabled: vec![true; sample_rates.len()],
            sample_rates,
            shared: Arc::from(Vec::new()),
            workers: Vec::new(),
            fitter: None,
            overload_reported: false,
            mismatch_reported: false,
            mark_buffers: false,
        };
        engine.reinitialize();
        Ok(engine)
    }

    fn reinitialize(&mut self) {
        let history = self.config.history_length();
        self.shared = self
            .sample_rates
            .iter()
            .map(|_| ChannelShared::new(history))
            .collect();
        self.workers = self
            .sample_rates
            .iter()
            .map(|&rate| ChannelWorker::new(rate, &self.config))
            .collect();
        log::info!(
            "phase engine sized for {} channels (window {}, predicted {})",
            self.sample_rates.len(),
            self.config.window_length,
            self.config.predicted_length
        );
    }

    fn ensure_stopped(&self, operation: &'static str) -> Result<()> {
        if self.is_running() {
            Err(PhaseError::EngineRunning { operation })
        } else {
            Ok(())
        }
    }

    /// Change channel layout. Existing enable flags are kept and new
    /// channels start enabled. A no-op if nothing changed.
    pub fn update_channels(&mut self, sample_rates: Vec<f64>) -> Result<()> {
        self.ensure_stopped("update_channels")?;
        validate_rates(&sample_rates)?;
        if sample_rates == self.sample_rates {
            return Ok(());
        }
        self.enabled.resize(sample_rates.len(), true);
        self.sample_rates = sample_rates;
        self.reinitialize();
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let fitter = ModelFitter::spawn(
            Arc::clone(&self.shared),
            self.config.history_length(),
            self.refit_interval(),
        )?;
        self.fitter = Some(fitter);
        log::info!("phase engine started");
        Ok(())
    }

    /// Join the fitter, then reset every channel.
    pub fn stop(&mut self) {
        let Some(fitter) = self.fitter.take() else {
            return;
        };
        fitter.shutdown();
        for (worker, shared) in self.workers.iter_mut().zip(self.shared.iter()) {
            worker.reset(shared);
        }
        self.overload_reported = false;
        self.mismatch_reported = false;
        log::info!("phase engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.fitter.is_some()
    }

    // ========================================================================
    // Block processing
    // ========================================================================

    /// Replace each channel's samples with phase in degrees.
    ///
    /// `kinds[i]` tags channel `i`; missing tags count as primary. Disabled
    /// channels, auxiliary channels (unless enabled), and every channel while
    /// stopped pass through untouched.
    pub fn process_block<B: AsMut<[f32]>>(
        &mut self,
        channels: &mut [B],
        kinds: &[ChannelKind],
    ) -> BlockReport {
        let mut report = BlockReport::default();
        if !self.is_running() {
            return report;
        }

        if channels.len() != self.workers.len() && !self.mismatch_reported {
            log::warn!(
                "block has {} channels, engine configured for {}",
                channels.len(),
                self.workers.len()
            );
            self.mismatch_reported = true;
        }

        let count = channels.len().min(self.workers.len());
        for chan in 0..count {
            let shared = &self.shared[chan];
            let worker = &mut self.workers[chan];
            let kind = kinds.get(chan).copied().unwrap_or_default();
            let active = self.enabled[chan]
                && (kind == ChannelKind::Primary || self.config.process_auxiliary);

            if !active {
                if shared.state.load() != ChannelState::NotFull || worker.buffered() > 0 {
                    worker.reset(shared);
                }
                continue;
            }

            let block = channels[chan].as_mut();
            let discarded = worker.process(shared, block, self.config.glitch_limit);

            if discarded > 0 && !self.overload_reported {
                log::warn!(
                    "block of {} samples exceeds history of {}; {} oldest samples output as zero",
                    block.len(),
                    self.config.history_length(),
                    discarded
                );
                self.overload_reported = true;
                report.overload = Some(OverloadWarning {
                    channel: chan as u32,
                    discarded: discarded as u64,
                });
            }

            if self.mark_buffers && chan < MARKED_CHANNELS && !block.is_empty() {
                report.markers.push(BufferMarker {
                    channel: chan as u32,
                    offset: 0,
                    rising: true,
                });
                report.markers.push(BufferMarker {
                    channel: chan as u32,
                    offset: (block.len() / 2) as u64,
                    rising: false,
                });
            }
        }

        report
    }

    // ========================================================================
    // Stopped-only setters
    // ========================================================================

    /// Returns the applied window length. The predicted fraction is kept.
    pub fn set_window_length(&mut self, window_length: usize) -> Result<usize> {
        self.ensure_stopped("set_window_length")?;
        let window = config::clamp_window_length(window_length);
        if window != window_length {
            log::debug!("window length {} clamped to {}", window_length, window);
        }
        if window != self.config.window_length {
            let predicted = config::rescale_predicted(self.config.predicted_ratio(), window);
            self.config.window_length = window;
            self.config.predicted_length = predicted;
            self.reinitialize();
        }
        Ok(window)
    }

    /// Returns the applied predicted length.
    pub fn set_predicted_length(&mut self, predicted_length: usize) -> Result<usize> {
        self.ensure_stopped("set_predicted_length")?;
        let predicted = config::clamp_predicted_length(predicted_length, self.config.window_length);
        if predicted != predicted_length {
            log::debug!("predicted length {} clamped to {}", predicted_length, predicted);
        }
        if predicted != self.config.predicted_length {
            self.config.predicted_length = predicted;
            self.reinitialize();
        }
        Ok(predicted)
    }

    pub fn set_low_cut(&mut self, hz: f64) -> Result<f64> {
        self.ensure_stopped("set_low_cut")?;
        if let Some(hz) = config::clamp_cutoff(hz) {
            self.config.low_cut_hz = hz;
            self.retune_filters();
        }
        Ok(self.config.low_cut_hz)
    }

    pub fn set_high_cut(&mut self, hz: f64) -> Result<f64> {
        self.ensure_stopped("set_high_cut")?;
        if let Some(hz) = config::clamp_cutoff(hz) {
            self.config.high_cut_hz = hz;
            self.retune_filters();
        }
        Ok(self.config.high_cut_hz)
    }

    fn retune_filters(&mut self) {
        for (worker, &rate) in self.workers.iter_mut().zip(&self.sample_rates) {
            worker.set_band(rate, self.config.low_cut_hz, self.config.high_cut_hz);
        }
    }

    // ========================================================================
    // Live setters
    // ========================================================================

    pub fn set_refit_interval(&mut self, ms: u32) -> u32 {
        self.config.refit_interval_ms = config::clamp_refit_interval(ms);
        if let Some(fitter) = &self.fitter {
            fitter.set_interval(self.refit_interval());
        }
        self.config.refit_interval_ms
    }

    pub fn set_glitch_limit(&mut self, limit: usize) -> usize {
        self.config.glitch_limit = config::clamp_glitch_limit(limit);
        self.config.glitch_limit
    }

    /// Disabling a channel resets it.
    pub fn set_channel_enabled(&mut self, channel: usize, enabled: bool) -> Result<()> {
        let count = self.enabled.len();
        let flag = self
            .enabled
            .get_mut(channel)
            .ok_or(PhaseError::ChannelOutOfRange { channel, count })?;
        *flag = enabled;
        if !enabled {
            self.workers[channel].reset(&self.shared[channel]);
        }
        Ok(())
    }

    pub fn set_process_auxiliary(&mut self, process: bool) {
        self.config.process_auxiliary = process;
    }

    pub fn set_mark_buffers(&mut self, mark: bool) {
        self.mark_buffers = mark;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history_length(&self) -> usize {
        self.config.history_length()
    }

    pub fn predicted_ratio(&self) -> f64 {
        self.config.predicted_ratio()
    }

    pub fn refit_interval(&self) -> Duration {
        Duration::from_millis(self.config.refit_interval_ms as u64)
    }

    pub fn channel_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_channel_enabled(&self, channel: usize) -> Option<bool> {
        self.enabled.get(channel).copied()
    }

    pub fn channel_state(&self, channel: usize) -> Option<ChannelState> {
        self.shared.get(channel).map(|s| s.state.load())
    }

    /// Completed fits for a channel since the engine was last resized.
    pub fn model_fits(&self, channel: usize) -> Option<u64> {
        self.shared.get(channel).map(|s| s.coefficients.publish_count())
    }

    pub fn buffered_samples(&self, channel: usize) -> Option<usize> {
        self.workers.get(channel).map(|w| w.buffered())
    }

    pub fn status(&self) -> EngineStatus {
        let channels = self.channel_count();
        EngineStatus {
            running: self.is_running(),
            window_length: self.config.window_length as u64,
            predicted_length: self.config.predicted_length as u64,
            history_length: self.config.history_length() as u64,
            refit_interval_ms: self.config.refit_interval_ms,
            glitch_limit: self.config.glitch_limit as u64,
            low_cut_hz: self.config.low_cut_hz,
            high_cut_hz: self.config.high_cut_hz,
            process_auxiliary: self.config.process_auxiliary,
            mark_buffers: self.mark_buffers,
            sample_rates: self.sample_rates.clone(),
            channels_enabled: self.enabled.clone(),
            channel_states: (0..channels)
                .filter_map(|c| self.channel_state(c))
                .map(|state| state.as_str().to_string())
                .collect(),
            model_fits: (0..channels).filter_map(|c| self.model_fits(c)).collect(),
            buffered_samples: (0..channels)
                .filter_map(|c| self.buffered_samples(c))
                .map(|n| n as u64)
                .collect(),
        }
    }
}

fn validate_rates(sample_rates: &[f64]) -> Result<()> {
    if sample_rates.is_empty() {
        return Err(PhaseError::NoChannels);
    }
    for (channel, &rate) in sample_rates.iter().enumerate() {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(PhaseError::InvalidSampleRate { channel, rate });
        }
    }
    Ok(())
}
