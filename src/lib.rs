//! Phase Calculator NIF
//!
//! Real-time instantaneous phase of band-limited multichannel signals.
//! Each channel is band-pass filtered, its recent history is extended with
//! an autoregressive prediction, and the phase of the newest samples is read
//! off the analytic signal of that window. AR models are refitted on a
//! background thread so the block path never waits.

pub mod analytic;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod fitter;
pub mod model;
pub mod ring;
pub mod settings;
pub mod slab;
pub mod sync;
pub mod unwrap;

#[cfg(test)]
mod engine_tests;

pub use channel::ChannelKind;
pub use config::{EngineConfig, EngineParams, MODEL_ORDER};
pub use engine::{BlockReport, BufferMarker, EngineStatus, OverloadWarning, PhaseEngine};
pub use error::{PhaseError, Result};
pub use sync::ChannelState;

use rustler::{Binary, Env, NifResult, OwnedBinary};

use slab::EngineSlab;

lazy_static::lazy_static! {
    static ref ENGINES: EngineSlab = EngineSlab::new(256);
}

mod atoms {
    rustler::atoms! {
        ok,
        not_full,
        pending_model,
        model_ready,
    }
}

rustler::init!("Elixir.PhaseCalculator.Native");

fn term_error(reason: &'static str) -> rustler::Error {
    rustler::Error::Term(Box::new(reason))
}

fn engine_error(e: PhaseError) -> rustler::Error {
    log::debug!("engine call failed: {}", e);
    term_error(e.tag())
}

fn with_engine<R>(engine_id: u64, f: impl FnOnce(&mut PhaseEngine) -> R) -> NifResult<R> {
    ENGINES
        .with_mut(engine_id, f)
        .ok_or_else(|| term_error("engine_not_found"))
}

/// Native-endian f32 samples from a binary's bytes.
fn decode_samples(bytes: &[u8]) -> NifResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(term_error("invalid_sample_size"));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn channel_kinds(auxiliary: &[bool]) -> Vec<ChannelKind> {
    auxiliary
        .iter()
        .map(|&aux| {
            if aux {
                ChannelKind::Auxiliary
            } else {
                ChannelKind::Primary
            }
        })
        .collect()
}

fn encode_samples<'a>(env: Env<'a>, samples: &[f32]) -> NifResult<Binary<'a>> {
    let mut owned =
        OwnedBinary::new(samples.len() * 4).ok_or_else(|| term_error("binary_alloc_failed"))?;
    for (dst, sample) in owned.as_mut_slice().chunks_exact_mut(4).zip(samples) {
        dst.copy_from_slice(&sample.to_ne_bytes());
    }
    Ok(owned.release(env))
}

/// Creates a stopped engine and returns its handle.
#[rustler::nif]
fn create_engine(params: EngineParams) -> NifResult<(rustler::Atom, u64)> {
    let rates = vec![params.sample_rate; params.num_channels as usize];
    let engine = PhaseEngine::new(EngineConfig::from(&params), rates).map_err(engine_error)?;

    match ENGINES.insert(engine) {
        Some(id) => Ok((atoms::ok(), id)),
        None => Err(term_error("slab_full")),
    }
}

/// Stops the engine (if running) and frees its slot.
#[rustler::nif]
fn destroy_engine(engine_id: u64) -> NifResult<rustler::Atom> {
    ENGINES
        .remove(engine_id)
        .ok_or_else(|| term_error("engine_not_found"))?;
    Ok(atoms::ok())
}

#[rustler::nif]
fn start_engine(engine_id: u64) -> NifResult<rustler::Atom> {
    with_engine(engine_id, |engine| engine.start())?.map_err(engine_error)?;
    Ok(atoms::ok())
}

#[rustler::nif]
fn stop_engine(engine_id: u64) -> NifResult<rustler::Atom> {
    with_engine(engine_id, |engine| engine.stop())?;
    Ok(atoms::ok())
}

/// Processes one block: one binary per channel, plus an auxiliary flag per
/// channel. Returns binaries of the same lengths holding phase in degrees,
/// and the block report (overload warning, buffer markers).
#[rustler::nif]
fn process_block<'a>(
    env: Env<'a>,
    engine_id: u64,
    channels: Vec<Binary<'a>>,
    auxiliary: Vec<bool>,
) -> NifResult<(rustler::Atom, Vec<Binary<'a>>, BlockReport)> {
    let mut blocks = channels
        .iter()
        .map(|binary| decode_samples(binary.as_slice()))
        .collect::<NifResult<Vec<Vec<f32>>>>()?;
    let kinds = channel_kinds(&auxiliary);

    let report = with_engine(engine_id, |engine| engine.process_block(&mut blocks, &kinds))?;

    let output = blocks
        .iter()
        .map(|block| encode_samples(env, block))
        .collect::<NifResult<Vec<Binary<'a>>>>()?;
    Ok((atoms::ok(), output, report))
}

// ============================================================================
// Stopped-only configuration
// ============================================================================

/// Returns the applied (clamped, power-of-two) window length.
#[rustler::nif]
fn set_window_length(engine_id: u64, length: u32) -> NifResult<(rustler::Atom, u32)> {
    let applied = with_engine(engine_id, |engine| engine.set_window_length(length as usize))?
        .map_err(engine_error)?;
    Ok((atoms::ok(), applied as u32))
}

#[rustler::nif]
fn set_predicted_length(engine_id: u64, length: u32) -> NifResult<(rustler::Atom, u32)> {
    let applied = with_engine(engine_id, |engine| {
        engine.set_predicted_length(length as usize)
    })?
    .map_err(engine_error)?;
    Ok((atoms::ok(), applied as u32))
}

#[rustler::nif]
fn set_low_cut(engine_id: u64, hz: f64) -> NifResult<(rustler::Atom, f64)> {
    let applied = with_engine(engine_id, |engine| engine.set_low_cut(hz))?.map_err(engine_error)?;
    Ok((atoms::ok(), applied))
}

#[rustler::nif]
fn set_high_cut(engine_id: u64, hz: f64) -> NifResult<(rustler::Atom, f64)> {
    let applied =
        with_engine(engine_id, |engine| engine.set_high_cut(hz))?.map_err(engine_error)?;
    Ok((atoms::ok(), applied))
}

/// Replaces the channel layout, one sample rate per channel.
#[rustler::nif]
fn update_channels(engine_id: u64, sample_rates: Vec<f64>) -> NifResult<rustler::Atom> {
    with_engine(engine_id, |engine| engine.update_channels(sample_rates))?
        .map_err(engine_error)?;
    Ok(atoms::ok())
}

// ============================================================================
// Live configuration
// ============================================================================

#[rustler::nif]
fn set_channel_enabled(engine_id: u64, channel: u32, enabled: bool) -> NifResult<rustler::Atom> {
    with_engine(engine_id, |engine| {
        engine.set_channel_enabled(channel as usize, enabled)
    })?
    .map_err(engine_error)?;
    Ok(atoms::ok())
}

#[rustler::nif]
fn set_refit_interval(engine_id: u64, ms: u32) -> NifResult<(rustler::Atom, u32)> {
    let applied = with_engine(engine_id, |engine| engine.set_refit_interval(ms))?;
    Ok((atoms::ok(), applied))
}

#[rustler::nif]
fn set_glitch_limit(engine_id: u64, limit: u32) -> NifResult<(rustler::Atom, u64)> {
    let applied = with_engine(engine_id, |engine| engine.set_glitch_limit(limit as usize))?;
    Ok((atoms::ok(), applied as u64))
}

#[rustler::nif]
fn set_process_auxiliary(engine_id: u64, process: bool) -> NifResult<rustler::Atom> {
    with_engine(engine_id, |engine| engine.set_process_auxiliary(process))?;
    Ok(atoms::ok())
}

/// Debug markers show up in the report of each later `process_block`.
#[rustler::nif]
fn set_mark_buffers(engine_id: u64, mark: bool) -> NifResult<rustler::Atom> {
    with_engine(engine_id, |engine| engine.set_mark_buffers(mark))?;
    Ok(atoms::ok())
}

/// Returns the persisted configuration as `{key, value}` string pairs.
#[rustler::nif]
fn save_settings(engine_id: u64) -> NifResult<(rustler::Atom, Vec<(String, String)>)> {
    let settings = with_engine(engine_id, |engine| engine.save_settings())?;
    Ok((atoms::ok(), settings.into_iter().collect()))
}

#[rustler::nif]
fn load_settings(engine_id: u64, pairs: Vec<(String, String)>) -> NifResult<rustler::Atom> {
    let settings: settings::Settings = pairs.into_iter().collect();
    with_engine(engine_id, |engine| engine.load_settings(&settings))?;
    Ok(atoms::ok())
}

// ============================================================================
// Queries
// ============================================================================

/// Fraction of the window filled by AR prediction.
#[rustler::nif]
fn predicted_ratio(engine_id: u64) -> NifResult<(rustler::Atom, f64)> {
    let ratio = with_engine(engine_id, |engine| engine.predicted_ratio())?;
    Ok((atoms::ok(), ratio))
}

#[rustler::nif]
fn channel_state(engine_id: u64, channel: u32) -> NifResult<(rustler::Atom, rustler::Atom)> {
    let state = with_engine(engine_id, |engine| engine.channel_state(channel as usize))?
        .ok_or_else(|| term_error("channel_out_of_range"))?;

    let atom = match state {
        ChannelState::NotFull => atoms::not_full(),
        ChannelState::PendingModel => atoms::pending_model(),
        ChannelState::ModelReady => atoms::model_ready(),
    };
    Ok((atoms::ok(), atom))
}

/// Gets configuration and per-channel progress for telemetry.
#[rustler::nif]
fn get_state(engine_id: u64) -> NifResult<(rustler::Atom, EngineStatus)> {
    let status = with_engine(engine_id, |engine| engine.status())?;
    Ok((atoms::ok(), status))
}

/// Returns the number of live engines.
#[rustler::nif]
fn engine_count() -> NifResult<u64> {
    Ok(ENGINES.count() as u64)
}
