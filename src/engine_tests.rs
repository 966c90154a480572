//! End-to-end engine scenarios: warm-up, phase tracking, reconfiguration
//! and the per-block reporting paths.

use std::f64::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

use crate::channel::ChannelKind;
use crate::config::EngineConfig;
use crate::engine::{BufferMarker, PhaseEngine};
use crate::error::PhaseError;
use crate::sync::ChannelState;

// ============================================================================
// Helpers
// ============================================================================

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_config() -> EngineConfig {
    EngineConfig {
        window_length: 512,
        predicted_length: 64,
        refit_interval_ms: 2,
        ..EngineConfig::default()
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

fn generate_tone(freq_hz: f64, sample_rate: f64, start: usize, len: usize) -> Vec<f32> {
    (start..start + len)
        .map(|i| (2.0 * PI * freq_hz * i as f64 / sample_rate).sin() as f32)
        .collect()
}

fn wrap(deg: f64) -> f64 {
    (deg + 180.0).rem_euclid(360.0) - 180.0
}

/// Feed a single-channel tone until the channel reaches `ModelReady`.
fn warm_up(engine: &mut PhaseEngine, freq_hz: f64, sample_rate: f64, block: usize) -> usize {
    let mut t = 0;
    while t < engine.history_length() {
        let mut blocks = [generate_tone(freq_hz, sample_rate, t, block)];
        engine.process_block(&mut blocks, &[]);
        t += block;
    }
    assert!(wait_until(Duration::from_secs(10), || {
        engine.channel_state(0) == Some(ChannelState::ModelReady)
    }));
    t
}

// ============================================================================
// Warm-up and state machine
// ============================================================================

#[test]
fn test_impulse_after_silence() {
    init_logger();
    let config = EngineConfig {
        window_length: 8192,
        predicted_length: 1024,
        refit_interval_ms: 5,
        ..EngineConfig::default()
    };
    let mut engine = PhaseEngine::new(config, vec![1000.0]).unwrap();
    engine.start().unwrap();

    for i in 0..8 {
        let mut blocks = [vec![0.0f32; 1024]];
        engine.process_block(&mut blocks, &[ChannelKind::Primary]);
        assert!(blocks[0].iter().all(|&x| x == 0.0));

        let state = engine.channel_state(0).unwrap();
        if (i + 1) * 1024 < engine.history_length() {
            assert_eq!(state, ChannelState::NotFull, "block {i}");
        } else {
            assert_ne!(state, ChannelState::NotFull, "block {i}");
        }
    }

    assert!(wait_until(Duration::from_secs(10), || {
        engine.channel_state(0) == Some(ChannelState::ModelReady)
    }));

    let mut impulse = vec![0.0f32; 1024];
    impulse[0] = 1.0;
    let mut blocks = [impulse];
    engine.process_block(&mut blocks, &[ChannelKind::Primary]);
    assert!(blocks[0].iter().all(|x| x.is_finite()));

    engine.stop();
}

#[test]
fn test_state_only_moves_forward_until_reset() {
    init_logger();
    let mut engine = PhaseEngine::new(small_config(), vec![1000.0]).unwrap();
    engine.start().unwrap();

    let order = |s: ChannelState| s as u8;
    let mut last = ChannelState::NotFull;
    for t in (0..4000).step_by(50) {
        let mut blocks = [generate_tone(6.0, 1000.0, t, 50)];
        engine.process_block(&mut blocks, &[]);
        let state = engine.channel_state(0).unwrap();
        assert!(order(state) >= order(last), "{last:?} -> {state:?}");
        if state == ChannelState::PendingModel || state == ChannelState::ModelReady {
            assert!(t + 50 >= engine.history_length());
        }
        last = state;
    }

    engine.stop();
    assert_eq!(engine.channel_state(0), Some(ChannelState::NotFull));
    assert_eq!(engine.buffered_samples(0), Some(0));
}

#[test]
fn test_fits_accumulate_while_running() {
    init_logger();
    let mut engine = PhaseEngine::new(small_config(), vec![1000.0]).unwrap();
    engine.start().unwrap();
    warm_up(&mut engine, 6.0, 1000.0, 64);

    let fits = engine.model_fits(0).unwrap();
    assert!(wait_until(Duration::from_secs(10), || {
        engine.model_fits(0).unwrap() > fits + 2
    }));
    engine.stop();
}

// ============================================================================
// Phase output
// ============================================================================

#[test]
fn test_tracks_sinusoid_phase() {
    init_logger();
    let fs = 1000.0;
    let freq = 6.0;
    let config = EngineConfig {
        window_length: 4096,
        predicted_length: 512,
        refit_interval_ms: 2,
        ..EngineConfig::default()
    };
    let mut engine = PhaseEngine::new(config, vec![fs]).unwrap();
    engine.start().unwrap();

    let block = 100;
    let mut t = warm_up(&mut engine, freq, fs, block);

    // Let the filter settle and collect phase against the input's own phase.
    let mut offsets = Vec::new();
    for _ in 0..30 {
        let mut blocks = [generate_tone(freq, fs, t, block)];
        engine.process_block(&mut blocks, &[]);
        for (i, &phase) in blocks[0].iter().enumerate() {
            let truth = 360.0 * freq * (t + i) as f64 / fs - 90.0;
            offsets.push(wrap(phase as f64 - truth));
        }
        t += block;
    }

    // The filter adds a constant lag; the spread around it must be small.
    let (s, c) = offsets.iter().fold((0.0, 0.0), |(s, c), d| {
        (s + d.to_radians().sin(), c + d.to_radians().cos())
    });
    let mean = s.atan2(c).to_degrees();
    for d in &offsets {
        let spread = wrap(d - mean).abs();
        assert!(spread < 20.0, "phase offset {d} strays from mean {mean}");
    }

    engine.stop();
}

#[test]
fn test_zero_glitch_limit_keeps_phase_in_range() {
    init_logger();
    let config = EngineConfig {
        glitch_limit: 0,
        ..small_config()
    };
    let mut engine = PhaseEngine::new(config, vec![1000.0]).unwrap();
    engine.start().unwrap();
    let mut t = warm_up(&mut engine, 9.0, 1000.0, 32);

    for _ in 0..50 {
        let mut blocks = [generate_tone(9.0, 1000.0, t, 32)];
        engine.process_block(&mut blocks, &[]);
        for &phase in &blocks[0] {
            assert!(phase > -180.0 && phase <= 180.0, "phase {phase}");
        }
        t += 32;
    }
    engine.stop();
}

// ============================================================================
// Reconfiguration
// ============================================================================

#[test]
fn test_size_changes_require_stop() {
    init_logger();
    let mut engine = PhaseEngine::new(small_config(), vec![1000.0, 1000.0]).unwrap();
    engine.start().unwrap();

    assert!(matches!(
        engine.set_window_length(2048),
        Err(PhaseError::EngineRunning { .. })
    ));
    assert!(matches!(
        engine.set_predicted_length(10),
        Err(PhaseError::EngineRunning { .. })
    ));
    assert!(matches!(
        engine.set_low_cut(1.0),
        Err(PhaseError::EngineRunning { .. })
    ));
    assert!(matches!(
        engine.update_channels(vec![1000.0]),
        Err(PhaseError::EngineRunning { .. })
    ));

    let mut blocks = [vec![0.1f32; 300], vec![0.1f32; 300]];
    engine.process_block(&mut blocks, &[]);
    engine.stop();

    assert_eq!(engine.set_window_length(2048).unwrap(), 2048);
    assert_eq!(engine.config().predicted_length, 256);
    assert_eq!(engine.history_length(), 2048 - 256);
    assert_eq!(engine.set_predicted_length(5000).unwrap(), 2048 - 20);
    assert_eq!(engine.history_length(), 20);
    for chan in 0..2 {
        assert_eq!(engine.buffered_samples(chan), Some(0));
        assert_eq!(engine.channel_state(chan), Some(ChannelState::NotFull));
    }
}

#[test]
fn test_update_channels_keeps_enable_flags() {
    init_logger();
    let mut engine = PhaseEngine::new(small_config(), vec![1000.0, 1000.0]).unwrap();
    engine.set_channel_enabled(1, false).unwrap();

    engine.update_channels(vec![1000.0, 1000.0, 500.0]).unwrap();
    assert_eq!(engine.channel_count(), 3);
    assert_eq!(engine.is_channel_enabled(0), Some(true));
    assert_eq!(engine.is_channel_enabled(1), Some(false));
    assert_eq!(engine.is_channel_enabled(2), Some(true));

    assert!(matches!(
        engine.update_channels(vec![1000.0, f64::NAN]),
        Err(PhaseError::InvalidSampleRate { channel: 1, .. })
    ));
    assert!(matches!(
        engine.update_channels(vec![]),
        Err(PhaseError::NoChannels)
    ));
    assert!(matches!(
        engine.set_channel_enabled(7, true),
        Err(PhaseError::ChannelOutOfRange { channel: 7, count: 3 })
    ));
}

#[test]
fn test_live_setters_while_running() {
    init_logger();
    let mut engine = PhaseEngine::new(small_config(), vec![1000.0]).unwrap();
    engine.start().unwrap();

    assert_eq!(engine.set_refit_interval(0), 1);
    assert_eq!(engine.set_refit_interval(30), 30);
    assert_eq!(engine.set_glitch_limit(12), 12);
    engine.set_process_auxiliary(true);
    assert!(engine.config().process_auxiliary);

    warm_up(&mut engine, 6.0, 1000.0, 64);
    engine.stop();
}

// ============================================================================
// Block handling
// ============================================================================

#[test]
fn test_stopped_engine_passes_through() {
    let mut engine = PhaseEngine::new(small_config(), vec![1000.0]).unwrap();
    let input = generate_tone(6.0, 1000.0, 0, 100);
    let mut blocks = [input.clone()];
    engine.process_block(&mut blocks, &[]);
    assert_eq!(blocks[0], input);
}

#[test]
fn test_overload_reported_once_per_run() {
    init_logger();
    let mut engine = PhaseEngine::new(small_config(), vec![1000.0]).unwrap();
    engine.start().unwrap();

    let mut blocks = [vec![1.0f32; 600]];
    let report = engine.process_block(&mut blocks, &[]);
    let warning = report.overload.expect("overload expected");
    assert_eq!(warning.channel, 0);
    assert_eq!(warning.discarded, 600 - 448);
    assert!(blocks[0][..152].iter().all(|&x| x == 0.0));

    let mut blocks = [vec![1.0f32; 600]];
    assert!(engine.process_block(&mut blocks, &[]).overload.is_none());

    engine.stop();
    engine.start().unwrap();
    let mut blocks = [vec![1.0f32; 600]];
    assert!(engine.process_block(&mut blocks, &[]).overload.is_some());
    engine.stop();
}

#[test]
fn test_disabled_channel_resets_and_passes_through() {
    init_logger();
    let mut engine = PhaseEngine::new(small_config(), vec![1000.0, 1000.0]).unwrap();
    engine.start().unwrap();

    let mut blocks = [vec![0.5f32; 448], vec![0.5f32; 448]];
    engine.process_block(&mut blocks, &[]);
    assert_ne!(engine.channel_state(1), Some(ChannelState::NotFull));

    engine.set_channel_enabled(1, false).unwrap();
    assert_eq!(engine.channel_state(1), Some(ChannelState::NotFull));
    assert_eq!(engine.buffered_samples(1), Some(0));

    let input = generate_tone(6.0, 1000.0, 0, 64);
    let mut blocks = [input.clone(), input.clone()];
    engine.process_block(&mut blocks, &[]);
    assert_eq!(blocks[1], input);
    assert_ne!(blocks[0], input);

    engine.stop();
}

#[test]
fn test_auxiliary_channels_follow_toggle() {
    init_logger();
    let mut engine = PhaseEngine::new(small_config(), vec![1000.0]).unwrap();
    engine.start().unwrap();
    let kinds = [ChannelKind::Auxiliary];

    let input = vec![0.25f32; 64];
    let mut blocks = [input.clone()];
    engine.process_block(&mut blocks, &kinds);
    assert_eq!(blocks[0], input);
    assert_eq!(engine.buffered_samples(0), Some(0));

    engine.set_process_auxiliary(true);
    let mut blocks = [input.clone()];
    engine.process_block(&mut blocks, &kinds);
    assert!(blocks[0].iter().all(|&x| x == 0.0));
    assert_eq!(engine.buffered_samples(0), Some(64));

    engine.stop();
}

#[test]
fn test_extra_block_channels_untouched() {
    init_logger();
    let mut engine = PhaseEngine::new(small_config(), vec![1000.0, 1000.0]).unwrap();
    engine.start().unwrap();

    let extra = vec![3.0f32; 32];
    let mut blocks = [vec![1.0f32; 32], vec![1.0f32; 32], extra.clone()];
    engine.process_block(&mut blocks, &[]);
    assert_eq!(blocks[2], extra);
    assert!(blocks[0].iter().all(|&x| x == 0.0));

    // Fewer channels than configured is fine too.
    let mut blocks = [vec![1.0f32; 32]];
    engine.process_block(&mut blocks, &[]);
    engine.stop();
}

#[test]
fn test_buffer_markers_on_first_eight_channels() {
    init_logger();
    let mut engine = PhaseEngine::new(small_config(), vec![1000.0; 10]).unwrap();
    engine.start().unwrap();

    let mut blocks: Vec<Vec<f32>> = (0..10).map(|_| vec![0.0f32; 100]).collect();
    assert!(engine.process_block(&mut blocks, &[]).markers.is_empty());

    engine.set_mark_buffers(true);
    let report = engine.process_block(&mut blocks, &[]);
    assert_eq!(report.markers.len(), 16);
    assert_eq!(
        report.markers[0],
        BufferMarker {
            channel: 0,
            offset: 0,
            rising: true
        }
    );
    assert_eq!(
        report.markers[1],
        BufferMarker {
            channel: 0,
            offset: 50,
            rising: false
        }
    );
    assert!(report.markers.iter().all(|m| m.channel < 8));
    engine.stop();
}

#[test]
fn test_status_reflects_engine() {
    let mut engine = PhaseEngine::new(small_config(), vec![1000.0, 2000.0]).unwrap();
    engine.set_channel_enabled(0, false).unwrap();
    engine.set_mark_buffers(true);
    let status = engine.status();
    assert!(!status.running);
    assert!(status.mark_buffers);
    assert_eq!(status.sample_rates, vec![1000.0, 2000.0]);
    assert_eq!(status.window_length, 512);
    assert_eq!(status.history_length, 448);
    assert_eq!(status.channels_enabled, vec![false, true]);
    assert_eq!(status.channel_states, vec!["not_full", "not_full"]);
    assert_eq!(status.model_fits, vec![0, 0]);
    assert_eq!(status.buffered_samples, vec![0, 0]);
}
