//! Persisted configuration as flat key/value attributes.
//!
//! Loading goes through the engine's own setters, so clamping and the
//! stopped-only rules apply exactly as for live edits. Each key is handled
//! independently: absent or malformed values keep the current setting.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::engine::PhaseEngine;

pub const KEY_WINDOW_LENGTH: &str = "window_length";
pub const KEY_PREDICTED_LENGTH: &str = "predicted_length";
pub const KEY_REFIT_INTERVAL: &str = "refit_interval_ms";
pub const KEY_GLITCH_LIMIT: &str = "glitch_limit";
pub const KEY_PROCESS_AUXILIARY: &str = "process_auxiliary";
pub const KEY_LOW_CUT: &str = "low_cut_hz";
pub const KEY_HIGH_CUT: &str = "high_cut_hz";

const CHANNEL_PREFIX: &str = "channel.";
const ENABLED_SUFFIX: &str = ".enabled";

pub type Settings = BTreeMap<String, String>;

fn channel_key(channel: usize) -> String {
    format!("{CHANNEL_PREFIX}{channel}{ENABLED_SUFFIX}")
}

fn parse_channel_key(key: &str) -> Option<usize> {
    key.strip_prefix(CHANNEL_PREFIX)?
        .strip_suffix(ENABLED_SUFFIX)?
        .parse()
        .ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn lookup<T: FromStr>(settings: &Settings, key: &str) -> Option<T> {
    let raw = settings.get(key)?;
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        log::debug!("ignoring malformed setting {}={:?}", key, raw);
    }
    parsed
}

impl PhaseEngine {
    pub fn save_settings(&self) -> Settings {
        let cfg = self.config();
        let mut out = Settings::new();
        out.insert(KEY_WINDOW_LENGTH.into(), cfg.window_length.to_string());
        out.insert(KEY_PREDICTED_LENGTH.into(), cfg.predicted_length.to_string());
        out.insert(KEY_REFIT_INTERVAL.into(), cfg.refit_interval_ms.to_string());
        out.insert(KEY_GLITCH_LIMIT.into(), cfg.glitch_limit.to_string());
        out.insert(KEY_PROCESS_AUXILIARY.into(), cfg.process_auxiliary.to_string());
        out.insert(KEY_LOW_CUT.into(), cfg.low_cut_hz.to_string());
        out.insert(KEY_HIGH_CUT.into(), cfg.high_cut_hz.to_string());
        for channel in 0..self.channel_count() {
            let enabled = self.is_channel_enabled(channel).unwrap_or(true);
            out.insert(channel_key(channel), enabled.to_string());
        }
        out
    }

    /// Apply persisted settings. Window length is applied before predicted
    /// length so the explicit predicted value wins over the kept ratio.
    pub fn load_settings(&mut self, settings: &Settings) {
        if let Some(v) = lookup::<usize>(settings, KEY_WINDOW_LENGTH) {
            if let Err(e) = self.set_window_length(v) {
                log::warn!("skipping {}: {}", KEY_WINDOW_LENGTH, e);
            }
        }
        if let Some(v) = lookup::<usize>(settings, KEY_PREDICTED_LENGTH) {
            if let Err(e) = self.set_predicted_length(v) {
                log::warn!("skipping {}: {}", KEY_PREDICTED_LENGTH, e);
            }
        }
        if let Some(v) = lookup::<f64>(settings, KEY_LOW_CUT) {
            if let Err(e) = self.set_low_cut(v) {
                log::warn!("skipping {}: {}", KEY_LOW_CUT, e);
            }
        }
        if let Some(v) = lookup::<f64>(settings, KEY_HIGH_CUT) {
            if let Err(e) = self.set_high_cut(v) {
                log::warn!("skipping {}: {}", KEY_HIGH_CUT, e);
            }
        }
        if let Some(v) = lookup::<u32>(settings, KEY_REFIT_INTERVAL) {
            self.set_refit_interval(v);
        }
        if let Some(v) = lookup::<usize>(settings, KEY_GLITCH_LIMIT) {
            self.set_glitch_limit(v);
        }
        if let Some(raw) = settings.get(KEY_PROCESS_AUXILIARY) {
            match parse_bool(raw) {
                Some(v) => self.set_process_auxiliary(v),
                None => log::debug!("ignoring malformed setting {}={:?}", KEY_PROCESS_AUXILIARY, raw),
            }
        }

        for (key, raw) in settings.range(CHANNEL_PREFIX.to_string()..) {
            if !key.starts_with(CHANNEL_PREFIX) {
                break;
            }
            let (Some(channel), Some(enabled)) = (parse_channel_key(key), parse_bool(raw)) else {
                log::debug!("ignoring malformed setting {}={:?}", key, raw);
                continue;
            };
            if let Err(e) = self.set_channel_enabled(channel, enabled) {
                log::debug!("skipping {}: {}", key, e);
            }
        }
    }
}
