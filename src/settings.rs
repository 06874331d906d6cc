//! Limiter configuration surface.
//!
//! Every setting is optional and has a default; a zero, negative, or
//! otherwise unusable value falls back to its default rather than failing
//! anything downstream. Configuration problems must never cost a request.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default sustained rate for the global (per-client) tier, requests/minute.
pub const DEFAULT_GLOBAL_RATE: f64 = 10.0;
/// Default burst for the global tier.
pub const DEFAULT_GLOBAL_BURST: u32 = 10;
/// Default sustained rate for the per-parameter tier, requests/minute.
pub const DEFAULT_PARAM_RATE: f64 = 2.0;
/// Default burst for the per-parameter tier.
pub const DEFAULT_PARAM_BURST: u32 = 2;
/// Default idle time after which a visitor is evicted.
pub const DEFAULT_CLEANUP_TIMEOUT_SECS: u64 = 180;
/// Default pause between sweep passes.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
/// Default name of the rate-limited query parameter.
pub const DEFAULT_PARAM_NAME: &str = "location";

/// Error from strict settings parsing.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings document was not valid JSON for [`LimiterSettings`].
    #[error("invalid limiter settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for both limiter tiers and the sweeper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    /// Sustained global rate, requests per minute per client.
    pub global_rate_per_minute: f64,
    /// Instantaneous burst for the global tier.
    pub global_burst: u32,
    /// Sustained per-parameter rate, requests per minute per (client, param).
    pub param_rate_per_minute: f64,
    /// Instantaneous burst for the per-parameter tier.
    pub param_burst: u32,
    /// Seconds of inactivity after which a visitor is evicted.
    pub cleanup_timeout_secs: u64,
    /// Seconds between sweep passes.
    pub sweep_interval_secs: u64,
    /// Query parameter whose value keys the per-parameter tier.
    pub param_name: String,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            global_rate_per_minute: DEFAULT_GLOBAL_RATE,
            global_burst: DEFAULT_GLOBAL_BURST,
            param_rate_per_minute: DEFAULT_PARAM_RATE,
            param_burst: DEFAULT_PARAM_BURST,
            cleanup_timeout_secs: DEFAULT_CLEANUP_TIMEOUT_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            param_name: DEFAULT_PARAM_NAME.to_owned(),
        }
    }
}

impl LimiterSettings {
    /// Parse settings from JSON, erroring on malformed input. Missing
    /// fields take their defaults; present-but-unusable values are still
    /// normalized away by [`normalized`](Self::normalized).
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str::<Self>(json)?.normalized())
    }

    /// Parse settings from JSON, falling back to the defaults (with a
    /// warning) when the document is malformed.
    pub fn from_json_lossy(json: &str) -> Self {
        match Self::from_json(json) {
            Ok(settings) => settings,
            Err(err) => {
                warn!(target: "turnstile::settings", error = %err, "unparsable limiter settings, using defaults");
                Self::default()
            }
        }
    }

    /// Replace unusable values with their defaults: non-finite or
    /// non-positive rates, zero bursts, zero durations, empty parameter
    /// name.
    pub fn normalized(mut self) -> Self {
        if !self.global_rate_per_minute.is_finite() || self.global_rate_per_minute <= 0.0 {
            self.global_rate_per_minute = DEFAULT_GLOBAL_RATE;
        }
        if self.global_burst == 0 {
            self.global_burst = DEFAULT_GLOBAL_BURST;
        }
        if !self.param_rate_per_minute.is_finite() || self.param_rate_per_minute <= 0.0 {
            self.param_rate_per_minute = DEFAULT_PARAM_RATE;
        }
        if self.param_burst == 0 {
            self.param_burst = DEFAULT_PARAM_BURST;
        }
        if self.cleanup_timeout_secs == 0 {
            self.cleanup_timeout_secs = DEFAULT_CLEANUP_TIMEOUT_SECS;
        }
        if self.sweep_interval_secs == 0 {
            self.sweep_interval_secs = DEFAULT_SWEEP_INTERVAL_SECS;
        }
        if self.param_name.is_empty() {
            self.param_name = DEFAULT_PARAM_NAME.to_owned();
        }
        self
    }

    /// Idle-entry cleanup timeout as a `Duration`.
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }

    /// Sweep cadence as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_table() {
        let s = LimiterSettings::default();
        assert_eq!(s.global_rate_per_minute, 10.0);
        assert_eq!(s.global_burst, 10);
        assert_eq!(s.param_rate_per_minute, 2.0);
        assert_eq!(s.param_burst, 2);
        assert_eq!(s.cleanup_timeout(), Duration::from_secs(180));
        assert_eq!(s.sweep_interval(), Duration::from_secs(60));
        assert_eq!(s.param_name, "location");
    }

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let s = LimiterSettings {
            global_rate_per_minute: 0.0,
            global_burst: 0,
            param_rate_per_minute: -3.0,
            param_burst: 0,
            cleanup_timeout_secs: 0,
            sweep_interval_secs: 0,
            param_name: String::new(),
        }
        .normalized();
        assert_eq!(s, LimiterSettings::default());
    }

    #[test]
    fn nan_rate_falls_back() {
        let s = LimiterSettings { global_rate_per_minute: f64::NAN, ..Default::default() }
            .normalized();
        assert_eq!(s.global_rate_per_minute, DEFAULT_GLOBAL_RATE);
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let s = LimiterSettings::from_json(r#"{"global_rate_per_minute": 30.0}"#).unwrap();
        assert_eq!(s.global_rate_per_minute, 30.0);
        assert_eq!(s.param_burst, DEFAULT_PARAM_BURST);
        assert_eq!(s.param_name, "location");
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(LimiterSettings::from_json("not json").is_err());
    }

    #[test]
    fn from_json_lossy_never_fails() {
        let s = LimiterSettings::from_json_lossy("not json");
        assert_eq!(s, LimiterSettings::default());

        let s = LimiterSettings::from_json_lossy(r#"{"param_name": "city"}"#);
        assert_eq!(s.param_name, "city");
    }

    #[test]
    fn json_round_trip() {
        let s = LimiterSettings { param_name: "city".into(), ..Default::default() };
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(LimiterSettings::from_json(&json).unwrap(), s);
    }
}
