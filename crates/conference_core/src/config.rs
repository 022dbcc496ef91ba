use std::{env, fs, time::Duration};

use serde::Deserialize;

use crate::identity::{default_ranges, IdentityRange};

/// Engine tuning knobs. Identity ranges are validated separately when the
/// engine context is constructed; everything else has safe defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_id: String,
    pub dedup_window_ms: u64,
    pub sweep_interval_ms: u64,
    pub immediate_retry_delays_ms: Vec<u64>,
    pub max_tracked_attempts: u32,
    pub identity_ranges: Vec<IdentityRange>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            dedup_window_ms: 5_000,
            sweep_interval_ms: 400,
            immediate_retry_delays_ms: vec![0, 100, 500],
            max_tracked_attempts: 5,
            identity_ranges: default_ranges(),
        }
    }
}

impl Settings {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn immediate_retry_delays(&self) -> Vec<Duration> {
        self.immediate_retry_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

/// Layered load: defaults, then an optional `conference.toml` in the working
/// directory, then environment overrides.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("conference.toml") {
        match toml::from_str::<Settings>(&raw) {
            Ok(file_settings) => settings = file_settings,
            Err(err) => {
                tracing::warn!("config: ignoring malformed conference.toml: {err}");
            }
        }
    }

    if let Ok(v) = env::var("CONFERENCE_APP_ID") {
        settings.app_id = v;
    }
    if let Ok(v) = env::var("CONFERENCE_DEDUP_WINDOW_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.dedup_window_ms = parsed;
        }
    }
    if let Ok(v) = env::var("CONFERENCE_SWEEP_INTERVAL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.sweep_interval_ms = parsed;
        }
    }
    if let Ok(v) = env::var("CONFERENCE_MAX_TRACKED_ATTEMPTS") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.max_tracked_attempts = parsed;
        }
    }

    settings
}

#[cfg(test)]
mod tests {
    use shared::domain::Role;

    use super::*;

    #[test]
    fn defaults_match_documented_tuning() {
        let settings = Settings::default();
        assert_eq!(settings.dedup_window(), Duration::from_secs(5));
        assert_eq!(settings.sweep_interval(), Duration::from_millis(400));
        assert_eq!(
            settings.immediate_retry_delays(),
            vec![
                Duration::from_millis(0),
                Duration::from_millis(100),
                Duration::from_millis(500)
            ]
        );
        assert_eq!(settings.max_tracked_attempts, 5);
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_fields() {
        let settings: Settings =
            toml::from_str("app_id = \"demo\"\nsweep_interval_ms = 250\n").expect("parse");
        assert_eq!(settings.app_id, "demo");
        assert_eq!(settings.sweep_interval_ms, 250);
        assert_eq!(settings.dedup_window_ms, 5_000);
        assert_eq!(settings.identity_ranges, default_ranges());
    }

    #[test]
    fn identity_ranges_deserialize_from_toml() {
        let raw = r#"
            [[identity_ranges]]
            role = "video"
            min = 100
            max = 200

            [[identity_ranges]]
            role = "screen-share"
            min = 200
            max = 300
        "#;
        let settings: Settings = toml::from_str(raw).expect("parse");
        assert_eq!(settings.identity_ranges.len(), 2);
        assert_eq!(settings.identity_ranges[0].role, Role::Video);
        assert_eq!(settings.identity_ranges[1].role, Role::ScreenShare);
    }
}
