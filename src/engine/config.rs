// ── Bridge Engine: Configuration ───────────────────────────────────────────
// Operator-facing knobs, loaded from an optional TOML file with env-var
// overrides for the deploy-time values. Every field has a working default;
// an absent config file is not an error, a malformed one is.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::atoms::constants::*;
use crate::atoms::error::{BridgeError, BridgeResult};

// ── Sections ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub initial_ms: u64,
    pub cap_ms: u64,
    pub give_up_after: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        ReconnectSection {
            initial_ms: RECONNECT_INITIAL_MS,
            cap_ms: RECONNECT_CAP_MS,
            give_up_after: RECONNECT_GIVE_UP_AFTER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Account age in weeks; selects the rate-limit tier.
    pub account_age_weeks: u32,
    /// Presence cycler active window, local wall-clock hours [start, end).
    pub active_hours_start: u32,
    pub active_hours_end: u32,
    /// Base for the small presence delays around a send.
    pub message_delay_base_ms: u64,
    /// Floor for the simulated typing duration.
    pub typing_delay_base_ms: u64,
    /// Parallel sends admitted across distinct jids.
    pub send_concurrency: usize,
    pub reconnect: ReconnectSection,
    /// State directory override; platform data dir when unset.
    pub state_dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            account_age_weeks: 1,
            active_hours_start: 8,
            active_hours_end: 22,
            message_delay_base_ms: DEFAULT_MESSAGE_DELAY_BASE_MS,
            typing_delay_base_ms: TYPING_MIN_MS,
            send_concurrency: DEFAULT_SEND_CONCURRENCY,
            reconnect: ReconnectSection::default(),
            state_dir: None,
        }
    }
}

impl BridgeConfig {
    /// Load from `WABRIDGE_CONFIG` (default `wabridge.toml`), then apply env
    /// overrides. A missing file yields defaults.
    pub fn load() -> BridgeResult<BridgeConfig> {
        let path =
            std::env::var("WABRIDGE_CONFIG").unwrap_or_else(|_| "wabridge.toml".to_string());
        let mut config = Self::from_file(Path::new(&path))?;

        if let Ok(dir) = std::env::var("WABRIDGE_STATE_DIR") {
            config.state_dir = Some(PathBuf::from(dir));
        }
        if let Ok(weeks) = std::env::var("WABRIDGE_ACCOUNT_AGE_WEEKS") {
            config.account_age_weeks = weeks
                .parse()
                .map_err(|_| BridgeError::Config(format!("bad WABRIDGE_ACCOUNT_AGE_WEEKS: {}", weeks)))?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> BridgeResult<BridgeConfig> {
        if !path.exists() {
            info!("[config] no config file at {} — using defaults", path.display());
            return Ok(BridgeConfig::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&raw)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.active_hours_start >= 24 || self.active_hours_end > 24 {
            return Err(BridgeError::Config(format!(
                "active hours {}..{} out of range",
                self.active_hours_start, self.active_hours_end
            )));
        }
        if self.send_concurrency == 0 {
            return Err(BridgeError::Config("send_concurrency must be at least 1".into()));
        }
        if self.reconnect.initial_ms == 0 || self.reconnect.cap_ms < self.reconnect.initial_ms {
            return Err(BridgeError::Config("reconnect delays misconfigured".into()));
        }
        Ok(())
    }

    /// Is `hour` inside the active window? Handles windows that wrap
    /// midnight (e.g. 22..6).
    pub fn in_active_hours(&self, hour: u32) -> bool {
        let (start, end) = (self.active_hours_start, self.active_hours_end);
        if start == end {
            return true;
        }
        if start < end {
            (start..end).contains(&hour)
        } else {
            hour >= start || hour < end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.send_concurrency, 4);
        assert_eq!(config.account_age_weeks, 1);
    }

    #[test]
    fn test_parse_partial_toml() {
        let raw = r#"
            account_age_weeks = 6
            send_concurrency = 2

            [reconnect]
            initial_ms = 500
        "#;
        let config: BridgeConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.account_age_weeks, 6);
        assert_eq!(config.send_concurrency, 2);
        assert_eq!(config.reconnect.initial_ms, 500);
        // Unspecified section fields fall back to defaults.
        assert_eq!(config.reconnect.cap_ms, RECONNECT_CAP_MS);
        assert_eq!(config.active_hours_start, 8);
    }

    #[test]
    fn test_validation_rejects_bad_hours() {
        let config = BridgeConfig { active_hours_start: 25, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_active_hours_plain_and_wrapped() {
        let day = BridgeConfig { active_hours_start: 8, active_hours_end: 22, ..Default::default() };
        assert!(day.in_active_hours(8));
        assert!(day.in_active_hours(21));
        assert!(!day.in_active_hours(22));
        assert!(!day.in_active_hours(3));

        let night =
            BridgeConfig { active_hours_start: 22, active_hours_end: 6, ..Default::default() };
        assert!(night.in_active_hours(23));
        assert!(night.in_active_hours(2));
        assert!(!night.in_active_hours(12));
    }
}
