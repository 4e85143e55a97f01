//! Detection configuration, validation and the live-swappable handle.

use chrono::Duration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::constants::{
    MAX_BAN_MINUTES, MAX_DETECTION_SECS, MAX_IDLE_RECLAIM_MINUTES, MAX_INTERVAL_SECS,
};
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Rolling detection window in seconds
    pub time_window_secs: u64,
    /// Suppression after a trigger, in seconds
    pub cooldown_secs: u64,
    /// Consecutive triggers that escalate to a ban
    pub continuous_threshold: u32,
    pub ban_duration_minutes: u64,
    /// Exemption after a world/dimension change, in seconds
    pub dimension_switch_cooldown_secs: u64,
    pub height_filter_enabled: bool,
    /// Actors above this block Y are not attributed when the filter is on
    pub height_threshold: i32,
    pub disable_detection_in_water: bool,
    /// Offline actors with no activity for this long are forgotten
    pub idle_reclaim_minutes: u64,
    /// De-dup cache retention; `None` means twice the detection window
    pub dedup_retention_secs: Option<u64>,
    /// Used when an actor's view distance cannot be queried
    pub default_view_distance: u32,
    pub tick_interval_ms: u64,
    pub ban_sweep_interval_secs: u64,
    pub dedup_sweep_interval_secs: u64,
    pub messages: MessageTemplates,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            time_window_secs: 30,
            cooldown_secs: 3,
            continuous_threshold: 5,
            ban_duration_minutes: 10,
            dimension_switch_cooldown_secs: 30,
            height_filter_enabled: false,
            height_threshold: 200,
            disable_detection_in_water: true,
            idle_reclaim_minutes: 30,
            dedup_retention_secs: None,
            default_view_distance: 10,
            tick_interval_ms: 1000,
            ban_sweep_interval_secs: 600,
            dedup_sweep_interval_secs: 300,
            messages: MessageTemplates::default(),
        }
    }
}

impl DetectionConfig {
    /// Reject values that would make detection unsafe or meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time_window_secs == 0 {
            return Err(ConfigError::invalid("time_window_secs", "must be greater than 0"));
        }
        if self.height_threshold < 0 {
            return Err(ConfigError::invalid(
                "height_threshold",
                format!("must not be negative (got {})", self.height_threshold),
            ));
        }
        if self.continuous_threshold == 0 {
            return Err(ConfigError::invalid("continuous_threshold", "must be greater than 0"));
        }
        if self.ban_duration_minutes == 0 {
            return Err(ConfigError::invalid("ban_duration_minutes", "must be greater than 0"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::invalid("tick_interval_ms", "must be greater than 0"));
        }
        if self.default_view_distance == 0 {
            return Err(ConfigError::invalid("default_view_distance", "must be greater than 0"));
        }
        if self.dedup_retention_secs == Some(0) {
            return Err(ConfigError::invalid("dedup_retention_secs", "must be greater than 0"));
        }
        if self.ban_sweep_interval_secs == 0 {
            return Err(ConfigError::invalid("ban_sweep_interval_secs", "must be greater than 0"));
        }
        if self.dedup_sweep_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "dedup_sweep_interval_secs",
                "must be greater than 0",
            ));
        }

        at_most("time_window_secs", self.time_window_secs, MAX_DETECTION_SECS)?;
        at_most("cooldown_secs", self.cooldown_secs, MAX_DETECTION_SECS)?;
        at_most(
            "dimension_switch_cooldown_secs",
            self.dimension_switch_cooldown_secs,
            MAX_DETECTION_SECS,
        )?;
        at_most(
            "dedup_retention_secs",
            self.dedup_retention_secs.unwrap_or(0),
            MAX_DETECTION_SECS,
        )?;
        at_most("ban_duration_minutes", self.ban_duration_minutes, MAX_BAN_MINUTES)?;
        at_most("idle_reclaim_minutes", self.idle_reclaim_minutes, MAX_IDLE_RECLAIM_MINUTES)?;
        at_most("tick_interval_ms", self.tick_interval_ms, MAX_INTERVAL_SECS * 1000)?;
        at_most("ban_sweep_interval_secs", self.ban_sweep_interval_secs, MAX_INTERVAL_SECS)?;
        at_most("dedup_sweep_interval_secs", self.dedup_sweep_interval_secs, MAX_INTERVAL_SECS)?;
        Ok(())
    }

    // Accessors clamp to the validation bounds so a config that skipped
    // `validate()` still yields representable durations.

    pub fn time_window(&self) -> Duration {
        seconds(self.time_window_secs, MAX_DETECTION_SECS)
    }

    pub fn cooldown(&self) -> Duration {
        seconds(self.cooldown_secs, MAX_DETECTION_SECS)
    }

    pub fn ban_duration(&self) -> Duration {
        minutes(self.ban_duration_minutes, MAX_BAN_MINUTES)
    }

    pub fn dimension_switch_cooldown(&self) -> Duration {
        seconds(self.dimension_switch_cooldown_secs, MAX_DETECTION_SECS)
    }

    pub fn idle_horizon(&self) -> Duration {
        minutes(self.idle_reclaim_minutes, MAX_IDLE_RECLAIM_MINUTES)
    }

    pub fn dedup_retention(&self) -> Duration {
        let secs = self
            .dedup_retention_secs
            .unwrap_or(self.time_window_secs.saturating_mul(2));
        seconds(secs, MAX_DETECTION_SECS * 2)
    }

    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms.clamp(1, MAX_INTERVAL_SECS * 1000))
    }

    pub fn ban_sweep_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ban_sweep_interval_secs.clamp(1, MAX_INTERVAL_SECS))
    }

    pub fn dedup_sweep_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.dedup_sweep_interval_secs.clamp(1, MAX_INTERVAL_SECS))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

fn at_most(field: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::invalid(
            field,
            format!("must be at most {max} (got {value})"),
        ));
    }
    Ok(())
}

fn seconds(value: u64, max: u64) -> Duration {
    Duration::try_seconds(value.min(max) as i64).unwrap_or(Duration::MAX)
}

fn minutes(value: u64, max: u64) -> Duration {
    Duration::try_minutes(value.min(max) as i64).unwrap_or(Duration::MAX)
}

/// Operator-facing text. Placeholders: `%player%`, `%time%`, `%chunks%`, `%count%`.
/// `&` colour codes are translated to `§` for in-game text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
    pub ban_kick: String,
    pub ban_login: String,
    pub detection_warning: String,
    pub detection_console: String,
    pub ban_console: String,
    /// In-game notice for staff holding the notice capability
    pub admin_detection: String,
    pub admin_ban: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            ban_kick: "&cYou were temporarily banned for repeatedly triggering the map-running detector\n&ePlease try again in %time% minutes".into(),
            ban_login: "&cYou are temporarily banned for repeatedly triggering the map-running detector\n&ePlease try again in %time% minutes".into(),
            detection_warning: "&cMap-running threshold reached. Triggering it repeatedly will get you temporarily banned!".into(),
            detection_console: "Actor %player% reached the map-running threshold: %chunks% chunks generated in %time%s, consecutive count %count%".into(),
            ban_console: "Actor %player% was banned for repeatedly reaching the map-running threshold".into(),
            admin_detection: "&7[GlideWatch] &e%player% &7reached the map-running threshold: &e%chunks% &7chunks in &e%time%s&7, consecutive count &e%count%".into(),
            admin_ban: "&7[GlideWatch] &c%player% &7was banned for repeatedly reaching the map-running threshold".into(),
        }
    }
}

impl MessageTemplates {
    /// Substitute placeholders without colour translation (console/log text).
    pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
        vars.iter()
            .fold(template.to_string(), |acc, (key, value)| acc.replace(key, value))
    }

    /// Translate `&` colour codes in the template, then substitute
    /// placeholders. Substituted values are never translated.
    pub fn render_colored(template: &str, vars: &[(&str, &str)]) -> String {
        Self::render(&translate_color_codes(template), vars)
    }
}

const COLOR_CODES: &str = "0123456789AaBbCcDdEeFfKkLlMmNnOoRrXx";

/// Replace `&` with `§` where it introduces a colour or format code.
pub fn translate_color_codes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '&' && chars.peek().is_some_and(|next| COLOR_CODES.contains(*next)) {
            out.push('§');
        } else {
            out.push(c);
        }
    }
    out
}

/// Live-swappable configuration cell.
///
/// Readers take an `Arc` snapshot per operation, so a reload never tears a
/// single evaluation.
#[derive(Debug, Default)]
pub struct ConfigHandle<T> {
    inner: RwLock<Arc<T>>,
}

impl<T> ConfigHandle<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    pub fn current(&self) -> Arc<T> {
        self.inner.read().clone()
    }

    /// Swap in a new value, returning the previous one.
    pub fn replace(&self, value: T) -> Arc<T> {
        std::mem::replace(&mut *self.inner.write(), Arc::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = DetectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.time_window_secs, 30);
        assert_eq!(config.continuous_threshold, 5);
        assert_eq!(config.ban_duration_minutes, 10);
        assert!(config.disable_detection_in_water);
    }

    #[test]
    fn test_dedup_retention_defaults_to_twice_window() {
        let config = DetectionConfig {
            time_window_secs: 45,
            ..Default::default()
        };
        assert_eq!(config.dedup_retention(), Duration::seconds(90));

        let config = DetectionConfig {
            dedup_retention_secs: Some(12),
            ..Default::default()
        };
        assert_eq!(config.dedup_retention(), Duration::seconds(12));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = DetectionConfig {
            time_window_secs: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "time_window_secs",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_durations() {
        let cases = [
            (
                DetectionConfig {
                    time_window_secs: u64::MAX / 2,
                    ..Default::default()
                },
                "time_window_secs",
            ),
            (
                DetectionConfig {
                    cooldown_secs: MAX_DETECTION_SECS + 1,
                    ..Default::default()
                },
                "cooldown_secs",
            ),
            (
                DetectionConfig {
                    dimension_switch_cooldown_secs: u64::MAX,
                    ..Default::default()
                },
                "dimension_switch_cooldown_secs",
            ),
            (
                DetectionConfig {
                    dedup_retention_secs: Some(u64::MAX),
                    ..Default::default()
                },
                "dedup_retention_secs",
            ),
            (
                DetectionConfig {
                    ban_duration_minutes: 1_000_000_000_000,
                    ..Default::default()
                },
                "ban_duration_minutes",
            ),
            (
                DetectionConfig {
                    idle_reclaim_minutes: u64::MAX,
                    ..Default::default()
                },
                "idle_reclaim_minutes",
            ),
            (
                DetectionConfig {
                    tick_interval_ms: u64::MAX,
                    ..Default::default()
                },
                "tick_interval_ms",
            ),
            (
                DetectionConfig {
                    ban_sweep_interval_secs: 0,
                    ..Default::default()
                },
                "ban_sweep_interval_secs",
            ),
            (
                DetectionConfig {
                    dedup_sweep_interval_secs: u64::MAX,
                    ..Default::default()
                },
                "dedup_sweep_interval_secs",
            ),
        ];

        for (config, expected) in cases {
            match config.validate() {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
                other => panic!("{expected}: expected rejection, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_upper_bounds_are_accepted() {
        let config = DetectionConfig {
            time_window_secs: MAX_DETECTION_SECS,
            ban_duration_minutes: MAX_BAN_MINUTES,
            idle_reclaim_minutes: MAX_IDLE_RECLAIM_MINUTES,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.ban_duration(), Duration::days(365));
    }

    #[test]
    fn test_accessors_clamp_unvalidated_values() {
        let config = DetectionConfig {
            time_window_secs: u64::MAX,
            ban_duration_minutes: u64::MAX,
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.time_window(), Duration::days(1));
        assert_eq!(config.ban_duration(), Duration::days(365));
        assert_eq!(config.dedup_retention(), Duration::days(2));
        assert_eq!(config.tick_period(), std::time::Duration::from_millis(1));
    }

    #[test]
    fn test_validate_rejects_negative_height() {
        let config = DetectionConfig {
            height_threshold: -1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threshold_and_duration() {
        let config = DetectionConfig {
            continuous_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DetectionConfig {
            ban_duration_minutes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cooldown_is_allowed() {
        let config = DetectionConfig {
            cooldown_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = DetectionConfig::from_json(r#"{"time_window_secs": 60}"#).unwrap();
        assert_eq!(config.time_window_secs, 60);
        assert_eq!(config.cooldown_secs, 3);
        assert_eq!(config.messages, MessageTemplates::default());
    }

    #[test]
    fn test_from_json_validates() {
        let result = DetectionConfig::from_json(r#"{"continuous_threshold": 0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, r#"{{"ban_duration_minutes": 15, "height_filter_enabled": true}}"#).unwrap();

        let config = DetectionConfig::load(temp.path()).unwrap();
        assert_eq!(config.ban_duration_minutes, 15);
        assert!(config.height_filter_enabled);
    }

    #[test]
    fn test_load_invalid_json() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, r#"{{invalid json"#).unwrap();
        assert!(matches!(
            DetectionConfig::load(temp.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_render_placeholders() {
        let text = MessageTemplates::render(
            "%player% made %chunks% chunks in %time%s (x%count%)",
            &[("%player%", "Steve"), ("%chunks%", "90"), ("%time%", "30"), ("%count%", "2")],
        );
        assert_eq!(text, "Steve made 90 chunks in 30s (x2)");
    }

    #[test]
    fn test_render_colored() {
        let text = MessageTemplates::render_colored("&cBanned for %time% minutes", &[("%time%", "10")]);
        assert_eq!(text, "§cBanned for 10 minutes");
    }

    #[test]
    fn test_only_color_codes_are_translated() {
        assert_eq!(translate_color_codes("&aGreen & &zplain &"), "§aGreen & &zplain &");
        assert_eq!(translate_color_codes("&L&r"), "§L§r");
    }

    #[test]
    fn test_substituted_values_keep_ampersands() {
        let text = MessageTemplates::render_colored("&e%player% left", &[("%player%", "Tom&cJerry")]);
        assert_eq!(text, "§eTom&cJerry left");
    }

    #[test]
    fn test_config_handle_swap() {
        let handle = ConfigHandle::new(DetectionConfig::default());
        let before = handle.current();
        let previous = handle.replace(DetectionConfig {
            cooldown_secs: 9,
            ..Default::default()
        });
        assert_eq!(previous.cooldown_secs, 3);
        assert_eq!(before.cooldown_secs, 3);
        assert_eq!(handle.current().cooldown_secs, 9);
    }
}
