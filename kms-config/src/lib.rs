//! Configuration for the delayed-delivery scheduler.
//!
//! Mirrors the keys enumerated under `scheduler.*` and `topic_prefix`: one
//! `SchedulerConfig` struct, `serde`-deserializable from YAML, with a
//! `default_*` function backing every field and an environment-variable
//! override pass applied after parsing. Everything outside these keys
//! (engine toggle, topic wiring, worker cadences) is out of scope for this
//! crate.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

fn default_enabled() -> bool {
    true
}

fn default_topic_partitions() -> u32 {
    8
}

fn default_checkpoint_save_interval_seconds() -> f64 {
    1.3
}

fn default_checkpoint_lookback_days() -> u32 {
    7
}

fn default_dispatcher_checkpoint_interval_seconds() -> u64 {
    10
}

fn default_janitor_checkpoint_interval_seconds() -> u64 {
    10
}

fn default_janitor_clean_interval_seconds() -> u64 {
    3
}

fn default_janitor_highwater_offset_seconds() -> i64 {
    14_400
}

fn default_debug_stats_enabled() -> bool {
    false
}

fn default_topic_prefix() -> String {
    String::new()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    #[serde(default = "default_checkpoint_lookback_days")]
    pub default_checkpoint_lookback_days: u32,
    #[serde(default = "default_dispatcher_checkpoint_interval_seconds")]
    pub checkpoint_interval_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            default_checkpoint_lookback_days: default_checkpoint_lookback_days(),
            checkpoint_interval_seconds: default_dispatcher_checkpoint_interval_seconds(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct JanitorConfig {
    #[serde(default = "default_janitor_checkpoint_interval_seconds")]
    pub checkpoint_interval_seconds: u64,
    #[serde(default = "default_janitor_clean_interval_seconds")]
    pub clean_interval_seconds: u64,
    #[serde(default = "default_janitor_highwater_offset_seconds")]
    pub highwater_offset_seconds: i64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        JanitorConfig {
            checkpoint_interval_seconds: default_janitor_checkpoint_interval_seconds(),
            clean_interval_seconds: default_janitor_clean_interval_seconds(),
            highwater_offset_seconds: default_janitor_highwater_offset_seconds(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_topic_partitions")]
    pub topic_partitions: u32,
    #[serde(default = "default_checkpoint_save_interval_seconds")]
    pub checkpoint_save_interval_seconds: f64,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
    #[serde(default = "default_debug_stats_enabled")]
    pub debug_stats_enabled: bool,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            enabled: default_enabled(),
            topic_partitions: default_topic_partitions(),
            checkpoint_save_interval_seconds: default_checkpoint_save_interval_seconds(),
            dispatcher: DispatcherConfig::default(),
            janitor: JanitorConfig::default(),
            debug_stats_enabled: default_debug_stats_enabled(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

impl SchedulerConfig {
    /// Loads a config from a YAML file, then applies `validate()`.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file `{}`.", path.display()))?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> anyhow::Result<Self> {
        let config: SchedulerConfig = serde_yaml::from_str(content)
            .context("Failed to parse scheduler configuration as YAML.")?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `KMS_SCHEDULER__<SECTION>__<KEY>` overrides on top of an
    /// already-loaded config, then re-validates. Mirrors the common
    /// `env`-over-file precedence without adding a config-crate dependency.
    pub fn apply_env_overrides(mut self, env: &HashMap<String, String>) -> anyhow::Result<Self> {
        for (key, value) in env {
            let Some(path) = key.strip_prefix("KMS_SCHEDULER__") else {
                continue;
            };
            let segments: Vec<&str> = path.split("__").map(|s| s.trim()).collect();
            apply_override(&mut self, &segments, value)
                .with_context(|| format!("Failed to apply override `{key}`."))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.topic_partitions == 0 {
            bail!("`scheduler.topic_partitions` must be at least 1.");
        }
        if self.checkpoint_save_interval_seconds <= 0.0 {
            bail!("`scheduler.checkpoint_save_interval_seconds` must be positive.");
        }
        if self.dispatcher.checkpoint_interval_seconds == 0 {
            bail!("`scheduler.dispatcher.checkpoint_interval` must be positive.");
        }
        if self.janitor.checkpoint_interval_seconds == 0 {
            bail!("`scheduler.janitor.checkpoint_interval` must be positive.");
        }
        if self.janitor.clean_interval_seconds == 0 {
            bail!("`scheduler.janitor.clean_interval_seconds` must be positive.");
        }
        Ok(())
    }

    pub fn input_topic(&self) -> String {
        format!("{}kms-input", self.topic_prefix)
    }

    pub fn actions_topic(&self) -> String {
        format!("{}kms-actions", self.topic_prefix)
    }

    pub fn dlq_topic(&self) -> String {
        format!("{}kms-dlq", self.topic_prefix)
    }

    pub fn timetable_changelog_topic(&self) -> String {
        format!("{}kms-timetable-changelog", self.topic_prefix)
    }
}

fn apply_override(config: &mut SchedulerConfig, segments: &[&str], value: &str) -> anyhow::Result<()> {
    match segments {
        ["ENABLED"] => config.enabled = parse_bool(value)?,
        ["TOPIC_PARTITIONS"] => config.topic_partitions = value.parse()?,
        ["CHECKPOINT_SAVE_INTERVAL_SECONDS"] => {
            config.checkpoint_save_interval_seconds = value.parse()?
        }
        ["DEBUG_STATS_ENABLED"] => config.debug_stats_enabled = parse_bool(value)?,
        ["TOPIC_PREFIX"] => config.topic_prefix = value.to_string(),
        ["DISPATCHER", "DEFAULT_CHECKPOINT_LOOKBACK_DAYS"] => {
            config.dispatcher.default_checkpoint_lookback_days = value.parse()?
        }
        ["DISPATCHER", "CHECKPOINT_INTERVAL"] => {
            config.dispatcher.checkpoint_interval_seconds = value.parse()?
        }
        ["JANITOR", "CHECKPOINT_INTERVAL"] => {
            config.janitor.checkpoint_interval_seconds = value.parse()?
        }
        ["JANITOR", "CLEAN_INTERVAL_SECONDS"] => {
            config.janitor.clean_interval_seconds = value.parse()?
        }
        ["JANITOR", "HIGHWATER_OFFSET_SECONDS"] => {
            config.janitor.highwater_offset_seconds = value.parse()?
        }
        other => bail!("Unknown configuration override path `{}`.", other.join("__")),
    }
    Ok(())
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => bail!("Expected a boolean, got `{other}`."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = SchedulerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.topic_partitions, 8);
        assert_eq!(config.checkpoint_save_interval_seconds, 1.3);
        assert_eq!(config.dispatcher.default_checkpoint_lookback_days, 7);
        assert_eq!(config.dispatcher.checkpoint_interval_seconds, 10);
        assert_eq!(config.janitor.checkpoint_interval_seconds, 10);
        assert_eq!(config.janitor.clean_interval_seconds, 3);
        assert_eq!(config.janitor.highwater_offset_seconds, 14_400);
        assert!(!config.debug_stats_enabled);
    }

    #[test]
    fn loads_a_partial_yaml_document() {
        let config = SchedulerConfig::load_from_str(
            r#"
            topic_partitions: 16
            topic_prefix: "prod-"
            janitor:
              highwater_offset_seconds: 3600
            "#,
        )
        .unwrap();
        assert_eq!(config.topic_partitions, 16);
        assert_eq!(config.topic_prefix, "prod-");
        assert_eq!(config.janitor.highwater_offset_seconds, 3600);
        assert_eq!(config.janitor.clean_interval_seconds, 3);
        assert_eq!(config.input_topic(), "prod-kms-input");
    }

    #[test]
    fn rejects_unknown_fields() {
        let result = SchedulerConfig::load_from_str("not_a_real_key: true");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_zero_partitions() {
        let result = SchedulerConfig::load_from_str("topic_partitions: 0");
        assert!(result.is_err());
    }

    #[test]
    fn env_override_takes_precedence_over_the_file() {
        let config = SchedulerConfig::default();
        let mut env = HashMap::new();
        env.insert(
            "KMS_SCHEDULER__JANITOR__HIGHWATER_OFFSET_SECONDS".to_string(),
            "60".to_string(),
        );
        let config = config.apply_env_overrides(&env).unwrap();
        assert_eq!(config.janitor.highwater_offset_seconds, 60);
    }
}
