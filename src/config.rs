use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Size of the shard universe. Shard ids are 0..NUM_SHARDS; peers may
/// publish state for any of them regardless of who manages what.
pub const NUM_SHARDS: u32 = 128;

/// Top-level configuration for a rollsync host process.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Managed-shard spec: "ALL", "NONE", or a comma-separated list of
    /// shard ids. Default: "ALL".
    #[serde(default = "default_shards")]
    pub shards: String,

    /// Rollup scheduling configuration.
    #[serde(default)]
    pub rollup: RollupConfig,
}

/// Rollup scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    /// How stale a slot must be before it is eligible for rollup.
    /// Default: 5m.
    #[serde(default = "default_max_slot_age", with = "humantime_serde")]
    pub max_slot_age: Duration,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            max_slot_age: default_max_slot_age(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        parse_shards(&self.shards)?;

        if self.rollup.max_slot_age.is_zero() {
            bail!("rollup.max_slot_age must be positive");
        }

        Ok(())
    }

    /// The managed shard ids this spec expands to.
    pub fn managed_shards(&self) -> Result<Vec<u32>> {
        parse_shards(&self.shards)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            shards: default_shards(),
            rollup: RollupConfig::default(),
        }
    }
}

/// Expands a shard spec into shard ids: "ALL" is the whole universe,
/// "NONE" is empty, anything else a comma-separated id list.
pub fn parse_shards(spec: &str) -> Result<Vec<u32>> {
    match spec.trim() {
        "" => bail!("shard spec is empty"),
        s if s.eq_ignore_ascii_case("ALL") => Ok((0..NUM_SHARDS).collect()),
        s if s.eq_ignore_ascii_case("NONE") => Ok(Vec::new()),
        s => {
            let mut shards = Vec::new();
            for part in s.split(',') {
                let shard: u32 = part
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid shard id {part:?}"))?;
                if shard >= NUM_SHARDS {
                    bail!("shard id {shard} out of range (universe is 0..{NUM_SHARDS})");
                }
                shards.push(shard);
            }
            Ok(shards)
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shards() -> String {
    "ALL".to_string()
}

fn default_max_slot_age() -> Duration {
    Duration::from_secs(300)
}
