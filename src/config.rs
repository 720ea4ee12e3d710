//! Coordinator configuration.
//!
//! Can be built in code, read from the environment or parsed from YAML:
//!
//! ```yaml
//! mode: deferred
//! ttl_secs: 60
//! confirm: hits_only
//! ```
//!
//! Environment variables (all optional):
//! - `FRAGMENT_CACHE_MODE`: `disabled`, `direct` or `deferred`
//! - `FRAGMENT_CACHE_TTL_SECS`: entry lifetime in seconds
//! - `FRAGMENT_CACHE_CONFIRM`: `every` or `hits`

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// How a fragment consults the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Skip the cache; always compute.
    Disabled,
    /// One bulk read per tick; no per-key probes.
    #[default]
    Direct,
    /// One bulk read per tick, then per-key existence probes per [`ConfirmPolicy`].
    Deferred,
}

impl FromStr for CacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" | "none" => Ok(CacheMode::Disabled),
            "direct" => Ok(CacheMode::Direct),
            "deferred" => Ok(CacheMode::Deferred),
            other => Err(Error::configuration_with_context(
                format!("unknown cache mode `{}`", other),
                ErrorContext::new()
                    .with_field_path("mode")
                    .with_details("expected disabled, direct or deferred"),
            )),
        }
    }
}

/// Which consumers re-confirm their key with `exists` in deferred mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmPolicy {
    /// Every fragment key in the tick is probed, hit or miss.
    #[default]
    EveryConsumer,
    /// Only keys the bulk read reported as present are probed.
    HitsOnly,
}

impl FromStr for ConfirmPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "every" | "every_consumer" => Ok(ConfirmPolicy::EveryConsumer),
            "hits" | "hits_only" => Ok(ConfirmPolicy::HitsOnly),
            other => Err(Error::configuration_with_context(
                format!("unknown confirm policy `{}`", other),
                ErrorContext::new()
                    .with_field_path("confirm")
                    .with_details("expected every or hits"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub mode: CacheMode,
    #[serde(rename = "ttl_secs", with = "secs")]
    pub ttl: Duration,
    pub confirm: ConfirmPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::Direct,
            ttl: Duration::from_secs(60),
            confirm: ConfirmPolicy::EveryConsumer,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
    pub fn with_confirm(mut self, confirm: ConfirmPolicy) -> Self {
        self.confirm = confirm;
        self
    }

    /// Defaults overridden by `FRAGMENT_CACHE_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(mode) = get("FRAGMENT_CACHE_MODE") {
            cfg.mode = mode.parse()?;
        }
        if let Some(ttl) = get("FRAGMENT_CACHE_TTL_SECS") {
            let secs = ttl.trim().parse::<u64>().map_err(|e| {
                Error::configuration_with_context(
                    "invalid ttl",
                    ErrorContext::new()
                        .with_field_path("FRAGMENT_CACHE_TTL_SECS")
                        .with_details(e.to_string()),
                )
            })?;
            cfg.ttl = Duration::from_secs(secs);
        }
        if let Some(confirm) = get("FRAGMENT_CACHE_CONFIRM") {
            cfg.confirm = confirm.parse()?;
        }
        Ok(cfg)
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
