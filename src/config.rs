use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use dotenv::dotenv;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: cannot parse '{value}'")]
    Invalid { key: String, value: String },
}

/// Cooldowns and cadence for the attack scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackConfig {
    pub deauth_cooldown_ms: u64,
    pub assoc_cooldown_ms: u64,
    pub beacon_interval_ms: u64,
    /// Frames per broadcast deauth.
    pub deauth_burst: usize,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            deauth_cooldown_ms: 100,
            assoc_cooldown_ms: 500,
            beacon_interval_ms: 1,
            deauth_burst: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub interface: Option<String>,
    pub channel: u8,
    pub channel_hop: bool,
    pub hop_interval_ms: u64,
    pub queue_capacity: usize,
    pub output: Option<PathBuf>,
    pub attack: AttackConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: None,
            channel: 1,
            channel_hop: false,
            hop_interval_ms: 250,
            queue_capacity: 1024,
            output: None,
            attack: AttackConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, overridden by `.env` and then by `AIRSNIFF_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let get = |name: &str| lookup(&format!("AIRSNIFF_{}", name));

        if let Some(iface) = get("INTERFACE").filter(|s| !s.is_empty()) {
            config.interface = Some(iface);
        }
        if let Some(out) = get("OUTPUT").filter(|s| !s.is_empty()) {
            config.output = Some(PathBuf::from(out));
        }
        parse_into(&get, "CHANNEL", &mut config.channel)?;
        parse_into(&get, "HOP_INTERVAL_MS", &mut config.hop_interval_ms)?;
        parse_into(&get, "QUEUE_CAPACITY", &mut config.queue_capacity)?;
        parse_into(&get, "DEAUTH_COOLDOWN_MS", &mut config.attack.deauth_cooldown_ms)?;
        parse_into(&get, "ASSOC_COOLDOWN_MS", &mut config.attack.assoc_cooldown_ms)?;
        parse_into(&get, "BEACON_INTERVAL_MS", &mut config.attack.beacon_interval_ms)?;
        parse_into(&get, "DEAUTH_BURST", &mut config.attack.deauth_burst)?;

        if let Some(raw) = get("CHANNEL_HOP") {
            config.channel_hop = parse_bool(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "AIRSNIFF_CHANNEL_HOP".into(),
                value: raw.clone(),
            })?;
        }

        if !(1..=13).contains(&config.channel) {
            return Err(ConfigError::Invalid {
                key: "AIRSNIFF_CHANNEL".into(),
                value: config.channel.to_string(),
            });
        }
        if config.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "AIRSNIFF_QUEUE_CAPACITY".into(),
                value: "0".into(),
            });
        }
        Ok(config)
    }
}

fn parse_into<T, G>(get: &G, name: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        *slot = raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: format!("AIRSNIFF_{}", name),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// SSIDs used by the beacon flood when none are given.
pub fn default_flood_ssids() -> Vec<String> {
    (1..=8).map(|i| format!("airsniff-test-{:02}", i)).collect()
}
