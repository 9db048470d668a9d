//! Declarative config: a top-level `main` section plus repeated `member`
//! stanzas. Two-tier `Input` (all-optional) -> [`resolve`](ConfigInput::resolve)
//! -> immutable [`Config`] pattern, so unset keys fall back to defaults
//! without scattering `unwrap_or` calls through the rest of the crate.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::member::MemberClass;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MainInput {
    pub enable: Option<bool>,
    pub poll_interval_ms: Option<u64>,
    pub decision_interval_ms: Option<u64>,
    pub retention_hours: Option<u64>,
    pub max_ram_mb: Option<u64>,
    pub predictive: Option<bool>,
    pub predictive_drop: Option<f64>,
    pub predictive_window_s: Option<u64>,
    pub switch_margin: Option<f64>,
    pub min_uptime_s: Option<u64>,
    pub cooldown_s: Option<u64>,
    pub recovery_hold_s: Option<u64>,
    pub discovery_interval_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
    pub log_level: Option<String>,
    pub rpc_port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub health_port: Option<u16>,
    pub use_policy_router: Option<bool>,
    pub pid_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemberInput {
    pub name: String,
    pub class: Option<String>,
    pub iface: String,
    pub enabled: Option<bool>,
    pub weight: Option<i32>,
    #[serde(default)]
    pub class_params: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigInput {
    pub main: MainInput,
    #[serde(rename = "member")]
    pub members: Vec<MemberInput>,
}

#[derive(Debug, Clone)]
pub struct MemberSpec {
    pub name: String,
    /// `None` means "auto": classify at discovery time.
    pub class: Option<MemberClass>,
    pub iface: String,
    pub enabled: bool,
    pub weight: i32,
    pub class_params: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub enable: bool,
    pub poll_interval_ms: u64,
    pub decision_interval_ms: u64,
    pub retention_hours: u64,
    pub max_ram_mb: u64,
    pub predictive: bool,
    pub predictive_drop: f64,
    pub predictive_window_s: u64,
    pub switch_margin: f64,
    pub min_uptime_s: u64,
    pub cooldown_s: u64,
    pub recovery_hold_s: u64,
    pub discovery_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub log_level: String,
    pub rpc_port: u16,
    pub metrics_port: u16,
    pub health_port: u16,
    pub use_policy_router: bool,
    pub pid_file: Option<String>,
    pub members: Vec<MemberSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: true,
            poll_interval_ms: 1500,
            decision_interval_ms: 5000,
            retention_hours: 24,
            max_ram_mb: 16,
            predictive: false,
            predictive_drop: 15.0,
            predictive_window_s: 30,
            switch_margin: 10.0,
            min_uptime_s: 20,
            cooldown_s: 20,
            recovery_hold_s: 40,
            discovery_interval_ms: 30_000,
            shutdown_grace_ms: 2000,
            log_level: "info".to_string(),
            rpc_port: 9100,
            metrics_port: 9101,
            health_port: 9102,
            use_policy_router: true,
            pid_file: None,
            members: Vec::new(),
        }
    }
}

fn parse_class(s: &str) -> Option<MemberClass> {
    match s.to_ascii_lowercase().as_str() {
        "auto" => None,
        "starlink" => Some(MemberClass::Starlink),
        "cellular" => Some(MemberClass::Cellular),
        "wifi" | "wi-fi" => Some(MemberClass::WiFi),
        "lan" => Some(MemberClass::Lan),
        "vpn" => Some(MemberClass::Vpn),
        "generic" => Some(MemberClass::Generic),
        _ => Some(MemberClass::Generic),
    }
}

impl ConfigInput {
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let defaults = Config::default();
        let main = self.main;

        let log_level = main.log_level.unwrap_or(defaults.log_level);
        if !["error", "warn", "info", "debug", "trace"].contains(&log_level.as_str()) {
            return Err(ConfigError::Invalid {
                path: "main.log_level".to_string(),
                message: format!("unrecognized log level `{log_level}`"),
            });
        }

        let mut seen_names = std::collections::HashSet::new();
        let mut members = Vec::with_capacity(self.members.len());
        for (idx, m) in self.members.into_iter().enumerate() {
            if m.name.is_empty() {
                return Err(ConfigError::Invalid {
                    path: format!("member[{idx}].name"),
                    message: "member name must not be empty".to_string(),
                });
            }
            if !seen_names.insert(m.name.clone()) {
                return Err(ConfigError::Invalid {
                    path: format!("member[{idx}].name"),
                    message: format!("duplicate member name `{}`", m.name),
                });
            }
            members.push(MemberSpec {
                name: m.name,
                class: m.class.as_deref().and_then(parse_class),
                iface: m.iface,
                enabled: m.enabled.unwrap_or(true),
                weight: m.weight.unwrap_or(0),
                class_params: m.class_params,
            });
        }

        Ok(Config {
            enable: main.enable.unwrap_or(defaults.enable),
            poll_interval_ms: main.poll_interval_ms.unwrap_or(defaults.poll_interval_ms).max(100),
            decision_interval_ms: main
                .decision_interval_ms
                .unwrap_or(defaults.decision_interval_ms)
                .max(100),
            retention_hours: main.retention_hours.unwrap_or(defaults.retention_hours),
            max_ram_mb: main.max_ram_mb.unwrap_or(defaults.max_ram_mb).max(1),
            predictive: main.predictive.unwrap_or(defaults.predictive),
            predictive_drop: main.predictive_drop.unwrap_or(defaults.predictive_drop),
            predictive_window_s: main
                .predictive_window_s
                .unwrap_or(defaults.predictive_window_s),
            switch_margin: main.switch_margin.unwrap_or(defaults.switch_margin),
            min_uptime_s: main.min_uptime_s.unwrap_or(defaults.min_uptime_s),
            cooldown_s: main.cooldown_s.unwrap_or(defaults.cooldown_s),
            recovery_hold_s: main
                .recovery_hold_s
                .unwrap_or_else(|| 2 * main.cooldown_s.unwrap_or(defaults.cooldown_s)),
            discovery_interval_ms: main
                .discovery_interval_ms
                .unwrap_or(defaults.discovery_interval_ms),
            shutdown_grace_ms: main.shutdown_grace_ms.unwrap_or(defaults.shutdown_grace_ms),
            log_level,
            rpc_port: main.rpc_port.unwrap_or(defaults.rpc_port),
            metrics_port: main.metrics_port.unwrap_or(defaults.metrics_port),
            health_port: main.health_port.unwrap_or(defaults.health_port),
            use_policy_router: main.use_policy_router.unwrap_or(defaults.use_policy_router),
            pid_file: main.pid_file,
            members,
        })
    }
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Config::default());
        }
        let parsed: ConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.poll_interval_ms, 1500);
        assert_eq!(cfg.switch_margin, 10.0);
        assert!(cfg.members.is_empty());
    }

    #[test]
    fn parses_main_and_member_sections() {
        let toml = r#"
            [main]
            poll_interval_ms = 2000
            switch_margin = 15
            cooldown_s = 30

            [[member]]
            name = "wan0"
            class = "starlink"
            iface = "eth0"
            weight = 5

            [[member]]
            name = "wan1"
            class = "auto"
            iface = "wwan0"
        "#;
        let cfg = Config::from_toml_str(toml).unwrap();
        assert_eq!(cfg.poll_interval_ms, 2000);
        assert_eq!(cfg.switch_margin, 15.0);
        assert_eq!(cfg.cooldown_s, 30);
        assert_eq!(cfg.recovery_hold_s, 60);
        assert_eq!(cfg.members.len(), 2);
        assert_eq!(cfg.members[0].class, Some(MemberClass::Starlink));
        assert_eq!(cfg.members[1].class, None);
    }

    #[test]
    fn duplicate_member_names_rejected() {
        let toml = r#"
            [[member]]
            name = "wan0"
            iface = "eth0"
            [[member]]
            name = "wan0"
            iface = "eth1"
        "#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn invalid_log_level_rejected() {
        let toml = r#"
            [main]
            log_level = "verbose"
        "#;
        assert!(Config::from_toml_str(toml).is_err());
    }
}
