//! Configuration for fanfleet tools.
//!
//! TOML file + environment loading, passcode resolution (env, keyring,
//! plaintext), validation, and translation to `fanfleet_core::MasterConfig`.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fanfleet_core::config::default_fan_params;
use fanfleet_core::{
    ExternalConfig, FanMode, GridShape, HandshakeParams, MacAddress, MasterConfig, NetworkConfig,
    SlaveSpec, TimingConfig,
};

/// Keyring service name for stored passcodes.
pub const KEYRING_SERVICE: &str = "fanfleet";

const DEFAULT_PASSCODE: &str = "fanfleet";
const REDACTED: &str = "********";
/// Largest `rows * columns * layers` accepted for the fan array.
pub const MAX_ARRAY_CELLS: u64 = 10_000;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no passcode configured for profile '{profile}'")]
    NoPasscode { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkSection,
    pub timing: TimingSection,
    pub fans: FansSection,
    pub array: ArraySection,
    pub external: ExternalSection,

    /// Approve newly discovered devices without operator action.
    pub auto_approve: bool,

    /// Devices approved ahead of time.
    pub slaves: Vec<SlaveEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Local address all Master sockets bind to.
    pub bind_ip: IpAddr,
    /// Destination of discovery invitations.
    pub broadcast_ip: IpAddr,
    /// Port Slaves listen on for invitations.
    pub discovery_port: u16,
    /// Master discovery listener port (0 = ephemeral).
    pub listener_port: u16,
    pub broadcast_period_ms: u64,
    /// Plaintext passcode (prefer keyring or env var).
    pub passcode: Option<String>,
    /// Environment variable name containing the passcode.
    pub passcode_env: Option<String>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_ip: IpAddr::V4(Ipv4Addr::BROADCAST),
            discovery_port: 65000,
            listener_port: 65001,
            broadcast_period_ms: 1000,
            passcode: Some(DEFAULT_PASSCODE.into()),
            passcode_env: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingSection {
    pub period_ms: u64,
    pub handshake_timeout_ms: u64,
    pub receive_timeout_ms: u64,
    /// Consecutive missed cycles before a connection is dropped.
    pub max_timeouts: u32,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            period_ms: 100,
            handshake_timeout_ms: 1000,
            receive_timeout_ms: 100,
            max_timeouts: 10,
        }
    }
}

/// Fan parameters sent to every Slave in the handshake.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FansSection {
    pub fan_mode: FanMode,
    pub ratio_a: f64,
    pub ratio_b: f64,
    pub pwm_hz: u32,
    pub counter_counts: u32,
    pub pulses_per_rev: u32,
    pub max_rpm: u32,
    pub min_rpm: u32,
    pub min_duty_cycle: f64,
    pub rpm_tolerance: f64,
    pub max_fan_timeouts: u32,
    /// Upper bound on fans per device.
    pub max_fans: u32,
    /// Fan count assumed for devices that are not in `[[slaves]]`.
    pub fans_per_device: u32,
}

impl Default for FansSection {
    fn default() -> Self {
        let p = default_fan_params();
        Self {
            fan_mode: p.fan_mode,
            ratio_a: p.ratio_a,
            ratio_b: p.ratio_b,
            pwm_hz: p.pwm_hz,
            counter_counts: p.counter_counts,
            pulses_per_rev: p.pulses_per_rev,
            max_rpm: p.max_rpm,
            min_rpm: p.min_rpm,
            min_duty_cycle: p.min_duty_cycle,
            rpm_tolerance: p.rpm_tolerance,
            max_fan_timeouts: p.max_fan_timeouts,
            max_fans: 21,
            fans_per_device: p.active_fans,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArraySection {
    /// Profile name; also scopes the keyring entry.
    pub profile: String,
    pub rows: u32,
    pub columns: u32,
    pub layers: u32,
}

impl Default for ArraySection {
    fn default() -> Self {
        Self {
            profile: "default".into(),
            rows: 1,
            columns: 1,
            layers: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExternalSection {
    pub enabled: bool,
    /// Command listener port (0 = ephemeral).
    pub listener_port: u16,
    pub broadcast_ip: IpAddr,
    pub broadcast_port: u16,
    pub broadcast_period_ms: u64,
    /// Datagrams sent per reply.
    pub repeat: u32,
    /// Idempotency window width.
    pub delta: u64,
}

impl Default for ExternalSection {
    fn default() -> Self {
        Self {
            enabled: true,
            listener_port: 60169,
            broadcast_ip: IpAddr::V4(Ipv4Addr::BROADCAST),
            broadcast_port: 60069,
            broadcast_period_ms: 100,
            repeat: 2,
            delta: 5,
        }
    }
}

/// A device approved ahead of time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlaveEntry {
    pub name: String,
    /// Hardware address, e.g. "AA:BB:CC:DD:EE:FF".
    pub mac: String,
    pub fans: u32,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "fanfleet", "fanfleet").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("fanfleet");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from defaults, file, then environment
/// (`FANFLEET_NETWORK__PASSCODE` → `network.passcode`).
///
/// `path` overrides the platform config location. A missing file is not
/// an error.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("FANFLEET_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, cfg.to_toml()?)?;
    Ok(())
}

// ── Passcode resolution ─────────────────────────────────────────────

/// Resolve the discovery passcode: named env var, then system keyring,
/// then plaintext in the config.
pub fn resolve_passcode(
    network: &NetworkSection,
    profile: &str,
) -> Result<SecretString, ConfigError> {
    // 1. passcode_env → env var lookup
    if let Some(ref env_name) = network.passcode_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile}/passcode")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref passcode) = network.passcode {
        return Ok(SecretString::from(passcode.clone()));
    }

    Err(ConfigError::NoPasscode {
        profile: profile.into(),
    })
}

// ── Validation & translation ────────────────────────────────────────

/// The passcode travels as one `|`-separated field of the invitation.
fn check_passcode(passcode: &str) -> Result<(), ConfigError> {
    if passcode.contains('|') {
        return Err(invalid("network.passcode", "must not contain '|'"));
    }
    Ok(())
}

impl Config {
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Copy safe to print: the plaintext passcode is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.network.passcode.is_some() {
            copy.network.passcode = Some(REDACTED.into());
        }
        copy
    }

    pub fn shape(&self) -> GridShape {
        GridShape::new(self.array.rows, self.array.columns, self.array.layers)
    }

    /// Check every constraint the Master relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref passcode) = self.network.passcode {
            check_passcode(passcode)?;
        }
        if self.network.discovery_port == 0 {
            return Err(invalid("network.discovery_port", "must be 1-65535"));
        }
        if self.network.broadcast_period_ms == 0 {
            return Err(invalid("network.broadcast_period_ms", "must be positive"));
        }

        let t = &self.timing;
        for (field, value) in [
            ("timing.period_ms", t.period_ms),
            ("timing.handshake_timeout_ms", t.handshake_timeout_ms),
            ("timing.receive_timeout_ms", t.receive_timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be positive"));
            }
        }
        if t.max_timeouts == 0 {
            return Err(invalid("timing.max_timeouts", "must be at least 1"));
        }

        let f = &self.fans;
        if !(0.0..=1.0).contains(&f.min_duty_cycle) {
            return Err(invalid(
                "fans.min_duty_cycle",
                format!("{} is outside [0, 1]", f.min_duty_cycle),
            ));
        }
        if f.min_rpm > f.max_rpm {
            return Err(invalid("fans.min_rpm", "exceeds fans.max_rpm"));
        }
        if f.max_fans == 0 {
            return Err(invalid("fans.max_fans", "must be at least 1"));
        }
        if f.fans_per_device == 0 || f.fans_per_device > f.max_fans {
            return Err(invalid(
                "fans.fans_per_device",
                format!("must be 1-{}", f.max_fans),
            ));
        }

        let a = &self.array;
        for (field, value) in [
            ("array.rows", a.rows),
            ("array.columns", a.columns),
            ("array.layers", a.layers),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be at least 1"));
            }
        }
        let cells = u64::from(a.rows)
            .saturating_mul(u64::from(a.columns))
            .saturating_mul(u64::from(a.layers));
        if cells > MAX_ARRAY_CELLS {
            return Err(invalid(
                "array",
                format!("{cells} cells exceeds the limit of {MAX_ARRAY_CELLS}"),
            ));
        }

        let e = &self.external;
        if e.enabled {
            if e.broadcast_port == 0 {
                return Err(invalid("external.broadcast_port", "must be 1-65535"));
            }
            if e.broadcast_period_ms == 0 {
                return Err(invalid("external.broadcast_period_ms", "must be positive"));
            }
            if e.repeat == 0 {
                return Err(invalid("external.repeat", "must be at least 1"));
            }
        }

        self.slave_specs().map(|_| ())
    }

    fn slave_specs(&self) -> Result<Vec<SlaveSpec>, ConfigError> {
        let mut seen = HashSet::new();
        self.slaves
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let mac = MacAddress::parse(&entry.mac)
                    .map_err(|e| invalid(format!("slaves[{i}].mac"), e.to_string()))?;
                if !seen.insert(mac.clone()) {
                    return Err(invalid(format!("slaves[{i}].mac"), format!("duplicate {mac}")));
                }
                if entry.fans == 0 || entry.fans > self.fans.max_fans {
                    return Err(invalid(
                        format!("slaves[{i}].fans"),
                        format!("must be 1-{}", self.fans.max_fans),
                    ));
                }
                Ok(SlaveSpec {
                    name: entry.name.clone(),
                    mac,
                    fans: entry.fans,
                })
            })
            .collect()
    }

    /// Validate, resolve the passcode, and build the Master's runtime config.
    pub fn to_master_config(&self) -> Result<MasterConfig, ConfigError> {
        self.validate()?;
        let passcode = resolve_passcode(&self.network, &self.array.profile)?;
        check_passcode(passcode.expose_secret())?;

        let n = &self.network;
        let t = &self.timing;
        let f = &self.fans;
        let e = &self.external;

        let external = e.enabled.then(|| ExternalConfig {
            listener_port: e.listener_port,
            broadcast_target: SocketAddr::new(e.broadcast_ip, e.broadcast_port),
            broadcast_period: Duration::from_millis(e.broadcast_period_ms),
            repeat: e.repeat,
            delta: e.delta,
        });

        Ok(MasterConfig {
            network: NetworkConfig {
                bind_ip: n.bind_ip,
                broadcast_ip: n.broadcast_ip,
                discovery_port: n.discovery_port,
                listener_port: n.listener_port,
                broadcast_period: Duration::from_millis(n.broadcast_period_ms),
                passcode,
            },
            timing: TimingConfig {
                period: Duration::from_millis(t.period_ms),
                handshake_timeout: Duration::from_millis(t.handshake_timeout_ms),
                receive_timeout: Duration::from_millis(t.receive_timeout_ms),
                max_timeouts: t.max_timeouts,
            },
            fans: HandshakeParams {
                fan_mode: f.fan_mode,
                ratio_a: f.ratio_a,
                ratio_b: f.ratio_b,
                active_fans: f.fans_per_device,
                pwm_hz: f.pwm_hz,
                counter_counts: f.counter_counts,
                pulses_per_rev: f.pulses_per_rev,
                max_rpm: f.max_rpm,
                min_rpm: f.min_rpm,
                min_duty_cycle: f.min_duty_cycle,
                rpm_tolerance: f.rpm_tolerance,
                max_fan_timeouts: f.max_fan_timeouts,
            },
            max_fans: f.max_fans,
            profile_name: self.array.profile.clone(),
            shape: self.shape(),
            external,
            auto_approve: self.auto_approve,
            slaves: self.slave_specs()?,
        })
    }
}
