// ── Runtime configuration ──
//
// These types describe how the Master runs: sockets, timing, fan
// parameters, array shape. They never touch disk. The CLI builds a
// `MasterConfig` (via fanfleet-config) and hands it in.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use fanfleet_proto::{FanMode, GridShape, HandshakeParams, MacAddress};
use secrecy::SecretString;

/// Discovery and socket placement.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Local address every Master socket binds to.
    pub bind_ip: IpAddr,
    /// Destination of discovery invitations.
    pub broadcast_ip: IpAddr,
    /// Port Slaves listen on for invitations.
    pub discovery_port: u16,
    /// Port of the Master's discovery listener. 0 = ephemeral.
    pub listener_port: u16,
    pub broadcast_period: Duration,
    /// Shared secret carried by invitations and required in replies.
    pub passcode: SecretString,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_ip: IpAddr::V4(Ipv4Addr::BROADCAST),
            discovery_port: 65000,
            listener_port: 65001,
            broadcast_period: Duration::from_secs(1),
            passcode: SecretString::from("fanfleet"),
        }
    }
}

/// Per-device exchange timing.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Sleep between polling cycles.
    pub period: Duration,
    /// How long a handshake waits for its acknowledgement.
    pub handshake_timeout: Duration,
    /// How long a steady-state cycle waits for feedback.
    pub receive_timeout: Duration,
    /// Consecutive timeouts before a connection is declared lost.
    pub max_timeouts: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(1),
            receive_timeout: Duration::from_millis(100),
            max_timeouts: 10,
        }
    }
}

/// Parameters for the external-control service.
#[derive(Debug, Clone)]
pub struct ExternalConfig {
    /// Port of the command listener. 0 = ephemeral.
    pub listener_port: u16,
    /// Where state broadcasts are sent.
    pub broadcast_target: SocketAddr,
    pub broadcast_period: Duration,
    /// How many datagrams carry each reply.
    pub repeat: u32,
    /// Width of the idempotency window.
    pub delta: u64,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            listener_port: 60169,
            broadcast_target: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), 60069),
            broadcast_period: Duration::from_millis(100),
            repeat: 2,
            delta: 5,
        }
    }
}

/// A device known before discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveSpec {
    pub name: String,
    pub mac: MacAddress,
    pub fans: u32,
}

/// Everything the Master needs to run.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub network: NetworkConfig,
    pub timing: TimingConfig,
    /// Fan parameters pushed with every handshake. `active_fans` is
    /// overridden per device with the device's fan count.
    pub fans: HandshakeParams,
    /// Upper bound on fans per device.
    pub max_fans: u32,
    /// Name of the loaded profile, answered to `PROFILE name`.
    pub profile_name: String,
    pub shape: GridShape,
    /// `None` leaves the external-control service off.
    pub external: Option<ExternalConfig>,
    /// Approve newly discovered devices without operator action.
    pub auto_approve: bool,
    pub slaves: Vec<SlaveSpec>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            timing: TimingConfig::default(),
            fans: default_fan_params(),
            max_fans: 21,
            profile_name: "default".into(),
            shape: GridShape::new(1, 1, 1),
            external: Some(ExternalConfig::default()),
            auto_approve: false,
            slaves: Vec::new(),
        }
    }
}

/// Fan parameters for common 12V PWM fans.
pub fn default_fan_params() -> HandshakeParams {
    HandshakeParams {
        fan_mode: FanMode::Single,
        ratio_a: 1.0,
        ratio_b: 1.0,
        active_fans: 21,
        pwm_hz: 25_000,
        counter_counts: 2,
        pulses_per_rev: 2,
        max_rpm: 16_000,
        min_rpm: 1_200,
        min_duty_cycle: 0.1,
        rpm_tolerance: 0.05,
        max_fan_timeouts: 1,
    }
}
