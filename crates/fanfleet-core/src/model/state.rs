// ── Device lifecycle ──
//
// One tagged state per device and a single transition function. Every
// component that moves a device (discovery, operator, worker) goes
// through `SlaveState::apply`.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a Slave.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum SlaveState {
    /// Discovered but not yet approved.
    Available,
    /// Approved; the worker is trying to handshake.
    Known,
    /// Steady command/feedback exchange.
    Connected,
    /// Idle, no sockets. Rediscovery re-arms it.
    Disconnected,
    /// Firmware transfer in progress; steady exchange suspended.
    Updating,
}

/// Something that moves a device between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Transition {
    /// Operator (or auto-approval) accepts a newly discovered device.
    Approve,
    /// A valid discovery reply arrived for a disconnected device.
    Rediscovered,
    HandshakeAcked,
    HandshakeFailed,
    /// Consecutive-timeout threshold reached.
    ConnectionLost,
    /// `RIP` received from the device, or an operator disconnect.
    Terminated,
    BeginUpdate,
    EndUpdate,
}

impl SlaveState {
    /// Next state for `transition`, or `None` if it does not apply here.
    pub fn apply(self, transition: Transition) -> Option<SlaveState> {
        use SlaveState::{Available, Connected, Disconnected, Known, Updating};

        match (self, transition) {
            (Available, Transition::Approve) | (Disconnected, Transition::Rediscovered) => {
                Some(Known)
            }
            (Known, Transition::HandshakeAcked) => Some(Connected),
            (Known, Transition::HandshakeFailed)
            | (Connected, Transition::ConnectionLost)
            | (Known | Connected, Transition::Terminated)
            | (Updating, Transition::EndUpdate) => Some(Disconnected),
            (Connected, Transition::BeginUpdate) => Some(Updating),
            _ => None,
        }
    }

    /// States in which the device owns live sockets.
    pub fn has_sockets(self) -> bool {
        matches!(self, Self::Known | Self::Connected | Self::Updating)
    }

    /// States the connection worker acts on.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Known | Self::Connected)
    }
}
