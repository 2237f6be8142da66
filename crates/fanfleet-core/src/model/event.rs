// ── Fleet events ──
//
// Broadcast to every subscriber of `Master::events()`.

use std::net::IpAddr;

use fanfleet_proto::MacAddress;
use serde::Serialize;

use super::{DeviceIndex, SlaveState};

/// Discrete change produced by the core.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FleetEvent {
    /// A discovery reply named a previously unseen address.
    DeviceDiscovered {
        index: DeviceIndex,
        mac: MacAddress,
        ip: IpAddr,
    },
    StateChanged {
        index: DeviceIndex,
        mac: MacAddress,
        from: SlaveState,
        to: SlaveState,
    },
    /// New feedback with a fresher data index was accepted.
    FeedbackUpdated {
        index: DeviceIndex,
        mac: MacAddress,
        data_index: u64,
    },
    /// The consecutive-timeout threshold was reached.
    ConnectionLost {
        index: DeviceIndex,
        mac: MacAddress,
        timeouts: u32,
    },
    /// A service could not be activated and was left off.
    ServiceFailed { service: String, reason: String },
}

impl FleetEvent {
    pub fn mac(&self) -> Option<&MacAddress> {
        match self {
            Self::DeviceDiscovered { mac, .. }
            | Self::StateChanged { mac, .. }
            | Self::FeedbackUpdated { mac, .. }
            | Self::ConnectionLost { mac, .. } => Some(mac),
            Self::ServiceFailed { .. } => None,
        }
    }
}
