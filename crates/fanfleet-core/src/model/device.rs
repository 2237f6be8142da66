use std::net::IpAddr;

use fanfleet_proto::MacAddress;
use serde::{Deserialize, Serialize};

use super::SlaveState;

/// Arena index assigned when a device is first registered. Never reused.
pub type DeviceIndex = usize;

/// Sequencing counters owned by a device's connection worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStats {
    /// Last outbound sequence number sent.
    pub out_seq: u64,
    /// Last inbound sequence number accepted.
    pub in_seq: u64,
    /// Last accepted data freshness index.
    pub data_index: u64,
    /// Feedback updates dropped because the inbound mailbox was full.
    pub drops: u64,
    /// Consecutive receive timeouts.
    pub timeouts: u32,
}

/// Point-in-time view of one device, as published by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub index: DeviceIndex,
    pub mac: MacAddress,
    pub name: String,
    pub fans: u32,
    pub max_fans: u32,
    pub state: SlaveState,
    pub ip: Option<IpAddr>,
    /// Device-side feedback port from its discovery reply.
    pub feedback_port: Option<u16>,
    /// Device-side command port from its discovery reply.
    pub command_port: Option<u16>,
    pub stats: DeviceStats,
}

impl DeviceSnapshot {
    pub fn is_connected(&self) -> bool {
        self.state == SlaveState::Connected
    }
}
