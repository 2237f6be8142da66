// ── Filter predicates for device streams ──

use fanfleet_proto::MacAddress;

use crate::model::{DeviceSnapshot, SlaveState};

/// Filter predicate for device snapshots.
pub enum DeviceFilter {
    All,
    ByState(SlaveState),
    ByMac(MacAddress),
    /// `KNOWN` or `CONNECTED`: the worker is exchanging traffic.
    Active,
    Connected,
    Custom(Box<dyn Fn(&DeviceSnapshot) -> bool + Send + Sync>),
}

impl DeviceFilter {
    pub fn matches(&self, device: &DeviceSnapshot) -> bool {
        match self {
            Self::All => true,
            Self::ByState(state) => device.state == *state,
            Self::ByMac(mac) => device.mac == *mac,
            Self::Active => device.state.is_active(),
            Self::Connected => device.is_connected(),
            Self::Custom(f) => f(device),
        }
    }
}
