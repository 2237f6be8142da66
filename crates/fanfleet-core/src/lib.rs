// fanfleet-core: Fleet management between the wire codec and consumers (CLI, automation).

pub mod config;
pub mod error;
pub mod external;
pub mod mapper;
pub mod model;
pub mod stream;

mod discovery;
mod fleet;
mod master;
mod store;
mod worker;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ExternalConfig, MasterConfig, NetworkConfig, SlaveSpec, TimingConfig};
pub use error::CoreError;
pub use external::{ExternalClient, ExternalStats};
pub use mapper::{GridMapper, NO_READING, SequentialMapper};
pub use master::Master;
pub use model::{
    DeviceIndex, DeviceSnapshot, DeviceStats, Feedback, FleetEvent, SlaveState, Transition,
};
pub use store::{FeedbackVector, Mailbox};
pub use stream::{DeviceFilter, DeviceStream};

// Wire types consumers need alongside the core API.
pub use fanfleet_proto::{
    ExternalReply, ExternalRequest, FanMode, GridShape, HandshakeParams, MacAddress, SlaveCommand,
};
