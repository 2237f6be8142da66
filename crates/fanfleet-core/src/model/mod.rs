// ── Domain model ──

mod device;
mod event;
mod feedback;
mod state;

pub use device::{DeviceIndex, DeviceSnapshot, DeviceStats};
pub use event::FleetEvent;
pub use feedback::Feedback;
pub use state::{SlaveState, Transition};
