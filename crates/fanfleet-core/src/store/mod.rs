// ── Shared device state ──

mod feedback;
mod mailbox;
mod registry;
mod session;

pub use feedback::FeedbackVector;
pub use mailbox::Mailbox;
pub(crate) use registry::{DeviceSlot, NewDevice, Registry};
pub(crate) use session::{DeviceSession, SocketPair};
