// fanfleet-proto: Wire codec and UDP plumbing shared by the Master and its tooling.

pub mod address;
pub mod device;
pub mod error;
pub mod external;
pub mod frame;
pub mod transport;

pub use address::MacAddress;
pub use device::{DataFrame, DeviceMessage, FanMode, Handshake, HandshakeParams, SlaveCommand};
pub use error::Error;
pub use external::{ExternalReply, ExternalRequest, GridShape, RawCommand, ReplyBody, StateBroadcast};
pub use frame::{DecodeError, Seq};
pub use transport::{MAX_DATAGRAM, RecvFilter, RecvOutcome, Sequenced};
