use std::net::SocketAddr;

use thiserror::Error;

/// Top-level error type for the `fanfleet-proto` crate.
///
/// Covers socket-level failures only. Malformed datagrams are never an
/// `Error` -- they surface as [`DecodeError`](crate::DecodeError) or as
/// [`RecvOutcome::Malformed`](crate::RecvOutcome::Malformed) so a receive
/// loop can keep running. `fanfleet-core` maps these into user-facing errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Socket setup ────────────────────────────────────────────────
    /// Binding failed (address in use, permission denied, ...).
    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Setting a socket option (e.g. `SO_BROADCAST`) failed.
    #[error("Failed to set socket option {option}: {source}")]
    SocketOption {
        option: &'static str,
        #[source]
        source: std::io::Error,
    },

    // ── Traffic ─────────────────────────────────────────────────────
    /// A datagram could not be sent.
    #[error("Failed to send datagram to {target}: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The socket returned a hard error while receiving.
    #[error("Failed to receive datagram: {0}")]
    Receive(#[source] std::io::Error),
}

impl Error {
    /// Returns `true` if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Send { source, .. } | Self::Receive(source) => is_transient_io(source),
            Self::Bind { .. } | Self::SocketOption { .. } => false,
        }
    }
}

/// ICMP-driven errors that UDP sockets report on the *next* call.
pub fn is_transient_io(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted
    )
}
