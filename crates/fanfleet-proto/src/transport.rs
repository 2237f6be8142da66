// Shared UDP plumbing for both protocol families.
//
// Socket binding, repeated sends, and the bounded "receive the next newer
// message" scan every receiver in the Master is built on.

use std::net::{IpAddr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::error::{Error, is_transient_io};
use crate::frame::{DecodeError, Seq};

/// Largest datagram any receiver accepts.
pub const MAX_DATAGRAM: usize = 65_536;

/// Anything that carries a sequence number in its first field.
pub trait Sequenced {
    fn seq(&self) -> Seq;
}

/// Result of one bounded receive.
///
/// `TimedOut` and `Malformed` both count as a timeout for retry purposes;
/// they are kept apart so callers can log them differently.
#[derive(Debug)]
pub enum RecvOutcome<T> {
    /// A valid message newer than the caller's last accepted sequence.
    Received { message: T, from: SocketAddr },
    /// Nothing newer arrived before the deadline.
    TimedOut,
    /// Datagrams arrived but none of them decoded.
    Malformed { discarded: usize },
}

impl<T> RecvOutcome<T> {
    pub fn is_received(&self) -> bool {
        matches!(self, Self::Received { .. })
    }
}

/// Which datagrams a receive should consider.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecvFilter {
    /// Only accept messages with a sequence strictly greater than this.
    pub after: Option<Seq>,
    /// Only accept datagrams from this address.
    pub source: Option<IpAddr>,
}

/// Bind a UDP socket, mapping failures to [`Error::Bind`].
pub async fn bind(addr: SocketAddr) -> Result<UdpSocket, Error> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })
}

/// Bind a UDP socket that may send to broadcast addresses.
pub async fn bind_broadcast(addr: SocketAddr) -> Result<UdpSocket, Error> {
    let socket = bind(addr).await?;
    socket
        .set_broadcast(true)
        .map_err(|source| Error::SocketOption {
            option: "SO_BROADCAST",
            source,
        })?;
    Ok(socket)
}

/// Send one datagram.
pub async fn send(socket: &UdpSocket, payload: &str, target: SocketAddr) -> Result<(), Error> {
    tracing::trace!(to = %target, payload, "sending datagram");
    socket
        .send_to(payload.as_bytes(), target)
        .await
        .map(|_| ())
        .map_err(|source| Error::Send { target, source })
}

/// Send the same datagram `times` times (at least once).
pub async fn send_repeated(
    socket: &UdpSocket,
    payload: &str,
    target: SocketAddr,
    times: u32,
) -> Result<(), Error> {
    for _ in 0..times.max(1) {
        send(socket, payload, target).await?;
    }
    Ok(())
}

/// Receive until a valid, newer message arrives or `deadline` passes.
///
/// Datagrams from other sources and messages whose sequence is not newer
/// than `filter.after` are skipped and the scan continues. Undecodable
/// datagrams are counted and logged but never end the scan early.
pub async fn recv_newer<T, F>(
    socket: &UdpSocket,
    buf: &mut [u8],
    deadline: Instant,
    filter: RecvFilter,
    decode: F,
) -> Result<RecvOutcome<T>, Error>
where
    T: Sequenced,
    F: Fn(&[u8]) -> Result<T, DecodeError>,
{
    let mut discarded = 0usize;

    loop {
        let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(buf)).await {
            Err(_elapsed) => break,
            Ok(Ok(received)) => received,
            Ok(Err(e)) if is_transient_io(&e) => {
                tracing::trace!(error = %e, "transient receive error");
                continue;
            }
            Ok(Err(e)) => return Err(Error::Receive(e)),
        };

        if let Some(expected) = filter.source {
            if from.ip() != expected {
                tracing::trace!(%from, %expected, "ignoring datagram from unexpected source");
                continue;
            }
        }

        let Some(bytes) = buf.get(..len) else {
            continue;
        };

        match decode(bytes) {
            Ok(message) => {
                if let Some(last) = filter.after {
                    let seq = message.seq();
                    if seq <= last {
                        tracing::debug!(seq, last, %from, "discarding stale datagram");
                        continue;
                    }
                }
                return Ok(RecvOutcome::Received { message, from });
            }
            Err(e) => {
                discarded += 1;
                tracing::warn!(
                    error = %e,
                    %from,
                    datagram = %String::from_utf8_lossy(bytes),
                    "discarding malformed datagram"
                );
            }
        }
    }

    Ok(if discarded > 0 {
        RecvOutcome::Malformed { discarded }
    } else {
        RecvOutcome::TimedOut
    })
}
