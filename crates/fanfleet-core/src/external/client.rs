use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use chrono::Utc;
use fanfleet_proto::transport::{self, RecvFilter, RecvOutcome};
use fanfleet_proto::{ExternalReply, ExternalRequest, MAX_DATAGRAM, ReplyBody, Seq};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CoreError;

/// Client side of the external-control protocol.
///
/// Frames each request with its own increasing sequence number and waits
/// (bounded) for the matching reply. Redundant copies of a reply are
/// skipped by sequence.
pub struct ExternalClient {
    socket: UdpSocket,
    target: SocketAddr,
    next_seq: Seq,
    last_reply: Option<Seq>,
    timeout: Duration,
    buf: Vec<u8>,
}

impl ExternalClient {
    /// Bind an ephemeral socket for talking to the listener at `target`.
    ///
    /// The first sequence number is derived from the clock, so successive
    /// short-lived clients stay ahead of the listener's window.
    pub async fn connect(target: SocketAddr, timeout: Duration) -> Result<Self, CoreError> {
        let any = match target.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = transport::bind(SocketAddr::new(any, 0)).await?;
        let next_seq = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(1);

        Ok(Self {
            socket,
            target,
            next_seq,
            last_reply: None,
            timeout,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    /// Start numbering requests at `seq` instead of the clock.
    pub fn with_seq(mut self, seq: Seq) -> Self {
        self.next_seq = seq;
        self
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send one request and wait for its reply.
    pub async fn request(&mut self, request: &ExternalRequest) -> Result<ExternalReply, CoreError> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1).max(1);

        let frame = request.encode(seq);
        debug!(seq, code = request.code(), to = %self.target, "sending external command");
        transport::send(&self.socket, &frame, self.target).await?;

        let filter = RecvFilter {
            after: self.last_reply,
            source: Some(self.target.ip()),
        };
        let deadline = Instant::now() + self.timeout;
        let outcome = transport::recv_newer(
            &self.socket,
            &mut self.buf,
            deadline,
            filter,
            ExternalReply::decode,
        )
        .await?;

        match outcome {
            RecvOutcome::Received { message, .. } => {
                self.last_reply = Some(message.seq);
                Ok(message)
            }
            RecvOutcome::TimedOut => Err(CoreError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvOutcome::Malformed { discarded } => Err(CoreError::Protocol {
                message: format!("{discarded} undecodable reply datagram(s)"),
            }),
        }
    }

    /// Like [`request`](Self::request), but turns an `ERROR` reply into
    /// [`CoreError::Rejected`] and returns only the value.
    pub async fn value(&mut self, request: &ExternalRequest) -> Result<String, CoreError> {
        match self.request(request).await?.body {
            ReplyBody::Value { value, .. } => Ok(value),
            ReplyBody::Error(message) => Err(CoreError::Rejected { message }),
        }
    }
}
