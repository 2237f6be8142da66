use std::sync::Arc;

use fanfleet_proto::error::is_transient_io;
use fanfleet_proto::{DeviceMessage, MAX_DATAGRAM};
use secrecy::ExposeSecret;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::fleet::Fleet;

/// Receive invitation replies until cancelled.
///
/// Replies with the wrong passcode or a malformed field are logged and
/// dropped; valid ones go to [`Fleet::discovered`].
pub(crate) async fn run(fleet: Arc<Fleet>, socket: UdpSocket, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = socket.recv_from(&mut buf) => r,
        };

        let (len, from) = match received {
            Ok(ok) => ok,
            Err(e) if is_transient_io(&e) => {
                trace!(error = %e, "transient receive error");
                continue;
            }
            Err(e) => {
                error!(error = %e, "discovery listener failed");
                break;
            }
        };
        let Some(bytes) = buf.get(..len) else {
            continue;
        };
        trace!(%from, datagram = %String::from_utf8_lossy(bytes), "discovery datagram");

        match DeviceMessage::decode(bytes) {
            Ok(DeviceMessage::InvitationReply {
                passcode,
                mac,
                feedback_port,
                command_port,
            }) => {
                if passcode != fleet.config.network.passcode.expose_secret() {
                    warn!(%from, %mac, "discovery reply with wrong passcode");
                    continue;
                }
                fleet
                    .discovered(mac, from.ip(), feedback_port, command_port)
                    .await;
            }
            Ok(other) => {
                debug!(%from, kind = other.kind(), "ignoring non-reply on discovery listener");
            }
            Err(e) => {
                warn!(%from, error = %e, "discarding malformed discovery reply");
            }
        }
    }
    debug!("discovery listener stopped");
}
