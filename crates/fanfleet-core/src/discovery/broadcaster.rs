use std::net::SocketAddr;
use std::time::Duration;

use fanfleet_proto::transport;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Copies of the invitation sent each period.
const INVITATION_REPEAT: u32 = 2;

/// Periodically broadcast `invitation` while `enabled` is true.
///
/// Toggling `enabled` pauses and resumes sending without touching the
/// socket.
pub(crate) async fn run(
    socket: UdpSocket,
    invitation: String,
    target: SocketAddr,
    period: Duration,
    enabled: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if !*enabled.borrow() {
            continue;
        }

        if let Err(e) =
            transport::send_repeated(&socket, &invitation, target, INVITATION_REPEAT).await
        {
            if e.is_transient() {
                debug!(error = %e, "invitation not delivered");
            } else {
                warn!(error = %e, to = %target, "failed to broadcast invitation");
            }
        }
    }
    debug!("discovery broadcaster stopped");
}
