// ── Device connection worker ──
//
// One task per device for the life of the Master. Each cycle sleeps one
// polling period, takes the device's exclusive lock, and acts on the
// current state: handshake while KNOWN, command/feedback exchange while
// CONNECTED, nothing otherwise. Every wait is bounded.

use std::sync::Arc;
use std::time::Duration;

use fanfleet_proto::transport::{self, RecvFilter, RecvOutcome};
use fanfleet_proto::{DeviceMessage, Handshake, HandshakeParams, MAX_DATAGRAM, Sequenced};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fleet::Fleet;
use crate::model::{Feedback, FleetEvent, SlaveState, Transition};
use crate::store::{DeviceSession, DeviceSlot, SocketPair};

pub(crate) async fn run(fleet: Arc<Fleet>, slot: Arc<DeviceSlot>, cancel: CancellationToken) {
    let period = fleet.config.timing.period;
    let mut buf = vec![0u8; MAX_DATAGRAM];
    debug!(mac = %slot.mac, index = slot.index, "connection worker started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            () = tokio::time::sleep(period) => {}
        }

        let mut session = slot.session.lock().await;
        match session.state {
            SlaveState::Known => handshake(&fleet, &slot, &mut session, &mut buf).await,
            SlaveState::Connected => exchange(&fleet, &slot, &mut session, &mut buf).await,
            SlaveState::Available | SlaveState::Disconnected | SlaveState::Updating => {}
        }
    }

    // Shutdown: tell a live device the session is over.
    let mut session = slot.session.lock().await;
    if session.state.is_active() {
        fleet.send_terminate(&slot, &mut session).await;
        settle(&fleet, &slot, &mut session, Transition::Terminated);
    }
    debug!(mac = %slot.mac, "connection worker stopped");
}

// ── KNOWN ────────────────────────────────────────────────────────────

async fn handshake(fleet: &Fleet, slot: &DeviceSlot, session: &mut DeviceSession, buf: &mut [u8]) {
    let timing = &fleet.config.timing;

    if session.sockets.is_none() {
        match SocketPair::open(fleet.config.network.bind_ip).await {
            Ok(pair) => session.sockets = Some(pair),
            Err(e) => {
                warn!(mac = %slot.mac, error = %e, "cannot open device sockets");
                settle(fleet, slot, session, Transition::HandshakeFailed);
                return;
            }
        }
    }

    let (Some(target), Some(ip)) = (session.command_target(), session.ip) else {
        warn!(mac = %slot.mac, "device has no network address");
        settle(fleet, slot, session, Transition::HandshakeFailed);
        return;
    };
    let Some(sockets) = session.sockets.as_ref() else {
        return;
    };

    // Handshakes are unordered and always travel with sequence 0.
    let probe = DeviceMessage::Handshake(Handshake {
        feedback_port: sockets.feedback_port,
        command_port: sockets.command_port,
        period_ms: millis(timing.period),
        params: HandshakeParams {
            active_fans: slot.fans,
            ..fleet.config.fans.clone()
        },
    });

    let acked = match transport::send(&sockets.mosi, &probe.encode(), target).await {
        Err(e) => {
            warn!(mac = %slot.mac, error = %e, "failed to send handshake");
            false
        }
        Ok(()) => {
            let deadline = Instant::now() + timing.handshake_timeout;
            let filter = RecvFilter {
                after: None,
                source: Some(ip),
            };
            loop {
                let outcome =
                    transport::recv_newer(&sockets.miso, buf, deadline, filter, DeviceMessage::decode)
                        .await;
                match outcome {
                    Ok(RecvOutcome::Received {
                        message: DeviceMessage::HandshakeAck { .. },
                        ..
                    }) => break true,
                    Ok(RecvOutcome::Received { message, .. }) => {
                        debug!(mac = %slot.mac, kind = message.kind(), "ignoring message while handshaking");
                    }
                    Ok(RecvOutcome::TimedOut) => {
                        warn!(mac = %slot.mac, "handshake timed out");
                        break false;
                    }
                    Ok(RecvOutcome::Malformed { discarded }) => {
                        warn!(mac = %slot.mac, discarded, "handshake answered with malformed datagrams");
                        break false;
                    }
                    Err(e) => {
                        warn!(mac = %slot.mac, error = %e, "handshake receive failed");
                        break false;
                    }
                }
            }
        }
    };

    let transition = if acked {
        Transition::HandshakeAcked
    } else {
        Transition::HandshakeFailed
    };
    settle(fleet, slot, session, transition);
}

// ── CONNECTED ────────────────────────────────────────────────────────

async fn exchange(fleet: &Fleet, slot: &DeviceSlot, session: &mut DeviceSession, buf: &mut [u8]) {
    let (Some(target), Some(ip)) = (session.command_target(), session.ip) else {
        return;
    };

    let poll = slot.outbound.take().map(|command| {
        let seq = session.next_out_seq();
        DeviceMessage::Poll { seq, command }.encode()
    });

    let Some(sockets) = session.sockets.as_ref() else {
        return;
    };
    if let Some(poll) = &poll {
        if let Err(e) = transport::send(&sockets.mosi, poll, target).await {
            warn!(mac = %slot.mac, error = %e, "failed to send command");
        }
    }

    let filter = RecvFilter {
        after: Some(session.stats.in_seq),
        source: Some(ip),
    };
    let deadline = Instant::now() + fleet.config.timing.receive_timeout;
    let outcome =
        transport::recv_newer(&sockets.miso, buf, deadline, filter, DeviceMessage::decode).await;

    match outcome {
        Ok(RecvOutcome::Received { message, .. }) => accept(fleet, slot, session, message),
        Ok(RecvOutcome::TimedOut) => {
            timed_out(fleet, slot, session, poll.as_deref()).await;
        }
        Ok(RecvOutcome::Malformed { discarded }) => {
            warn!(mac = %slot.mac, discarded, "feedback was malformed");
            timed_out(fleet, slot, session, poll.as_deref()).await;
        }
        Err(e) => {
            warn!(mac = %slot.mac, error = %e, "feedback receive failed");
            timed_out(fleet, slot, session, poll.as_deref()).await;
        }
    }
}

/// A valid message newer than the last accepted one.
fn accept(fleet: &Fleet, slot: &DeviceSlot, session: &mut DeviceSession, message: DeviceMessage) {
    session.stats.in_seq = message.seq();
    session.stats.timeouts = 0;

    match message {
        DeviceMessage::Data { frame, .. } => {
            let last = session.stats.data_index;
            if frame.index <= last {
                debug!(mac = %slot.mac, index = frame.index, last, "feedback is not fresher, skipped");
                return;
            }
            session.stats.data_index = frame.index;

            let feedback = Arc::new(Feedback::from_frame(frame));
            fleet.feedback.replace(slot.index, Arc::clone(&feedback));
            if slot.inbound.try_put(feedback).is_err() {
                session.stats.drops += 1;
                debug!(mac = %slot.mac, drops = session.stats.drops, "inbound mailbox full, feedback dropped");
            }

            fleet.registry.publish(slot, session);
            fleet.emit(FleetEvent::FeedbackUpdated {
                index: slot.index,
                mac: slot.mac.clone(),
                data_index: session.stats.data_index,
            });
        }
        DeviceMessage::Terminate { .. } => {
            info!(mac = %slot.mac, "device ended the session");
            settle(fleet, slot, session, Transition::Terminated);
        }
        other => {
            debug!(mac = %slot.mac, kind = other.kind(), "unexpected message while connected");
        }
    }
}

/// Count a cycle without feedback. Resends this cycle's command once, or
/// drops the connection when the threshold is reached.
async fn timed_out(fleet: &Fleet, slot: &DeviceSlot, session: &mut DeviceSession, poll: Option<&str>) {
    session.stats.timeouts += 1;
    let timeouts = session.stats.timeouts;
    let max = fleet.config.timing.max_timeouts;
    warn!(mac = %slot.mac, timeouts, max, "no feedback this cycle");

    if timeouts >= max {
        fleet.send_terminate(slot, session).await;
        settle(fleet, slot, session, Transition::ConnectionLost);
        fleet.emit(FleetEvent::ConnectionLost {
            index: slot.index,
            mac: slot.mac.clone(),
            timeouts,
        });
        return;
    }

    if let (Some(poll), Some(target), Some(sockets)) =
        (poll, session.command_target(), session.sockets.as_ref())
    {
        debug!(mac = %slot.mac, "resending command");
        if let Err(e) = transport::send(&sockets.mosi, poll, target).await {
            debug!(mac = %slot.mac, error = %e, "resend failed");
        }
    }
    fleet.registry.publish(slot, session);
}

// ── Helpers ──────────────────────────────────────────────────────────

fn settle(fleet: &Fleet, slot: &DeviceSlot, session: &mut DeviceSession, transition: Transition) {
    if let Err(e) = fleet.transition(slot, session, transition) {
        warn!(error = %e, "transition rejected");
    }
}

fn millis(period: Duration) -> u32 {
    u32::try_from(period.as_millis()).unwrap_or(u32::MAX)
}
