// ── External control service ──
//
// Two tasks sharing nothing but counters: the broadcaster pushes the
// aggregated feedback vector on a period, the listener answers commands.
// Both sockets are bound up front; a bind failure is returned once and
// nothing is spawned.

mod client;
mod handler;
mod window;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use fanfleet_proto::error::is_transient_io;
use fanfleet_proto::{MAX_DATAGRAM, StateBroadcast, transport};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

pub use client::ExternalClient;
pub use window::{IdempotencyWindow, Verdict};

use self::handler::CommandHandler;
use crate::config::ExternalConfig;
use crate::error::CoreError;
use crate::fleet::Fleet;

/// Sequence counters shared between the service tasks.
#[derive(Debug, Default)]
pub(crate) struct ExternalCounters {
    pub(crate) broadcast_seq: AtomicU64,
    pub(crate) listener_seq: AtomicU64,
    pub(crate) listener_last: AtomicU64,
    pub(crate) duplicates: AtomicU64,
}

/// Diagnostic view of the external service's sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExternalStats {
    /// Last state-broadcast sequence sent.
    pub broadcast_seq: u64,
    /// Last reply sequence sent.
    pub listener_seq: u64,
    /// Last accepted command sequence.
    pub listener_last: u64,
    /// Commands dropped by the idempotency window.
    pub duplicates: u64,
}

/// Running external-control service.
pub(crate) struct ExternalService {
    pub(crate) listener_addr: SocketAddr,
    counters: Arc<ExternalCounters>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ExternalService {
    pub(crate) async fn activate(
        fleet: &Arc<Fleet>,
        config: &ExternalConfig,
        cancel: CancellationToken,
    ) -> Result<Self, CoreError> {
        let bind_ip = fleet.config.network.bind_ip;
        let listener = transport::bind(SocketAddr::new(bind_ip, config.listener_port)).await?;
        let listener_addr = listener.local_addr().map_err(|e| CoreError::Network {
            message: e.to_string(),
        })?;
        let sender = transport::bind_broadcast(SocketAddr::new(bind_ip, 0)).await?;

        let counters = Arc::new(ExternalCounters::default());
        let handler = CommandHandler::new(Arc::clone(fleet), Arc::clone(&counters), config.delta);

        let tasks = vec![
            tokio::spawn(listen(listener, handler, config.repeat, cancel.child_token())),
            tokio::spawn(broadcast(
                Arc::clone(fleet),
                sender,
                BroadcastPlan {
                    target: config.broadcast_target,
                    listener_port: listener_addr.port(),
                    period: config.broadcast_period,
                },
                Arc::clone(&counters),
                cancel.child_token(),
            )),
        ];

        info!(listener = %listener_addr, broadcast = %config.broadcast_target, "external control active");
        Ok(Self {
            listener_addr,
            counters,
            cancel,
            tasks,
        })
    }

    pub(crate) fn stats(&self) -> ExternalStats {
        ExternalStats {
            broadcast_seq: self.counters.broadcast_seq.load(Ordering::Relaxed),
            listener_seq: self.counters.listener_seq.load(Ordering::Relaxed),
            listener_last: self.counters.listener_last.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
        }
    }

    /// Stop both tasks and wait for them.
    pub(crate) async fn deactivate(self) {
        self.cancel.cancel();
        for handle in self.tasks {
            let _ = handle.await;
        }
        info!("external control deactivated");
    }
}

// ── Listener ─────────────────────────────────────────────────────────

async fn listen(
    socket: UdpSocket,
    mut handler: CommandHandler,
    repeat: u32,
    cancel: CancellationToken,
) {
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
                error!(error = %e, "external listener failed");
                break;
            }
        };
        let Some(bytes) = buf.get(..len) else {
            continue;
        };
        trace!(%from, datagram = %String::from_utf8_lossy(bytes), "external command");

        let Some(reply) = handler.on_datagram(bytes) else {
            continue;
        };
        // Repeats carry the same sequence number.
        if let Err(e) = transport::send_repeated(&socket, &reply.encode(), from, repeat).await {
            warn!(%from, error = %e, "failed to send external reply");
        }
    }
    debug!("external listener stopped");
}

// ── Broadcaster ──────────────────────────────────────────────────────

struct BroadcastPlan {
    target: SocketAddr,
    listener_port: u16,
    period: std::time::Duration,
}

async fn broadcast(
    fleet: Arc<Fleet>,
    socket: UdpSocket,
    plan: BroadcastPlan,
    counters: Arc<ExternalCounters>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(plan.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let seq = counters.broadcast_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let message = StateBroadcast {
            seq,
            listener_port: plan.listener_port,
            timestamp_ms: Utc::now().timestamp_millis(),
            shape: fleet.mapper.shape(),
            values: fleet.feedback_grid(),
        };

        if let Err(e) = transport::send(&socket, &message.encode(), plan.target).await {
            if e.is_transient() {
                trace!(error = %e, "state broadcast not delivered");
            } else {
                warn!(to = %plan.target, error = %e, "failed to send state broadcast");
            }
        }
    }
    debug!("external broadcaster stopped");
}
