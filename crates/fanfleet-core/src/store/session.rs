// ── Per-device session ──
//
// Everything guarded by a device's exclusive lock: lifecycle state,
// network fields, sockets and sequencing counters.

use std::net::{IpAddr, SocketAddr};

use fanfleet_proto::transport;
use tokio::net::UdpSocket;

use crate::model::{DeviceStats, SlaveState};

/// The device's private sockets.
#[derive(Debug)]
pub(crate) struct SocketPair {
    /// Feedback channel: the device sends here.
    pub(crate) miso: UdpSocket,
    /// Command channel: handshakes, polls and terminations leave from here.
    pub(crate) mosi: UdpSocket,
    pub(crate) feedback_port: u16,
    pub(crate) command_port: u16,
}

impl SocketPair {
    pub(crate) async fn open(bind_ip: IpAddr) -> Result<Self, fanfleet_proto::Error> {
        let miso = transport::bind(SocketAddr::new(bind_ip, 0)).await?;
        let mosi = transport::bind(SocketAddr::new(bind_ip, 0)).await?;
        let feedback_port = local_port(&miso);
        let command_port = local_port(&mosi);
        Ok(Self {
            miso,
            mosi,
            feedback_port,
            command_port,
        })
    }
}

fn local_port(socket: &UdpSocket) -> u16 {
    socket.local_addr().map(|a| a.port()).unwrap_or_default()
}

#[derive(Debug)]
pub(crate) struct DeviceSession {
    pub(crate) state: SlaveState,
    pub(crate) ip: Option<IpAddr>,
    pub(crate) feedback_port: Option<u16>,
    pub(crate) command_port: Option<u16>,
    pub(crate) sockets: Option<SocketPair>,
    pub(crate) stats: DeviceStats,
}

impl DeviceSession {
    pub(crate) fn new(state: SlaveState) -> Self {
        Self {
            state,
            ip: None,
            feedback_port: None,
            command_port: None,
            sockets: None,
            stats: DeviceStats::default(),
        }
    }

    pub(crate) fn set_network(&mut self, ip: IpAddr, feedback_port: u16, command_port: u16) {
        self.ip = Some(ip);
        self.feedback_port = Some(feedback_port);
        self.command_port = Some(command_port);
    }

    /// Where commands to the device go.
    pub(crate) fn command_target(&self) -> Option<SocketAddr> {
        Some(SocketAddr::new(self.ip?, self.command_port?))
    }

    pub(crate) fn next_out_seq(&mut self) -> u64 {
        self.stats.out_seq += 1;
        self.stats.out_seq
    }
}
