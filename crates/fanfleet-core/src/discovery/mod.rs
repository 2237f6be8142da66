// ── Discovery ──
//
// The broadcaster invites Slaves; the listener turns their replies into
// registry entries. Both sockets are bound before either task starts, so
// activation either fully succeeds or reports the bind error.

mod broadcaster;
mod listener;

use std::net::SocketAddr;
use std::sync::Arc;

use fanfleet_proto::{DeviceMessage, transport};
use secrecy::ExposeSecret;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CoreError;
use crate::fleet::Fleet;

/// Running discovery service.
pub(crate) struct Discovery {
    pub(crate) listener_addr: SocketAddr,
    pub(crate) tasks: Vec<JoinHandle<()>>,
}

pub(crate) async fn activate(
    fleet: &Arc<Fleet>,
    enabled: watch::Receiver<bool>,
    cancel: &CancellationToken,
) -> Result<Discovery, CoreError> {
    let network = &fleet.config.network;

    let listener = transport::bind(SocketAddr::new(network.bind_ip, network.listener_port)).await?;
    let listener_addr = listener.local_addr().map_err(|e| CoreError::Network {
        message: e.to_string(),
    })?;
    let sender = transport::bind_broadcast(SocketAddr::new(network.bind_ip, 0)).await?;

    let invitation = DeviceMessage::Invitation {
        passcode: network.passcode.expose_secret().to_owned(),
        listener_port: listener_addr.port(),
    }
    .encode();
    let target = SocketAddr::new(network.broadcast_ip, network.discovery_port);

    let tasks = vec![
        tokio::spawn(listener::run(
            Arc::clone(fleet),
            listener,
            cancel.child_token(),
        )),
        tokio::spawn(broadcaster::run(
            sender,
            invitation,
            target,
            network.broadcast_period,
            enabled,
            cancel.child_token(),
        )),
    ];

    info!(listener = %listener_addr, broadcast = %target, "discovery active");
    Ok(Discovery {
        listener_addr,
        tasks,
    })
}
