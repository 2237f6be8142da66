#![allow(clippy::unwrap_used)]
// Loopback scenarios: a simulated Slave and external client talk to a
// running Master over real UDP sockets on 127.0.0.1.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use fanfleet_core::{
    CoreError, DeviceFilter, ExternalClient, ExternalConfig, ExternalRequest, FleetEvent,
    GridShape, MacAddress, Master, MasterConfig, SlaveCommand, SlaveState,
};
use fanfleet_proto::{DeviceMessage, StateBroadcast};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::timeout;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const PASSCODE: &str = "tunnel";
const WAIT: Duration = Duration::from_secs(5);
const MAC: &str = "AA:BB:CC:00:00:01";

/// One Slave as seen from the network: an invitation socket and the
/// socket it receives commands on.
struct SimSlave {
    discovery: UdpSocket,
    commands: UdpSocket,
    feedback: UdpSocket,
    buf: Vec<u8>,
}

impl SimSlave {
    async fn bind() -> Self {
        Self {
            discovery: UdpSocket::bind((LOCALHOST, 0)).await.unwrap(),
            commands: UdpSocket::bind((LOCALHOST, 0)).await.unwrap(),
            feedback: UdpSocket::bind((LOCALHOST, 0)).await.unwrap(),
            buf: vec![0u8; 65_536],
        }
    }

    fn discovery_port(&self) -> u16 {
        self.discovery.local_addr().unwrap().port()
    }

    /// Wait for an invitation and return `(passcode, listener_port)`.
    async fn invitation(&mut self) -> (String, u16) {
        let len = timeout(WAIT, self.discovery.recv(&mut self.buf))
            .await
            .unwrap()
            .unwrap();
        match DeviceMessage::decode(&self.buf[..len]).unwrap() {
            DeviceMessage::Invitation {
                passcode,
                listener_port,
            } => (passcode, listener_port),
            other => panic!("expected an invitation, got {other:?}"),
        }
    }

    async fn reply(&mut self, passcode: &str) {
        let (_, listener_port) = self.invitation().await;
        let reply = DeviceMessage::InvitationReply {
            passcode: passcode.into(),
            mac: MacAddress::parse(MAC).unwrap(),
            feedback_port: self.feedback.local_addr().unwrap().port(),
            command_port: self.commands.local_addr().unwrap().port(),
        };
        self.discovery
            .send_to(reply.encode().as_bytes(), (LOCALHOST, listener_port))
            .await
            .unwrap();
    }

    /// Next datagram from the Master on the command socket.
    async fn command(&mut self) -> DeviceMessage {
        let len = timeout(WAIT, self.commands.recv(&mut self.buf))
            .await
            .unwrap()
            .unwrap();
        DeviceMessage::decode(&self.buf[..len]).unwrap()
    }

    /// Answer the handshake; returns the Master's feedback address.
    async fn accept_handshake(&mut self) -> SocketAddr {
        let DeviceMessage::Handshake(hsk) = self.command().await else {
            panic!("expected a handshake");
        };
        let miso = SocketAddr::new(LOCALHOST, hsk.feedback_port);
        self.send(miso, "1|SHSK").await;
        miso
    }

    async fn send(&self, to: SocketAddr, datagram: &str) {
        self.feedback.send_to(datagram.as_bytes(), to).await.unwrap();
    }
}

fn config(slave: &SimSlave) -> MasterConfig {
    let mut config = MasterConfig {
        shape: GridShape::new(1, 2, 1),
        external: None,
        ..MasterConfig::default()
    };
    config.network.bind_ip = LOCALHOST;
    config.network.broadcast_ip = LOCALHOST;
    config.network.discovery_port = slave.discovery_port();
    config.network.listener_port = 0;
    config.network.broadcast_period = Duration::from_millis(50);
    config.network.passcode = SecretString::from(PASSCODE);
    config.timing.period = Duration::from_millis(20);
    config.timing.receive_timeout = Duration::from_millis(50);
    config.timing.max_timeouts = 100;
    config.fans.active_fans = 2;
    config
}

async fn wait_state(master: &Master, state: SlaveState) {
    let mut devices = master.devices();
    let filter = DeviceFilter::ByState(state);
    timeout(WAIT, devices.wait_for(&filter))
        .await
        .unwrap()
        .unwrap();
}

/// Data index of the next accepted feedback.
async fn next_data_index(events: &mut broadcast::Receiver<FleetEvent>) -> u64 {
    timeout(WAIT, async {
        loop {
            if let FleetEvent::FeedbackUpdated { data_index, .. } = events.recv().await.unwrap() {
                return data_index;
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn discovery_handshake_and_feedback() {
    let mut slave = SimSlave::bind().await;
    let master = Master::new(config(&slave));
    let mut events = master.events();
    master.start().await.unwrap();

    let (passcode, _) = slave.invitation().await;
    assert_eq!(passcode, PASSCODE);

    slave.reply(PASSCODE).await;
    wait_state(&master, SlaveState::Available).await;

    let mac = MacAddress::parse(MAC).unwrap();
    assert_eq!(master.approve(&mac).await.unwrap(), SlaveState::Known);

    let miso = slave.accept_handshake().await;
    wait_state(&master, SlaveState::Connected).await;

    slave.send(miso, "2|STD|1|1000,1100|0.5,0.5").await;
    assert_eq!(next_data_index(&mut events).await, 1);
    assert_eq!(master.feedback(), vec![1000, 1100]);
    assert_eq!(master.take_feedback(&mac).unwrap().unwrap().data_index, 1);

    // Same data index, newer sequence: not fresher, skipped.
    slave.send(miso, "3|STD|1|9999,9999|0.5,0.5").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(master.feedback(), vec![1000, 1100]);

    slave.send(miso, "4|STD|2|1200,1300|0.5,0.5").await;
    assert_eq!(next_data_index(&mut events).await, 2);
    assert_eq!(master.feedback(), vec![1200, 1300]);
    assert_eq!(master.device_feedback(&mac).unwrap().rpms, vec![1200, 1300]);
    // Every reading was taken before the next arrived.
    assert_eq!(master.device(&mac).unwrap().stats.drops, 0);

    master.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lost_connection_terminates_and_rediscovery_rearms() {
    let mut slave = SimSlave::bind().await;
    let mut config = config(&slave);
    config.timing.max_timeouts = 3;
    config.auto_approve = true;
    let master = Master::new(config);
    let mut events = master.events();
    master.start().await.unwrap();

    slave.reply(PASSCODE).await;
    slave.accept_handshake().await;
    wait_state(&master, SlaveState::Connected).await;

    // Silence until the Master gives up.
    assert!(matches!(
        slave.command().await,
        DeviceMessage::Terminate { .. }
    ));
    wait_state(&master, SlaveState::Disconnected).await;
    let timeouts = timeout(WAIT, async {
        loop {
            if let FleetEvent::ConnectionLost { timeouts, .. } = events.recv().await.unwrap() {
                return timeouts;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(timeouts, 3);

    slave.reply(PASSCODE).await;
    assert!(matches!(slave.command().await, DeviceMessage::Handshake(_)));

    master.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_mode_pauses_polling_and_clears_feedback_on_exit() {
    let mut slave = SimSlave::bind().await;
    let mut config = config(&slave);
    config.auto_approve = true;
    let master = Master::new(config);
    let mut events = master.events();
    master.start().await.unwrap();
    let mac = MacAddress::parse(MAC).unwrap();

    slave.reply(PASSCODE).await;
    let miso = slave.accept_handshake().await;
    wait_state(&master, SlaveState::Connected).await;
    slave.send(miso, "2|STD|1|1000,1100|0.5,0.5").await;
    assert_eq!(next_data_index(&mut events).await, 1);

    assert_eq!(master.begin_update(&mac).await.unwrap(), SlaveState::Updating);
    master.send_command(&mac, SlaveCommand::Uniform(0.5)).unwrap();

    // No polls while updating: the command stays queued.
    let polled = timeout(
        Duration::from_millis(200),
        slave.commands.recv(&mut slave.buf),
    )
    .await;
    assert!(polled.is_err());
    assert_eq!(
        master.pending_command(&mac).unwrap(),
        Some(SlaveCommand::Uniform(0.5))
    );
    assert_eq!(master.feedback(), vec![1000, 1100]);

    assert_eq!(master.end_update(&mac).await.unwrap(), SlaveState::Disconnected);
    assert_eq!(master.feedback(), vec![-1, -1]);
    assert!(master.device_feedback(&mac).is_none());

    master.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_passcode_is_ignored() {
    let mut slave = SimSlave::bind().await;
    let master = Master::new(config(&slave));
    master.start().await.unwrap();

    slave.reply("intruder").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(master.devices_snapshot().is_empty());

    master.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_sends_terminate_to_connected_device() {
    let mut slave = SimSlave::bind().await;
    let mut config = config(&slave);
    config.auto_approve = true;
    let master = Master::new(config);
    master.start().await.unwrap();

    slave.reply(PASSCODE).await;
    let miso = slave.accept_handshake().await;
    wait_state(&master, SlaveState::Connected).await;
    slave.send(miso, "2|STD|1|1000,1100|0.5,0.5").await;

    master.shutdown().await;
    loop {
        if matches!(slave.command().await, DeviceMessage::Terminate { .. }) {
            break;
        }
    }
}

// ── External control ─────────────────────────────────────────────────

async fn external_master() -> (Master, UdpSocket) {
    let sink = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let slave = SimSlave::bind().await;
    let mut config = config(&slave);
    config.shape = GridShape::new(2, 2, 1);
    config.external = Some(ExternalConfig {
        listener_port: 0,
        broadcast_target: sink.local_addr().unwrap(),
        broadcast_period: Duration::from_millis(20),
        ..ExternalConfig::default()
    });
    let master = Master::new(config);
    master.start().await.unwrap();
    (master, sink)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn external_client_queries_and_rejections() {
    let (master, _sink) = external_master().await;
    let addr = master.external_addr().await.unwrap();
    let mut client = ExternalClient::connect(addr, WAIT).await.unwrap();

    assert_eq!(
        client.value(&ExternalRequest::Feedback).await.unwrap(),
        "-1,-1,-1,-1"
    );
    assert_eq!(
        client
            .value(&ExternalRequest::ProfileAttribute("dimensions".into()))
            .await
            .unwrap(),
        "2x2x1"
    );

    let err = client
        .value(&ExternalRequest::DutyCycleVector(vec![0.5, 0.5, 0.5]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Rejected { .. }));

    let err = client
        .value(&ExternalRequest::DutyCycleUniform(1.5))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Rejected { .. }));

    master.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn external_state_broadcast_reaches_target() {
    let (master, sink) = external_master().await;
    let mut buf = vec![0u8; 65_536];

    let len = timeout(WAIT, sink.recv(&mut buf)).await.unwrap().unwrap();
    let state = StateBroadcast::decode(&buf[..len]).unwrap();
    assert_eq!(state.shape, GridShape::new(2, 2, 1));
    assert_eq!(state.values, vec![-1; 4]);
    assert_eq!(
        state.listener_port,
        master.external_addr().await.unwrap().port()
    );

    master.shutdown().await;
}

async fn recv_text(socket: &UdpSocket, buf: &mut [u8]) -> String {
    let len = timeout(WAIT, socket.recv(buf)).await.unwrap().unwrap();
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_command_gets_no_reply() {
    let (master, _sink) = external_master().await;
    let addr = master.external_addr().await.unwrap();
    let raw = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let mut buf = vec![0u8; 65_536];

    raw.send_to(b"10|N", addr).await.unwrap();
    // Each reply travels twice with the same sequence number.
    let first = recv_text(&raw, &mut buf).await;
    assert!(first.ends_with("|N|"), "unexpected reply {first}");
    assert_eq!(recv_text(&raw, &mut buf).await, first);

    raw.send_to(b"10|N", addr).await.unwrap();
    raw.send_to(b"11|S", addr).await.unwrap();
    let next = recv_text(&raw, &mut buf).await;
    assert!(next.ends_with("|S|"), "duplicate was answered: {next}");
    assert_eq!(master.external_stats().await.unwrap().duplicates, 1);

    master.shutdown().await;
}
