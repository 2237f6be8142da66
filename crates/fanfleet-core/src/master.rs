// ── Master ──
//
// Full lifecycle management for a fan-array fleet: discovery, one
// connection worker per device, the external-control service, operator
// commands and reactive state for consumers.

use std::net::SocketAddr;
use std::sync::Arc;

use fanfleet_proto::{MacAddress, SlaveCommand};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::MasterConfig;
use crate::discovery;
use crate::error::CoreError;
use crate::external::{ExternalService, ExternalStats};
use crate::fleet::Fleet;
use crate::mapper::{GridMapper, SequentialMapper};
use crate::model::{DeviceSnapshot, Feedback, FleetEvent, SlaveState, Transition};
use crate::stream::DeviceStream;

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<MasterInner>`. Devices from the
/// configuration are registered at construction; nothing touches the
/// network until [`start()`](Self::start).
#[derive(Clone)]
pub struct Master {
    inner: Arc<MasterInner>,
}

struct MasterInner {
    fleet: Arc<Fleet>,
    broadcast_enabled: watch::Sender<bool>,
    runtime: Mutex<Runtime>,
}

#[derive(Default)]
struct Runtime {
    started: bool,
    discovery_addr: Option<SocketAddr>,
    discovery_tasks: Vec<JoinHandle<()>>,
    external: Option<ExternalService>,
}

impl Master {
    /// Create a Master with the default [`SequentialMapper`].
    pub fn new(config: MasterConfig) -> Self {
        let mapper = Arc::new(SequentialMapper::new(config.shape));
        Self::with_mapper(config, mapper)
    }

    pub fn with_mapper(config: MasterConfig, mapper: Arc<dyn GridMapper>) -> Self {
        let (broadcast_enabled, _) = watch::channel(true);
        Self {
            inner: Arc::new(MasterInner {
                fleet: Arc::new(Fleet::new(config, mapper)),
                broadcast_enabled,
                runtime: Mutex::new(Runtime::default()),
            }),
        }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.inner.fleet.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Bind discovery, spawn a worker per registered device, and activate
    /// the external-control service if configured.
    ///
    /// A discovery bind failure is returned. An external-control failure
    /// is logged and announced once as [`FleetEvent::ServiceFailed`]; the
    /// Master keeps running without it.
    pub async fn start(&self) -> Result<(), CoreError> {
        let fleet = &self.inner.fleet;
        let mut runtime = self.inner.runtime.lock().await;
        if runtime.started {
            return Err(CoreError::AlreadyStarted);
        }
        if fleet.cancel.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }

        let discovery =
            discovery::activate(fleet, self.inner.broadcast_enabled.subscribe(), &fleet.cancel)
                .await?;
        runtime.discovery_addr = Some(discovery.listener_addr);
        runtime.discovery_tasks = discovery.tasks;

        for slot in fleet.registry.slots() {
            fleet.spawn_worker(slot);
        }

        if let Some(external) = &fleet.config.external {
            match ExternalService::activate(fleet, external, fleet.cancel.child_token()).await {
                Ok(service) => runtime.external = Some(service),
                Err(e) => {
                    error!(error = %e, "external control could not be activated");
                    fleet.emit(FleetEvent::ServiceFailed {
                        service: "external-control".into(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        runtime.started = true;
        info!(devices = fleet.registry.len(), "master started");
        Ok(())
    }

    /// Stop every task. Workers send `RIP` to devices that are still
    /// handshaking or connected before they exit.
    pub async fn shutdown(&self) {
        let fleet = &self.inner.fleet;
        let mut runtime = self.inner.runtime.lock().await;
        fleet.cancel.cancel();

        if let Some(external) = runtime.external.take() {
            external.deactivate().await;
        }
        for handle in runtime.discovery_tasks.drain(..) {
            let _ = handle.await;
        }
        for handle in fleet.take_workers() {
            let _ = handle.await;
        }
        info!("master stopped");
    }

    /// Stop only the external-control service.
    pub async fn deactivate_external(&self) {
        if let Some(external) = self.inner.runtime.lock().await.external.take() {
            external.deactivate().await;
        }
    }

    /// Address of the discovery listener, once started.
    pub async fn listener_addr(&self) -> Option<SocketAddr> {
        self.inner.runtime.lock().await.discovery_addr
    }

    /// Address of the external command listener, if active.
    pub async fn external_addr(&self) -> Option<SocketAddr> {
        let runtime = self.inner.runtime.lock().await;
        runtime.external.as_ref().map(|e| e.listener_addr)
    }

    pub async fn external_stats(&self) -> Option<ExternalStats> {
        let runtime = self.inner.runtime.lock().await;
        runtime.external.as_ref().map(ExternalService::stats)
    }

    // ── Device operations ────────────────────────────────────────────

    /// Approve a newly discovered device (`AVAILABLE` → `KNOWN`).
    pub async fn approve(&self, mac: &MacAddress) -> Result<SlaveState, CoreError> {
        self.inner.fleet.operate(mac, Transition::Approve).await
    }

    /// End a device's session: sends `RIP` and moves it to `DISCONNECTED`.
    pub async fn disconnect(&self, mac: &MacAddress) -> Result<SlaveState, CoreError> {
        self.inner.fleet.operate(mac, Transition::Terminated).await
    }

    /// Suspend steady exchange for a firmware transfer.
    pub async fn begin_update(&self, mac: &MacAddress) -> Result<SlaveState, CoreError> {
        self.inner.fleet.operate(mac, Transition::BeginUpdate).await
    }

    pub async fn end_update(&self, mac: &MacAddress) -> Result<SlaveState, CoreError> {
        self.inner.fleet.operate(mac, Transition::EndUpdate).await
    }

    /// Queue a command for one device, replacing any unsent one.
    pub fn send_command(&self, mac: &MacAddress, command: SlaveCommand) -> Result<(), CoreError> {
        let slot = self.inner.fleet.slot(mac)?;
        slot.outbound.put(command);
        Ok(())
    }

    /// Command not yet picked up by the device's worker.
    pub fn pending_command(&self, mac: &MacAddress) -> Result<Option<SlaveCommand>, CoreError> {
        Ok(self.inner.fleet.slot(mac)?.outbound.peek())
    }

    // ── Array-wide commands ──────────────────────────────────────────

    /// Apply a full grid of duty cycles (`rows*cols*layers` values, each in
    /// [0, 1]). Returns how many devices were commanded.
    pub fn set_duty_cycles(&self, grid: &[f64]) -> Result<usize, CoreError> {
        self.inner.fleet.set_duty_cycles(grid)
    }

    /// Apply one duty cycle in [0, 1] to every device.
    pub fn set_uniform_duty_cycle(&self, dc: f64) -> Result<usize, CoreError> {
        self.inner.fleet.set_uniform_duty_cycle(dc)
    }

    // ── Discovery ────────────────────────────────────────────────────

    pub fn set_broadcast_enabled(&self, enabled: bool) {
        self.inner.broadcast_enabled.send_replace(enabled);
        info!(enabled, "discovery broadcast toggled");
    }

    pub fn broadcast_enabled(&self) -> bool {
        *self.inner.broadcast_enabled.borrow()
    }

    // ── State observation ────────────────────────────────────────────

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<DeviceSnapshot>>> {
        self.inner.fleet.registry.snapshot()
    }

    pub fn device(&self, mac: &MacAddress) -> Option<Arc<DeviceSnapshot>> {
        self.inner.fleet.registry.get(mac).map(|slot| slot.snapshot())
    }

    pub fn devices(&self) -> DeviceStream {
        DeviceStream::new(self.inner.fleet.registry.subscribe())
    }

    /// Subscribe to the fleet event stream.
    pub fn events(&self) -> broadcast::Receiver<FleetEvent> {
        self.inner.fleet.subscribe()
    }

    /// Aggregated feedback vector as external consumers see it.
    pub fn feedback(&self) -> Vec<i64> {
        self.inner.fleet.feedback_grid()
    }

    /// Latest accepted feedback of one device.
    pub fn device_feedback(&self, mac: &MacAddress) -> Option<Arc<Feedback>> {
        let slot = self.inner.fleet.registry.get(mac)?;
        self.inner.fleet.feedback.get(slot.index)
    }

    /// Drain a device's inbound mailbox.
    ///
    /// The mailbox holds one reading. While it is full, newer readings are
    /// still applied to the feedback vector but are counted in
    /// `stats.drops`, so a consumer should call this for every
    /// [`FleetEvent::FeedbackUpdated`].
    pub fn take_feedback(&self, mac: &MacAddress) -> Result<Option<Arc<Feedback>>, CoreError> {
        Ok(self.inner.fleet.slot(mac)?.inbound.take())
    }
}
