// ── Shared fleet context ──
//
// State reachable from every task: the registry, the aggregated feedback
// vector, the mapper and the event channel. Lifecycle changes and
// array-wide commands go through here so discovery, the operator, the
// workers and the external listener all apply the same rules.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use fanfleet_proto::{DeviceMessage, MacAddress, SlaveCommand, transport};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::MasterConfig;
use crate::error::CoreError;
use crate::mapper::GridMapper;
use crate::model::{DeviceStats, FleetEvent, SlaveState, Transition};
use crate::store::{DeviceSession, DeviceSlot, FeedbackVector, NewDevice, Registry};
use crate::worker;

const EVENT_CHANNEL_SIZE: usize = 256;

pub(crate) struct Fleet {
    pub(crate) config: MasterConfig,
    pub(crate) registry: Registry,
    pub(crate) feedback: FeedbackVector,
    pub(crate) mapper: Arc<dyn GridMapper>,
    pub(crate) cancel: CancellationToken,
    events: broadcast::Sender<FleetEvent>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Fleet {
    /// Build the context and register every preconfigured slave as
    /// `DISCONNECTED`, so its first discovery reply re-arms it.
    pub(crate) fn new(config: MasterConfig, mapper: Arc<dyn GridMapper>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let registry = Registry::new();

        for slave in &config.slaves {
            registry.insert(NewDevice {
                mac: slave.mac.clone(),
                name: slave.name.clone(),
                fans: slave.fans,
                max_fans: config.max_fans,
                state: SlaveState::Disconnected,
            });
        }

        Self {
            config,
            registry,
            feedback: FeedbackVector::new(),
            mapper,
            cancel: CancellationToken::new(),
            events,
            workers: Mutex::new(Vec::new()),
        }
    }

    // ── Events ───────────────────────────────────────────────────────

    pub(crate) fn emit(&self, event: FleetEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    // ── Workers ──────────────────────────────────────────────────────

    pub(crate) fn spawn_worker(self: &Arc<Self>, slot: Arc<DeviceSlot>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let handle = tokio::spawn(worker::run(
            Arc::clone(self),
            slot,
            self.cancel.child_token(),
        ));
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    pub(crate) fn take_workers(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner))
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Apply `transition` to a locked session, then publish and announce.
    ///
    /// Counters reset on entering `CONNECTED` or `DISCONNECTED`. Sockets
    /// are dropped whenever the new state has none. The feedback row is
    /// kept through `UPDATING` and cleared on entering `DISCONNECTED`.
    pub(crate) fn transition(
        &self,
        slot: &DeviceSlot,
        session: &mut DeviceSession,
        transition: Transition,
    ) -> Result<SlaveState, CoreError> {
        let from = session.state;
        let Some(to) = from.apply(transition) else {
            return Err(CoreError::InvalidTransition {
                mac: slot.mac.clone(),
                from,
                transition,
            });
        };

        session.state = to;
        if matches!(to, SlaveState::Connected | SlaveState::Disconnected) {
            session.stats = DeviceStats::default();
        }
        if !to.has_sockets() {
            session.sockets = None;
        }
        if to == SlaveState::Disconnected
            || (from == SlaveState::Connected && to != SlaveState::Updating)
        {
            self.feedback.clear(slot.index);
        }

        info!(mac = %slot.mac, %from, %to, %transition, "device state changed");
        self.registry.publish(slot, session);
        self.emit(FleetEvent::StateChanged {
            index: slot.index,
            mac: slot.mac.clone(),
            from,
            to,
        });
        Ok(to)
    }

    /// Handle a validated discovery reply.
    ///
    /// Replies from devices whose published state is not `DISCONNECTED`
    /// are dropped without touching the session lock, which a worker may
    /// hold across a network timeout. The state is checked again under
    /// the lock.
    pub(crate) async fn discovered(
        self: &Arc<Self>,
        mac: MacAddress,
        ip: IpAddr,
        feedback_port: u16,
        command_port: u16,
    ) {
        let (slot, created) = self.registry.insert(NewDevice {
            name: mac.to_string(),
            mac,
            fans: self.config.fans.active_fans,
            max_fans: self.config.max_fans,
            state: SlaveState::Available,
        });
        if !created {
            let state = slot.snapshot().state;
            if state != SlaveState::Disconnected {
                trace!(mac = %slot.mac, %state, "ignoring discovery reply");
                return;
            }
        }
        let mut session = slot.session.lock().await;

        if created {
            session.set_network(ip, feedback_port, command_port);
            self.registry.publish(&slot, &session);
            info!(mac = %slot.mac, %ip, index = slot.index, "discovered new device");
            self.emit(FleetEvent::DeviceDiscovered {
                index: slot.index,
                mac: slot.mac.clone(),
                ip,
            });
            self.spawn_worker(Arc::clone(&slot));

            if self.config.auto_approve {
                if let Err(e) = self.transition(&slot, &mut session, Transition::Approve) {
                    warn!(error = %e, "auto-approval failed");
                }
            }
            return;
        }

        if session.state == SlaveState::Disconnected {
            session.set_network(ip, feedback_port, command_port);
            if let Err(e) = self.transition(&slot, &mut session, Transition::Rediscovered) {
                warn!(error = %e, "rediscovery failed");
            }
        } else {
            trace!(mac = %slot.mac, state = %session.state, "ignoring discovery reply");
        }
    }

    pub(crate) fn slot(&self, mac: &MacAddress) -> Result<Arc<DeviceSlot>, CoreError> {
        self.registry
            .get(mac)
            .ok_or_else(|| CoreError::DeviceNotFound {
                mac: mac.to_string(),
            })
    }

    /// Operator-driven transition on one device.
    pub(crate) async fn operate(
        &self,
        mac: &MacAddress,
        transition: Transition,
    ) -> Result<SlaveState, CoreError> {
        let slot = self.slot(mac)?;
        let mut session = slot.session.lock().await;

        if transition == Transition::Terminated && session.state.apply(transition).is_some() {
            self.send_terminate(&slot, &mut session).await;
        }
        self.transition(&slot, &mut session, transition)
    }

    /// Best-effort `RIP` to a device that still has sockets.
    pub(crate) async fn send_terminate(&self, slot: &DeviceSlot, session: &mut DeviceSession) {
        let Some(target) = session.command_target() else {
            return;
        };
        let seq = session.next_out_seq();
        let Some(sockets) = session.sockets.as_ref() else {
            return;
        };

        let rip = DeviceMessage::Terminate { seq }.encode();
        if let Err(e) = transport::send(&sockets.mosi, &rip, target).await {
            debug!(mac = %slot.mac, error = %e, "failed to send terminate");
        }
    }

    // ── Array-wide commands ──────────────────────────────────────────

    /// Split a full grid of duty cycles into per-device commands.
    /// Returns the number of devices that received one.
    pub(crate) fn set_duty_cycles(&self, grid: &[f64]) -> Result<usize, CoreError> {
        let expected = self.mapper.shape().cells();
        if grid.len() != expected {
            return Err(CoreError::DimensionMismatch {
                expected,
                got: grid.len(),
            });
        }
        for &dc in grid {
            check_duty_cycle(dc)?;
        }

        let slots = self.registry.slots();
        let fans: Vec<u32> = slots.iter().map(|s| s.fans).collect();
        let per_device = self.mapper.from_grid(&fans, grid);

        let mut commanded = 0;
        for (slot, dcs) in slots.iter().zip(per_device) {
            if dcs.is_empty() {
                continue;
            }
            post(slot, SlaveCommand::DutyCycles(dcs));
            commanded += 1;
        }
        Ok(commanded)
    }

    /// Apply one duty cycle to every fan of every device.
    pub(crate) fn set_uniform_duty_cycle(&self, dc: f64) -> Result<usize, CoreError> {
        check_duty_cycle(dc)?;
        let slots = self.registry.slots();
        for slot in &slots {
            post(slot, SlaveCommand::Uniform(dc));
        }
        Ok(slots.len())
    }

    /// Latest readings of every device, mapped onto the grid.
    pub(crate) fn feedback_grid(&self) -> Vec<i64> {
        let slots = self.registry.slots();
        let fans: Vec<u32> = slots.iter().map(|s| s.fans).collect();
        let readings = self.feedback.rpm_rows(slots.len());
        self.mapper.to_grid(&fans, &readings)
    }
}

fn post(slot: &DeviceSlot, command: SlaveCommand) {
    if slot.outbound.put(command) {
        debug!(mac = %slot.mac, "overwrote unsent command");
    }
}

pub(crate) fn check_duty_cycle(dc: f64) -> Result<(), CoreError> {
    if (0.0..=1.0).contains(&dc) {
        Ok(())
    } else {
        Err(CoreError::DutyCycleOutOfRange { value: dc })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SlaveSpec;
    use crate::mapper::SequentialMapper;
    use fanfleet_proto::GridShape;

    fn fleet() -> Fleet {
        let config = MasterConfig {
            shape: GridShape::new(2, 2, 1),
            slaves: vec![
                SlaveSpec {
                    name: "left".into(),
                    mac: MacAddress::parse("00:00:00:00:00:01").unwrap(),
                    fans: 2,
                },
                SlaveSpec {
                    name: "right".into(),
                    mac: MacAddress::parse("00:00:00:00:00:02").unwrap(),
                    fans: 2,
                },
            ],
            ..MasterConfig::default()
        };
        let mapper = Arc::new(SequentialMapper::new(config.shape));
        Fleet::new(config, mapper)
    }

    #[test]
    fn preconfigured_slaves_start_disconnected() {
        let fleet = fleet();
        let snap = fleet.registry.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().all(|d| d.state == SlaveState::Disconnected));
        assert_eq!(snap[1].name, "right");
    }

    #[test]
    fn vector_is_split_across_devices() {
        let fleet = fleet();
        assert_eq!(fleet.set_duty_cycles(&[0.1, 0.2, 0.3, 0.4]).unwrap(), 2);
        let right = fleet.registry.get_index(1).unwrap();
        assert_eq!(
            right.outbound.peek(),
            Some(SlaveCommand::DutyCycles(vec![0.3, 0.4]))
        );
    }

    #[test]
    fn vector_with_wrong_length_changes_nothing() {
        let fleet = fleet();
        let err = fleet.set_duty_cycles(&[0.1, 0.2, 0.3]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::DimensionMismatch {
                expected: 4,
                got: 3
            }
        ));
        assert!(fleet.registry.slots().iter().all(|s| s.outbound.is_empty()));
    }

    #[test]
    fn uniform_duty_cycle_bounds() {
        let fleet = fleet();
        assert!(fleet.set_uniform_duty_cycle(-0.1).is_err());
        assert!(fleet.set_uniform_duty_cycle(1.5).is_err());
        assert!(fleet.set_uniform_duty_cycle(f64::NAN).is_err());
        assert_eq!(fleet.set_uniform_duty_cycle(0.0).unwrap(), 2);
        assert_eq!(fleet.set_uniform_duty_cycle(1.0).unwrap(), 2);
        let left = fleet.registry.get_index(0).unwrap();
        assert_eq!(left.outbound.take(), Some(SlaveCommand::Uniform(1.0)));
    }

    #[tokio::test]
    async fn invalid_transition_leaves_state_alone() {
        let fleet = fleet();
        let mac = MacAddress::parse("00:00:00:00:00:01").unwrap();
        let err = fleet.operate(&mac, Transition::Approve).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(
            fleet.registry.get(&mac).unwrap().snapshot().state,
            SlaveState::Disconnected
        );
    }

    #[tokio::test]
    async fn rediscovery_rearms_disconnected_device() {
        let fleet = Arc::new(fleet());
        let mut events = fleet.subscribe();
        let mac = MacAddress::parse("00:00:00:00:00:02").unwrap();

        fleet
            .discovered(mac.clone(), "127.0.0.1".parse().unwrap(), 6001, 6002)
            .await;

        let view = fleet.registry.get(&mac).unwrap().snapshot();
        assert_eq!(view.state, SlaveState::Known);
        assert_eq!(view.command_port, Some(6002));
        assert!(matches!(
            events.recv().await.unwrap(),
            FleetEvent::StateChanged {
                to: SlaveState::Known,
                ..
            }
        ));
        fleet.cancel.cancel();
    }

    fn readings(rpms: Vec<u32>) -> Arc<crate::model::Feedback> {
        Arc::new(crate::model::Feedback {
            data_index: 1,
            duty_cycles: vec![0.5; rpms.len()],
            rpms,
            received_at: chrono::Utc::now(),
        })
    }

    #[tokio::test]
    async fn leaving_an_update_clears_the_feedback_row() {
        let fleet = fleet();
        let slot = fleet.registry.get_index(0).unwrap();
        let mut session = slot.session.lock().await;
        session.state = SlaveState::Connected;
        fleet.feedback.replace(0, readings(vec![1000, 1100]));

        fleet
            .transition(&slot, &mut session, Transition::BeginUpdate)
            .unwrap();
        assert_eq!(fleet.feedback_grid(), vec![1000, 1100, -1, -1]);

        let to = fleet
            .transition(&slot, &mut session, Transition::EndUpdate)
            .unwrap();
        assert_eq!(to, SlaveState::Disconnected);
        assert_eq!(fleet.feedback_grid(), vec![-1, -1, -1, -1]);
    }

    #[tokio::test]
    async fn discovery_reply_from_busy_device_does_not_wait_for_its_lock() {
        let fleet = Arc::new(fleet());
        let mac = MacAddress::parse("00:00:00:00:00:01").unwrap();
        let slot = fleet.registry.get(&mac).unwrap();

        // A worker mid-handshake holds the session.
        let mut session = slot.session.lock().await;
        session.state = SlaveState::Known;
        fleet.registry.publish(&slot, &session);

        let reply = fleet.discovered(mac, "127.0.0.1".parse().unwrap(), 6001, 6002);
        tokio::time::timeout(std::time::Duration::from_millis(200), reply)
            .await
            .unwrap();
        assert_eq!(session.state, SlaveState::Known);
        assert_eq!(session.command_port, None);
    }
}
