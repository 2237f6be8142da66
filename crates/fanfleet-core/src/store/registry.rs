// ── Device registry ──
//
// Arena of device slots plus an address index. A slot's arena index is
// fixed at insertion and slots are never removed, so mailboxes, feedback
// rows and UI rows can refer to a device by index forever.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use dashmap::DashMap;
use fanfleet_proto::{MacAddress, SlaveCommand};
use tokio::sync::{Mutex, watch};

use super::mailbox::Mailbox;
use super::session::DeviceSession;
use crate::model::{DeviceIndex, DeviceSnapshot, Feedback, SlaveState};

type Snapshot = Arc<Vec<Arc<DeviceSnapshot>>>;

/// Identity of a device being registered.
#[derive(Debug, Clone)]
pub(crate) struct NewDevice {
    pub(crate) mac: MacAddress,
    pub(crate) name: String,
    pub(crate) fans: u32,
    pub(crate) max_fans: u32,
    pub(crate) state: SlaveState,
}

/// One registered device.
#[derive(Debug)]
pub(crate) struct DeviceSlot {
    pub(crate) index: DeviceIndex,
    pub(crate) mac: MacAddress,
    pub(crate) name: String,
    pub(crate) fans: u32,
    pub(crate) max_fans: u32,
    /// The device's exclusive lock.
    pub(crate) session: Mutex<DeviceSession>,
    /// Latest command for the device; last write wins.
    pub(crate) outbound: Mailbox<SlaveCommand>,
    /// Latest feedback from the device; full means drop.
    pub(crate) inbound: Mailbox<Arc<Feedback>>,
    view: watch::Sender<Arc<DeviceSnapshot>>,
}

impl DeviceSlot {
    fn new(index: DeviceIndex, params: NewDevice) -> Self {
        let session = DeviceSession::new(params.state);
        let view = DeviceSnapshot {
            index,
            mac: params.mac.clone(),
            name: params.name.clone(),
            fans: params.fans,
            max_fans: params.max_fans,
            state: params.state,
            ip: None,
            feedback_port: None,
            command_port: None,
            stats: session.stats,
        };
        let (view, _) = watch::channel(Arc::new(view));

        Self {
            index,
            mac: params.mac,
            name: params.name,
            fans: params.fans,
            max_fans: params.max_fans,
            session: Mutex::new(session),
            outbound: Mailbox::new(),
            inbound: Mailbox::new(),
            view,
        }
    }

    /// Last published view. Readable while a worker holds the session.
    pub(crate) fn snapshot(&self) -> Arc<DeviceSnapshot> {
        self.view.borrow().clone()
    }

    fn render(&self, session: &DeviceSession) -> DeviceSnapshot {
        DeviceSnapshot {
            index: self.index,
            mac: self.mac.clone(),
            name: self.name.clone(),
            fans: self.fans,
            max_fans: self.max_fans,
            state: session.state,
            ip: session.ip,
            feedback_port: session.feedback_port,
            command_port: session.command_port,
            stats: session.stats,
        }
    }
}

pub(crate) struct Registry {
    /// Held for writing only while a single insert runs.
    arena: RwLock<Vec<Arc<DeviceSlot>>>,
    by_mac: DashMap<MacAddress, DeviceIndex>,
    snapshot: watch::Sender<Snapshot>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            arena: RwLock::new(Vec::new()),
            by_mac: DashMap::new(),
            snapshot,
        }
    }

    /// Register a device, or return the existing slot for its address.
    /// The flag is `true` if a new slot was created.
    pub(crate) fn insert(&self, params: NewDevice) -> (Arc<DeviceSlot>, bool) {
        let slot = {
            let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = self
                .by_mac
                .get(&params.mac)
                .and_then(|index| arena.get(*index).cloned())
            {
                return (existing, false);
            }

            let index = arena.len();
            let slot = Arc::new(DeviceSlot::new(index, params));
            self.by_mac.insert(slot.mac.clone(), index);
            arena.push(Arc::clone(&slot));
            slot
        };

        self.rebuild_snapshot();
        (slot, true)
    }

    pub(crate) fn get(&self, mac: &MacAddress) -> Option<Arc<DeviceSlot>> {
        let index = *self.by_mac.get(mac)?;
        self.get_index(index)
    }

    pub(crate) fn get_index(&self, index: DeviceIndex) -> Option<Arc<DeviceSlot>> {
        self.read().get(index).cloned()
    }

    /// Every slot, in arena order.
    pub(crate) fn slots(&self) -> Vec<Arc<DeviceSlot>> {
        self.read().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    /// Publish a slot's current session as its view.
    pub(crate) fn publish(&self, slot: &DeviceSlot, session: &DeviceSession) {
        slot.view.send_replace(Arc::new(slot.render(session)));
        self.rebuild_snapshot();
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<DeviceSlot>>> {
        self.arena.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Views are collected while the snapshot's write lock is held, so
    /// the last publisher always sees every earlier slot update.
    fn rebuild_snapshot(&self) {
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| {
            let views: Vec<Arc<DeviceSnapshot>> =
                self.read().iter().map(|s| s.snapshot()).collect();
            *snap = Arc::new(views);
        });
    }
}
