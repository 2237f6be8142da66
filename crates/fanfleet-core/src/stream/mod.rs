// ── Reactive device streams ──
//
// Subscription type for consuming registry changes.

mod filter;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::DeviceSnapshot;

pub use filter::DeviceFilter;

type Snapshot = Arc<Vec<Arc<DeviceSnapshot>>>;

/// A subscription to the device registry.
///
/// Provides both point-in-time snapshot access and reactive change
/// notification via `changed()` or by converting to a `Stream`.
pub struct DeviceStream {
    current: Snapshot,
    receiver: watch::Receiver<Snapshot>,
}

impl DeviceStream {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Get the snapshot captured at creation time (or at the last `changed()`).
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Get the latest snapshot.
    pub fn latest(&self) -> Snapshot {
        self.receiver.borrow().clone()
    }

    /// Devices in the latest snapshot that match `filter`.
    pub fn matching(&self, filter: &DeviceFilter) -> Vec<Arc<DeviceSnapshot>> {
        self.latest()
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the Master has been dropped.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Wait until some device matches `filter`, returning it.
    pub async fn wait_for(&mut self, filter: &DeviceFilter) -> Option<Arc<DeviceSnapshot>> {
        loop {
            if let Some(found) = self.matching(filter).into_iter().next() {
                return Some(found);
            }
            self.changed().await?;
        }
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> DeviceWatchStream {
        DeviceWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
///
/// Yields a new snapshot each time the registry publishes.
pub struct DeviceWatchStream {
    inner: WatchStream<Snapshot>,
}

impl Stream for DeviceWatchStream {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::SlaveState;
    use crate::store::{NewDevice, Registry};
    use fanfleet_proto::MacAddress;
    use futures_util::StreamExt;

    fn device(mac: &str) -> NewDevice {
        NewDevice {
            mac: MacAddress::parse(mac).unwrap(),
            name: mac.into(),
            fans: 2,
            max_fans: 21,
            state: SlaveState::Available,
        }
    }

    #[tokio::test]
    async fn wait_for_sees_a_later_insert() {
        let registry = Arc::new(Registry::new());
        let mut devices = DeviceStream::new(registry.subscribe());
        assert!(devices.current().is_empty());

        let writer = Arc::clone(&registry);
        tokio::spawn(async move {
            writer.insert(device("00:00:00:00:00:09"));
        });

        let found = devices
            .wait_for(&DeviceFilter::ByState(SlaveState::Available))
            .await
            .unwrap();
        assert_eq!(found.mac.as_str(), "00:00:00:00:00:09");
        assert_eq!(devices.latest().len(), 1);
    }

    #[tokio::test]
    async fn stream_yields_current_then_changes() {
        let registry = Registry::new();
        registry.insert(device("00:00:00:00:00:01"));

        let mut stream = DeviceStream::new(registry.subscribe()).into_stream();
        assert_eq!(stream.next().await.unwrap().len(), 1);

        registry.insert(device("00:00:00:00:00:02"));
        assert_eq!(stream.next().await.unwrap().len(), 2);
    }
}
