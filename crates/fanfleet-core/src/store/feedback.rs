// ── Aggregated feedback vector ──
//
// Written by every device worker, read by the external broadcaster and
// the CLI. Each device's row is one `Arc` swapped in a single map insert,
// so readers never observe a partially written row.

use std::sync::Arc;

use dashmap::DashMap;

use crate::model::{DeviceIndex, Feedback};

#[derive(Debug, Default)]
pub struct FeedbackVector {
    rows: DashMap<DeviceIndex, Arc<Feedback>>,
}

impl FeedbackVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a device's whole row.
    pub fn replace(&self, index: DeviceIndex, feedback: Arc<Feedback>) {
        self.rows.insert(index, feedback);
    }

    /// Forget a device's row; its cells read as "no reading" afterwards.
    pub fn clear(&self, index: DeviceIndex) {
        self.rows.remove(&index);
    }

    pub fn get(&self, index: DeviceIndex) -> Option<Arc<Feedback>> {
        self.rows.get(&index).map(|r| Arc::clone(r.value()))
    }

    /// RPMs of every device, in arena order, `None` where there is no row.
    pub fn rpm_rows(&self, devices: usize) -> Vec<Option<Vec<i64>>> {
        (0..devices)
            .map(|index| {
                self.get(index)
                    .map(|fb| fb.rpms.iter().copied().map(i64::from).collect())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn feedback(index: u64, rpms: Vec<u32>) -> Arc<Feedback> {
        Arc::new(Feedback {
            data_index: index,
            duty_cycles: vec![0.5; rpms.len()],
            rpms,
            received_at: Utc::now(),
        })
    }

    #[test]
    fn rows_follow_arena_order() {
        let fv = FeedbackVector::new();
        fv.replace(1, feedback(1, vec![100, 200]));
        assert_eq!(fv.rpm_rows(3), vec![None, Some(vec![100, 200]), None]);

        fv.replace(1, feedback(2, vec![300, 400]));
        fv.clear(1);
        assert_eq!(fv.rpm_rows(2), vec![None, None]);
    }
}
