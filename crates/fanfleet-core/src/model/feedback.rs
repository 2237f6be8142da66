use chrono::{DateTime, Utc};
use fanfleet_proto::DataFrame;
use serde::{Deserialize, Serialize};

/// One accepted feedback report from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub data_index: u64,
    pub rpms: Vec<u32>,
    pub duty_cycles: Vec<f64>,
    pub received_at: DateTime<Utc>,
}

impl Feedback {
    pub fn from_frame(frame: DataFrame) -> Self {
        Self {
            data_index: frame.index,
            rpms: frame.rpms,
            duty_cycles: frame.duty_cycles,
            received_at: Utc::now(),
        }
    }
}
