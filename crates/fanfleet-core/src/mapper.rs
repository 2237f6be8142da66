// ── Grid mapping ──
//
// External consumers see the whole array as one flat `rows*cols*layers`
// vector. A `GridMapper` converts between that vector and per-device fan
// values. Devices are passed in arena order.

use fanfleet_proto::GridShape;

/// Grid value for a cell with no fan or no reading.
pub const NO_READING: i64 = -1;

/// Converts between per-device fan values and the array-wide grid.
pub trait GridMapper: Send + Sync {
    fn shape(&self) -> GridShape;

    /// Build a grid vector from per-device readings (`None` = no reading).
    /// `fans[i]` is the fan count of device `i`.
    fn to_grid(&self, fans: &[u32], readings: &[Option<Vec<i64>>]) -> Vec<i64>;

    /// Split a grid vector of `shape().cells()` values into per-device
    /// vectors. Devices without any mapped fan get an empty vector.
    fn from_grid(&self, fans: &[u32], grid: &[f64]) -> Vec<Vec<f64>>;
}

/// Lays devices' fans back to back in arena order onto the row-major grid.
/// Fans past the last cell are left unmapped.
#[derive(Debug, Clone, Copy)]
pub struct SequentialMapper {
    shape: GridShape,
}

impl SequentialMapper {
    pub fn new(shape: GridShape) -> Self {
        Self { shape }
    }

    /// `(first cell, fan count)` of every device.
    fn offsets(fans: &[u32]) -> impl Iterator<Item = (usize, usize)> + '_ {
        fans.iter().scan(0usize, |next, &count| {
            let count = usize::try_from(count).unwrap_or(0);
            let start = *next;
            *next = next.saturating_add(count);
            Some((start, count))
        })
    }
}

impl GridMapper for SequentialMapper {
    fn shape(&self) -> GridShape {
        self.shape
    }

    fn to_grid(&self, fans: &[u32], readings: &[Option<Vec<i64>>]) -> Vec<i64> {
        let mut grid = vec![NO_READING; self.shape.cells()];

        for ((start, count), reading) in Self::offsets(fans).zip(readings) {
            let Some(values) = reading else { continue };
            let cells = grid.iter_mut().skip(start).take(count);
            for (cell, value) in cells.zip(values) {
                *cell = *value;
            }
        }
        grid
    }

    fn from_grid(&self, fans: &[u32], grid: &[f64]) -> Vec<Vec<f64>> {
        Self::offsets(fans)
            .map(|(start, count)| grid.iter().skip(start).take(count).copied().collect())
            .collect()
    }
}
