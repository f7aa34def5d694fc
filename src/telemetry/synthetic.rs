//! Deterministic synthetic telemetry, used when no real export is available.

use super::{Column, TelemetryError, TelemetrySource, TelemetryTable, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Failed-login counts are drawn from `[0, 20)`.
pub const FAILED_LOGINS_RANGE: std::ops::Range<i64> = 0..20;
/// Transfer volumes (MB) are drawn from `[10, 500)`.
pub const TRANSFER_MB_RANGE: std::ops::Range<i64> = 10..500;

#[derive(Debug, Clone)]
pub struct SyntheticSource {
    pub rows: usize,
    pub seed: u64,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self { rows: 50, seed: 42 }
    }
}

impl SyntheticSource {
    pub fn new(rows: usize, seed: u64) -> Self {
        Self { rows, seed }
    }

    /// Build the table: `device_id`, `failed_logins`, `data_transfer_mb`.
    pub fn generate(&self) -> TelemetryTable {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut table = TelemetryTable::new(
            "device_id",
            vec![
                Column::text("device_id"),
                Column::numeric("failed_logins"),
                Column::numeric("data_transfer_mb"),
            ],
        );
        table.rows = (0..self.rows)
            .map(|i| super::Record {
                values: vec![
                    Value::Text(format!("Device_{}", i)),
                    Value::Integer(rng.gen_range(FAILED_LOGINS_RANGE)),
                    Value::Integer(rng.gen_range(TRANSFER_MB_RANGE)),
                ],
            })
            .collect();
        table
    }
}

impl TelemetrySource for SyntheticSource {
    fn name(&self) -> String {
        format!("synthetic(rows={}, seed={})", self.rows, self.seed)
    }

    fn acquire(&self) -> Result<TelemetryTable, TelemetryError> {
        Ok(self.generate())
    }
}
