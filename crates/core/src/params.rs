use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Amount, BlockHeight, Cycle, Timestamp};

/// Protocol constants that govern amount scaling and cycle geometry.
///
/// Captured once per request inside a [`TipObservation`]; never re-read
/// while a request is streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
    /// Display decimals of the native token (base unit = 10^-decimals).
    pub decimals: u8,
    /// Target seconds between consecutive blocks.
    pub block_time_secs: i64,
    /// Number of blocks in one cycle.
    pub blocks_per_cycle: i64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            decimals: 6,
            block_time_secs: 60,
            blocks_per_cycle: 4096,
        }
    }
}

impl ChainParams {
    pub fn block_time(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.block_time_secs)
    }

    /// Cycle containing the given height. Height 0 (genesis) and the
    /// first `blocks_per_cycle` heights map to cycle 0.
    pub fn cycle_from_height(&self, height: BlockHeight) -> Cycle {
        if height <= 0 {
            return 0;
        }
        (height - 1) / self.blocks_per_cycle
    }

    pub fn cycle_start_height(&self, cycle: Cycle) -> BlockHeight {
        cycle * self.blocks_per_cycle + 1
    }

    pub fn cycle_end_height(&self, cycle: Cycle) -> BlockHeight {
        (cycle + 1) * self.blocks_per_cycle
    }

    /// Base units to display units.
    pub fn to_display(&self, amount: Amount) -> f64 {
        amount as f64 / 10f64.powi(self.decimals as i32)
    }

    /// Display units to base units.
    ///
    /// Sign-aware: a fractional remainder strictly greater than one half
    /// rounds away from zero, exactly one half truncates toward zero.
    /// This must stay byte-identical with the ingestion side or stored
    /// values stop round-tripping.
    pub fn to_base(&self, value: f64) -> Amount {
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        let scaled = value * 10f64.powi(self.decimals as i32);
        let trunc = scaled.trunc();
        if (scaled - trunc) * sign > 0.5 {
            (trunc + sign) as Amount
        } else {
            trunc as Amount
        }
    }
}

/// A consistent snapshot of the chain tip, taken at request entry.
#[derive(Clone)]
pub struct TipObservation {
    pub best_height: BlockHeight,
    pub best_time: Timestamp,
    pub best_cycle: Cycle,
    pub params: Arc<ChainParams>,
}

impl TipObservation {
    /// Resolve a wall-clock time to a block height.
    ///
    /// Times at or before the tip go through the supplied index lookup;
    /// future times extrapolate from the tip using the block time.
    pub fn height_from_time<F>(&self, t: Timestamp, lookup: F) -> BlockHeight
    where
        F: FnOnce(Timestamp) -> BlockHeight,
    {
        if t <= self.best_time {
            lookup(t)
        } else {
            let ahead = (t - self.best_time).num_seconds() / self.params.block_time_secs;
            self.best_height + ahead
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ChainParams {
        ChainParams::default()
    }

    #[test]
    fn cycle_geometry() {
        let p = params();
        assert_eq!(p.cycle_from_height(0), 0);
        assert_eq!(p.cycle_from_height(1), 0);
        assert_eq!(p.cycle_from_height(4096), 0);
        assert_eq!(p.cycle_from_height(4097), 1);
        assert_eq!(p.cycle_start_height(1), 4097);
        assert_eq!(p.cycle_end_height(1), 8192);
        assert_eq!(p.cycle_from_height(p.cycle_start_height(7)), 7);
        assert_eq!(p.cycle_from_height(p.cycle_end_height(7)), 7);
    }

    #[test]
    fn amount_conversion_roundtrip() {
        let p = params();
        for stored in [0i64, 1, -1, 999_999, 1_000_000, -123_456_789, i64::MAX >> 12] {
            assert_eq!(p.to_base(p.to_display(stored)), stored, "stored={stored}");
        }
    }

    #[test]
    fn amount_rounding_matches_ingestion() {
        let p = params();
        assert_eq!(p.to_base(1.0000019), 1_000_002);
        assert_eq!(p.to_base(-1.0000019), -1_000_002);
        assert_eq!(p.to_base(1.0000004), 1_000_000);
        assert_eq!(p.to_base(2.5), 2_500_000);

        // exactly one half truncates toward zero (0.25 and 2.5 are exact in
        // binary floating point at one decimal)
        let p = ChainParams {
            decimals: 1,
            ..params()
        };
        assert_eq!(p.to_base(0.25), 2);
        assert_eq!(p.to_base(-0.25), -2);
    }

    #[test]
    fn future_time_extrapolates() {
        let best_time: Timestamp = "2023-06-01T00:00:00Z".parse().unwrap();
        let tip = TipObservation {
            best_height: 10_000,
            best_time,
            best_cycle: 2,
            params: Arc::new(params()),
        };
        let t = best_time + chrono::Duration::hours(1);
        let h = tip.height_from_time(t, |_| unreachable!("future must not hit the index"));
        assert_eq!(h, 10_060);

        let h = tip.height_from_time(best_time, |_| 10_000);
        assert_eq!(h, 10_000);
    }
}
