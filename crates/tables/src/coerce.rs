//! Typed conversions between the API representation and the storage
//! representation: amounts, percents, wall-clock times and addresses.

use chrono::{DateTime, TimeZone, Utc};

use kyklos_core::{
    AccountId, AccountMap, Address, Amount, BlockHeight, BlockSlice, Cycle, FieldValue,
    Timestamp, TipObservation,
};

use crate::error::Error;
use crate::registry::FieldType;

/// Fixed-point factor between a percent value and its stored integer.
const PCT_SCALE: f64 = 100.0;

/// Stored percent integer to its display value (two fractional digits of
/// resolution remain).
pub fn pct_display(stored: i64) -> f64 {
    stored as f64 / PCT_SCALE
}

/// Accepts RFC3339 or a bare unix-seconds integer.
pub fn parse_time(s: &str) -> Result<Timestamp, Error> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(secs) = s.parse::<i64>() {
        if let Some(dt) = Utc.timestamp_opt(secs, 0).single() {
            return Ok(dt);
        }
    }
    Err(Error::param(format!("invalid time value '{s}'")))
}

/// Per-request conversion context: one tip snapshot, one block slice,
/// one account map.
pub struct Coercer<'a> {
    pub tip: &'a TipObservation,
    pub blocks: &'a BlockSlice,
    pub accounts: &'a AccountMap,
}

impl Coercer<'_> {
    /// Display-units decimal to stored base units.
    pub fn amount(&self, s: &str) -> Result<Amount, Error> {
        let value: f64 = s
            .parse()
            .map_err(|_| Error::param(format!("invalid amount value '{s}'")))?;
        Ok(self.tip.params.to_base(value))
    }

    /// Decimal percent to its stored fixed-point integer.
    pub fn percent(&self, s: &str) -> Result<i64, Error> {
        let value: f64 = s
            .parse()
            .map_err(|_| Error::param(format!("invalid percent value '{s}'")))?;
        Ok((value * PCT_SCALE).round() as i64)
    }

    /// Wall-clock time to block height; future times extrapolate from
    /// the tip by the block time.
    pub fn height_of_time(&self, t: Timestamp) -> BlockHeight {
        self.tip.height_from_time(t, |t| self.blocks.height_from_time(t))
    }

    pub fn cycle_of_time(&self, t: Timestamp) -> Cycle {
        self.tip.params.cycle_from_height(self.height_of_time(t))
    }

    /// Address text to account id. Unparseable input is a request error;
    /// a well-formed but unknown address is `None` and degrades to a
    /// guaranteed-false condition upstream.
    pub fn account_id(&self, s: &str) -> Result<Option<AccountId>, Error> {
        let addr: Address = s
            .parse()
            .map_err(|_| Error::param(format!("invalid address '{s}'")))?;
        Ok(self.accounts.id_of(&addr))
    }

    /// Generic scalar coercion for one storage column.
    pub fn scalar(&self, typ: FieldType, long: &str, s: &str) -> Result<FieldValue, Error> {
        let invalid = || Error::param(format!("invalid {long} filter value '{s}'"));
        match typ {
            FieldType::U64 => s.parse().map(FieldValue::U64).map_err(|_| invalid()),
            FieldType::I64 => s.parse().map(FieldValue::I64).map_err(|_| invalid()),
            FieldType::Amount => self.amount(s).map(FieldValue::I64),
            FieldType::Pct => self.percent(s).map(FieldValue::I64),
            FieldType::Bool => match s {
                "1" | "true" => Ok(FieldValue::Bool(true)),
                "0" | "false" => Ok(FieldValue::Bool(false)),
                _ => Err(invalid()),
            },
            FieldType::Bytes => parse_hex(s).map(FieldValue::Bytes).ok_or_else(invalid),
            FieldType::Str => Ok(FieldValue::Str(s.to_string())),
            FieldType::Time => parse_time(s).map(FieldValue::Time),
        }
    }
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyklos_core::ChainParams;
    use std::sync::Arc;

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn fixture() -> (TipObservation, BlockSlice, AccountMap) {
        let params = Arc::new(ChainParams {
            decimals: 6,
            block_time_secs: 60,
            blocks_per_cycle: 100,
        });
        let blocks = BlockSlice::new(
            (1..=250)
                .map(|h| {
                    (
                        h,
                        ts("2023-01-01T00:00:00Z") + chrono::Duration::seconds(60 * h),
                    )
                })
                .collect(),
        );
        let (best_height, best_time) = blocks.tip().unwrap();
        let tip = TipObservation {
            best_height,
            best_time,
            best_cycle: params.cycle_from_height(best_height),
            params,
        };
        let accounts = AccountMap::new([(
            7u64,
            "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx".parse().unwrap(),
        )]);
        (tip, blocks, accounts)
    }

    #[test]
    fn percent_scaling() {
        let (tip, blocks, accounts) = fixture();
        let c = Coercer {
            tip: &tip,
            blocks: &blocks,
            accounts: &accounts,
        };
        assert_eq!(c.percent("100").unwrap(), 10_000);
        assert_eq!(c.percent("99.99").unwrap(), 9_999);
        assert_eq!(c.percent("0.005").unwrap(), 1);
        assert!(c.percent("lots").is_err());

        // display roundtrip at two fractional digits
        assert_eq!(pct_display(9_999), 99.99);
    }

    #[test]
    fn amount_scaling() {
        let (tip, blocks, accounts) = fixture();
        let c = Coercer {
            tip: &tip,
            blocks: &blocks,
            accounts: &accounts,
        };
        assert_eq!(c.amount("1.5").unwrap(), 1_500_000);
        assert_eq!(c.amount("-0.000001").unwrap(), -1);
        assert!(c.amount("1,5").is_err());
    }

    #[test]
    fn time_to_cycle_monotone_across_tip() {
        let (tip, blocks, accounts) = fixture();
        let c = Coercer {
            tip: &tip,
            blocks: &blocks,
            accounts: &accounts,
        };

        // inside the index
        assert_eq!(c.cycle_of_time(ts("2023-01-01T00:50:00Z")), 0);
        assert_eq!(c.cycle_of_time(ts("2023-01-01T02:00:00Z")), 1);

        // past the tip: extrapolate by block time
        let future = tip.best_time + chrono::Duration::seconds(60 * 100);
        assert_eq!(c.cycle_of_time(future), tip.best_cycle + 1);

        // monotone over a sweep
        let mut last = 0;
        for m in 0..500 {
            let cyc = c.cycle_of_time(ts("2023-01-01T00:00:00Z") + chrono::Duration::minutes(m));
            assert!(cyc >= last);
            last = cyc;
        }
    }

    #[test]
    fn address_lookup_misses_are_not_errors() {
        let (tip, blocks, accounts) = fixture();
        let c = Coercer {
            tip: &tip,
            blocks: &blocks,
            accounts: &accounts,
        };
        assert_eq!(
            c.account_id("tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx").unwrap(),
            Some(7)
        );
        assert_eq!(
            c.account_id("tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSy").unwrap(),
            None
        );
        assert!(c.account_id("not-an-address").is_err());
    }

    #[test]
    fn hex_bytes() {
        assert_eq!(parse_hex("00ff10"), Some(vec![0x00, 0xff, 0x10]));
        assert_eq!(parse_hex("0f0"), None);
        assert_eq!(parse_hex("zz"), None);
    }
}
