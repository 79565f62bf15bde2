//! Cost calculator
//!
//! Flat per-minute pricing: every started minute is charged in full, so any
//! non-zero duration costs at least one minute's rate.

use crate::constants::{DEFAULT_RATE_CENTS_PER_MINUTE, SECONDS_PER_MINUTE};

/// Maps billed seconds to a charge in cents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostCalculator {
    rate_cents_per_minute: i64,
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_CENTS_PER_MINUTE)
    }
}

impl CostCalculator {
    /// Create a calculator charging `rate_cents_per_minute` per started minute
    ///
    /// Negative rates are clamped to zero.
    pub fn new(rate_cents_per_minute: i64) -> Self {
        Self {
            rate_cents_per_minute: rate_cents_per_minute.max(0),
        }
    }

    pub fn rate_cents_per_minute(&self) -> i64 {
        self.rate_cents_per_minute
    }

    /// Number of started minutes in `billed_seconds`
    fn billed_minutes(billed_seconds: i64) -> i64 {
        let whole = billed_seconds / SECONDS_PER_MINUTE;
        if billed_seconds % SECONDS_PER_MINUTE == 0 {
            whole
        } else {
            whole + 1
        }
    }

    /// Charge for a call of `billed_seconds`
    ///
    /// `ceil(billed_seconds / 60) * rate`, saturating. Zero or negative
    /// durations cost nothing.
    pub fn price(&self, billed_seconds: i64) -> i64 {
        if billed_seconds <= 0 {
            return 0;
        }
        Self::billed_minutes(billed_seconds)
            .saturating_mul(self.rate_cents_per_minute)
            .max(self.rate_cents_per_minute)
    }

    /// Running estimate for a call still in progress
    ///
    /// Pro-rated to the second and rounded, never below one minute's rate.
    /// Display only; billing always goes through [`CostCalculator::price`].
    pub fn estimate(&self, elapsed_seconds: i64) -> i64 {
        let elapsed = elapsed_seconds.max(0);
        let prorated = elapsed
            .saturating_mul(self.rate_cents_per_minute)
            .saturating_add(SECONDS_PER_MINUTE / 2)
            / SECONDS_PER_MINUTE;
        prorated.max(self.rate_cents_per_minute)
    }
}
