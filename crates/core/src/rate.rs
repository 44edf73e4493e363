//! Fixed-point conversion rates as emitted by the escrow contract.

use serde::{Deserialize, Serialize};

/// Fixed-point number with 18 decimal places, matching the contract's
/// conversion-rate encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversionRate(pub u128);

impl ConversionRate {
    /// Number of decimal places in the on-chain encoding.
    pub const DECIMALS: u32 = 18;
    /// Scale factor: 10^18.
    pub const SCALE: u128 = 1_000_000_000_000_000_000;

    /// Create from f64 (for tests/convenience).
    pub fn from_f64(value: f64) -> Self {
        Self((value * Self::SCALE as f64) as u128)
    }

    /// Convert to f64 for market comparison.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

/// Market-relative discount in percent: positive means the deposit is
/// priced below market, favorable to the buyer.
///
/// Returns `None` when the market rate is zero or not finite.
pub fn percent_diff(market_rate: f64, deposit_rate: f64) -> Option<f64> {
    if market_rate == 0.0 || !market_rate.is_finite() || !deposit_rate.is_finite() {
        return None;
    }
    Some((market_rate - deposit_rate) / market_rate * 100.0)
}
