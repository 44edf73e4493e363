//! Fiat currency types for deposit pricing.

use serde::{Deserialize, Serialize};

/// Fiat currency a deposit is priced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Currency {
    /// US Dollar (identity rate: deposits are denominated against USD)
    USD = 1,
    /// Euro
    EUR = 2,
    /// British Pound
    GBP = 3,
    /// Singapore Dollar
    SGD = 4,
    /// Australian Dollar
    AUD = 5,
    /// Korean Won (regional currency with a dedicated quote source)
    KRW = 10,
}

/// On-chain currency identifiers: keccak256 of the ISO code, as emitted
/// by the escrow contract in rate-bearing events.
const CURRENCY_HASHES: &[(&str, Currency)] = &[
    (
        "0xc4ae21aac0c6549d71dd96035b7e0bdb6c79ebdba8891b666115bc976d16a29e",
        Currency::USD,
    ),
    (
        "0x9362b396fe263328bb20ae0a646690f31a6cb22b0bc2a0db3a523d30b2e46c15",
        Currency::EUR,
    ),
    (
        "0x90832e2dc3221e4d56977c1aa8f6a6706b9ad6542fbb3a60c9a54bbbd594addd",
        Currency::GBP,
    ),
    (
        "0x37da9e33a7e7bc0ff4bb61e425a5b8db3046a773fbc5b24d1cb20330c18e204a",
        Currency::SGD,
    ),
    (
        "0x74ec5a0b1a0c44b52e937b16fbbbd5f1a04adaa8e66e9f5b9bea4e8a6e3e2b29",
        Currency::AUD,
    ),
    (
        "0x0d5fc9524bba31d24172e3a811b16da0e4906b9ad291fc41f358d6b3b87f7e6a",
        Currency::KRW,
    ),
];

impl Currency {
    /// Parse from an ISO 4217 code.
    pub fn from_code(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            "GBP" => Some(Currency::GBP),
            "SGD" => Some(Currency::SGD),
            "AUD" => Some(Currency::AUD),
            "KRW" => Some(Currency::KRW),
            _ => None,
        }
    }

    /// Resolve from the on-chain bytes32 hash. Unknown hashes map to `None`
    /// and the deposit is skipped.
    pub fn from_hash(hash: &str) -> Option<Self> {
        let hash = hash.to_lowercase();
        CURRENCY_HASHES
            .iter()
            .find(|(h, _)| *h == hash)
            .map(|(_, c)| *c)
    }

    /// ISO code.
    pub fn code(self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::SGD => "SGD",
            Currency::AUD => "AUD",
            Currency::KRW => "KRW",
        }
    }

    /// The identity currency: market rate is the constant 1.0.
    pub fn is_identity(self) -> bool {
        matches!(self, Currency::USD)
    }

    /// The one regional currency served by a dedicated bid/ask quote
    /// source instead of the multi-currency table.
    pub fn is_regional(self) -> bool {
        matches!(self, Currency::KRW)
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}
