//! Sniper alert types and subscription filters.

use crate::Currency;
use serde::{Deserialize, Serialize};

/// Off-chain payment platform a deposit settles through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Venmo,
    Revolut,
    Wise,
    CashApp,
    Zelle,
}

impl Platform {
    pub fn from_code(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "venmo" => Some(Platform::Venmo),
            "revolut" => Some(Platform::Revolut),
            "wise" => Some(Platform::Wise),
            "cashapp" => Some(Platform::CashApp),
            "zelle" => Some(Platform::Zelle),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Platform::Venmo => "venmo",
            Platform::Revolut => "revolut",
            Platform::Wise => "wise",
            Platform::CashApp => "cashapp",
            Platform::Zelle => "zelle",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A subscriber's standing request for sniper alerts.
///
/// `platform = None` matches deposits on any platform. The threshold is
/// the subscriber's personal minimum discount; `None` falls back to the
/// engine default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SniperSubscription {
    pub chat_id: String,
    pub currency: Currency,
    pub platform: Option<Platform>,
    pub threshold_percent: Option<f64>,
}

impl SniperSubscription {
    /// Whether this subscription matches a deposit's currency/platform.
    pub fn matches(&self, currency: Currency, platform: Option<Platform>) -> bool {
        if self.currency != currency {
            return false;
        }
        match (self.platform, platform) {
            (None, _) => true,
            (Some(want), Some(have)) => want == have,
            (Some(_), None) => false,
        }
    }
}

/// A threshold-triggered arbitrage alert for one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SniperAlert {
    pub deposit_id: u64,
    pub currency: Currency,
    pub platform: Option<Platform>,
    pub deposit_rate: f64,
    pub market_rate: f64,
    pub percent_diff: f64,
    pub face_amount: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(currency: Currency, platform: Option<Platform>) -> SniperSubscription {
        SniperSubscription {
            chat_id: "100".into(),
            currency,
            platform,
            threshold_percent: None,
        }
    }

    #[test]
    fn test_platform_codes() {
        assert_eq!(Platform::from_code("Venmo"), Some(Platform::Venmo));
        assert_eq!(Platform::from_code("WISE"), Some(Platform::Wise));
        assert_eq!(Platform::from_code("paypal"), None);
        assert_eq!(Platform::Revolut.code(), "revolut");
    }

    #[test]
    fn test_subscription_matches_currency() {
        let s = sub(Currency::EUR, None);
        assert!(s.matches(Currency::EUR, Some(Platform::Revolut)));
        assert!(s.matches(Currency::EUR, None));
        assert!(!s.matches(Currency::USD, None));
    }

    #[test]
    fn test_subscription_matches_platform() {
        let s = sub(Currency::EUR, Some(Platform::Revolut));
        assert!(s.matches(Currency::EUR, Some(Platform::Revolut)));
        assert!(!s.matches(Currency::EUR, Some(Platform::Wise)));
        // A platform-specific subscription does not match platform-less deposits.
        assert!(!s.matches(Currency::EUR, None));
    }
}
