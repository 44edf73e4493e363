//! Decoded on-chain events and reconciliation outcomes.

use crate::{ConversionRate, Currency, Platform};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Transaction hash newtype (0x-prefixed hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub CompactString);

impl TxHash {
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(CompactString::new(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of one economic order within a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentId(pub CompactString);

impl IntentId {
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(CompactString::new(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IntentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw log record as delivered by the streaming provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
}

impl RawLog {
    /// Block number parsed from the hex quantity field.
    pub fn block_number_u64(&self) -> Option<u64> {
        let hex = self.block_number.strip_prefix("0x")?;
        u64::from_str_radix(hex, 16).ok()
    }
}

/// Typed payload of a decoded escrow event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventFields {
    /// An order was created against a deposit.
    IntentSignaled {
        intent_id: IntentId,
        deposit_id: u64,
        amount: u128,
    },
    /// An order settled on-chain.
    IntentFulfilled {
        intent_id: IntentId,
        deposit_id: u64,
        amount: u128,
    },
    /// An order was pruned (cancelled / expired / superseded).
    IntentPruned {
        intent_id: IntentId,
        deposit_id: u64,
    },
    /// A deposit advertised a fiat conversion rate.
    DepositConversionRate {
        deposit_id: u64,
        currency: Option<Currency>,
        platform: Option<Platform>,
        conversion_rate: ConversionRate,
        amount: u128,
    },
}

impl EventFields {
    /// Event name as it appears in the contract ABI.
    pub fn name(&self) -> &'static str {
        match self {
            EventFields::IntentSignaled { .. } => "IntentSignaled",
            EventFields::IntentFulfilled { .. } => "IntentFulfilled",
            EventFields::IntentPruned { .. } => "IntentPruned",
            EventFields::DepositConversionRate { .. } => "DepositConversionRate",
        }
    }

    /// True for events that change an intent's lifecycle state: a
    /// creation is relayed directly, terminal events settle through
    /// reconciliation first.
    pub fn is_state_changing(&self) -> bool {
        matches!(
            self,
            EventFields::IntentSignaled { .. }
                | EventFields::IntentFulfilled { .. }
                | EventFields::IntentPruned { .. }
        )
    }
}

/// A decoded log, immutable once constructed.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub contract_id: u32,
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub fields: EventFields,
    pub received_at: SystemTime,
}

impl DecodedEvent {
    pub fn new(contract_id: u32, transaction_hash: TxHash, block_number: u64, fields: EventFields) -> Self {
        Self {
            contract_id,
            transaction_hash,
            block_number,
            fields,
            received_at: SystemTime::now(),
        }
    }
}

/// Terminal state of one intent, emitted exactly once per intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    Fulfilled,
    Cancelled,
}

/// Resolved outcome handed to notification dispatch.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub intent_id: IntentId,
    pub transaction_hash: TxHash,
    pub kind: OutcomeKind,
    pub deposit_id: u64,
    pub amount: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_log_block_number() {
        let log = RawLog {
            address: "0xabc".into(),
            topics: vec![],
            data: "0x".into(),
            transaction_hash: "0x01".into(),
            block_number: "0x10a3f".into(),
        };
        assert_eq!(log.block_number_u64(), Some(0x10a3f));

        let bad = RawLog {
            block_number: "zzz".into(),
            ..log
        };
        assert_eq!(bad.block_number_u64(), None);
    }

    #[test]
    fn test_event_classification() {
        let signaled = EventFields::IntentSignaled {
            intent_id: IntentId::new("0x01"),
            deposit_id: 7,
            amount: 100,
        };
        assert!(signaled.is_state_changing());
        assert_eq!(signaled.name(), "IntentSignaled");

        let rate = EventFields::DepositConversionRate {
            deposit_id: 7,
            currency: Some(Currency::USD),
            platform: None,
            conversion_rate: ConversionRate::from_f64(1.0),
            amount: 100,
        };
        assert!(!rate.is_state_changing());
    }
}
