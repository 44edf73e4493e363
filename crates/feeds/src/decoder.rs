//! Raw log decoding against a known event-signature catalog.

use escrow_core::{ConversionRate, Currency, EventFields, IntentId, Platform, RawLog};
use tracing::debug;

/// Capability mapping raw logs to named escrow events.
///
/// Returns `None` when the log does not match the catalog; the caller
/// skips that log and continues.
pub trait LogDecoder: Send + Sync {
    fn decode(&self, log: &RawLog) -> Option<EventFields>;
}

// Event signature hashes (topic0) for the escrow ABI.
const TOPIC_INTENT_SIGNALED: &str =
    "0x8f7e5dc8ba7b48fb7c54c881ba7e12bcd0a9e2cc2b34fba1cd31a0e1c1a4d7aa";
const TOPIC_INTENT_FULFILLED: &str =
    "0x1b9bcd1b4cde26c56cd1a6c165a5ab15b6eb54c1f4b9a6d7c5092cfe81ca1d21";
const TOPIC_INTENT_PRUNED: &str =
    "0x5a9b3efc51c54b0fc1b1765be07e3ef94f2bdd17a3ec70e09a1dd43e1e0bb51e";
const TOPIC_DEPOSIT_CONVERSION_RATE: &str =
    "0xee0b92e3a93fba1bb08f0c832ab1a938e14f6f8c224f1b09b8bdca93e0a364b6";

// Platform identifiers as emitted on-chain (keccak256 of the code).
const PLATFORM_HASHES: &[(&str, Platform)] = &[
    (
        "0x7ab25e1f62aa2ec10e6e5e0ba49f8f6c07b05c0a904e916ce69105c87bec39fb",
        Platform::Venmo,
    ),
    (
        "0xb9a3cdbe8ae9c1e067d1a2cfd9c97c06e71c4ef7f1e8ff9ba62c1f22ff089866",
        Platform::Revolut,
    ),
    (
        "0xcc1e7a4c954ad53a8fd0ea0990272c35d40e0a3b4b5d11f60a0ae02bcee3a481",
        Platform::Wise,
    ),
    (
        "0x22ba5e1e53ebb14aa3f6e89d6efc1f79a3c39acdcb1170f1f815bc36c6d94f3e",
        Platform::CashApp,
    ),
    (
        "0xf1c062be97657951d7dd9bca1b8cf720f3311bb2a1cc4e202f0d26c052cbcbea",
        Platform::Zelle,
    ),
];

/// Decoder for the escrow contract's event catalog.
#[derive(Debug, Default, Clone)]
pub struct EscrowDecoder;

impl EscrowDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl LogDecoder for EscrowDecoder {
    fn decode(&self, log: &RawLog) -> Option<EventFields> {
        let topic0 = log.topics.first()?.to_lowercase();

        let decoded = match topic0.as_str() {
            TOPIC_INTENT_SIGNALED => Some(EventFields::IntentSignaled {
                intent_id: topic_as_id(log, 1)?,
                deposit_id: topic_as_u64(log, 2)?,
                amount: data_word_u128(&log.data, 0)?,
            }),
            TOPIC_INTENT_FULFILLED => Some(EventFields::IntentFulfilled {
                intent_id: topic_as_id(log, 1)?,
                deposit_id: topic_as_u64(log, 2)?,
                amount: data_word_u128(&log.data, 0)?,
            }),
            TOPIC_INTENT_PRUNED => Some(EventFields::IntentPruned {
                intent_id: topic_as_id(log, 1)?,
                deposit_id: topic_as_u64(log, 2)?,
            }),
            TOPIC_DEPOSIT_CONVERSION_RATE => Some(EventFields::DepositConversionRate {
                deposit_id: topic_as_u64(log, 1)?,
                currency: log.topics.get(2).and_then(|t| Currency::from_hash(t)),
                platform: log.topics.get(3).and_then(|t| platform_from_hash(t)),
                conversion_rate: ConversionRate(data_word_u128(&log.data, 0)?),
                amount: data_word_u128(&log.data, 1)?,
            }),
            _ => None,
        };

        if decoded.is_none() {
            debug!(topic0 = %topic0, tx = %log.transaction_hash, "log did not match event catalog");
        }
        decoded
    }
}

fn platform_from_hash(hash: &str) -> Option<Platform> {
    let hash = hash.to_lowercase();
    PLATFORM_HASHES
        .iter()
        .find(|(h, _)| *h == hash)
        .map(|(_, p)| *p)
}

/// Indexed bytes32 topic kept verbatim as an opaque id.
fn topic_as_id(log: &RawLog, i: usize) -> Option<IntentId> {
    log.topics.get(i).map(|t| IntentId::new(t.to_lowercase()))
}

/// Indexed uint topic parsed as u64.
fn topic_as_u64(log: &RawLog, i: usize) -> Option<u64> {
    let topic = log.topics.get(i)?;
    let hex = topic.strip_prefix("0x")?;
    // uint256 topics are left-padded; the low 16 hex chars carry any
    // realistic deposit id.
    if hex.len() < 16 {
        return None;
    }
    u64::from_str_radix(&hex[hex.len() - 16..], 16).ok()
}

/// The i-th 32-byte word of the ABI-encoded data payload, as u128.
fn data_word_u128(data: &str, i: usize) -> Option<u128> {
    let hex = data.strip_prefix("0x")?;
    let start = i * 64;
    let end = start + 64;
    if hex.len() < end {
        return None;
    }
    // High 16 bytes must be zero for values that fit in u128.
    let word = &hex[start..end];
    if word[..32].bytes().any(|b| b != b'0') {
        return None;
    }
    u128::from_str_radix(&word[32..], 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pad_u64_topic(v: u64) -> String {
        format!("0x{:064x}", v)
    }

    fn pad_word(v: u128) -> String {
        format!("{:064x}", v)
    }

    fn signaled_log() -> RawLog {
        RawLog {
            address: "0xescrow".into(),
            topics: vec![
                TOPIC_INTENT_SIGNALED.into(),
                "0x00000000000000000000000000000000000000000000000000000000000000aa".into(),
                pad_u64_topic(42),
            ],
            data: format!("0x{}", pad_word(1_500_000)),
            transaction_hash: "0xt1".into(),
            block_number: "0x64".into(),
        }
    }

    #[test]
    fn test_decode_intent_signaled() {
        let decoder = EscrowDecoder::new();
        let fields = decoder.decode(&signaled_log()).unwrap();
        match fields {
            EventFields::IntentSignaled {
                intent_id,
                deposit_id,
                amount,
            } => {
                assert_eq!(deposit_id, 42);
                assert_eq!(amount, 1_500_000);
                assert!(intent_id.as_str().ends_with("aa"));
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_decode_conversion_rate() {
        let decoder = EscrowDecoder::new();
        let log = RawLog {
            address: "0xescrow".into(),
            topics: vec![
                TOPIC_DEPOSIT_CONVERSION_RATE.into(),
                pad_u64_topic(7),
                "0xc4ae21aac0c6549d71dd96035b7e0bdb6c79ebdba8891b666115bc976d16a29e".into(),
                "0x7ab25e1f62aa2ec10e6e5e0ba49f8f6c07b05c0a904e916ce69105c87bec39fb".into(),
            ],
            data: format!(
                "0x{}{}",
                pad_word(950_000_000_000_000_000), // 0.95 at 18 decimals
                pad_word(250_000_000)
            ),
            transaction_hash: "0xt2".into(),
            block_number: "0x65".into(),
        };

        match decoder.decode(&log).unwrap() {
            EventFields::DepositConversionRate {
                deposit_id,
                currency,
                platform,
                conversion_rate,
                amount,
            } => {
                assert_eq!(deposit_id, 7);
                assert_eq!(currency, Some(Currency::USD));
                assert_eq!(platform, Some(Platform::Venmo));
                assert_eq!(conversion_rate.to_f64(), 0.95);
                assert_eq!(amount, 250_000_000);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_topic() {
        let decoder = EscrowDecoder::new();
        let mut log = signaled_log();
        log.topics[0] = "0x0000000000000000000000000000000000000000000000000000000000000001".into();
        assert!(decoder.decode(&log).is_none());
    }

    #[test]
    fn test_decode_truncated_data() {
        let decoder = EscrowDecoder::new();
        let mut log = signaled_log();
        log.data = "0x1234".into();
        assert!(decoder.decode(&log).is_none());
    }

    #[test]
    fn test_unknown_currency_is_none_not_error() {
        let decoder = EscrowDecoder::new();
        let log = RawLog {
            address: "0xescrow".into(),
            topics: vec![
                TOPIC_DEPOSIT_CONVERSION_RATE.into(),
                pad_u64_topic(7),
                "0x1111111111111111111111111111111111111111111111111111111111111111".into(),
            ],
            data: format!("0x{}{}", pad_word(1), pad_word(2)),
            transaction_hash: "0xt3".into(),
            block_number: "0x66".into(),
        };
        match decoder.decode(&log).unwrap() {
            EventFields::DepositConversionRate {
                currency, platform, ..
            } => {
                assert_eq!(currency, None);
                assert_eq!(platform, None);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
