//! Tracked contract identity.

use serde::{Deserialize, Serialize};

/// One escrow contract the pipeline subscribes to. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedContract {
    /// Internal id, unique per pipeline.
    pub id: u32,
    /// 0x-prefixed contract address.
    pub address: String,
    /// Human-readable label for logs.
    pub label: String,
}

impl TrackedContract {
    pub fn new(id: u32, address: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            label: label.into(),
        }
    }
}
