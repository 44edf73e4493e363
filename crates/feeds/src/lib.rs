//! Streaming log ingestion from a remote node.
//!
//! This crate owns the persistent subscription to each tracked escrow
//! contract:
//!
//! - `transport` - JSON-RPC `eth_subscribe` session over WebSocket
//! - `decoder` - raw log to named escrow event decoding
//! - `monitor` - per-contract connection state machine with backoff
//! - `backoff` - pure reconnection delay computation

pub mod backoff;
pub mod decoder;
pub mod error;
pub mod monitor;
pub mod transport;

pub use backoff::*;
pub use decoder::*;
pub use error::*;
pub use monitor::*;
pub use transport::*;
