//! Event interpretation for tracked escrow contracts.
//!
//! - `reconcile` - per-transaction settling of order outcomes
//! - `rates` - cached external market rate lookup
//! - `sniper` - deposit rate vs market rate alerting

pub mod rates;
pub mod reconcile;
pub mod sniper;

pub use rates::*;
pub use reconcile::*;
pub use sniper::*;
