//! Core data types for the escrow monitor.

pub mod alert;
pub mod contract;
pub mod currency;
pub mod event;
pub mod rate;

pub use alert::*;
pub use contract::*;
pub use currency::*;
pub use event::*;
pub use rate::*;
