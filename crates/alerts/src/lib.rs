//! Telegram notification layer for escrow order events.
//!
//! This crate provides:
//! - SQLite-based subscription storage
//! - Telegram bot integration for notifications
//! - Order outcome dispatch to watching chats

pub mod dispatch;
pub mod store;
pub mod telegram;

pub use dispatch::OutcomeDispatcher;
pub use store::SubscriptionStore;
pub use telegram::TelegramBot;
