//! Deposit rate vs market rate alerting.
//!
//! When a deposit advertises a fiat conversion rate below the current
//! market rate, subscribers watching that currency (and optionally a
//! specific payment platform) are alerted. The discount is measured as
//! a percentage of the market rate, alerting when it meets or exceeds
//! the subscriber's threshold.

use crate::RateService;
use async_trait::async_trait;
use escrow_core::{percent_diff, Currency, DecodedEvent, EventFields, Platform, SniperAlert, SniperSubscription};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Discount threshold in percent applied when a subscription carries
/// none of its own.
pub const DEFAULT_THRESHOLD_PERCENT: f64 = 0.2;

#[derive(Debug, Error)]
pub enum SniperError {
    #[error("alert delivery failed: {0}")]
    Delivery(String),
}

/// Lookup of sniper subscriptions for a currency/platform pair.
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    async fn subscribers_for(
        &self,
        currency: Currency,
        platform: Option<Platform>,
    ) -> Vec<SniperSubscription>;
}

/// Outbound alert delivery.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, chat_id: &str, alert: &SniperAlert) -> Result<(), SniperError>;
}

/// Evaluates advertised deposit rates against market rates and fans
/// alerts out to matching subscribers.
pub struct SniperEngine {
    rates: Arc<RateService>,
    directory: Arc<dyn SubscriberDirectory>,
    sink: Arc<dyn AlertSink>,
    /// Chat that receives every alert at the default threshold.
    broadcast_chat: Option<String>,
    default_threshold: f64,
}

impl SniperEngine {
    pub fn new(
        rates: Arc<RateService>,
        directory: Arc<dyn SubscriberDirectory>,
        sink: Arc<dyn AlertSink>,
        broadcast_chat: Option<String>,
    ) -> Self {
        Self {
            rates,
            directory,
            sink,
            broadcast_chat,
            default_threshold: DEFAULT_THRESHOLD_PERCENT,
        }
    }

    pub fn with_default_threshold(mut self, threshold: f64) -> Self {
        self.default_threshold = threshold;
        self
    }

    /// Evaluate one decoded event. Non-rate events and rates in a
    /// currency we cannot price are skipped silently.
    pub async fn evaluate(&self, event: &DecodedEvent) {
        let EventFields::DepositConversionRate {
            deposit_id,
            currency,
            platform,
            conversion_rate,
            amount,
        } = &event.fields
        else {
            return;
        };

        let Some(currency) = currency else {
            debug!(deposit_id, "skipping rate in unrecognized currency");
            return;
        };

        let Some(market_rate) = self.rates.market_rate(*currency).await else {
            debug!(deposit_id, %currency, "no fresh market rate, skipping evaluation");
            return;
        };

        let deposit_rate = conversion_rate.to_f64();
        let Some(diff) = percent_diff(market_rate, deposit_rate) else {
            debug!(deposit_id, market_rate, deposit_rate, "degenerate rates, skipping");
            return;
        };

        let alert = SniperAlert {
            deposit_id: *deposit_id,
            currency: *currency,
            platform: *platform,
            deposit_rate,
            market_rate,
            percent_diff: diff,
            face_amount: *amount,
        };

        let mut recipients: Vec<String> = Vec::new();
        for sub in self.directory.subscribers_for(*currency, *platform).await {
            if !sub.matches(*currency, *platform) {
                continue;
            }
            let threshold = sub.threshold_percent.unwrap_or(self.default_threshold);
            if diff >= threshold && !recipients.contains(&sub.chat_id) {
                recipients.push(sub.chat_id);
            }
        }
        if let Some(chat) = &self.broadcast_chat {
            if diff >= self.default_threshold && !recipients.contains(chat) {
                recipients.push(chat.clone());
            }
        }

        // Deliveries are isolated per recipient so one failing chat
        // never blocks or aborts the rest.
        for chat_id in recipients {
            let sink = Arc::clone(&self.sink);
            let alert = alert.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.deliver(&chat_id, &alert).await {
                    warn!(chat_id = %chat_id, error = %e, "sniper alert delivery failed");
                }
            });
        }
    }
}
