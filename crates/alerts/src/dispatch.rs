//! Outcome and alert dispatch to Telegram chats.

use crate::store::SubscriptionStore;
use crate::telegram::{
    format_created_message, format_outcome_message, format_sniper_message, TelegramBot,
};
use async_trait::async_trait;
use escrow_core::{DecodedEvent, EventFields, OrderOutcome, SniperAlert};
use escrow_engine::{AlertSink, SniperError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Consumes settled order outcomes and notifies every watching chat.
///
/// Sends are fire-and-forget per chat; a failed delivery is logged and
/// never blocks the rest of the queue.
#[derive(Clone)]
pub struct OutcomeDispatcher {
    bot: Arc<TelegramBot>,
    store: SubscriptionStore,
    broadcast_chat: Option<String>,
}

impl OutcomeDispatcher {
    pub fn new(bot: Arc<TelegramBot>, store: SubscriptionStore) -> Self {
        Self {
            bot,
            store,
            broadcast_chat: None,
        }
    }

    pub fn with_broadcast_chat(mut self, chat_id: Option<String>) -> Self {
        self.broadcast_chat = chat_id;
        self
    }

    /// Announce a newly created order to its watchers and the broadcast
    /// chat, if one is configured.
    pub async fn announce_created(&self, event: &DecodedEvent) {
        let EventFields::IntentSignaled {
            intent_id,
            deposit_id,
            amount,
        } = &event.fields
        else {
            return;
        };

        let mut recipients = match self.store.watchers_for(intent_id).await {
            Ok(watchers) => watchers,
            Err(e) => {
                warn!(intent = %intent_id, error = %e, "watcher lookup failed");
                Vec::new()
            }
        };
        if let Some(chat) = &self.broadcast_chat {
            if !recipients.contains(chat) {
                recipients.push(chat.clone());
            }
        }
        if recipients.is_empty() {
            debug!(intent = %intent_id, "no recipients for created order");
            return;
        }

        let message =
            format_created_message(intent_id, *deposit_id, *amount, &event.transaction_hash);
        for chat_id in recipients {
            let bot = Arc::clone(&self.bot);
            let message = message.clone();
            let intent = intent_id.clone();
            tokio::spawn(async move {
                if let Err(e) = bot.send_alert(&chat_id, &message).await {
                    warn!(chat_id = %chat_id, intent = %intent, error = %e, "creation notification failed");
                }
            });
        }
    }

    /// Drain the outcome channel until it closes.
    pub async fn run(self, mut outcomes_rx: mpsc::Receiver<OrderOutcome>) {
        info!("outcome dispatcher started");
        while let Some(outcome) = outcomes_rx.recv().await {
            self.dispatch(&outcome).await;
        }
        info!("outcome channel closed, dispatcher stopping");
    }

    async fn dispatch(&self, outcome: &OrderOutcome) {
        let watchers = match self.store.watchers_for(&outcome.intent_id).await {
            Ok(watchers) => watchers,
            Err(e) => {
                warn!(intent = %outcome.intent_id, error = %e, "watcher lookup failed");
                return;
            }
        };
        if watchers.is_empty() {
            debug!(intent = %outcome.intent_id, "no watchers for settled intent");
            return;
        }

        let message = format_outcome_message(outcome);
        for chat_id in watchers {
            let bot = Arc::clone(&self.bot);
            let message = message.clone();
            let intent = outcome.intent_id.clone();
            tokio::spawn(async move {
                if let Err(e) = bot.send_alert(&chat_id, &message).await {
                    warn!(chat_id = %chat_id, intent = %intent, error = %e, "outcome notification failed");
                }
            });
        }

        // Outcomes are terminal; one notification per watcher.
        if let Err(e) = self.store.remove_watchers(&outcome.intent_id).await {
            warn!(intent = %outcome.intent_id, error = %e, "failed to clear watchers");
        }
    }
}

/// `AlertSink` backed by the Telegram bot.
pub struct TelegramSink {
    bot: Arc<TelegramBot>,
}

impl TelegramSink {
    pub fn new(bot: Arc<TelegramBot>) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    async fn deliver(&self, chat_id: &str, alert: &SniperAlert) -> Result<(), SniperError> {
        let message = format_sniper_message(alert);
        self.bot
            .send_alert(chat_id, &message)
            .await
            .map_err(|e| SniperError::Delivery(e.to_string()))
    }
}
