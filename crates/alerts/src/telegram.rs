//! Telegram bot handlers and message formatting.

use crate::store::SubscriptionStore;
use escrow_core::{
    Currency, IntentId, OrderOutcome, OutcomeKind, Platform, SniperAlert, SniperSubscription,
    TxHash,
};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram API error: {0}")]
    Api(#[from] teloxide::RequestError),
    #[error("Database error: {0}")]
    Db(#[from] crate::store::StoreError),
}

/// Bot commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start the bot")]
    Start,
    #[command(description = "Snipe deposits. Usage: /snipe EUR [venmo] [0.5]")]
    Snipe(String),
    #[command(description = "Remove all sniper subscriptions")]
    Unsnipe,
    #[command(description = "List your sniper subscriptions")]
    List,
    #[command(description = "Watch an order outcome. Usage: /watch <intent id>")]
    Watch(String),
    #[command(description = "Show help")]
    Help,
}

/// Telegram bot wrapper.
pub struct TelegramBot {
    bot: Bot,
    store: SubscriptionStore,
}

impl TelegramBot {
    /// Create a new bot with the given token.
    pub fn new(token: &str, store: SubscriptionStore) -> Self {
        let bot = Bot::new(token);
        Self { bot, store }
    }

    /// Get the underlying bot for sending messages.
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Send an HTML-formatted message to a chat.
    pub async fn send_alert(&self, chat_id: &str, message: &str) -> Result<(), TelegramError> {
        let chat_id: ChatId = ChatId(chat_id.parse().unwrap_or(0));
        self.bot
            .send_message(chat_id, message)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    /// Run the bot command handler.
    pub async fn run(self: Arc<Self>) {
        let bot = self.bot.clone();
        let handler = Update::filter_message().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command| {
                let this = Arc::clone(&self);
                async move { this.handle_command(bot, msg, cmd).await }
            },
        );

        Dispatcher::builder(bot, handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }

    async fn handle_command(
        &self,
        bot: Bot,
        msg: Message,
        cmd: Command,
    ) -> Result<(), TelegramError> {
        let chat_id = msg.chat.id.to_string();

        match cmd {
            Command::Start => {
                bot.send_message(
                    msg.chat.id,
                    "Escrow Sniper Bot\n\n\
                     Get alerted when a deposit advertises a conversion rate \
                     below market, or when a watched order settles.\n\n\
                     Use /help to see available commands.",
                )
                .await?;
            }

            Command::Snipe(args) => {
                match parse_snipe_args(&args) {
                    Some((currency, platform, threshold)) => {
                        let sub = SniperSubscription {
                            chat_id: chat_id.clone(),
                            currency,
                            platform,
                            threshold_percent: threshold,
                        };
                        self.store.upsert_subscription(&sub).await?;
                        let platform_text = platform
                            .map(|p| p.to_string())
                            .unwrap_or_else(|| "any platform".to_string());
                        let threshold_text = threshold
                            .map(|t| format!("{t:.2}%"))
                            .unwrap_or_else(|| "default".to_string());
                        bot.send_message(
                            msg.chat.id,
                            format!(
                                "Sniping {currency} deposits on {platform_text} (threshold: {threshold_text})"
                            ),
                        )
                        .await?;
                    }
                    None => {
                        bot.send_message(
                            msg.chat.id,
                            "Usage: /snipe EUR [venmo] [0.5]\n\
                             Currency is required; platform and threshold are optional.",
                        )
                        .await?;
                    }
                }
            }

            Command::Unsnipe => {
                let removed = self.store.clear_subscriptions(&chat_id).await?;
                bot.send_message(msg.chat.id, format!("Removed {removed} subscription(s)."))
                    .await?;
            }

            Command::List => {
                let subs = self.store.subscriptions_for_chat(&chat_id).await?;
                let text = if subs.is_empty() {
                    "No sniper subscriptions. Add one with /snipe.".to_string()
                } else {
                    let mut text = String::from("<b>Your subscriptions</b>\n");
                    for sub in subs {
                        let platform = sub
                            .platform
                            .map(|p| p.to_string())
                            .unwrap_or_else(|| "any".to_string());
                        let threshold = sub
                            .threshold_percent
                            .map(|t| format!("{t:.2}%"))
                            .unwrap_or_else(|| "default".to_string());
                        text.push_str(&format!(
                            "\n{} / {} (threshold: {})",
                            sub.currency, platform, threshold
                        ));
                    }
                    text
                };
                bot.send_message(msg.chat.id, text)
                    .parse_mode(ParseMode::Html)
                    .await?;
            }

            Command::Watch(args) => {
                let intent = args.trim();
                if intent.is_empty() {
                    bot.send_message(msg.chat.id, "Usage: /watch <intent id>")
                        .await?;
                } else {
                    self.store
                        .watch_intent(&IntentId::new(intent), &chat_id)
                        .await?;
                    bot.send_message(
                        msg.chat.id,
                        format!("Watching order <code>{intent}</code>."),
                    )
                    .parse_mode(ParseMode::Html)
                    .await?;
                }
            }

            Command::Help => {
                bot.send_message(msg.chat.id, Command::descriptions().to_string())
                    .await?;
            }
        }

        Ok(())
    }
}

/// Parse `/snipe` arguments: `CURRENCY [platform] [threshold]`.
fn parse_snipe_args(args: &str) -> Option<(Currency, Option<Platform>, Option<f64>)> {
    let mut parts = args.split_whitespace();
    let currency = Currency::from_code(&parts.next()?.to_uppercase())?;

    let mut platform = None;
    let mut threshold = None;
    for part in parts {
        if let Ok(value) = part.parse::<f64>() {
            threshold = Some(value);
        } else if let Some(p) = Platform::from_code(&part.to_lowercase()) {
            platform = Some(p);
        } else {
            return None;
        }
    }
    Some((currency, platform, threshold))
}

/// Format an order outcome notification.
pub fn format_outcome_message(outcome: &OrderOutcome) -> String {
    let (emoji, verb) = match outcome.kind {
        OutcomeKind::Fulfilled => ("✅", "fulfilled"),
        OutcomeKind::Cancelled => ("❌", "cancelled"),
    };

    let mut msg = format!(
        "{} <b>Order {}</b>\n\n\
         <b>Intent:</b> <code>{}</code>\n\
         <b>Deposit:</b> #{}\n\
         <b>Tx:</b> <code>{}</code>",
        emoji, verb, outcome.intent_id, outcome.deposit_id, outcome.transaction_hash
    );

    if outcome.amount > 0 {
        msg.push_str(&format!("\n<b>Amount:</b> {}", format_usdc(outcome.amount)));
    }

    let now = chrono::Utc::now();
    msg.push_str(&format!("\n\n⏰ {}", now.format("%Y-%m-%d %H:%M:%S UTC")));

    msg
}

/// Format a new order notification.
pub fn format_created_message(
    intent_id: &IntentId,
    deposit_id: u64,
    amount: u128,
    tx_hash: &TxHash,
) -> String {
    let mut msg = format!(
        "🆕 <b>Order created</b>\n\n\
         <b>Intent:</b> <code>{}</code>\n\
         <b>Deposit:</b> #{}\n\
         <b>Tx:</b> <code>{}</code>",
        intent_id, deposit_id, tx_hash
    );

    if amount > 0 {
        msg.push_str(&format!("\n<b>Amount:</b> {}", format_usdc(amount)));
    }

    let now = chrono::Utc::now();
    msg.push_str(&format!("\n\n⏰ {}", now.format("%Y-%m-%d %H:%M:%S UTC")));

    msg
}

/// Format a sniper alert notification.
pub fn format_sniper_message(alert: &SniperAlert) -> String {
    let platform = alert
        .platform
        .map(|p| p.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut msg = format!(
        "🎯 <b>Sniper Alert!</b>\n\n\
         <b>Deposit:</b> #{}\n\
         <b>Currency:</b> {}\n\
         <b>Platform:</b> {}\n\
         📉 <b>Deposit rate:</b> {:.6}\n\
         📈 <b>Market rate:</b> {:.6}\n\
         <b>Discount:</b> {:.2}%",
        alert.deposit_id,
        alert.currency,
        platform,
        alert.deposit_rate,
        alert.market_rate,
        alert.percent_diff
    );

    if alert.face_amount > 0 {
        msg.push_str(&format!(
            "\n<b>Available:</b> {}",
            format_usdc(alert.face_amount)
        ));
    }

    let now = chrono::Utc::now();
    msg.push_str(&format!("\n\n⏰ {}", now.format("%Y-%m-%d %H:%M:%S UTC")));

    msg
}

/// Render a raw 6-decimal USDC amount.
fn format_usdc(raw: u128) -> String {
    let whole = raw / 1_000_000;
    let frac = raw % 1_000_000;
    if frac == 0 {
        format!("{whole} USDC")
    } else {
        let frac = format!("{frac:06}");
        format!("{}.{} USDC", whole, frac.trim_end_matches('0'))
    }
}
