//! Per-transaction reconciliation of order outcomes.
//!
//! A single transaction can emit several lifecycle events for the same
//! intent, e.g. a prune immediately followed by a fulfillment when a
//! taker settles an expired order in one call. Events are buffered per
//! transaction hash and settled after a quiet period so each intent
//! yields exactly one outcome.

use escrow_core::{DecodedEvent, EventFields, IntentId, OrderOutcome, OutcomeKind, TxHash};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, warn};

/// How long a transaction's events are buffered before settling.
const QUIET_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct PendingEvent {
    intent_id: IntentId,
    kind: OutcomeKind,
    deposit_id: u64,
    amount: u128,
}

#[derive(Debug, Default)]
struct PendingTransaction {
    events: Vec<PendingEvent>,
}

/// Buffers lifecycle events per transaction and emits one `OrderOutcome`
/// per intent after the quiet period elapses.
///
/// The quiet period timer is one-shot and never extended: events that
/// arrive for a transaction after its batch settled simply open a new
/// batch with its own timer.
pub struct ReconciliationEngine {
    pending: Arc<Mutex<HashMap<TxHash, PendingTransaction>>>,
    outcomes_tx: mpsc::Sender<OrderOutcome>,
    quiet_period: Duration,
}

impl ReconciliationEngine {
    pub fn new(outcomes_tx: mpsc::Sender<OrderOutcome>) -> Self {
        Self::with_quiet_period(outcomes_tx, QUIET_PERIOD)
    }

    pub fn with_quiet_period(outcomes_tx: mpsc::Sender<OrderOutcome>, quiet_period: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            outcomes_tx,
            quiet_period,
        }
    }

    /// Record a decoded event. Only fulfillments and prunes participate
    /// in reconciliation; everything else is ignored.
    pub fn record(&self, event: &DecodedEvent) {
        let pending_event = match &event.fields {
            EventFields::IntentFulfilled {
                intent_id,
                deposit_id,
                amount,
            } => PendingEvent {
                intent_id: intent_id.clone(),
                kind: OutcomeKind::Fulfilled,
                deposit_id: *deposit_id,
                amount: *amount,
            },
            EventFields::IntentPruned {
                intent_id,
                deposit_id,
            } => PendingEvent {
                intent_id: intent_id.clone(),
                kind: OutcomeKind::Cancelled,
                deposit_id: *deposit_id,
                amount: 0,
            },
            _ => return,
        };

        let tx_hash = event.transaction_hash.clone();
        let is_new_batch = {
            let mut pending = self.pending.lock().unwrap();
            let entry = pending.entry(tx_hash.clone()).or_default();
            entry.events.push(pending_event);
            entry.events.len() == 1
        };

        if is_new_batch {
            let pending = Arc::clone(&self.pending);
            let outcomes_tx = self.outcomes_tx.clone();
            let quiet_period = self.quiet_period;
            tokio::spawn(async move {
                time::sleep(quiet_period).await;
                let batch = pending.lock().unwrap().remove(&tx_hash);
                let Some(batch) = batch else { return };
                for outcome in settle(&tx_hash, batch.events) {
                    if outcomes_tx.send(outcome).await.is_err() {
                        warn!(tx = %tx_hash, "outcome channel closed, dropping settled outcomes");
                        return;
                    }
                }
            });
        }
    }

    /// Number of transactions currently buffered.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Collapse a transaction's buffered events into one outcome per
/// intent. A fulfillment always wins over a prune for the same intent.
/// Cancellations are emitted before fulfillments.
fn settle(tx_hash: &TxHash, events: Vec<PendingEvent>) -> Vec<OrderOutcome> {
    // Preserve first-seen intent order within each kind.
    let mut order: Vec<IntentId> = Vec::new();
    let mut by_intent: HashMap<IntentId, PendingEvent> = HashMap::new();

    for event in events {
        match by_intent.get(&event.intent_id) {
            None => {
                order.push(event.intent_id.clone());
                by_intent.insert(event.intent_id.clone(), event);
            }
            Some(existing) => {
                if existing.kind == OutcomeKind::Cancelled && event.kind == OutcomeKind::Fulfilled {
                    debug!(
                        tx = %tx_hash,
                        intent = %event.intent_id,
                        "fulfillment supersedes prune in same transaction"
                    );
                    by_intent.insert(event.intent_id.clone(), event);
                }
            }
        }
    }

    let mut outcomes: Vec<OrderOutcome> = Vec::with_capacity(order.len());
    for kind in [OutcomeKind::Cancelled, OutcomeKind::Fulfilled] {
        for intent_id in &order {
            let event = &by_intent[intent_id];
            if event.kind != kind {
                continue;
            }
            outcomes.push(OrderOutcome {
                intent_id: intent_id.clone(),
                transaction_hash: tx_hash.clone(),
                kind: event.kind,
                deposit_id: event.deposit_id,
                amount: event.amount,
            });
        }
    }
    outcomes
}
