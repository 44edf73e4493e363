//! Per-contract connection lifecycle.
//!
//! Each `ContractMonitor` owns exactly one live log subscription and its
//! connection state, restoring connectivity after failures with
//! exponential backoff. Gap-free delivery across reconnects is not
//! guaranteed by the underlying transport.

use crate::{BackoffPolicy, LogDecoder, LogTransport};
use escrow_core::{DecodedEvent, TrackedContract, TxHash};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

/// Bounded handshake: transport open + subscription ack.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
/// Liveness probe interval while connected.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Silence watchdog: no inbound activity for this long forces a reconnect.
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(90);
/// `is_connected` requires activity within this window.
const LIVENESS_WINDOW: Duration = Duration::from_secs(120);
/// Settle delay after an explicit restart.
const RESTART_SETTLE: Duration = Duration::from_secs(3);

/// Connection status for a tracked contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Destroyed,
}

struct MonitorShared {
    status: Mutex<ConnStatus>,
    attempt: AtomicU32,
    last_activity: Mutex<Option<Instant>>,
    destroyed: AtomicBool,
    running: AtomicBool,
    destroy_signal: Notify,
    restart_signal: Notify,
}

impl MonitorShared {
    fn new() -> Self {
        Self {
            status: Mutex::new(ConnStatus::Disconnected),
            attempt: AtomicU32::new(0),
            last_activity: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            running: AtomicBool::new(false),
            destroy_signal: Notify::new(),
            restart_signal: Notify::new(),
        }
    }

    fn status(&self) -> ConnStatus {
        *self.status.lock().unwrap()
    }

    fn set_status(&self, status: ConnStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Some(Instant::now());
    }

    fn silent_for(&self) -> Option<Duration> {
        self.last_activity.lock().unwrap().map(|t| t.elapsed())
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// Outcome of one connected session, driving the next transition.
enum SessionExit {
    /// Transport error, remote close, watchdog trip, or probe failure.
    Failed,
    /// Explicit restart requested.
    Restart,
    /// Explicit destroy requested.
    Destroyed,
    /// Downstream consumer is gone; nothing left to deliver to.
    ChannelClosed,
}

/// Maintains one live subscription for a tracked contract, delivering
/// every decoded event to the outbound channel.
pub struct ContractMonitor {
    contract: TrackedContract,
    transport: Arc<dyn LogTransport>,
    decoder: Arc<dyn LogDecoder>,
    events_tx: mpsc::Sender<DecodedEvent>,
    policy: BackoffPolicy,
    shared: Arc<MonitorShared>,
}

impl ContractMonitor {
    pub fn new(
        contract: TrackedContract,
        transport: Arc<dyn LogTransport>,
        decoder: Arc<dyn LogDecoder>,
        events_tx: mpsc::Sender<DecodedEvent>,
    ) -> Self {
        Self {
            contract,
            transport,
            decoder,
            events_tx,
            policy: BackoffPolicy::default(),
            shared: Arc::new(MonitorShared::new()),
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current connection status.
    pub fn status(&self) -> ConnStatus {
        self.shared.status()
    }

    /// Reconnection attempts since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.shared.attempt.load(Ordering::SeqCst)
    }

    /// True only if the transport is up and activity was observed within
    /// the liveness window.
    pub fn is_connected(&self) -> bool {
        self.shared.status() == ConnStatus::Connected
            && matches!(self.shared.silent_for(), Some(d) if d < LIVENESS_WINDOW)
    }

    /// Start the connection loop. A no-op while already running or after
    /// `destroy()`.
    pub fn connect(&self) {
        if self.shared.is_destroyed() {
            return;
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let transport = Arc::clone(&self.transport);
        let decoder = Arc::clone(&self.decoder);
        let events_tx = self.events_tx.clone();
        let contract = self.contract.clone();
        let policy = self.policy;

        tokio::spawn(async move {
            run_loop(shared, transport, decoder, events_tx, contract, policy).await;
        });
    }

    /// Tear down the transport and re-enter Connecting after a settle
    /// delay, with counters reset.
    pub fn restart(&self) {
        if self.shared.is_destroyed() {
            return;
        }
        self.shared.restart_signal.notify_one();
    }

    /// Idempotent, irreversible shutdown. The destroyed flag is set
    /// synchronously so in-flight reconnection attempts observe it and
    /// abort before touching the transport again.
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.destroy_signal.notify_one();
        // If the loop was never started there is no task to observe the
        // signal; mark terminal state directly.
        if !self.shared.running.load(Ordering::SeqCst) {
            self.shared.set_status(ConnStatus::Destroyed);
        }
    }
}

async fn run_loop(
    shared: Arc<MonitorShared>,
    transport: Arc<dyn LogTransport>,
    decoder: Arc<dyn LogDecoder>,
    events_tx: mpsc::Sender<DecodedEvent>,
    contract: TrackedContract,
    policy: BackoffPolicy,
) {
    loop {
        if shared.is_destroyed() {
            break;
        }
        shared.set_status(ConnStatus::Connecting);
        debug!(contract = %contract.label, "connecting");

        let opened = tokio::select! {
            res = time::timeout(HANDSHAKE_TIMEOUT, transport.open(&contract.address)) => res,
            _ = shared.destroy_signal.notified() => break,
        };

        match opened {
            Ok(Ok(mut session)) => {
                shared.set_status(ConnStatus::Connected);
                shared.attempt.store(0, Ordering::SeqCst);
                shared.touch();
                info!(contract = %contract.label, "connected");

                match drive_session(&shared, session.as_mut(), &decoder, &events_tx, &contract)
                    .await
                {
                    SessionExit::Destroyed => break,
                    SessionExit::ChannelClosed => {
                        warn!(contract = %contract.label, "event channel closed, stopping monitor");
                        shared.set_status(ConnStatus::Disconnected);
                        shared.running.store(false, Ordering::SeqCst);
                        return;
                    }
                    SessionExit::Restart => {
                        shared.attempt.store(0, Ordering::SeqCst);
                        shared.set_status(ConnStatus::Disconnected);
                        info!(contract = %contract.label, "restarting after settle delay");
                        tokio::select! {
                            _ = time::sleep(RESTART_SETTLE) => continue,
                            _ = shared.destroy_signal.notified() => break,
                        }
                    }
                    SessionExit::Failed => {}
                }
            }
            Ok(Err(e)) => {
                warn!(contract = %contract.label, error = %e, "connection attempt failed");
            }
            Err(_) => {
                warn!(contract = %contract.label, "handshake timed out");
            }
        }

        // Backoff before re-entering Connecting.
        shared.set_status(ConnStatus::Reconnecting);
        let attempt = shared.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        if policy.exhausted(attempt) {
            error!(
                contract = %contract.label,
                attempts = attempt - 1,
                "reconnection attempts exhausted, giving up permanently"
            );
            shared.set_status(ConnStatus::Disconnected);
            shared.running.store(false, Ordering::SeqCst);
            return;
        }

        let delay = policy.delay(attempt);
        debug!(contract = %contract.label, attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = shared.destroy_signal.notified() => break,
            _ = shared.restart_signal.notified() => {
                shared.attempt.store(0, Ordering::SeqCst);
                tokio::select! {
                    _ = time::sleep(RESTART_SETTLE) => {}
                    _ = shared.destroy_signal.notified() => break,
                }
            }
        }
    }

    shared.set_status(ConnStatus::Destroyed);
    shared.running.store(false, Ordering::SeqCst);
    debug!(contract = %contract.label, "monitor destroyed");
}

async fn drive_session(
    shared: &MonitorShared,
    session: &mut dyn crate::LogSession,
    decoder: &Arc<dyn LogDecoder>,
    events_tx: &mpsc::Sender<DecodedEvent>,
    contract: &TrackedContract,
) -> SessionExit {
    let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
    // The first tick fires immediately; consume it.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = shared.destroy_signal.notified() => return SessionExit::Destroyed,
            _ = shared.restart_signal.notified() => return SessionExit::Restart,
            res = session.next_log() => match res {
                Ok(raw) => {
                    shared.touch();
                    let block = raw.block_number_u64().unwrap_or_default();
                    if let Some(fields) = decoder.decode(&raw) {
                        let event = DecodedEvent::new(
                            contract.id,
                            TxHash::new(&raw.transaction_hash),
                            block,
                            fields,
                        );
                        if events_tx.send(event).await.is_err() {
                            return SessionExit::ChannelClosed;
                        }
                    }
                }
                Err(e) => {
                    warn!(contract = %contract.label, error = %e, "session error");
                    return SessionExit::Failed;
                }
            },
            _ = heartbeat.tick() => {
                match shared.silent_for() {
                    Some(silent) if silent > WATCHDOG_TIMEOUT => {
                        warn!(
                            contract = %contract.label,
                            silent_secs = silent.as_secs(),
                            "silence watchdog tripped, forcing reconnect"
                        );
                        return SessionExit::Failed;
                    }
                    _ => {}
                }
                if let Err(e) = session.ping().await {
                    warn!(contract = %contract.label, error = %e, "liveness probe failed");
                    return SessionExit::Failed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LogSession, StreamError};
    use async_trait::async_trait;
    use escrow_core::{EventFields, IntentId, RawLog};
    use std::sync::atomic::AtomicUsize;

    fn raw_log(tx: &str) -> RawLog {
        RawLog {
            address: "0xescrow".into(),
            topics: vec!["0x01".into()],
            data: "0x".into(),
            transaction_hash: tx.into(),
            block_number: "0x10".into(),
        }
    }

    /// Decoder that treats every log as a signaled intent.
    struct AnyDecoder;

    impl LogDecoder for AnyDecoder {
        fn decode(&self, log: &RawLog) -> Option<EventFields> {
            Some(EventFields::IntentSignaled {
                intent_id: IntentId::new(&log.transaction_hash),
                deposit_id: 1,
                amount: 100,
            })
        }
    }

    /// Session fed from a channel; ends with a disconnect error.
    struct ScriptedSession {
        rx: mpsc::UnboundedReceiver<RawLog>,
    }

    #[async_trait]
    impl LogSession for ScriptedSession {
        async fn next_log(&mut self) -> Result<RawLog, StreamError> {
            self.rx
                .recv()
                .await
                .ok_or_else(|| StreamError::Disconnected("script ended".into()))
        }

        async fn ping(&mut self) -> Result<(), StreamError> {
            Ok(())
        }
    }

    /// Transport whose `open` always fails.
    struct FailingTransport {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl LogTransport for FailingTransport {
        async fn open(&self, _address: &str) -> Result<Box<dyn LogSession>, StreamError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StreamError::ConnectionFailed("refused".into()))
        }
    }

    /// Transport that hands out one scripted session, then fails.
    struct OneShotTransport {
        log_rx: Mutex<Option<mpsc::UnboundedReceiver<RawLog>>>,
    }

    #[async_trait]
    impl LogTransport for OneShotTransport {
        async fn open(&self, _address: &str) -> Result<Box<dyn LogSession>, StreamError> {
            match self.log_rx.lock().unwrap().take() {
                Some(rx) => Ok(Box::new(ScriptedSession { rx })),
                None => Err(StreamError::ConnectionFailed("no more sessions".into())),
            }
        }
    }

    fn contract() -> TrackedContract {
        TrackedContract::new(1, "0xescrow", "escrow-test")
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_decoded_events() {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::channel(16);
        let monitor = ContractMonitor::new(
            contract(),
            Arc::new(OneShotTransport {
                log_rx: Mutex::new(Some(log_rx)),
            }),
            Arc::new(AnyDecoder),
            tx,
        );

        monitor.connect();
        log_tx.send(raw_log("0xaaa")).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.transaction_hash.as_str(), "0xaaa");
        assert_eq!(event.block_number, 0x10);
        assert!(monitor.is_connected());
        assert_eq!(monitor.attempts(), 0);

        monitor.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let (_log_tx, log_rx) = mpsc::unbounded_channel();
        let (tx, _rx) = mpsc::channel(16);
        let monitor = ContractMonitor::new(
            contract(),
            Arc::new(OneShotTransport {
                log_rx: Mutex::new(Some(log_rx)),
            }),
            Arc::new(AnyDecoder),
            tx,
        );

        monitor.connect();
        monitor.connect(); // second call is a no-op
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(monitor.status(), ConnStatus::Connected);

        monitor.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_until_attempt_cap() {
        let transport = Arc::new(FailingTransport {
            attempts: AtomicUsize::new(0),
        });
        let (tx, _rx) = mpsc::channel(16);
        let policy = BackoffPolicy {
            max_attempts: 5,
            ..Default::default()
        };
        let monitor = ContractMonitor::new(contract(), Arc::clone(&transport) as _, Arc::new(AnyDecoder), tx)
            .with_policy(policy);

        monitor.connect();
        // Paused clock: sleeps auto-advance while all tasks are idle.
        // Each failed attempt costs at most 15s handshake + 30s backoff.
        time::sleep(Duration::from_secs(600)).await;

        // 1 initial try + 5 retries, then a permanent stop.
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 6);
        assert_eq!(monitor.status(), ConnStatus::Disconnected);
        assert!(!monitor.is_connected());

        // Further waiting never reconnects.
        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_mid_backoff_cancels_reconnect() {
        let transport = Arc::new(FailingTransport {
            attempts: AtomicUsize::new(0),
        });
        let (tx, _rx) = mpsc::channel(16);
        let monitor = ContractMonitor::new(
            contract(),
            Arc::clone(&transport) as _,
            Arc::new(AnyDecoder),
            tx,
        );

        monitor.connect();
        // Let the first attempt fail and enter backoff.
        time::sleep(Duration::from_millis(100)).await;
        let before = transport.attempts.load(Ordering::SeqCst);
        assert!(before >= 1);
        assert_eq!(monitor.status(), ConnStatus::Reconnecting);

        monitor.destroy();
        time::sleep(Duration::from_secs(120)).await;

        assert_eq!(monitor.status(), ConnStatus::Destroyed);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_is_idempotent_and_terminal() {
        let (_log_tx, log_rx) = mpsc::unbounded_channel();
        let (tx, _rx) = mpsc::channel(16);
        let monitor = ContractMonitor::new(
            contract(),
            Arc::new(OneShotTransport {
                log_rx: Mutex::new(Some(log_rx)),
            }),
            Arc::new(AnyDecoder),
            tx,
        );

        monitor.connect();
        time::sleep(Duration::from_millis(10)).await;
        monitor.destroy();
        monitor.destroy();
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(monitor.status(), ConnStatus::Destroyed);

        // connect() after destroy is a no-op.
        monitor.connect();
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(monitor.status(), ConnStatus::Destroyed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_connected_requires_recent_activity() {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::channel(16);
        let monitor = ContractMonitor::new(
            contract(),
            Arc::new(OneShotTransport {
                log_rx: Mutex::new(Some(log_rx)),
            }),
            Arc::new(AnyDecoder),
            tx,
        );

        monitor.connect();
        log_tx.send(raw_log("0x01")).unwrap();
        rx.recv().await.unwrap();
        assert!(monitor.is_connected());

        // Quiet for 80s: still inside both watchdog and liveness windows.
        time::sleep(Duration::from_secs(80)).await;
        assert!(monitor.is_connected());

        // Beyond 120s of silence the watchdog has already forced a
        // reconnect and liveness reports false either way.
        time::sleep(Duration::from_secs(45)).await;
        assert!(!monitor.is_connected());

        monitor.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_failure_triggers_reconnecting() {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::channel(16);
        let monitor = ContractMonitor::new(
            contract(),
            Arc::new(OneShotTransport {
                log_rx: Mutex::new(Some(log_rx)),
            }),
            Arc::new(AnyDecoder),
            tx,
        );

        monitor.connect();
        log_tx.send(raw_log("0x01")).unwrap();
        rx.recv().await.unwrap();

        // Dropping the script sender ends the session with an error.
        drop(log_tx);
        time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            monitor.status(),
            ConnStatus::Reconnecting | ConnStatus::Connecting
        ));
        assert!(monitor.attempts() >= 1);

        monitor.destroy();
    }
}
