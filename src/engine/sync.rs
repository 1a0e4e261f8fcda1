//! Synchronization engine: lifecycle, shared state, and the polling worker.
//!
//! One engine instance owns one master/follower pair. `start` validates
//! both connections and spawns a supervised background worker; `stop`
//! signals cancellation and joins the worker, so at most one in-flight
//! cycle completes after it is called. All observable state lives behind a
//! single `RwLock`, keeping `status()` reads coherent against worker
//! writes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{AuthError, OrderConfirmation};
use crate::models::{AccountSnapshot, OrderSide, Position};

use super::activity::{ActivityLog, LogEntry};
use super::reconcile::{reconcile, IntentKind, SidePolicy};

/// One authenticated brokerage connection, as the engine consumes it.
///
/// Implemented by [`crate::api::BrokerClient`] for the live API and by an
/// in-memory mock in tests. Apart from `authenticate`, every operation
/// degrades to an empty/absent result instead of failing.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn authenticate(&self) -> Result<(), AuthError>;
    async fn resolve_account_id(&self) -> Option<String>;
    async fn list_positions(&self, account_id: &str) -> Vec<Position>;
    async fn account_info(&self, account_id: &str) -> Option<AccountSnapshot>;
    async fn place_order(
        &self,
        symbol: &str,
        quantity: i64,
        side: OrderSide,
        account_id: &str,
    ) -> Option<OrderConfirmation>;
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scale factor applied to master quantities
    pub ratio: f64,

    /// Delay between reconciliation cycles
    pub poll_interval: Duration,

    /// Side selection for corrective orders
    pub side_policy: SidePolicy,

    /// Compute and log intents without submitting orders
    pub dry_run: bool,

    /// Activity log capacity
    pub log_capacity: usize,

    /// How many log entries `status()` returns
    pub status_log_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ratio: 1.0,
            poll_interval: Duration::from_secs(10),
            side_policy: SidePolicy::default(),
            dry_run: false,
            log_capacity: 50,
            status_log_entries: 20,
        }
    }
}

/// Failures surfaced synchronously by `start`. Worker-side failures only
/// ever show up in the activity log.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine already running")]
    AlreadyRunning,

    #[error("ratio must be a positive finite number, got {0}")]
    InvalidRatio(f64),

    #[error("master auth failed: {0}")]
    MasterAuth(AuthError),

    #[error("follower auth failed: {0}")]
    FollowerAuth(AuthError),

    #[error("account resolution failed for {0} account")]
    AccountResolution(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Idle,
    Running,
}

/// Master/follower pair of any per-account value.
#[derive(Debug, Clone, Serialize)]
pub struct MasterFollower<T> {
    pub master: T,
    pub follower: T,
}

/// Immutable snapshot of the engine's observable state.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub positions: MasterFollower<Vec<Position>>,
    pub balance: MasterFollower<AccountSnapshot>,
    pub logs: Vec<LogEntry>,
}

struct EngineState {
    lifecycle: Lifecycle,
    master_positions: Vec<Position>,
    follower_positions: Vec<Position>,
    master_balance: AccountSnapshot,
    follower_balance: AccountSnapshot,
    log: ActivityLog,
}

impl EngineState {
    fn new(log_capacity: usize) -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
            master_positions: Vec::new(),
            follower_positions: Vec::new(),
            master_balance: AccountSnapshot::empty(""),
            follower_balance: AccountSnapshot::empty(""),
            log: ActivityLog::new(log_capacity),
        }
    }
}

/// Copy-trading engine for one master/follower account pair.
pub struct SyncEngine {
    config: EngineConfig,
    state: Arc<RwLock<EngineState>>,
    worker: Option<JoinHandle<()>>,
    cancel: Option<watch::Sender<bool>>,
}

impl SyncEngine {
    pub fn new(config: EngineConfig) -> Self {
        let state = Arc::new(RwLock::new(EngineState::new(config.log_capacity)));
        Self {
            config,
            state,
            worker: None,
            cancel: None,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.lifecycle == Lifecycle::Running
    }

    /// Authenticate both connections, resolve both account ids, and spawn
    /// the background worker. Any failure is reported synchronously with
    /// nothing spawned and no state change beyond a log entry; a second
    /// `start` on a running engine is rejected rather than restarting.
    pub async fn start(
        &mut self,
        master: Arc<dyn Broker>,
        follower: Arc<dyn Broker>,
    ) -> Result<(), EngineError> {
        if self.is_running().await {
            return Err(EngineError::AlreadyRunning);
        }

        if !(self.config.ratio.is_finite() && self.config.ratio > 0.0) {
            return Err(EngineError::InvalidRatio(self.config.ratio));
        }

        if let Err(e) = master.authenticate().await {
            return Err(self.record_failure(EngineError::MasterAuth(e)).await);
        }
        if let Err(e) = follower.authenticate().await {
            return Err(self.record_failure(EngineError::FollowerAuth(e)).await);
        }

        let master_account = match master.resolve_account_id().await {
            Some(id) => id,
            None => {
                return Err(self
                    .record_failure(EngineError::AccountResolution("master"))
                    .await)
            }
        };
        let follower_account = match follower.resolve_account_id().await {
            Some(id) => id,
            None => {
                return Err(self
                    .record_failure(EngineError::AccountResolution("follower"))
                    .await)
            }
        };

        {
            let mut state = self.state.write().await;
            state.lifecycle = Lifecycle::Running;
            state.master_balance = AccountSnapshot::empty(master_account.clone());
            state.follower_balance = AccountSnapshot::empty(follower_account.clone());
            state.log.push(format!(
                "copy trading started (master {master_account}, follower {follower_account}, ratio {})",
                self.config.ratio
            ));
        }

        info!(
            master = %master_account,
            follower = %follower_account,
            ratio = self.config.ratio,
            dry_run = self.config.dry_run,
            "Copy trading started"
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let worker = Worker {
            config: self.config.clone(),
            state: self.state.clone(),
            master,
            follower,
            master_account,
            follower_account,
            cancel: cancel_rx,
        };

        self.cancel = Some(cancel_tx);
        self.worker = Some(tokio::spawn(worker.run()));

        Ok(())
    }

    async fn record_failure(&self, error: EngineError) -> EngineError {
        warn!(error = %error, "Engine start failed");
        self.state.write().await.log.push(format!("start failed: {error}"));
        error
    }

    /// Signal the worker and wait for it to exit. A cycle already
    /// submitting orders runs to completion; nothing starts after it.
    /// No-op on an idle engine.
    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(true);
        }
        if let Some(handle) = self.worker.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Sync worker terminated abnormally");
            }
        }

        let mut state = self.state.write().await;
        if state.lifecycle == Lifecycle::Running {
            state.lifecycle = Lifecycle::Idle;
            state.log.push("copy trading stopped");
            info!("Copy trading stopped");
        }
    }

    /// Owned snapshot of the observable state; never a live reference into
    /// the engine's containers.
    pub async fn status(&self) -> EngineStatus {
        let state = self.state.read().await;
        EngineStatus {
            running: state.lifecycle == Lifecycle::Running,
            positions: MasterFollower {
                master: state.master_positions.clone(),
                follower: state.follower_positions.clone(),
            },
            balance: MasterFollower {
                master: state.master_balance.clone(),
                follower: state.follower_balance.clone(),
            },
            logs: state.log.recent(self.config.status_log_entries),
        }
    }
}

struct Worker {
    config: EngineConfig,
    state: Arc<RwLock<EngineState>>,
    master: Arc<dyn Broker>,
    follower: Arc<dyn Broker>,
    master_account: String,
    follower_account: String,
    cancel: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        debug!("Sync worker started");

        loop {
            if *self.cancel.borrow() {
                break;
            }

            self.cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.cancel.changed() => {}
            }
            if *self.cancel.borrow() {
                break;
            }
        }

        debug!("Sync worker exited");
    }

    /// One fetch-diff-order pass. Every downstream call degrades softly,
    /// so an isolated failure never halts the loop; it shows up in the
    /// activity log and the next cycle retries naturally.
    async fn cycle(&self) {
        let master_positions = self.master.list_positions(&self.master_account).await;
        let follower_positions = self.follower.list_positions(&self.follower_account).await;

        let intents = reconcile(
            &master_positions,
            &follower_positions,
            self.config.ratio,
            self.config.side_policy,
        );

        for intent in &intents {
            let action = match intent.kind {
                IntentKind::Open => "copied",
                IntentKind::Adjust => "adjusted",
            };
            let description = format!("{} {} {}", intent.side, intent.quantity, intent.symbol);

            if self.config.dry_run {
                info!(
                    symbol = %intent.symbol,
                    quantity = intent.quantity,
                    side = %intent.side,
                    "[dry run] Would place order"
                );
                self.log(format!("[dry run] {action}: {description}")).await;
                continue;
            }

            match self
                .follower
                .place_order(
                    &intent.symbol,
                    intent.quantity as i64,
                    intent.side,
                    &self.follower_account,
                )
                .await
            {
                Some(confirmation) => {
                    info!(
                        symbol = %intent.symbol,
                        quantity = intent.quantity,
                        side = %intent.side,
                        order_id = ?confirmation.order_id,
                        "Corrective order placed"
                    );
                    self.log(format!("{action}: {description}")).await;
                }
                None => {
                    warn!(symbol = %intent.symbol, "Corrective order attempt failed");
                    self.log(format!("order failed: {description}")).await;
                }
            }
        }

        // Balances are best-effort; a failed side goes stale instead of
        // silently masquerading as fresh data.
        let (master_balance, follower_balance) = tokio::join!(
            self.master.account_info(&self.master_account),
            self.follower.account_info(&self.follower_account),
        );

        let mut state = self.state.write().await;
        state.master_positions = master_positions;
        state.follower_positions = follower_positions;
        match master_balance {
            Some(snapshot) => state.master_balance = snapshot,
            None => state.master_balance.mark_stale(),
        }
        match follower_balance {
            Some(snapshot) => state.follower_balance = snapshot,
            None => state.follower_balance.mark_stale(),
        }
    }

    async fn log(&self, message: String) {
        self.state.write().await.log.push(message);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::Map;

    use super::*;

    struct MockBroker {
        auth_ok: bool,
        account: Option<String>,
        positions: Vec<Position>,
        balance_available: bool,
        confirm_orders: bool,
        orders: Mutex<Vec<(String, i64, OrderSide)>>,
    }

    impl MockBroker {
        fn new(account: &str) -> Self {
            Self {
                auth_ok: true,
                account: Some(account.to_string()),
                positions: Vec::new(),
                balance_available: true,
                confirm_orders: true,
                orders: Mutex::new(Vec::new()),
            }
        }

        fn failing_auth() -> Self {
            Self {
                auth_ok: false,
                ..Self::new("X")
            }
        }

        fn without_account() -> Self {
            Self {
                account: None,
                ..Self::new("X")
            }
        }

        fn with_positions(mut self, positions: Vec<Position>) -> Self {
            self.positions = positions;
            self
        }

        fn order_count(&self) -> usize {
            self.orders.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Broker for MockBroker {
        async fn authenticate(&self) -> Result<(), AuthError> {
            if self.auth_ok {
                Ok(())
            } else {
                Err(AuthError::new("token endpoint returned 401 Unauthorized"))
            }
        }

        async fn resolve_account_id(&self) -> Option<String> {
            self.account.clone()
        }

        async fn list_positions(&self, _account_id: &str) -> Vec<Position> {
            self.positions.clone()
        }

        async fn account_info(&self, account_id: &str) -> Option<AccountSnapshot> {
            self.balance_available
                .then(|| AccountSnapshot::fresh(account_id, Map::new()))
        }

        async fn place_order(
            &self,
            symbol: &str,
            quantity: i64,
            side: OrderSide,
            _account_id: &str,
        ) -> Option<OrderConfirmation> {
            self.orders
                .lock()
                .unwrap()
                .push((symbol.to_string(), quantity, side));
            self.confirm_orders.then(|| OrderConfirmation {
                order_id: Some(1),
                extra: Map::new(),
            })
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            // Long enough that only the immediate first cycle runs during
            // a test.
            poll_interval: Duration::from_secs(3600),
            ..EngineConfig::default()
        }
    }

    async fn settle() {
        // Let the spawned worker finish its first cycle.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_start_failure_leaves_engine_idle() {
        let master = Arc::new(MockBroker::failing_auth());
        let follower = Arc::new(MockBroker::new("F1"));

        let mut engine = SyncEngine::new(test_config());
        let result = engine.start(master.clone(), follower.clone()).await;

        assert!(matches!(result, Err(EngineError::MasterAuth(_))));

        let status = engine.status().await;
        assert!(!status.running);
        assert_eq!(status.logs.len(), 1);
        assert!(status.logs[0].message.contains("start failed"));

        settle().await;
        assert_eq!(follower.order_count(), 0);
    }

    #[tokio::test]
    async fn test_follower_auth_failure_reported() {
        let master = Arc::new(MockBroker::new("M1"));
        let follower = Arc::new(MockBroker::failing_auth());

        let mut engine = SyncEngine::new(test_config());
        let result = engine.start(master, follower).await;

        assert!(matches!(result, Err(EngineError::FollowerAuth(_))));
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn test_account_resolution_failure() {
        let master = Arc::new(MockBroker::without_account());
        let follower = Arc::new(MockBroker::new("F1"));

        let mut engine = SyncEngine::new(test_config());
        let result = engine.start(master, follower).await;

        match result {
            Err(EngineError::AccountResolution(role)) => assert_eq!(role, "master"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_ratio_rejected() {
        let mut engine = SyncEngine::new(EngineConfig {
            ratio: 0.0,
            ..test_config()
        });

        let result = engine
            .start(
                Arc::new(MockBroker::new("M1")),
                Arc::new(MockBroker::new("F1")),
            )
            .await;

        assert!(matches!(result, Err(EngineError::InvalidRatio(_))));
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let mut engine = SyncEngine::new(test_config());
        engine
            .start(
                Arc::new(MockBroker::new("M1")),
                Arc::new(MockBroker::new("F1")),
            )
            .await
            .unwrap();

        let again = engine
            .start(
                Arc::new(MockBroker::new("M1")),
                Arc::new(MockBroker::new("F1")),
            )
            .await;
        assert!(matches!(again, Err(EngineError::AlreadyRunning)));

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_cycle_copies_new_positions() {
        let master = Arc::new(
            MockBroker::new("M1")
                .with_positions(vec![Position::new("ES", 2, OrderSide::Buy)]),
        );
        let follower = Arc::new(MockBroker::new("F1"));

        let mut engine = SyncEngine::new(test_config());
        engine.start(master, follower.clone()).await.unwrap();
        settle().await;

        let status = engine.status().await;
        assert!(status.running);
        assert_eq!(status.positions.master.len(), 1);
        assert!(status.logs.iter().any(|e| e.message.contains("copied")));

        let orders = follower.orders.lock().unwrap().clone();
        assert_eq!(orders, vec![("ES".to_string(), 2, OrderSide::Buy)]);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_halts_future_orders() {
        let master = Arc::new(
            MockBroker::new("M1")
                .with_positions(vec![Position::new("NQ", 3, OrderSide::Buy)]),
        );
        let follower = Arc::new(MockBroker::new("F1"));

        let mut engine = SyncEngine::new(test_config());
        engine.start(master, follower.clone()).await.unwrap();
        settle().await;

        engine.stop().await;
        let placed = follower.order_count();
        assert!(placed >= 1);

        // Worker is joined; no further orders may appear.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(follower.order_count(), placed);

        let status = engine.status().await;
        assert!(!status.running);
        assert!(status.logs.iter().any(|e| e.message.contains("stopped")));
    }

    #[tokio::test]
    async fn test_status_logs_stay_bounded() {
        // Follower always reports empty positions, so every cycle re-emits
        // the same corrective order and appends a log entry.
        let master = Arc::new(
            MockBroker::new("M1")
                .with_positions(vec![Position::new("ES", 1, OrderSide::Buy)]),
        );
        let follower = Arc::new(MockBroker::new("F1"));

        let mut engine = SyncEngine::new(EngineConfig {
            poll_interval: Duration::from_millis(1),
            ..EngineConfig::default()
        });
        engine.start(master, follower.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        engine.stop().await;

        assert!(follower.order_count() > 1);

        let status = engine.status().await;
        assert!(status.logs.len() <= 20);
        // Newest first
        for pair in status.logs.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn test_dry_run_places_no_orders() {
        let master = Arc::new(
            MockBroker::new("M1")
                .with_positions(vec![Position::new("ES", 2, OrderSide::Buy)]),
        );
        let follower = Arc::new(MockBroker::new("F1"));

        let mut engine = SyncEngine::new(EngineConfig {
            dry_run: true,
            ..test_config()
        });
        engine.start(master, follower.clone()).await.unwrap();
        settle().await;
        engine.stop().await;

        assert_eq!(follower.order_count(), 0);
        let status = engine.status().await;
        assert!(status.logs.iter().any(|e| e.message.contains("[dry run]")));
    }

    #[tokio::test]
    async fn test_failed_order_attempt_is_logged() {
        let master = Arc::new(
            MockBroker::new("M1")
                .with_positions(vec![Position::new("CL", 1, OrderSide::Sell)]),
        );
        let follower = Arc::new(MockBroker {
            confirm_orders: false,
            ..MockBroker::new("F1")
        });

        let mut engine = SyncEngine::new(test_config());
        engine.start(master, follower.clone()).await.unwrap();
        settle().await;
        engine.stop().await;

        let status = engine.status().await;
        assert!(status.logs.iter().any(|e| e.message.contains("order failed")));
    }

    #[tokio::test]
    async fn test_failed_balance_refresh_marks_snapshot_stale() {
        let master = Arc::new(MockBroker {
            balance_available: false,
            ..MockBroker::new("M1")
        });
        let follower = Arc::new(MockBroker::new("F1"));

        let mut engine = SyncEngine::new(test_config());
        engine.start(master, follower).await.unwrap();
        settle().await;

        let status = engine.status().await;
        assert!(status.running);
        assert!(status.balance.master.stale);
        assert!(!status.balance.follower.stale);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_on_idle_engine_is_a_no_op() {
        let mut engine = SyncEngine::new(test_config());
        engine.stop().await;

        let status = engine.status().await;
        assert!(!status.running);
        assert!(status.logs.is_empty());
    }
}
