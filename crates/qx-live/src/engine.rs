use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use rust_decimal::Decimal;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use qx_types::event::{priority, Event, EventKind};
use qx_types::market::MarketEvent;
use qx_types::orders::{Fill, Order, OrderId, OrderStatus};
use qx_types::portfolio::{Account, EngineStateSnapshot, Position};

use crate::broker::Broker;
use crate::config::EngineSettings;
use crate::errors::EngineError;
use crate::event_bus::EventBus;
use crate::order_manager::OrderManager;
use crate::pnl::PnlTracker;
use crate::position_sync::PositionSynchronizer;
use crate::state_store::StateStore;
use crate::strategy::Strategy;
use crate::validator::OrderValidator;
use qx_risk::{RiskSeverity, RiskSupervisor};

/// Lifecycle states of the Execution Engine (C9), spec.md §4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

/// Notable things that happened during a run, drained by callers the way the
/// teacher's `LiveEngine::drain_events` works.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started,
    Stopped,
    Paused,
    Resumed,
    OrderSubmitted(OrderId),
    OrderFilled(OrderId),
    OrderRejectedByValidator { order_id: OrderId, reasons: Vec<String> },
    OrderRejectedByRisk { order_id: OrderId, reasons: Vec<String> },
    OrderRejectedByBroker { order_id: OrderId, reason: String },
    KillSwitchTripped { reason: String },
    PositionReconciliation { summary: String },
    Error(String),
}

/// A point-in-time rollup of engine health, returned by
/// [`ExecutionEngine::get_statistics`].
#[derive(Debug, Clone)]
pub struct EngineStatistics {
    pub state: EngineState,
    pub open_orders: usize,
    pub filled_orders: usize,
    pub rejected_orders: usize,
    pub open_positions: usize,
    pub total_pnl: Decimal,
    pub current_drawdown: Decimal,
    pub reconnect_attempts: u32,
}

type StatusCallback = dyn Fn(EngineState) + Send + Sync;
type ErrorCallback = dyn Fn(&str) + Send + Sync;

struct EngineInner<B: Broker, S: Strategy> {
    broker: Arc<B>,
    strategy: AsyncMutex<S>,
    risk: Arc<RiskSupervisor>,
    validator: OrderValidator,
    order_manager: Arc<OrderManager>,
    position_sync: Arc<PositionSynchronizer>,
    pnl: SyncMutex<PnlTracker>,
    event_bus: Arc<EventBus>,
    state_store: Option<Arc<StateStore>>,
    settings: EngineSettings,
    state: SyncMutex<EngineState>,
    positions: SyncMutex<HashMap<String, Position>>,
    account: SyncMutex<Account>,
    events: SyncMutex<Vec<EngineEvent>>,
    workers: SyncMutex<Vec<JoinHandle<()>>>,
    reconnect_attempts: AtomicU32,
    status_callbacks: SyncMutex<Vec<Box<StatusCallback>>>,
    error_callbacks: SyncMutex<Vec<Box<ErrorCallback>>>,
}

/// The Execution Engine (C9): orchestrates every other component through a
/// start/stop lifecycle, background workers, and crash recovery.
pub struct ExecutionEngine<B: Broker + 'static, S: Strategy + 'static> {
    inner: Arc<EngineInner<B, S>>,
}

impl<B: Broker + 'static, S: Strategy + 'static> Clone for ExecutionEngine<B, S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<B: Broker + 'static, S: Strategy + 'static> ExecutionEngine<B, S> {
    pub fn new(
        broker: Arc<B>,
        strategy: S,
        risk: Arc<RiskSupervisor>,
        settings: EngineSettings,
        state_store: Option<Arc<StateStore>>,
        starting_account: Account,
    ) -> Self {
        let event_bus = EventBus::new(settings.event_bus.max_queue_size);
        let initial_capital = starting_account.equity();
        Self {
            inner: Arc::new(EngineInner {
                broker,
                strategy: AsyncMutex::new(strategy),
                risk,
                validator: OrderValidator::new(),
                order_manager: Arc::new(OrderManager::new()),
                position_sync: Arc::new(PositionSynchronizer::new(Decimal::new(1, 2))),
                pnl: SyncMutex::new(PnlTracker::new(initial_capital)),
                event_bus,
                state_store,
                settings,
                state: SyncMutex::new(EngineState::Created),
                positions: SyncMutex::new(HashMap::new()),
                account: SyncMutex::new(starting_account),
                events: SyncMutex::new(Vec::new()),
                workers: SyncMutex::new(Vec::new()),
                reconnect_attempts: AtomicU32::new(0),
                status_callbacks: SyncMutex::new(Vec::new()),
                error_callbacks: SyncMutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.lock()
    }

    /// Current lifecycle state, named to match spec.md's status-polling
    /// operation distinctly from the internal [`ExecutionEngine::state`]
    /// accessor used by the background workers.
    pub fn get_status(&self) -> EngineState {
        self.state()
    }

    /// A rollup of order, position, and P&L counters, queryable without
    /// draining the event log.
    pub fn get_statistics(&self) -> EngineStatistics {
        let order_stats = self.inner.order_manager.get_statistics();
        let pnl = self.inner.pnl.lock();
        EngineStatistics {
            state: self.state(),
            open_orders: order_stats.open_orders,
            filled_orders: order_stats.filled_orders,
            rejected_orders: order_stats.rejected_orders,
            open_positions: self.inner.positions.lock().values().filter(|p| !p.is_flat()).count(),
            total_pnl: pnl.get_total_pnl(),
            current_drawdown: pnl.get_current_drawdown(),
            reconnect_attempts: self.inner.reconnect_attempts.load(Ordering::SeqCst),
        }
    }

    /// Subscribe to lifecycle transitions (`Running` -> `Paused`, etc.).
    /// Callbacks run synchronously on whichever thread drove the transition.
    pub fn register_status_callback(&self, callback: impl Fn(EngineState) + Send + Sync + 'static) {
        self.inner.status_callbacks.lock().push(Box::new(callback));
    }

    /// Subscribe to fatal/degraded conditions (reconnect exhaustion, broker
    /// rejections surfaced as engine-level errors).
    pub fn register_error_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.inner.error_callbacks.lock().push(Box::new(callback));
    }

    fn notify_status(&self, state: EngineState) {
        for callback in self.inner.status_callbacks.lock().iter() {
            callback(state);
        }
    }

    fn notify_error(&self, message: &str) {
        for callback in self.inner.error_callbacks.lock().iter() {
            callback(message);
        }
    }

    /// Suspend order submission without tearing down workers or the broker
    /// connection. Called automatically when a Critical risk violation
    /// fires; callers may also pause manually (e.g. ahead of a deploy).
    pub fn pause(&self) -> Result<(), EngineError> {
        {
            let mut state = self.inner.state.lock();
            if *state != EngineState::Running {
                return Err(EngineError::NotRunning);
            }
            *state = EngineState::Paused;
        }
        warn!("execution engine paused");
        self.emit(EngineEvent::Paused);
        self.notify_status(EngineState::Paused);
        Ok(())
    }

    /// Resume order submission after [`ExecutionEngine::pause`]. Refuses to
    /// resume while the kill switch is still active.
    pub fn resume(&self) -> Result<(), EngineError> {
        if self.inner.risk.is_kill_switch_active() {
            return Err(EngineError::RiskViolation { reason: "kill switch is still active".to_string() });
        }
        {
            let mut state = self.inner.state.lock();
            if *state != EngineState::Paused {
                return Err(EngineError::Fatal { reason: "engine is not paused".to_string() });
            }
            *state = EngineState::Running;
        }
        info!("execution engine resumed");
        self.emit(EngineEvent::Resumed);
        self.notify_status(EngineState::Running);
        Ok(())
    }

    pub fn drain_events(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.inner.events.lock())
    }

    fn emit(&self, event: EngineEvent) {
        self.inner.events.lock().push(event);
    }

    /// Bring the engine up: recover from any unclean prior shutdown, connect
    /// the broker, start the event bus, notify the strategy, wire bus
    /// dispatch, and spawn the position-sync and heartbeat background
    /// workers.
    pub async fn start(&self) -> Result<(), EngineError> {
        {
            let mut state = self.inner.state.lock();
            if *state == EngineState::Running || *state == EngineState::Starting {
                return Err(EngineError::AlreadyRunning);
            }
            *state = EngineState::Starting;
        }

        if let Some(store) = &self.inner.state_store {
            if store.has_unrecovered_crash().map_err(EngineError::from)? {
                warn!("recovering from unclean prior shutdown");
                if let Some(snapshot) = store.get_latest_state().map_err(EngineError::from)? {
                    self.restore_from_snapshot(&snapshot);
                }
                store.mark_crash_recovered().map_err(EngineError::from)?;
            }
            store.mark_crash("engine starting", None).map_err(EngineError::from)?;
        }

        self.inner.broker.connect().await?;
        self.inner.event_bus.start();
        self.wire_event_subscriptions();

        {
            let mut strategy = self.inner.strategy.lock().await;
            strategy.set_event_bus(Arc::clone(&self.inner.event_bus));
            strategy.on_start().await;
        }

        self.spawn_workers();

        *self.inner.state.lock() = EngineState::Running;
        let _ = self.inner.event_bus.publish(Event::new(
            priority::SYSTEM,
            EventKind::SystemStart,
            "engine",
            serde_json::Value::Null,
        ));
        self.emit(EngineEvent::Started);
        info!("execution engine started");
        Ok(())
    }

    /// Subscribe to the bus so that strategy-emitted signals, market data,
    /// and out-of-band fill notifications are dispatched through the engine
    /// rather than requiring callers to invoke `submit_order`/`on_market_event`
    /// directly. The dispatcher runs on its own OS thread (see
    /// [`EventBus::start`]), so handlers bridge back onto the tokio runtime
    /// via the captured [`tokio::runtime::Handle`].
    fn wire_event_subscriptions(&self) {
        let handle = tokio::runtime::Handle::current();

        {
            let engine = self.clone();
            let handle = handle.clone();
            self.inner.event_bus.subscribe(EventKind::Signal, move |event| {
                match serde_json::from_value::<Order>(event.payload.clone()) {
                    Ok(order) => {
                        let engine = engine.clone();
                        handle.spawn(async move {
                            if let Err(err) = engine.submit_order(order).await {
                                warn!(?err, "failed to submit order raised from a signal event");
                            }
                        });
                    }
                    Err(err) => warn!(?err, "signal event payload was not a valid order"),
                }
            });
        }

        {
            let engine = self.clone();
            let handle = handle.clone();
            self.inner.event_bus.subscribe(EventKind::MarketData, move |event| {
                match serde_json::from_value::<MarketEvent>(event.payload.clone()) {
                    Ok(market_event) => {
                        let engine = engine.clone();
                        handle.spawn(async move {
                            engine.on_market_event(market_event).await;
                        });
                    }
                    Err(err) => warn!(?err, "market data event payload was not a valid market event"),
                }
            });
        }

        {
            let engine = self.clone();
            self.inner.event_bus.subscribe(EventKind::Fill, move |event| {
                match serde_json::from_value::<Fill>(event.payload.clone()) {
                    Ok(fill) => {
                        let engine = engine.clone();
                        handle.spawn(async move {
                            engine.on_fill_event(fill).await;
                        });
                    }
                    Err(err) => warn!(?err, "fill event payload was not a valid fill"),
                }
            });
        }
    }

    /// Publish a strategy-generated order onto the bus instead of calling
    /// [`ExecutionEngine::submit_order`] directly. Dispatched by the
    /// subscription wired in [`ExecutionEngine::start`].
    pub fn publish_signal(&self, order: Order) -> Result<(), EngineError> {
        let payload = serde_json::to_value(&order).map_err(|err| EngineError::Fatal { reason: err.to_string() })?;
        self.inner
            .event_bus
            .publish(Event::new(priority::SIGNAL, EventKind::Signal, "engine", payload))
            .map_err(|err| EngineError::Fatal { reason: err.to_string() })
    }

    /// Publish a market data tick onto the bus instead of calling
    /// [`ExecutionEngine::on_market_event`] directly.
    pub fn publish_market_event(&self, event: MarketEvent) -> Result<(), EngineError> {
        let payload = serde_json::to_value(&event).map_err(|err| EngineError::Fatal { reason: err.to_string() })?;
        self.inner
            .event_bus
            .publish(Event::new(priority::MARKET_DATA, EventKind::MarketData, "engine", payload))
            .map_err(|err| EngineError::Fatal { reason: err.to_string() })
    }

    /// Publish an out-of-band fill notification (e.g. a broker push that
    /// arrived outside the `submit_order` request/response cycle).
    pub fn publish_fill(&self, fill: Fill) -> Result<(), EngineError> {
        let payload = serde_json::to_value(&fill).map_err(|err| EngineError::Fatal { reason: err.to_string() })?;
        self.inner
            .event_bus
            .publish(Event::new(priority::FILL, EventKind::Fill, "engine", payload))
            .map_err(|err| EngineError::Fatal { reason: err.to_string() })
    }

    fn restore_from_snapshot(&self, snapshot: &EngineStateSnapshot) {
        let mut positions = self.inner.positions.lock();
        for (symbol, position) in &snapshot.positions {
            positions.insert(symbol.clone(), position.clone());
        }
        info!(positions = positions.len(), "restored positions from last snapshot");
    }

    fn spawn_workers(&self) {
        let position_sync_interval = self.inner.settings.position_sync_interval();
        let heartbeat_interval = self.inner.settings.heartbeat_interval();

        let sync_engine = self.clone();
        let sync_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(position_sync_interval);
            loop {
                ticker.tick().await;
                if sync_engine.state() != EngineState::Running {
                    break;
                }
                sync_engine.run_position_sync().await;
            }
        });

        let heartbeat_engine = self.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                ticker.tick().await;
                if heartbeat_engine.state() != EngineState::Running {
                    break;
                }
                heartbeat_engine.run_heartbeat().await;
            }
        });

        self.inner.workers.lock().extend([sync_handle, heartbeat_handle]);
    }

    async fn run_position_sync(&self) {
        let broker_positions = match self.inner.broker.get_positions().await {
            Ok(positions) => positions
                .into_iter()
                .map(|p| (p.symbol.to_string(), p))
                .collect::<HashMap<_, _>>(),
            Err(err) => {
                error!(?err, "position sync failed to fetch broker positions");
                return;
            }
        };
        let mut local = self.inner.positions.lock();
        let report = self.inner.position_sync.sync(&mut local, &broker_positions);
        if report.has_discrepancies() {
            self.emit(EngineEvent::PositionReconciliation { summary: report.summary() });
        }
    }

    /// Publish a heartbeat and, if the broker has dropped, attempt a bounded
    /// number of reconnects with a fixed delay between attempts, mirroring
    /// [`crate::market_stream::MarketDataStream::reconnect`]. Exhausting the
    /// budget moves the engine to [`EngineState::Error`] rather than
    /// retrying forever.
    async fn run_heartbeat(&self) {
        let _ = self.inner.event_bus.publish(Event::new(
            priority::HEARTBEAT,
            EventKind::Heartbeat,
            "engine",
            serde_json::Value::Null,
        ));

        if self.inner.broker.is_connected().await {
            self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
            return;
        }

        let attempt = self.inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.inner.settings.max_reconnect_attempts {
            let message = format!("exceeded {} reconnect attempts", self.inner.settings.max_reconnect_attempts);
            error!(attempts = attempt, "{}", message);
            *self.inner.state.lock() = EngineState::Error;
            self.emit(EngineEvent::Error(message.clone()));
            self.notify_status(EngineState::Error);
            self.notify_error(&message);
            return;
        }

        warn!(attempt, "broker disconnected, attempting reconnect");
        tokio::time::sleep(self.inner.settings.reconnect_delay()).await;
        match self.inner.broker.connect().await {
            Ok(()) => {
                info!(attempt, "broker reconnected");
                self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
            }
            Err(err) => error!(?err, attempt, "reconnect attempt failed"),
        }
    }

    /// Validate, risk-check, and route an order to the broker. Returns the
    /// broker-acknowledged order on success. In `dry_run` mode the order is
    /// tracked and validated but never reaches the broker.
    pub async fn submit_order(&self, order: Order) -> Result<Order, EngineError> {
        if self.state() != EngineState::Running {
            return Err(EngineError::NotRunning);
        }

        let validation_failures = self.inner.validator.validate(&order);
        if !validation_failures.is_empty() {
            let reasons: Vec<String> = validation_failures.iter().map(|f| f.message.clone()).collect();
            self.emit(EngineEvent::OrderRejectedByValidator { order_id: order.id.clone(), reasons: reasons.clone() });
            return Err(EngineError::ValidationFailure { reason: reasons.join("; ") });
        }

        let account = self.inner.account.lock().clone();
        let positions = self.inner.positions.lock().clone();
        let outcome = self.inner.risk.check_order(&order, &account, &positions);
        if !outcome.safe {
            let reasons: Vec<String> = outcome.violations.iter().map(|v| v.message.clone()).collect();
            self.emit(EngineEvent::OrderRejectedByRisk { order_id: order.id.clone(), reasons: reasons.clone() });
            if outcome.violations.iter().any(|v| v.severity == RiskSeverity::Critical) {
                warn!(order_id = %order.id, "critical risk violation fired, pausing engine");
                self.emit(EngineEvent::KillSwitchTripped { reason: reasons.join("; ") });
                let _ = self.pause();
            }
            return Err(EngineError::RiskViolation { reason: reasons.join("; ") });
        }

        self.inner.order_manager.track(order.clone());
        self.inner.risk.record_order_submission();

        if self.inner.settings.dry_run {
            info!(order_id = %order.id, "dry run: order validated and tracked but not sent to broker");
            self.emit(EngineEvent::OrderSubmitted(order.id.clone()));
            return Ok(order);
        }

        match self.inner.broker.place_order(order.clone()).await {
            Ok(placed) => {
                self.inner.order_manager.track(placed.clone());
                self.emit(EngineEvent::OrderSubmitted(placed.id.clone()));
                if placed.status == OrderStatus::Filled || placed.status == OrderStatus::PartiallyFilled {
                    self.handle_fill(&placed).await;
                }
                Ok(placed)
            }
            Err(err) => {
                self.emit(EngineEvent::OrderRejectedByBroker { order_id: order.id.clone(), reason: err.to_string() });
                Err(EngineError::Broker(err))
            }
        }
    }

    /// Apply a fill that arose from this engine's own `submit_order` call
    /// (the broker already reflects it in the returned order).
    async fn handle_fill(&self, order: &Order) {
        let Some(avg_price) = order.average_fill_price else { return };
        let fill = Fill::new(
            order.id.clone(),
            order.symbol.clone(),
            order.side,
            order.filled_quantity,
            avg_price,
            Decimal::ZERO,
            order.strategy_id.clone(),
        );
        self.apply_fill_effects(fill).await;
    }

    /// Apply a fill delivered independently of `submit_order` (a bus-borne
    /// broker push). Unlike [`ExecutionEngine::handle_fill`], this advances
    /// the tracked order's own state machine via the order manager first.
    async fn on_fill_event(&self, fill: Fill) {
        match self.inner.order_manager.apply_fill(&fill) {
            Ok(_) => self.apply_fill_effects(fill).await,
            Err(err) => warn!(?err, order_id = %fill.order_id, "received a fill for an unknown or terminal order"),
        }
    }

    async fn apply_fill_effects(&self, fill: Fill) {
        {
            let mut positions = self.inner.positions.lock();
            let position = positions
                .entry(fill.symbol.to_string())
                .or_insert_with(|| Position::new(fill.symbol.clone()));
            position.apply_fill(&fill);
        }
        self.inner.pnl.lock().record_fill(&fill.symbol, &fill);

        {
            let mut strategy = self.inner.strategy.lock().await;
            strategy.on_fill(&fill).await;
        }
        self.emit(EngineEvent::OrderFilled(fill.order_id.clone()));
    }

    /// Feed a market data event to the strategy and update any held
    /// position's mark.
    pub async fn on_market_event(&self, event: MarketEvent) {
        {
            let mut positions = self.inner.positions.lock();
            if let Some(position) = positions.get_mut(&event.symbol().to_string()) {
                position.update_mark(event.price());
            }
        }
        let mut strategy = self.inner.strategy.lock().await;
        strategy.on_data(&event).await;
    }

    fn snapshot(&self) -> EngineStateSnapshot {
        EngineStateSnapshot {
            timestamp: Utc::now(),
            state: format!("{:?}", self.state()),
            strategy_name: std::any::type_name::<S>().to_string(),
            broker_name: std::any::type_name::<B>().to_string(),
            positions: self.inner.positions.lock().clone(),
            pending_order_ids: self
                .inner
                .order_manager
                .open_orders()
                .into_iter()
                .map(|o| o.id.0)
                .collect(),
            statistics: HashMap::new(),
        }
    }

    /// Stop cleanly: notify the strategy, disconnect the broker, persist a
    /// final snapshot, and stop the event bus and background workers.
    pub async fn stop(&self) -> Result<(), EngineError> {
        *self.inner.state.lock() = EngineState::Stopping;

        {
            let mut strategy = self.inner.strategy.lock().await;
            strategy.on_stop().await;
        }

        let _ = self.inner.broker.disconnect().await;

        if let Some(store) = &self.inner.state_store {
            let snapshot = self.snapshot();
            let _state_id = store.save_state(&snapshot).map_err(EngineError::from)?;
            store.mark_crash_recovered().map_err(EngineError::from)?;
        }

        self.inner.event_bus.stop(std::time::Duration::from_secs(5));

        for handle in std::mem::take(&mut *self.inner.workers.lock()) {
            handle.abort();
        }

        *self.inner.state.lock() = EngineState::Stopped;
        self.emit(EngineEvent::Stopped);
        info!("execution engine stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperBroker;
    use crate::strategy::NoopStrategy;
    use qx_types::market::Symbol;
    use qx_types::orders::Side;
    use rust_decimal_macros::dec;
    use std::time::Duration as StdDuration;

    fn account() -> Account {
        Account::new("acc-1", dec!(100_000))
    }

    #[tokio::test]
    async fn start_then_stop_cycles_lifecycle() {
        let broker = Arc::new(PaperBroker::with_defaults());
        let risk = Arc::new(RiskSupervisor::new(Default::default(), dec!(100_000)));
        let engine = ExecutionEngine::new(broker, NoopStrategy::new(), risk, EngineSettings::default(), None, account());

        engine.start().await.unwrap();
        assert_eq!(engine.state(), EngineState::Running);

        engine.stop().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn submit_order_before_start_is_rejected() {
        let broker = Arc::new(PaperBroker::with_defaults());
        let risk = Arc::new(RiskSupervisor::new(Default::default(), dec!(100_000)));
        let engine = ExecutionEngine::new(broker, NoopStrategy::new(), risk, EngineSettings::default(), None, account());

        let order = Order::market(Symbol::equity("AAPL"), Side::Buy, dec!(1), "s");
        let err = engine.submit_order(order).await.unwrap_err();
        assert!(matches!(err, EngineError::NotRunning));
    }

    #[tokio::test]
    async fn submitted_order_fills_and_updates_strategy_positions() {
        let broker = Arc::new(PaperBroker::with_defaults());
        broker.update_price(&Symbol::equity("AAPL"), dec!(100));
        let risk = Arc::new(RiskSupervisor::new(Default::default(), dec!(100_000)));
        let engine = ExecutionEngine::new(broker, NoopStrategy::new(), risk, EngineSettings::default(), None, account());
        engine.start().await.unwrap();

        let order = Order::market(Symbol::equity("AAPL"), Side::Buy, dec!(10), "s");
        let placed = engine.submit_order(order).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Filled);

        let events = engine.drain_events();
        assert!(events.iter().any(|e| matches!(e, EngineEvent::OrderFilled(_))));
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn dry_run_tracks_order_without_calling_broker() {
        let broker = Arc::new(PaperBroker::with_defaults());
        broker.update_price(&Symbol::equity("AAPL"), dec!(100));
        let risk = Arc::new(RiskSupervisor::new(Default::default(), dec!(100_000)));
        let settings = EngineSettings { dry_run: true, ..Default::default() };
        let engine = ExecutionEngine::new(broker, NoopStrategy::new(), risk, settings, None, account());
        engine.start().await.unwrap();

        let order = Order::market(Symbol::equity("AAPL"), Side::Buy, dec!(10), "s");
        let placed = engine.submit_order(order).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Created);
        assert!(engine.inner.order_manager.get(&placed.id).is_some());

        let events = engine.drain_events();
        assert!(!events.iter().any(|e| matches!(e, EngineEvent::OrderFilled(_))));
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn kill_switch_violation_pauses_the_engine() {
        let broker = Arc::new(PaperBroker::with_defaults());
        broker.update_price(&Symbol::equity("AAPL"), dec!(100));
        let risk = Arc::new(RiskSupervisor::new(Default::default(), dec!(100_000)));
        risk.trigger_kill_switch("manual halt");
        let engine = ExecutionEngine::new(broker, NoopStrategy::new(), risk, EngineSettings::default(), None, account());
        engine.start().await.unwrap();

        let order = Order::market(Symbol::equity("AAPL"), Side::Buy, dec!(1), "s");
        let err = engine.submit_order(order).await.unwrap_err();
        assert!(matches!(err, EngineError::RiskViolation { .. }));
        assert_eq!(engine.state(), EngineState::Paused);
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips() {
        let broker = Arc::new(PaperBroker::with_defaults());
        let risk = Arc::new(RiskSupervisor::new(Default::default(), dec!(100_000)));
        let engine = ExecutionEngine::new(broker, NoopStrategy::new(), risk, EngineSettings::default(), None, account());
        engine.start().await.unwrap();

        engine.pause().unwrap();
        assert_eq!(engine.get_status(), EngineState::Paused);

        let order = Order::market(Symbol::equity("AAPL"), Side::Buy, dec!(1), "s");
        let err = engine.submit_order(order).await.unwrap_err();
        assert!(matches!(err, EngineError::NotRunning));

        engine.resume().unwrap();
        assert_eq!(engine.get_status(), EngineState::Running);
    }

    #[tokio::test]
    async fn heartbeat_exhausts_reconnect_budget_and_errors_out() {
        let broker = Arc::new(PaperBroker::with_defaults());
        let risk = Arc::new(RiskSupervisor::new(Default::default(), dec!(100_000)));
        let settings = EngineSettings { max_reconnect_attempts: 0, reconnect_delay_secs: 0, ..Default::default() };
        let engine = ExecutionEngine::new(broker.clone(), NoopStrategy::new(), risk, settings, None, account());
        engine.start().await.unwrap();

        broker.disconnect().await.unwrap();
        engine.run_heartbeat().await;

        assert_eq!(engine.state(), EngineState::Error);
        let events = engine.drain_events();
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Error(_))));
    }

    #[tokio::test]
    async fn publish_signal_is_dispatched_from_the_bus() {
        let broker = Arc::new(PaperBroker::with_defaults());
        broker.update_price(&Symbol::equity("AAPL"), dec!(100));
        let risk = Arc::new(RiskSupervisor::new(Default::default(), dec!(100_000)));
        let engine = ExecutionEngine::new(broker, NoopStrategy::new(), risk, EngineSettings::default(), None, account());
        engine.start().await.unwrap();

        let order = Order::market(Symbol::equity("AAPL"), Side::Buy, dec!(5), "s");
        engine.publish_signal(order).unwrap();

        tokio::time::sleep(StdDuration::from_millis(200)).await;
        let stats = engine.get_statistics();
        assert_eq!(stats.filled_orders, 1);

        engine.stop().await.unwrap();
    }
}
