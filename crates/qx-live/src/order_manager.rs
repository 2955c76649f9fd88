use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, warn};

use qx_types::orders::{Fill, Order, OrderId, OrderStatus};

/// Errors raised while tracking an order's lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum OrderManagerError {
    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("order {0} is already terminal and cannot accept {1}")]
    AlreadyTerminal(OrderId, &'static str),
}

/// Lifecycle events an interested party can subscribe to via
/// [`OrderManager::register_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderManagerEvent {
    Submitted,
    Filled,
    Rejected,
    Cancelled,
    Expired,
}

type Callback = dyn Fn(&Order) + Send + Sync;

/// Aggregate counts over the orders and fills this manager has tracked.
#[derive(Debug, Clone, Default)]
pub struct OrderManagerStatistics {
    pub total_orders: usize,
    pub open_orders: usize,
    pub filled_orders: usize,
    pub rejected_orders: usize,
    pub cancelled_orders: usize,
    pub total_fills: usize,
    pub total_commission: Decimal,
}

/// The Order Manager (C6): owns the canonical in-memory copy of every order
/// this engine has submitted, and is the only component allowed to transition
/// an order's status. Every mutation goes through here so `OrderStatus`'s
/// state machine invariant (spec.md §4.6) holds for the whole process.
pub struct OrderManager {
    orders: DashMap<OrderId, Order>,
    fills: Mutex<Vec<Fill>>,
    callbacks: DashMap<OrderManagerEvent, Vec<Arc<Callback>>>,
}

impl OrderManager {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            fills: Mutex::new(Vec::new()),
            callbacks: DashMap::new(),
        }
    }

    /// Subscribe to an order lifecycle event. Callbacks run synchronously, in
    /// registration order, on the thread that drove the transition.
    pub fn register_callback(&self, event: OrderManagerEvent, callback: impl Fn(&Order) + Send + Sync + 'static) {
        self.callbacks.entry(event).or_default().push(Arc::new(callback));
    }

    fn fire(&self, event: OrderManagerEvent, order: &Order) {
        if let Some(callbacks) = self.callbacks.get(&event) {
            for callback in callbacks.iter() {
                callback(order);
            }
        }
    }

    pub fn track(&self, order: Order) {
        self.orders.insert(order.id.clone(), order);
    }

    pub fn get(&self, order_id: &OrderId) -> Option<Order> {
        self.orders.get(order_id).map(|o| o.clone())
    }

    pub fn mark_submitted(&self, order_id: &OrderId) -> Result<(), OrderManagerError> {
        let mut entry = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| OrderManagerError::NotFound(order_id.clone()))?;
        if entry.status.is_terminal() {
            return Err(OrderManagerError::AlreadyTerminal(order_id.clone(), "submission"));
        }
        entry.status = OrderStatus::Submitted;
        entry.submitted_at = Some(Utc::now());
        let order = entry.clone();
        drop(entry);
        self.fire(OrderManagerEvent::Submitted, &order);
        Ok(())
    }

    pub fn mark_rejected(&self, order_id: &OrderId) -> Result<(), OrderManagerError> {
        let mut entry = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| OrderManagerError::NotFound(order_id.clone()))?;
        entry.reject();
        let order = entry.clone();
        drop(entry);
        self.fire(OrderManagerEvent::Rejected, &order);
        Ok(())
    }

    /// Apply a fill, advancing the VWAP average fill price per spec.md §4.6
    /// and recording it into this order's fill history.
    pub fn apply_fill(&self, fill: &Fill) -> Result<Order, OrderManagerError> {
        let mut entry = self
            .orders
            .get_mut(&fill.order_id)
            .ok_or_else(|| OrderManagerError::NotFound(fill.order_id.clone()))?;
        if entry.status.is_terminal() {
            return Err(OrderManagerError::AlreadyTerminal(fill.order_id.clone(), "fill"));
        }
        entry.apply_fill(fill.quantity, fill.price, fill.timestamp);
        info!(order_id = %fill.order_id, status = ?entry.status, "order fill applied");
        let order = entry.clone();
        drop(entry);

        self.fills.lock().push(fill.clone());
        if order.status == OrderStatus::Filled {
            self.fire(OrderManagerEvent::Filled, &order);
        }
        Ok(order)
    }

    pub fn cancel(&self, order_id: &OrderId) -> Result<(), OrderManagerError> {
        let mut entry = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| OrderManagerError::NotFound(order_id.clone()))?;
        if entry.status.is_terminal() {
            warn!(order_id = %order_id, "attempted to cancel a terminal order");
            return Err(OrderManagerError::AlreadyTerminal(order_id.clone(), "cancellation"));
        }
        entry.cancel();
        let order = entry.clone();
        drop(entry);
        self.fire(OrderManagerEvent::Cancelled, &order);
        Ok(())
    }

    pub fn expire(&self, order_id: &OrderId) -> Result<(), OrderManagerError> {
        let mut entry = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| OrderManagerError::NotFound(order_id.clone()))?;
        entry.expire();
        let order = entry.clone();
        drop(entry);
        self.fire(OrderManagerEvent::Expired, &order);
        Ok(())
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.orders.iter().filter(|e| e.is_active()).map(|e| e.clone()).collect()
    }

    pub fn all_orders(&self) -> Vec<Order> {
        self.orders.iter().map(|e| e.clone()).collect()
    }

    pub fn get_filled_orders(&self) -> Vec<Order> {
        self.orders.iter().filter(|e| e.status == OrderStatus::Filled).map(|e| e.clone()).collect()
    }

    /// Fills recorded so far, optionally narrowed to a single order.
    pub fn get_fills(&self, order_id: Option<&OrderId>) -> Vec<Fill> {
        let fills = self.fills.lock();
        match order_id {
            Some(id) => fills.iter().filter(|f| &f.order_id == id).cloned().collect(),
            None => fills.clone(),
        }
    }

    pub fn get_statistics(&self) -> OrderManagerStatistics {
        let fills = self.fills.lock();
        let mut stats = OrderManagerStatistics {
            total_fills: fills.len(),
            total_commission: fills.iter().map(|f| f.commission).sum(),
            ..Default::default()
        };
        for entry in self.orders.iter() {
            stats.total_orders += 1;
            match entry.status {
                OrderStatus::Filled => stats.filled_orders += 1,
                OrderStatus::Rejected => stats.rejected_orders += 1,
                OrderStatus::Cancelled | OrderStatus::Expired => stats.cancelled_orders += 1,
                _ if entry.is_active() => stats.open_orders += 1,
                _ => {}
            }
        }
        stats
    }

    pub fn total_open_notional(&self) -> Decimal {
        self.open_orders()
            .iter()
            .filter_map(|o| o.order_type.limit_price().map(|p| p * o.remaining_quantity()))
            .sum()
    }
}

impl Default for OrderManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qx_types::market::Symbol;
    use qx_types::orders::Side;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn new_order() -> Order {
        Order::market(Symbol::equity("AAPL"), Side::Buy, dec!(100), "s")
    }

    #[test]
    fn apply_fill_transitions_through_partial_to_filled() {
        let manager = OrderManager::new();
        let order = new_order();
        let id = order.id.clone();
        manager.track(order);
        manager.mark_submitted(&id).unwrap();

        let fill1 = Fill::new(id.clone(), Symbol::equity("AAPL"), Side::Buy, dec!(40), dec!(150), Decimal::ZERO, "s");
        let updated = manager.apply_fill(&fill1).unwrap();
        assert_eq!(updated.status, OrderStatus::PartiallyFilled);

        let fill2 = Fill::new(id.clone(), Symbol::equity("AAPL"), Side::Buy, dec!(60), dec!(160), Decimal::ZERO, "s");
        let updated = manager.apply_fill(&fill2).unwrap();
        assert_eq!(updated.status, OrderStatus::Filled);
        assert_eq!(updated.average_fill_price, Some(dec!(156)));
        assert_eq!(manager.get_fills(Some(&id)).len(), 2);
        assert_eq!(manager.get_filled_orders().len(), 1);
    }

    #[test]
    fn cancel_rejects_terminal_order() {
        let manager = OrderManager::new();
        let order = new_order();
        let id = order.id.clone();
        manager.track(order);
        manager.mark_rejected(&id).unwrap();
        let err = manager.cancel(&id).unwrap_err();
        assert!(matches!(err, OrderManagerError::AlreadyTerminal(_, "cancellation")));
    }

    #[test]
    fn open_orders_excludes_terminal() {
        let manager = OrderManager::new();
        let a = new_order();
        let b = new_order();
        let a_id = a.id.clone();
        manager.track(a);
        manager.track(b);
        manager.mark_rejected(&a_id).unwrap();
        assert_eq!(manager.open_orders().len(), 1);
        assert_eq!(manager.all_orders().len(), 2);
    }

    #[test]
    fn statistics_count_orders_by_terminal_status() {
        let manager = OrderManager::new();
        let a = new_order();
        let b = new_order();
        let a_id = a.id.clone();
        manager.track(a);
        manager.track(b);
        manager.mark_rejected(&a_id).unwrap();

        let stats = manager.get_statistics();
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.rejected_orders, 1);
        assert_eq!(stats.open_orders, 1);
    }

    #[test]
    fn register_callback_fires_on_fill() {
        let manager = OrderManager::new();
        let order = new_order();
        let id = order.id.clone();
        manager.track(order);
        manager.mark_submitted(&id).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        manager.register_callback(OrderManagerEvent::Filled, move |_order| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        let fill = Fill::new(id.clone(), Symbol::equity("AAPL"), Side::Buy, dec!(100), dec!(150), Decimal::ZERO, "s");
        manager.apply_fill(&fill).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
