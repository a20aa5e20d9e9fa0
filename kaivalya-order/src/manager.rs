use crate::models::{Order, OrderStatus};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Holds the orders of running checkouts and the ones kept for reconciliation.
///
/// Terminal orders are dropped once their run is over, except those flagged for
/// reconciliation. Ids are never reused, even after an order was dropped.
pub struct OrderManager {
    orders: HashMap<Uuid, Order>,
    retired: HashSet<Uuid>,
}

impl OrderManager {
    pub fn new() -> Self {
        Self {
            orders: HashMap::new(),
            retired: HashSet::new(),
        }
    }

    pub fn insert(&mut self, order: Order) -> Result<(), OrderError> {
        if self.orders.contains_key(&order.id) || self.retired.contains(&order.id) {
            return Err(OrderError::DuplicateId(order.id));
        }
        self.orders.insert(order.id, order);
        Ok(())
    }

    pub fn get(&self, order_id: &Uuid) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn get_mut(&mut self, order_id: &Uuid) -> Result<&mut Order, OrderError> {
        self.orders
            .get_mut(order_id)
            .ok_or(OrderError::NotFound(*order_id))
    }

    /// Guarded status change; returns a snapshot of the updated order
    pub fn transition(&mut self, order_id: &Uuid, next: OrderStatus) -> Result<Order, OrderError> {
        let order = self.get_mut(order_id)?;
        order.transition(next)?;
        Ok(order.clone())
    }

    /// Drop a finished order. Orders awaiting reconciliation stay.
    pub fn discard(&mut self, order_id: &Uuid) -> Option<Order> {
        match self.orders.get(order_id) {
            Some(order) if order.needs_reconciliation || !order.status.is_terminal() => None,
            Some(_) => {
                self.retired.insert(*order_id);
                self.orders.remove(order_id)
            }
            None => None,
        }
    }

    pub fn reconciliation_queue(&self) -> Vec<Order> {
        let mut queue: Vec<Order> = self
            .orders
            .values()
            .filter(|o| o.needs_reconciliation)
            .cloned()
            .collect();
        queue.sort_by_key(|o| o.created_at);
        queue
    }

    pub fn active_count(&self) -> usize {
        self.orders.values().filter(|o| !o.status.is_terminal()).count()
    }
}

impl Default for OrderManager {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Order id already used: {0}")]
    DuplicateId(Uuid),

    #[error("Order {order_id}: invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
}
