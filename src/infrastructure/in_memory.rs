use super::locks::LockTable;
use crate::domain::order::Order;
use crate::domain::ports::{OrderRepository, RefundGuard, RefundStore};
use crate::domain::refund::{PaymentEvent, Refund, RefundId, RefundLineId, repeated_order_line};
use crate::error::{RefundError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// A thread-safe in-memory store for refunds and their payment events.
///
/// Uses `Arc<RwLock<HashMap<RefundId, Refund>>>` to allow shared concurrent access.
/// Ideal for testing or single-run batches where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryRefundStore {
    refunds: Arc<RwLock<HashMap<RefundId, Refund>>>,
    payment_events: Arc<RwLock<Vec<PaymentEvent>>>,
    refund_ids: Arc<AtomicU64>,
    refund_line_ids: Arc<AtomicU64>,
    locks: LockTable,
}

impl InMemoryRefundStore {
    /// Creates a new, empty in-memory refund store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefundStore for InMemoryRefundStore {
    async fn next_refund_id(&self) -> Result<RefundId> {
        Ok(self.refund_ids.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn next_refund_line_id(&self) -> Result<RefundLineId> {
        Ok(self.refund_line_ids.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert(&self, refund: &Refund) -> Result<()> {
        let mut refunds = self.refunds.write().await;
        if refunds.contains_key(&refund.id) {
            return Err(RefundError::Validation(format!(
                "Refund {} already exists",
                refund.id
            )));
        }
        if let Some(order_line) = repeated_order_line(&refund.lines) {
            return Err(RefundError::LineAlreadyRefunded { order_line });
        }

        let taken = refunds
            .values()
            .flat_map(|existing| existing.lines.iter())
            .filter(|line| line.is_active())
            .find(|line| {
                refund
                    .lines
                    .iter()
                    .any(|new_line| new_line.order_line_id == line.order_line_id)
            });
        if let Some(line) = taken {
            return Err(RefundError::LineAlreadyRefunded {
                order_line: line.order_line_id,
            });
        }

        refunds.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn save(&self, refund: &mut Refund) -> Result<()> {
        let mut refunds = self.refunds.write().await;
        let stored = refunds
            .get(&refund.id)
            .ok_or(RefundError::NotFound(refund.id))?;
        if stored.version != refund.version {
            return Err(RefundError::ConcurrentModification(refund.id));
        }

        refund.version += 1;
        refund.updated_at = Utc::now();
        refunds.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn get(&self, refund_id: RefundId) -> Result<Option<Refund>> {
        let refunds = self.refunds.read().await;
        Ok(refunds.get(&refund_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Refund>> {
        let refunds = self.refunds.read().await;
        let mut all: Vec<Refund> = refunds.values().cloned().collect();
        all.sort_by_key(|refund| refund.id);
        Ok(all)
    }

    async fn has_active_refund_line(&self, order_line_id: u64) -> Result<bool> {
        let refunds = self.refunds.read().await;
        Ok(refunds
            .values()
            .flat_map(|refund| refund.lines.iter())
            .any(|line| line.order_line_id == order_line_id && line.is_active()))
    }

    async fn lock(&self, refund_id: RefundId) -> Result<RefundGuard> {
        Ok(self.locks.acquire(refund_id).await)
    }

    async fn record_payment_event(&self, event: PaymentEvent) -> Result<()> {
        self.payment_events.write().await.push(event);
        Ok(())
    }

    async fn payment_events(&self, order_number: &str) -> Result<Vec<PaymentEvent>> {
        let events = self.payment_events.read().await;
        Ok(events
            .iter()
            .filter(|event| event.order_number == order_number)
            .cloned()
            .collect())
    }
}

/// A thread-safe in-memory order repository keyed by order number.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<String, Order>>>,
}

impl InMemoryOrderStore {
    /// Creates a new, empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderStore {
    async fn store(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        orders.insert(order.number.clone(), order);
        Ok(())
    }

    async fn get(&self, order_number: &str) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(order_number).cloned())
    }
}
