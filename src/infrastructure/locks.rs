use crate::domain::ports::RefundGuard;
use crate::domain::refund::RefundId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-refund mutual exclusion shared by the store implementations.
///
/// Holding the guard returned by [`LockTable::acquire`] serializes every
/// read-modify-write of one refund; different refunds never contend.
/// Entries nobody holds or waits on are dropped on the next acquire, so the
/// table only grows with the number of refunds in flight.
#[derive(Default, Clone)]
pub struct LockTable {
    locks: Arc<Mutex<HashMap<RefundId, Arc<Mutex<()>>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, refund_id: RefundId) -> RefundGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Guards and waiters each hold a clone, and clones are only made here.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(refund_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
