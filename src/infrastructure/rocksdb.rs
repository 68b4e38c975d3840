use super::locks::LockTable;
use crate::domain::order::Order;
use crate::domain::ports::{OrderRepository, RefundGuard, RefundStore};
use crate::domain::refund::{PaymentEvent, Refund, RefundId, RefundLineId, repeated_order_line};
use crate::error::{RefundError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for refunds and their lines, keyed by refund id.
pub const CF_REFUNDS: &str = "refunds";
/// Column Family for orders, keyed by order number.
pub const CF_ORDERS: &str = "orders";
/// Column Family for payment events, keyed by order number and sequence.
pub const CF_PAYMENT_EVENTS: &str = "payment_events";
/// Column Family for id sequences.
pub const CF_META: &str = "meta";

const SEQ_REFUND: &str = "seq:refund";
const SEQ_REFUND_LINE: &str = "seq:refund_line";
const SEQ_PAYMENT_EVENT: &str = "seq:payment_event";

impl From<rocksdb::Error> for RefundError {
    fn from(e: rocksdb::Error) -> Self {
        RefundError::Storage(Box::new(e))
    }
}

/// A persistent store implementation using RocksDB.
///
/// Refunds, orders and payment events live in separate Column Families so a
/// later run can pick up where the previous one stopped. Values are JSON.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    /// Serializes the check-then-write sections (insert, save, sequences).
    writes: Arc<Mutex<()>>,
    locks: LockTable,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that all required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_REFUNDS, CF_ORDERS, CF_PAYMENT_EVENTS, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            writes: Arc::new(Mutex::new(())),
            locks: LockTable::new(),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            RefundError::Storage(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn read_refund(&self, refund_id: RefundId) -> Result<Option<Refund>> {
        let cf = self.cf(CF_REFUNDS)?;
        match self.db.get_cf(cf, refund_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_refund(&self, refund: &Refund) -> Result<()> {
        let cf = self.cf(CF_REFUNDS)?;
        let value = serde_json::to_vec(refund)?;
        self.db.put_cf(cf, refund.id.to_be_bytes(), value)?;
        Ok(())
    }

    fn all_refunds(&self) -> Result<Vec<Refund>> {
        let cf = self.cf(CF_REFUNDS)?;
        let mut refunds = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            refunds.push(serde_json::from_slice(&value)?);
        }
        Ok(refunds)
    }

    /// Increments and returns a persisted sequence. Callers hold `writes`.
    fn next_in_sequence(&self, key: &str) -> Result<u64> {
        let cf = self.cf(CF_META)?;
        let current = match self.db.get_cf(cf, key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    RefundError::Storage(Box::new(std::io::Error::other(format!(
                        "corrupt sequence {key}"
                    ))))
                })?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        self.db.put_cf(cf, key, next.to_be_bytes())?;
        Ok(next)
    }

    fn event_prefix(order_number: &str) -> Vec<u8> {
        let mut prefix = order_number.as_bytes().to_vec();
        prefix.push(0);
        prefix
    }
}

#[async_trait]
impl RefundStore for RocksDBStore {
    async fn next_refund_id(&self) -> Result<RefundId> {
        let _writes = self.writes.lock().await;
        self.next_in_sequence(SEQ_REFUND)
    }

    async fn next_refund_line_id(&self) -> Result<RefundLineId> {
        let _writes = self.writes.lock().await;
        self.next_in_sequence(SEQ_REFUND_LINE)
    }

    async fn insert(&self, refund: &Refund) -> Result<()> {
        let _writes = self.writes.lock().await;
        if self.read_refund(refund.id)?.is_some() {
            return Err(RefundError::Validation(format!(
                "Refund {} already exists",
                refund.id
            )));
        }
        if let Some(order_line) = repeated_order_line(&refund.lines) {
            return Err(RefundError::LineAlreadyRefunded { order_line });
        }

        for existing in self.all_refunds()? {
            let taken = existing.lines.iter().filter(|line| line.is_active()).find(|line| {
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
        }

        self.write_refund(refund)
    }

    async fn save(&self, refund: &mut Refund) -> Result<()> {
        let _writes = self.writes.lock().await;
        let stored = self
            .read_refund(refund.id)?
            .ok_or(RefundError::NotFound(refund.id))?;
        if stored.version != refund.version {
            return Err(RefundError::ConcurrentModification(refund.id));
        }

        let mut next = refund.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        self.write_refund(&next)?;
        *refund = next;
        Ok(())
    }

    async fn get(&self, refund_id: RefundId) -> Result<Option<Refund>> {
        self.read_refund(refund_id)
    }

    async fn get_all(&self) -> Result<Vec<Refund>> {
        // Big-endian keys iterate in id order.
        self.all_refunds()
    }

    async fn has_active_refund_line(&self, order_line_id: u64) -> Result<bool> {
        Ok(self
            .all_refunds()?
            .iter()
            .flat_map(|refund| refund.lines.iter())
            .any(|line| line.order_line_id == order_line_id && line.is_active()))
    }

    async fn lock(&self, refund_id: RefundId) -> Result<RefundGuard> {
        Ok(self.locks.acquire(refund_id).await)
    }

    async fn record_payment_event(&self, event: PaymentEvent) -> Result<()> {
        let _writes = self.writes.lock().await;
        let seq = self.next_in_sequence(SEQ_PAYMENT_EVENT)?;
        let mut key = Self::event_prefix(&event.order_number);
        key.extend_from_slice(&seq.to_be_bytes());

        let cf = self.cf(CF_PAYMENT_EVENTS)?;
        self.db.put_cf(cf, key, serde_json::to_vec(&event)?)?;
        Ok(())
    }

    async fn payment_events(&self, order_number: &str) -> Result<Vec<PaymentEvent>> {
        let cf = self.cf(CF_PAYMENT_EVENTS)?;
        let prefix = Self::event_prefix(order_number);

        let mut events = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            events.push(serde_json::from_slice(&value)?);
        }
        Ok(events)
    }
}

#[async_trait]
impl OrderRepository for RocksDBStore {
    async fn store(&self, order: Order) -> Result<()> {
        let cf = self.cf(CF_ORDERS)?;
        let value = serde_json::to_vec(&order)?;
        self.db.put_cf(cf, order.number.as_bytes(), value)?;
        Ok(())
    }

    async fn get(&self, order_number: &str) -> Result<Option<Order>> {
        let cf = self.cf(CF_ORDERS)?;
        match self.db.get_cf(cf, order_number.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
