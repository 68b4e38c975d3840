use super::order::{Order, OrderLine, User};
use super::refund::{PaymentEvent, Refund, RefundId, RefundLine, RefundLineId};
use crate::config::SiteConfiguration;
use crate::error::{ListenerError, NotificationError, PaymentError, Result, RevocationError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

/// Exclusive hold on one refund for the duration of a read-modify-write.
pub type RefundGuard = OwnedMutexGuard<()>;

#[async_trait]
pub trait RefundStore: Send + Sync {
    async fn next_refund_id(&self) -> Result<RefundId>;
    async fn next_refund_line_id(&self) -> Result<RefundLineId>;

    /// Persists a new refund.
    ///
    /// Fails with `LineAlreadyRefunded` if any of its order lines already has a
    /// non-denied refund line.
    async fn insert(&self, refund: &Refund) -> Result<()>;

    /// Saves a modified refund and its lines, bumping `refund.version`.
    ///
    /// Fails with `ConcurrentModification` if the stored version differs.
    async fn save(&self, refund: &mut Refund) -> Result<()>;

    async fn get(&self, refund_id: RefundId) -> Result<Option<Refund>>;
    async fn get_all(&self) -> Result<Vec<Refund>>;
    async fn has_active_refund_line(&self, order_line_id: u64) -> Result<bool>;
    async fn lock(&self, refund_id: RefundId) -> Result<RefundGuard>;
    async fn record_payment_event(&self, event: PaymentEvent) -> Result<()>;
    async fn payment_events(&self, order_number: &str) -> Result<Vec<PaymentEvent>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn store(&self, order: Order) -> Result<()>;
    async fn get(&self, order_number: &str) -> Result<Option<Order>>;
}

/// What the gateway did when asked for a credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditReceipt {
    Issued { reference: String, processor: String },
    /// The order was never paid through a processor (e.g. a free order).
    NoPaymentSource,
}

#[async_trait]
pub trait CreditIssuer: Send + Sync {
    async fn issue_credit(
        &self,
        order: &Order,
        amount: Decimal,
        currency: &str,
    ) -> std::result::Result<CreditReceipt, PaymentError>;
}

#[async_trait]
pub trait FulfillmentRevoker: Send + Sync {
    async fn revoke_line(
        &self,
        refund: &Refund,
        line: &RefundLine,
        order_line: &OrderLine,
    ) -> std::result::Result<(), RevocationError>;
}

/// Template context for the purchaser refund email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationContext {
    pub refund_id: RefundId,
    pub amount: String,
    pub course_name: String,
    pub order_number: String,
    pub order_url: String,
    pub site_code: String,
    pub explore_courses_url: String,
    pub support_url: String,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(
        &self,
        user: &User,
        template_code: &str,
        context: &NotificationContext,
        site: &SiteConfiguration,
    ) -> std::result::Result<(), NotificationError>;
}

/// Subscriber to the "refund completed" signal.
pub trait RefundCompletedListener: Send + Sync {
    fn name(&self) -> &str;
    fn on_refund_completed(&self, refund: &Refund) -> std::result::Result<(), ListenerError>;
}

pub type RefundStoreBox = Box<dyn RefundStore>;
pub type OrderRepositoryBox = Box<dyn OrderRepository>;
pub type CreditIssuerBox = Box<dyn CreditIssuer>;
pub type FulfillmentRevokerBox = Box<dyn FulfillmentRevoker>;
pub type NotificationDispatcherBox = Box<dyn NotificationDispatcher>;
