use super::money::Credit;
use super::order::{Order, OrderLine, User};
use super::status::{RefundLineStatus, RefundStatus, Transitionable};
use crate::error::RefundError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type RefundId = u64;
pub type RefundLineId = u64;

/// A per-order-line component of a [`Refund`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundLine {
    pub id: RefundLineId,
    pub refund_id: RefundId,
    pub order_line_id: u64,
    pub line_credit: Credit,
    pub quantity: u32,
    pub status: RefundLineStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefundLine {
    pub fn new(
        id: RefundLineId,
        refund_id: RefundId,
        order_line: &OrderLine,
        status: RefundLineStatus,
    ) -> Result<Self, RefundError> {
        if order_line.quantity == 0 {
            return Err(RefundError::Validation(format!(
                "Order line {} has no quantity to refund",
                order_line.id
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id,
            refund_id,
            order_line_id: order_line.id,
            line_credit: Credit::new(order_line.line_price_excl_tax)?,
            quantity: order_line.quantity,
            status,
            created_at: now,
            updated_at: now,
        })
    }

    /// True while the line still blocks its order line from another refund.
    pub fn is_active(&self) -> bool {
        self.status != RefundLineStatus::Denied
    }
}

impl Transitionable for RefundLine {
    type Status = RefundLineStatus;
    const ENTITY: &'static str = "refundline";

    fn id(&self) -> u64 {
        self.id
    }

    fn status(&self) -> RefundLineStatus {
        self.status
    }

    fn write_status(&mut self, status: RefundLineStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// First order line id that occurs on more than one of `lines`.
pub fn repeated_order_line(lines: &[RefundLine]) -> Option<u64> {
    let mut seen = HashSet::with_capacity(lines.len());
    lines
        .iter()
        .map(|line| line.order_line_id)
        .find(|order_line| !seen.insert(*order_line))
}

/// Reversal of payment and fulfillment for part or all of an order.
///
/// The set of lines is fixed when the refund is created; afterwards only
/// their statuses move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: RefundId,
    pub order_number: String,
    pub user: User,
    pub total_credit: Credit,
    pub currency: String,
    pub status: RefundStatus,
    pub lines: Vec<RefundLine>,
    /// Incremented by the store on every successful save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Refund {
    /// Builds a refund for `order` whose credit is the sum of the line credits.
    pub fn new(
        id: RefundId,
        order: &Order,
        status: RefundStatus,
        lines: Vec<RefundLine>,
    ) -> Result<Self, RefundError> {
        if lines.is_empty() {
            return Err(RefundError::Validation(format!(
                "Refund for order {} needs at least one line",
                order.number
            )));
        }
        if let Some(stray) = lines.iter().find(|line| line.refund_id != id) {
            return Err(RefundError::Validation(format!(
                "Refund line {} belongs to refund {}, not {}",
                stray.id, stray.refund_id, id
            )));
        }
        if let Some(order_line) = repeated_order_line(&lines) {
            return Err(RefundError::Validation(format!(
                "Order line {order_line} appears more than once in refund {id}"
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id,
            order_number: order.number.clone(),
            user: order.user.clone(),
            total_credit: lines.iter().map(|line| line.line_credit).sum(),
            currency: order.currency.clone(),
            status,
            lines,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Number of items in this refund.
    pub fn num_items(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    pub fn can_approve(&self) -> bool {
        matches!(
            self.status,
            RefundStatus::Open
                | RefundStatus::PaymentRefundError
                | RefundStatus::PaymentRefunded
                | RefundStatus::RevocationError
        )
    }

    /// Denial is only legal before any credit or revocation was attempted.
    pub fn can_deny(&self, initial_status: RefundStatus) -> bool {
        self.status == initial_status
    }
}

impl Transitionable for Refund {
    type Status = RefundStatus;
    const ENTITY: &'static str = "refund";

    fn id(&self) -> u64 {
        self.id
    }

    fn status(&self) -> RefundStatus {
        self.status
    }

    fn write_status(&mut self, status: RefundStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Record of a credit issued through a payment processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub order_number: String,
    pub refund_id: RefundId,
    pub event_type: String,
    pub amount: Decimal,
    pub currency: String,
    pub reference: String,
    pub processor_name: String,
    pub created_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub const REFUNDED: &'static str = "Refunded";

    pub fn refunded(refund: &Refund, reference: String, processor_name: String) -> Self {
        Self {
            order_number: refund.order_number.clone(),
            refund_id: refund.id,
            event_type: Self::REFUNDED.to_string(),
            amount: refund.total_credit.value(),
            currency: refund.currency.clone(),
            reference,
            processor_name,
            created_at: Utc::now(),
        }
    }
}
