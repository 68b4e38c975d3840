use crate::domain::order::{Order, OrderLine};
use crate::domain::ports::FulfillmentRevoker;
use crate::domain::refund::{Refund, RefundLine};
use crate::error::RevocationError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitlementState {
    Active,
    Revoked,
}

/// Registry of delivered entitlements, keyed by order line.
///
/// Revoking an already revoked entitlement succeeds; revoking a line that was
/// never fulfilled fails so the refund parks in `Revocation Error`.
#[derive(Default, Clone)]
pub struct EntitlementRevoker {
    entitlements: Arc<RwLock<HashMap<u64, EntitlementState>>>,
}

impl EntitlementRevoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants an entitlement for every fulfilled line of `orders`.
    pub async fn from_orders<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Self {
        let revoker = Self::new();
        for line in orders.into_iter().flat_map(|order| order.lines.iter()) {
            if line.fulfilled {
                revoker.grant(line.id).await;
            }
        }
        revoker
    }

    pub async fn grant(&self, order_line_id: u64) {
        self.entitlements
            .write()
            .await
            .insert(order_line_id, EntitlementState::Active);
    }

    pub async fn state(&self, order_line_id: u64) -> Option<EntitlementState> {
        self.entitlements.read().await.get(&order_line_id).copied()
    }
}

#[async_trait]
impl FulfillmentRevoker for EntitlementRevoker {
    async fn revoke_line(
        &self,
        refund: &Refund,
        _line: &RefundLine,
        order_line: &OrderLine,
    ) -> Result<(), RevocationError> {
        let mut entitlements = self.entitlements.write().await;
        match entitlements.get_mut(&order_line.id) {
            Some(state) => {
                if *state == EntitlementState::Active {
                    tracing::info!(
                        refund_id = refund.id,
                        order_line = order_line.id,
                        product = %order_line.product.title,
                        "Revoked entitlement"
                    );
                }
                *state = EntitlementState::Revoked;
                Ok(())
            }
            None => Err(RevocationError {
                order_line: order_line.id,
                reason: "no fulfilled entitlement is recorded for this line".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{Product, ProductClass, User};
    use crate::domain::status::{RefundLineStatus, RefundStatus};
    use rust_decimal_macros::dec;

    fn order() -> Order {
        let line = |id: u64, fulfilled: bool| OrderLine {
            id,
            product: Product {
                title: format!("Seat {id}"),
                class: ProductClass::Seat {
                    course_name: "Demo".into(),
                },
            },
            quantity: 1,
            line_price_excl_tax: dec!(10),
            fulfilled,
        };
        Order {
            number: "EDX-3".into(),
            user: User {
                id: 1,
                username: "learner".into(),
                email: "learner@example.com".into(),
            },
            currency: "USD".into(),
            lines: vec![line(1, true), line(2, false)],
            payment_source: None,
        }
    }

    fn refund(order: &Order) -> Refund {
        let lines = order
            .lines
            .iter()
            .map(|l| RefundLine::new(l.id, 1, l, RefundLineStatus::Open).unwrap())
            .collect();
        Refund::new(1, order, RefundStatus::PaymentRefunded, lines).unwrap()
    }

    #[tokio::test]
    async fn test_revoke_fulfilled_line() {
        let order = order();
        let refund = refund(&order);
        let revoker = EntitlementRevoker::from_orders([&order]).await;

        revoker
            .revoke_line(&refund, &refund.lines[0], &order.lines[0])
            .await
            .unwrap();
        assert_eq!(revoker.state(1).await, Some(EntitlementState::Revoked));

        // Second revocation is a no-op.
        assert!(
            revoker
                .revoke_line(&refund, &refund.lines[0], &order.lines[0])
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_unfulfilled_line_cannot_be_revoked() {
        let order = order();
        let refund = refund(&order);
        let revoker = EntitlementRevoker::from_orders([&order]).await;

        assert_eq!(revoker.state(2).await, None);
        let err = revoker
            .revoke_line(&refund, &refund.lines[1], &order.lines[1])
            .await
            .unwrap_err();
        assert_eq!(err.order_line, 2);
    }
}
