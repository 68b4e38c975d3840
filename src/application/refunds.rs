use super::notifications::{REFUND_TEMPLATE, refund_notification};
use super::signals::RefundSignal;
use crate::config::EngineConfig;
use crate::domain::order::{Order, OrderLine};
use crate::domain::ports::{
    CreditIssuerBox, CreditReceipt, FulfillmentRevokerBox, NotificationDispatcherBox,
    OrderRepositoryBox, RefundCompletedListener, RefundStoreBox,
};
use crate::domain::refund::{PaymentEvent, Refund, RefundId, RefundLine};
use crate::domain::status::{RefundLineStatus, RefundStatus, Transitionable};
use crate::error::{PaymentError, RefundError, Result, RevocationError};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

/// Flags accepted by [`RefundService::approve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApproveOptions {
    pub revoke_fulfillment: bool,
    pub notify_purchaser: bool,
}

impl Default for ApproveOptions {
    fn default() -> Self {
        Self {
            revoke_fulfillment: true,
            notify_purchaser: true,
        }
    }
}

/// Operator action on an existing refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundAction {
    Approve,
    /// Credit the purchaser but keep the fulfillment in place.
    ApprovePaymentOnly,
    Deny,
}

impl FromStr for RefundAction {
    type Err = RefundError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "approve_payment_only" => Ok(Self::ApprovePaymentOnly),
            "deny" => Ok(Self::Deny),
            other => Err(RefundError::InvalidAction(other.to_string())),
        }
    }
}

/// Result of an approve or deny call.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub succeeded: bool,
    pub refund: Refund,
    /// Set when the credit step failed.
    pub payment_error: Option<PaymentError>,
}

impl Outcome {
    fn success(refund: Refund) -> Self {
        Self {
            succeeded: true,
            refund,
            payment_error: None,
        }
    }

    fn failure(refund: Refund, payment_error: Option<PaymentError>) -> Self {
        Self {
            succeeded: false,
            refund,
            payment_error,
        }
    }

    pub fn status(&self) -> RefundStatus {
        self.refund.status
    }

    /// True when the gateway refused because the original charge has not settled.
    pub fn is_unsettled(&self) -> bool {
        matches!(
            self.payment_error,
            Some(PaymentError::UnsettledTransaction { .. })
        )
    }
}

/// Drives refunds through their lifecycle.
///
/// Every approve or deny holds the refund's store lock for its whole
/// read-modify-write, so concurrent calls on one refund are serialized and a
/// credit is never issued twice.
pub struct RefundService {
    config: EngineConfig,
    orders: OrderRepositoryBox,
    refunds: RefundStoreBox,
    credit_issuer: CreditIssuerBox,
    revoker: FulfillmentRevokerBox,
    notifier: NotificationDispatcherBox,
    signal: RefundSignal,
}

impl RefundService {
    pub fn new(
        config: EngineConfig,
        orders: OrderRepositoryBox,
        refunds: RefundStoreBox,
        credit_issuer: CreditIssuerBox,
        revoker: FulfillmentRevokerBox,
        notifier: NotificationDispatcherBox,
    ) -> Self {
        Self {
            config,
            orders,
            refunds,
            credit_issuer,
            revoker,
            notifier,
            signal: RefundSignal::new(),
        }
    }

    /// Registers a listener for the "refund completed" signal.
    pub fn subscribe(&mut self, listener: Arc<dyn RefundCompletedListener>) {
        self.signal.connect(listener);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Makes `order` known to the engine. An order already on file is kept.
    pub async fn register_order(&self, order: Order) -> Result<()> {
        if self.orders.get(&order.number).await?.is_none() {
            self.orders.store(order).await?;
        }
        Ok(())
    }

    pub async fn order(&self, order_number: &str) -> Result<Order> {
        self.orders
            .get(order_number)
            .await?
            .ok_or_else(|| RefundError::OrderNotFound(order_number.to_string()))
    }

    pub async fn refund(&self, refund_id: RefundId) -> Result<Refund> {
        self.refunds
            .get(refund_id)
            .await?
            .ok_or(RefundError::NotFound(refund_id))
    }

    /// All refunds, ordered by id.
    pub async fn refunds(&self) -> Result<Vec<Refund>> {
        self.refunds.get_all().await
    }

    pub async fn payment_events(&self, order_number: &str) -> Result<Vec<PaymentEvent>> {
        self.refunds.payment_events(order_number).await
    }

    /// Creates a refund covering the `lines` of `order` that are not already
    /// part of a non-denied refund.
    ///
    /// Returns `Ok(None)` when every line is already refunded. Zero-credit
    /// refunds are approved on the spot without notifying the purchaser.
    pub async fn create_with_lines(
        &self,
        order: &Order,
        lines: &[OrderLine],
    ) -> Result<Option<Refund>> {
        // Credits and quantities always come from the order's own lines.
        let mut seen = HashSet::with_capacity(lines.len());
        let mut requested = Vec::with_capacity(lines.len());
        for line in lines {
            let Some(order_line) = order.line(line.id) else {
                return Err(RefundError::Validation(format!(
                    "Order line {} does not belong to order {}",
                    line.id, order.number
                )));
            };
            if seen.insert(order_line.id) {
                requested.push(order_line);
            }
        }

        let mut unrefunded = Vec::with_capacity(requested.len());
        for line in requested {
            if self.refunds.has_active_refund_line(line.id).await? {
                tracing::debug!(
                    order_number = %order.number,
                    order_line = line.id,
                    "Order line already has an active refund, skipping"
                );
            } else {
                unrefunded.push(line);
            }
        }

        if unrefunded.is_empty() {
            tracing::info!(
                order_number = %order.number,
                "No unrefunded lines, no refund created"
            );
            return Ok(None);
        }

        self.register_order(order.clone()).await?;

        let refund_id = self.refunds.next_refund_id().await?;
        let mut refund_lines = Vec::with_capacity(unrefunded.len());
        for line in unrefunded {
            let line_id = self.refunds.next_refund_line_id().await?;
            refund_lines.push(RefundLine::new(
                line_id,
                refund_id,
                line,
                self.config.initial_refund_line_status,
            )?);
        }
        let refund = Refund::new(
            refund_id,
            order,
            self.config.initial_refund_status,
            refund_lines,
        )?;
        self.refunds.insert(&refund).await?;

        tracing::info!(
            target: "audit",
            event = "refund_created",
            refund_id = refund.id,
            order_number = %order.number,
            amount = %refund.total_credit.value(),
            currency = %refund.currency,
            user_id = refund.user.id
        );

        if refund.total_credit.is_zero() {
            let options = ApproveOptions {
                revoke_fulfillment: self.config.revoke_fulfillment_for_free_refunds,
                notify_purchaser: false,
            };
            let outcome = self.approve(refund.id, options).await?;
            return Ok(Some(outcome.refund));
        }

        Ok(Some(refund))
    }

    /// Approves a refund: credit, then revoke, then complete.
    ///
    /// Safe to call again after a failure; steps that already succeeded are
    /// skipped based on the current status.
    pub async fn approve(&self, refund_id: RefundId, options: ApproveOptions) -> Result<Outcome> {
        let _guard = self.refunds.lock(refund_id).await?;
        let mut refund = self.refund(refund_id).await?;

        if refund.status == RefundStatus::Complete {
            tracing::info!(
                refund_id,
                "Refund has already been completed. No additional action is required to approve"
            );
            return Ok(Outcome::success(refund));
        }
        if !refund.can_approve() {
            tracing::warn!(
                refund_id,
                status = %refund.status,
                "Refund cannot be approved"
            );
            return Ok(Outcome::failure(refund, None));
        }

        let mut order = self.order(&refund.order_number).await?;

        if matches!(
            refund.status,
            RefundStatus::Open | RefundStatus::PaymentRefundError
        ) {
            match self.issue_credit(&refund, &order).await {
                Ok(receipt) => {
                    self.set_refund_status(&mut refund, RefundStatus::PaymentRefunded)
                        .await?;
                    self.record_credit(&refund, &mut order, receipt).await?;
                    if options.notify_purchaser {
                        self.notify_purchaser(&refund, &order).await;
                    }
                }
                Err(RefundError::Payment(e)) => {
                    tracing::error!(
                        refund_id,
                        error = %e,
                        "Failed to issue credit for refund"
                    );
                    self.set_refund_status(&mut refund, RefundStatus::PaymentRefundError)
                        .await?;
                    return Ok(Outcome::failure(refund, Some(e)));
                }
                Err(e) => return Err(e),
            }
        }

        if options.revoke_fulfillment
            && matches!(
                refund.status,
                RefundStatus::PaymentRefunded | RefundStatus::RevocationError
            )
        {
            self.revoke_lines(&mut refund, &order).await?;
        }

        if !options.revoke_fulfillment && refund.status == RefundStatus::PaymentRefunded {
            tracing::info!(refund_id, "Skipping the revocation step for refund");
            self.complete_without_revocation(&mut refund).await?;
        }

        if refund.status == RefundStatus::Complete {
            self.signal.send_robust(&refund);
            return Ok(Outcome::success(refund));
        }

        Ok(Outcome::failure(refund, None))
    }

    /// Denies a refund that has not yet been acted upon.
    ///
    /// Each line is denied independently; the outcome fails if any line could
    /// not be denied.
    pub async fn deny(&self, refund_id: RefundId) -> Result<Outcome> {
        let _guard = self.refunds.lock(refund_id).await?;
        let mut refund = self.refund(refund_id).await?;

        if refund.status == RefundStatus::Denied {
            tracing::info!(
                refund_id,
                "Refund has already been denied. No additional action is required to deny"
            );
            return Ok(Outcome::success(refund));
        }
        if !refund.can_deny(self.config.initial_refund_status) {
            tracing::warn!(
                refund_id,
                status = %refund.status,
                "Refund cannot be denied"
            );
            return Ok(Outcome::failure(refund, None));
        }

        self.set_refund_status(&mut refund, RefundStatus::Denied).await?;
        tracing::info!(
            target: "audit",
            event = "refund_denied",
            refund_id,
            order_number = %refund.order_number
        );

        let mut succeeded = true;
        for idx in 0..refund.lines.len() {
            let line_id = refund.lines[idx].id;
            let mut next = refund.clone();
            let denied = match next.lines[idx]
                .set_status(RefundLineStatus::Denied, &self.config.pipelines.refund_line)
            {
                Ok(()) => self.refunds.save(&mut next).await,
                Err(e) => Err(e),
            };
            match denied {
                Ok(()) => refund = next,
                Err(e) => {
                    tracing::error!(
                        refund_id,
                        refund_line = line_id,
                        error = %e,
                        "Failed to deny refund line"
                    );
                    succeeded = false;
                }
            }
        }

        Ok(Outcome {
            succeeded,
            refund,
            payment_error: None,
        })
    }

    /// Runs an operator action against a refund.
    pub async fn process(&self, refund_id: RefundId, action: RefundAction) -> Result<Outcome> {
        match action {
            RefundAction::Approve => self.approve(refund_id, ApproveOptions::default()).await,
            RefundAction::ApprovePaymentOnly => {
                let options = ApproveOptions {
                    revoke_fulfillment: false,
                    ..ApproveOptions::default()
                };
                self.approve(refund_id, options).await
            }
            RefundAction::Deny => self.deny(refund_id).await,
        }
    }

    /// Applies a validated status change and persists it.
    ///
    /// `refund` is only updated once the store accepted the change.
    async fn set_refund_status(&self, refund: &mut Refund, status: RefundStatus) -> Result<()> {
        let mut next = refund.clone();
        next.set_status(status, &self.config.pipelines.refund)?;
        self.refunds.save(&mut next).await?;
        *refund = next;
        Ok(())
    }

    async fn issue_credit(&self, refund: &Refund, order: &Order) -> Result<CreditReceipt> {
        if refund.total_credit.is_zero() {
            tracing::info!(refund_id = refund.id, "No payments to credit for refund");
            return Ok(CreditReceipt::NoPaymentSource);
        }

        let receipt = self
            .credit_issuer
            .issue_credit(order, refund.total_credit.value(), &refund.currency)
            .await?;
        if receipt == CreditReceipt::NoPaymentSource {
            tracing::info!(refund_id = refund.id, "No payments to credit for refund");
        }
        Ok(receipt)
    }

    async fn record_credit(
        &self,
        refund: &Refund,
        order: &mut Order,
        receipt: CreditReceipt,
    ) -> Result<()> {
        let CreditReceipt::Issued {
            reference,
            processor,
        } = receipt
        else {
            return Ok(());
        };

        let amount = refund.total_credit.value();
        if let Some(source) = order.payment_source.as_mut() {
            source.refund(amount);
        }
        self.orders.store(order.clone()).await?;
        self.refunds
            .record_payment_event(PaymentEvent::refunded(
                refund,
                reference.clone(),
                processor.clone(),
            ))
            .await?;

        tracing::info!(
            target: "audit",
            event = "credit_issued",
            refund_id = refund.id,
            amount = %amount,
            currency = %refund.currency,
            processor_name = %processor,
            reference = %reference,
            user_id = refund.user.id
        );
        Ok(())
    }

    async fn notify_purchaser(&self, refund: &Refund, order: &Order) {
        let site = &self.config.site;
        let Some(context) = refund_notification(refund, order, site) else {
            return;
        };

        match self
            .notifier
            .notify(&refund.user, REFUND_TEMPLATE, &context, site)
            .await
        {
            Ok(()) => tracing::info!(
                refund_id = refund.id,
                recipient = %refund.user.email,
                "Course refund notification sent"
            ),
            Err(e) => tracing::error!(
                refund_id = refund.id,
                error = %e,
                "Failed to send refund notification"
            ),
        }
    }

    /// Revokes fulfillment for every line not yet complete.
    ///
    /// Lines move to `Complete` or `Revocation Error` individually; the refund
    /// completes only if all of them were revoked.
    async fn revoke_lines(&self, refund: &mut Refund, order: &Order) -> Result<bool> {
        let line_pipeline = &self.config.pipelines.refund_line;
        let mut next = refund.clone();
        let mut failed = Vec::new();

        for idx in 0..next.lines.len() {
            let line = &next.lines[idx];
            if line.status == RefundLineStatus::Complete {
                continue;
            }
            let line_id = line.id;
            let revoked = match order.line(line.order_line_id) {
                Some(order_line) => self.revoker.revoke_line(&next, line, order_line).await,
                None => Err(RevocationError {
                    order_line: line.order_line_id,
                    reason: "order line not found".to_string(),
                }),
            };

            let target = match revoked {
                Ok(()) => RefundLineStatus::Complete,
                Err(e) => {
                    tracing::warn!(
                        refund_id = next.id,
                        refund_line = line_id,
                        error = %e,
                        "Unable to revoke fulfillment of refund line"
                    );
                    failed.push(line_id);
                    RefundLineStatus::RevocationError
                }
            };
            next.lines[idx].set_status(target, line_pipeline)?;
        }

        let all_revoked = failed.is_empty();
        if all_revoked {
            next.set_status(RefundStatus::Complete, &self.config.pipelines.refund)?;
        } else {
            tracing::error!(
                refund_id = next.id,
                failed_lines = ?failed,
                "Unable to revoke fulfillment of all lines of refund"
            );
            next.set_status(RefundStatus::RevocationError, &self.config.pipelines.refund)?;
        }

        self.refunds.save(&mut next).await?;
        *refund = next;
        Ok(all_revoked)
    }

    async fn complete_without_revocation(&self, refund: &mut Refund) -> Result<()> {
        let mut next = refund.clone();
        next.set_status(RefundStatus::Complete, &self.config.pipelines.refund)?;
        for line in next
            .lines
            .iter_mut()
            .filter(|line| line.status != RefundLineStatus::Complete)
        {
            line.set_status(RefundLineStatus::Complete, &self.config.pipelines.refund_line)?;
        }
        self.refunds.save(&mut next).await?;
        *refund = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfiguration;
    use crate::domain::order::{PaymentSource, Product, ProductClass, User};
    use crate::domain::ports::{NotificationContext, NotificationDispatcher};
    use crate::error::NotificationError;
    use crate::infrastructure::gateway::LedgerCreditIssuer;
    use crate::infrastructure::in_memory::{InMemoryOrderStore, InMemoryRefundStore};
    use crate::infrastructure::revocation::EntitlementRevoker;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    #[derive(Default, Clone)]
    struct Outbox(Arc<Mutex<Vec<NotificationContext>>>);

    impl Outbox {
        fn sent(&self) -> Vec<NotificationContext> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationDispatcher for Outbox {
        async fn notify(
            &self,
            _user: &User,
            _template_code: &str,
            context: &NotificationContext,
            _site: &SiteConfiguration,
        ) -> std::result::Result<(), NotificationError> {
            self.0.lock().unwrap().push(context.clone());
            Ok(())
        }
    }

    fn order(number: &str, prices: &[Decimal]) -> Order {
        Order {
            number: number.into(),
            user: User {
                id: 42,
                username: "learner".into(),
                email: "learner@example.com".into(),
            },
            currency: "USD".into(),
            lines: prices
                .iter()
                .enumerate()
                .map(|(i, price)| OrderLine {
                    id: i as u64 + 1,
                    product: Product {
                        title: format!("Seat {}", i + 1),
                        class: ProductClass::Seat {
                            course_name: format!("Course {}", i + 1),
                        },
                    },
                    quantity: 1,
                    line_price_excl_tax: *price,
                    fulfilled: true,
                })
                .collect(),
            payment_source: Some(PaymentSource {
                processor: "authorizenet".into(),
                reference: "60123".into(),
                settled: true,
                amount_refunded: Decimal::ZERO,
            }),
        }
    }

    async fn service(order: &Order) -> (RefundService, LedgerCreditIssuer, Outbox) {
        let issuer = LedgerCreditIssuer::new();
        let outbox = Outbox::default();
        let revoker = EntitlementRevoker::from_orders([order]).await;
        let service = RefundService::new(
            EngineConfig::default(),
            Box::new(InMemoryOrderStore::new()),
            Box::new(InMemoryRefundStore::new()),
            Box::new(issuer.clone()),
            Box::new(revoker),
            Box::new(outbox.clone()),
        );
        (service, issuer, outbox)
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("APPROVE".parse::<RefundAction>().unwrap(), RefundAction::Approve);
        assert_eq!(
            " approve_payment_only ".parse::<RefundAction>().unwrap(),
            RefundAction::ApprovePaymentOnly
        );
        assert!(matches!(
            "refund".parse::<RefundAction>(),
            Err(RefundError::InvalidAction(_))
        ));
    }

    #[tokio::test]
    async fn test_approve_happy_path() {
        let order = order("EDX-1", &[dec!(30.00), dec!(20.00)]);
        let (service, issuer, outbox) = service(&order).await;

        let refund = service
            .create_with_lines(&order, &order.lines)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refund.status, RefundStatus::Open);
        assert_eq!(refund.total_credit.value(), dec!(50.00));

        let outcome = service
            .approve(refund.id, ApproveOptions::default())
            .await
            .unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.status(), RefundStatus::Complete);
        assert!(
            outcome
                .refund
                .lines
                .iter()
                .all(|line| line.status == RefundLineStatus::Complete)
        );

        assert_eq!(issuer.entries().await.len(), 1);
        let sent = outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].amount, "$50.00");
        assert_eq!(sent[0].course_name, "Course 1");

        let events = service.payment_events("EDX-1").await.unwrap();
        assert_eq!(events.len(), 1);
        let stored = service.order("EDX-1").await.unwrap();
        assert_eq!(stored.payment_source.unwrap().amount_refunded, dec!(50.00));
    }

    #[tokio::test]
    async fn test_second_approve_is_noop() {
        let order = order("EDX-2", &[dec!(50.00)]);
        let (service, issuer, outbox) = service(&order).await;
        let refund = service
            .create_with_lines(&order, &order.lines)
            .await
            .unwrap()
            .unwrap();

        assert!(service.process(refund.id, RefundAction::Approve).await.unwrap().succeeded);
        assert!(service.process(refund.id, RefundAction::Approve).await.unwrap().succeeded);

        assert_eq!(issuer.entries().await.len(), 1);
        assert_eq!(outbox.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_credit_refund_completes_on_creation() {
        let mut order = order("EDX-3", &[dec!(0.00)]);
        order.payment_source = None;
        let (service, issuer, outbox) = service(&order).await;

        let refund = service
            .create_with_lines(&order, &order.lines)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(refund.status, RefundStatus::Complete);
        assert!(issuer.entries().await.is_empty());
        assert!(outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn test_deny_open_refund() {
        let order = order("EDX-4", &[dec!(10.00), dec!(15.00)]);
        let (service, _, _) = service(&order).await;
        let refund = service
            .create_with_lines(&order, &order.lines)
            .await
            .unwrap()
            .unwrap();

        let outcome = service.deny(refund.id).await.unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.status(), RefundStatus::Denied);
        assert!(
            outcome
                .refund
                .lines
                .iter()
                .all(|line| line.status == RefundLineStatus::Denied)
        );

        // Denied lines may be refunded again.
        let again = service
            .create_with_lines(&order, &order.lines)
            .await
            .unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_unknown_refund() {
        let order = order("EDX-5", &[dec!(10.00)]);
        let (service, _, _) = service(&order).await;
        let result = service.approve(77, ApproveOptions::default()).await;
        assert!(matches!(result, Err(RefundError::NotFound(77))));
    }

    #[tokio::test]
    async fn test_lines_from_other_order_are_rejected() {
        let order = order("EDX-6", &[dec!(10.00)]);
        let other = self::order("EDX-7", &[dec!(10.00), dec!(5.00)]);
        let (service, _, _) = service(&order).await;

        let result = service.create_with_lines(&order, &other.lines[1..]).await;
        assert!(matches!(result, Err(RefundError::Validation(_))));
    }
}
