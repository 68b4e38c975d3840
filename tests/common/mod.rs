#![allow(dead_code)]

use async_trait::async_trait;
use rand::Rng;
use refund_engine::application::refunds::RefundService;
use refund_engine::config::{EngineConfig, SiteConfiguration};
use refund_engine::domain::order::{Order, OrderLine, PaymentSource, Product, ProductClass, User};
use refund_engine::domain::ports::{
    CreditIssuer, CreditReceipt, FulfillmentRevoker, NotificationContext, NotificationDispatcher,
    RefundCompletedListener,
};
use refund_engine::domain::refund::{Refund, RefundLine};
use refund_engine::error::{ListenerError, NotificationError, PaymentError, RevocationError};
use refund_engine::infrastructure::in_memory::{InMemoryOrderStore, InMemoryRefundStore};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Error, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Credit issuer that counts calls and fails on demand.
#[derive(Default, Clone)]
pub struct ScriptedCreditIssuer {
    calls: Arc<AtomicUsize>,
    failure: Arc<Mutex<Option<PaymentError>>>,
    delay: Option<Duration>,
}

impl ScriptedCreditIssuer {
    /// Sleeps inside every call, widening the window for racing approvals.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_with(&self, error: PaymentError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }
}

#[async_trait]
impl CreditIssuer for ScriptedCreditIssuer {
    async fn issue_credit(
        &self,
        order: &Order,
        _amount: Decimal,
        _currency: &str,
    ) -> Result<CreditReceipt, PaymentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(CreditReceipt::Issued {
            reference: format!("credit-{}-{call}", order.number),
            processor: "scripted".into(),
        })
    }
}

/// Revoker that counts calls and fails for selected order lines.
#[derive(Default, Clone)]
pub struct ScriptedRevoker {
    calls: Arc<AtomicUsize>,
    failing: Arc<Mutex<HashSet<u64>>>,
}

impl ScriptedRevoker {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_line(&self, order_line_id: u64) {
        self.failing.lock().unwrap().insert(order_line_id);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl FulfillmentRevoker for ScriptedRevoker {
    async fn revoke_line(
        &self,
        _refund: &Refund,
        _line: &RefundLine,
        order_line: &OrderLine,
    ) -> Result<(), RevocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&order_line.id) {
            return Err(RevocationError {
                order_line: order_line.id,
                reason: "enrollment service unavailable".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<NotificationContext>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<NotificationContext> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify(
        &self,
        _user: &User,
        _template_code: &str,
        context: &NotificationContext,
        _site: &SiteConfiguration,
    ) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(context.clone());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct CountingListener {
    seen: Arc<Mutex<Vec<u64>>>,
}

impl CountingListener {
    pub fn seen(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }
}

impl RefundCompletedListener for CountingListener {
    fn name(&self) -> &str {
        "counting"
    }

    fn on_refund_completed(&self, refund: &Refund) -> Result<(), ListenerError> {
        self.seen.lock().unwrap().push(refund.id);
        Ok(())
    }
}

pub struct FailingListener;

impl RefundCompletedListener for FailingListener {
    fn name(&self) -> &str {
        "failing"
    }

    fn on_refund_completed(&self, _refund: &Refund) -> Result<(), ListenerError> {
        Err(ListenerError {
            listener: "failing".into(),
            reason: "downstream rejected the event".into(),
        })
    }
}

pub struct PanickingListener;

impl RefundCompletedListener for PanickingListener {
    fn name(&self) -> &str {
        "panicking"
    }

    fn on_refund_completed(&self, _refund: &Refund) -> Result<(), ListenerError> {
        panic!("listener blew up");
    }
}

/// A service wired to scripted collaborators, plus handles to inspect them.
pub struct Harness {
    pub service: RefundService,
    pub refunds: InMemoryRefundStore,
    pub issuer: ScriptedCreditIssuer,
    pub revoker: ScriptedRevoker,
    pub notifier: RecordingNotifier,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default(), ScriptedCreditIssuer::default())
}

pub fn harness_with(config: EngineConfig, issuer: ScriptedCreditIssuer) -> Harness {
    let refunds = InMemoryRefundStore::new();
    let revoker = ScriptedRevoker::default();
    let notifier = RecordingNotifier::default();
    let service = RefundService::new(
        config,
        Box::new(InMemoryOrderStore::new()),
        Box::new(refunds.clone()),
        Box::new(issuer.clone()),
        Box::new(revoker.clone()),
        Box::new(notifier.clone()),
    );
    Harness {
        service,
        refunds,
        issuer,
        revoker,
        notifier,
    }
}

pub fn user() -> User {
    User {
        id: 42,
        username: "learner".into(),
        email: "learner@example.com".into(),
    }
}

pub fn seat(id: u64, price: Decimal) -> OrderLine {
    OrderLine {
        id,
        product: Product {
            title: format!("Seat in Course {id}"),
            class: ProductClass::Seat {
                course_name: format!("Course {id}"),
            },
        },
        quantity: 1,
        line_price_excl_tax: price,
        fulfilled: true,
    }
}

/// A paid order with one seat per price, line ids starting at 1.
pub fn order(number: &str, prices: &[Decimal]) -> Order {
    let lines = prices
        .iter()
        .enumerate()
        .map(|(i, price)| seat(i as u64 + 1, *price))
        .collect();
    order_with_lines(number, lines)
}

pub fn order_with_lines(number: &str, lines: Vec<OrderLine>) -> Order {
    Order {
        number: number.into(),
        user: user(),
        currency: "USD".into(),
        lines,
        payment_source: Some(PaymentSource {
            processor: "authorizenet".into(),
            reference: "60123".into(),
            settled: true,
            amount_refunded: Decimal::ZERO,
        }),
    }
}

/// Writes `count` paid orders with two seats each, priced at random.
pub fn generate_orders(path: &Path, count: usize) -> Result<Vec<Order>, Error> {
    let mut rng = rand::thread_rng();
    let orders: Vec<Order> = (0..count)
        .map(|i| {
            let base = i as u64 * 2;
            let lines = (1..=2)
                .map(|n| seat(base + n, Decimal::new(rng.gen_range(100..=50_000), 2)))
                .collect();
            order_with_lines(&format!("EDX-{}", 100_000 + i), lines)
        })
        .collect();

    let file = File::create(path)?;
    serde_json::to_writer(file, &orders)?;
    Ok(orders)
}

/// Writes one `create` row per order, followed by a random approve or deny
/// for each refund that creation produced.
pub fn generate_actions(path: &Path, orders: &[Order]) -> Result<usize, Error> {
    let mut rng = rand::thread_rng();
    let mut wtr = csv::WriterBuilder::new().from_path(path)?;
    wtr.write_record(["action", "order", "refund", "lines"])?;

    for order in orders {
        wtr.write_record(["create", &order.number, "", ""])?;
    }
    let mut denied = 0;
    for refund in 1..=orders.len() {
        let action = if rng.gen_bool(0.25) {
            denied += 1;
            "deny"
        } else {
            "approve"
        };
        wtr.write_record([action, "", &refund.to_string(), ""])?;
    }

    wtr.flush()?;
    Ok(denied)
}

pub fn write_file(path: &Path, contents: &str) -> Result<(), Error> {
    let mut file = File::create(path)?;
    file.write_all(contents.as_bytes())
}
