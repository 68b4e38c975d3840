use crate::domain::order::Order;
use crate::domain::ports::{CreditIssuer, CreditReceipt};
use crate::error::PaymentError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A credit recorded by the [`LedgerCreditIssuer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditEntry {
    pub order_number: String,
    pub processor: String,
    /// Transaction id of the original charge.
    pub original_reference: String,
    /// Reference handed back for the credit itself.
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Credit issuer that settles refunds into an append-only ledger.
///
/// Mirrors the checks a real processor makes before refunding a settled
/// transaction: the charge must be known, settled, and not already refunded
/// beyond the order total.
#[derive(Default, Clone)]
pub struct LedgerCreditIssuer {
    entries: Arc<RwLock<Vec<CreditEntry>>>,
}

impl LedgerCreditIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<CreditEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl CreditIssuer for LedgerCreditIssuer {
    async fn issue_credit(
        &self,
        order: &Order,
        amount: Decimal,
        currency: &str,
    ) -> Result<CreditReceipt, PaymentError> {
        let Some(source) = &order.payment_source else {
            return Ok(CreditReceipt::NoPaymentSource);
        };

        if source.processor.trim().is_empty() {
            return Err(PaymentError::Gateway(format!(
                "no processor recorded for transaction {} of order {}",
                source.reference, order.number
            )));
        }
        if source.reference.trim().is_empty() {
            return Err(PaymentError::ProcessorResponseNotFound {
                reference: source.reference.clone(),
            });
        }
        if !source.settled {
            return Err(PaymentError::UnsettledTransaction {
                reference: source.reference.clone(),
            });
        }
        if !currency.eq_ignore_ascii_case(&order.currency) {
            return Err(PaymentError::Declined {
                processor: source.processor.clone(),
                reason: format!(
                    "credit currency {currency} does not match order currency {}",
                    order.currency
                ),
            });
        }

        let charged: Decimal = order.lines.iter().map(|l| l.line_price_excl_tax).sum();
        if source.amount_refunded + amount > charged {
            return Err(PaymentError::Declined {
                processor: source.processor.clone(),
                reason: format!(
                    "credit of {amount} exceeds the refundable balance of {}",
                    charged - source.amount_refunded
                ),
            });
        }

        let mut entries = self.entries.write().await;
        let reference = format!(
            "{}-refund-{}-{}",
            source.processor,
            order.number,
            entries.len() + 1
        );
        entries.push(CreditEntry {
            order_number: order.number.clone(),
            processor: source.processor.clone(),
            original_reference: source.reference.clone(),
            reference: reference.clone(),
            amount,
            currency: currency.to_string(),
        });

        Ok(CreditReceipt::Issued {
            reference,
            processor: source.processor.clone(),
        })
    }
}
