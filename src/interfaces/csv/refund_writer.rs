use crate::domain::refund::{Refund, RefundId};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// Flattened view of a refund as written to the output CSV.
#[derive(Debug, Serialize)]
struct RefundRow<'a> {
    refund: RefundId,
    order: &'a str,
    status: &'a str,
    total_credit: Decimal,
    currency: &'a str,
    items: u32,
}

impl<'a> From<&'a Refund> for RefundRow<'a> {
    fn from(refund: &'a Refund) -> Self {
        Self {
            refund: refund.id,
            order: &refund.order_number,
            status: refund.status.as_str(),
            total_credit: refund.total_credit.value(),
            currency: &refund.currency,
            items: refund.num_items(),
        }
    }
}

/// Writes the final state of refunds as CSV.
pub struct RefundWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> RefundWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_refunds(&mut self, refunds: impl IntoIterator<Item = Refund>) -> Result<()> {
        for refund in refunds {
            self.writer.serialize(RefundRow::from(&refund))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
