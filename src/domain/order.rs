use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
}

/// The catalogue class of a purchased product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProductClass {
    /// A seat in a course run.
    Seat { course_name: String },
    CourseEntitlement,
    Other { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub title: String,
    pub class: ProductClass,
}

impl Product {
    /// Name shown to the purchaser in refund messages.
    ///
    /// Returns `None` for products that refund notifications do not cover.
    pub fn display_name(&self) -> Option<&str> {
        match &self.class {
            ProductClass::Seat { course_name } => Some(course_name),
            ProductClass::CourseEntitlement => Some(&self.title),
            ProductClass::Other { .. } => None,
        }
    }

    pub fn class_name(&self) -> &str {
        match &self.class {
            ProductClass::Seat { .. } => "Seat",
            ProductClass::CourseEntitlement => "Course Entitlement",
            ProductClass::Other { name } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: u64,
    pub product: Product,
    pub quantity: u32,
    pub line_price_excl_tax: Decimal,
    /// Whether the entitlement for this line was delivered.
    #[serde(default = "default_true")]
    pub fulfilled: bool,
}

/// How the order was paid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSource {
    /// Name of the processor that settled the payment (e.g. `authorizenet`).
    pub processor: String,
    /// Processor transaction id of the original charge.
    pub reference: String,
    #[serde(default = "default_true")]
    pub settled: bool,
    #[serde(default)]
    pub amount_refunded: Decimal,
}

fn default_true() -> bool {
    true
}

impl PaymentSource {
    pub fn refund(&mut self, amount: Decimal) {
        self.amount_refunded += amount;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub number: String,
    pub user: User,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub payment_source: Option<PaymentSource>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Order {
    pub fn line(&self, line_id: u64) -> Option<&OrderLine> {
        self.lines.iter().find(|line| line.id == line_id)
    }
}
