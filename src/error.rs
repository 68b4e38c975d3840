use thiserror::Error;

/// Result type used across the refund engine.
pub type Result<T> = std::result::Result<T, RefundError>;

#[derive(Error, Debug)]
pub enum RefundError {
    #[error("Transition from '{from}' to '{to}' is invalid for {entity} {id}")]
    InvalidTransition {
        entity: &'static str,
        id: u64,
        from: String,
        to: String,
    },
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),
    #[error("Refund {0} not found")]
    NotFound(u64),
    #[error("Order {0} not found")]
    OrderNotFound(String),
    #[error("Order line {order_line} already has an active refund line")]
    LineAlreadyRefunded { order_line: u64 },
    #[error("Refund {0} was modified concurrently")]
    ConcurrentModification(u64),
    #[error("The action [{0}] is not valid")]
    InvalidAction(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Failures reported by the payment gateway while issuing a credit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("credit declined by {processor}: {reason}")]
    Declined { processor: String, reason: String },
    #[error("transaction {reference} has not settled yet")]
    UnsettledTransaction { reference: String },
    #[error("no processor response recorded for transaction {reference}")]
    ProcessorResponseNotFound { reference: String },
    #[error("gateway error: {0}")]
    Gateway(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unable to revoke fulfillment of order line {order_line}: {reason}")]
pub struct RevocationError {
    pub order_line: u64,
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification dispatch failed: {0}")]
pub struct NotificationError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("listener {listener} failed: {reason}")]
pub struct ListenerError {
    pub listener: String,
    pub reason: String,
}
