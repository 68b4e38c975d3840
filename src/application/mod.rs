//! Application layer orchestrating the refund lifecycle.
//!
//! [`refunds::RefundService`] owns the ports and drives refunds through
//! creation, approval and denial. Purchaser notifications and the
//! "refund completed" signal are side effects of a successful approval.

pub mod notifications;
pub mod refunds;
pub mod signals;
