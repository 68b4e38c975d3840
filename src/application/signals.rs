use crate::domain::ports::RefundCompletedListener;
use crate::domain::refund::Refund;
use crate::error::ListenerError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Fan-out of the "refund completed" signal.
///
/// Delivery is best effort: each listener runs in isolation, and an error or
/// panic in one listener neither stops the others nor reaches the caller.
#[derive(Default, Clone)]
pub struct RefundSignal {
    listeners: Vec<Arc<dyn RefundCompletedListener>>,
}

impl RefundSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, listener: Arc<dyn RefundCompletedListener>) {
        self.listeners.push(listener);
    }

    /// Delivers `refund` to every listener and returns the failures.
    pub fn send_robust(&self, refund: &Refund) -> Vec<ListenerError> {
        let mut failures = Vec::new();

        for listener in &self.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_refund_completed(refund)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(_) => ListenerError {
                    listener: listener.name().to_string(),
                    reason: "listener panicked".to_string(),
                },
            };
            tracing::error!(
                refund_id = refund.id,
                listener = listener.name(),
                error = %failure,
                "Refund completed listener failed"
            );
            failures.push(failure);
        }

        failures
    }
}
