use crate::config::SiteConfiguration;
use crate::domain::order::User;
use crate::domain::ports::{NotificationContext, NotificationDispatcher, RefundCompletedListener};
use crate::domain::refund::Refund;
use crate::error::{ListenerError, NotificationError};
use async_trait::async_trait;

/// Dispatches notifications as structured log events.
///
/// Stands in for the email worker when the engine runs as a batch tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for LogNotificationDispatcher {
    async fn notify(
        &self,
        user: &User,
        template_code: &str,
        context: &NotificationContext,
        site: &SiteConfiguration,
    ) -> Result<(), NotificationError> {
        let payload =
            serde_json::to_string(context).map_err(|e| NotificationError(e.to_string()))?;
        tracing::info!(
            target: "notifications",
            template = template_code,
            recipient = %user.email,
            site = %site.partner_code,
            context = %payload,
            "Notification dispatched"
        );
        Ok(())
    }
}

/// Writes every completed refund to the audit log.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuditLogListener;

impl RefundCompletedListener for AuditLogListener {
    fn name(&self) -> &str {
        "audit-log"
    }

    fn on_refund_completed(&self, refund: &Refund) -> Result<(), ListenerError> {
        tracing::info!(
            target: "audit",
            event = "refund_completed",
            refund_id = refund.id,
            order_number = %refund.order_number,
            amount = %refund.total_credit.value(),
            currency = %refund.currency,
            user_id = refund.user.id,
            items = refund.num_items()
        );
        Ok(())
    }
}
