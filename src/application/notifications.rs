use crate::config::SiteConfiguration;
use crate::domain::money::format_currency;
use crate::domain::order::Order;
use crate::domain::ports::NotificationContext;
use crate::domain::refund::Refund;

pub const REFUND_TEMPLATE: &str = "REFUND";

/// Builds the purchaser email context for an approved refund.
///
/// Only the first refunded line names the item. Returns `None` when the site
/// has refund notifications switched off or the product is not a course
/// product; both cases are logged.
pub fn refund_notification(
    refund: &Refund,
    order: &Order,
    site: &SiteConfiguration,
) -> Option<NotificationContext> {
    if !site.send_refund_notifications {
        tracing::info!(
            refund_id = refund.id,
            partner = %site.partner_code,
            "Refund notifications are disabled for partner. No notification will be sent"
        );
        return None;
    }

    let first_line = refund.lines.first()?;
    let Some(order_line) = order.line(first_line.order_line_id) else {
        tracing::warn!(
            refund_id = refund.id,
            order_line = first_line.order_line_id,
            "Refunded order line is missing from order. No notification will be sent"
        );
        return None;
    };

    let Some(course_name) = order_line.product.display_name() else {
        tracing::warn!(
            refund_id = refund.id,
            product_class = order_line.product.class_name(),
            "No refund notification will be sent. Only course products are supported"
        );
        return None;
    };

    Some(NotificationContext {
        refund_id: refund.id,
        amount: format_currency(&refund.currency, refund.total_credit.value()),
        course_name: course_name.to_string(),
        order_number: order.number.clone(),
        order_url: site.receipt_url(&order.number),
        site_code: site.partner_code.clone(),
        explore_courses_url: site.explore_courses_url.clone(),
        support_url: site.support_url.clone(),
    })
}
