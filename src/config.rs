//! Engine configuration.
//!
//! Everything here is plain data with defaults, loaded from an optional JSON
//! file and handed to the [`RefundService`](crate::application::refunds::RefundService)
//! at construction time.

use crate::domain::status::{Pipeline, RefundLineStatus, RefundStatus};
use crate::error::{RefundError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipelines {
    pub refund: Pipeline<RefundStatus>,
    pub refund_line: Pipeline<RefundLineStatus>,
}

/// Per-site settings consulted when notifying purchasers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfiguration {
    pub partner_code: String,
    pub send_refund_notifications: bool,
    /// Receipt page; the order number is appended as a query parameter.
    pub receipt_page_url: String,
    pub explore_courses_url: String,
    pub support_url: String,
}

impl Default for SiteConfiguration {
    fn default() -> Self {
        Self {
            partner_code: "edX".to_string(),
            send_refund_notifications: true,
            receipt_page_url: "https://ecommerce.example.com/checkout/receipt/".to_string(),
            explore_courses_url: "https://lms.example.com/courses".to_string(),
            support_url: "https://support.example.com".to_string(),
        }
    }
}

impl SiteConfiguration {
    pub fn receipt_url(&self, order_number: &str) -> String {
        format!("{}?order_number={}", self.receipt_page_url, order_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pipelines: Pipelines,
    pub initial_refund_status: RefundStatus,
    pub initial_refund_line_status: RefundLineStatus,
    /// Whether zero-credit refunds revoke fulfillment when auto-approved.
    pub revoke_fulfillment_for_free_refunds: bool,
    pub site: SiteConfiguration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pipelines: Pipelines::default(),
            initial_refund_status: RefundStatus::Open,
            initial_refund_line_status: RefundLineStatus::Open,
            revoke_fulfillment_for_free_refunds: false,
            site: SiteConfiguration::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the initial statuses exist in their pipelines.
    pub fn validate(&self) -> Result<()> {
        if !self.pipelines.refund.contains(self.initial_refund_status) {
            return Err(RefundError::Config(format!(
                "initial refund status [{}] is not part of the refund pipeline",
                self.initial_refund_status
            )));
        }
        if !self
            .pipelines
            .refund_line
            .contains(self.initial_refund_line_status)
        {
            return Err(RefundError::Config(format!(
                "initial refund line status [{}] is not part of the refund line pipeline",
                self.initial_refund_line_status
            )));
        }
        Ok(())
    }
}
