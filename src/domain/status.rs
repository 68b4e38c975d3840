//! Status values and the data-driven transition pipeline shared by
//! [`Refund`](super::refund::Refund) and [`RefundLine`](super::refund::RefundLine).

use crate::error::RefundError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefundStatus {
    #[serde(rename = "Open", alias = "OPEN")]
    Open,
    #[serde(rename = "Denied", alias = "DENIED")]
    Denied,
    #[serde(rename = "Payment Refund Error", alias = "PAYMENT_REFUND_ERROR")]
    PaymentRefundError,
    #[serde(rename = "Payment Refunded", alias = "PAYMENT_REFUNDED")]
    PaymentRefunded,
    #[serde(rename = "Revocation Error", alias = "REVOCATION_ERROR")]
    RevocationError,
    #[serde(rename = "Complete", alias = "COMPLETE")]
    Complete,
}

impl RefundStatus {
    pub const ALL: [Self; 6] = [
        Self::Open,
        Self::Denied,
        Self::PaymentRefundError,
        Self::PaymentRefunded,
        Self::RevocationError,
        Self::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Denied => "Denied",
            Self::PaymentRefundError => "Payment Refund Error",
            Self::PaymentRefunded => "Payment Refunded",
            Self::RevocationError => "Revocation Error",
            Self::Complete => "Complete",
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Denied => "DENIED",
            Self::PaymentRefundError => "PAYMENT_REFUND_ERROR",
            Self::PaymentRefunded => "PAYMENT_REFUNDED",
            Self::RevocationError => "REVOCATION_ERROR",
            Self::Complete => "COMPLETE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefundLineStatus {
    #[serde(rename = "Open", alias = "OPEN")]
    Open,
    #[serde(rename = "Revocation Error", alias = "REVOCATION_ERROR")]
    RevocationError,
    #[serde(rename = "Denied", alias = "DENIED")]
    Denied,
    #[serde(rename = "Complete", alias = "COMPLETE")]
    Complete,
}

impl RefundLineStatus {
    pub const ALL: [Self; 4] = [
        Self::Open,
        Self::RevocationError,
        Self::Denied,
        Self::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::RevocationError => "Revocation Error",
            Self::Denied => "Denied",
            Self::Complete => "Complete",
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::RevocationError => "REVOCATION_ERROR",
            Self::Denied => "DENIED",
            Self::Complete => "COMPLETE",
        }
    }
}

macro_rules! impl_status_text {
    ($status:ty, $name:literal) => {
        impl fmt::Display for $status {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $status {
            type Err = RefundError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                <$status>::ALL
                    .into_iter()
                    .find(|status| status.as_str() == s || status.code() == s)
                    .ok_or_else(|| {
                        RefundError::Validation(format!("unknown {} status [{}]", $name, s))
                    })
            }
        }
    };
}

impl_status_text!(RefundStatus, "refund");
impl_status_text!(RefundLineStatus, "refund line");

/// A directed adjacency table of allowed status transitions.
///
/// The table is plain data so deployments can override it through
/// configuration without touching the transition logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline<S: Eq + Hash> {
    transitions: HashMap<S, Vec<S>>,
}

impl<S: Copy + Eq + Hash> Pipeline<S> {
    pub fn new(transitions: impl IntoIterator<Item = (S, Vec<S>)>) -> Self {
        Self {
            transitions: transitions.into_iter().collect(),
        }
    }

    /// Statuses reachable from `current`. Unknown statuses have no exits.
    pub fn next_statuses(&self, current: S) -> &[S] {
        self.transitions
            .get(&current)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn allows(&self, from: S, to: S) -> bool {
        self.next_statuses(from).contains(&to)
    }

    pub fn contains(&self, status: S) -> bool {
        self.transitions.contains_key(&status)
    }

    /// Every status configured in this pipeline.
    pub fn statuses(&self) -> Vec<S> {
        self.transitions.keys().copied().collect()
    }
}

impl Default for Pipeline<RefundStatus> {
    fn default() -> Self {
        use RefundStatus::*;
        Self::new([
            (Open, vec![Denied, PaymentRefundError, PaymentRefunded]),
            (PaymentRefundError, vec![PaymentRefunded, PaymentRefundError]),
            (PaymentRefunded, vec![RevocationError, Complete]),
            (RevocationError, vec![RevocationError, Complete]),
            (Denied, vec![]),
            (Complete, vec![]),
        ])
    }
}

impl Default for Pipeline<RefundLineStatus> {
    fn default() -> Self {
        use RefundLineStatus::*;
        Self::new([
            (Open, vec![RevocationError, Denied, Complete]),
            (RevocationError, vec![RevocationError, Complete]),
            (Denied, vec![]),
            (Complete, vec![]),
        ])
    }
}

/// An entity whose status moves along a [`Pipeline`].
pub trait Transitionable {
    type Status: Copy + Eq + Hash + fmt::Display;

    /// Lower-case entity name used in error messages.
    const ENTITY: &'static str;

    fn id(&self) -> u64;
    fn status(&self) -> Self::Status;

    /// Writes the status without consulting a pipeline.
    fn write_status(&mut self, status: Self::Status);

    fn available_statuses<'p>(&self, pipeline: &'p Pipeline<Self::Status>) -> &'p [Self::Status] {
        pipeline.next_statuses(self.status())
    }

    /// Moves to `new_status` if the pipeline allows it.
    ///
    /// On rejection the entity is left untouched.
    fn set_status(
        &mut self,
        new_status: Self::Status,
        pipeline: &Pipeline<Self::Status>,
    ) -> Result<(), RefundError> {
        if !self.available_statuses(pipeline).contains(&new_status) {
            return Err(RefundError::InvalidTransition {
                entity: Self::ENTITY,
                id: self.id(),
                from: self.status().to_string(),
                to: new_status.to_string(),
            });
        }
        self.write_status(new_status);
        Ok(())
    }
}
