//! Payment status values for the A2A x402 flow.
//!
//! Exactly one status is attached to a task at any time, under the
//! [`crate::metadata::keys::STATUS`] metadata key. The wire strings are
//! kebab-case and fixed for interop.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CorruptStateError;

/// Protocol-defined payment states for the A2A x402 flow.
///
/// `Completed`, `Failed`, and `Rejected` are terminal: no operation
/// transitions out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Payment has been requested; the task is input-blocked.
    #[serde(rename = "payment-required")]
    Required,
    /// A signed payment payload has been submitted.
    #[serde(rename = "payment-submitted")]
    Submitted,
    /// Verification/settlement has been dispatched to the facilitator.
    #[serde(rename = "payment-pending")]
    Pending,
    /// The facilitator verified the payment authorization.
    #[serde(rename = "payment-verified")]
    Verified,
    /// Payment settled successfully. Terminal.
    #[serde(rename = "payment-completed")]
    Completed,
    /// Payment processing failed. Terminal.
    #[serde(rename = "payment-failed")]
    Failed,
    /// The client declined to pay. Terminal.
    #[serde(rename = "payment-rejected")]
    Rejected,
}

impl PaymentStatus {
    /// Returns the kebab-case string representation matching the wire format.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "payment-required",
            Self::Submitted => "payment-submitted",
            Self::Pending => "payment-pending",
            Self::Verified => "payment-verified",
            Self::Completed => "payment-completed",
            Self::Failed => "payment-failed",
            Self::Rejected => "payment-rejected",
        }
    }

    /// Returns `true` if no further transitions are allowed out of this state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = CorruptStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment-required" => Ok(Self::Required),
            "payment-submitted" => Ok(Self::Submitted),
            "payment-pending" => Ok(Self::Pending),
            "payment-verified" => Ok(Self::Verified),
            "payment-completed" => Ok(Self::Completed),
            "payment-failed" => Ok(Self::Failed),
            "payment-rejected" => Ok(Self::Rejected),
            other => Err(CorruptStateError::new(
                crate::metadata::keys::STATUS,
                format!("unknown payment status '{other}'"),
            )),
        }
    }
}
