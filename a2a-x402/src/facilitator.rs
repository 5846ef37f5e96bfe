//! Facilitator contract.
//!
//! The facilitator is the external service that verifies payment
//! signatures and posts settlement transactions on-chain. This crate only
//! consumes it: implementations live elsewhere (see the `a2a-x402-http`
//! crate for a remote HTTP client). It is always an injected dependency —
//! never a module-level singleton — so tests can substitute a mock and
//! concurrent tasks can share one instance.

use std::time::Duration;

use async_trait::async_trait;

use crate::proto::{PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse};

/// Errors from facilitator calls, split by retry semantics.
///
/// A `Timeout` resolves the current attempt (recorded as
/// `EXPIRED_PAYMENT`); a `Transport` failure is retriable by the caller
/// and records nothing. Explicit facilitator rejections are not errors at
/// all — they arrive as [`VerifyResponse::Invalid`] or
/// [`SettleResponse::Failed`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FacilitatorError {
    /// The call did not complete within its deadline.
    #[error("facilitator call timed out after {0:?}")]
    Timeout(Duration),

    /// The facilitator was unreachable or answered out of contract.
    #[error("facilitator transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl FacilitatorError {
    /// Wraps any transport-level error.
    #[must_use]
    pub fn transport(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Box::new(source))
    }

    /// Returns `true` if the caller may retry the call.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Verify-and-settle interface to an external facilitator service.
///
/// Both calls are blocking network operations from the orchestrator's
/// point of view; implementations must bound them with a deadline derived
/// from the requirement's `max_timeout_seconds` and surface an expired
/// deadline as [`FacilitatorError::Timeout`].
#[async_trait]
pub trait Facilitator: Send + Sync {
    /// Checks that a payment payload is a valid authorization for the
    /// given requirement.
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorError>;

    /// Executes the payment on-chain.
    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorError>;
}
