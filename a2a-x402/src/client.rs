//! Client-side payment orchestration.
//!
//! The client receives a task paused in `payment-required`, picks one of
//! the offered options with a selection policy, signs it with an injected
//! [`Wallet`], and answers with a submission message the merchant can
//! correlate back to the task. The client never talks to the facilitator;
//! its copy of the task state only mirrors what it sent.

use std::sync::Arc;

use async_trait::async_trait;

use crate::a2a::{Message, Task};
use crate::error::{NoAcceptableOptionError, ProtocolError, SchemeMismatchError};
use crate::metadata;
use crate::proto::{PaymentPayload, PaymentRequired, PaymentRequirements};
use crate::status::PaymentStatus;
use crate::tracker;

/// Error from a wallet signing operation.
pub type WalletError = Box<dyn std::error::Error + Send + Sync>;

/// Signs payment authorizations.
///
/// Implementations hold the key material; this crate never sees it. The
/// returned payload must name the same scheme and network as the
/// requirement it answers.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Produces a signed payment authorization for one requirement.
    async fn sign(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<PaymentPayload, WalletError>;
}

/// Errors surfaced by client orchestration.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A protocol invariant was violated.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The wallet refused or failed to sign.
    #[error("wallet signing failed: {0}")]
    Wallet(#[source] WalletError),
}

impl From<NoAcceptableOptionError> for ClientError {
    fn from(e: NoAcceptableOptionError) -> Self {
        Self::Protocol(e.into())
    }
}

/// Picks which offered requirement to pay, by index into `accepts`.
///
/// Returning `None` means nothing offered is acceptable; the caller
/// should reject the payment rather than stall.
pub type PaymentPolicy = Box<dyn Fn(&[PaymentRequirements]) -> Option<usize> + Send + Sync>;

/// Accepts the first offered option. The default policy.
#[must_use]
pub fn first_offer() -> PaymentPolicy {
    Box::new(|accepts| (!accepts.is_empty()).then_some(0))
}

/// Prefers an option on the given network, falling back to the first
/// offer when none matches.
#[must_use]
pub fn prefer_network(network: impl Into<String>) -> PaymentPolicy {
    let network = network.into();
    Box::new(move |accepts| {
        accepts
            .iter()
            .position(|r| r.network == network)
            .or_else(|| (!accepts.is_empty()).then_some(0))
    })
}

/// Prefers an option with the given scheme, falling back to the first
/// offer when none matches.
#[must_use]
pub fn prefer_scheme(scheme: impl Into<String>) -> PaymentPolicy {
    let scheme = scheme.into();
    Box::new(move |accepts| {
        accepts
            .iter()
            .position(|r| r.scheme == scheme)
            .or_else(|| (!accepts.is_empty()).then_some(0))
    })
}

/// Accepts only options at or under a spending limit, in atomic units.
///
/// Unlike the preference policies this one has no fallback: an offer
/// over the limit is not acceptable at any price.
#[must_use]
pub fn max_amount(limit: u128) -> PaymentPolicy {
    Box::new(move |accepts| {
        accepts
            .iter()
            .position(|r| r.max_amount.parse::<u128>().is_ok_and(|amount| amount <= limit))
    })
}

/// Drives the client side of the payment protocol.
pub struct ClientOrchestrator {
    wallet: Arc<dyn Wallet>,
    policy: PaymentPolicy,
}

impl std::fmt::Debug for ClientOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOrchestrator").finish_non_exhaustive()
    }
}

impl ClientOrchestrator {
    /// Creates an orchestrator that accepts the first offered option.
    #[must_use]
    pub fn new(wallet: Arc<dyn Wallet>) -> Self {
        Self {
            wallet,
            policy: first_offer(),
        }
    }

    /// Replaces the selection policy.
    #[must_use]
    pub fn with_policy(mut self, policy: PaymentPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Applies the selection policy to an offer.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NoAcceptableOption`] if the policy
    /// rejects every entry, or [`ProtocolError::InvalidRequirements`] if
    /// the envelope itself is malformed.
    pub fn select_requirement<'a>(
        &self,
        required: &'a PaymentRequired,
    ) -> Result<&'a PaymentRequirements, ProtocolError> {
        required.validate()?;
        (self.policy)(&required.accepts)
            .and_then(|index| required.accepts.get(index))
            .ok_or_else(|| {
                NoAcceptableOptionError::new(format!(
                    "selection policy rejected all {} offered options",
                    required.accepts.len()
                ))
                .into()
            })
    }

    /// Selects, signs, and packages a payment for submission.
    ///
    /// The task must be the client's copy of the merchant task, already
    /// paused in `payment-required`. On success its state moves to
    /// `payment-submitted` and the returned message carries the signed
    /// payload under the protocol key, addressed to the same task id the
    /// requirement arrived on.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] if nothing is acceptable, the
    /// wallet signed for the wrong scheme/network, or the task is not
    /// awaiting payment; [`ClientError::Wallet`] if signing fails. On
    /// error the task state is unchanged.
    pub async fn submit_payment(
        &self,
        task: &mut Task,
        required: &PaymentRequired,
        message_id: impl Into<String>,
    ) -> Result<Message, ClientError> {
        let selected = self.select_requirement(required)?;
        let payload = self
            .wallet
            .sign(selected)
            .await
            .map_err(ClientError::Wallet)?;
        if !payload.matches(selected) {
            return Err(ClientError::Protocol(
                SchemeMismatchError::new(payload.scheme, payload.network, 0).into(),
            ));
        }
        tracker::mark_submitted(task, &payload)?;

        let mut message = Message::for_task(message_id, task);
        metadata::write_payload(&mut message.metadata, &payload);
        metadata::write_status(&mut message.metadata, PaymentStatus::Submitted);
        tracing::debug!(task_id = %task.id, scheme = %payload.scheme, "payment submission prepared");
        Ok(message)
    }

    /// Declines an open payment requirement.
    ///
    /// Moves the client's task copy to terminal `payment-rejected` and
    /// returns the message informing the merchant, carrying the terminal
    /// status and the stated reason. The wallet is never consulted.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] unless the task is awaiting
    /// payment.
    pub fn reject_payment(
        &self,
        task: &mut Task,
        message_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<Message, ClientError> {
        tracker::mark_rejected(task)?;
        let reason = reason.into();
        let mut message = Message::for_task(message_id, task);
        metadata::write_status(&mut message.metadata, PaymentStatus::Rejected);
        metadata::write_rejection_reason(&mut message.metadata, &reason);
        tracing::debug!(task_id = %task.id, %reason, "payment rejected");
        Ok(message)
    }
}
