//! Protocol error types.
//!
//! These are contract violations — a non-conforming counterpart or a
//! caller bug — and are never retried automatically. Business-level
//! payment failures are not Rust errors: they are recorded as
//! [`crate::proto::ErrorCode`] receipts on the task.

use std::fmt;

use crate::status::PaymentStatus;

/// A state-machine operation was attempted from the wrong state.
///
/// This indicates a programming error on the caller's side, not a
/// runtime condition; the stored state is left untouched.
#[derive(Debug, Clone)]
pub struct InvalidTransitionError {
    /// The attempted operation (e.g., `"mark_submitted"`).
    pub operation: &'static str,
    /// The state the task was actually in (`None` = protocol not engaged).
    pub from: Option<PaymentStatus>,
}

impl InvalidTransitionError {
    /// Creates a new invalid-transition error.
    #[must_use]
    pub const fn new(operation: &'static str, from: Option<PaymentStatus>) -> Self {
        Self { operation, from }
    }
}

impl fmt::Display for InvalidTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.from {
            Some(state) => write!(f, "{} is not legal from state '{state}'", self.operation),
            None => write!(
                f,
                "{} is not legal before payment is requested",
                self.operation
            ),
        }
    }
}

impl std::error::Error for InvalidTransitionError {}

/// Stored protocol metadata could not be decoded.
///
/// Must not crash the caller: orchestrators treat the affected task as
/// "unknown" and re-request payment.
#[derive(Debug, Clone)]
pub struct CorruptStateError {
    /// The metadata key holding the malformed value.
    pub key: String,
    /// What failed to decode.
    pub detail: String,
}

impl CorruptStateError {
    /// Creates a new corrupt-state error for a metadata key.
    #[must_use]
    pub fn new(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CorruptStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corrupt value under '{}': {}", self.key, self.detail)
    }
}

impl std::error::Error for CorruptStateError {}

/// A payment submission could not be linked back to an open task.
#[derive(Debug, Clone)]
pub struct UnresolvableCorrelationError {
    /// Why correlation failed.
    pub detail: String,
}

impl UnresolvableCorrelationError {
    /// Creates a new correlation error.
    #[must_use]
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for UnresolvableCorrelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unresolvable payment correlation: {}", self.detail)
    }
}

impl std::error::Error for UnresolvableCorrelationError {}

/// A submitted payload does not match exactly one offered requirement.
///
/// `matches == 0` means nothing was offered for the payload's
/// scheme/network; `matches > 1` means the match is ambiguous and is
/// rejected to protect against cross-requirement confusion.
#[derive(Debug, Clone)]
pub struct SchemeMismatchError {
    /// Scheme named by the payload.
    pub scheme: String,
    /// Network named by the payload.
    pub network: String,
    /// Number of offered requirements the payload matched.
    pub matches: usize,
}

impl SchemeMismatchError {
    /// Creates a new scheme-mismatch error.
    #[must_use]
    pub fn new(scheme: impl Into<String>, network: impl Into<String>, matches: usize) -> Self {
        Self {
            scheme: scheme.into(),
            network: network.into(),
            matches,
        }
    }
}

impl fmt::Display for SchemeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.matches == 0 {
            write!(
                f,
                "no offered requirement matches scheme '{}' on network '{}'",
                self.scheme, self.network
            )
        } else {
            write!(
                f,
                "payload for scheme '{}' on network '{}' matches {} offered requirements",
                self.scheme, self.network, self.matches
            )
        }
    }
}

impl std::error::Error for SchemeMismatchError {}

/// A submission arrived for a task that holds no open payment requirement.
#[derive(Debug, Clone)]
pub struct MissingRequirementError {
    /// The state the task was in instead of `payment-required`.
    pub status: Option<PaymentStatus>,
}

impl MissingRequirementError {
    /// Creates a new missing-requirement error.
    #[must_use]
    pub const fn new(status: Option<PaymentStatus>) -> Self {
        Self { status }
    }
}

impl fmt::Display for MissingRequirementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Some(state) => write!(
                f,
                "no open payment requirement: task is in state '{state}'"
            ),
            None => write!(f, "no open payment requirement: payment never requested"),
        }
    }
}

impl std::error::Error for MissingRequirementError {}

/// The client's selection policy rejected every offered requirement.
///
/// The caller should issue a rejection rather than silently stalling.
#[derive(Debug, Clone)]
pub struct NoAcceptableOptionError {
    /// Why nothing was acceptable.
    pub reason: String,
}

impl NoAcceptableOptionError {
    /// Creates a new no-acceptable-option error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for NoAcceptableOptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no acceptable payment option: {}", self.reason)
    }
}

impl std::error::Error for NoAcceptableOptionError {}

/// Umbrella for protocol-level errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A state transition was attempted out of order.
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransitionError),

    /// Stored protocol metadata is malformed.
    #[error("{0}")]
    CorruptState(#[from] CorruptStateError),

    /// A submission could not be correlated to an open task.
    #[error("{0}")]
    UnresolvableCorrelation(#[from] UnresolvableCorrelationError),

    /// A payload does not match exactly one offered requirement.
    #[error("{0}")]
    SchemeMismatch(#[from] SchemeMismatchError),

    /// A submission arrived with no open requirement on its task.
    #[error("{0}")]
    MissingRequirement(#[from] MissingRequirementError),

    /// The selection policy rejected every offered requirement.
    #[error("{0}")]
    NoAcceptableOption(#[from] NoAcceptableOptionError),

    /// A requirement or envelope violates a structural invariant.
    #[error("invalid payment requirements: {0}")]
    InvalidRequirements(String),
}

impl ProtocolError {
    /// Shorthand for [`ProtocolError::InvalidRequirements`].
    #[must_use]
    pub fn invalid_requirements(reason: impl Into<String>) -> Self {
        Self::InvalidRequirements(reason.into())
    }
}
