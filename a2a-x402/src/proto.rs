//! Wire format types for the x402 A2A payment extension.
//!
//! These types cross three boundaries: merchant → client (payment
//! requirements), client → merchant (signed payment payload), and
//! merchant ↔ facilitator (verify/settle). All of them serialize to JSON
//! with camelCase field names and travel inside generic task/message
//! metadata; typed access at that boundary lives in [`crate::metadata`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use serde_with::{VecSkipError, serde_as};

use crate::error::ProtocolError;

/// Network identifier, e.g. `"base"` or `"base-sepolia"`.
pub type Network = String;

/// Default validity window for a payment requirement, in seconds.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 600;

/// The x402 protocol version spoken by this crate.
pub const X402_VERSION: u32 = 1;

/// One offered way to pay: scheme, network, asset, recipient, and amount.
///
/// Created by the merchant when a request needs payment and immutable
/// thereafter; the same instance is referenced throughout a single
/// payment attempt and discarded once settlement resolves.
///
/// # JSON Format
///
/// ```json
/// {
///   "scheme": "exact",
///   "network": "base",
///   "asset": "0x833589fCD6eDb6E08f4c7C32D4f71b54bda02913",
///   "payTo": "0xMerchant",
///   "maxAmount": "1000000",
///   "resource": "/premium-service",
///   "maxTimeoutSeconds": 600,
///   "extra": {}
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme identifier (e.g., "exact").
    pub scheme: String,

    /// Network identifier.
    pub network: Network,

    /// Asset address/identifier (e.g., USDC contract address).
    pub asset: String,

    /// Recipient address.
    pub pay_to: String,

    /// Amount in the asset's smallest unit (e.g., "1000000" for 1 USDC).
    pub max_amount: String,

    /// Opaque identifier of the thing being purchased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// How long the requirement remains acceptable from the moment it
    /// was issued, in seconds.
    #[serde(default = "default_max_timeout")]
    pub max_timeout_seconds: u64,

    /// Additional scheme-specific data (e.g., EIP-712 domain params).
    #[serde(default = "default_empty_object")]
    pub extra: Value,
}

impl PaymentRequirements {
    /// Checks structural invariants: `max_amount` must be a non-negative
    /// integer string in atomic units, and `scheme`/`network`/`pay_to`
    /// must be non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRequirements`] describing the
    /// first violated invariant.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.scheme.is_empty() {
            return Err(ProtocolError::invalid_requirements("scheme is empty"));
        }
        if self.network.is_empty() {
            return Err(ProtocolError::invalid_requirements("network is empty"));
        }
        if self.pay_to.is_empty() {
            return Err(ProtocolError::invalid_requirements("payTo is empty"));
        }
        if self.max_amount.parse::<u128>().is_err() {
            return Err(ProtocolError::invalid_requirements(format!(
                "maxAmount '{}' is not a non-negative integer string",
                self.max_amount
            )));
        }
        Ok(())
    }

    /// Returns the extra metadata, or `None` if it is null.
    #[must_use]
    pub fn extra(&self) -> Option<&Value> {
        if self.extra.is_null() { None } else { Some(&self.extra) }
    }
}

/// The envelope of offered payment requirements.
///
/// Attached by the merchant under [`crate::metadata::keys::REQUIRED`]
/// when a task needs payment. The client may select any entry of
/// `accepts`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version.
    #[serde(default = "default_version")]
    pub x402_version: u32,

    /// Ordered, non-empty list of acceptable payment options.
    ///
    /// Entries that fail to decode (e.g. options from a newer protocol
    /// revision) are skipped rather than failing the whole envelope;
    /// [`Self::validate`] still rejects an empty list.
    #[serde_as(as = "VecSkipError<_>")]
    pub accepts: Vec<PaymentRequirements>,

    /// Optional error message explaining why payment is (re-)requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaymentRequired {
    /// Wraps requirements in an envelope at the current protocol version.
    #[must_use]
    pub const fn new(accepts: Vec<PaymentRequirements>) -> Self {
        Self {
            x402_version: X402_VERSION,
            accepts,
            error: None,
        }
    }

    /// Checks that `accepts` is non-empty and every entry is valid.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRequirements`] on violation.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.accepts.is_empty() {
            return Err(ProtocolError::invalid_requirements(
                "accepts must contain at least one requirement",
            ));
        }
        for requirements in &self.accepts {
            requirements.validate()?;
        }
        Ok(())
    }
}

/// A signed payment authorization produced by a wallet.
///
/// `scheme` and `network` must match exactly one entry of the `accepts`
/// set this payload answers; the signature inside `payload` is opaque
/// here and validated externally by the facilitator. A payload is
/// consumed at most once — replay is rejected at the settlement layer
/// via on-chain nonce tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Protocol version.
    #[serde(default = "default_version")]
    pub x402_version: u32,

    /// Payment scheme the payload was signed for.
    pub scheme: String,

    /// Network the payload was signed for.
    pub network: Network,

    /// Scheme-specific signed data (e.g., an EIP-3009 authorization
    /// struct plus signature).
    pub payload: Value,
}

impl PaymentPayload {
    /// Returns `true` if this payload answers the given requirement.
    #[must_use]
    pub fn matches(&self, requirements: &PaymentRequirements) -> bool {
        self.scheme == requirements.scheme && self.network == requirements.network
    }
}

/// Result of a facilitator verification call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerifyResponse {
    /// The payload passes all checks.
    Valid {
        /// The payer's address, if identified.
        payer: Option<String>,
    },
    /// The payload was well-formed but failed verification.
    Invalid {
        /// Machine-readable reason verification failed.
        reason: String,
        /// The payer address, if identifiable.
        payer: Option<String>,
    },
}

impl VerifyResponse {
    /// Constructs a successful verification response.
    #[must_use]
    pub const fn valid(payer: Option<String>) -> Self {
        Self::Valid { payer }
    }

    /// Constructs a failed verification response.
    #[must_use]
    pub const fn invalid(reason: String) -> Self {
        Self::Invalid {
            reason,
            payer: None,
        }
    }

    /// Returns `true` if the verification succeeded.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponseWire {
    is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
}

impl Serialize for VerifyResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            Self::Valid { payer } => VerifyResponseWire {
                is_valid: true,
                invalid_reason: None,
                payer: payer.clone(),
            },
            Self::Invalid { reason, payer } => VerifyResponseWire {
                is_valid: false,
                invalid_reason: Some(reason.clone()),
                payer: payer.clone(),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = VerifyResponseWire::deserialize(deserializer)?;
        if wire.is_valid {
            Ok(Self::Valid { payer: wire.payer })
        } else {
            let reason = wire
                .invalid_reason
                .ok_or_else(|| serde::de::Error::missing_field("invalidReason"))?;
            Ok(Self::Invalid {
                reason,
                payer: wire.payer,
            })
        }
    }
}

/// Outcome of one verify/settle attempt (a "receipt").
///
/// Produced once per settlement attempt and appended, never overwritten,
/// to the per-task receipt history under
/// [`crate::metadata::keys::RECEIPTS`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettleResponse {
    /// Settlement succeeded.
    Success {
        /// The on-chain transaction hash.
        transaction: String,
        /// The network where settlement occurred.
        network: Network,
        /// The address that paid, if known.
        payer: Option<String>,
    },
    /// Settlement (or verification) failed.
    Failed {
        /// Machine-readable reason for failure.
        error_reason: String,
        /// The network where settlement was attempted.
        network: Network,
        /// The payer address, if identifiable.
        payer: Option<String>,
    },
}

impl SettleResponse {
    /// Returns `true` if the settlement succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the network this result refers to.
    #[must_use]
    pub fn network(&self) -> &str {
        match self {
            Self::Success { network, .. } | Self::Failed { network, .. } => network,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponseWire {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<String>,
    network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
}

impl Serialize for SettleResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            Self::Success {
                transaction,
                network,
                payer,
            } => SettleResponseWire {
                success: true,
                transaction: Some(transaction.clone()),
                error_reason: None,
                network: network.clone(),
                payer: payer.clone(),
            },
            Self::Failed {
                error_reason,
                network,
                payer,
            } => SettleResponseWire {
                success: false,
                transaction: None,
                error_reason: Some(error_reason.clone()),
                network: network.clone(),
                payer: payer.clone(),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettleResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = SettleResponseWire::deserialize(deserializer)?;
        if wire.success {
            let transaction = wire
                .transaction
                .ok_or_else(|| serde::de::Error::missing_field("transaction"))?;
            Ok(Self::Success {
                transaction,
                network: wire.network,
                payer: wire.payer,
            })
        } else {
            let error_reason = wire
                .error_reason
                .ok_or_else(|| serde::de::Error::missing_field("errorReason"))?;
            Ok(Self::Failed {
                error_reason,
                network: wire.network,
                payer: wire.payer,
            })
        }
    }
}

/// Standard error codes surfaced to the requesting party on payment
/// failure, carried under [`crate::metadata::keys::ERROR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    /// The payer's balance cannot cover the amount.
    InsufficientFunds,
    /// The payment signature failed verification.
    InvalidSignature,
    /// The payment authorization or the facilitator call deadline expired.
    ExpiredPayment,
    /// The authorization nonce was already consumed.
    DuplicateNonce,
    /// The payload names a different network than the requirement.
    NetworkMismatch,
    /// The authorized amount does not satisfy the requirement.
    InvalidAmount,
    /// On-chain settlement failed.
    SettlementFailed,
}

impl ErrorCode {
    /// Returns the wire string for this code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::ExpiredPayment => "EXPIRED_PAYMENT",
            Self::DuplicateNonce => "DUPLICATE_NONCE",
            Self::NetworkMismatch => "NETWORK_MISMATCH",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::SettlementFailed => "SETTLEMENT_FAILED",
        }
    }

    /// Maps a facilitator-reported reason string to the closest code.
    ///
    /// `fallback` is used when no keyword matches (verification failures
    /// typically fall back to [`Self::InvalidSignature`], settlement
    /// failures to [`Self::SettlementFailed`]).
    #[must_use]
    pub fn from_reason(reason: &str, fallback: Self) -> Self {
        let lowered = reason.to_lowercase();
        if lowered.contains("insufficient") {
            Self::InsufficientFunds
        } else if lowered.contains("expired") {
            Self::ExpiredPayment
        } else if lowered.contains("nonce") {
            Self::DuplicateNonce
        } else if lowered.contains("network") || lowered.contains("chain") {
            Self::NetworkMismatch
        } else if lowered.contains("amount") {
            Self::InvalidAmount
        } else {
            fallback
        }
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn default_version() -> u32 {
    X402_VERSION
}

const fn default_max_timeout() -> u64 {
    DEFAULT_MAX_TIMEOUT_SECONDS
}

fn default_empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
