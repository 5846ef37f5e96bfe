//! Protocol metadata keys and the typed boundary around them.
//!
//! Payment data travels on tasks and messages as generic JSON metadata.
//! This module is the only place that converts between those maps and the
//! typed [`crate::proto`] structures; everything above it works with
//! typed values.
//!
//! Reads go through a small locator: a key is looked up directly first,
//! then one level deep inside any embedding object (some higher-level
//! protocols nest the same keys inside a mandate object instead of
//! carrying them standalone). Writes always use the standalone form.

use serde::Serialize;
use serde_json::Value;

use crate::a2a::Metadata;
use crate::error::CorruptStateError;
use crate::proto::{ErrorCode, PaymentPayload, PaymentRequired, SettleResponse};
use crate::status::PaymentStatus;

/// Protocol metadata keys.
///
/// These exact strings are required for interop with any conforming
/// counterpart.
pub mod keys {
    /// Current payment status of the task.
    pub const STATUS: &str = "x402.payment.status";
    /// The offered `PaymentRequired` envelope.
    pub const REQUIRED: &str = "x402.payment.required";
    /// The submitted `PaymentPayload`.
    pub const PAYLOAD: &str = "x402.payment.payload";
    /// Ordered, append-only settlement receipt history.
    pub const RECEIPTS: &str = "x402.payment.receipts";
    /// Short error code string on failure.
    pub const ERROR: &str = "x402.payment.error";
    /// Human-readable reason a client declined to pay.
    pub const REASON: &str = "x402.payment.reason";
}

/// Finds a protocol key: standalone first, then embedded one level deep.
fn locate<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a Value> {
    if let Some(value) = metadata.get(key) {
        return Some(value);
    }
    metadata
        .values()
        .find_map(|value| value.as_object().and_then(|nested| nested.get(key)))
}

fn decode<T: serde::de::DeserializeOwned>(
    metadata: &Metadata,
    key: &'static str,
) -> Result<Option<T>, CorruptStateError> {
    match locate(metadata, key) {
        None => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| CorruptStateError::new(key, e.to_string())),
    }
}

fn encode<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).expect("protocol types serialize to JSON")
}

/// Reads the current payment status, if the protocol has been engaged.
///
/// # Errors
///
/// Returns [`CorruptStateError`] if the stored value is not a known
/// status string.
pub fn read_status(metadata: &Metadata) -> Result<Option<PaymentStatus>, CorruptStateError> {
    match locate(metadata, keys::STATUS) {
        None => Ok(None),
        Some(Value::String(s)) => s.parse().map(Some),
        Some(other) => Err(CorruptStateError::new(
            keys::STATUS,
            format!("expected a string, found {other}"),
        )),
    }
}

/// Writes the current payment status.
pub fn write_status(metadata: &mut Metadata, status: PaymentStatus) {
    metadata.insert(keys::STATUS.to_owned(), Value::String(status.as_str().to_owned()));
}

/// Reads the stored payment-required envelope.
///
/// # Errors
///
/// Returns [`CorruptStateError`] if the stored value does not decode.
pub fn read_required(metadata: &Metadata) -> Result<Option<PaymentRequired>, CorruptStateError> {
    decode(metadata, keys::REQUIRED)
}

/// Stores the payment-required envelope.
pub fn write_required(metadata: &mut Metadata, required: &PaymentRequired) {
    metadata.insert(keys::REQUIRED.to_owned(), encode(required));
}

/// Removes the stored payment-required envelope.
pub fn clear_required(metadata: &mut Metadata) {
    metadata.remove(keys::REQUIRED);
}

/// Reads the stored payment payload.
///
/// # Errors
///
/// Returns [`CorruptStateError`] if the stored value does not decode.
pub fn read_payload(metadata: &Metadata) -> Result<Option<PaymentPayload>, CorruptStateError> {
    decode(metadata, keys::PAYLOAD)
}

/// Stores the submitted payment payload.
pub fn write_payload(metadata: &mut Metadata, payload: &PaymentPayload) {
    metadata.insert(keys::PAYLOAD.to_owned(), encode(payload));
}

/// Removes the stored payment payload.
pub fn clear_payload(metadata: &mut Metadata) {
    metadata.remove(keys::PAYLOAD);
}

/// Appends one settlement result to the receipt history.
///
/// Prior entries are never rewritten; a non-array value under the key is
/// replaced rather than decoded, so a corrupt history cannot block
/// recording new receipts.
pub fn append_receipt(metadata: &mut Metadata, receipt: &SettleResponse) {
    let entry = encode(receipt);
    match metadata.get_mut(keys::RECEIPTS) {
        Some(Value::Array(receipts)) => receipts.push(entry),
        _ => {
            metadata.insert(keys::RECEIPTS.to_owned(), Value::Array(vec![entry]));
        }
    }
}

/// Reads the receipt history in recording order.
///
/// # Errors
///
/// Returns [`CorruptStateError`] if any stored entry does not decode.
pub fn read_receipts(metadata: &Metadata) -> Result<Vec<SettleResponse>, CorruptStateError> {
    decode::<Vec<SettleResponse>>(metadata, keys::RECEIPTS).map(Option::unwrap_or_default)
}

/// Reads the recorded error code, if any.
///
/// # Errors
///
/// Returns [`CorruptStateError`] if the stored value is not a known code.
pub fn read_error_code(metadata: &Metadata) -> Result<Option<ErrorCode>, CorruptStateError> {
    decode(metadata, keys::ERROR)
}

/// Records the error code for a failed payment.
pub fn write_error_code(metadata: &mut Metadata, code: ErrorCode) {
    metadata.insert(keys::ERROR.to_owned(), Value::String(code.as_str().to_owned()));
}

/// Removes a stale error code.
pub fn clear_error_code(metadata: &mut Metadata) {
    metadata.remove(keys::ERROR);
}

/// Reads the rejection reason, if one was attached.
///
/// # Errors
///
/// Returns [`CorruptStateError`] if the stored value is not a string.
pub fn read_rejection_reason(metadata: &Metadata) -> Result<Option<String>, CorruptStateError> {
    match locate(metadata, keys::REASON) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(CorruptStateError::new(
            keys::REASON,
            format!("expected a string, found {other}"),
        )),
    }
}

/// Attaches the reason a payment was declined.
pub fn write_rejection_reason(metadata: &mut Metadata, reason: &str) {
    metadata.insert(keys::REASON.to_owned(), Value::String(reason.to_owned()));
}
