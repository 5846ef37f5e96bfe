//! The payment state machine.
//!
//! Single source of truth for a task's payment status and its supporting
//! data. Every operation checks the current state before touching the
//! task: a failed call is a no-op on stored state. All state lives in the
//! task's own metadata — there is no cross-task store, so the caller only
//! has to serialize access to one task at a time.
//!
//! Canonical transitions:
//!
//! ```text
//! [none] ──mark_required──▶ payment-required
//! payment-required ──mark_submitted──▶ payment-submitted
//! payment-required ──mark_rejected──▶ payment-rejected (terminal)
//! payment-submitted ──mark_pending──▶ payment-pending
//! payment-pending ──mark_verified──▶ payment-verified
//! payment-verified ──record_success──▶ payment-completed (terminal)
//! payment-verified ──record_failure──▶ payment-failed (terminal)
//! payment-pending ──record_failure──▶ payment-failed (terminal)
//! ```

use crate::a2a::Task;
use crate::error::{CorruptStateError, InvalidTransitionError, ProtocolError};
use crate::metadata;
use crate::proto::{ErrorCode, PaymentPayload, PaymentRequired, SettleResponse};
use crate::status::PaymentStatus;

/// Reads the task's current payment status.
///
/// Returns `None` if the payment protocol has not been engaged for this
/// task.
///
/// # Errors
///
/// Returns [`CorruptStateError`] if the stored status does not map to a
/// known state. Callers should treat that as "unknown" and re-request
/// payment rather than crash.
pub fn status(task: &Task) -> Result<Option<PaymentStatus>, CorruptStateError> {
    metadata::read_status(&task.metadata)
}

/// Requests payment: attaches the envelope and moves to `payment-required`.
///
/// The only transition that may originate from "no state". Re-issuing
/// while already in `payment-required` replaces the open requirement; a
/// corrupt stored status is treated the same way, so a damaged task can
/// always be recovered by re-requesting payment. Any stale payload and
/// error code are cleared.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidTransition`] from any other state, or
/// [`ProtocolError::InvalidRequirements`] if the envelope is invalid.
pub fn mark_required(task: &mut Task, required: &PaymentRequired) -> Result<(), ProtocolError> {
    required.validate()?;
    let current = metadata::read_status(&task.metadata).ok().flatten();
    match current {
        None | Some(PaymentStatus::Required) => {}
        from => {
            return Err(InvalidTransitionError::new("mark_required", from).into());
        }
    }
    metadata::write_required(&mut task.metadata, required);
    metadata::clear_payload(&mut task.metadata);
    metadata::clear_error_code(&mut task.metadata);
    metadata::write_status(&mut task.metadata, PaymentStatus::Required);
    tracing::debug!(task_id = %task.id, "payment required");
    Ok(())
}

/// Records a submitted payload and moves to `payment-submitted`.
///
/// The stored requirement is retained: the merchant re-validates the
/// payload against the exact requirement it was offered, not just
/// scheme/network.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidTransition`] unless the task is in
/// `payment-required`.
pub fn mark_submitted(task: &mut Task, payload: &PaymentPayload) -> Result<(), ProtocolError> {
    expect_status(task, PaymentStatus::Required, "mark_submitted")?;
    metadata::write_payload(&mut task.metadata, payload);
    metadata::write_status(&mut task.metadata, PaymentStatus::Submitted);
    tracing::debug!(task_id = %task.id, scheme = %payload.scheme, network = %payload.network, "payment submitted");
    Ok(())
}

/// Declines an open payment requirement. Terminal.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidTransition`] unless the task is in
/// `payment-required`.
pub fn mark_rejected(task: &mut Task) -> Result<(), ProtocolError> {
    expect_status(task, PaymentStatus::Required, "mark_rejected")?;
    metadata::write_status(&mut task.metadata, PaymentStatus::Rejected);
    tracing::debug!(task_id = %task.id, "payment rejected");
    Ok(())
}

/// Marks that verification/settlement has been dispatched.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidTransition`] unless the task is in
/// `payment-submitted`.
pub fn mark_pending(task: &mut Task) -> Result<(), ProtocolError> {
    expect_status(task, PaymentStatus::Submitted, "mark_pending")?;
    metadata::write_status(&mut task.metadata, PaymentStatus::Pending);
    Ok(())
}

/// Marks that the facilitator verified the payment authorization.
///
/// Verify and settle are modeled as separate states; there is no fused
/// submitted-to-verified shortcut.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidTransition`] unless the task is in
/// `payment-pending`.
pub fn mark_verified(task: &mut Task) -> Result<(), ProtocolError> {
    expect_status(task, PaymentStatus::Pending, "mark_verified")?;
    metadata::write_status(&mut task.metadata, PaymentStatus::Verified);
    Ok(())
}

/// Records a successful settlement. Terminal `payment-completed`.
///
/// Appends the result to the receipt history and clears the spent
/// payload and requirement.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidTransition`] unless the task is in
/// `payment-verified` and `result` is a success.
pub fn record_success(task: &mut Task, result: &SettleResponse) -> Result<(), ProtocolError> {
    let current = expect_status(task, PaymentStatus::Verified, "record_success")?;
    if !result.is_success() {
        return Err(InvalidTransitionError::new("record_success", Some(current)).into());
    }
    metadata::append_receipt(&mut task.metadata, result);
    metadata::clear_payload(&mut task.metadata);
    metadata::clear_required(&mut task.metadata);
    metadata::write_status(&mut task.metadata, PaymentStatus::Completed);
    tracing::info!(task_id = %task.id, network = %result.network(), "payment completed");
    Ok(())
}

/// Records a failed verification or settlement. Terminal `payment-failed`.
///
/// Appends the result to the receipt history and records the error code.
/// The payload is cleared; the requirement is retained for audit.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidTransition`] unless the task is in
/// `payment-pending` or `payment-verified` and `result` is a failure.
pub fn record_failure(
    task: &mut Task,
    code: ErrorCode,
    result: &SettleResponse,
) -> Result<(), ProtocolError> {
    let current = metadata::read_status(&task.metadata)?;
    let from = match current {
        Some(state @ (PaymentStatus::Pending | PaymentStatus::Verified)) => state,
        from => return Err(InvalidTransitionError::new("record_failure", from).into()),
    };
    if result.is_success() {
        return Err(InvalidTransitionError::new("record_failure", Some(from)).into());
    }
    metadata::append_receipt(&mut task.metadata, result);
    metadata::write_error_code(&mut task.metadata, code);
    metadata::clear_payload(&mut task.metadata);
    metadata::write_status(&mut task.metadata, PaymentStatus::Failed);
    tracing::info!(task_id = %task.id, code = %code, "payment failed");
    Ok(())
}

/// Checks the task is exactly in `expected`, returning the state.
fn expect_status(
    task: &Task,
    expected: PaymentStatus,
    operation: &'static str,
) -> Result<PaymentStatus, ProtocolError> {
    let current = metadata::read_status(&task.metadata)?;
    match current {
        Some(state) if state == expected => Ok(state),
        from => Err(InvalidTransitionError::new(operation, from).into()),
    }
}
