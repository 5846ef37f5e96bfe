//! Merchant-side payment orchestration.
//!
//! The merchant owns the authoritative copy of each task's payment state.
//! It issues payment requirements, correlates incoming submissions back to
//! their tasks, and drives verification and settlement through an injected
//! [`Facilitator`]. The orchestrator holds no per-task state of its own;
//! everything is read from and written to the task's metadata through the
//! state machine in [`crate::tracker`].

use std::sync::Arc;

use serde_json::Value;

use crate::a2a::{Message, Task, TaskId};
use crate::error::{
    CorruptStateError, MissingRequirementError, ProtocolError, SchemeMismatchError,
    UnresolvableCorrelationError,
};
use crate::facilitator::{Facilitator, FacilitatorError};
use crate::metadata;
use crate::networks;
use crate::proto::{
    DEFAULT_MAX_TIMEOUT_SECONDS, ErrorCode, Network, PaymentPayload, PaymentRequired,
    PaymentRequirements, SettleResponse, VerifyResponse,
};
use crate::status::PaymentStatus;
use crate::tracker;

/// Errors surfaced by merchant orchestration.
#[derive(Debug, thiserror::Error)]
pub enum MerchantError {
    /// A protocol invariant was violated.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The facilitator was unreachable; the payment is still open and the
    /// call may be retried (or resolved with
    /// [`MerchantOrchestrator::fail_payment`]).
    #[error(transparent)]
    Facilitator(#[from] FacilitatorError),
}

impl From<CorruptStateError> for MerchantError {
    fn from(e: CorruptStateError) -> Self {
        Self::Protocol(e.into())
    }
}

impl From<MissingRequirementError> for MerchantError {
    fn from(e: MissingRequirementError) -> Self {
        Self::Protocol(e.into())
    }
}

impl From<SchemeMismatchError> for MerchantError {
    fn from(e: SchemeMismatchError) -> Self {
        Self::Protocol(e.into())
    }
}

/// What a merchant service handler produced for one request.
///
/// Handlers return `Ready` when the work is done (payment either not
/// needed or already settled) and `PaymentRequired` to pause the task
/// until the client pays.
#[derive(Debug)]
pub enum ServiceOutcome<T> {
    /// The request was served.
    Ready(T),
    /// The request needs payment before it can be served.
    PaymentRequired(Vec<PaymentRequirements>),
}

impl<T> ServiceOutcome<T> {
    /// Returns the result if the request was served.
    #[must_use]
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::PaymentRequired(_) => None,
        }
    }
}

/// How a cancellation request was resolved against the payment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDisposition {
    /// The payment was abandoned; no funds moved and none will.
    Abandoned,
    /// Verification or settlement is in flight; the outcome of that call
    /// decides the final state and must be awaited before the task closes.
    AwaitSettlement,
    /// The payment already reached a terminal state; cancellation changes
    /// nothing.
    AlreadyResolved,
}

/// Declarative description of one payment option for a resource.
///
/// Networks with a well-known settlement asset (see [`crate::networks`])
/// may omit `asset`.
#[derive(Debug, Clone)]
pub struct RequirementsConfig {
    /// Amount in the asset's smallest unit.
    pub price: String,
    /// Recipient address.
    pub pay_to: String,
    /// Network to settle on.
    pub network: Network,
    /// Payment scheme, `"exact"` unless overridden.
    pub scheme: String,
    /// Identifier of the thing being purchased.
    pub resource: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Explicit asset address; defaults from the network when omitted.
    pub asset: Option<String>,
    /// Validity window in seconds.
    pub max_timeout_seconds: u64,
    /// Scheme-specific extra data.
    pub extra: Option<Value>,
}

impl RequirementsConfig {
    /// Starts a config with the mandatory fields and protocol defaults.
    #[must_use]
    pub fn new(
        price: impl Into<String>,
        pay_to: impl Into<String>,
        network: impl Into<Network>,
    ) -> Self {
        Self {
            price: price.into(),
            pay_to: pay_to.into(),
            network: network.into(),
            scheme: "exact".to_owned(),
            resource: None,
            description: None,
            asset: None,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            extra: None,
        }
    }

    /// Names the resource being sold.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Overrides the settlement asset.
    #[must_use]
    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = Some(asset.into());
        self
    }

    /// Builds validated payment requirements.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRequirements`] if no asset was
    /// given and the network has no default, or if any structural
    /// invariant fails.
    pub fn build(self) -> Result<PaymentRequirements, ProtocolError> {
        let asset = match self.asset {
            Some(asset) => asset,
            None => networks::default_asset(&self.network)
                .ok_or_else(|| {
                    ProtocolError::invalid_requirements(format!(
                        "network '{}' has no default asset; set one explicitly",
                        self.network
                    ))
                })?
                .to_owned(),
        };
        let requirements = PaymentRequirements {
            scheme: self.scheme,
            network: self.network,
            asset,
            pay_to: self.pay_to,
            max_amount: self.price,
            resource: self.resource,
            description: self.description,
            max_timeout_seconds: self.max_timeout_seconds,
            extra: self.extra.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        };
        requirements.validate()?;
        Ok(requirements)
    }
}

/// Pulls the task id and payment payload out of a submission message.
///
/// # Errors
///
/// Returns [`UnresolvableCorrelationError`] if the message names no task
/// or carries no decodable payload.
pub fn extract_submission(
    message: &Message,
) -> Result<(TaskId, PaymentPayload), UnresolvableCorrelationError> {
    let task_id = message
        .task_id
        .clone()
        .ok_or_else(|| UnresolvableCorrelationError::new("submission message names no task"))?;
    let payload = metadata::read_payload(&message.metadata)
        .map_err(|e| UnresolvableCorrelationError::new(e.to_string()))?
        .ok_or_else(|| {
            UnresolvableCorrelationError::new(format!(
                "submission for task '{task_id}' carries no payment payload"
            ))
        })?;
    Ok((task_id, payload))
}

/// Resolves a submission message against the task store's lookup result.
///
/// The caller looks the task up by the message's task id and passes
/// whatever it found; `None` means the id is unknown. A resolved task
/// must still be awaiting payment: a submission against any other state
/// is as unresolvable as an unknown id.
///
/// # Errors
///
/// Returns [`ProtocolError::UnresolvableCorrelation`] if the message is
/// not a well-formed submission, the task is unknown, or the task is not
/// in `payment-required`.
pub fn correlate_submission<'t>(
    message: &Message,
    task: Option<&'t mut Task>,
) -> Result<(&'t mut Task, PaymentPayload), ProtocolError> {
    let (task_id, payload) = extract_submission(message)?;
    let task = task.ok_or_else(|| {
        UnresolvableCorrelationError::new(format!("no open task with id '{task_id}'"))
    })?;
    if task.id != task_id {
        return Err(UnresolvableCorrelationError::new(format!(
            "submission names task '{task_id}' but was resolved to task '{}'",
            task.id
        ))
        .into());
    }
    match metadata::read_status(&task.metadata)? {
        Some(PaymentStatus::Required) => Ok((task, payload)),
        state => Err(UnresolvableCorrelationError::new(format!(
            "task '{task_id}' is not awaiting payment (state: {})",
            state.map_or("none", |s| s.as_str())
        ))
        .into()),
    }
}

/// Drives the merchant side of the payment protocol.
///
/// One instance serves any number of tasks concurrently; the facilitator
/// is shared and all per-payment state lives on the tasks themselves.
pub struct MerchantOrchestrator {
    facilitator: Arc<dyn Facilitator>,
}

impl std::fmt::Debug for MerchantOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantOrchestrator").finish_non_exhaustive()
    }
}

impl MerchantOrchestrator {
    /// Creates an orchestrator around a facilitator.
    #[must_use]
    pub fn new(facilitator: Arc<dyn Facilitator>) -> Self {
        Self { facilitator }
    }

    /// Offers payment options on a task and pauses it in
    /// `payment-required`.
    ///
    /// # Errors
    ///
    /// Returns [`MerchantError::Protocol`] if the options are invalid or
    /// the task is past the point of requesting payment.
    pub fn request_payment(
        &self,
        task: &mut Task,
        accepts: Vec<PaymentRequirements>,
    ) -> Result<PaymentRequired, MerchantError> {
        let required = PaymentRequired::new(accepts);
        tracker::mark_required(task, &required)?;
        Ok(required)
    }

    /// Verifies and settles a submitted payment, recording the outcome on
    /// the task.
    ///
    /// The payload must match exactly one of the requirements stored on
    /// the task; that check happens before any state change or
    /// facilitator call. Facilitator rejections and timeouts resolve the
    /// payment to `payment-failed` and are returned as the receipt, not
    /// as errors. Only a transport failure is an `Err`: the task is then
    /// left in `payment-pending` or `payment-verified` and the caller
    /// decides between retrying and [`Self::fail_payment`]. This method
    /// never leaves the task mid-settlement on an `Ok` return.
    ///
    /// # Errors
    ///
    /// Returns [`MerchantError::Protocol`] for contract violations
    /// (no open requirement, ambiguous or unmatched payload) and
    /// [`MerchantError::Facilitator`] for retriable transport failures.
    pub async fn handle_submission(
        &self,
        task: &mut Task,
        payload: &PaymentPayload,
    ) -> Result<SettleResponse, MerchantError> {
        let current = tracker::status(task)?;
        if current != Some(PaymentStatus::Required) {
            return Err(MissingRequirementError::new(current).into());
        }
        let required = metadata::read_required(&task.metadata)?
            .ok_or_else(|| MissingRequirementError::new(current))?;

        let matched: Vec<&PaymentRequirements> = required
            .accepts
            .iter()
            .filter(|requirements| payload.matches(requirements))
            .collect();
        let &[requirements] = matched.as_slice() else {
            return Err(SchemeMismatchError::new(
                payload.scheme.clone(),
                payload.network.clone(),
                matched.len(),
            )
            .into());
        };
        let requirements = requirements.clone();

        tracker::mark_submitted(task, payload)?;
        tracker::mark_pending(task)?;

        let verdict = match self.facilitator.verify(payload, &requirements).await {
            Ok(verdict) => verdict,
            Err(FacilitatorError::Timeout(elapsed)) => {
                tracing::warn!(task_id = %task.id, ?elapsed, "verification timed out");
                return self
                    .resolve_failure(
                        task,
                        ErrorCode::ExpiredPayment,
                        "verification timed out",
                        &requirements.network,
                    )
                    .map_err(Into::into);
            }
            Err(transport) => return Err(transport.into()),
        };
        if let VerifyResponse::Invalid { reason, payer } = verdict {
            let code = ErrorCode::from_reason(&reason, ErrorCode::InvalidSignature);
            let receipt = SettleResponse::Failed {
                error_reason: reason,
                network: requirements.network.clone(),
                payer,
            };
            tracker::record_failure(task, code, &receipt)?;
            return Ok(receipt);
        }
        tracker::mark_verified(task)?;

        let receipt = match self.facilitator.settle(payload, &requirements).await {
            Ok(receipt) => receipt,
            Err(FacilitatorError::Timeout(elapsed)) => {
                tracing::warn!(task_id = %task.id, ?elapsed, "settlement timed out");
                return self
                    .resolve_failure(
                        task,
                        ErrorCode::ExpiredPayment,
                        "settlement timed out",
                        &requirements.network,
                    )
                    .map_err(Into::into);
            }
            Err(transport) => return Err(transport.into()),
        };
        match &receipt {
            SettleResponse::Success { .. } => tracker::record_success(task, &receipt)?,
            SettleResponse::Failed { error_reason, .. } => {
                let code = ErrorCode::from_reason(error_reason, ErrorCode::SettlementFailed);
                tracker::record_failure(task, code, &receipt)?;
            }
        }
        Ok(receipt)
    }

    /// Resolves an open payment as failed with a synthesized receipt.
    ///
    /// For payments stuck in `payment-pending` or `payment-verified`
    /// after a transport failure the caller chose not to retry.
    ///
    /// # Errors
    ///
    /// Returns [`MerchantError::Protocol`] unless the task holds an
    /// unresolved payment.
    pub fn fail_payment(
        &self,
        task: &mut Task,
        code: ErrorCode,
        reason: impl Into<String>,
    ) -> Result<SettleResponse, MerchantError> {
        let network = submission_network(task)?;
        self.resolve_failure(task, code, reason, &network)
            .map_err(Into::into)
    }

    /// Applies a cancellation request to whatever payment state the task
    /// is in.
    ///
    /// A requirement nobody paid is withdrawn (`payment-rejected`). A
    /// submission not yet dispatched is simply dropped. Once
    /// verification or settlement is in flight, cancellation cannot
    /// retract it: the settlement outcome wins.
    ///
    /// # Errors
    ///
    /// Returns [`MerchantError::Protocol`] if the stored state is
    /// corrupt.
    pub fn handle_cancellation(&self, task: &mut Task) -> Result<CancelDisposition, MerchantError> {
        let disposition = match tracker::status(task).map_err(ProtocolError::from)? {
            None => CancelDisposition::Abandoned,
            Some(PaymentStatus::Required) => {
                tracker::mark_rejected(task)?;
                CancelDisposition::Abandoned
            }
            Some(PaymentStatus::Submitted) => CancelDisposition::Abandoned,
            Some(PaymentStatus::Pending | PaymentStatus::Verified) => {
                CancelDisposition::AwaitSettlement
            }
            Some(
                PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Rejected,
            ) => CancelDisposition::AlreadyResolved,
        };
        tracing::debug!(task_id = %task.id, ?disposition, "payment cancellation");
        Ok(disposition)
    }

    fn resolve_failure(
        &self,
        task: &mut Task,
        code: ErrorCode,
        reason: impl Into<String>,
        network: &str,
    ) -> Result<SettleResponse, ProtocolError> {
        let receipt = SettleResponse::Failed {
            error_reason: reason.into(),
            network: network.to_owned(),
            payer: None,
        };
        tracker::record_failure(task, code, &receipt)?;
        Ok(receipt)
    }
}

/// Best-effort network attribution for a synthesized failure receipt.
fn submission_network(task: &Task) -> Result<Network, CorruptStateError> {
    if let Some(payload) = metadata::read_payload(&task.metadata)? {
        return Ok(payload.network);
    }
    if let Some(required) = metadata::read_required(&task.metadata)? {
        if let Some(first) = required.accepts.first() {
            return Ok(first.network.clone());
        }
    }
    Ok("unknown".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    /// Scripted facilitator: each call consumes its queued response.
    #[derive(Default)]
    struct ScriptedFacilitator {
        verify: Mutex<Vec<Result<VerifyResponse, FacilitatorError>>>,
        settle: Mutex<Vec<Result<SettleResponse, FacilitatorError>>>,
        verify_calls: AtomicUsize,
        settle_calls: AtomicUsize,
    }

    impl ScriptedFacilitator {
        fn on_verify(self, response: Result<VerifyResponse, FacilitatorError>) -> Self {
            self.verify.lock().unwrap().push(response);
            self
        }

        fn on_settle(self, response: Result<SettleResponse, FacilitatorError>) -> Self {
            self.settle.lock().unwrap().push(response);
            self
        }
    }

    #[async_trait]
    impl Facilitator for ScriptedFacilitator {
        async fn verify(
            &self,
            _payload: &PaymentPayload,
            _requirements: &PaymentRequirements,
        ) -> Result<VerifyResponse, FacilitatorError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            self.verify.lock().unwrap().remove(0)
        }

        async fn settle(
            &self,
            _payload: &PaymentPayload,
            _requirements: &PaymentRequirements,
        ) -> Result<SettleResponse, FacilitatorError> {
            self.settle_calls.fetch_add(1, Ordering::SeqCst);
            self.settle.lock().unwrap().remove(0)
        }
    }

    fn requirements(network: &str) -> PaymentRequirements {
        RequirementsConfig::new("1000000", "0xMerchant", network)
            .with_resource("/premium")
            .build()
            .unwrap()
    }

    fn payload(network: &str) -> PaymentPayload {
        PaymentPayload {
            x402_version: 1,
            scheme: "exact".into(),
            network: network.into(),
            payload: json!({"signature": "0x00"}),
        }
    }

    fn success(tx: &str) -> SettleResponse {
        SettleResponse::Success {
            transaction: tx.into(),
            network: "base".into(),
            payer: Some("0xPayer".into()),
        }
    }

    fn orchestrator(facilitator: ScriptedFacilitator) -> (MerchantOrchestrator, Arc<ScriptedFacilitator>) {
        let facilitator = Arc::new(facilitator);
        (
            MerchantOrchestrator::new(Arc::clone(&facilitator) as Arc<dyn Facilitator>),
            facilitator,
        )
    }

    fn required_task(merchant: &MerchantOrchestrator) -> Task {
        let mut task = Task::new("task-1", "ctx-1");
        merchant
            .request_payment(&mut task, vec![requirements("base")])
            .unwrap();
        task
    }

    #[tokio::test]
    async fn submission_settles_end_to_end() {
        let (merchant, facilitator) = orchestrator(
            ScriptedFacilitator::default()
                .on_verify(Ok(VerifyResponse::valid(Some("0xPayer".into()))))
                .on_settle(Ok(success("0xabc"))),
        );
        let mut task = required_task(&merchant);

        let receipt = merchant
            .handle_submission(&mut task, &payload("base"))
            .await
            .unwrap();

        assert!(receipt.is_success());
        assert_eq!(
            tracker::status(&task).unwrap(),
            Some(PaymentStatus::Completed)
        );
        assert_eq!(facilitator.verify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(facilitator.settle_calls.load(Ordering::SeqCst), 1);
        assert_eq!(metadata::read_receipts(&task.metadata).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_verification_fails_without_settling() {
        let (merchant, facilitator) = orchestrator(
            ScriptedFacilitator::default()
                .on_verify(Ok(VerifyResponse::invalid("insufficient funds".into()))),
        );
        let mut task = required_task(&merchant);

        let receipt = merchant
            .handle_submission(&mut task, &payload("base"))
            .await
            .unwrap();

        assert!(!receipt.is_success());
        assert_eq!(tracker::status(&task).unwrap(), Some(PaymentStatus::Failed));
        assert_eq!(
            metadata::read_error_code(&task.metadata).unwrap(),
            Some(ErrorCode::InsufficientFunds)
        );
        assert_eq!(facilitator.settle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unmatched_payload_is_rejected_before_any_call() {
        let (merchant, facilitator) = orchestrator(ScriptedFacilitator::default());
        let mut task = required_task(&merchant);

        let err = merchant
            .handle_submission(&mut task, &payload("base-sepolia"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MerchantError::Protocol(ProtocolError::SchemeMismatch(ref e)) if e.matches == 0
        ));
        // No state change, no network traffic: the requirement stays open.
        assert_eq!(
            tracker::status(&task).unwrap(),
            Some(PaymentStatus::Required)
        );
        assert_eq!(facilitator.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ambiguous_match_is_rejected() {
        let (merchant, facilitator) = orchestrator(ScriptedFacilitator::default());
        let mut task = Task::new("task-1", "ctx-1");
        merchant
            .request_payment(&mut task, vec![requirements("base"), requirements("base")])
            .unwrap();

        let err = merchant
            .handle_submission(&mut task, &payload("base"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MerchantError::Protocol(ProtocolError::SchemeMismatch(ref e)) if e.matches == 2
        ));
        assert_eq!(facilitator.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn settlement_failure_records_receipt_and_code() {
        let (merchant, _) = orchestrator(
            ScriptedFacilitator::default()
                .on_verify(Ok(VerifyResponse::valid(None)))
                .on_settle(Ok(SettleResponse::Failed {
                    error_reason: "tx reverted".into(),
                    network: "base".into(),
                    payer: None,
                })),
        );
        let mut task = required_task(&merchant);

        let receipt = merchant
            .handle_submission(&mut task, &payload("base"))
            .await
            .unwrap();

        assert!(!receipt.is_success());
        assert_eq!(tracker::status(&task).unwrap(), Some(PaymentStatus::Failed));
        assert_eq!(
            metadata::read_error_code(&task.metadata).unwrap(),
            Some(ErrorCode::SettlementFailed)
        );
        // The requirement survives for audit even after failure.
        assert!(metadata::read_required(&task.metadata).unwrap().is_some());
    }

    #[tokio::test]
    async fn verify_timeout_expires_the_payment() {
        let (merchant, facilitator) = orchestrator(
            ScriptedFacilitator::default()
                .on_verify(Err(FacilitatorError::Timeout(Duration::from_secs(600)))),
        );
        let mut task = required_task(&merchant);

        let receipt = merchant
            .handle_submission(&mut task, &payload("base"))
            .await
            .unwrap();

        assert!(!receipt.is_success());
        assert_eq!(tracker::status(&task).unwrap(), Some(PaymentStatus::Failed));
        assert_eq!(
            metadata::read_error_code(&task.metadata).unwrap(),
            Some(ErrorCode::ExpiredPayment)
        );
        assert_eq!(facilitator.settle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transport_failure_leaves_the_payment_open() {
        let (merchant, _) = orchestrator(
            ScriptedFacilitator::default()
                .on_verify(Ok(VerifyResponse::valid(None)))
                .on_settle(Err(FacilitatorError::transport(std::io::Error::other(
                    "connection refused",
                )))),
        );
        let mut task = required_task(&merchant);

        let err = merchant
            .handle_submission(&mut task, &payload("base"))
            .await
            .unwrap_err();

        assert!(matches!(err, MerchantError::Facilitator(ref e) if e.is_retriable()));
        assert_eq!(
            tracker::status(&task).unwrap(),
            Some(PaymentStatus::Verified)
        );

        // The caller can give up and resolve the payment explicitly.
        let receipt = merchant
            .fail_payment(&mut task, ErrorCode::SettlementFailed, "gave up retrying")
            .unwrap();
        assert!(!receipt.is_success());
        assert_eq!(receipt.network(), "base");
        assert_eq!(tracker::status(&task).unwrap(), Some(PaymentStatus::Failed));
    }

    #[tokio::test]
    async fn submission_without_open_requirement_is_refused() {
        let (merchant, facilitator) = orchestrator(ScriptedFacilitator::default());
        let mut task = Task::new("task-1", "ctx-1");

        let err = merchant
            .handle_submission(&mut task, &payload("base"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MerchantError::Protocol(ProtocolError::MissingRequirement(_))
        ));
        assert_eq!(facilitator.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancellation_dispositions() {
        let (merchant, _) = orchestrator(ScriptedFacilitator::default());

        // Never engaged: nothing to withdraw.
        let mut task = Task::new("task-1", "ctx-1");
        assert_eq!(
            merchant.handle_cancellation(&mut task).unwrap(),
            CancelDisposition::Abandoned
        );

        // Open requirement is withdrawn as a rejection.
        let mut task = required_task(&merchant);
        assert_eq!(
            merchant.handle_cancellation(&mut task).unwrap(),
            CancelDisposition::Abandoned
        );
        assert_eq!(
            tracker::status(&task).unwrap(),
            Some(PaymentStatus::Rejected)
        );

        // Terminal state: cancellation is a no-op.
        assert_eq!(
            merchant.handle_cancellation(&mut task).unwrap(),
            CancelDisposition::AlreadyResolved
        );

        // Mid-settlement: the in-flight call decides.
        let mut task = required_task(&merchant);
        tracker::mark_submitted(&mut task, &payload("base")).unwrap();
        tracker::mark_pending(&mut task).unwrap();
        assert_eq!(
            merchant.handle_cancellation(&mut task).unwrap(),
            CancelDisposition::AwaitSettlement
        );
    }

    #[test]
    fn correlation_requires_task_payload_and_open_requirement() {
        let (merchant, _) = orchestrator(ScriptedFacilitator::default());
        let mut task = required_task(&merchant);
        let mut message = Message::for_task("msg-1", &task);

        // No payload on the message.
        assert!(extract_submission(&message).is_err());

        metadata::write_payload(&mut message.metadata, &payload("base"));
        let (task_id, extracted) = extract_submission(&message).unwrap();
        assert_eq!(task_id, "task-1");
        assert_eq!(extracted.network, "base");

        // Unknown task id.
        assert!(correlate_submission(&message, None).is_err());

        // Lookup returned the wrong task.
        let mut other = Task::new("task-2", "ctx-1");
        assert!(correlate_submission(&message, Some(&mut other)).is_err());

        // Message that names no task at all.
        let mut floating = Message::for_task("msg-2", &task);
        floating.task_id = None;
        metadata::write_payload(&mut floating.metadata, &payload("base"));
        assert!(extract_submission(&floating).is_err());

        // The happy path resolves to the requirement-bearing task.
        let (resolved, extracted) = correlate_submission(&message, Some(&mut task)).unwrap();
        assert_eq!(resolved.id, "task-1");
        assert_eq!(extracted.scheme, "exact");

        // A task that is no longer awaiting payment does not correlate.
        tracker::mark_rejected(&mut task).unwrap();
        let err = correlate_submission(&message, Some(&mut task)).unwrap_err();
        assert!(matches!(err, ProtocolError::UnresolvableCorrelation(_)));
    }

    #[test]
    fn requirements_config_defaults_known_assets() {
        let built = RequirementsConfig::new("1000000", "0xMerchant", "base-sepolia")
            .build()
            .unwrap();
        assert_eq!(built.asset, "0x036CbD53842c5426634e7929541eC2318f3dCF7e");
        assert_eq!(built.scheme, "exact");
        assert_eq!(built.max_timeout_seconds, DEFAULT_MAX_TIMEOUT_SECONDS);

        // Unknown network with no explicit asset cannot be built.
        let err = RequirementsConfig::new("1000000", "0xMerchant", "testnet-42")
            .build()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequirements(_)));

        // An explicit asset makes any network valid.
        RequirementsConfig::new("1000000", "0xMerchant", "testnet-42")
            .with_asset("0xToken")
            .build()
            .unwrap();
    }

    /// Wallet echoing the requirement it is asked to sign.
    struct EchoWallet;

    #[async_trait]
    impl crate::client::Wallet for EchoWallet {
        async fn sign(
            &self,
            requirements: &PaymentRequirements,
        ) -> Result<PaymentPayload, crate::client::WalletError> {
            Ok(PaymentPayload {
                x402_version: 1,
                scheme: requirements.scheme.clone(),
                network: requirements.network.clone(),
                payload: json!({"signature": "0xsigned"}),
            })
        }
    }

    #[tokio::test]
    async fn client_and_merchant_compose_end_to_end() {
        let (merchant, _) = orchestrator(
            ScriptedFacilitator::default()
                .on_verify(Ok(VerifyResponse::valid(Some("0xPayer".into()))))
                .on_settle(Ok(success("0xabc"))),
        );
        let client = crate::client::ClientOrchestrator::new(Arc::new(EchoWallet));

        // Merchant pauses the task; the client works on its own copy.
        let mut merchant_task = Task::new("task-1", "ctx-1");
        let required = merchant
            .request_payment(&mut merchant_task, vec![requirements("base")])
            .unwrap();
        let mut client_task = merchant_task.clone();

        let submission = client
            .submit_payment(&mut client_task, &required, "msg-1")
            .await
            .unwrap();

        // The submission correlates back to the merchant's copy.
        let (task, payload) =
            correlate_submission(&submission, Some(&mut merchant_task)).unwrap();
        let receipt = merchant.handle_submission(task, &payload).await.unwrap();

        assert!(receipt.is_success());
        assert_eq!(
            tracker::status(&merchant_task).unwrap(),
            Some(PaymentStatus::Completed)
        );
    }

    #[tokio::test]
    async fn client_rejection_closes_the_merchant_task() {
        let (merchant, facilitator) = orchestrator(ScriptedFacilitator::default());
        let client = crate::client::ClientOrchestrator::new(Arc::new(EchoWallet));

        let mut merchant_task = Task::new("task-1", "ctx-1");
        merchant
            .request_payment(&mut merchant_task, vec![requirements("base")])
            .unwrap();
        let mut client_task = merchant_task.clone();

        let rejection = client
            .reject_payment(&mut client_task, "msg-1", "no wallet on this network")
            .unwrap();
        assert_eq!(
            metadata::read_status(&rejection.metadata).unwrap(),
            Some(PaymentStatus::Rejected)
        );
        assert_eq!(
            metadata::read_rejection_reason(&rejection.metadata).unwrap(),
            Some("no wallet on this network".to_owned())
        );

        // Merchant mirrors the rejection; nothing was dispatched.
        tracker::mark_rejected(&mut merchant_task).unwrap();
        assert_eq!(
            tracker::status(&merchant_task).unwrap(),
            Some(PaymentStatus::Rejected)
        );
        assert_eq!(facilitator.verify_calls.load(Ordering::SeqCst), 0);
        assert_eq!(facilitator.settle_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_outcome_drives_payment_request() {
        // A service handler decides whether work needs payment; the
        // orchestrator reacts to the outcome.
        fn premium_report(paid: bool) -> ServiceOutcome<String> {
            if paid {
                ServiceOutcome::Ready("report".to_owned())
            } else {
                ServiceOutcome::PaymentRequired(vec![requirements("base")])
            }
        }

        let (merchant, _) = orchestrator(ScriptedFacilitator::default());
        let mut task = Task::new("task-1", "ctx-1");

        match premium_report(false) {
            ServiceOutcome::Ready(_) => unreachable!("unpaid request must not be served"),
            ServiceOutcome::PaymentRequired(accepts) => {
                merchant.request_payment(&mut task, accepts).unwrap();
            }
        }
        assert_eq!(
            tracker::status(&task).unwrap(),
            Some(PaymentStatus::Required)
        );
        assert!(metadata::read_required(&task.metadata).unwrap().is_some());

        // Once paid, the handler's result comes straight through.
        assert_eq!(premium_report(true).ready(), Some("report".to_owned()));
        assert!(
            ServiceOutcome::<String>::PaymentRequired(vec![requirements("base")])
                .ready()
                .is_none()
        );
    }
}
