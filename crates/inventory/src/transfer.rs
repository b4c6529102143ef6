use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ProductId, UserId};
use stockflow_events::Event;

use crate::stock::{BatchId, Scope, StockKey};

/// Stable event type tags for transfer events.
pub mod event_types {
    pub const TRANSFER_REQUESTED: &str = "TRANSFER_REQUESTED";
    pub const TRANSFER_APPROVED: &str = "TRANSFER_APPROVED";
    pub const TRANSFER_REJECTED: &str = "TRANSFER_REJECTED";
    pub const TRANSFER_CANCELLED: &str = "TRANSFER_CANCELLED";
    pub const TRANSFER_COMPLETED: &str = "TRANSFER_COMPLETED";
}

/// Stock transfer identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub AggregateId);

impl TransferId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for TransferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferType {
    IntraTenant,
    CrossTenant,
}

/// Closed lifecycle of a transfer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

/// Workflow operations that move a transfer between statuses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferAction {
    Approve,
    Reject,
    Cancel,
    Complete,
}

impl TransferAction {
    pub const ALL: [TransferAction; 4] = [
        TransferAction::Approve,
        TransferAction::Reject,
        TransferAction::Cancel,
        TransferAction::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferAction::Approve => "approve",
            TransferAction::Reject => "reject",
            TransferAction::Cancel => "cancel",
            TransferAction::Complete => "complete",
        }
    }
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 5] = [
        TransferStatus::Pending,
        TransferStatus::Approved,
        TransferStatus::Rejected,
        TransferStatus::Cancelled,
        TransferStatus::Completed,
    ];

    /// The transition table. `None` means the action is illegal from `self`.
    ///
    /// ```text
    /// pending  --approve--> approved --complete--> completed
    /// pending  --reject---> rejected
    /// pending  --cancel---> cancelled
    /// approved --cancel---> cancelled
    /// ```
    pub fn next(self, action: TransferAction) -> Option<TransferStatus> {
        use TransferAction::*;
        use TransferStatus::*;

        match (self, action) {
            (Pending, Approve) => Some(Approved),
            (Pending, Reject) => Some(Rejected),
            (Pending, Cancel) => Some(Cancelled),
            (Approved, Cancel) => Some(Cancelled),
            (Approved, Complete) => Some(Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Rejected | TransferStatus::Cancelled | TransferStatus::Completed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::Rejected => "rejected",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Completed => "completed",
        }
    }
}

impl core::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes fixed at request time. Never mutated afterwards; every transfer
/// event carries a copy so subscribers never have to read the record back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDetails {
    pub transfer_id: TransferId,
    pub transfer_type: TransferType,
    pub source: Scope,
    pub destination: Scope,
    pub product_id: ProductId,
    pub batch: Option<BatchId>,
    pub quantity: i64,
    pub requested_by: UserId,
    pub notes: Option<String>,
}

impl TransferDetails {
    pub fn source_key(&self) -> StockKey {
        StockKey::at(self.source, self.product_id, self.batch.clone())
    }

    pub fn destination_key(&self) -> StockKey {
        StockKey::at(self.destination, self.product_id, self.batch.clone())
    }
}

/// Aggregate root: StockTransfer.
///
/// Created by [`StockTransfer::request`], then only moved through the
/// transition table by [`TransferCommand`]s. Terminal transfers are kept for
/// audit, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransfer {
    details: TransferDetails,
    status: TransferStatus,
    approved_by: Option<UserId>,
    status_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
}

impl StockTransfer {
    pub fn id_typed(&self) -> TransferId {
        self.details.transfer_id
    }

    pub fn details(&self) -> &TransferDetails {
        &self.details
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn quantity(&self) -> i64 {
        self.details.quantity
    }

    pub fn transfer_type(&self) -> TransferType {
        self.details.transfer_type
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    /// Rejection or cancellation reason, once terminal.
    pub fn status_reason(&self) -> Option<&str> {
        self.status_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Validate a request and create the transfer in `pending`.
    ///
    /// The inter-tenant connection check needs an external directory and is
    /// done by the caller before this runs.
    pub fn request(cmd: &RequestTransfer) -> Result<(Self, TransferEvent), DomainError> {
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be a positive integer"));
        }
        if cmd.source == cmd.destination {
            return Err(DomainError::validation(
                "source and destination scope must differ",
            ));
        }
        match cmd.transfer_type {
            TransferType::CrossTenant if cmd.source.tenant_id == cmd.destination.tenant_id => {
                return Err(DomainError::validation(
                    "cross-tenant transfer requires a different destination tenant",
                ));
            }
            TransferType::IntraTenant if cmd.source.tenant_id != cmd.destination.tenant_id => {
                return Err(DomainError::validation(
                    "intra-tenant transfer cannot leave the source tenant",
                ));
            }
            _ => {}
        }
        if let Some(batch) = &cmd.batch {
            if batch.as_str().trim().is_empty() {
                return Err(DomainError::validation("batch cannot be blank"));
            }
        }

        let details = TransferDetails {
            transfer_id: cmd.transfer_id,
            transfer_type: cmd.transfer_type,
            source: cmd.source,
            destination: cmd.destination,
            product_id: cmd.product_id,
            batch: cmd.batch.clone(),
            quantity: cmd.quantity,
            requested_by: cmd.requested_by,
            notes: cmd
                .notes
                .as_ref()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
        };

        let transfer = Self {
            details: details.clone(),
            status: TransferStatus::Pending,
            approved_by: None,
            status_reason: None,
            created_at: cmd.occurred_at,
            updated_at: cmd.occurred_at,
            approved_at: None,
            completed_at: None,
            version: 1,
        };

        let event = TransferEvent::TransferRequested(TransferRequested {
            details,
            occurred_at: cmd.occurred_at,
        });

        Ok((transfer, event))
    }
}

impl AggregateRoot for StockTransfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.details.transfer_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RequestTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTransfer {
    pub transfer_id: TransferId,
    pub transfer_type: TransferType,
    pub source: Scope,
    pub destination: Scope,
    pub product_id: ProductId,
    pub batch: Option<BatchId>,
    pub quantity: i64,
    pub requested_by: UserId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveTransfer {
    pub transfer_id: TransferId,
    pub approver_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectTransfer {
    pub transfer_id: TransferId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransfer {
    pub transfer_id: TransferId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteTransfer.
///
/// Only the status change; the ledger effects are applied by infra before the
/// completed status is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteTransfer {
    pub transfer_id: TransferId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    Approve(ApproveTransfer),
    Reject(RejectTransfer),
    Cancel(CancelTransfer),
    Complete(CompleteTransfer),
}

impl TransferCommand {
    pub fn transfer_id(&self) -> TransferId {
        match self {
            TransferCommand::Approve(c) => c.transfer_id,
            TransferCommand::Reject(c) => c.transfer_id,
            TransferCommand::Cancel(c) => c.transfer_id,
            TransferCommand::Complete(c) => c.transfer_id,
        }
    }

    pub fn action(&self) -> TransferAction {
        match self {
            TransferCommand::Approve(_) => TransferAction::Approve,
            TransferCommand::Reject(_) => TransferAction::Reject,
            TransferCommand::Cancel(_) => TransferAction::Cancel,
            TransferCommand::Complete(_) => TransferAction::Complete,
        }
    }
}

/// Event: TransferRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequested {
    pub details: TransferDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferApproved {
    pub details: TransferDetails,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRejected {
    pub details: TransferDetails,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub details: TransferDetails,
    pub previous_status: TransferStatus,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCompleted {
    pub details: TransferDetails,
    pub approved_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    TransferRequested(TransferRequested),
    TransferApproved(TransferApproved),
    TransferRejected(TransferRejected),
    TransferCancelled(TransferCancelled),
    TransferCompleted(TransferCompleted),
}

impl TransferEvent {
    pub fn details(&self) -> &TransferDetails {
        match self {
            TransferEvent::TransferRequested(e) => &e.details,
            TransferEvent::TransferApproved(e) => &e.details,
            TransferEvent::TransferRejected(e) => &e.details,
            TransferEvent::TransferCancelled(e) => &e.details,
            TransferEvent::TransferCompleted(e) => &e.details,
        }
    }
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferRequested(_) => event_types::TRANSFER_REQUESTED,
            TransferEvent::TransferApproved(_) => event_types::TRANSFER_APPROVED,
            TransferEvent::TransferRejected(_) => event_types::TRANSFER_REJECTED,
            TransferEvent::TransferCancelled(_) => event_types::TRANSFER_CANCELLED,
            TransferEvent::TransferCompleted(_) => event_types::TRANSFER_COMPLETED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::TransferRequested(e) => e.occurred_at,
            TransferEvent::TransferApproved(e) => e.occurred_at,
            TransferEvent::TransferRejected(e) => e.occurred_at,
            TransferEvent::TransferCancelled(e) => e.occurred_at,
            TransferEvent::TransferCompleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockTransfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::TransferRequested(_) => {}
            TransferEvent::TransferApproved(e) => {
                self.status = TransferStatus::Approved;
                self.approved_by = Some(e.approved_by);
                self.approved_at = Some(e.occurred_at);
            }
            TransferEvent::TransferRejected(e) => {
                self.status = TransferStatus::Rejected;
                self.status_reason = Some(e.reason.clone());
            }
            TransferEvent::TransferCancelled(e) => {
                self.status = TransferStatus::Cancelled;
                self.status_reason = Some(e.reason.clone());
            }
            TransferEvent::TransferCompleted(e) => {
                self.status = TransferStatus::Completed;
                self.completed_at = Some(e.occurred_at);
            }
        }

        self.updated_at = event.occurred_at();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if command.transfer_id() != self.details.transfer_id {
            return Err(DomainError::invariant("transfer_id mismatch"));
        }
        self.ensure_transition(command.action())?;

        let details = self.details.clone();
        let event = match command {
            TransferCommand::Approve(cmd) => TransferEvent::TransferApproved(TransferApproved {
                details,
                approved_by: cmd.approver_id,
                occurred_at: cmd.occurred_at,
            }),
            TransferCommand::Reject(cmd) => TransferEvent::TransferRejected(TransferRejected {
                details,
                reason: required_reason(&cmd.reason)?,
                occurred_at: cmd.occurred_at,
            }),
            TransferCommand::Cancel(cmd) => TransferEvent::TransferCancelled(TransferCancelled {
                details,
                previous_status: self.status,
                reason: required_reason(&cmd.reason)?,
                occurred_at: cmd.occurred_at,
            }),
            TransferCommand::Complete(cmd) => TransferEvent::TransferCompleted(TransferCompleted {
                details,
                approved_by: self.approved_by,
                occurred_at: cmd.occurred_at,
            }),
        };

        Ok(vec![event])
    }
}

impl StockTransfer {
    /// Fails with `InvalidStateTransition` unless the table allows `action`.
    pub fn ensure_transition(&self, action: TransferAction) -> Result<TransferStatus, DomainError> {
        self.status
            .next(action)
            .ok_or_else(|| DomainError::invalid_transition(self.status, action.as_str()))
    }

    /// Hand back a completion whose stock legs could not be written:
    /// `completed` → `approved`, one version later, no event.
    ///
    /// Legs that did land stay in the ledger; the next completion skips them.
    pub fn release_completion(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != TransferStatus::Completed {
            return Err(DomainError::invalid_transition(self.status, "release"));
        }
        self.status = TransferStatus::Approved;
        self.completed_at = None;
        self.updated_at = at;
        self.version += 1;
        Ok(())
    }
}

fn required_reason(reason: &str) -> Result<String, DomainError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(DomainError::validation("reason cannot be empty"));
    }
    Ok(reason.to_string())
}
