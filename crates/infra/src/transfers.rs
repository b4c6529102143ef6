//! Stock transfer workflow.
//!
//! Drives a [`StockTransfer`] through its lifecycle against the stores:
//! every transition is a status-checked write, completion applies the
//! inventory legs, and each committed change publishes exactly one event.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use stockflow_core::aggregate::execute;
use stockflow_core::{DomainError, TenantId, UserId};
use stockflow_events::EventBus;
use stockflow_inventory::{
    ApproveTransfer, CancelTransfer, CompleteTransfer, Movement, RejectTransfer, RequestTransfer,
    SourceRef, StockKey, StockTransfer, TransferAction, TransferCommand, TransferDetails,
    TransferEvent, TransferId, TransferLeg, TransferStatus, TransferType,
};

use crate::connections::TenantDirectory;
use crate::domain_event::{StockflowEnvelope, publish_committed, transfer_envelope};
use crate::store::{InventoryStore, IsConflict, StoreError, TransferStore, retry_on_conflict};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransferError {
    /// The domain error behind this failure, if any.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            TransferError::Domain(e) => Some(e),
            TransferError::Store(_) => None,
        }
    }

    /// A conflict that survived the retry budget is reported as a
    /// concurrent modification.
    fn surfaced(self) -> Self {
        match self {
            TransferError::Store(StoreError::Conflict(msg)) => {
                TransferError::Domain(DomainError::conflict(msg))
            }
            TransferError::Store(StoreError::NotFound(what)) => {
                TransferError::Domain(DomainError::not_found(what))
            }
            other => other,
        }
    }
}

impl IsConflict for TransferError {
    fn is_conflict(&self) -> bool {
        matches!(self, TransferError::Store(e) if e.is_conflict())
    }
}

pub struct TransferService<B> {
    transfers: Arc<dyn TransferStore>,
    inventory: Arc<dyn InventoryStore>,
    directory: Arc<dyn TenantDirectory>,
    bus: B,
    max_write_attempts: u32,
}

impl<B> TransferService<B>
where
    B: EventBus<StockflowEnvelope>,
{
    pub fn new(
        transfers: Arc<dyn TransferStore>,
        inventory: Arc<dyn InventoryStore>,
        directory: Arc<dyn TenantDirectory>,
        bus: B,
        max_write_attempts: u32,
    ) -> Self {
        Self {
            transfers,
            inventory,
            directory,
            bus,
            max_write_attempts: max_write_attempts.max(1),
        }
    }

    pub fn get(&self, id: TransferId) -> Result<StockTransfer, TransferError> {
        self.load(id).map_err(TransferError::surfaced)
    }

    /// Transfers where the tenant is source or destination, oldest first.
    pub fn list(&self, tenant_id: TenantId) -> Result<Vec<StockTransfer>, TransferError> {
        Ok(self.transfers.list_transfers(tenant_id)?)
    }

    /// Create a transfer in `pending`.
    ///
    /// Cross-tenant requests need an active connection between the two
    /// tenants; without one the request is a validation failure.
    pub fn request(&self, cmd: RequestTransfer) -> Result<StockTransfer, TransferError> {
        let (transfer, event) = StockTransfer::request(&cmd)?;

        if cmd.transfer_type == TransferType::CrossTenant {
            let (src, dst) = (cmd.source.tenant_id, cmd.destination.tenant_id);
            if !self.directory.is_connected(src, dst)? {
                return Err(DomainError::validation(format!(
                    "no active connection between tenant {src} and tenant {dst}"
                ))
                .into());
            }
        }

        self.transfers
            .insert_transfer(&transfer)
            .map_err(|e| TransferError::from(e).surfaced())?;

        info!(
            tenant = %cmd.source.tenant_id,
            transfer_id = %cmd.transfer_id,
            quantity = cmd.quantity,
            "transfer requested"
        );
        publish_committed(&self.bus, transfer_envelope(&transfer, event));
        Ok(transfer)
    }

    pub fn approve(&self, id: TransferId, approver_id: UserId) -> Result<StockTransfer, TransferError> {
        self.transition(id, |_| {
            Ok(TransferCommand::Approve(ApproveTransfer {
                transfer_id: id,
                approver_id,
                occurred_at: Utc::now(),
            }))
        })
    }

    pub fn reject(&self, id: TransferId, reason: &str) -> Result<StockTransfer, TransferError> {
        self.transition(id, |_| {
            Ok(TransferCommand::Reject(RejectTransfer {
                transfer_id: id,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            }))
        })
    }

    /// Cancel from `pending` or `approved`.
    ///
    /// A transfer with any leg already in the ledger can only be completed.
    pub fn cancel(&self, id: TransferId, reason: &str) -> Result<StockTransfer, TransferError> {
        self.transition(id, |transfer| {
            self.ensure_no_stock_moved(transfer.details())?;
            Ok(TransferCommand::Cancel(CancelTransfer {
                transfer_id: id,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            }))
        })
    }

    /// Move the stock and mark the transfer `completed`.
    ///
    /// The `completed` status is claimed first, so no other transition can
    /// land while stock moves. The source quantity is checked before the
    /// claim and again when the legs are written. If the legs fail the claim
    /// is released and the transfer is `approved` again. Legs already in the
    /// ledger are skipped, so a retry never applies a leg twice.
    pub fn complete(&self, id: TransferId) -> Result<StockTransfer, TransferError> {
        let (transfer, events) = retry_on_conflict::<_, TransferError, _>(self.max_write_attempts, |_| {
            let mut transfer = self.load(id)?;
            let expected = transfer.status();
            transfer.ensure_transition(TransferAction::Complete)?;
            self.ensure_source_covers(transfer.details())?;

            let cmd = TransferCommand::Complete(CompleteTransfer {
                transfer_id: id,
                occurred_at: Utc::now(),
            });
            let events = execute(&mut transfer, &cmd)?;
            self.transfers.write_transfer(&transfer, expected)?;
            Ok((transfer, events))
        })
        .map_err(TransferError::surfaced)?;

        let applied = retry_on_conflict::<_, TransferError, _>(self.max_write_attempts, |_| {
            self.apply_legs(transfer.details())
        });
        if let Err(err) = applied {
            self.release(&transfer);
            return Err(err.surfaced());
        }

        let d = transfer.details();
        info!(
            tenant = %d.source.tenant_id,
            transfer_id = %id,
            source = %d.source_key(),
            destination = %d.destination_key(),
            quantity = d.quantity,
            "transfer completed"
        );
        self.publish(&transfer, events);
        Ok(transfer)
    }

    fn load(&self, id: TransferId) -> Result<StockTransfer, TransferError> {
        self.transfers
            .read_transfer(id)?
            .ok_or_else(|| DomainError::not_found(format!("transfer {id}")).into())
    }

    fn transition<F>(&self, id: TransferId, command: F) -> Result<StockTransfer, TransferError>
    where
        F: Fn(&StockTransfer) -> Result<TransferCommand, TransferError>,
    {
        let (transfer, events) = retry_on_conflict::<_, TransferError, _>(self.max_write_attempts, |_| {
            let mut transfer = self.load(id)?;
            let expected = transfer.status();
            let cmd = command(&transfer)?;
            let events = execute(&mut transfer, &cmd)?;
            self.transfers.write_transfer(&transfer, expected)?;
            Ok((transfer, events))
        })
        .map_err(TransferError::surfaced)?;

        info!(
            tenant = %transfer.details().source.tenant_id,
            transfer_id = %id,
            status = %transfer.status(),
            "transfer transitioned"
        );
        self.publish(&transfer, events);
        Ok(transfer)
    }

    /// Put a claimed completion back to `approved`. Nothing else can write
    /// the transfer while it is claimed, so a failure here is a store failure.
    fn release(&self, claimed: &StockTransfer) {
        let id = claimed.id_typed();
        let mut released = claimed.clone();
        let result = released
            .release_completion(Utc::now())
            .map_err(TransferError::from)
            .and_then(|()| {
                self.transfers
                    .write_transfer(&released, TransferStatus::Completed)
                    .map_err(TransferError::from)
            });

        match result {
            Ok(()) => warn!(transfer_id = %id, "completion released; transfer is approved again"),
            Err(err) => error!(
                transfer_id = %id,
                error = %err,
                "completion claim could not be released; transfer left completed without stock"
            ),
        }
    }

    fn ensure_source_covers(&self, d: &TransferDetails) -> Result<(), TransferError> {
        let source_key = d.source_key();
        let source_ref = SourceRef::transfer(d.transfer_id, TransferLeg::Source);
        if self.inventory.has_entry(&source_key, &source_ref)? {
            return Ok(());
        }
        let available = self.available(&source_key)?;
        if available < d.quantity {
            return Err(DomainError::insufficient_stock(available, d.quantity).into());
        }
        Ok(())
    }

    fn ensure_no_stock_moved(&self, d: &TransferDetails) -> Result<(), TransferError> {
        let legs = [
            (d.source_key(), TransferLeg::Source),
            (d.destination_key(), TransferLeg::Destination),
        ];
        for (key, leg) in legs {
            if self.inventory.has_entry(&key, &SourceRef::transfer(d.transfer_id, leg))? {
                return Err(DomainError::validation(format!(
                    "transfer {} has already moved stock and can only be completed",
                    d.transfer_id
                ))
                .into());
            }
        }
        Ok(())
    }

    fn available(&self, key: &StockKey) -> Result<i64, TransferError> {
        Ok(self.inventory.read_snapshot(key)?.map(|s| s.quantity).unwrap_or(0))
    }

    /// Source `-quantity`, destination `+quantity`.
    ///
    /// Intra-tenant legs commit together. Cross-tenant legs commit per
    /// tenant, source first; the gap between them is closed by retry or by
    /// reconciliation.
    fn apply_legs(&self, d: &TransferDetails) -> Result<(), TransferError> {
        let source_key = d.source_key();
        let source_ref = SourceRef::transfer(d.transfer_id, TransferLeg::Source);
        let dest_key = d.destination_key();
        let dest_ref = SourceRef::transfer(d.transfer_id, TransferLeg::Destination);

        let source_leg = if self.inventory.has_entry(&source_key, &source_ref)? {
            None
        } else {
            let available = self.available(&source_key)?;
            if available < d.quantity {
                return Err(DomainError::insufficient_stock(available, d.quantity).into());
            }
            Some(Movement::new(source_key, -d.quantity, source_ref, Some(available)))
        };

        let dest_leg = if self.inventory.has_entry(&dest_key, &dest_ref)? {
            None
        } else {
            let current = self.inventory.read_snapshot(&dest_key)?.map(|s| s.quantity);
            Some(Movement::new(dest_key, d.quantity, dest_ref, current))
        };

        if source_leg.is_none() && dest_leg.is_none() {
            warn!(transfer_id = %d.transfer_id, "transfer legs already recorded");
            return Ok(());
        }

        match d.transfer_type {
            TransferType::IntraTenant => {
                let legs: Vec<Movement> = source_leg.into_iter().chain(dest_leg).collect();
                self.inventory.commit(&legs)?;
            }
            TransferType::CrossTenant => {
                if let Some(leg) = source_leg {
                    self.inventory.commit(std::slice::from_ref(&leg))?;
                }
                if let Some(leg) = dest_leg {
                    self.inventory.commit(std::slice::from_ref(&leg))?;
                }
            }
        }
        Ok(())
    }

    fn publish(&self, transfer: &StockTransfer, events: Vec<TransferEvent>) {
        for event in events {
            publish_committed(&self.bus, transfer_envelope(transfer, event));
        }
    }
}
