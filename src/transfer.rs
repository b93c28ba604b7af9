// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Ownership transfers between users.
//!
//! # State Machine
//!
//! ```text
//! Pending ──accept──> Accepted
//!    │ ──reject──> Rejected
//!    └ ──cancel──> Cancelled   (administrative)
//! ```
//!
//! Terminal states never change again. At most one transfer per purchased
//! ticket is `Pending` at any time; the pending index enforces this on
//! insert, so two racing initiations cannot both succeed.
//!
//! # Lock Order
//!
//! Operations that need several locks take them in this order:
//! transfer record, then purchased ticket, then the pending index.

use crate::TicketingError;
use crate::base::{IdSequence, PurchasedTicketId, TransferId, UserId};
use crate::engine::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub purchased_ticket_id: PurchasedTicketId,
    pub from_user: UserId,
    pub to_user: UserId,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TransferRecord {
    fn involves(&self, user: UserId) -> bool {
        self.from_user == user || self.to_user == user
    }
}

/// Immutable history entry written when a transfer is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneTransfer {
    pub transfer_id: TransferId,
    pub purchased_ticket_id: PurchasedTicketId,
    pub from_user: UserId,
    pub to_user: UserId,
    pub transferred_at: DateTime<Utc>,
}

type TransferGuard = ArcMutexGuard<RawMutex, TransferRecord>;

/// Transfer records, the pending index and the accepted history.
#[derive(Debug, Default)]
pub struct TransferBook {
    records: DashMap<TransferId, Arc<Mutex<TransferRecord>>>,
    /// Purchased ticket to its one pending transfer.
    pending: DashMap<PurchasedTicketId, TransferId>,
    done: RwLock<Vec<DoneTransfer>>,
    ids: IdSequence,
}

impl TransferBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new pending transfer.
    ///
    /// # Errors
    ///
    /// [`TicketingError::TransferAlreadyPending`] if the ticket already has one.
    fn open(
        &self,
        ticket: PurchasedTicketId,
        from_user: UserId,
        to_user: UserId,
        now: DateTime<Utc>,
    ) -> Result<TransferRecord, TicketingError> {
        match self.pending.entry(ticket) {
            Entry::Occupied(_) => Err(TicketingError::TransferAlreadyPending(ticket)),
            Entry::Vacant(slot) => {
                let record = TransferRecord {
                    id: self.ids.next(),
                    purchased_ticket_id: ticket,
                    from_user,
                    to_user,
                    status: TransferStatus::Pending,
                    created_at: now,
                    resolved_at: None,
                };
                self.records
                    .insert(record.id, Arc::new(Mutex::new(record.clone())));
                slot.insert(record.id);
                Ok(record)
            }
        }
    }

    fn lock(&self, id: TransferId) -> Result<TransferGuard, TicketingError> {
        let record = self
            .records
            .get(&id)
            .map(|record| Arc::clone(record.value()))
            .ok_or(TicketingError::TransferNotFound(id))?;
        Ok(record.lock_arc())
    }

    /// Frees the pending slot of `ticket` if `transfer` still holds it.
    fn release_pending(&self, ticket: PurchasedTicketId, transfer: TransferId) {
        self.pending.remove_if(&ticket, |_, pending| *pending == transfer);
    }

    fn record_done(&self, entry: DoneTransfer) {
        self.done.write().push(entry);
    }

    pub fn get(&self, id: TransferId) -> Result<TransferRecord, TicketingError> {
        self.records
            .get(&id)
            .map(|record| record.lock().clone())
            .ok_or(TicketingError::TransferNotFound(id))
    }

    pub fn pending_for(&self, ticket: PurchasedTicketId) -> Option<TransferId> {
        self.pending.get(&ticket).map(|id| *id)
    }

    /// Records involving `user` whose status satisfies `wanted`, by id.
    fn list_for<F>(&self, user: UserId, wanted: F) -> Vec<TransferRecord>
    where
        F: Fn(TransferStatus) -> bool,
    {
        let handles: Vec<Arc<Mutex<TransferRecord>>> = self
            .records
            .iter()
            .map(|record| Arc::clone(record.value()))
            .collect();

        let mut records: Vec<TransferRecord> = handles
            .iter()
            .filter_map(|record| {
                let record = record.lock();
                (record.involves(user) && wanted(record.status)).then(|| record.clone())
            })
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    /// Accepted transfers where `user` is either party, oldest first.
    pub fn history(&self, user: UserId) -> Vec<DoneTransfer> {
        self.done
            .read()
            .iter()
            .filter(|entry| entry.from_user == user || entry.to_user == user)
            .cloned()
            .collect()
    }
}

/// Checks the caller may resolve `record` as its recipient.
fn check_recipient(record: &TransferRecord, by_user: UserId) -> Result<(), TicketingError> {
    if record.to_user != by_user {
        return Err(TicketingError::NotTransferRecipient {
            transfer: record.id,
            user: by_user,
        });
    }
    check_pending(record)
}

fn check_pending(record: &TransferRecord) -> Result<(), TicketingError> {
    if record.status.is_terminal() {
        return Err(TicketingError::TransferNotPending {
            transfer: record.id,
            status: record.status,
        });
    }
    Ok(())
}

impl Engine {
    /// Offers a purchased ticket to the user registered under `to_email`.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::PurchasedTicketNotFound`] - unknown ticket.
    /// - [`TicketingError::NotTicketOwner`] - `from_user` does not own it.
    /// - [`TicketingError::TicketAlreadyUsed`] - the ticket was used at the venue.
    /// - [`TicketingError::RecipientNotFound`] - no user with that email.
    /// - [`TicketingError::SelfTransfer`] - recipient is the sender.
    /// - [`TicketingError::TransferAlreadyPending`] - another transfer is pending.
    pub fn initiate_transfer(
        &self,
        from_user: UserId,
        ticket_id: PurchasedTicketId,
        to_email: &str,
    ) -> Result<TransferRecord, TicketingError> {
        if to_email.trim().is_empty() {
            return Err(TicketingError::MissingField("to_user_email"));
        }

        let ticket = self.ledger.lock(ticket_id)?;
        if ticket.owner != from_user {
            return Err(TicketingError::NotTicketOwner {
                ticket: ticket_id,
                user: from_user,
            });
        }
        if ticket.used {
            return Err(TicketingError::TicketAlreadyUsed(ticket_id));
        }

        let recipient = self
            .directory
            .user_by_email(to_email)
            .ok_or(TicketingError::RecipientNotFound)?;
        if recipient.id == from_user {
            return Err(TicketingError::SelfTransfer);
        }

        let record = self
            .transfers
            .open(ticket_id, from_user, recipient.id, self.clock.now())?;
        info!(
            transfer_id = %record.id,
            ticket_id = %ticket_id,
            from_user = %from_user,
            to_user = %recipient.id,
            "Transfer initiated"
        );
        Ok(record)
    }

    /// Accepts a pending transfer and moves ownership to the recipient.
    ///
    /// The status change, the owner change and the history entry happen
    /// while both the transfer and the ticket are locked.
    pub fn accept_transfer(
        &self,
        transfer_id: TransferId,
        by_user: UserId,
    ) -> Result<TransferRecord, TicketingError> {
        let mut record = self.transfers.lock(transfer_id)?;
        check_recipient(&record, by_user)?;

        let mut ticket = self.ledger.lock(record.purchased_ticket_id)?;
        if ticket.owner != record.from_user {
            return Err(TicketingError::OwnershipChanged(ticket.id));
        }
        if ticket.used {
            return Err(TicketingError::TicketAlreadyUsed(ticket.id));
        }

        let now = self.clock.now();
        record.status = TransferStatus::Accepted;
        record.resolved_at = Some(now);
        ticket.owner = record.to_user;
        self.transfers
            .release_pending(record.purchased_ticket_id, record.id);
        self.transfers.record_done(DoneTransfer {
            transfer_id: record.id,
            purchased_ticket_id: record.purchased_ticket_id,
            from_user: record.from_user,
            to_user: record.to_user,
            transferred_at: now,
        });

        info!(
            transfer_id = %record.id,
            ticket_id = %record.purchased_ticket_id,
            new_owner = %record.to_user,
            "Transfer accepted"
        );
        Ok(record.clone())
    }

    pub fn reject_transfer(
        &self,
        transfer_id: TransferId,
        by_user: UserId,
    ) -> Result<TransferRecord, TicketingError> {
        let mut record = self.transfers.lock(transfer_id)?;
        check_recipient(&record, by_user)?;

        record.status = TransferStatus::Rejected;
        record.resolved_at = Some(self.clock.now());
        self.transfers
            .release_pending(record.purchased_ticket_id, record.id);

        info!(transfer_id = %record.id, "Transfer rejected");
        Ok(record.clone())
    }

    /// Administrative cancellation of a pending transfer.
    pub fn cancel_transfer(&self, transfer_id: TransferId) -> Result<TransferRecord, TicketingError> {
        let mut record = self.transfers.lock(transfer_id)?;
        check_pending(&record)?;

        record.status = TransferStatus::Cancelled;
        record.resolved_at = Some(self.clock.now());
        self.transfers
            .release_pending(record.purchased_ticket_id, record.id);

        info!(transfer_id = %record.id, "Transfer cancelled");
        Ok(record.clone())
    }

    pub fn transfer(&self, transfer_id: TransferId) -> Result<TransferRecord, TicketingError> {
        self.transfers.get(transfer_id)
    }

    pub fn transfer_history(&self, user: UserId) -> Vec<DoneTransfer> {
        self.transfers.history(user)
    }

    /// Pending transfers sent or received by `user`.
    pub fn active_transfers(&self, user: UserId) -> Vec<TransferRecord> {
        self.transfers
            .list_for(user, |status| status == TransferStatus::Pending)
    }

    /// Rejected or cancelled transfers sent or received by `user`.
    pub fn rejected_transfers(&self, user: UserId) -> Vec<TransferRecord> {
        self.transfers.list_for(user, |status| {
            matches!(status, TransferStatus::Rejected | TransferStatus::Cancelled)
        })
    }
}
