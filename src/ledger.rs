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

//! Ownership ledger.
//!
//! One [`PurchasedTicket`] exists per sold ticket unit. The sale-time
//! attributes are a snapshot and never change; only the owner (through an
//! accepted transfer) and the usage flag move afterwards.

use crate::TicketingError;
use crate::base::{EventId, IdSequence, PaymentId, PurchasedTicketId, TicketId, UserId};
use crate::inventory::{TicketType, TicketUnit};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasedTicket {
    pub id: PurchasedTicketId,
    pub ticket_id: TicketId,
    pub event_id: EventId,
    pub payment_id: PaymentId,
    pub owner: UserId,
    pub price: Decimal,
    pub ticket_type: TicketType,
    pub is_vip: bool,
    pub title: String,
    pub description: String,
    pub place: String,
    pub purchased_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

/// Exclusive access to one ownership record.
pub type OwnershipGuard = ArcMutexGuard<RawMutex, PurchasedTicket>;

#[derive(Debug, Default)]
pub struct OwnershipLedger {
    tickets: DashMap<PurchasedTicketId, Arc<Mutex<PurchasedTicket>>>,
    /// Source ticket unit to its ownership record; one entry per sold unit.
    by_source: DashMap<TicketId, PurchasedTicketId>,
    ids: IdSequence,
}

impl OwnershipLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds ownership records for `units` without storing them.
    pub fn prepare(
        &self,
        units: &[TicketUnit],
        owner: UserId,
        payment_id: PaymentId,
        now: DateTime<Utc>,
    ) -> Vec<PurchasedTicket> {
        units
            .iter()
            .map(|unit| PurchasedTicket {
                id: self.ids.next(),
                ticket_id: unit.id,
                event_id: unit.event_id,
                payment_id,
                owner,
                price: unit.price,
                ticket_type: unit.ticket_type,
                is_vip: unit.is_vip,
                title: unit.title.clone(),
                description: unit.description.clone(),
                place: unit.place.clone(),
                purchased_at: now,
                used: false,
                used_at: None,
            })
            .collect()
    }

    /// Stores prepared records.
    ///
    /// Must be called while the source units are still locked by the
    /// purchase, so no other purchase can record the same unit.
    pub fn commit(&self, records: &[PurchasedTicket]) {
        for record in records {
            let previous = self.by_source.insert(record.ticket_id, record.id);
            debug_assert!(
                previous.is_none(),
                "Invariant violated: ticket {} recorded twice",
                record.ticket_id
            );
            self.tickets
                .insert(record.id, Arc::new(Mutex::new(record.clone())));
        }
    }

    pub fn get(&self, id: PurchasedTicketId) -> Result<PurchasedTicket, TicketingError> {
        self.tickets
            .get(&id)
            .map(|ticket| ticket.lock().clone())
            .ok_or(TicketingError::PurchasedTicketNotFound(id))
    }

    /// Locks one record until the returned guard is dropped.
    pub fn lock(&self, id: PurchasedTicketId) -> Result<OwnershipGuard, TicketingError> {
        let ticket = self
            .tickets
            .get(&id)
            .map(|ticket| Arc::clone(ticket.value()))
            .ok_or(TicketingError::PurchasedTicketNotFound(id))?;
        Ok(ticket.lock_arc())
    }

    /// Records currently owned by `owner`, ordered by id.
    pub fn list_by_owner(&self, owner: UserId) -> Vec<PurchasedTicket> {
        let handles: Vec<Arc<Mutex<PurchasedTicket>>> = self
            .tickets
            .iter()
            .map(|ticket| Arc::clone(ticket.value()))
            .collect();

        let mut owned: Vec<PurchasedTicket> = handles
            .iter()
            .filter_map(|ticket| {
                let ticket = ticket.lock();
                (ticket.owner == owner).then(|| ticket.clone())
            })
            .collect();
        owned.sort_by_key(|ticket| ticket.id);
        owned
    }

    pub fn find_by_source(&self, ticket_id: TicketId) -> Option<PurchasedTicketId> {
        self.by_source.get(&ticket_id).map(|id| *id)
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}
