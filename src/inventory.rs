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

//! Ticket inventory with pessimistic row locking.
//!
//! Every ticket unit is a row made of two parts:
//!
//! - an exclusive **row lock**, taken by a unit of work (a purchase, a
//!   seller edit) and held until that unit of work commits or rolls back;
//! - the **committed data**, readable at any time without waiting on the
//!   row lock and only written by the holder of the row lock.
//!
//! Locking selection follows `SELECT ... FOR UPDATE` semantics: matching
//! rows are collected from committed data, then locked one by one in
//! ascending id order. After each lock is acquired the row is evaluated
//! again, since a previous holder may have sold, edited or deleted it
//! while we waited. Locking in id order means no two units of work can
//! wait on each other in a cycle.
//!
//! ```
//! use rust_decimal_macros::dec;
//! use ticket_ledger_rs::{EventId, Inventory, NewTickets, SaleId, TicketType};
//!
//! let inventory = Inventory::new();
//! let batch = NewTickets {
//!     event_id: EventId(1),
//!     sale_id: SaleId(1),
//!     price: dec!(25.00),
//!     ticket_type: TicketType::Regular,
//!     is_vip: false,
//!     title: "Floor".into(),
//!     description: String::new(),
//!     place: "Hall A".into(),
//!     amount: 3,
//! };
//! inventory.create_batch(&batch);
//!
//! let locked = inventory.lock_available(&batch.group_key(), 2);
//! assert_eq!(locked.len(), 2);
//! ```

use crate::TicketingError;
use crate::base::{EventId, IdSequence, SaleId, TicketId};
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketType {
    Regular,
    Vip,
    Premium,
}

/// One sellable ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketUnit {
    pub id: TicketId,
    pub event_id: EventId,
    pub sale_id: SaleId,
    pub price: Decimal,
    pub ticket_type: TicketType,
    pub is_vip: bool,
    pub title: String,
    pub description: String,
    pub place: String,
    /// Never goes back to `false` once set.
    pub sold: bool,
    pub held: bool,
}

impl TicketUnit {
    pub fn is_available(&self) -> bool {
        !self.sold && !self.held
    }

    pub fn group_key(&self) -> TicketGroupKey {
        TicketGroupKey {
            event_id: self.event_id,
            sale_id: self.sale_id,
            title: self.title.clone(),
            place: self.place.clone(),
            price: self.price,
            ticket_type: self.ticket_type,
            is_vip: self.is_vip,
        }
    }
}

/// The attributes shared by every unit of a ticket group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketGroupKey {
    pub event_id: EventId,
    pub sale_id: SaleId,
    pub title: String,
    pub place: String,
    pub price: Decimal,
    pub ticket_type: TicketType,
    pub is_vip: bool,
}

impl TicketGroupKey {
    pub fn matches(&self, unit: &TicketUnit) -> bool {
        unit.event_id == self.event_id
            && unit.sale_id == self.sale_id
            && unit.price == self.price
            && unit.ticket_type == self.ticket_type
            && unit.is_vip == self.is_vip
            && unit.title == self.title
            && unit.place == self.place
    }
}

/// Units sharing a [`TicketGroupKey`], counted by state.
///
/// Always recomputed from the rows; `available + sold + held == total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketGroup {
    #[serde(flatten)]
    pub key: TicketGroupKey,
    /// Description of the lowest-id unit in the group.
    pub description: String,
    pub total: u32,
    pub available: u32,
    pub sold: u32,
    /// Held and not sold.
    pub held: u32,
}

/// A seller batch: `amount` identical units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTickets {
    pub event_id: EventId,
    pub sale_id: SaleId,
    pub price: Decimal,
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    #[serde(default)]
    pub is_vip: bool,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub place: String,
    pub amount: u32,
}

impl NewTickets {
    pub fn group_key(&self) -> TicketGroupKey {
        TicketGroupKey {
            event_id: self.event_id,
            sale_id: self.sale_id,
            title: self.title.clone(),
            place: self.place.clone(),
            price: self.price,
            ticket_type: self.ticket_type,
            is_vip: self.is_vip,
        }
    }
}

/// Partial update of unsold units. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPatch {
    pub price: Option<Decimal>,
    #[serde(rename = "type")]
    pub ticket_type: Option<TicketType>,
    pub is_vip: Option<bool>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub place: Option<String>,
    pub sale_id: Option<SaleId>,
}

impl TicketPatch {
    fn apply(&self, unit: &mut TicketUnit) {
        if let Some(price) = self.price {
            unit.price = price;
        }
        if let Some(ticket_type) = self.ticket_type {
            unit.ticket_type = ticket_type;
        }
        if let Some(is_vip) = self.is_vip {
            unit.is_vip = is_vip;
        }
        if let Some(title) = &self.title {
            unit.title = title.clone();
        }
        if let Some(description) = &self.description {
            unit.description = description.clone();
        }
        if let Some(place) = &self.place {
            unit.place = place.clone();
        }
        if let Some(sale_id) = self.sale_id {
            unit.sale_id = sale_id;
        }
    }
}

#[derive(Debug)]
struct TicketRow {
    id: TicketId,
    lock: Arc<Mutex<()>>,
    data: RwLock<TicketUnit>,
}

type RowGuard = ArcMutexGuard<RawMutex, ()>;

struct LockedRow {
    row: Arc<TicketRow>,
    _guard: RowGuard,
}

/// Rows locked by one unit of work, in ascending id order.
///
/// Dropping the value releases every lock without changing any row, which
/// is the rollback path. Changes are applied through the methods below
/// while the locks are still held.
pub struct LockedTickets {
    rows: Vec<LockedRow>,
}

impl LockedTickets {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ids(&self) -> Vec<TicketId> {
        self.rows.iter().map(|locked| locked.row.id).collect()
    }

    /// Current state of the locked rows.
    pub fn snapshots(&self) -> Vec<TicketUnit> {
        self.rows
            .iter()
            .map(|locked| locked.row.data.read().clone())
            .collect()
    }

    /// Marks every locked row sold.
    pub fn mark_sold(&self) {
        for locked in &self.rows {
            let mut data = locked.row.data.write();
            debug_assert!(
                data.is_available(),
                "Invariant violated: selling unavailable ticket {}",
                data.id
            );
            data.sold = true;
        }
    }

    /// Applies `patch` to every locked row.
    pub fn apply(&self, patch: &TicketPatch) {
        for locked in &self.rows {
            patch.apply(&mut *locked.row.data.write());
        }
    }

    /// Releases the locks without changing anything.
    pub fn release(self) {}
}

impl std::fmt::Debug for LockedTickets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedTickets")
            .field("ids", &self.ids())
            .finish()
    }
}

/// The ticket table.
#[derive(Debug, Default)]
pub struct Inventory {
    rows: DashMap<TicketId, Arc<TicketRow>>,
    ids: IdSequence,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `batch.amount` unsold, unheld units.
    pub fn create_batch(&self, batch: &NewTickets) -> Vec<TicketId> {
        (0..batch.amount)
            .map(|_| {
                let id: TicketId = self.ids.next();
                let unit = TicketUnit {
                    id,
                    event_id: batch.event_id,
                    sale_id: batch.sale_id,
                    price: batch.price,
                    ticket_type: batch.ticket_type,
                    is_vip: batch.is_vip,
                    title: batch.title.clone(),
                    description: batch.description.clone(),
                    place: batch.place.clone(),
                    sold: false,
                    held: false,
                };
                self.rows.insert(
                    id,
                    Arc::new(TicketRow {
                        id,
                        lock: Arc::new(Mutex::new(())),
                        data: RwLock::new(unit),
                    }),
                );
                id
            })
            .collect()
    }

    pub fn get(&self, id: TicketId) -> Result<TicketUnit, TicketingError> {
        self.rows
            .get(&id)
            .map(|row| row.data.read().clone())
            .ok_or(TicketingError::TicketNotFound(id))
    }

    /// Locks up to `quantity` available units of the group.
    ///
    /// Returns fewer rows than requested when the group runs short; the
    /// caller decides whether a short list is a failure. Blocks while
    /// another unit of work holds a candidate row.
    pub fn lock_available(&self, key: &TicketGroupKey, quantity: usize) -> LockedTickets {
        self.lock_matching(|unit| key.matches(unit) && unit.is_available(), Some(quantity))
    }

    /// Locks every unsold unit of the group, held ones included.
    pub fn lock_unsold(&self, key: &TicketGroupKey) -> LockedTickets {
        self.lock_matching(|unit| key.matches(unit) && !unit.sold, None)
    }

    /// Locks every unit of a sale window, sold ones included.
    ///
    /// A purchase in flight on any of these rows finishes first, so the
    /// snapshots show whether the window ever sold anything.
    pub fn lock_sale(&self, sale_id: SaleId) -> LockedTickets {
        self.lock_matching(|unit| unit.sale_id == sale_id, None)
    }

    /// Locks a single row whatever its state.
    ///
    /// # Errors
    ///
    /// [`TicketingError::TicketNotFound`] if the row does not exist or was
    /// deleted while waiting for the lock.
    pub fn get_for_update(&self, id: TicketId) -> Result<LockedTickets, TicketingError> {
        let row = self
            .rows
            .get(&id)
            .map(|row| Arc::clone(row.value()))
            .ok_or(TicketingError::TicketNotFound(id))?;

        let guard = row.lock.lock_arc();
        if !self.rows.contains_key(&id) {
            return Err(TicketingError::TicketNotFound(id));
        }

        Ok(LockedTickets {
            rows: vec![LockedRow { row, _guard: guard }],
        })
    }

    /// Updates one unsold unit.
    pub fn update(&self, id: TicketId, patch: &TicketPatch) -> Result<TicketUnit, TicketingError> {
        let locked = self.get_for_update(id)?;
        if locked.snapshots().iter().any(|unit| unit.sold) {
            return Err(TicketingError::TicketAlreadySold(id));
        }
        locked.apply(patch);
        self.get(id)
    }

    /// Deletes one unsold unit.
    pub fn delete(&self, id: TicketId) -> Result<(), TicketingError> {
        let locked = self.get_for_update(id)?;
        if locked.snapshots().iter().any(|unit| unit.sold) {
            return Err(TicketingError::TicketAlreadySold(id));
        }
        self.delete_locked(locked);
        Ok(())
    }

    /// Removes locked rows from the table, then releases the locks.
    ///
    /// Sold rows are skipped; they are never destroyed.
    pub fn delete_locked(&self, locked: LockedTickets) -> usize {
        let mut deleted = 0;
        for entry in &locked.rows {
            if entry.row.data.read().sold {
                continue;
            }
            if self.rows.remove(&entry.row.id).is_some() {
                deleted += 1;
            }
        }
        deleted
    }

    /// Sets or clears the hold flag of an unsold unit.
    pub fn set_held(&self, id: TicketId, held: bool) -> Result<(), TicketingError> {
        let locked = self.get_for_update(id)?;
        for entry in &locked.rows {
            let mut data = entry.row.data.write();
            if data.sold {
                return Err(TicketingError::TicketAlreadySold(id));
            }
            data.held = held;
        }
        Ok(())
    }

    /// Units of the group ordered by id, optionally including sold ones.
    pub fn list_by_criteria(&self, key: &TicketGroupKey, include_sold: bool) -> Vec<TicketUnit> {
        self.select(|unit| key.matches(unit) && (include_sold || !unit.sold))
    }

    pub fn list_available_by_event(&self, event_id: EventId) -> Vec<TicketUnit> {
        self.select(|unit| unit.event_id == event_id && unit.is_available())
    }

    /// Every group of the event with its counts.
    pub fn groups_by_event(&self, event_id: EventId) -> Vec<TicketGroup> {
        let mut groups: HashMap<TicketGroupKey, TicketGroup> = HashMap::new();

        for unit in self.select(|unit| unit.event_id == event_id) {
            let group = groups
                .entry(unit.group_key())
                .or_insert_with_key(|key| TicketGroup {
                    key: key.clone(),
                    description: unit.description.clone(),
                    total: 0,
                    available: 0,
                    sold: 0,
                    held: 0,
                });
            group.total += 1;
            if unit.sold {
                group.sold += 1;
            } else if unit.held {
                group.held += 1;
            } else {
                group.available += 1;
            }
        }

        let mut groups: Vec<TicketGroup> = groups.into_values().collect();
        groups.sort_by(|a, b| a.key.cmp(&b.key));
        groups
    }

    /// Groups of the event with at least one available unit.
    pub fn available_groups_by_event(&self, event_id: EventId) -> Vec<TicketGroup> {
        self.groups_by_event(event_id)
            .into_iter()
            .filter(|group| group.available > 0)
            .collect()
    }

    /// Committed rows matching `filter`, ordered by id.
    fn select<F>(&self, filter: F) -> Vec<TicketUnit>
    where
        F: Fn(&TicketUnit) -> bool,
    {
        let mut units: Vec<TicketUnit> = self
            .rows
            .iter()
            .filter_map(|row| {
                let data = row.data.read();
                filter(&*data).then(|| data.clone())
            })
            .collect();
        units.sort_by_key(|unit| unit.id);
        units
    }

    fn lock_matching<F>(&self, filter: F, limit: Option<usize>) -> LockedTickets
    where
        F: Fn(&TicketUnit) -> bool,
    {
        // Collect candidates first; never wait on a row lock while holding
        // a shard of the table.
        let mut candidates: Vec<Arc<TicketRow>> = self
            .rows
            .iter()
            .filter(|row| filter(&*row.data.read()))
            .map(|row| Arc::clone(row.value()))
            .collect();
        candidates.sort_by_key(|row| row.id);

        let limit = limit.unwrap_or(candidates.len());
        let mut rows = Vec::with_capacity(limit.min(candidates.len()));

        for row in candidates {
            if rows.len() >= limit {
                break;
            }

            let guard = row.lock.lock_arc();
            if !self.rows.contains_key(&row.id) {
                continue;
            }
            let still_matches = filter(&*row.data.read());
            if still_matches {
                rows.push(LockedRow { row, _guard: guard });
            }
        }

        LockedTickets { rows }
    }
}
