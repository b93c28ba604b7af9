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

//! Ticket sales engine.
//!
//! The [`Engine`] owns every store and exposes the operations that span
//! more than one of them. Purchases live in [`crate::purchase`] and
//! transfers in [`crate::transfer`]; this module holds construction, the
//! seller-side inventory and sale management, and the payment lookups.
//!
//! # Sale Window Gating
//!
//! | Operation | Window must be |
//! |-----------|----------------|
//! | Create, update, delete tickets | not active |
//! | Update, delete a sale | not active |
//! | Purchase | active |
//!
//! # Thread Safety
//!
//! Every store is safe to share; the engine is used behind an `Arc` and
//! all operations take `&self`. Operations block on row locks and on the
//! payment gateway, so async callers should run them on a blocking pool.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::directory::{Directory, EventStatus};
use crate::inventory::{
    Inventory, NewTickets, TicketGroup, TicketGroupKey, TicketPatch, TicketUnit,
};
use crate::ledger::{OwnershipLedger, PurchasedTicket};
use crate::payment::{PaymentBook, PaymentGateway, PaymentReceipt, PaymentRecord, SimulatedGateway};
use crate::sale::{SaleBook, SaleWindow};
use crate::transfer::TransferBook;
use crate::{EventId, PaymentId, PurchasedTicketId, SaleId, TicketId, TicketingError, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Ticket sales engine.
///
/// # Invariants
///
/// - A ticket unit is sold at most once and is never unsold.
/// - Every sold unit has exactly one [`PurchasedTicket`].
/// - A purchased ticket has at most one pending transfer.
/// - Sale windows of one event never overlap.
pub struct Engine {
    pub(crate) directory: Directory,
    pub(crate) inventory: Inventory,
    pub(crate) sales: SaleBook,
    pub(crate) ledger: OwnershipLedger,
    pub(crate) payments: PaymentBook,
    pub(crate) transfers: TransferBook,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
}

impl Engine {
    /// Creates an engine on wall-clock time with a gateway that approves
    /// every charge.
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(SystemClock),
            Arc::new(SimulatedGateway::always_approve()),
            EngineConfig::default(),
        )
    }

    pub fn with_parts(
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn PaymentGateway>,
        config: EngineConfig,
    ) -> Self {
        Engine {
            directory: Directory::new(),
            inventory: Inventory::new(),
            sales: SaleBook::new(),
            ledger: OwnershipLedger::new(),
            payments: PaymentBook::new(gateway, config.payment_timeout),
            transfers: TransferBook::new(),
            clock,
            config,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn sales(&self) -> &SaleBook {
        &self.sales
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // === Tickets ===

    /// Creates a batch of identical units for a sale that is not active.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::InvalidQuantity`] - amount is zero or above the batch limit.
    /// - [`TicketingError::InvalidPrice`] - negative price.
    /// - [`TicketingError::NotEventSeller`] - `seller` does not sell the event.
    /// - [`TicketingError::SaleEventMismatch`] - the sale belongs to another event.
    /// - [`TicketingError::SaleAlreadyActive`] - the sale window is open.
    pub fn create_tickets(
        &self,
        seller: UserId,
        batch: &NewTickets,
    ) -> Result<Vec<TicketId>, TicketingError> {
        if batch.amount == 0 || batch.amount > self.config.max_batch_amount {
            return Err(TicketingError::InvalidQuantity {
                requested: batch.amount,
                max: self.config.max_batch_amount,
            });
        }
        if batch.price < Decimal::ZERO {
            return Err(TicketingError::InvalidPrice);
        }
        if batch.title.trim().is_empty() {
            return Err(TicketingError::MissingField("title"));
        }
        if batch.place.trim().is_empty() {
            return Err(TicketingError::MissingField("place"));
        }

        self.directory.event_of_seller(batch.event_id, seller)?;
        self.editable_sale(batch.sale_id, batch.event_id)?;

        let ids = self.inventory.create_batch(batch);
        info!(
            event_id = %batch.event_id,
            sale_id = %batch.sale_id,
            amount = batch.amount,
            "Tickets created"
        );
        Ok(ids)
    }

    /// Applies `patch` to every unsold unit of a group.
    ///
    /// Returns the number of units changed.
    pub fn update_tickets(
        &self,
        seller: UserId,
        key: &TicketGroupKey,
        patch: &TicketPatch,
    ) -> Result<usize, TicketingError> {
        if patch.price.is_some_and(|price| price < Decimal::ZERO) {
            return Err(TicketingError::InvalidPrice);
        }
        if patch.title.as_deref().is_some_and(|title| title.trim().is_empty()) {
            return Err(TicketingError::MissingField("title"));
        }
        if patch.place.as_deref().is_some_and(|place| place.trim().is_empty()) {
            return Err(TicketingError::MissingField("place"));
        }

        self.directory.event_of_seller(key.event_id, seller)?;
        self.editable_sale(key.sale_id, key.event_id)?;
        if let Some(target) = patch.sale_id.filter(|target| *target != key.sale_id) {
            self.editable_sale(target, key.event_id)?;
        }

        let locked = self.inventory.lock_unsold(key);
        if locked.is_empty() {
            return Err(TicketingError::NoUnsoldTickets);
        }
        locked.apply(patch);

        info!(event_id = %key.event_id, updated = locked.len(), "Tickets updated");
        Ok(locked.len())
    }

    /// Deletes every unsold unit of a group. Sold units are kept.
    pub fn delete_tickets(
        &self,
        seller: UserId,
        key: &TicketGroupKey,
    ) -> Result<usize, TicketingError> {
        self.directory.event_of_seller(key.event_id, seller)?;
        self.editable_sale(key.sale_id, key.event_id)?;

        let locked = self.inventory.lock_unsold(key);
        if locked.is_empty() {
            return Err(TicketingError::NoUnsoldTickets);
        }
        let deleted = self.inventory.delete_locked(locked);

        info!(event_id = %key.event_id, deleted, "Tickets deleted");
        Ok(deleted)
    }

    pub fn ticket_groups(&self, event_id: EventId) -> Result<Vec<TicketGroup>, TicketingError> {
        self.directory.event(event_id)?;
        Ok(self.inventory.groups_by_event(event_id))
    }

    pub fn available_ticket_groups(
        &self,
        event_id: EventId,
    ) -> Result<Vec<TicketGroup>, TicketingError> {
        self.directory.event(event_id)?;
        Ok(self.inventory.available_groups_by_event(event_id))
    }

    /// Available units of an event.
    pub fn event_tickets(&self, event_id: EventId) -> Result<Vec<TicketUnit>, TicketingError> {
        self.directory.event(event_id)?;
        Ok(self.inventory.list_available_by_event(event_id))
    }

    /// Loads a sale of `event_id` whose window is not open.
    fn editable_sale(
        &self,
        sale_id: SaleId,
        event_id: EventId,
    ) -> Result<SaleWindow, TicketingError> {
        let sale = self.sales.get(sale_id)?;
        if sale.event_id != event_id {
            return Err(TicketingError::SaleEventMismatch {
                sale: sale_id,
                event: event_id,
            });
        }
        if sale.is_active(self.clock.now()) {
            return Err(TicketingError::SaleAlreadyActive(sale_id));
        }
        Ok(sale)
    }

    // === Sales ===

    /// Opens a future sale window for an approved event.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::NotEventSeller`] - `seller` does not sell the event.
    /// - [`TicketingError::EventNotApproved`] - the event is not approved.
    /// - [`TicketingError::InvalidSaleWindow`] - `start` is not before `end`.
    /// - [`TicketingError::SaleStartNotInFuture`] - `start` is not after now.
    /// - [`TicketingError::SaleWindowOverlap`] - overlaps another window of the event.
    pub fn create_sale(
        &self,
        seller: UserId,
        event_id: EventId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SaleWindow, TicketingError> {
        let event = self.directory.event_of_seller(event_id, seller)?;
        if event.status != EventStatus::Approved {
            return Err(TicketingError::EventNotApproved(event_id));
        }
        self.check_new_window(start, end)?;

        let sale = self.sales.create(event_id, start, end)?;
        info!(sale_id = %sale.id, event_id = %event_id, %start, %end, "Sale created");
        Ok(sale)
    }

    /// Moves the bounds of a window that is not open. A missing bound
    /// keeps its current value; only a new start must lie in the future.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::SaleAlreadyActive`] - the window is open now.
    /// - [`TicketingError::SaleStartNotInFuture`] - a new `start` is not after now.
    /// - [`TicketingError::InvalidSaleWindow`] - the resulting start is not before its end.
    /// - [`TicketingError::SaleWindowOverlap`] - overlaps another window of the event.
    pub fn update_sale(
        &self,
        seller: UserId,
        sale_id: SaleId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<SaleWindow, TicketingError> {
        let sale = self.sales.get(sale_id)?;
        self.directory.event_of_seller(sale.event_id, seller)?;
        let now = self.clock.now();
        if sale.is_active(now) {
            return Err(TicketingError::SaleAlreadyActive(sale_id));
        }
        if start.is_some_and(|start| start <= now) {
            return Err(TicketingError::SaleStartNotInFuture);
        }

        let start = start.unwrap_or(sale.start);
        let end = end.unwrap_or(sale.end);
        let sale = self.sales.update(sale_id, start, end)?;
        info!(sale_id = %sale_id, %start, %end, "Sale updated");
        Ok(sale)
    }

    /// Deletes a sale that is not active and never sold anything, along
    /// with its remaining units.
    ///
    /// Every row of the sale is locked before the sold check and removed
    /// before the locks are released, so no purchase can commit in between.
    pub fn delete_sale(&self, seller: UserId, sale_id: SaleId) -> Result<(), TicketingError> {
        let sale = self.sales.get(sale_id)?;
        self.directory.event_of_seller(sale.event_id, seller)?;
        if sale.is_active(self.clock.now()) {
            return Err(TicketingError::SaleAlreadyActive(sale_id));
        }

        let locked = self.inventory.lock_sale(sale_id);
        if locked.snapshots().iter().any(|unit| unit.sold) {
            return Err(TicketingError::SaleHasSoldTickets(sale_id));
        }
        let deleted = self.inventory.delete_locked(locked);
        self.sales.remove(sale_id)?;
        info!(sale_id = %sale_id, tickets_deleted = deleted, "Sale deleted");
        Ok(())
    }

    pub fn sale(&self, sale_id: SaleId) -> Result<SaleWindow, TicketingError> {
        self.sales.get(sale_id)
    }

    pub fn sales_by_event(&self, event_id: EventId) -> Result<Vec<SaleWindow>, TicketingError> {
        self.directory.event(event_id)?;
        Ok(self.sales.list_by_event(event_id))
    }

    fn check_new_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), TicketingError> {
        if start >= end {
            return Err(TicketingError::InvalidSaleWindow);
        }
        if start <= self.clock.now() {
            return Err(TicketingError::SaleStartNotInFuture);
        }
        Ok(())
    }

    // === Ownership ===

    /// Purchased tickets currently owned by `user`.
    pub fn user_tickets(&self, user: UserId) -> Vec<PurchasedTicket> {
        self.ledger.list_by_owner(user)
    }

    pub fn purchased_ticket(
        &self,
        ticket_id: PurchasedTicketId,
    ) -> Result<PurchasedTicket, TicketingError> {
        self.ledger.get(ticket_id)
    }

    /// Marks a purchased ticket used at the venue. Only the event's seller
    /// may do this, and only once.
    pub fn mark_used(
        &self,
        ticket_id: PurchasedTicketId,
        seller: UserId,
    ) -> Result<PurchasedTicket, TicketingError> {
        let mut ticket = self.ledger.lock(ticket_id)?;
        self.directory.event_of_seller(ticket.event_id, seller)?;
        if ticket.used {
            return Err(TicketingError::TicketAlreadyUsed(ticket_id));
        }

        ticket.used = true;
        ticket.used_at = Some(self.clock.now());
        info!(ticket_id = %ticket_id, event_id = %ticket.event_id, "Ticket used");
        Ok(ticket.clone())
    }

    // === Payments ===

    pub fn payment(&self, payment_id: PaymentId) -> Result<PaymentRecord, TicketingError> {
        self.payments.get(payment_id)
    }

    pub fn payments_by_user(&self, user: UserId) -> Vec<PaymentRecord> {
        self.payments.list_by_user(user)
    }

    /// Refunds a completed charge. Purchased tickets are left untouched.
    pub fn refund_payment(&self, payment_id: PaymentId) -> Result<PaymentReceipt, TicketingError> {
        self.payments.refund(payment_id)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
