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

//! Ticket purchases.
//!
//! A purchase is one unit of work:
//!
//! 1. check the sale window is active and the event approved;
//! 2. lock the requested units (a short lock fails the purchase);
//! 3. charge the buyer, waiting at most the configured payment timeout;
//! 4. mark the units sold and record ownership.
//!
//! Row locks are held from step 2 until step 4 is done. Any failure
//! before step 4 drops the locks and leaves the inventory untouched; the
//! only trace of a declined payment is its `Failed` payment record. Step 4
//! is prepared in full before anything is written and cannot fail, so a
//! completed charge always ends in a committed sale.

use crate::directory::{Event, EventStatus};
use crate::engine::Engine;
use crate::inventory::{LockedTickets, TicketGroupKey, TicketType, TicketUnit};
use crate::ledger::PurchasedTicket;
use crate::payment::{ChargeOrder, PaymentMethod, PaymentReceipt};
use crate::sale::SaleWindow;
use crate::{EventId, PurchasedTicketId, SaleId, TicketId, TicketingError, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Buy `quantity` units of one ticket group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseGroupRequest {
    pub event_id: EventId,
    pub sale_id: SaleId,
    pub price: Decimal,
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    #[serde(default)]
    pub is_vip: bool,
    pub title: String,
    pub place: String,
    pub quantity: u32,
    pub payment_method: PaymentMethod,
}

impl PurchaseGroupRequest {
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

/// Buy one specific unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseTicketRequest {
    pub ticket_id: TicketId,
    #[serde(default = "single")]
    pub quantity: u32,
    pub payment_method: PaymentMethod,
}

fn single() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasedTicketSummary {
    pub id: PurchasedTicketId,
    pub ticket_id: TicketId,
    pub event_id: EventId,
    pub event_title: String,
    pub event_date: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub place: String,
    pub price: Decimal,
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    pub is_vip: bool,
    pub is_used: bool,
}

impl PurchasedTicketSummary {
    fn new(ticket: &PurchasedTicket, event: &Event) -> Self {
        Self {
            id: ticket.id,
            ticket_id: ticket.ticket_id,
            event_id: event.id,
            event_title: event.title.clone(),
            event_date: event.date,
            title: ticket.title.clone(),
            description: ticket.description.clone(),
            place: ticket.place.clone(),
            price: ticket.price,
            ticket_type: ticket.ticket_type,
            is_vip: ticket.is_vip,
            is_used: ticket.used,
        }
    }
}

/// Outcome of a successful purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub purchased_tickets: Vec<PurchasedTicketSummary>,
    pub payment_info: PaymentReceipt,
    pub total_amount: Decimal,
}

impl Engine {
    /// Buys `request.quantity` available units of a group.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::InvalidQuantity`] - quantity outside `1..=max_group_quantity`.
    /// - [`TicketingError::SaleNotFound`] / [`TicketingError::EventNotFound`] - unknown ids.
    /// - [`TicketingError::SaleNotActive`] - now is outside the sale window.
    /// - [`TicketingError::EventNotApproved`] - event not approved for sales.
    /// - [`TicketingError::InsufficientInventory`] - fewer units could be locked than requested.
    /// - [`TicketingError::PaymentDeclined`] - the charge failed or timed out.
    /// - [`TicketingError::InvalidAmount`] - the total is zero or overflows.
    pub fn purchase_group(
        &self,
        buyer: UserId,
        request: &PurchaseGroupRequest,
    ) -> Result<PurchaseReceipt, TicketingError> {
        let max = self.config.max_group_quantity;
        if request.quantity == 0 || request.quantity > max {
            return Err(TicketingError::InvalidQuantity {
                requested: request.quantity,
                max,
            });
        }
        self.directory.user(buyer)?;

        let sale = self.sales.get(request.sale_id)?;
        if sale.event_id != request.event_id {
            return Err(TicketingError::SaleEventMismatch {
                sale: sale.id,
                event: request.event_id,
            });
        }
        let event = self.open_for_sales(&sale)?;

        let locked = self
            .inventory
            .lock_available(&request.group_key(), request.quantity as usize);
        if locked.len() < request.quantity as usize {
            warn!(
                buyer = %buyer,
                event_id = %event.id,
                requested = request.quantity,
                available = locked.len(),
                "Not enough tickets available"
            );
            return Err(TicketingError::InsufficientInventory {
                requested: request.quantity,
                available: locked.len() as u32,
            });
        }

        let description = format!("Ticket purchase for {} - {}", request.title, event.title);
        self.settle(buyer, locked, &event, request.payment_method, description)
    }

    /// Buys one specific unit.
    ///
    /// Same checks as [`Engine::purchase_group`] with the unit fixed by id.
    /// Quantities above one are rejected.
    pub fn purchase_ticket(
        &self,
        buyer: UserId,
        request: &PurchaseTicketRequest,
    ) -> Result<PurchaseReceipt, TicketingError> {
        if request.quantity != 1 {
            return Err(TicketingError::InvalidQuantity {
                requested: request.quantity,
                max: 1,
            });
        }
        self.directory.user(buyer)?;

        let unit = self.inventory.get(request.ticket_id)?;
        let sale = self.sales.get(unit.sale_id)?;
        let event = self.open_for_sales(&sale)?;

        let locked = self.inventory.get_for_update(request.ticket_id)?;
        if !locked.snapshots().iter().all(TicketUnit::is_available) {
            debug!(buyer = %buyer, ticket_id = %request.ticket_id, "Ticket is not available");
            return Err(TicketingError::InsufficientInventory {
                requested: 1,
                available: 0,
            });
        }

        let description = format!("Ticket purchase for {}", unit.title);
        self.settle(buyer, locked, &event, request.payment_method, description)
    }

    /// Loads the event behind `sale` and checks both allow buying now.
    fn open_for_sales(&self, sale: &SaleWindow) -> Result<Event, TicketingError> {
        if !sale.is_active(self.clock.now()) {
            return Err(TicketingError::SaleNotActive(sale.id));
        }
        let event = self.directory.event(sale.event_id)?;
        if event.status != EventStatus::Approved {
            return Err(TicketingError::EventNotApproved(event.id));
        }
        Ok(event)
    }

    /// Charges for the locked units and commits the sale.
    ///
    /// Consumes the locks: they are released on return either way.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::InvalidAmount`] - the total or the seller payout
    ///   overflows; nothing is charged.
    fn settle(
        &self,
        buyer: UserId,
        locked: LockedTickets,
        event: &Event,
        method: PaymentMethod,
        description: String,
    ) -> Result<PurchaseReceipt, TicketingError> {
        let units = locked.snapshots();
        // Totals past the decimal range fail before any money moves.
        let total = units
            .iter()
            .try_fold(Decimal::ZERO, |sum, unit| sum.checked_add(unit.price))
            .ok_or(TicketingError::InvalidAmount)?;
        let payout = total
            .checked_mul(self.config.seller_share)
            .ok_or(TicketingError::InvalidAmount)?;

        let payment = self.payments.charge(
            ChargeOrder {
                user_id: buyer,
                amount: total,
                method,
                description: description.clone(),
                event_id: Some(event.id),
            },
            self.clock.now(),
        )?;

        let now = self.clock.now();
        let records = self.ledger.prepare(&units, buyer, payment.payment_id, now);
        locked.mark_sold();
        self.ledger.commit(&records);
        locked.release();

        info!(
            buyer = %buyer,
            event_id = %event.id,
            payment_id = %payment.payment_id,
            quantity = records.len(),
            total = %total,
            "Tickets purchased"
        );

        if let Err(e) =
            self.payments
                .record_payout(event.seller_id, payout, event.id, &description, now)
        {
            warn!(
                seller = %event.seller_id,
                payment_id = %payment.payment_id,
                error = %e,
                "Failed to record seller payout"
            );
        }

        Ok(PurchaseReceipt {
            purchased_tickets: records
                .iter()
                .map(|ticket| PurchasedTicketSummary::new(ticket, event))
                .collect(),
            payment_info: payment,
            total_amount: total,
        })
    }
}
