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

//! Error types for ticket sales and transfers.
//!
//! Every [`TicketingError`] variant belongs to exactly one [`ErrorKind`].
//! Callers switch on the kind to decide how to surface a failure; the
//! variant carries the structured context.

use crate::base::{EventId, PaymentId, PurchasedTicketId, SaleId, TicketId, TransferId, UserId};
use crate::payment::PaymentStatus;
use crate::transfer::TransferStatus;
use thiserror::Error;

/// Coarse classification of a [`TicketingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or out-of-range input.
    Validation,
    /// Unknown event, sale, ticket, transfer, payment or user.
    NotFound,
    /// Caller lacks ownership or role.
    Unauthorized,
    /// The current state of the store forbids the operation.
    Conflict,
    /// The payment gateway declined, timed out or failed.
    ExternalService,
}

/// Ticket sales and transfer errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketingError {
    /// Requested quantity is zero or above the allowed maximum
    #[error("invalid quantity {requested} (must be between 1 and {max})")]
    InvalidQuantity { requested: u32, max: u32 },

    /// Payment amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Ticket price is negative
    #[error("invalid price (must not be negative)")]
    InvalidPrice,

    /// A required text field is empty
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Sale window does not end after it starts
    #[error("sale window must end after it starts")]
    InvalidSaleWindow,

    /// Sale window starts now or in the past
    #[error("sale window must start in the future")]
    SaleStartNotInFuture,

    /// Sale belongs to another event
    #[error("sale {sale} does not belong to event {event}")]
    SaleEventMismatch { sale: SaleId, event: EventId },

    /// Sender and recipient of a transfer are the same user
    #[error("cannot transfer a ticket to yourself")]
    SelfTransfer,

    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("sale {0} not found")]
    SaleNotFound(SaleId),

    #[error("ticket {0} not found")]
    TicketNotFound(TicketId),

    #[error("purchased ticket {0} not found")]
    PurchasedTicketNotFound(PurchasedTicketId),

    #[error("transfer {0} not found")]
    TransferNotFound(TransferId),

    #[error("payment {0} not found")]
    PaymentNotFound(PaymentId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// No user is registered under the recipient email
    #[error("recipient user not found")]
    RecipientNotFound,

    /// A group update or delete matched no unsold units
    #[error("no unsold tickets found matching criteria")]
    NoUnsoldTickets,

    /// Caller is not the seller of the event
    #[error("user {user} is not the seller of event {event}")]
    NotEventSeller { event: EventId, user: UserId },

    /// Caller does not own the purchased ticket
    #[error("user {user} does not own purchased ticket {ticket}")]
    NotTicketOwner { ticket: PurchasedTicketId, user: UserId },

    /// Caller is not the recipient of the transfer
    #[error("user {user} is not the recipient of transfer {transfer}")]
    NotTransferRecipient { transfer: TransferId, user: UserId },

    /// Purchase attempted outside the sale window
    #[error("sale {0} is not currently active")]
    SaleNotActive(SaleId),

    /// Inventory edit attempted while the sale window is open
    #[error("sale {0} is already active")]
    SaleAlreadyActive(SaleId),

    /// Event is not approved for ticket sales
    #[error("event {0} is not approved for ticket sales")]
    EventNotApproved(EventId),

    /// Fewer matching units could be locked than requested
    #[error("not enough tickets available ({available} of {requested})")]
    InsufficientInventory { requested: u32, available: u32 },

    /// Sale window overlaps another window of the same event
    #[error("sale dates overlap with existing sale {existing}")]
    SaleWindowOverlap { existing: SaleId },

    /// Sale still has sold units attached
    #[error("sale {0} has sold tickets")]
    SaleHasSoldTickets(SaleId),

    /// Unit was sold and can no longer be edited or deleted
    #[error("ticket {0} is already sold")]
    TicketAlreadySold(TicketId),

    /// Purchased ticket has been used at the venue
    #[error("purchased ticket {0} is already used")]
    TicketAlreadyUsed(PurchasedTicketId),

    /// Another pending transfer exists for the purchased ticket
    #[error("purchased ticket {0} already has a pending transfer")]
    TransferAlreadyPending(PurchasedTicketId),

    /// Transfer already left the pending state
    #[error("transfer {transfer} is not pending (status: {status})")]
    TransferNotPending {
        transfer: TransferId,
        status: TransferStatus,
    },

    /// Ownership changed between initiation and acceptance
    #[error("purchased ticket {0} changed owner since the transfer was initiated")]
    OwnershipChanged(PurchasedTicketId),

    /// Only completed payments can be refunded
    #[error("payment {payment} cannot be refunded (status: {status})")]
    PaymentNotRefundable {
        payment: PaymentId,
        status: PaymentStatus,
    },

    /// Gateway declined or did not answer in time
    #[error("payment {payment} declined: {reason}")]
    PaymentDeclined { payment: PaymentId, reason: String },

    /// Gateway failed to reverse a completed charge
    #[error("refund of payment {payment} failed: {reason}")]
    RefundFailed { payment: PaymentId, reason: String },
}

impl TicketingError {
    pub fn kind(&self) -> ErrorKind {
        use TicketingError::*;
        match self {
            InvalidQuantity { .. }
            | InvalidAmount
            | InvalidPrice
            | MissingField(_)
            | InvalidSaleWindow
            | SaleStartNotInFuture
            | SaleEventMismatch { .. }
            | SelfTransfer => ErrorKind::Validation,
            EventNotFound(_)
            | SaleNotFound(_)
            | TicketNotFound(_)
            | PurchasedTicketNotFound(_)
            | TransferNotFound(_)
            | PaymentNotFound(_)
            | UserNotFound(_)
            | RecipientNotFound
            | NoUnsoldTickets => ErrorKind::NotFound,
            NotEventSeller { .. } | NotTicketOwner { .. } | NotTransferRecipient { .. } => {
                ErrorKind::Unauthorized
            }
            SaleNotActive(_)
            | SaleAlreadyActive(_)
            | EventNotApproved(_)
            | InsufficientInventory { .. }
            | SaleWindowOverlap { .. }
            | SaleHasSoldTickets(_)
            | TicketAlreadySold(_)
            | TicketAlreadyUsed(_)
            | TransferAlreadyPending(_)
            | TransferNotPending { .. }
            | OwnershipChanged(_)
            | PaymentNotRefundable { .. } => ErrorKind::Conflict,
            PaymentDeclined { .. } | RefundFailed { .. } => ErrorKind::ExternalService,
        }
    }
}
